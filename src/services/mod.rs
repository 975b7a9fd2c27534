// Graph services - the five core components plus background reconciliation
pub mod hydration;
pub mod node_sync;
pub mod notifications;
pub mod projection;
pub mod recommendation;
pub mod reconciliation;
pub mod relationships;

pub use node_sync::{ManagesLink, NodeSync, PageSyncReport};
pub use notifications::{DispatcherConfig, DispatcherStats, NotificationDispatcher};
pub use projection::ProjectionService;
pub use recommendation::{DiscoveryConfig, RecommendationEngine, ScoredCandidate};
pub use reconciliation::{ReconcileReport, Reconciler};
pub use relationships::RelationshipEngine;
