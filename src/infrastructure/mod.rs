// Store adapters, decorators and the message bus
pub mod bus;                // Notification bus (NATS, in-memory)
pub mod graph_store;        // Graph store trait and neighborhood presets
pub mod record_store;       // Primary record store trait and SQLite impl
pub mod sqlite;             // Pool construction shared by both stores
pub mod sqlite_graph_store; // SQLite graph store
pub mod timeouts;           // Per-call timeout decorators

pub use bus::{BusMessage, InMemoryBus, MessageBus, NatsBus};
pub use graph_store::GraphStore;
pub use record_store::{RecordStore, SqliteRecordStore};
pub use sqlite_graph_store::SqliteGraphStore;
pub use timeouts::{TimeoutGraphStore, TimeoutRecordStore};
