// Social Graph - follow relationships, neighborhood projections and discovery

// HTTP transport
pub mod api;

// Startup wiring
pub mod app_state;
pub mod config;

// Store adapters, decorators and the notification bus
pub mod infrastructure;

// Graph node kinds, edge types and records
pub mod models;

// Core graph services
pub mod services;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
