pub mod cleanup;
pub mod config;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, PostgresStorageConfig, ServerConfig, StorageBackend};
pub use observability::init_tracing;
pub use server::{ServerBuilder, WardenServer, build_app, build_stores};
