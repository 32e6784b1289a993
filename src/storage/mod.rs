//! Persistence of anomaly events
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with WAL and migrations
//! - **In-Memory**: No persistence, for tests or when storage is disabled
//!
//! ## Usage
//!
//! ```no_run
//! use pulsewatch::storage::{EventBackend, sqlite::SqliteEventBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteEventBackend::new("./events.db").await?;
//!     println!("{} events stored", backend.count().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{EventBackend, EventQuery, HealthStatus};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryEventBackend;
