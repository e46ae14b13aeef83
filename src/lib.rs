/*!
 * SQLite Relay - non-blocking, durable SQLite access
 *
 * This crate keeps the SQLite engine on a dedicated worker thread that owns
 * exactly one connection, and gives async callers a uniform query/mutation
 * surface over an id-correlated request/response pipeline with
 * per-operation timeouts. Driver instances on the same database path
 * coordinate bulk import/export through a broadcast channel and a named
 * shared/exclusive lock.
 *
 * # Features
 *
 * - Lazy engine initialization behind a single-entry async gate
 * - Per-operation timeout budgets with clean cancellation on destroy
 * - Whole-database export/import with cross-instance coordination
 * - Optional dual-engine driver: a synchronous in-memory mirror backed by
 *   a retrying write-through queue (`mirror` feature)
 *
 * # Example
 *
 * ```rust,no_run
 * use sqlite_relay::prelude::*;
 *
 * async fn example() -> Result<(), RelayDbError> {
 *     let client = Client::worker(DriverConfig::new("my_database.db"))?;
 *
 *     client.run("CREATE TABLE users (id INTEGER, name TEXT)", vec![]).await?;
 *     client
 *         .run("INSERT INTO users VALUES (?, ?)", vec![1.into(), "alice".into()])
 *         .await?;
 *
 *     let rows = client
 *         .query("SELECT * FROM users WHERE id = ?", vec![1.into()])
 *         .await?;
 *     for row in rows {
 *         println!("user: {:?}", row.get("name"));
 *     }
 *
 *     client.close().await?;
 *     Ok(())
 * }
 * ```
 */

#![forbid(unsafe_code)]

// Re-export everything that should be part of the public API
pub mod prelude {
    //! Convenient imports for common functionality.

    pub use crate::client::{Client, ClientStatus, StatementCollector};
    pub use crate::coordinator::{BroadcastKind, BroadcastMessage, LockMode};
    pub use crate::driver::{DatabaseDriver, DriverConfig, WorkerDriver};
    pub use crate::error::RelayDbError;
    pub use crate::protocol::{Operation, RequestEnvelope, ResponseEnvelope, ResponsePayload};
    pub use crate::results::{RawResult, Row};
    pub use crate::statement::Statement;
    pub use crate::types::{Backend, Method, SqlValue};

    #[cfg(feature = "mirror")]
    pub use crate::driver::MirrorDriver;
}

// Core modules
pub mod client;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod results;
pub mod statement;
pub mod types;

// Engine internals stay crate-private; everything reaches them through a
// driver.
mod engine;

// Direct exports of frequently used types for simplicity
pub use client::{Client, ClientStatus, StatementCollector};
pub use driver::{DatabaseDriver, DriverConfig, WorkerDriver};
pub use error::RelayDbError;
pub use results::{RawResult, Row};
pub use statement::Statement;
pub use types::{Backend, Method, SqlValue};

#[cfg(feature = "mirror")]
pub use driver::MirrorDriver;
