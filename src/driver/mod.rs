// Drivers - the main-side request coordinators.
//
// - config: construction-time options
// - worker: the core variant dispatching every statement to the engine
// - mirror: the dual-engine variant with a synchronous in-memory mirror
//   and a write-through queue (feature "mirror")

pub mod config;
#[cfg(feature = "mirror")]
pub mod mirror;
pub mod worker;

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::RelayDbError;
use crate::results::RawResult;
use crate::statement::Statement;

pub use config::DriverConfig;
#[cfg(feature = "mirror")]
pub use mirror::MirrorDriver;
pub use worker::WorkerDriver;

/// The seam the client façade consumes; implemented by both driver
/// variants.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Supply the configuration. Mandatory before any operation; rejected
    /// once the driver has initialized.
    fn set_config(&self, config: DriverConfig) -> Result<(), RelayDbError>;

    /// Force lazy initialization to completion.
    async fn ready(&self) -> Result<(), RelayDbError>;

    async fn exec(&self, statement: Statement) -> Result<RawResult, RelayDbError>;

    async fn exec_batch(
        &self,
        statements: Vec<Statement>,
    ) -> Result<Vec<RawResult>, RelayDbError>;

    async fn transaction(
        &self,
        statements: Vec<Statement>,
    ) -> Result<Vec<RawResult>, RelayDbError>;

    /// Serialize the whole database into a byte buffer.
    async fn export_database(&self) -> Result<Vec<u8>, RelayDbError>;

    /// Replace the database contents from a byte buffer.
    async fn import_database(&self, data: Vec<u8>) -> Result<(), RelayDbError>;

    /// Tear the driver down. Best-effort and terminal.
    async fn destroy(&self) -> Result<(), RelayDbError>;

    fn is_ready(&self) -> bool;

    fn has_persistent_storage(&self) -> bool;

    /// Writes applied locally but not yet durably flushed. None for drivers
    /// without a write-through queue.
    fn pending_sync_count(&self) -> Option<usize> {
        None
    }

    /// Whether the driver is running with incomplete mirror state or a
    /// failed recovery behind it.
    fn is_degraded(&self) -> bool {
        false
    }
}

// Mutex guard with poison recovery; pending maps and queues hold plain
// data, so a poisoned lock is still usable.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
