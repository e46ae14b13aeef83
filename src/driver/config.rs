use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Backend;

/// Construction-time driver options. Supplied once via `set_config` and
/// immutable after the driver initializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Path of the database file. Empty means an ephemeral database with no
    /// cross-instance coordination.
    pub database_path: String,
    /// Storage backend; `Worker` is the persistent pipeline.
    pub backend: Backend,
    /// Raise per-envelope dispatch logging to debug level.
    pub verbose: bool,
    /// Override the per-operation timeout table with one flat budget.
    /// The defaults suit interactive workloads; bulk jobs can widen them
    /// and tests can shrink them.
    #[serde(default)]
    pub operation_timeout: Option<Duration>,
}

impl DriverConfig {
    #[must_use]
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            backend: Backend::default(),
            verbose: false,
            operation_timeout: None,
        }
    }

    /// Ephemeral database: empty path, nothing persisted.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new("")
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, budget: Duration) -> Self {
        self.operation_timeout = Some(budget);
        self
    }

    /// The path the engine actually opens. The memory backend always opens
    /// an ephemeral in-memory database, whatever the configured path.
    #[must_use]
    pub(crate) fn engine_path(&self) -> &str {
        match self.backend {
            Backend::Memory => "",
            Backend::Worker => &self.database_path,
        }
    }

    #[must_use]
    pub(crate) fn is_persistent(&self) -> bool {
        self.backend == Backend::Worker && !self.database_path.is_empty()
    }
}
