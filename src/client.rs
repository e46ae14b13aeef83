use crate::driver::DatabaseDriver;
#[cfg(feature = "mirror")]
use crate::driver::MirrorDriver;
use crate::driver::{DriverConfig, WorkerDriver};
use crate::error::RelayDbError;
use crate::results::{RawResult, Row};
use crate::statement::Statement;
use crate::types::SqlValue;

/// Snapshot of a client's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub ready: bool,
    pub persistent: bool,
    /// Writes awaiting replication; None for drivers without a
    /// write-through queue.
    pub pending_sync: Option<usize>,
    pub degraded: bool,
}

/// Records statements for `batch`/`transaction` submission.
///
/// This is statement recording, not an interactive transaction: the
/// callback cannot branch on intermediate query results.
#[derive(Debug, Default)]
pub struct StatementCollector {
    statements: Vec<Statement>,
}

impl StatementCollector {
    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn run(&mut self, sql: impl Into<String>, params: Vec<SqlValue>) {
        self.push(Statement::run(sql, params));
    }

    pub fn get(&mut self, sql: impl Into<String>, params: Vec<SqlValue>) {
        self.push(Statement::get(sql, params));
    }

    pub fn all(&mut self, sql: impl Into<String>, params: Vec<SqlValue>) {
        self.push(Statement::all(sql, params));
    }
}

/// Typed façade over a driver: statements in, materialized rows out.
///
/// ```rust,no_run
/// use sqlite_relay::prelude::*;
///
/// # async fn demo() -> Result<(), RelayDbError> {
/// let client = Client::worker(DriverConfig::new("app.db"))?;
/// client.run("CREATE TABLE k (v INT)", vec![]).await?;
/// client.run("INSERT INTO k VALUES (?)", vec![7.into()]).await?;
/// let rows = client.query("SELECT v FROM k", vec![]).await?;
/// assert_eq!(rows[0].get("v"), Some(&SqlValue::Int(7)));
/// # Ok(()) }
/// ```
pub struct Client<D: DatabaseDriver> {
    driver: D,
}

impl Client<WorkerDriver> {
    /// Client over the core worker pipeline.
    ///
    /// # Errors
    /// Returns `RelayDbError::ConfigError` if the configuration is
    /// rejected.
    pub fn worker(config: DriverConfig) -> Result<Self, RelayDbError> {
        Ok(Self::new(WorkerDriver::with_config(config)?))
    }
}

#[cfg(feature = "mirror")]
impl Client<MirrorDriver> {
    /// Client over the dual-engine driver: synchronous reads from the
    /// in-memory mirror, asynchronous write-through persistence.
    ///
    /// # Errors
    /// Returns `RelayDbError::ConfigError` if the configuration is
    /// rejected.
    pub fn mirror(config: DriverConfig) -> Result<Self, RelayDbError> {
        Ok(Self::new(MirrorDriver::with_config(config)?))
    }
}

impl<D: DatabaseDriver> Client<D> {
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// Direct access to the driver for operations outside the façade
    /// (export/import, broadcast handlers).
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Force initialization to completion.
    ///
    /// # Errors
    /// Propagates initialization failures; retriable.
    pub async fn ready(&self) -> Result<(), RelayDbError> {
        self.driver.ready().await
    }

    /// Execute and materialize every row.
    ///
    /// # Errors
    /// Propagates driver and engine failures.
    pub async fn query(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Row>, RelayDbError> {
        let result = self.driver.exec(Statement::all(sql, params)).await?;
        Ok(result.into_rows())
    }

    /// Execute and materialize the first row, if any.
    ///
    /// # Errors
    /// Propagates driver and engine failures.
    pub async fn get(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<Option<Row>, RelayDbError> {
        let result = self.driver.exec(Statement::get(sql, params)).await?;
        Ok(result.into_first_row())
    }

    /// Execute for effect, discarding rows.
    ///
    /// # Errors
    /// Propagates driver and engine failures.
    pub async fn run(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<(), RelayDbError> {
        self.driver.exec(Statement::run(sql, params)).await?;
        Ok(())
    }

    /// Assemble a statement from literal parts and interpolated values.
    /// Equivalent to `Statement::weave`; the `sql!` macro produces
    /// compatible input.
    #[must_use]
    pub fn sql(parts: &[&str], params: Vec<SqlValue>) -> Statement {
        Statement::weave(parts, params)
    }

    /// Collect statements and submit them as one batch.
    ///
    /// # Errors
    /// Propagates driver and engine failures; the batch is atomic.
    pub async fn batch<F>(&self, collect: F) -> Result<Vec<RawResult>, RelayDbError>
    where
        F: FnOnce(&mut StatementCollector),
    {
        let mut collector = StatementCollector::default();
        collect(&mut collector);
        self.driver.exec_batch(collector.statements).await
    }

    /// Collect statements and submit them as one transaction.
    ///
    /// # Errors
    /// Propagates driver and engine failures; on error nothing is applied.
    pub async fn transaction<F>(&self, collect: F) -> Result<Vec<RawResult>, RelayDbError>
    where
        F: FnOnce(&mut StatementCollector),
    {
        let mut collector = StatementCollector::default();
        collect(&mut collector);
        self.driver.transaction(collector.statements).await
    }

    /// Tear the driver down.
    ///
    /// # Errors
    /// Best-effort; destroy itself never fails, but the signature matches
    /// the driver seam.
    pub async fn close(&self) -> Result<(), RelayDbError> {
        self.driver.destroy().await
    }

    #[must_use]
    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            ready: self.driver.is_ready(),
            persistent: self.driver.has_persistent_storage(),
            pending_sync: self.driver.pending_sync_count(),
            degraded: self.driver.is_degraded(),
        }
    }
}
