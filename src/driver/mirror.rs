use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;

use crate::engine::run_statement;
use crate::error::RelayDbError;
use crate::results::RawResult;
use crate::statement::Statement;

use super::config::DriverConfig;
use super::worker::WorkerDriver;
use super::{DatabaseDriver, lock_unpoisoned};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY_MS: u64 = 5_000;

// Mirror pragmas trade durability for speed; durability is the worker's
// job.
const MIRROR_PRAGMAS: &str = "\
    PRAGMA synchronous = OFF;\n\
    PRAGMA journal_mode = MEMORY;\n\
    PRAGMA temp_store = MEMORY;\n\
    PRAGMA locking_mode = EXCLUSIVE;\n\
    PRAGMA cache_size = -64000;";

/// Dual-engine driver: a synchronous in-memory mirror answers every read
/// and write immediately, while a write-through queue replicates writes to
/// the worker pipeline in batches with exponential-backoff retry.
///
/// Writes acknowledged locally may be lost if the process exits before the
/// queue drains; `pending_sync_count` exposes the backlog.
#[derive(Clone)]
pub struct MirrorDriver {
    inner: Arc<MirrorInner>,
}

struct MirrorInner {
    worker: WorkerDriver,
    memory: Mutex<Option<Connection>>,
    queue: Mutex<Vec<Statement>>,
    boot_gate: tokio::sync::Mutex<()>,
    ready: AtomicBool,
    // Single-flusher discipline: at most one drain holds this at a time.
    flush_lock: tokio::sync::Mutex<()>,
    flush_scheduled: AtomicBool,
    retry_count: AtomicU32,
    importing: AtomicBool,
    degraded: AtomicBool,
}

impl Default for MirrorDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                worker: WorkerDriver::new(),
                memory: Mutex::new(None),
                queue: Mutex::new(Vec::new()),
                boot_gate: tokio::sync::Mutex::new(()),
                ready: AtomicBool::new(false),
                flush_lock: tokio::sync::Mutex::new(()),
                flush_scheduled: AtomicBool::new(false),
                retry_count: AtomicU32::new(0),
                importing: AtomicBool::new(false),
                degraded: AtomicBool::new(false),
            }),
        }
    }

    /// Construct with a configuration already applied.
    ///
    /// # Errors
    /// Never fails on a fresh driver; kept fallible to match `set_config`.
    pub fn with_config(config: DriverConfig) -> Result<Self, RelayDbError> {
        let driver = Self::new();
        driver.set_config(config)?;
        Ok(driver)
    }

    /// The underlying worker driver, for broadcast-handler registration.
    #[must_use]
    pub fn worker(&self) -> &WorkerDriver {
        &self.inner.worker
    }

    /// First operation: bring the worker up, open the mirror, replay the
    /// persistent schema and contents into it.
    pub async fn ensure_ready(&self) -> Result<(), RelayDbError> {
        let inner = &self.inner;
        if inner.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let _gate = inner.boot_gate.lock().await;
        if inner.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        inner.worker.ensure_ready().await?;
        self.open_mirror()?;
        self.boot_sync().await;
        inner.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn open_mirror(&self) -> Result<(), RelayDbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MIRROR_PRAGMAS)?;
        *lock_unpoisoned(&self.inner.memory) = Some(conn);
        Ok(())
    }

    /// Replay `sqlite_master` schema and table contents from the worker
    /// into the mirror. Failures log and continue; the mirror stays usable
    /// with whatever made it across, and the driver reports degraded.
    async fn boot_sync(&self) {
        let inner = &self.inner;
        let schema = match inner
            .worker
            .exec(Statement::all(
                "SELECT name, sql FROM sqlite_master \
                 WHERE type = 'table' AND name <> 'sqlite_sequence'",
                vec![],
            ))
            .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "boot sync could not read schema; mirror starts empty");
                inner.degraded.store(true, Ordering::Release);
                return;
            }
        };

        for row in &schema.rows {
            let Some(name) = row.first().and_then(|v| v.as_text()) else {
                continue;
            };
            let Some(create_sql) = row.get(1).and_then(|v| v.as_text()) else {
                continue;
            };
            if let Err(err) = self.replay_table(name, create_sql).await {
                tracing::warn!(table = name, error = %err, "boot sync skipped table");
                inner.degraded.store(true, Ordering::Release);
            }
        }
    }

    async fn replay_table(&self, name: &str, create_sql: &str) -> Result<(), RelayDbError> {
        let inner = &self.inner;
        self.exec_memory(&Statement::run(create_sql, vec![]))?;

        let quoted = quote_ident(name);
        let contents = inner
            .worker
            .exec(Statement::all(format!("SELECT * FROM {quoted}"), vec![]))
            .await?;
        if contents.rows.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; contents.columns.len()].join(", ");
        let insert = format!("INSERT INTO {quoted} VALUES ({placeholders})");
        let mut memory = lock_unpoisoned(&inner.memory);
        let conn = memory
            .as_mut()
            .ok_or_else(|| RelayDbError::ConnectionError("mirror not initialized".into()))?;
        let tx = conn.transaction()?;
        for row in contents.rows {
            run_statement(&tx, &Statement::run(insert.clone(), row))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Execute synchronously against the mirror. Callers never wait on the
    /// worker here.
    fn exec_memory(&self, statement: &Statement) -> Result<RawResult, RelayDbError> {
        let memory = lock_unpoisoned(&self.inner.memory);
        let conn = memory
            .as_ref()
            .ok_or_else(|| RelayDbError::ConnectionError("mirror not initialized".into()))?;
        run_statement(conn, statement)
    }

    fn enqueue_write(&self, statement: Statement) {
        lock_unpoisoned(&self.inner.queue).push(statement);
        self.schedule_flush();
    }

    fn schedule_flush(&self) {
        if self.inner.importing.load(Ordering::Acquire) {
            return;
        }
        if self.inner.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = inner.flush_lock.lock().await;
            inner.flush_scheduled.store(false, Ordering::Release);
            drain_queue(&inner).await;
        });
    }

    /// Drain the write-through queue to the worker and wait for it. Used
    /// by export/import to make the file reflect the mirror first.
    pub async fn flush_sync_queue(&self) -> Result<(), RelayDbError> {
        self.ensure_ready().await?;
        let _guard = self.inner.flush_lock.lock().await;
        drain_queue(&self.inner).await;
        Ok(())
    }

    async fn rebuild_mirror(&self) -> Result<(), RelayDbError> {
        self.open_mirror()?;
        self.boot_sync().await;
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn retry_delay(retry_count: u32) -> Duration {
    let exp = retry_count.min(16);
    Duration::from_millis((RETRY_BASE_DELAY_MS << exp).min(RETRY_MAX_DELAY_MS))
}

/// Flusher body. Runs with `flush_lock` held: swap the queue with an empty
/// one, ship the captured batch as one execBatch envelope, retry with
/// backoff on failure, re-prepending the batch so write order is
/// preserved.
async fn drain_queue(inner: &Arc<MirrorInner>) {
    loop {
        if inner.importing.load(Ordering::Acquire) {
            break;
        }
        let batch: Vec<Statement> = {
            let mut queue = lock_unpoisoned(&inner.queue);
            if queue.is_empty() {
                break;
            }
            std::mem::take(&mut *queue)
        };

        match inner.worker.exec_batch(batch.clone()).await {
            Ok(_) => {
                inner.retry_count.store(0, Ordering::Release);
            }
            Err(err) => {
                let retries = inner.retry_count.fetch_add(1, Ordering::AcqRel) + 1;
                let message = err.to_string();
                if retries <= MAX_RETRIES {
                    tracing::warn!(
                        attempt = retries,
                        error = %message,
                        "sync flush failed; batch re-queued"
                    );
                    // Failed batch returns to the head so replication
                    // order matches the mirror's write order.
                    {
                        let mut queue = lock_unpoisoned(&inner.queue);
                        let newer = std::mem::take(&mut *queue);
                        let mut merged = batch;
                        merged.extend(newer);
                        *queue = merged;
                    }
                    if message.contains("timeout") || message.contains("Worker") {
                        recover_worker(inner).await;
                    }
                } else {
                    tracing::error!(
                        dropped = batch.len(),
                        error = %message,
                        "sync flush exceeded retry budget; dropping batch"
                    );
                    inner.retry_count.store(0, Ordering::Release);
                    recover_worker(inner).await;
                }
                tokio::time::sleep(retry_delay(retries)).await;
            }
        }
    }
}

async fn recover_worker(inner: &Arc<MirrorInner>) {
    match inner.worker.recover().await {
        Ok(()) => {
            tracing::warn!("engine worker recovered");
        }
        Err(err) => {
            // Degraded: writes keep accumulating in memory and will not
            // persist until a later recovery succeeds.
            tracing::error!(error = %err, "engine worker recovery failed; driver degraded");
            inner.degraded.store(true, Ordering::Release);
        }
    }
}

#[async_trait]
impl DatabaseDriver for MirrorDriver {
    fn set_config(&self, config: DriverConfig) -> Result<(), RelayDbError> {
        self.inner.worker.set_config(config)
    }

    async fn ready(&self) -> Result<(), RelayDbError> {
        self.ensure_ready().await
    }

    /// Reads answer from the mirror immediately; writes apply to the
    /// mirror, then queue for asynchronous replication.
    async fn exec(&self, statement: Statement) -> Result<RawResult, RelayDbError> {
        self.ensure_ready().await?;
        let result = self.exec_memory(&statement)?;
        if statement.is_write() {
            self.enqueue_write(statement);
        }
        Ok(result)
    }

    async fn exec_batch(
        &self,
        statements: Vec<Statement>,
    ) -> Result<Vec<RawResult>, RelayDbError> {
        self.ensure_ready().await?;
        // Statements run against the mirror one by one; a mid-batch failure
        // leaves the earlier statements applied, so their writes must still
        // replicate or the mirror and the file drift apart.
        let mut results = Vec::with_capacity(statements.len());
        let mut writes = Vec::new();
        let mut failure = None;
        for statement in statements {
            match self.exec_memory(&statement) {
                Ok(result) => {
                    results.push(result);
                    if statement.is_write() {
                        writes.push(statement);
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if !writes.is_empty() {
            lock_unpoisoned(&self.inner.queue).extend(writes);
            self.schedule_flush();
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }

    async fn transaction(
        &self,
        statements: Vec<Statement>,
    ) -> Result<Vec<RawResult>, RelayDbError> {
        self.ensure_ready().await?;
        let results = {
            let mut memory = lock_unpoisoned(&self.inner.memory);
            let conn = memory
                .as_mut()
                .ok_or_else(|| RelayDbError::ConnectionError("mirror not initialized".into()))?;
            let tx = conn.transaction()?;
            let mut results = Vec::with_capacity(statements.len());
            for statement in &statements {
                results.push(run_statement(&tx, statement)?);
            }
            tx.commit()?;
            results
        };
        let writes: Vec<Statement> = statements.into_iter().filter(Statement::is_write).collect();
        if !writes.is_empty() {
            lock_unpoisoned(&self.inner.queue).extend(writes);
            self.schedule_flush();
        }
        Ok(results)
    }

    /// Flush first so the exported file reflects the mirror state.
    async fn export_database(&self) -> Result<Vec<u8>, RelayDbError> {
        self.flush_sync_queue().await?;
        self.inner.worker.export_database().await
    }

    /// Flush, replace the file through the worker, then rebuild the mirror
    /// from the imported contents. The importing flag parks the flusher so
    /// batch writes cannot interleave with the replacement.
    async fn import_database(&self, data: Vec<u8>) -> Result<(), RelayDbError> {
        self.flush_sync_queue().await?;
        self.inner.importing.store(true, Ordering::Release);
        let result = {
            let outcome = self.inner.worker.import_database(data).await;
            match outcome {
                Ok(()) => self.rebuild_mirror().await,
                Err(err) => Err(err),
            }
        };
        self.inner.importing.store(false, Ordering::Release);
        if !lock_unpoisoned(&self.inner.queue).is_empty() {
            self.schedule_flush();
        }
        result
    }

    async fn destroy(&self) -> Result<(), RelayDbError> {
        // Last chance to persist acknowledged writes; losses past this
        // point are the documented tradeoff.
        if self.inner.ready.load(Ordering::Acquire) {
            if let Err(err) = self.flush_sync_queue().await {
                tracing::warn!(error = %err, "final flush before destroy failed");
            }
        }
        *lock_unpoisoned(&self.inner.memory) = None;
        self.inner.ready.store(false, Ordering::Release);
        self.inner.worker.destroy().await
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    fn has_persistent_storage(&self) -> bool {
        self.inner.worker.has_persistent_storage()
    }

    fn pending_sync_count(&self) -> Option<usize> {
        Some(lock_unpoisoned(&self.inner.queue).len())
    }

    fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_is_capped_exponential() {
        assert_eq!(retry_delay(1), Duration::from_millis(200));
        assert_eq!(retry_delay(2), Duration::from_millis(400));
        assert_eq!(retry_delay(3), Duration::from_millis(800));
        assert_eq!(retry_delay(6), Duration::from_millis(5_000));
        assert_eq!(retry_delay(20), Duration::from_millis(5_000));
    }

    #[test]
    fn identifier_quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
