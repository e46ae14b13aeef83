use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::coordinator::{self, BroadcastKind, BroadcastMessage, LockMode};
use crate::engine::{EngineHandle, spawn_engine};
use crate::error::RelayDbError;
use crate::protocol::{Operation, RequestEnvelope, ResponseEnvelope, ResponsePayload};
use crate::results::RawResult;
use crate::statement::Statement;

use super::config::DriverConfig;
use super::{DatabaseDriver, lock_unpoisoned};

/// Handler invoked from the broadcast listener for peer notifications.
pub type BroadcastHandler = Arc<dyn Fn(&BroadcastMessage) + Send + Sync>;

#[derive(Default)]
struct BroadcastHandlers {
    on_reinit: Option<BroadcastHandler>,
    on_close: Option<BroadcastHandler>,
}

struct PendingRequest {
    respond_to: oneshot::Sender<Result<ResponsePayload, RelayDbError>>,
}

/// The request coordinator for the worker pipeline.
///
/// Lazily spawns the engine worker on the first operation (a single-entry
/// async gate collapses concurrent first operations into one init), then
/// dispatches envelopes correlated by monotonic string ids with
/// per-operation timeouts. Cheap to clone; clones share the pipeline.
#[derive(Clone)]
pub struct WorkerDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    client_key: String,
    config: Mutex<Option<DriverConfig>>,
    init_gate: tokio::sync::Mutex<()>,
    ready: AtomicBool,
    destroyed: AtomicBool,
    verbose: AtomicBool,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingRequest>>,
    engine: Mutex<Option<EngineHandle>>,
    router: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    handlers: Mutex<BroadcastHandlers>,
}

impl DriverInner {
    /// The single response handler: correlate by id, hand the outcome to
    /// the waiting caller. Late responses whose id is no longer pending
    /// (timeout, destroy) are dropped silently.
    fn complete(&self, response: ResponseEnvelope) {
        let entry = lock_unpoisoned(&self.pending).remove(&response.id);
        if let Some(pending) = entry {
            let _ = pending
                .respond_to
                .send(response.outcome.map_err(RelayDbError::from_wire));
        } else if self.verbose.load(Ordering::Relaxed) {
            tracing::debug!(id = %response.id, "late response dropped");
        }
    }

    fn deliver(&self, message: &BroadcastMessage) {
        let handler = {
            let handlers = lock_unpoisoned(&self.handlers);
            match message.kind {
                BroadcastKind::Reinit => handlers.on_reinit.clone(),
                BroadcastKind::Close => handlers.on_close.clone(),
            }
        };
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn coordination_path(&self) -> String {
        lock_unpoisoned(&self.config)
            .as_ref()
            .map(|config| config.engine_path().to_owned())
            .unwrap_or_default()
    }
}

impl Default for WorkerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DriverInner {
                client_key: uuid::Uuid::new_v4().to_string(),
                config: Mutex::new(None),
                init_gate: tokio::sync::Mutex::new(()),
                ready: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                verbose: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                engine: Mutex::new(None),
                router: Mutex::new(None),
                listener: Mutex::new(None),
                handlers: Mutex::new(BroadcastHandlers::default()),
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

    /// The random per-instance key used to filter this driver's own
    /// broadcasts.
    #[must_use]
    pub fn client_key(&self) -> &str {
        &self.inner.client_key
    }

    /// Register the handler for peer `reinit` notifications.
    pub fn on_reinit(&self, handler: impl Fn(&BroadcastMessage) + Send + Sync + 'static) {
        lock_unpoisoned(&self.inner.handlers).on_reinit = Some(Arc::new(handler));
    }

    /// Register the handler for peer `close` notifications.
    pub fn on_close(&self, handler: impl Fn(&BroadcastMessage) + Send + Sync + 'static) {
        lock_unpoisoned(&self.inner.handlers).on_close = Some(Arc::new(handler));
    }

    /// Lazy initialization: the first caller runs init while the gate
    /// suspends every concurrent first operation; a failed init releases
    /// the gate so the next caller retries.
    pub async fn ensure_ready(&self) -> Result<(), RelayDbError> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::Acquire) {
            return Err(RelayDbError::ExecutionError(
                "driver has been destroyed".into(),
            ));
        }
        if inner.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let _gate = inner.init_gate.lock().await;
        if inner.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        if inner.destroyed.load(Ordering::Acquire) {
            return Err(RelayDbError::ExecutionError(
                "driver has been destroyed".into(),
            ));
        }
        let config = lock_unpoisoned(&inner.config)
            .clone()
            .ok_or_else(|| RelayDbError::ConfigError("No configuration provided".into()))?;
        self.start_engine(&config).await
    }

    /// Terminate the engine (if any) and run the normal init sequence
    /// again. Used by the write-through flusher when the worker stops
    /// responding.
    pub async fn recover(&self) -> Result<(), RelayDbError> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::Acquire) {
            return Err(RelayDbError::ExecutionError(
                "driver has been destroyed".into(),
            ));
        }
        let _gate = inner.init_gate.lock().await;
        tracing::warn!(path = %inner.coordination_path(), "recovering engine worker");
        self.reject_pending("Worker destroyed while operation was pending");
        self.teardown_engine();
        inner.ready.store(false, Ordering::Release);
        let config = lock_unpoisoned(&inner.config)
            .clone()
            .ok_or_else(|| RelayDbError::ConfigError("No configuration provided".into()))?;
        self.start_engine(&config).await
    }

    async fn start_engine(&self, config: &DriverConfig) -> Result<(), RelayDbError> {
        let inner = &self.inner;
        inner.verbose.store(config.verbose, Ordering::Relaxed);

        let (response_tx, mut response_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_engine(response_tx)?;
        *lock_unpoisoned(&inner.engine) = Some(handle);

        let router_inner = Arc::clone(inner);
        let router = tokio::spawn(async move {
            while let Some(response) = response_rx.recv().await {
                router_inner.complete(response);
            }
        });
        *lock_unpoisoned(&inner.router) = Some(router);

        let init = Operation::Init {
            database_path: config.engine_path().to_owned(),
        };
        match self.dispatch(init).await {
            Ok(_) => {
                inner.ready.store(true, Ordering::Release);
                self.start_listener(config);
                tracing::debug!(path = config.engine_path(), "engine worker ready");
                Ok(())
            }
            Err(err) => {
                // Leave the driver re-initializable: a later first
                // operation runs the whole sequence again.
                self.teardown_engine();
                Err(err)
            }
        }
    }

    fn start_listener(&self, config: &DriverConfig) {
        let path = config.engine_path();
        if path.is_empty() {
            return;
        }
        let mut receiver = coordinator::subscribe(path);
        let inner = Arc::clone(&self.inner);
        let listener = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if message.client_key == inner.client_key {
                            continue;
                        }
                        inner.deliver(&message);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        let previous = lock_unpoisoned(&self.inner.listener).replace(listener);
        if let Some(task) = previous {
            task.abort();
        }
    }

    fn teardown_engine(&self) {
        // Dropping the handle closes the request channel; the worker
        // thread runs down after the envelope in progress.
        *lock_unpoisoned(&self.inner.engine) = None;
        if let Some(router) = lock_unpoisoned(&self.inner.router).take() {
            router.abort();
        }
        if let Some(listener) = lock_unpoisoned(&self.inner.listener).take() {
            listener.abort();
        }
    }

    fn reject_pending(&self, reason: &str) {
        let drained: Vec<PendingRequest> = {
            let mut pending = lock_unpoisoned(&self.inner.pending);
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry
                .respond_to
                .send(Err(RelayDbError::ConnectionError(reason.to_owned())));
        }
    }

    fn publish(&self, kind: BroadcastKind) {
        let path = self.inner.coordination_path();
        if path.is_empty() {
            return;
        }
        coordinator::publish(&path, BroadcastMessage::new(kind, self.inner.client_key.clone()));
    }

    /// Dispatch one envelope: register the pending entry, post, await the
    /// outcome under the operation's timeout budget (the configured flat
    /// override, when set). A timed-out entry is removed so the late
    /// response finds nothing.
    async fn dispatch(&self, op: Operation) -> Result<ResponsePayload, RelayDbError> {
        let inner = &self.inner;
        let kind = op.kind();
        let budget = lock_unpoisoned(&inner.config)
            .as_ref()
            .and_then(|config| config.operation_timeout)
            .unwrap_or_else(|| op.timeout());
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        let (respond_to, outcome) = oneshot::channel();
        lock_unpoisoned(&inner.pending).insert(id.clone(), PendingRequest { respond_to });

        let posted = {
            let engine = lock_unpoisoned(&inner.engine);
            match engine.as_ref() {
                Some(handle) => handle.send(RequestEnvelope { id: id.clone(), op }),
                None => Err(RelayDbError::ConnectionError("Worker not available".into())),
            }
        };
        if let Err(err) = posted {
            lock_unpoisoned(&inner.pending).remove(&id);
            return Err(err);
        }
        if inner.verbose.load(Ordering::Relaxed) {
            tracing::debug!(%id, kind, "envelope dispatched");
        }

        match tokio::time::timeout(budget, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_dropped)) => Err(RelayDbError::ConnectionError(
                "Worker destroyed while operation was pending".into(),
            )),
            Err(_elapsed) => {
                lock_unpoisoned(&inner.pending).remove(&id);
                Err(RelayDbError::TimeoutError(format!(
                    "Worker timeout after {}ms for operation: {kind}",
                    budget.as_millis()
                )))
            }
        }
    }

    async fn dispatch_exec(&self, statement: Statement) -> Result<RawResult, RelayDbError> {
        match self.dispatch(Operation::Exec { statement }).await? {
            ResponsePayload::Result(result) => Ok(result),
            _ => Err(unexpected_payload("exec")),
        }
    }

    async fn dispatch_many(
        &self,
        op: Operation,
    ) -> Result<Vec<RawResult>, RelayDbError> {
        match self.dispatch(op).await? {
            ResponsePayload::Results(results) => Ok(results),
            _ => Err(unexpected_payload("batch")),
        }
    }
}

fn unexpected_payload(kind: &str) -> RelayDbError {
    RelayDbError::ExecutionError(format!("unexpected response payload for {kind}"))
}

#[async_trait]
impl DatabaseDriver for WorkerDriver {
    fn set_config(&self, config: DriverConfig) -> Result<(), RelayDbError> {
        let inner = &self.inner;
        if inner.ready.load(Ordering::Acquire) || inner.destroyed.load(Ordering::Acquire) {
            return Err(RelayDbError::ConfigError(
                "configuration is immutable once the driver is initialized".into(),
            ));
        }
        *lock_unpoisoned(&inner.config) = Some(config);
        Ok(())
    }

    async fn ready(&self) -> Result<(), RelayDbError> {
        self.ensure_ready().await
    }

    async fn exec(&self, statement: Statement) -> Result<RawResult, RelayDbError> {
        self.ensure_ready().await?;
        self.dispatch_exec(statement).await
    }

    async fn exec_batch(
        &self,
        statements: Vec<Statement>,
    ) -> Result<Vec<RawResult>, RelayDbError> {
        self.ensure_ready().await?;
        self.dispatch_many(Operation::ExecBatch { statements }).await
    }

    async fn transaction(
        &self,
        statements: Vec<Statement>,
    ) -> Result<Vec<RawResult>, RelayDbError> {
        self.ensure_ready().await?;
        self.dispatch_many(Operation::Transaction { statements })
            .await
    }

    /// Export runs under the shared named lock: concurrent exporters are
    /// fine, but no peer may be importing.
    async fn export_database(&self) -> Result<Vec<u8>, RelayDbError> {
        self.ensure_ready().await?;
        let path = self.inner.coordination_path();
        coordinator::with_lock(&path, LockMode::Shared, async {
            match self.dispatch(Operation::Export).await? {
                ResponsePayload::Snapshot { data, .. } => Ok(data),
                _ => Err(unexpected_payload("export")),
            }
        })
        .await
    }

    /// Import runs under the exclusive named lock and brackets the file
    /// replacement with close/reinit broadcasts so peers drop and rebuild
    /// their state.
    async fn import_database(&self, data: Vec<u8>) -> Result<(), RelayDbError> {
        self.ensure_ready().await?;
        let path = self.inner.coordination_path();
        coordinator::with_lock(&path, LockMode::Exclusive, async {
            self.publish(BroadcastKind::Close);
            let result = match self.dispatch(Operation::Import { data }).await {
                Ok(ResponsePayload::Ack) => Ok(()),
                Ok(_) => Err(unexpected_payload("import")),
                Err(err) => Err(err),
            };
            // Peers dropped state on close; they rebuild on reinit whether
            // or not the replacement succeeded.
            self.publish(BroadcastKind::Reinit);
            result
        })
        .await
    }

    /// Best-effort, idempotent, terminal. Pending callers are rejected
    /// synchronously; the engine gets a destroy envelope it may or may not
    /// answer before the channel closes.
    async fn destroy(&self) -> Result<(), RelayDbError> {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.reject_pending("Worker destroyed while operation was pending");
        self.publish(BroadcastKind::Close);
        let had_engine = lock_unpoisoned(&inner.engine).is_some();
        if had_engine {
            let _ = self.dispatch(Operation::Destroy).await;
        }
        self.teardown_engine();
        inner.ready.store(false, Ordering::Release);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    fn has_persistent_storage(&self) -> bool {
        lock_unpoisoned(&self.inner.config)
            .as_ref()
            .is_some_and(DriverConfig::is_persistent)
    }
}
