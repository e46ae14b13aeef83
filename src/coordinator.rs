// Cross-instance coordinator - two primitives keyed by database path.
//
// Broadcast: a process-wide pub/sub channel per path carrying reinit/close
// notifications. Messages echo to every subscriber including the sender;
// receivers filter by client key.
//
// Named lock: a per-path reader/writer lock. Export runs under the shared
// side, import under the exclusive side. The guard is held across the
// critical section and released on every exit path.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

const BROADCAST_CAPACITY: usize = 64;

type ChannelMap = HashMap<String, broadcast::Sender<BroadcastMessage>>;
type LockMap = HashMap<String, Arc<RwLock<()>>>;

static CHANNELS: LazyLock<Mutex<ChannelMap>> = LazyLock::new(|| Mutex::new(HashMap::new()));
static LOCKS: LazyLock<Mutex<LockMap>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock_registry<'a, T>(registry: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Deterministic broadcast channel name for a database path. Independent
/// drivers on the same path converge on the same channel.
#[must_use]
pub fn channel_name(database_path: &str) -> String {
    format!("sqlite-relay:db:{database_path}")
}

/// Deterministic lock name for a database path.
#[must_use]
pub fn lock_name(database_path: &str) -> String {
    format!("sqlite-relay:lock:{database_path}")
}

/// Notification kinds posted around bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastKind {
    Reinit,
    Close,
}

/// Message posted to every driver subscribed to a database path. The
/// originating driver filters its own messages by `client_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub kind: BroadcastKind,
    pub client_key: String,
    pub timestamp_ms: u64,
}

impl BroadcastMessage {
    #[must_use]
    pub fn new(kind: BroadcastKind, client_key: impl Into<String>) -> Self {
        Self {
            kind,
            client_key: client_key.into(),
            timestamp_ms: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn channel(database_path: &str) -> broadcast::Sender<BroadcastMessage> {
    let mut channels = lock_registry(&CHANNELS);
    channels
        .entry(channel_name(database_path))
        .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
        .clone()
}

/// Subscribe to the broadcast channel for a database path.
#[must_use]
pub fn subscribe(database_path: &str) -> broadcast::Receiver<BroadcastMessage> {
    channel(database_path).subscribe()
}

/// Post a message to every subscriber on the path. Best-effort: a path with
/// no peers drops the message silently.
pub fn publish(database_path: &str, message: BroadcastMessage) {
    let sender = channel(database_path);
    if sender.send(message).is_err() {
        tracing::debug!(path = database_path, "broadcast with no subscribers dropped");
    }
}

/// Lock acquisition mode for bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Single holder; used around import.
    Exclusive,
    /// Concurrent holders; used around export.
    Shared,
}

fn named_lock(database_path: &str) -> Arc<RwLock<()>> {
    let mut locks = lock_registry(&LOCKS);
    Arc::clone(
        locks
            .entry(lock_name(database_path))
            .or_insert_with(|| Arc::new(RwLock::new(()))),
    )
}

/// Run `work` inside the named critical section for `database_path`.
///
/// The guard is held for the whole future and released when it completes,
/// successfully or not. An empty path means an ephemeral database with no
/// peers; the work runs unlocked.
pub async fn with_lock<T, F>(database_path: &str, mode: LockMode, work: F) -> T
where
    F: Future<Output = T>,
{
    if database_path.is_empty() {
        return work.await;
    }
    let lock = named_lock(database_path);
    match mode {
        LockMode::Exclusive => {
            let _guard = lock.write().await;
            work.await
        }
        LockMode::Shared => {
            let _guard = lock.read().await;
            work.await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_pure_functions_of_the_path() {
        assert_eq!(channel_name("a.db"), channel_name("a.db"));
        assert_ne!(channel_name("a.db"), channel_name("b.db"));
        assert_ne!(channel_name("a.db"), lock_name("a.db"));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        publish(
            "no-subscribers.db",
            BroadcastMessage::new(BroadcastKind::Close, "k"),
        );
    }

    #[test]
    fn subscribers_on_same_path_share_a_channel() {
        let mut rx = subscribe("shared-path.db");
        publish(
            "shared-path.db",
            BroadcastMessage::new(BroadcastKind::Reinit, "key-1"),
        );
        let message = rx.try_recv().expect("message delivered");
        assert_eq!(message.kind, BroadcastKind::Reinit);
        assert_eq!(message.client_key, "key-1");
    }
}
