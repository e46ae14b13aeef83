use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlite_relay::coordinator::{self, LockMode};
use sqlite_relay::prelude::*;
use tokio::runtime::Runtime;
use tokio::time::Instant;

fn temp_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn count_into(counter: &Arc<AtomicUsize>) -> impl Fn(&BroadcastMessage) + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |_message| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn peer_drivers_see_close_and_reinit_exactly_once() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir, "shared.db");

        let a = WorkerDriver::with_config(DriverConfig::new(&path))?;
        let b = WorkerDriver::with_config(DriverConfig::new(&path))?;

        let (a_close, a_reinit) = (counter(), counter());
        let (b_close, b_reinit) = (counter(), counter());
        a.on_close(count_into(&a_close));
        a.on_reinit(count_into(&a_reinit));
        b.on_close(count_into(&b_close));
        b.on_reinit(count_into(&b_reinit));

        a.exec(Statement::run("CREATE TABLE k (v INT)", vec![]))
            .await?;
        b.ready().await?;

        let snapshot = a.export_database().await?;
        a.import_database(snapshot).await?;

        // Broadcast delivery is asynchronous.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(b_close.load(Ordering::SeqCst), 1, "peer close");
        assert_eq!(b_reinit.load(Ordering::SeqCst), 1, "peer reinit");
        // The importer filters its own broadcasts by client key.
        assert_eq!(a_close.load(Ordering::SeqCst), 0, "self close");
        assert_eq!(a_reinit.load(Ordering::SeqCst), 0, "self reinit");

        a.destroy().await?;
        b.destroy().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

#[test]
fn client_keys_differ_per_instance() -> Result<(), Box<dyn Error>> {
    let a = WorkerDriver::new();
    let b = WorkerDriver::new();
    assert_ne!(a.client_key(), b.client_key());
    Ok(())
}

#[test]
fn exclusive_lock_blocks_shared_acquirer() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let path = "lock-contention.db";
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();

        let holder = tokio::spawn(async move {
            coordinator::with_lock(path, LockMode::Exclusive, async move {
                let _ = entered_tx.send(());
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
            .await;
        });

        entered_rx.await?;
        let start = Instant::now();
        coordinator::with_lock(path, LockMode::Shared, async {}).await;
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "shared acquisition should have waited for the exclusive holder"
        );

        holder.await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

#[test]
fn lock_releases_on_the_error_path() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let path = "lock-release.db";
        let failed: Result<(), RelayDbError> =
            coordinator::with_lock(path, LockMode::Exclusive, async {
                Err(RelayDbError::Other("boom".into()))
            })
            .await;
        assert!(failed.is_err());

        // A second acquisition must not deadlock.
        let ok = tokio::time::timeout(
            Duration::from_millis(500),
            coordinator::with_lock(path, LockMode::Exclusive, async { 1 }),
        )
        .await?;
        assert_eq!(ok, 1);
        Ok::<(), Box<dyn Error>>(())
    })
}

#[test]
fn empty_path_skips_coordination() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        // Nested empty-path sections would deadlock if they shared a lock.
        let value = coordinator::with_lock("", LockMode::Exclusive, async {
            coordinator::with_lock("", LockMode::Exclusive, async { 7 }).await
        })
        .await;
        assert_eq!(value, 7);
        Ok::<(), Box<dyn Error>>(())
    })
}
