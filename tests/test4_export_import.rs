use std::error::Error;

use sqlite_relay::prelude::*;
use tokio::runtime::Runtime;

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

fn temp_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[test]
fn export_import_round_trip() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir, "roundtrip.db");

        let driver = WorkerDriver::with_config(DriverConfig::new(&path))?;
        driver
            .exec(Statement::run("CREATE TABLE k (v INT)", vec![]))
            .await?;
        for v in [10i64, 20, 30] {
            driver
                .exec(Statement::run("INSERT INTO k VALUES (?)", vec![v.into()]))
                .await?;
        }

        let snapshot = driver.export_database().await?;
        assert!(snapshot.starts_with(SQLITE_MAGIC));
        driver.destroy().await?;

        // Fresh driver on the same path restores from the buffer.
        let restored = WorkerDriver::with_config(DriverConfig::new(&path))?;
        restored
            .exec(Statement::run("DELETE FROM k", vec![]))
            .await?;
        restored.import_database(snapshot).await?;

        let rows = restored
            .exec(Statement::all("SELECT v FROM k", vec![]))
            .await?;
        assert_eq!(
            rows.rows,
            vec![
                vec![SqlValue::Int(10)],
                vec![SqlValue::Int(20)],
                vec![SqlValue::Int(30)],
            ]
        );

        restored.destroy().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

#[test]
fn import_replaces_tables_absent_from_the_buffer() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;

        let source = WorkerDriver::with_config(DriverConfig::new(temp_path(&dir, "src.db")))?;
        source
            .exec(Statement::run("CREATE TABLE kept (v INT)", vec![]))
            .await?;
        source
            .exec(Statement::run("INSERT INTO kept VALUES (1)", vec![]))
            .await?;
        let snapshot = source.export_database().await?;
        source.destroy().await?;

        let target = WorkerDriver::with_config(DriverConfig::new(temp_path(&dir, "dst.db")))?;
        target
            .exec(Statement::run("CREATE TABLE stale (v INT)", vec![]))
            .await?;
        target.import_database(snapshot).await?;

        let kept = target
            .exec(Statement::get("SELECT v FROM kept", vec![]))
            .await?;
        assert_eq!(kept.rows, vec![vec![SqlValue::Int(1)]]);

        // Replace strategy: the pre-import table does not survive.
        let stale = target
            .exec(Statement::get(
                "SELECT count(*) AS n FROM sqlite_master WHERE name = 'stale'",
                vec![],
            ))
            .await?;
        assert_eq!(stale.rows, vec![vec![SqlValue::Int(0)]]);

        target.destroy().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

#[test]
fn import_rejects_garbage_and_keeps_the_database() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let driver = WorkerDriver::with_config(DriverConfig::new(temp_path(&dir, "safe.db")))?;
        driver
            .exec(Statement::run("CREATE TABLE k (v INT)", vec![]))
            .await?;
        driver
            .exec(Statement::run("INSERT INTO k VALUES (5)", vec![]))
            .await?;

        let err = driver.import_database(b"definitely not a database".to_vec()).await;
        assert!(err.is_err());

        // The live database is untouched.
        let rows = driver
            .exec(Statement::get("SELECT v FROM k", vec![]))
            .await?;
        assert_eq!(rows.rows, vec![vec![SqlValue::Int(5)]]);

        driver.destroy().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

#[test]
fn ephemeral_databases_export_and_import_too() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let driver = WorkerDriver::with_config(DriverConfig::ephemeral())?;
        driver
            .exec(Statement::run("CREATE TABLE k (v TEXT)", vec![]))
            .await?;
        driver
            .exec(Statement::run(
                "INSERT INTO k VALUES (?)",
                vec!["volatile".into()],
            ))
            .await?;
        let snapshot = driver.export_database().await?;
        driver.destroy().await?;

        let fresh = WorkerDriver::with_config(DriverConfig::ephemeral())?;
        fresh.import_database(snapshot).await?;
        let row = fresh
            .exec(Statement::get("SELECT v FROM k", vec![]))
            .await?;
        assert_eq!(row.rows, vec![vec![SqlValue::Text("volatile".into())]]);

        fresh.destroy().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
