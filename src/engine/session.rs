use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, ToSql};

use crate::error::RelayDbError;
use crate::results::RawResult;
use crate::statement::Statement;
use crate::types::{Method, SqlValue};

use super::open::{apply_open_pragmas, open_database};

const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 100;

/// Worker-side engine state: one SQLite connection bound to the database
/// path handed over by the init envelope. Nothing here escapes the worker
/// thread.
pub(crate) struct EngineSession {
    conn: Option<Connection>,
    database_path: String,
}

impl EngineSession {
    pub(crate) fn new() -> Self {
        Self {
            conn: None,
            database_path: String::new(),
        }
    }

    /// Open the database and mark the session ready.
    pub(crate) fn init(&mut self, database_path: &str) -> Result<(), RelayDbError> {
        if self.conn.is_some() {
            return Err(RelayDbError::ExecutionError(
                "engine already initialized".into(),
            ));
        }
        let conn = open_database(database_path)?;
        self.database_path = database_path.to_owned();
        self.conn = Some(conn);
        Ok(())
    }

    /// Drop the connection. Every later envelope fails deterministically
    /// with the not-initialized error.
    pub(crate) fn destroy(&mut self) {
        self.conn = None;
    }

    fn conn(&self) -> Result<&Connection, RelayDbError> {
        self.conn
            .as_ref()
            .ok_or_else(|| RelayDbError::ConnectionError("engine not initialized".into()))
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, RelayDbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| RelayDbError::ConnectionError("engine not initialized".into()))
    }

    pub(crate) fn exec(&mut self, statement: &Statement) -> Result<RawResult, RelayDbError> {
        run_statement(self.conn()?, statement)
    }

    /// Execute every statement inside a single transaction; rollback on the
    /// first error so partial results never escape.
    pub(crate) fn exec_transactional(
        &mut self,
        statements: &[Statement],
    ) -> Result<Vec<RawResult>, RelayDbError> {
        let tx = self.conn_mut()?.transaction()?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(run_statement(&tx, statement)?);
        }
        tx.commit()?;
        Ok(results)
    }

    /// Serialize the whole database into a contiguous byte buffer via
    /// `VACUUM INTO` a scratch file. The buffer is a detached copy.
    pub(crate) fn export(&self) -> Result<(String, Vec<u8>), RelayDbError> {
        let conn = self.conn()?;
        let scratch = scratch_dir()?;
        let target = scratch.path().join("snapshot.db");
        let escaped = target.to_string_lossy().replace('\'', "''");
        conn.execute_batch(&format!("VACUUM INTO '{escaped}'"))?;
        let data = std::fs::read(&target).map_err(|err| {
            RelayDbError::ExecutionError(format!("cannot read export snapshot: {err}"))
        })?;
        Ok((self.database_name(), data))
    }

    /// Restore from a caller-supplied buffer, replace strategy: validate the
    /// buffer in a scratch file, drop the live connection, build the
    /// replacement at a staging path and rename it over the target once the
    /// copy has succeeded, then reopen through the regular open chain with
    /// the regular pragmas.
    pub(crate) fn import(&mut self, data: &[u8]) -> Result<(), RelayDbError> {
        self.conn()?;

        let scratch = scratch_dir()?;
        let source_path = scratch.path().join("import.db");
        std::fs::write(&source_path, data).map_err(|err| {
            RelayDbError::ExecutionError(format!("cannot stage import buffer: {err}"))
        })?;

        // Validate before touching the live database.
        let source =
            Connection::open_with_flags(&source_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|err| {
                    RelayDbError::ExecutionError(format!("import buffer is not a database: {err}"))
                })?;
        source
            .query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
            .map_err(|err| {
                RelayDbError::ExecutionError(format!("import buffer failed validation: {err}"))
            })?;

        self.conn = None;
        match self.replace_from(&source) {
            Ok(conn) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(err) => {
                // The target path still holds a complete database: the
                // original if the copy or rename failed, the replacement if
                // only the reopen did. Reopen whatever is in place.
                self.conn = open_database(&self.database_path).ok();
                Err(err)
            }
        }
    }

    fn replace_from(&self, source: &Connection) -> Result<Connection, RelayDbError> {
        if self.database_path.is_empty() {
            let mut dest = Connection::open_in_memory()?;
            copy_database(source, &mut dest)?;
            apply_open_pragmas(&dest)?;
            return Ok(dest);
        }

        // Build the replacement beside the target. The live database stays
        // on disk untouched until the copy has fully succeeded, so a
        // mid-copy failure (disk full, I/O error) loses nothing.
        let staging = format!("{}.replace", self.database_path);
        remove_database_files(&staging)?;
        let copied = {
            let mut dest = Connection::open(&staging)?;
            copy_database(source, &mut dest)
        };
        if let Err(err) = copied {
            let _ = std::fs::remove_file(&staging);
            return Err(err);
        }

        // Commit point: the rename atomically swaps the replacement in.
        if let Err(err) = std::fs::rename(&staging, &self.database_path) {
            let _ = std::fs::remove_file(&staging);
            return Err(RelayDbError::ExecutionError(format!(
                "cannot move replacement database into place: {err}"
            )));
        }
        // Journal files left over from the previous database do not belong
        // to the file now at the path.
        remove_journal_files(&self.database_path)?;
        open_database(&self.database_path)
    }

    fn database_name(&self) -> String {
        Path::new(&self.database_path)
            .file_name()
            .map_or_else(|| "memory.db".to_owned(), |name| name.to_string_lossy().into_owned())
    }
}

fn scratch_dir() -> Result<tempfile::TempDir, RelayDbError> {
    tempfile::tempdir()
        .map_err(|err| RelayDbError::ExecutionError(format!("cannot create scratch dir: {err}")))
}

fn copy_database(source: &Connection, dest: &mut Connection) -> Result<(), RelayDbError> {
    let backup = rusqlite::backup::Backup::new(source, dest)?;
    backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
    Ok(())
}

fn remove_database_files(database_path: &str) -> Result<(), RelayDbError> {
    remove_file_if_present(database_path)?;
    remove_journal_files(database_path)
}

fn remove_journal_files(database_path: &str) -> Result<(), RelayDbError> {
    for suffix in ["-wal", "-shm"] {
        remove_file_if_present(&format!("{database_path}{suffix}"))?;
    }
    Ok(())
}

fn remove_file_if_present(path: &str) -> Result<(), RelayDbError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RelayDbError::ExecutionError(format!(
            "cannot remove {path}: {err}"
        ))),
    }
}

/// Prepare, bind, execute and materialize one statement according to its
/// method. Row tuples are ordered to match the captured column names.
/// Shared with the mirror driver, which runs the same materialization
/// against its in-memory connection.
pub(crate) fn run_statement(
    conn: &Connection,
    statement: &Statement,
) -> Result<RawResult, RelayDbError> {
    let mut stmt = conn.prepare(&statement.sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();

    let params: Vec<rusqlite::types::Value> = statement
        .params
        .iter()
        .cloned()
        .map(SqlValue::into_sqlite)
        .collect();
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();

    let mut rows_iter = stmt.query(&param_refs[..])?;
    match statement.method {
        Method::Run => {
            // Step to completion, discard any rows.
            while rows_iter.next()?.is_some() {}
            Ok(RawResult::empty())
        }
        Method::Get => {
            let mut rows = Vec::new();
            if let Some(row) = rows_iter.next()? {
                rows.push(extract_row(row, columns.len())?);
            }
            Ok(RawResult { columns, rows })
        }
        Method::All | Method::Values => {
            let mut rows = Vec::new();
            while let Some(row) = rows_iter.next()? {
                rows.push(extract_row(row, columns.len())?);
            }
            Ok(RawResult { columns, rows })
        }
    }
}

fn extract_row(row: &rusqlite::Row, columns: usize) -> Result<Vec<SqlValue>, RelayDbError> {
    let mut values = Vec::with_capacity(columns);
    for idx in 0..columns {
        values.push(SqlValue::from_sqlite_ref(row.get_ref(idx)?));
    }
    Ok(values)
}
