use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::RelayDbError;

// Pragmas applied after every successful open, including reopen after
// import. WAL keeps readers concurrent with the single writer.
const OPEN_PRAGMAS: &str = "\
    PRAGMA journal_mode = WAL;\n\
    PRAGMA synchronous = NORMAL;\n\
    PRAGMA cache_size = 5000;\n\
    PRAGMA foreign_keys = ON;";

/// Open the database at `database_path`, falling through a prioritized
/// strategy chain until one succeeds. An empty path opens an ephemeral
/// in-memory database.
pub(crate) fn open_database(database_path: &str) -> Result<Connection, RelayDbError> {
    if database_path.is_empty() {
        let conn = Connection::open_in_memory()?;
        apply_open_pragmas(&conn)?;
        return Ok(conn);
    }

    let mut last_error: Option<rusqlite::Error> = None;
    for (strategy, open) in OPEN_STRATEGIES {
        match open(database_path) {
            Ok(conn) => {
                apply_open_pragmas(&conn)?;
                return Ok(conn);
            }
            Err(err) => {
                tracing::debug!(strategy, path = database_path, error = %err, "open strategy failed");
                last_error = Some(err);
            }
        }
    }

    Err(last_error.map_or_else(
        || RelayDbError::ConnectionError(format!("unable to open database at {database_path}")),
        RelayDbError::SqliteError,
    ))
}

type OpenStrategy = fn(&str) -> Result<Connection, rusqlite::Error>;

// Attempted in order; each failure falls through to the next.
const OPEN_STRATEGIES: [(&str, OpenStrategy); 3] = [
    ("create-dirs", open_with_parent_dirs),
    ("serialized", open_serialized),
    ("plain", open_plain),
];

/// Preferred strategy: ensure the parent directory exists, then open with
/// the default flags (the worker is the connection's only user).
fn open_with_parent_dirs(path: &str) -> Result<Connection, rusqlite::Error> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                Some(format!("cannot create parent directory: {err}")),
            )
        })?;
    }
    Connection::open(path)
}

/// Last resort: default flags with no directory preparation.
fn open_plain(path: &str) -> Result<Connection, rusqlite::Error> {
    Connection::open(path)
}

/// Fallback: fully serialized threading mode.
fn open_serialized(path: &str) -> Result<Connection, rusqlite::Error> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )
}

pub(crate) fn apply_open_pragmas(conn: &Connection) -> Result<(), RelayDbError> {
    conn.execute_batch(OPEN_PRAGMAS)?;
    Ok(())
}
