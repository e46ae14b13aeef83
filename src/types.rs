use serde::{Deserialize, Serialize};

/// Scalar values that cross the engine boundary, either as statement
/// parameters or as result cells.
///
/// One union is shared by both directions so helper code never branches on
/// driver types:
/// ```rust
/// use sqlite_relay::prelude::*;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value (stored by SQLite as integer 0/1)
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let SqlValue::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let SqlValue::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let SqlValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let SqlValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Convert into the engine's parameter representation. Booleans travel
    /// as integers, matching SQLite's storage classes.
    #[must_use]
    pub(crate) fn into_sqlite(self) -> rusqlite::types::Value {
        match self {
            SqlValue::Null => rusqlite::types::Value::Null,
            SqlValue::Bool(b) => rusqlite::types::Value::Integer(i64::from(b)),
            SqlValue::Int(i) => rusqlite::types::Value::Integer(i),
            SqlValue::Float(f) => rusqlite::types::Value::Real(f),
            SqlValue::Text(s) => rusqlite::types::Value::Text(s),
            SqlValue::Blob(b) => rusqlite::types::Value::Blob(b),
        }
    }

    /// Extract a cell from an engine row.
    pub(crate) fn from_sqlite_ref(value: rusqlite::types::ValueRef<'_>) -> Self {
        match value {
            rusqlite::types::ValueRef::Null => SqlValue::Null,
            rusqlite::types::ValueRef::Integer(i) => SqlValue::Int(i),
            rusqlite::types::ValueRef::Real(f) => SqlValue::Float(f),
            rusqlite::types::ValueRef::Text(bytes) => {
                SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            rusqlite::types::ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(value: &[u8]) -> Self {
        SqlValue::Blob(value.to_vec())
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// How a statement's results are materialized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Discard rows; the result carries empty columns and rows.
    Run,
    /// Keep the first row only (as a single-row sequence), or none.
    Get,
    /// Keep every row.
    All,
    /// Keep every row (alias shape used by value-oriented callers).
    Values,
}

/// The storage backend a driver binds to.
///
/// `Worker` is the core pipeline: a dedicated engine thread bound to an
/// on-disk database. `Memory` runs the same pipeline against an ephemeral
/// in-memory database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    #[default]
    Worker,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_coerces_from_int() {
        assert_eq!(SqlValue::Int(1).as_bool(), Some(&true));
        assert_eq!(SqlValue::Int(0).as_bool(), Some(&false));
        assert_eq!(SqlValue::Int(2).as_bool(), None);
    }

    #[test]
    fn option_maps_to_null() {
        let none: Option<i64> = None;
        assert!(SqlValue::from(none).is_null());
        assert_eq!(SqlValue::from(Some(5i64)), SqlValue::Int(5));
    }

    #[test]
    fn method_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Method::All).unwrap(), "\"all\"");
        assert_eq!(serde_json::to_string(&Method::Run).unwrap(), "\"run\"");
    }
}
