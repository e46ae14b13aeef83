use serde::{Deserialize, Serialize};

use crate::types::{Method, SqlValue};

/// Keyword prefixes treated as writes by the queue-routing classifier.
///
/// The classifier is a hint, not a correctness boundary: statements that
/// mutate through other shapes (`REPLACE`, `WITH ... INSERT`) are not
/// detected and replicate with the next classified write or an explicit
/// flush.
const WRITE_PREFIXES: [&str; 6] = ["INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER"];

/// One SQL statement plus its ordered parameters and materialization method.
///
/// The statement text is opaque to the driver; only the crude first-keyword
/// classifier inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub method: Method,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>, method: Method) -> Self {
        Self {
            sql: sql.into(),
            params,
            method,
        }
    }

    /// Statement whose rows are discarded.
    #[must_use]
    pub fn run(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self::new(sql, params, Method::Run)
    }

    /// Statement returning at most the first row.
    #[must_use]
    pub fn get(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self::new(sql, params, Method::Get)
    }

    /// Statement returning every row.
    #[must_use]
    pub fn all(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self::new(sql, params, Method::All)
    }

    /// Statement returning every row as value tuples.
    #[must_use]
    pub fn values(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self::new(sql, params, Method::Values)
    }

    /// Heuristic write detection by case-insensitive first keyword.
    #[must_use]
    pub fn is_write(&self) -> bool {
        let Some(first) = self.sql.trim_start().split_whitespace().next() else {
            return false;
        };
        WRITE_PREFIXES
            .iter()
            .any(|prefix| first.eq_ignore_ascii_case(prefix))
    }

    /// Assemble a statement from literal parts with `?` placeholders woven
    /// between them, collecting the interpolated values as ordered
    /// parameters. A single part with no values passes through as a plain
    /// string.
    ///
    /// ```rust
    /// use sqlite_relay::prelude::*;
    ///
    /// let stmt = Statement::weave(&["SELECT ", "+", " AS s"], vec![1.into(), 2.into()]);
    /// assert_eq!(stmt.sql, "SELECT ?+? AS s");
    /// assert_eq!(stmt.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    /// ```
    #[must_use]
    pub fn weave(parts: &[&str], params: Vec<SqlValue>) -> Self {
        let mut sql = String::new();
        for (i, part) in parts.iter().enumerate() {
            sql.push_str(part);
            if i < params.len() {
                sql.push('?');
            }
        }
        // More values than gaps between parts: trailing placeholders keep
        // sql and params aligned.
        for _ in 0..params.len().saturating_sub(parts.len()) {
            sql.push('?');
        }
        Self::all(sql, params)
    }

    /// Replace the materialization method, keeping sql and params.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

/// Build `(sql, params)` from alternating literal parts and `{expr}`
/// interpolations, weaving `?` placeholders where values appear.
///
/// ```rust
/// use sqlite_relay::sql;
///
/// let (sql, params) = sql!("SELECT " {1} "+" {2} " AS s");
/// assert_eq!(sql, "SELECT ?+? AS s");
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! sql {
    (@piece $sql:ident $params:ident $part:literal) => {
        $sql.push_str($part);
    };
    (@piece $sql:ident $params:ident { $value:expr }) => {
        $sql.push('?');
        $params.push($crate::SqlValue::from($value));
    };
    ( $( $piece:tt )+ ) => {{
        let mut sql = String::new();
        let mut params: Vec<$crate::SqlValue> = Vec::new();
        $( $crate::sql!(@piece sql params $piece); )+
        (sql, params)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weave_interleaves_placeholders() {
        let stmt = Statement::weave(&["SELECT ", "+", " AS s"], vec![1.into(), 2.into()]);
        assert_eq!(stmt.sql, "SELECT ?+? AS s");
        assert_eq!(stmt.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn weave_plain_string_passthrough() {
        let stmt = Statement::weave(&["SELECT 1"], vec![]);
        assert_eq!(stmt.sql, "SELECT 1");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn sql_macro_matches_weave() {
        let (sql, params) = sql!("SELECT " {1} "+" {2} " AS s");
        assert_eq!(sql, "SELECT ?+? AS s");
        assert_eq!(params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn classifier_accepts_spec_prefixes() {
        for sql in [
            "INSERT INTO t VALUES (1)",
            "  update t set a = 1",
            "Delete from t",
            "create table t (a)",
            "DROP TABLE t",
            "alter table t add column b",
        ] {
            assert!(Statement::run(sql, vec![]).is_write(), "{sql}");
        }
    }

    #[test]
    fn classifier_rejects_reads_and_exotics() {
        for sql in [
            "SELECT * FROM t",
            "PRAGMA user_version",
            "WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x",
            "REPLACE INTO t VALUES (1)",
            "",
        ] {
            assert!(!Statement::run(sql, vec![]).is_write(), "{sql}");
        }
    }
}
