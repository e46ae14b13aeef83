// Wire protocol - the envelope shape exchanged with the engine worker.
//
// Requests carry an id and a typed operation; responses echo the id with
// either a payload or an error string. The envelope is sufficient for full
// correlation; no out-of-band state crosses the boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::results::RawResult;
use crate::statement::Statement;

pub const INIT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const IMPORT_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const EXPORT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const EXEC_BATCH_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const EXEC_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DESTROY_TIMEOUT: Duration = Duration::from_millis(2_000);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Operation budget by kind name; unknown kinds get the default budget.
#[must_use]
pub fn timeout_for_kind(kind: &str) -> Duration {
    match kind {
        "init" => INIT_TIMEOUT,
        "import" => IMPORT_TIMEOUT,
        "export" => EXPORT_TIMEOUT,
        "execBatch" => EXEC_BATCH_TIMEOUT,
        "transaction" => TRANSACTION_TIMEOUT,
        "exec" => EXEC_TIMEOUT,
        "destroy" => DESTROY_TIMEOUT,
        _ => DEFAULT_OPERATION_TIMEOUT,
    }
}

/// Request payload, tagged by operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    #[serde(rename_all = "camelCase")]
    Init { database_path: String },
    Exec { statement: Statement },
    ExecBatch { statements: Vec<Statement> },
    Transaction { statements: Vec<Statement> },
    Export,
    Import { data: Vec<u8> },
    Destroy,
}

impl Operation {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Init { .. } => "init",
            Operation::Exec { .. } => "exec",
            Operation::ExecBatch { .. } => "execBatch",
            Operation::Transaction { .. } => "transaction",
            Operation::Export => "export",
            Operation::Import { .. } => "import",
            Operation::Destroy => "destroy",
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        timeout_for_kind(self.kind())
    }
}

/// Request envelope: a monotonic string id plus the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub op: Operation,
}

/// Successful response payload, shaped by the request's operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// init / import / destroy acknowledge with no data.
    Ack,
    /// exec returns one raw result.
    Result(RawResult),
    /// execBatch / transaction return one raw result per statement.
    Results(Vec<RawResult>),
    /// export returns the database file name and its serialized bytes.
    Snapshot { name: String, data: Vec<u8> },
}

/// Response envelope, one-to-one with a request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub outcome: Result<ResponsePayload, String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn success(id: String, payload: ResponsePayload) -> Self {
        Self {
            id,
            outcome: Ok(payload),
        }
    }

    #[must_use]
    pub fn failure(id: String, error: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Err(error.into()),
        }
    }
}
