// Worker engine - owns one SQLite connection and services envelopes.
//
// This module is split into several sub-modules:
// - open: open-strategy chain and the pragmas applied after every open
// - session: statement execution, transactional batches, export/import
// - worker: the dedicated thread loop answering request envelopes

mod open;
mod session;
mod worker;

pub(crate) use session::run_statement;
pub(crate) use worker::{EngineHandle, spawn_engine};
