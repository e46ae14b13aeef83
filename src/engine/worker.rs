use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::RelayDbError;
use crate::protocol::{Operation, RequestEnvelope, ResponseEnvelope, ResponsePayload};

use super::session::EngineSession;

static ENGINE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Driver-side handle to the engine worker thread. Dropping the handle
/// closes the request channel and lets the thread run down.
pub(crate) struct EngineHandle {
    sender: Sender<RequestEnvelope>,
}

impl EngineHandle {
    /// Post an envelope to the worker. Envelopes are serviced strictly in
    /// post order.
    pub(crate) fn send(&self, envelope: RequestEnvelope) -> Result<(), RelayDbError> {
        self.sender
            .send(envelope)
            .map_err(|_| RelayDbError::ConnectionError("Worker not available".into()))
    }
}

/// Spawn the engine worker thread. Responses flow back over `responses`
/// for the driver's router to correlate by id.
pub(crate) fn spawn_engine(
    responses: UnboundedSender<ResponseEnvelope>,
) -> Result<EngineHandle, RelayDbError> {
    let (sender, receiver) = mpsc::channel::<RequestEnvelope>();
    let seq = ENGINE_SEQ.fetch_add(1, Ordering::Relaxed);
    thread::Builder::new()
        .name(format!("sqlite-relay-engine-{seq}"))
        .spawn(move || run_engine(&receiver, &responses))
        .map_err(|err| {
            RelayDbError::ConnectionError(format!("failed to spawn engine worker thread: {err}"))
        })?;
    Ok(EngineHandle { sender })
}

fn run_engine(receiver: &Receiver<RequestEnvelope>, responses: &UnboundedSender<ResponseEnvelope>) {
    let mut session = EngineSession::new();
    while let Ok(RequestEnvelope { id, op }) = receiver.recv() {
        let shutdown = matches!(op, Operation::Destroy);
        let response = match service(&mut session, op) {
            Ok(payload) => ResponseEnvelope::success(id, payload),
            Err(err) => ResponseEnvelope::failure(id, err.to_string()),
        };
        let _ = responses.send(response);
        if shutdown {
            break;
        }
    }
}

// One envelope at a time, to completion; every branch closes the envelope.
fn service(
    session: &mut EngineSession,
    op: Operation,
) -> Result<ResponsePayload, RelayDbError> {
    match op {
        Operation::Init { database_path } => {
            session.init(&database_path)?;
            Ok(ResponsePayload::Ack)
        }
        Operation::Exec { statement } => Ok(ResponsePayload::Result(session.exec(&statement)?)),
        Operation::ExecBatch { statements } | Operation::Transaction { statements } => Ok(
            ResponsePayload::Results(session.exec_transactional(&statements)?),
        ),
        Operation::Export => {
            let (name, data) = session.export()?;
            Ok(ResponsePayload::Snapshot { name, data })
        }
        Operation::Import { data } => {
            session.import(&data)?;
            Ok(ResponsePayload::Ack)
        }
        Operation::Destroy => {
            session.destroy();
            Ok(ResponsePayload::Ack)
        }
    }
}
