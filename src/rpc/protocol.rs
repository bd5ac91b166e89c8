use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::RpcError;
use crate::flut::PerfSnapshot;

use super::wire::WireTask;

/// Raw RGBA task images ride inside the JSON payload, so the cap is sized
/// for screen-sized canvases rather than chat-sized control messages.
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Control-plane message, one JSON record per line. The controller is the
/// only requester; a worker answers each request in order on the same
/// connection, so no call ids are needed.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum WireMessage {
    Flut(Box<WireTask>),
    Status(StatusRequest),
    Stop,
    Die,
    Ack(AckMessage),
    StatusReply(WorkerStatus),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub(super) struct StatusRequest {
    pub(super) metrics: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub(super) struct AckMessage {
    pub(super) ok: bool,
}

/// Worker-side answer to a status poll.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct WorkerStatus {
    pub ok: bool,
    pub fluting: bool,
    pub perf: PerfSnapshot,
}

pub(super) async fn read_message(
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<WireMessage, RpcError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let bytes = reader
        .read_until(b'\n', &mut buffer)
        .await
        .map_err(|err| RpcError::Io {
            context: "message read",
            source: err,
        })?;
    if bytes == 0 {
        return Err(RpcError::ConnectionClosed);
    }
    if buffer.len() > MAX_MESSAGE_BYTES {
        return Err(RpcError::MessageTooLarge {
            max_bytes: MAX_MESSAGE_BYTES,
        });
    }
    if buffer.ends_with(b"\n") {
        buffer.pop();
        if buffer.ends_with(b"\r") {
            buffer.pop();
        }
    }
    let line = std::str::from_utf8(&buffer).map_err(|err| RpcError::InvalidUtf8 { source: err })?;
    serde_json::from_str::<WireMessage>(line).map_err(|err| RpcError::Deserialize {
        context: "message decode",
        source: err,
    })
}

pub(super) async fn send_message(
    writer: &mut OwnedWriteHalf,
    message: &WireMessage,
) -> Result<(), RpcError> {
    let mut payload = serde_json::to_string(message).map_err(|err| RpcError::Serialize {
        context: "message encode",
        source: err,
    })?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|err| RpcError::Io {
            context: "message send",
            source: err,
        })
}
