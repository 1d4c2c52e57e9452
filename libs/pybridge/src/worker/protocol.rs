// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host/worker envelope.
//!
//! Every message is one frame (see [`crate::framing`]) whose payload is a
//! JSON object. Host messages are tagged by `cmd`, worker messages by `rpc`.

use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::framing;

/// Upper bound on a single envelope message. Payload bytes never travel in
/// the envelope, only region descriptors.
pub const MAX_MESSAGE_LEN: u32 = 16 * 1024 * 1024;

/// Where a payload lives for the duration of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Region {
    /// Named shared memory mapping; `len` is the payload length.
    Shm { name: String, len: usize },
    /// Framed file (4-byte BE length + payload).
    File { path: PathBuf, len: usize },
}

impl Region {
    pub fn len(&self) -> usize {
        match self {
            Region::Shm { len, .. } | Region::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HostMessage {
    Handshake {
        session_key: String,
        instance_id: String,
        model_path: String,
        confidence: f64,
        work_dir: PathBuf,
    },
    Execute {
        task_type: String,
        request_id: String,
        metadata: String,
        input: Region,
        /// For `Shm`, `len` is the capacity; for `File`, the path to write.
        output: Region,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rpc", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Done {
        len: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

pub fn send<W: Write, M: Serialize>(writer: &mut W, message: &M) -> Result<(), DispatchError> {
    let bytes = serde_json::to_vec(message)
        .map_err(|e| DispatchError::Protocol(format!("Failed to serialize message: {}", e)))?;
    framing::write_frame(writer, &bytes)?;
    Ok(())
}

pub fn recv<R: Read, M: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<M, DispatchError> {
    let bytes = framing::read_frame(reader, MAX_MESSAGE_LEN)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DispatchError::Protocol(format!("Failed to parse message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_envelope_shape() {
        let message = HostMessage::Execute {
            task_type: "SENTIMENT".into(),
            request_id: "abc".into(),
            metadata: "NONE".into(),
            input: Region::Shm {
                name: "jpb_1_abc".into(),
                len: 13,
            },
            output: Region::Shm {
                name: "jpb_1_out_abc".into(),
                len: 1024,
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "cmd": "execute",
                "task_type": "SENTIMENT",
                "request_id": "abc",
                "metadata": "NONE",
                "input": {"transport": "shm", "name": "jpb_1_abc", "len": 13},
                "output": {"transport": "shm", "name": "jpb_1_out_abc", "len": 1024},
            })
        );
    }

    #[test]
    fn worker_replies_parse_without_request_id() {
        let done: WorkerMessage = serde_json::from_str(r#"{"rpc":"done","len":5}"#).unwrap();
        assert_eq!(
            done,
            WorkerMessage::Done {
                len: 5,
                request_id: None
            }
        );
        let ready: WorkerMessage = serde_json::from_str(r#"{"rpc":"ready"}"#).unwrap();
        assert_eq!(ready, WorkerMessage::Ready);
    }

    #[test]
    fn framed_send_then_recv() {
        let mut wire = Vec::new();
        send(&mut wire, &HostMessage::Shutdown).unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 18]);

        let decoded: HostMessage = recv(&mut std::io::Cursor::new(wire)).unwrap();
        assert_eq!(decoded, HostMessage::Shutdown);
    }

    #[test]
    fn garbage_payload_is_protocol_error() {
        let mut wire = Vec::new();
        framing::write_frame(&mut wire, b"not json").unwrap();
        let result: Result<WorkerMessage, _> = recv(&mut std::io::Cursor::new(wire));
        assert!(matches!(result, Err(DispatchError::Protocol(_))));
    }
}
