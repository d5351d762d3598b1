//! Executor protocol: one `u32` big-endian length prefix, then a JSON body.
//!
//! Control calls are one request and one response per frame. `OpenStream` is
//! the exception: once the upstream answers `Ack`, the same connection stops
//! carrying JSON and carries split frames from upstream to the reader.
//!
//! Reads here go straight to the socket with `read_exact` (no buffering) so
//! nothing past the handshake is consumed before a `SplitReader` takes over.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quarry_core::prelude::{Location, TaskId};
use quarry_plan::Instruction;
use quarry_split::{Split, SplitReader, SplitWriter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::executor::StatusReport;

/// Upper bound on one JSON frame. Result payloads travel inline.
pub const MAX_MESSAGE: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SendInstruction { instruction: Instruction },
    SetupWriters,
    SetupReaders,
    Run,
    Abort { task_id: TaskId },
    Status,
    FetchResults { task_id: TaskId },
    /// Sent by a downstream reader to the upstream that will write to it.
    OpenStream { task_id: TaskId, reader: Location },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::SendInstruction { .. } => "send_instruction",
            Request::SetupWriters => "setup_writers",
            Request::SetupReaders => "setup_readers",
            Request::Run => "run",
            Request::Abort { .. } => "abort",
            Request::Status => "status",
            Request::FetchResults { .. } => "fetch_results",
            Request::OpenStream { .. } => "open_stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Status(StatusReport),
    /// base64 of a complete split stream (metadata, batches, end).
    Results { stream: String },
    Error { message: String },
}

impl Response {
    /// `Ok(())` for `Ack`; remote errors and anything else become `RpcError`.
    pub fn into_ack(self) -> Result<(), RpcError> {
        match self {
            Response::Ack => Ok(()),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Unexpected(format!("{other:?}"))),
        }
    }

    pub fn into_status(self) -> Result<StatusReport, RpcError> {
        match self {
            Response::Status(report) => Ok(report),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Unexpected(format!("{other:?}"))),
        }
    }

    pub fn into_results(self) -> Result<Split, RpcError> {
        match self {
            Response::Results { stream } => decode_results(&stream),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Unexpected(format!("{other:?}"))),
        }
    }
}

pub fn write_message<W: Write, T: Serialize>(w: &mut W, msg: &T) -> Result<(), RpcError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_MESSAGE {
        return Err(RpcError::FrameTooLarge(body.len()));
    }
    w.write_all(&(body.len() as u32).to_be_bytes())?;
    w.write_all(&body)?;
    w.flush()?;
    Ok(())
}

/// Read one frame. A peer that hangs up before the length prefix is `Closed`.
pub fn read_message<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T, RpcError> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(RpcError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE {
        return Err(RpcError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

/// One request/response round trip on a fresh connection.
pub fn call(location: &Location, request: &Request) -> Result<Response, RpcError> {
    let mut stream = TcpStream::connect(location.addr())?;
    stream.set_nodelay(true)?;
    write_message(&mut stream, request)?;
    read_message(&mut stream)
}

/// Ask the upstream at `upstream` to attach a new connection as its output
/// toward `reader`. On success the returned stream carries split frames.
pub fn open_stream(upstream: &Location, task_id: TaskId, reader: &Location) -> Result<TcpStream, RpcError> {
    let mut stream = TcpStream::connect(upstream.addr())?;
    stream.set_nodelay(true)?;
    write_message(
        &mut stream,
        &Request::OpenStream {
            task_id,
            reader: reader.clone(),
        },
    )?;
    read_message::<_, Response>(&mut stream)?.into_ack()?;
    Ok(stream)
}

/// Serialize a result split as a framed stream and base64 it.
pub fn encode_results(split: &Split, batch_rows: usize) -> Result<String, RpcError> {
    let mut writer = SplitWriter::new(Vec::new(), batch_rows);
    let payload = |e: quarry_split::SplitError| RpcError::Payload(e.to_string());
    writer.write_metadata(&split.metadata).map_err(payload)?;
    writer.write_split(split).map_err(payload)?;
    let bytes = writer.finish().map_err(payload)?;
    Ok(BASE64.encode(bytes))
}

pub fn decode_results(stream: &str) -> Result<Split, RpcError> {
    let bytes = BASE64
        .decode(stream.as_bytes())
        .map_err(|e| RpcError::Payload(e.to_string()))?;
    let mut reader = SplitReader::new(bytes.as_slice());
    reader
        .read_all()
        .map_err(|e| RpcError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorState;
    use quarry_core::prelude::{DataType, Field, Metadata, Value};
    use std::io::Cursor;

    #[test]
    fn requests_use_snake_case_tags() {
        let json = serde_json::to_string(&Request::Abort {
            task_id: TaskId::new(4),
        })
        .unwrap();
        assert_eq!(json, r#"{"op":"abort","task_id":4}"#);
        let back: Request = serde_json::from_str(r#"{"op":"setup_readers"}"#).unwrap();
        assert_eq!(back, Request::SetupReaders);
    }

    #[test]
    fn frames_round_trip_and_clean_close_is_reported() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Request::Run).unwrap();
        write_message(
            &mut buf,
            &Response::Status(StatusReport {
                task_id: Some(TaskId::new(9)),
                state: ExecutorState::Running,
                error: None,
            }),
        )
        .unwrap();
        assert_eq!(&buf[..4], &(r#"{"op":"run"}"#.len() as u32).to_be_bytes());

        let mut cur = Cursor::new(buf);
        let req: Request = read_message(&mut cur).unwrap();
        assert_eq!(req, Request::Run);
        let report = read_message::<_, Response>(&mut cur)
            .unwrap()
            .into_status()
            .unwrap();
        assert_eq!(report.state, ExecutorState::Running);
        assert!(matches!(
            read_message::<_, Request>(&mut cur),
            Err(RpcError::Closed)
        ));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut cur = Cursor::new(u32::MAX.to_be_bytes().to_vec());
        assert!(matches!(
            read_message::<_, Request>(&mut cur),
            Err(RpcError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn error_responses_surface_as_remote() {
        let err = Response::Error {
            message: "boom".into(),
        }
        .into_ack()
        .unwrap_err();
        assert!(matches!(err, RpcError::Remote(m) if m == "boom"));
        assert!(matches!(
            Response::Ack.into_results(),
            Err(RpcError::Unexpected(_))
        ));
    }

    #[test]
    fn result_payload_survives_encoding() {
        let md = Metadata::new(vec![Field::new("x", DataType::Int64)]);
        let mut split = Split::new(md);
        for i in 0..5 {
            split.append_row(vec![Value::I64(i)]).unwrap();
        }
        let text = encode_results(&split, 2).unwrap();
        let back = decode_results(&text).unwrap();
        assert_eq!(back.num_rows(), 5);
        assert_eq!(back.row(4), vec![Value::I64(4)]);
    }
}
