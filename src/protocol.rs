//! Binary protocol for the connect channel and the per-session channels.
//!
//! Fixed-size little-endian records, no serde dependency. Every record has a
//! fixed length so a reader always knows how many bytes to wait for.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::constants::*;
use crate::error::{GateError, Result};

// ─── Connect channel (client → dispatcher) ───────────────────────────────────

/// How a client reacts to a full server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Wait in the queue until a slot frees.
    Blocking,
    /// Give up at once when no slot is free.
    TryOnce,
}

impl ConnectMode {
    fn to_wire(self) -> u8 {
        match self {
            ConnectMode::Blocking => 0,
            ConnectMode::TryOnce => 1,
        }
    }

    fn from_wire(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(ConnectMode::Blocking),
            1 => Ok(ConnectMode::TryOnce),
            _ => Err(GateError::Corrupted("unknown connect mode")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub pid: u32,
    pub mode: ConnectMode,
    /// Client working directory, the other end of upload/download.
    pub client_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Connect(ConnectRequest),
    /// The client gives up: leave the queue or stop the session.
    Detach { pid: u32 },
}

impl ControlMessage {
    pub fn pid(&self) -> u32 {
        match self {
            ControlMessage::Connect(req) => req.pid,
            ControlMessage::Detach { pid } => *pid,
        }
    }
}

/// Encode a connect-channel message.
///
/// Layout:
/// ```text
/// [0..4]     magic: u32 LE
/// [4..5]     version: u8
/// [5..6]     msg_type: u8 (1 = connect, 2 = detach)
/// [6..10]    pid: u32 LE
/// [10..11]   mode: u8 (0 = blocking, 1 = try once)
/// [11..13]   path_len: u16 LE
/// [13..16]   reserved
/// [16..1040] path bytes, zero padded
/// ```
pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; CONNECT_FRAME_SIZE];
    buf[0..4].copy_from_slice(&CONNECT_MAGIC.to_le_bytes());
    buf[4] = CONNECT_VERSION;
    buf[6..10].copy_from_slice(&msg.pid().to_le_bytes());

    match msg {
        ControlMessage::Connect(req) => {
            let path = req.client_dir.as_os_str().as_bytes();
            if path.len() > PATH_LEN {
                return Err(GateError::MessageTooLarge);
            }
            buf[5] = MSG_TYPE_CONNECT;
            buf[10] = req.mode.to_wire();
            buf[11..13].copy_from_slice(&(path.len() as u16).to_le_bytes());
            buf[CONNECT_HEADER_SIZE..CONNECT_HEADER_SIZE + path.len()].copy_from_slice(path);
        }
        ControlMessage::Detach { .. } => buf[5] = MSG_TYPE_DETACH,
    }
    Ok(buf)
}

pub fn decode_control(data: &[u8]) -> Result<ControlMessage> {
    if data.len() < CONNECT_FRAME_SIZE {
        return Err(GateError::Corrupted("short connect message"));
    }

    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != CONNECT_MAGIC {
        return Err(GateError::Corrupted("bad magic"));
    }
    if data[4] != CONNECT_VERSION {
        return Err(GateError::Corrupted("unsupported version"));
    }

    let pid = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
    // 0 and anything past i32::MAX name process groups, not one client.
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(GateError::Corrupted("bad pid"));
    }
    match data[5] {
        MSG_TYPE_CONNECT => {
            let mode = ConnectMode::from_wire(data[10])?;
            let path_len = u16::from_le_bytes([data[11], data[12]]) as usize;
            if path_len > PATH_LEN {
                return Err(GateError::Corrupted("path length out of range"));
            }
            let path = &data[CONNECT_HEADER_SIZE..CONNECT_HEADER_SIZE + path_len];
            Ok(ControlMessage::Connect(ConnectRequest {
                pid,
                mode,
                client_dir: PathBuf::from(OsStr::from_bytes(path)),
            }))
        }
        MSG_TYPE_DETACH => Ok(ControlMessage::Detach { pid }),
        _ => Err(GateError::Corrupted("unknown message type")),
    }
}

// ─── Situation (dispatcher → client) ─────────────────────────────────────────

/// Admission answer written on the client's S2C channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Situation {
    /// Admitted; carries the session identity.
    Admitted(u32),
    /// No slot right now.
    Full,
    /// Never going to be admitted.
    Rejected,
}

pub const SITUATION_SIZE: usize = 4;

impl Situation {
    pub fn encode(self) -> [u8; SITUATION_SIZE] {
        let raw = match self {
            Situation::Admitted(id) => id as i32,
            Situation::Full => SITUATION_FULL,
            Situation::Rejected => SITUATION_REJECTED,
        };
        raw.to_le_bytes()
    }

    pub fn decode(data: [u8; SITUATION_SIZE]) -> Result<Self> {
        match i32::from_le_bytes(data) {
            SITUATION_FULL => Ok(Situation::Full),
            SITUATION_REJECTED => Ok(Situation::Rejected),
            id if id > 0 => Ok(Situation::Admitted(id as u32)),
            _ => Err(GateError::Corrupted("bad situation")),
        }
    }
}

// ─── Frames (both directions of a session) ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// More frames of the same answer follow.
    Continue,
    /// Last frame of the answer.
    Ok,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub status: FrameStatus,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn ok(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: FrameStatus::Ok,
            payload: payload.into(),
        }
    }

    pub fn continued(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: FrameStatus::Continue,
            payload: payload.into(),
        }
    }

    pub fn is_last(&self) -> bool {
        self.status == FrameStatus::Ok
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Encode a frame.
///
/// Layout:
/// ```text
/// [0..4]     status: i32 LE (0 = continue, 1 = ok)
/// [4..8]     payload_len: u32 LE
/// [8..5128]  payload, zero padded
/// ```
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    if frame.payload.len() > PAYLOAD_LEN {
        return Err(GateError::MessageTooLarge);
    }
    let status = match frame.status {
        FrameStatus::Continue => STATUS_CONTINUE,
        FrameStatus::Ok => STATUS_OK,
    };
    let mut buf = vec![0u8; FRAME_SIZE];
    buf[0..4].copy_from_slice(&status.to_le_bytes());
    buf[4..8].copy_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + frame.payload.len()]
        .copy_from_slice(&frame.payload);
    Ok(buf)
}

pub fn decode_frame(data: &[u8]) -> Result<Frame> {
    if data.len() < FRAME_SIZE {
        return Err(GateError::Corrupted("short frame"));
    }
    let status = match i32::from_le_bytes([data[0], data[1], data[2], data[3]]) {
        STATUS_CONTINUE => FrameStatus::Continue,
        STATUS_OK => FrameStatus::Ok,
        _ => return Err(GateError::Corrupted("bad frame status")),
    };
    let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    if len > PAYLOAD_LEN {
        return Err(GateError::Corrupted("frame length out of range"));
    }
    Ok(Frame {
        status,
        payload: data[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec(),
    })
}
