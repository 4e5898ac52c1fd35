use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fifo::{Fifo, Watch};
use crate::naming::{client_channel, turn_signal, Direction, Turn};
use crate::protocol::{decode_frame, encode_frame, Frame, Situation, SITUATION_SIZE};
use crate::constants::FRAME_SIZE;

const TOKEN: u8 = 1;

/// A binary turn-taking lock carried over a FIFO: one byte per post.
pub struct TurnSignal {
    fifo: Fifo,
}

impl TurnSignal {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            fifo: Fifo::open(path)?,
        })
    }

    pub fn post(&self, watch: &Watch<'_>) -> Result<()> {
        self.fifo.write_all(&[TOKEN], watch)
    }

    pub fn wait(&self, watch: &Watch<'_>) -> Result<()> {
        let mut token = [0u8; 1];
        self.fifo.read_exact(&mut token, watch)
    }
}

/// The four named objects private to one client.
pub struct SessionChannels {
    /// Client → server frames.
    pub requests: Fifo,
    /// Server → client situations and frames.
    pub replies: Fifo,
    pub request_ready: TurnSignal,
    pub reply_ready: TurnSignal,
}

impl SessionChannels {
    pub fn paths(dir: &Path, pid: u32) -> [PathBuf; 4] {
        [
            client_channel(dir, pid, Direction::ClientToServer),
            client_channel(dir, pid, Direction::ServerToClient),
            turn_signal(dir, pid, Turn::Request),
            turn_signal(dir, pid, Turn::Reply),
        ]
    }

    /// Client side: create the FIFO nodes, then open them.
    pub fn create(dir: &Path, pid: u32) -> Result<Self> {
        for path in Self::paths(dir, pid) {
            Fifo::create(&path)?;
        }
        Self::open(dir, pid)
    }

    /// Dispatcher side: open what the client created.
    pub fn open(dir: &Path, pid: u32) -> Result<Self> {
        let [requests, replies, request_ready, reply_ready] = Self::paths(dir, pid);
        Ok(Self {
            requests: Fifo::open(&requests)?,
            replies: Fifo::open(&replies)?,
            request_ready: TurnSignal::open(&request_ready)?,
            reply_ready: TurnSignal::open(&reply_ready)?,
        })
    }

    /// Removes the FIFO nodes. Open handles stay usable.
    pub fn remove(dir: &Path, pid: u32) {
        for path in Self::paths(dir, pid) {
            if let Err(err) = fs::remove_file(&path) {
                log::debug!("could not remove {}: {err}", path.display());
            }
        }
    }

    pub fn send_to_client(&self, frame: &Frame, watch: &Watch<'_>) -> Result<()> {
        write_frame(&self.replies, frame, watch)
    }

    pub fn receive_from_client(&self, watch: &Watch<'_>) -> Result<Frame> {
        read_frame(&self.requests, watch)
    }

    pub fn send_to_server(&self, frame: &Frame, watch: &Watch<'_>) -> Result<()> {
        write_frame(&self.requests, frame, watch)
    }

    pub fn receive_from_server(&self, watch: &Watch<'_>) -> Result<Frame> {
        read_frame(&self.replies, watch)
    }

    pub fn send_situation(&self, situation: Situation, watch: &Watch<'_>) -> Result<()> {
        write_situation(&self.replies, situation, watch)
    }

    pub fn receive_situation(&self, watch: &Watch<'_>) -> Result<Situation> {
        let mut raw = [0u8; SITUATION_SIZE];
        self.replies.read_exact(&mut raw, watch)?;
        Situation::decode(raw)
    }
}

pub fn write_situation(fifo: &Fifo, situation: Situation, watch: &Watch<'_>) -> Result<()> {
    fifo.write_all(&situation.encode(), watch)
}

fn write_frame(fifo: &Fifo, frame: &Frame, watch: &Watch<'_>) -> Result<()> {
    fifo.write_all(&encode_frame(frame)?, watch)
}

fn read_frame(fifo: &Fifo, watch: &Watch<'_>) -> Result<Frame> {
    let mut buf = vec![0u8; FRAME_SIZE];
    fifo.read_exact(&mut buf, watch)?;
    decode_frame(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use std::time::Duration;

    #[test]
    fn both_sides_share_the_same_channels() {
        let dir = tempfile::tempdir().unwrap();
        let client = SessionChannels::create(dir.path(), 77).unwrap();
        let server = SessionChannels::open(dir.path(), 77).unwrap();
        let cancel = CancelToken::new();
        let watch = Watch::new(&cancel, Duration::from_millis(10));

        client.send_to_server(&Frame::ok(b"list".to_vec()), &watch).unwrap();
        client.request_ready.post(&watch).unwrap();
        server.request_ready.wait(&watch).unwrap();
        assert_eq!(server.receive_from_client(&watch).unwrap().text(), "list");

        server.send_situation(Situation::Admitted(2), &watch).unwrap();
        assert_eq!(
            client.receive_situation(&watch).unwrap(),
            Situation::Admitted(2)
        );

        SessionChannels::remove(dir.path(), 77);
        for path in SessionChannels::paths(dir.path(), 77) {
            assert!(!path.exists());
        }
    }
}
