use std::path::{Path, PathBuf};

use crate::constants::{
    CHANNEL_C2S_SUFFIX, CHANNEL_S2C_SUFFIX, SIGNAL_REPLY_SUFFIX, SIGNAL_REQUEST_SUFFIX,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ServerToClient,
    ClientToServer,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::ServerToClient => CHANNEL_S2C_SUFFIX,
            Direction::ClientToServer => CHANNEL_C2S_SUFFIX,
        }
    }
}

/// The two turn-taking locks of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    /// Posted by the client once a request frame is written.
    Request,
    /// Posted by the worker before the first frame of a reply.
    Reply,
}

impl Turn {
    fn as_str(&self) -> &'static str {
        match self {
            Turn::Request => SIGNAL_REQUEST_SUFFIX,
            Turn::Reply => SIGNAL_REPLY_SUFFIX,
        }
    }
}

fn client_prefix(dir: &Path, pid: u32) -> String {
    format!("{}/filegate_cl.{pid}", dir.display())
}

pub fn connect_channel(dir: &Path, server: u32) -> PathBuf {
    dir.join(format!("filegate_sv.{server}"))
}

pub fn client_channel(dir: &Path, pid: u32, direction: Direction) -> PathBuf {
    PathBuf::from(format!("{}.{}", client_prefix(dir, pid), direction.as_str()))
}

pub fn turn_signal(dir: &Path, pid: u32, turn: Turn) -> PathBuf {
    PathBuf::from(format!("{}.{}", client_prefix(dir, pid), turn.as_str()))
}
