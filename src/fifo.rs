//! Named FIFO transport.
//!
//! Every FIFO is opened non-blocking; blocking reads and writes are emulated
//! with `poll` in short slices. Each slice boundary is a suspension point where
//! the [`Watch`] decides whether to keep waiting.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::cancel::CancelToken;
use crate::error::{GateError, Result};
use crate::signals::process_alive;

/// What a blocked caller keeps an eye on between poll slices.
#[derive(Clone, Copy)]
pub struct Watch<'a> {
    cancel: &'a CancelToken,
    peer: Option<u32>,
    slice: Duration,
}

impl<'a> Watch<'a> {
    pub fn new(cancel: &'a CancelToken, slice: Duration) -> Self {
        Self {
            cancel,
            peer: None,
            slice,
        }
    }

    /// Also fail with `PeerGone` once `peer` stops existing.
    pub fn with_peer(mut self, peer: Option<u32>) -> Self {
        self.peer = peer;
        self
    }

    pub fn cancel(&self) -> &'a CancelToken {
        self.cancel
    }

    pub fn slice(&self) -> Duration {
        self.slice
    }

    pub fn check(&self) -> Result<()> {
        self.cancel.check()?;
        if let Some(pid) = self.peer {
            if !process_alive(pid) {
                return Err(GateError::PeerGone(pid));
            }
        }
        Ok(())
    }
}

pub struct Fifo {
    file: File,
    path: PathBuf,
}

impl Fifo {
    /// Creates the FIFO node, replacing any stale file with the same name.
    pub fn create(path: &Path) -> Result<()> {
        let _ = fs::remove_file(path);
        loop {
            match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
                Ok(()) | Err(Errno::EEXIST) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(GateError::os("mkfifo")(errno)),
            }
        }
    }

    /// Opens an existing FIFO for both directions. Never blocks, and the
    /// channel never reports end of stream while we hold it.
    pub fn open(path: &Path) -> Result<Self> {
        let file = retry_open(|| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(OFlag::O_NONBLOCK.bits())
                .open(path)
        })
        .map_err(GateError::io("open channel"))?;
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    /// Opens a FIFO write-only. Fails with `ENXIO` when nobody reads it.
    pub fn open_writer(path: &Path) -> io::Result<Self> {
        let file = retry_open(|| {
            OpenOptions::new()
                .write(true)
                .custom_flags(OFlag::O_NONBLOCK.bits())
                .open(path)
        })?;
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits at most `slice` for the FIFO to become ready. `EINTR` counts as
    /// a timeout so the caller re-checks its watch.
    fn ready(&self, flags: PollFlags, slice: Duration) -> Result<bool> {
        let millis = slice.as_millis().min(u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(self.file.as_fd(), flags)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(n) => Ok(n > 0),
            Err(Errno::EINTR) => Ok(false),
            Err(errno) => Err(GateError::os("poll")(errno)),
        }
    }

    pub fn wait_readable(&self, slice: Duration) -> Result<bool> {
        self.ready(PollFlags::POLLIN, slice)
    }

    /// Reads whatever is available, `Ok(0)` when the FIFO is empty.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match (&self.file).read(buf) {
                Ok(0) => return Err(GateError::ChannelClosed(self.path.display().to_string())),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(GateError::io("read channel")(e)),
            }
        }
    }

    pub fn read_exact(&self, buf: &mut [u8], watch: &Watch<'_>) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.try_read(&mut buf[filled..])?;
            if n > 0 {
                filled += n;
                continue;
            }
            if !self.ready(PollFlags::POLLIN, watch.slice)? {
                watch.check()?;
            }
        }
        Ok(())
    }

    pub fn write_all(&self, data: &[u8], watch: &Watch<'_>) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            match (&self.file).write(&data[written..]) {
                Ok(0) => {
                    return Err(GateError::ChannelClosed(self.path.display().to_string()));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !self.ready(PollFlags::POLLOUT, watch.slice)? {
                        watch.check()?;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => watch.check()?,
                Err(e) => return Err(GateError::io("write channel")(e)),
            }
        }
        Ok(())
    }
}

fn retry_open(mut open: impl FnMut() -> io::Result<File>) -> io::Result<File> {
    loop {
        match open() {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
