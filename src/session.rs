//! Per-client session worker.
//!
//! One thread per admitted client. The worker waits for "request ready",
//! reads one request frame, answers it with one or more frames and goes back
//! to waiting. It ends on `quit`, on `killServer`, or when cancelled.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::command::{help_text, Command};
use crate::constants::{PAYLOAD_LEN, QUIT_PAYLOAD};
use crate::error::Result;
use crate::events::SessionChannels;
use crate::fifo::Watch;
use crate::ops::Workspace;
use crate::protocol::{ConnectRequest, Frame};
use crate::signals;

/// What a worker tells the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The worker is done; its slot can be reused.
    Exited { session: u32 },
    /// The client asked for a full server shutdown.
    KillServer { session: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    KillServer,
    /// Cancelled, or the transport failed.
    Aborted,
}

pub struct SessionContext {
    pub session: u32,
    pub name: String,
    pub request: ConnectRequest,
    pub channels: SessionChannels,
    pub workspace: Arc<Workspace>,
    pub cancel: CancelToken,
    pub events: Sender<SessionEvent>,
    pub poll_timeout: Duration,
    pub probe_client: bool,
    pub signal_client: bool,
}

/// Sends `Exited` however the worker ends, unwinding included.
struct ExitNotice {
    session: u32,
    events: Sender<SessionEvent>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.events.send(SessionEvent::Exited {
            session: self.session,
        });
    }
}

pub fn spawn(ctx: SessionContext) -> io::Result<JoinHandle<SessionEnd>> {
    thread::Builder::new()
        .name(format!("filegate-session-{}", ctx.session))
        .spawn(move || run(ctx))
}

fn run(ctx: SessionContext) -> SessionEnd {
    let _notice = ExitNotice {
        session: ctx.session,
        events: ctx.events.clone(),
    };

    let end = match serve(&ctx) {
        Ok(end) => end,
        Err(err) if err.is_cancelled() => {
            log::info!("{} cancelled", ctx.name);
            SessionEnd::Aborted
        }
        Err(err) => {
            log::warn!("{} aborted: {err}", ctx.name);
            SessionEnd::Aborted
        }
    };
    if end == SessionEnd::Aborted && ctx.signal_client {
        signals::terminate(ctx.request.pid);
    }
    end
}

enum Flow {
    Next,
    Stop(SessionEnd),
}

fn serve(ctx: &SessionContext) -> Result<SessionEnd> {
    let peer = ctx.probe_client.then_some(ctx.request.pid);
    let watch = Watch::new(&ctx.cancel, ctx.poll_timeout).with_peer(peer);

    loop {
        ctx.channels.request_ready.wait(&watch)?;
        let request = ctx.channels.receive_from_client(&watch)?;
        let line = request.text().into_owned();
        log::debug!("{}: {}", ctx.name, line.trim_end());

        let reply = Reply::new(&ctx.channels, watch);
        let flow = match Command::parse(&line) {
            Ok(command) => execute(ctx, command, reply)?,
            Err(err) => {
                reply.finish(&err.to_string())?;
                Flow::Next
            }
        };
        if let Flow::Stop(end) = flow {
            return Ok(end);
        }
    }
}

fn execute(ctx: &SessionContext, command: Command, mut reply: Reply<'_>) -> Result<Flow> {
    let ws = &ctx.workspace;
    let client_dir = &ctx.request.client_dir;
    let cancel = &ctx.cancel;

    let text = match command {
        Command::Help(topic) => help_text(topic.as_deref()),
        Command::List => ws.list()?,
        Command::ReadFile {
            file,
            line: Some(line),
        } => ws.read_line(&file, line, cancel)?,
        Command::ReadFile { file, line: None } => {
            ws.read_all(&file, cancel, |chunk| reply.chunk(chunk))?
        }
        Command::WriteText { file, line, text } => ws.write_text(&file, line, &text, cancel)?,
        Command::Upload(file) => ws.upload(&file, client_dir, cancel)?,
        Command::Download(file) => ws.download(&file, client_dir, cancel)?,
        Command::ArchServer(name) => ws.archive(&name, client_dir, cancel)?,
        Command::Quit => {
            reply.finish(QUIT_PAYLOAD)?;
            log::info!("{} disconnected", ctx.name);
            return Ok(Flow::Stop(SessionEnd::Quit));
        }
        Command::KillServer => {
            log::info!("{} requested server shutdown", ctx.name);
            let _ = ctx.events.send(SessionEvent::KillServer {
                session: ctx.session,
            });
            reply.announce()?;
            return Ok(Flow::Stop(SessionEnd::KillServer));
        }
    };
    reply.finish(&text)?;
    Ok(Flow::Next)
}

/// Writes one answer. "Reply ready" is posted before the first frame, so
/// the client drains the pipe while the worker is still writing.
pub struct Reply<'a> {
    channels: &'a SessionChannels,
    watch: Watch<'a>,
    announced: bool,
}

impl<'a> Reply<'a> {
    pub fn new(channels: &'a SessionChannels, watch: Watch<'a>) -> Self {
        Reply {
            channels,
            watch,
            announced: false,
        }
    }

    pub fn announce(&mut self) -> Result<()> {
        if !self.announced {
            self.channels.reply_ready.post(&self.watch)?;
            self.announced = true;
        }
        Ok(())
    }

    /// Sends `data` as CONTINUE frames.
    pub fn chunk(&mut self, data: &[u8]) -> Result<()> {
        self.announce()?;
        for part in data.chunks(PAYLOAD_LEN) {
            self.channels
                .send_to_client(&Frame::continued(part), &self.watch)?;
        }
        Ok(())
    }

    /// Sends `text` and closes the answer; the last frame is OK.
    pub fn finish(mut self, text: &str) -> Result<()> {
        self.announce()?;
        let bytes = text.as_bytes();
        let mut parts: Vec<&[u8]> = bytes.chunks(PAYLOAD_LEN).collect();
        let last = parts.pop().unwrap_or_default();
        for part in parts {
            self.channels
                .send_to_client(&Frame::continued(part), &self.watch)?;
        }
        self.channels.send_to_client(&Frame::ok(last), &self.watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_is_split_and_closed_with_ok() {
        let dir = tempfile::tempdir().unwrap();
        let client = SessionChannels::create(dir.path(), 5).unwrap();
        let worker = SessionChannels::open(dir.path(), 5).unwrap();
        let cancel = CancelToken::new();
        let watch = Watch::new(&cancel, Duration::from_millis(10));

        let text = "y".repeat(PAYLOAD_LEN + 100);
        let sender = thread::scope(|scope| {
            let handle = scope.spawn(|| Reply::new(&worker, watch).finish(&text));
            client.reply_ready.wait(&watch).unwrap();
            let first = client.receive_from_server(&watch).unwrap();
            let second = client.receive_from_server(&watch).unwrap();
            assert!(!first.is_last());
            assert_eq!(first.payload.len(), PAYLOAD_LEN);
            assert!(second.is_last());
            assert_eq!(second.payload.len(), 100);
            handle.join().unwrap()
        });
        sender.unwrap();
    }

    #[test]
    fn empty_text_is_a_single_empty_ok_frame() {
        let dir = tempfile::tempdir().unwrap();
        let client = SessionChannels::create(dir.path(), 6).unwrap();
        let worker = SessionChannels::open(dir.path(), 6).unwrap();
        let cancel = CancelToken::new();
        let watch = Watch::new(&cancel, Duration::from_millis(10));

        Reply::new(&worker, watch).finish("").unwrap();
        client.reply_ready.wait(&watch).unwrap();
        let frame = client.receive_from_server(&watch).unwrap();
        assert!(frame.is_last());
        assert!(frame.payload.is_empty());
    }
}
