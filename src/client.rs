use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::command::Command;
use crate::constants::{DEFAULT_CHANNEL_DIR, DEFAULT_POLL_SLICE, PAYLOAD_LEN, QUIT_PAYLOAD};
use crate::error::{GateError, Result};
use crate::events::SessionChannels;
use crate::fifo::{Fifo, Watch};
use crate::naming::connect_channel;
use crate::ops::ARCHIVE_EXTENSION;
use crate::protocol::{encode_control, ConnectMode, ConnectRequest, ControlMessage, Frame, Situation};

/// Local answer for a line that does not fit in one request frame.
pub const COMMAND_TOO_LONG: &str = "Command is too long.";

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub channel_dir: PathBuf,
    /// Defaults to the process id.
    pub identity: Option<u32>,
    pub mode: ConnectMode,
    /// Defaults to the current directory.
    pub working_dir: Option<PathBuf>,
    pub poll_timeout: Duration,
    /// Treat the server as gone once its process disappears.
    pub probe_server: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            channel_dir: PathBuf::from(DEFAULT_CHANNEL_DIR),
            identity: None,
            mode: ConnectMode::Blocking,
            working_dir: None,
            poll_timeout: DEFAULT_POLL_SLICE,
            probe_server: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    WaitingInQueue,
    Connected,
    IssuingCommand,
    AwaitingReply,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Ordinary answer; the session goes on.
    Done,
    /// The server confirmed `quit`.
    Quit,
    /// `killServer` went through; the session is over.
    ServerKilled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ReplyKind,
    /// Frames read for this answer; 0 when answered locally.
    pub frames: usize,
    pub text: String,
}

impl Response {
    fn local(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Done,
            frames: 0,
            text: text.into(),
        }
    }
}

fn watch<'a>(cancel: &'a CancelToken, options: &ClientOptions, server: u32) -> Watch<'a> {
    Watch::new(cancel, options.poll_timeout).with_peer(options.probe_server.then_some(server))
}

pub struct Client {
    identity: u32,
    server: u32,
    session: u32,
    options: ClientOptions,
    working_dir: PathBuf,
    channels: SessionChannels,
    cancel: CancelToken,
    state: ClientState,
}

impl Client {
    /// Creates this client's channels and runs the admission handshake.
    /// Returns once admitted; `Blocking` clients wait in the queue, `TryOnce`
    /// ones fail with `ServerFull`.
    pub fn connect(server: u32, options: ClientOptions, cancel: CancelToken) -> Result<Self> {
        let identity = options.identity.unwrap_or_else(std::process::id);
        let working_dir = match &options.working_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir().map_err(GateError::io("current directory"))?,
        };
        let working_dir =
            fs::canonicalize(&working_dir).map_err(GateError::io("working directory"))?;
        let channels = SessionChannels::create(&options.channel_dir, identity)?;

        let mut client = Client {
            identity,
            server,
            session: 0,
            options,
            working_dir,
            channels,
            cancel,
            state: ClientState::Connecting,
        };
        client.handshake()?;
        Ok(client)
    }

    fn handshake(&mut self) -> Result<()> {
        self.send_control(&ControlMessage::Connect(ConnectRequest {
            pid: self.identity,
            mode: self.options.mode,
            client_dir: self.working_dir.clone(),
        }))?;

        let watch = watch(&self.cancel, &self.options, self.server);
        loop {
            let situation = match self.channels.receive_situation(&watch) {
                Ok(situation) => situation,
                Err(err) => {
                    if err.is_cancelled() {
                        self.detach();
                    }
                    self.state = ClientState::Closed;
                    return Err(err);
                }
            };
            match situation {
                Situation::Admitted(session) => {
                    self.session = session;
                    self.state = ClientState::Connected;
                    log::info!("Connection established with session {session}");
                    return Ok(());
                }
                Situation::Full if self.options.mode == ConnectMode::TryOnce => {
                    self.state = ClientState::Closed;
                    return Err(GateError::ServerFull);
                }
                Situation::Full => {
                    if self.state != ClientState::WaitingInQueue {
                        log::info!("Waiting for Que..");
                    }
                    self.state = ClientState::WaitingInQueue;
                }
                Situation::Rejected => {
                    self.state = ClientState::Closed;
                    return Err(GateError::Rejected);
                }
            }
        }
    }

    fn send_control(&self, message: &ControlMessage) -> Result<()> {
        let path = connect_channel(&self.options.channel_dir, self.server);
        let fifo = Fifo::open_writer(&path).map_err(|err| match err.raw_os_error() {
            Some(code) if code == nix::libc::ENXIO => GateError::ServerUnavailable(self.server),
            _ if err.kind() == ErrorKind::NotFound => GateError::ServerUnavailable(self.server),
            _ => GateError::Io {
                context: "open connect channel",
                source: err,
            },
        })?;
        // The dispatcher may be gone already; a fresh token keeps a pending
        // cancellation from cutting the message short.
        let cancel = CancelToken::new();
        fifo.write_all(&encode_control(message)?, &watch(&cancel, &self.options, self.server))
    }

    /// Best-effort: tells the dispatcher this client is leaving.
    fn detach(&self) {
        if let Err(err) = self.send_control(&ControlMessage::Detach { pid: self.identity }) {
            log::debug!("detach not delivered: {err}");
        }
    }

    pub fn identity(&self) -> u32 {
        self.identity
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Sends one command line and collects the whole answer.
    pub fn request(&mut self, line: &str) -> Result<Response> {
        if self.state != ClientState::Connected {
            return Err(GateError::ChannelClosed("session is not connected".into()));
        }
        let line = line.trim();
        let parsed = Command::parse(line).ok();

        if let Some(Command::ArchServer(name)) = &parsed {
            match name.strip_suffix(ARCHIVE_EXTENSION) {
                Some(stem) if !stem.is_empty() => {
                    let staging = self.working_dir.join(stem);
                    if let Err(err) = fs::create_dir_all(&staging) {
                        return Ok(Response::local(format!(
                            "Error creating {}: {err}",
                            staging.display()
                        )));
                    }
                }
                _ => return Ok(Response::local("File extension entered wrong")),
            }
        }
        if line.len() > PAYLOAD_LEN {
            return Ok(Response::local(COMMAND_TOO_LONG));
        }

        let result = self.exchange(line, parsed.as_ref());
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn exchange(&mut self, line: &str, parsed: Option<&Command>) -> Result<Response> {
        let watch = watch(&self.cancel, &self.options, self.server);

        self.state = ClientState::IssuingCommand;
        self.channels
            .send_to_server(&Frame::ok(line.as_bytes()), &watch)?;
        self.channels.request_ready.post(&watch)?;

        self.state = ClientState::AwaitingReply;
        self.channels.reply_ready.wait(&watch)?;

        if parsed == Some(&Command::KillServer) {
            self.state = ClientState::Closed;
            self.detach();
            return Ok(Response {
                kind: ReplyKind::ServerKilled,
                frames: 0,
                text: String::new(),
            });
        }

        let mut payload = Vec::new();
        let mut frames = 0;
        loop {
            let frame = self.channels.receive_from_server(&watch)?;
            frames += 1;
            payload.extend_from_slice(&frame.payload);
            if frame.is_last() {
                break;
            }
        }
        let text = String::from_utf8_lossy(&payload).into_owned();

        let kind = if parsed == Some(&Command::Quit) && text == QUIT_PAYLOAD {
            self.state = ClientState::Closed;
            ReplyKind::Quit
        } else {
            self.state = ClientState::Connected;
            ReplyKind::Done
        };
        Ok(Response { kind, frames, text })
    }

    /// Leaves without `quit`: the dispatcher drops the queue entry or stops
    /// the worker.
    pub fn abort(&mut self) {
        if self.state != ClientState::Closed {
            self.detach();
            self.state = ClientState::Closed;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.abort();
        SessionChannels::remove(&self.options.channel_dir, self.identity);
    }
}
