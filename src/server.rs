//! Admission controller and dispatcher.
//!
//! A single loop owns the connect channel, the wait queue and the session
//! slots. Only the session workers run elsewhere; they report back through
//! an mpsc channel that the loop drains without blocking.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::archive::{Archiver, TarArchiver};
use crate::cancel::CancelToken;
use crate::constants::*;
use crate::error::{GateError, Result};
use crate::events::{write_situation, SessionChannels};
use crate::fifo::{Fifo, Watch};
use crate::naming::{client_channel, connect_channel, Direction};
use crate::ops::Workspace;
use crate::protocol::{decode_control, ConnectMode, ConnectRequest, ControlMessage, Situation};
use crate::registry::Registry;
use crate::ring::{QueueFull, WaitQueue};
use crate::session::{self, SessionContext, SessionEnd, SessionEvent};
use crate::signals::process_alive;

#[derive(Clone)]
pub struct ServerOptions {
    /// Directory the server works in. Canonicalized at bind time.
    pub root: PathBuf,
    pub max_clients: usize,
    pub wait_queue_capacity: usize,
    pub registry_capacity: usize,
    /// Where the connect channel and client channels live.
    pub channel_dir: PathBuf,
    pub poll_timeout: Duration,
    /// Skip queued clients whose process is gone and end sessions whose
    /// client died. Needs clients to be real processes.
    pub probe_clients: bool,
    /// SIGTERM the client when its session is aborted.
    pub signal_clients: bool,
    pub archiver: Arc<dyn Archiver>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_clients: DEFAULT_MAX_CLIENTS,
            wait_queue_capacity: WAIT_QUEUE_CAPACITY,
            registry_capacity: MAX_FILES,
            channel_dir: PathBuf::from(DEFAULT_CHANNEL_DIR),
            poll_timeout: DEFAULT_POLL_SLICE,
            probe_clients: true,
            signal_clients: true,
            archiver: Arc::new(TarArchiver),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shutdown token fired (SIGINT/SIGTERM in the binary).
    Interrupted,
    /// A client issued `killServer`.
    KillServer,
}

#[derive(Default, Clone, Debug)]
pub struct ServerStatsSnapshot {
    pub active_sessions: u64,
    pub queued: u64,
    pub admitted: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct ServerStats {
    active_sessions: AtomicU64,
    queued: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl ServerStats {
    fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of the admission counters, usable from other threads.
#[derive(Clone)]
pub struct StatsHandle(Arc<ServerStats>);

impl StatsHandle {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        self.0.snapshot()
    }
}

struct Slot {
    session: u32,
    pid: u32,
    name: String,
    cancel: CancelToken,
    handle: JoinHandle<SessionEnd>,
}

pub struct Server {
    identity: u32,
    options: ServerOptions,
    connect: Fifo,
    shutdown: CancelToken,
    registry: Arc<Registry>,
    workspace: Arc<Workspace>,
    queue: WaitQueue,
    slots: Vec<Option<Slot>>,
    stats: Arc<ServerStats>,
    next_session: u32,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl Server {
    /// Scans the root and opens the connect channel. Failing to create the
    /// channel is fatal for the server.
    pub fn bind(identity: u32, mut options: ServerOptions) -> Result<Self> {
        options.root = fs::canonicalize(&options.root).map_err(GateError::io("server root"))?;

        let registry = Arc::new(Registry::new(options.registry_capacity));
        let tracked = registry.scan(&options.root)?;

        let path = connect_channel(&options.channel_dir, identity);
        Fifo::create(&path)?;
        let connect = Fifo::open(&path)?;
        log::info!(
            "server {identity} listening on {} ({tracked} files tracked)",
            path.display()
        );

        let workspace = Arc::new(Workspace::new(
            options.root.clone(),
            registry.clone(),
            options.archiver.clone(),
        ));
        let (events_tx, events_rx) = mpsc::channel();
        let slots = (0..options.max_clients).map(|_| None).collect();

        Ok(Self {
            identity,
            queue: WaitQueue::new(options.wait_queue_capacity),
            options,
            connect,
            shutdown: CancelToken::new(),
            registry,
            workspace,
            slots,
            stats: Arc::new(ServerStats::default()),
            next_session: 0,
            events_tx,
            events_rx,
        })
    }

    pub fn identity(&self) -> u32 {
        self.identity
    }

    /// Cancelling this token stops the loop and every session.
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> StatsHandle {
        StatsHandle(self.stats.clone())
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Serves until shutdown. Sessions are ended and joined on every exit
    /// path, errors included.
    pub fn run(&mut self) -> Result<ShutdownReason> {
        let outcome = self.serve();
        self.finish(outcome)
    }

    fn serve(&mut self) -> Result<ShutdownReason> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(ShutdownReason::Interrupted);
            }
            if self.reap() {
                return Ok(ShutdownReason::KillServer);
            }
            self.admit_waiting()?;
            self.poll_connect()?;
        }
    }

    fn finish(&mut self, outcome: Result<ShutdownReason>) -> Result<ShutdownReason> {
        match &outcome {
            Ok(reason) => log::info!("server {} shutting down ({reason:?})", self.identity),
            Err(err) => log::error!("server {} failed: {err}", self.identity),
        }
        self.shutdown_sessions();
        outcome
    }

    /// Handles at most one connect-channel message.
    fn poll_connect(&mut self) -> Result<()> {
        if !self.connect.wait_readable(self.options.poll_timeout)? {
            return Ok(());
        }
        let mut raw = vec![0u8; CONNECT_FRAME_SIZE];
        let watch = Watch::new(&self.shutdown, self.options.poll_timeout);
        match self.connect.read_exact(&mut raw, &watch) {
            Ok(()) => {}
            Err(GateError::Cancelled) => return Ok(()),
            Err(err) => return Err(err),
        }
        match decode_control(&raw) {
            Ok(ControlMessage::Connect(req)) => self.submit(req),
            Ok(ControlMessage::Detach { pid }) => {
                self.detach(pid);
                Ok(())
            }
            Err(err) => {
                log::warn!("ignoring connect-channel message: {err}");
                Ok(())
            }
        }
    }

    /// Drains worker events. True once a worker asked for `killServer`.
    fn reap(&mut self) -> bool {
        let mut kill = false;
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                SessionEvent::Exited { session } => self.release(session),
                SessionEvent::KillServer { session } => {
                    log::info!("kill request from session {session}");
                    kill = true;
                }
            }
        }
        kill
    }

    fn release(&mut self, session: u32) {
        let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.session == session))
        else {
            return;
        };
        if let Some(slot) = self.slots[index].take() {
            match slot.handle.join() {
                Ok(end) => log::info!("{} (PID {}) ended: {end:?}", slot.name, slot.pid),
                Err(_) => log::error!("{} (PID {}) panicked", slot.name, slot.pid),
            }
            self.stats.active_sessions.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn sync_queued(&self) {
        self.stats
            .queued
            .store(self.queue.len() as u64, Ordering::Relaxed);
    }

    /// Moves queued clients into free slots, oldest first.
    fn admit_waiting(&mut self) -> Result<()> {
        while self.free_slot().is_some() {
            let Some(req) = self.queue.pop() else {
                break;
            };
            self.sync_queued();
            if self.options.probe_clients && !process_alive(req.pid) {
                log::info!("queued client PID {} is gone, skipping", req.pid);
                continue;
            }
            self.admit(req)?;
        }
        Ok(())
    }

    /// Queued clients always go before `req`.
    fn submit(&mut self, req: ConnectRequest) -> Result<()> {
        self.admit_waiting()?;
        if self.free_slot().is_some() {
            return self.admit(req);
        }

        log::info!("Connection request PID {}... Que FULL", req.pid);
        match req.mode {
            ConnectMode::TryOnce => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                self.reply_situation(req.pid, Situation::Full);
            }
            ConnectMode::Blocking => {
                let pid = req.pid;
                match self.queue.push(req) {
                    Ok(()) => {
                        self.sync_queued();
                        self.reply_situation(pid, Situation::Full);
                    }
                    Err(QueueFull) => {
                        log::warn!("wait queue is full, rejecting PID {pid}");
                        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                        self.reply_situation(pid, Situation::Rejected);
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes a situation on a client's S2C channel without opening the
    /// rest of its channels. Failures only affect that client.
    fn reply_situation(&self, pid: u32, situation: Situation) {
        let path = client_channel(&self.options.channel_dir, pid, Direction::ServerToClient);
        let watch = Watch::new(&self.shutdown, self.options.poll_timeout);
        let sent = Fifo::open(&path).and_then(|fifo| write_situation(&fifo, situation, &watch));
        if let Err(err) = sent {
            log::warn!("could not answer PID {pid}: {err}");
        }
    }

    fn admit(&mut self, req: ConnectRequest) -> Result<()> {
        let Some(index) = self.free_slot() else {
            return Ok(());
        };
        let channels = match SessionChannels::open(&self.options.channel_dir, req.pid) {
            Ok(channels) => channels,
            Err(err) => {
                log::warn!("dropping PID {}: {err}", req.pid);
                return Ok(());
            }
        };

        self.next_session += 1;
        let session = self.next_session;
        let name = format!("client{session:02}");

        let watch = Watch::new(&self.shutdown, self.options.poll_timeout);
        if let Err(err) = channels.send_situation(Situation::Admitted(session), &watch) {
            log::warn!("dropping PID {}: {err}", req.pid);
            return Ok(());
        }

        let cancel = self.shutdown.child();
        let pid = req.pid;
        let ctx = SessionContext {
            session,
            name: name.clone(),
            request: req,
            channels,
            workspace: self.workspace.clone(),
            cancel: cancel.clone(),
            events: self.events_tx.clone(),
            poll_timeout: self.options.poll_timeout,
            probe_client: self.options.probe_clients,
            signal_client: self.options.signal_clients,
        };
        // Without a worker the slot table would lie, so this ends the server.
        let handle = session::spawn(ctx).map_err(GateError::Spawn)?;

        self.slots[index] = Some(Slot {
            session,
            pid,
            name: name.clone(),
            cancel,
            handle,
        });
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        self.stats.active_sessions.fetch_add(1, Ordering::Relaxed);
        log::info!("Client PID {pid} connected as \"{name}\"");
        Ok(())
    }

    /// A client gave up: leave the queue, or stop its session.
    fn detach(&mut self, pid: u32) {
        if self.queue.remove(pid).is_some() {
            self.sync_queued();
            log::info!("PID {pid} left the wait queue");
            return;
        }
        if let Some(slot) = self.slots.iter().flatten().find(|slot| slot.pid == pid) {
            log::info!("PID {pid} detached from {}", slot.name);
            slot.cancel.cancel();
        }
    }

    fn shutdown_sessions(&mut self) {
        self.shutdown.cancel();
        for slot in self.slots.iter().flatten() {
            slot.cancel.cancel();
        }
        for slot in self.slots.iter_mut() {
            if let Some(slot) = slot.take() {
                if slot.handle.join().is_err() {
                    log::error!("{} panicked during shutdown", slot.name);
                }
            }
        }
        self.stats.active_sessions.store(0, Ordering::Relaxed);
        while self.events_rx.try_recv().is_ok() {}

        for req in self.queue.drain() {
            self.reply_situation(req.pid, Situation::Rejected);
        }
        self.sync_queued();
        log::info!("server {} stopped", self.identity);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let path = connect_channel(&self.options.channel_dir, self.identity);
        let _ = fs::remove_file(path);
    }
}
