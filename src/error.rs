use std::io;

use nix::errno::Errno;

/// Convenience result type for the crate.
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors the server, the session workers and the client driver can return.
///
/// Command-level problems (bad arity, unknown file, invalid line number) are
/// never errors: they travel back to the client as reply text.
#[derive(thiserror::Error, Debug)]
pub enum GateError {
    /// A cancellation token fired at a suspension point.
    #[error("operation cancelled")]
    Cancelled,
    /// The server has no free session slot (TryOnce mode).
    #[error("server is full")]
    ServerFull,
    /// The server refused the connection for good.
    #[error("connection rejected by server")]
    Rejected,
    /// The server's connect channel does not exist or has no reader.
    #[error("server {0} is not available")]
    ServerUnavailable(u32),
    /// The process on the other end of a channel no longer exists.
    #[error("peer process {0} is gone")]
    PeerGone(u32),
    /// A channel reported end of stream.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
    /// A frame or connect message failed validation.
    #[error("malformed message: {0}")]
    Corrupted(&'static str),
    /// Payload exceeds the frame capacity.
    #[error("message is too large")]
    MessageTooLarge,
    /// The file registry has no room for another entry.
    #[error("file registry is full")]
    RegistryFull,
    /// A lock primitive was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
    /// A session worker could not be started.
    #[error("failed to spawn session worker: {0}")]
    Spawn(#[source] io::Error),
    /// I/O failure with the operation that caused it.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    /// System call failure with the operation that caused it.
    #[error("{context}: {errno}")]
    Os {
        errno: Errno,
        context: &'static str,
    },
}

impl GateError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> GateError {
        move |source| GateError::Io { context, source }
    }

    pub(crate) fn os(context: &'static str) -> impl FnOnce(Errno) -> GateError {
        move |errno| GateError::Os { errno, context }
    }

    /// True for the cooperative-shutdown outcome, which callers treat as success.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GateError::Cancelled)
    }
}
