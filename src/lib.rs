#![forbid(unsafe_op_in_unsafe_fn)]

mod client;
mod constants;
mod error;
mod events;
mod fifo;
mod lines;
mod naming;
mod ring;
mod server;
mod session;

pub mod archive;
pub mod cancel;
pub mod command;
pub mod log_sink;
pub mod ops;
pub mod protocol;
pub mod registry;
pub mod signals;

pub use archive::{Archiver, TarArchiver};
pub use cancel::CancelToken;
pub use client::{Client, ClientOptions, ClientState, ReplyKind, Response, COMMAND_TOO_LONG};
pub use constants::{
    DEFAULT_CHANNEL_DIR, DEFAULT_MAX_CLIENTS, LOG_FILE_NAME, PAYLOAD_LEN, WAIT_QUEUE_CAPACITY,
};
pub use error::{GateError, Result};
pub use log_sink::LogSink;
pub use protocol::ConnectMode;
pub use registry::{FileEntry, Registry};
pub use server::{Server, ServerOptions, ServerStatsSnapshot, ShutdownReason, StatsHandle};

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn server_client_roundtrip() {
        const SERVER: u32 = 31_001;
        let root = tempfile::tempdir().unwrap();
        let channels = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();

        let mut server = Server::bind(
            SERVER,
            ServerOptions {
                root: root.path().to_owned(),
                channel_dir: channels.path().to_owned(),
                max_clients: 2,
                poll_timeout: Duration::from_millis(10),
                probe_clients: false,
                signal_clients: false,
                ..Default::default()
            },
        )
        .unwrap();
        let shutdown = server.shutdown_token();
        let server_thread = thread::spawn(move || server.run());

        let client_res = (|| -> Result<()> {
            let mut client = Client::connect(
                SERVER,
                ClientOptions {
                    channel_dir: channels.path().to_owned(),
                    identity: Some(31_101),
                    working_dir: Some(home.path().to_owned()),
                    poll_timeout: Duration::from_millis(10),
                    probe_server: false,
                    ..Default::default()
                },
                CancelToken::new(),
            )?;
            assert!(client.session() > 0);

            let written = client.request("writeT notes.txt 1 hello there")?;
            assert_eq!(written.text, "11 byte(s) written");
            let line = client.request("readF notes.txt 1")?;
            assert_eq!(line.text, "hello there");
            assert_eq!(line.kind, ReplyKind::Done);

            let bye = client.request("quit")?;
            assert_eq!(bye.kind, ReplyKind::Quit);
            assert_eq!(client.state(), ClientState::Closed);
            Ok(())
        })();

        shutdown.cancel();
        let reason = server_thread.join().unwrap().unwrap();
        client_res.unwrap();
        assert_eq!(reason, ShutdownReason::Interrupted);
    }
}
