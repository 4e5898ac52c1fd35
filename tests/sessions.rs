//! End-to-end command behaviour through a live dispatcher.

use std::fs;
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use filegate::{
    CancelToken, Client, ClientOptions, ConnectMode, ReplyKind, Server, ServerOptions,
    ShutdownReason, StatsHandle, COMMAND_TOO_LONG, PAYLOAD_LEN,
};
use tempfile::TempDir;

const SERVER: u32 = 50_000;

struct Harness {
    root: TempDir,
    channels: TempDir,
    shutdown: CancelToken,
    stats: StatsHandle,
    server: Option<JoinHandle<filegate::Result<ShutdownReason>>>,
}

impl Harness {
    fn start(max_clients: usize, seed: &[(&str, &[u8])]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let channels = tempfile::tempdir().unwrap();
        for (name, body) in seed {
            fs::write(root.path().join(name), body).unwrap();
        }
        let mut server = Server::bind(
            SERVER,
            ServerOptions {
                root: root.path().to_owned(),
                max_clients,
                channel_dir: channels.path().to_owned(),
                poll_timeout: Duration::from_millis(10),
                probe_clients: false,
                signal_clients: false,
                ..Default::default()
            },
        )
        .unwrap();
        let shutdown = server.shutdown_token();
        let stats = server.stats();
        let handle = thread::spawn(move || server.run());
        Harness {
            root,
            channels,
            shutdown,
            stats,
            server: Some(handle),
        }
    }

    fn options(&self, identity: u32, home: &Path) -> ClientOptions {
        ClientOptions {
            channel_dir: self.channels.path().to_owned(),
            identity: Some(identity),
            mode: ConnectMode::Blocking,
            working_dir: Some(home.to_owned()),
            poll_timeout: Duration::from_millis(10),
            probe_server: false,
        }
    }

    fn connect(&self, identity: u32, home: &Path) -> Client {
        Client::connect(SERVER, self.options(identity, home), CancelToken::new()).unwrap()
    }

    fn wait(&mut self) -> ShutdownReason {
        let handle = self.server.take().unwrap();
        handle.join().unwrap().unwrap()
    }

    fn stop(mut self) -> ShutdownReason {
        self.shutdown.cancel();
        self.wait()
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn numbered_lines(count: usize) -> Vec<u8> {
    (1..=count)
        .map(|n| format!("line {n:05} of the shared document\n"))
        .collect::<String>()
        .into_bytes()
}

#[test]
fn unknown_file_keeps_the_session_open() {
    let harness = Harness::start(2, &[("present.txt", b"one\ntwo\n")]);
    let home = tempfile::tempdir().unwrap();
    let mut client = harness.connect(20_001, home.path());

    let missing = client.request("readF missing.txt").unwrap();
    assert_eq!(missing.text, "There is no file with this name.");
    assert_eq!(missing.kind, ReplyKind::Done);

    let listing = client.request("list").unwrap();
    assert_eq!(listing.text, "present.txt");
    assert_eq!(client.request("readF present.txt 2").unwrap().text, "two");
    assert_eq!(client.request("quit").unwrap().kind, ReplyKind::Quit);
    harness.stop();
}

#[test]
fn command_errors_are_reply_text() {
    let harness = Harness::start(1, &[("a.txt", b"only\n")]);
    let home = tempfile::tempdir().unwrap();
    let mut client = harness.connect(20_001, home.path());

    assert_eq!(
        client.request("list now").unwrap().text,
        "The required number of arguments has been exceeded."
    );
    assert!(client
        .request("frobnicate a.txt")
        .unwrap()
        .text
        .starts_with("Unknown command"));
    assert_eq!(
        client.request("readF a.txt zero").unwrap().text,
        "Line number must be a valid number, not string."
    );
    assert_eq!(
        client.request("readF a.txt 5").unwrap().text,
        "Total number of lines was exceeded."
    );
    assert!(client.request("help writeT").unwrap().text.starts_with("writeT"));
    assert!(client.is_connected());
    harness.stop();
}

#[test]
fn overlong_command_is_answered_locally() {
    let harness = Harness::start(1, &[]);
    let home = tempfile::tempdir().unwrap();
    let mut client = harness.connect(20_001, home.path());

    let line = format!("writeT f.txt 1 {}", "a".repeat(PAYLOAD_LEN + 1000));
    let reply = client.request(&line).unwrap();
    assert_eq!(reply.text, COMMAND_TOO_LONG);
    assert_eq!(reply.frames, 0);
    assert!(client.is_connected());

    client.request("writeT f.txt 1 short").unwrap();
    assert_eq!(client.request("readF f.txt 1").unwrap().text, "short");
    harness.stop();
}

#[test]
fn whole_file_read_spans_several_frames() {
    let body = numbered_lines(600);
    assert!(body.len() > PAYLOAD_LEN * 3);
    let harness = Harness::start(1, &[("big.txt", &body)]);
    let home = tempfile::tempdir().unwrap();
    let mut client = harness.connect(20_001, home.path());

    let reply = client.request("readF big.txt").unwrap();
    assert!(reply.frames > 4, "only {} frames", reply.frames);
    let content = reply
        .text
        .strip_suffix("\nReading file completed")
        .expect("completion marker");
    assert_eq!(content.as_bytes(), &body[..]);
    harness.stop();
}

#[test]
fn written_line_reads_back_exactly() {
    let harness = Harness::start(1, &[]);
    let home = tempfile::tempdir().unwrap();
    let mut client = harness.connect(20_001, home.path());

    assert_eq!(
        client.request("writeT fresh.txt opening").unwrap().text,
        "7 byte(s) written"
    );
    client.request("writeT fresh.txt 2 a line with  several words").unwrap();
    client.request("writeT fresh.txt 1 replaced").unwrap();
    assert_eq!(
        client.request("readF fresh.txt 2").unwrap().text,
        "a line with  several words"
    );
    assert_eq!(client.request("readF fresh.txt 1").unwrap().text, "replaced");
    assert_eq!(
        fs::read_to_string(harness.root.path().join("fresh.txt")).unwrap(),
        "replaced\na line with  several words\n"
    );
    harness.stop();
}

#[test]
fn upload_then_download_is_byte_identical() {
    let harness = Harness::start(2, &[]);
    let uploader_home = tempfile::tempdir().unwrap();
    let downloader_home = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
    fs::write(uploader_home.path().join("blob.bin"), &payload).unwrap();

    let mut uploader = harness.connect(20_001, uploader_home.path());
    let mut downloader = harness.connect(20_002, downloader_home.path());

    let up = uploader.request("upload blob.bin").unwrap();
    assert_eq!(up.text, "50000 byte(s) transferred");
    let down = downloader.request("download blob.bin").unwrap();
    assert_eq!(down.text, up.text);
    assert_eq!(fs::read(downloader_home.path().join("blob.bin")).unwrap(), payload);

    assert_eq!(
        downloader.request("download blob.bin").unwrap().text,
        "File already exists in client directory."
    );
    assert_eq!(
        uploader.request("upload nothing.bin").unwrap().text,
        "File doesn't exist in client directory."
    );
    harness.stop();
}

#[test]
fn readers_never_observe_a_half_written_file() {
    const WRITER_TEXT: &str = "rewritten by the writer";
    let original = numbered_lines(400);
    let mut updated = Vec::new();
    updated.extend_from_slice(WRITER_TEXT.as_bytes());
    let first_break = original.iter().position(|b| *b == b'\n').unwrap();
    updated.extend_from_slice(&original[first_break..]);

    let harness = Harness::start(3, &[("doc.txt", &original)]);
    let homes: Vec<TempDir> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();

    let readers: Vec<_> = (0..2u32)
        .map(|i| {
            let options = harness.options(20_001 + i, homes[i as usize].path());
            let original = original.clone();
            let updated = updated.clone();
            thread::spawn(move || {
                let mut client = Client::connect(SERVER, options, CancelToken::new()).unwrap();
                for _ in 0..15 {
                    let reply = client.request("readF doc.txt").unwrap();
                    let content = reply
                        .text
                        .strip_suffix("\nReading file completed")
                        .unwrap()
                        .as_bytes();
                    assert!(
                        content == &original[..] || content == &updated[..],
                        "torn read of {} bytes",
                        content.len()
                    );
                }
                client.request("quit").unwrap();
            })
        })
        .collect();

    let mut writer = harness.connect(20_003, homes[2].path());
    for _ in 0..10 {
        let reply = writer
            .request(&format!("writeT doc.txt 1 {WRITER_TEXT}"))
            .unwrap();
        assert_eq!(reply.text, format!("{} byte(s) written", WRITER_TEXT.len()));
    }
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(writer.request("readF doc.txt 1").unwrap().text, WRITER_TEXT);
    assert_eq!(
        fs::read(harness.root.path().join("doc.txt")).unwrap(),
        updated
    );
    harness.stop();
}

#[test]
fn archive_request_is_checked_locally_first() {
    let harness = Harness::start(1, &[("x.txt", b"x")]);
    let home = tempfile::tempdir().unwrap();
    let mut client = harness.connect(20_001, home.path());

    let wrong = client.request("archServer backup.zip").unwrap();
    assert_eq!(wrong.text, "File extension entered wrong");
    assert_eq!(wrong.frames, 0);

    let done = client.request("archServer backup.tar").unwrap();
    assert_eq!(done.text, "1 files downloaded ..1 byte(s) transferred ..");
    assert!(home.path().join("backup.tar").is_file());
    assert!(!home.path().join("backup").exists());
    harness.stop();
}

#[test]
fn kill_server_ends_every_session() {
    let mut harness = Harness::start(2, &[]);
    let home = tempfile::tempdir().unwrap();
    let bystander = harness.connect(20_001, home.path());
    let mut killer = harness.connect(20_002, home.path());
    assert_eq!(harness.stats.snapshot().active_sessions, 2);

    let reply = killer.request("killServer").unwrap();
    assert_eq!(reply.kind, ReplyKind::ServerKilled);
    assert!(!killer.is_connected());

    assert_eq!(harness.wait(), ShutdownReason::KillServer);
    assert!(wait_until(|| harness.stats.snapshot().active_sessions == 0));
    drop(bystander);
}
