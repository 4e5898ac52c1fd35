use std::io::{self, BufRead, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use filegate::{
    signals, CancelToken, Client, ClientOptions, ConnectMode, GateError, LogSink, ReplyKind,
    DEFAULT_CHANNEL_DIR,
};
use log::LevelFilter;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Wait in the queue while the server is full
    #[value(name = "Connect")]
    Connect,
    /// Give up at once if the server is full
    #[value(name = "tryConnect")]
    TryConnect,
}

#[derive(Parser, Debug)]
#[command(name = "filegate-client", about = "Interactive client for filegate-server")]
struct Cli {
    #[arg(value_enum)]
    mode: Mode,

    /// PID printed by the server on startup
    server_pid: u32,

    /// Directory holding the named channels
    #[arg(long, default_value = DEFAULT_CHANNEL_DIR)]
    channel_dir: PathBuf,
}

/// Waits for stdin to become readable, giving Ctrl+C a chance in between.
fn wait_for_input(cancel: &CancelToken) -> filegate::Result<()> {
    let stdin = io::stdin();
    loop {
        cancel.check()?;
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(100u16)) {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => return Ok(()),
            Err(errno) => {
                return Err(GateError::Os {
                    errno,
                    context: "poll stdin",
                })
            }
        }
    }
}

fn run(cli: Cli) -> filegate::Result<()> {
    let cancel = CancelToken::new();
    signals::install(&cancel)?;
    if let Err(err) = LogSink::stderr(LevelFilter::Info).install() {
        eprintln!("filegate-client: logger already installed: {err}");
    }

    let options = ClientOptions {
        channel_dir: cli.channel_dir,
        mode: match cli.mode {
            Mode::Connect => ConnectMode::Blocking,
            Mode::TryConnect => ConnectMode::TryOnce,
        },
        ..Default::default()
    };
    println!("Connecting to server {}...", cli.server_pid);
    let mut client = Client::connect(cli.server_pid, options, cancel.clone())?;

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!(">> Enter command : ");
        let _ = io::stdout().flush();

        wait_for_input(&cancel)?;
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(source) => {
                return Err(GateError::Io {
                    context: "read command",
                    source,
                })
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = client.request(&line)?;
        match response.kind {
            ReplyKind::Done => println!("{}", response.text),
            ReplyKind::Quit => {
                println!("bye..");
                return Ok(());
            }
            ReplyKind::ServerKilled => {
                println!("kill signal sent to server.. bye..");
                return Ok(());
            }
        }
    }
    client.abort();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_cancelled() => ExitCode::SUCCESS,
        Err(GateError::ServerFull) => {
            println!("Server is full, try again later.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("filegate-client: {err}");
            ExitCode::FAILURE
        }
    }
}
