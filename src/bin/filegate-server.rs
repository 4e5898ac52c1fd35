use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use filegate::{
    signals, GateError, LogSink, Server, ServerOptions, ShutdownReason, DEFAULT_CHANNEL_DIR,
    LOG_FILE_NAME, WAIT_QUEUE_CAPACITY,
};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "filegate-server", about = "Concurrent file access server")]
struct Cli {
    /// Directory served to clients (created if missing)
    dir: PathBuf,

    /// Maximum number of simultaneously connected clients
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    max_clients: u32,

    /// Log file (defaults to <dir>/server_log.txt)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Directory holding the named channels
    #[arg(long, default_value = DEFAULT_CHANNEL_DIR)]
    channel_dir: PathBuf,

    /// Capacity of the wait queue
    #[arg(long, default_value_t = WAIT_QUEUE_CAPACITY)]
    queue: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn run(cli: Cli) -> filegate::Result<ShutdownReason> {
    fs::create_dir_all(&cli.dir).map_err(|source| GateError::Io {
        context: "create server directory",
        source,
    })?;
    let log_path = cli
        .log_file
        .clone()
        .unwrap_or_else(|| cli.dir.join(LOG_FILE_NAME));
    let sink = LogSink::open(&log_path, cli.log_level)?;
    if let Err(err) = sink.install() {
        eprintln!("filegate-server: logger already installed: {err}");
    }

    let identity = std::process::id();
    let mut server = Server::bind(
        identity,
        ServerOptions {
            root: cli.dir,
            max_clients: cli.max_clients as usize,
            wait_queue_capacity: cli.queue,
            channel_dir: cli.channel_dir,
            ..Default::default()
        },
    )?;
    signals::install(&server.shutdown_token())?;

    println!("Server Started PID {identity}...");
    println!("waiting for clients...");
    server.run()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(ShutdownReason::KillServer) => {
            println!("kill signal from client.. terminating...");
            ExitCode::SUCCESS
        }
        Ok(ShutdownReason::Interrupted) => {
            println!("interrupted.. terminating...");
            ExitCode::SUCCESS
        }
        Err(err) if err.is_cancelled() => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("filegate-server: {err}");
            ExitCode::FAILURE
        }
    }
}
