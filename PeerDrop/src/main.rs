//! `peerdrop` command line client.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::{error, info};

use peerdrop::{AppConfig, ConnectionState, ReceivedFile, TransferObserver, TransferSession};

#[derive(Parser, Debug)]
#[command(name = "peerdrop")]
#[command(about = "Send a file straight to another machine", long_about = None)]
struct Cli {
    /// `key = value` configuration file; defaults apply when it is missing.
    #[arg(long, short, default_value = "peerdrop.conf")]
    config: String,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(long, short, action)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Offer a file and print the link to share with the receiver.
    Send { path: PathBuf },

    /// Download the file offered behind a share link.
    Receive {
        link: String,

        #[arg(long, short = 'o', help = "Directory to save into")]
        output: Option<PathBuf>,
    },
}

struct ConsoleObserver {
    download_dir: Option<PathBuf>,
    failure: Mutex<Option<String>>,
}

impl ConsoleObserver {
    fn new(download_dir: Option<PathBuf>) -> Self {
        Self {
            download_dir,
            failure: Mutex::new(None),
        }
    }

    fn record_failure(&self, message: String) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(message);
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|failure| failure.clone())
    }
}

impl TransferObserver for ConsoleObserver {
    fn on_status_change(&self, state: ConnectionState) {
        eprintln!("[{}]", state);
    }

    fn on_progress(&self, percent: u8) {
        eprintln!("{:>3}%", percent);
    }

    fn on_complete(&self, file: ReceivedFile) {
        let Some(dir) = &self.download_dir else {
            return;
        };
        match file.save_into(dir) {
            Ok(path) => {
                info!(path = %path.display(), "file saved");
                println!("{}", path.display());
            }
            Err(err) => {
                error!(error = %err, "could not save the received file");
                self.record_failure(format!("could not save {}: {}", file.name, err));
            }
        }
    }

    fn on_error(&self, message: &str) {
        self.record_failure(message.to_string());
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = AppConfig::load(&cli.config)?;
    let level = if cli.verbose { "debug" } else { "info" };
    let _guard = peerdrop::logger::init(&config.log_file, level)?;

    let observer = match &cli.command {
        Command::Send { .. } => Arc::new(ConsoleObserver::new(None)),
        Command::Receive { output, .. } => Arc::new(ConsoleObserver::new(Some(
            output.clone().unwrap_or_else(|| config.download_dir.clone()),
        ))),
    };

    let session = match cli.command {
        Command::Send { path } => {
            let (session, link) = TransferSession::start_sending(&config, &path, observer.clone())?;
            println!("{}", link);
            session
        }
        Command::Receive { link, .. } => {
            TransferSession::start_receiving(&config, &link, observer.clone())?
        }
    };
    session.wait();

    match observer.failure() {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("peerdrop: {}", err);
            ExitCode::FAILURE
        }
    }
}
