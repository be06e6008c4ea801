//! Shared Playlist - Terminal Node
//!
//! Hosts a playlist on the local network or joins one, with a terminal dashboard.
//!
//! Usage:
//!   cargo run --release -- host --name "Friday"
//!   cargo run --release -- join --host "Kitchen"
//!   cargo run --release -- --no-dashboard join  # Plain logging mode

mod commands;
mod dashboard;
mod session;
mod status;

use clap::{Parser, Subcommand};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use commands::Command;
use session::{BoxError, Mode, Options};
use status::{LogLevel, Status};

#[derive(Parser, Debug)]
#[command(name = "playlist-node", version, about = "Build a playlist together on the local network")]
struct Cli {
    #[command(subcommand)]
    mode: ModeArg,

    /// Name other devices see
    #[arg(long, env = "PLAYLIST_DISPLAY_NAME", default_value = "Playlist Node", global = true)]
    display_name: String,

    /// Where saved playlists are kept
    #[arg(long, env = "PLAYLIST_STORE_DIR", default_value = ".", global = true)]
    store_dir: PathBuf,

    /// Multiaddr to dial directly, for networks without mDNS (repeatable)
    #[arg(long, global = true)]
    dial: Vec<String>,

    /// Plain logging instead of the dashboard
    #[arg(long, global = true)]
    no_dashboard: bool,
}

#[derive(Subcommand, Debug)]
enum ModeArg {
    /// Host a new playlist
    Host {
        /// Playlist name
        #[arg(long)]
        name: String,
    },
    /// Join a nearby host
    Join {
        /// Device name, playlist name or peer id; first host found if omitted
        #[arg(long)]
        host: Option<String>,
    },
}

impl Cli {
    fn into_options(self) -> Options {
        let mode = match self.mode {
            ModeArg::Host { name } => Mode::Host { name },
            ModeArg::Join { host } => Mode::Join { host },
        };
        Options {
            mode,
            display_name: self.display_name,
            store_dir: self.store_dir,
            dial: self.dial,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let use_dashboard = !cli.no_dashboard;
    let options = cli.into_options();

    let role = match options.mode {
        Mode::Host { .. } => "Host",
        Mode::Join { .. } => "Guest",
    };

    // Shared status state
    let status = Arc::new(RwLock::new(Status::new(role, options.display_name.clone())));

    if use_dashboard {
        // Run with TUI dashboard
        dashboard::run(status, options).await
    } else {
        // Run with plain logging
        run_with_logging(status, options).await
    }
}

/// Read commands from stdin and print activity to stderr
async fn run_with_logging(
    status: Arc<RwLock<Status>>,
    options: Options,
) -> Result<(), BoxError> {
    playlist_core::logging::init();

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let mut session = tokio::spawn(session::run(options, Arc::clone(&status), command_rx));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            result = &mut session => {
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(e.into()),
                };
            }
            line = lines.next_line() => {
                let command = match line? {
                    Some(line) => match commands::parse(&line) {
                        Ok(command) => command,
                        Err(commands::ParseError::Empty) => continue,
                        Err(e) => {
                            status.write().log(LogLevel::Warning, e.to_string());
                            continue;
                        }
                    },
                    // stdin closed
                    None => Command::Quit,
                };
                let quit = command == Command::Quit;
                let _ = command_tx.send(command);
                if quit {
                    break;
                }
            }
        }
    }

    session.await??;
    Ok(())
}
