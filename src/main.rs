use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pairguard::config::Config;
use pairguard::control::{self, ControlRequest, ControlResponse};
use pairguard::daemon::{self, EngineMode};
use pairguard::prompt::Decision;
use std::path::PathBuf;
use std::str::FromStr;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "pairguard")]
#[command(about = "Decide which Bluetooth devices may pair with this host")]
#[command(version)]
#[command(after_help = r#"EXAMPLES:
    pairguard daemon                  # Watch pairing requests (JSON lines on stdin)
    pairguard list                    # Show trusted and blocked devices
    pairguard block 11:22:33:44:55:66 # Reject this device from now on
    pairguard untrust AA:BB:CC:DD:EE:FF
    pairguard pending                 # Prompts the running daemon is waiting on
    pairguard resolve AA:BB:CC:DD:EE:FF trust
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.pairguard/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decision engine until Ctrl+C
    Daemon,

    /// Show trusted and blocked devices
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Trust a device
    Trust { identity: String },

    /// Block a device
    Block { identity: String },

    /// Remove a device from the trusted list
    Untrust { identity: String },

    /// Remove a device from the blocked list
    Unblock { identity: String },

    /// Print how a device is classified
    Check { identity: String },

    /// List prompts the running daemon is waiting on
    Pending {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Answer an open prompt in the running daemon
    Resolve {
        identity: String,
        /// trust, block or ignore
        decision: Decision,
    },
}

impl Commands {
    /// Control request for this command, plus whether JSON output was asked for.
    fn into_request(self) -> Option<(ControlRequest, bool)> {
        let request = match self {
            Self::Daemon => return None,
            Self::List { json } => return Some((ControlRequest::List, json)),
            Self::Pending { json } => return Some((ControlRequest::Pending, json)),
            Self::Trust { identity } => ControlRequest::Trust { identity },
            Self::Block { identity } => ControlRequest::Block { identity },
            Self::Untrust { identity } => ControlRequest::Untrust { identity },
            Self::Unblock { identity } => ControlRequest::Unblock { identity },
            Self::Check { identity } => ControlRequest::Check { identity },
            Self::Resolve { identity, decision } => ControlRequest::Resolve { identity, decision },
        };
        Some((request, false))
    }
}

fn init_logging(level: &str, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::from_str(level).unwrap_or(tracing::Level::INFO)
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_init(cli.config.as_deref())?;
    init_logging(&config.log.level, cli.verbose);

    match cli.command.into_request() {
        None => daemon::run(config).await,
        Some((request, json)) => {
            let response = manage(&config, request).await?;
            print_response(&response, json)
        }
    }
}

/// Run against the policy directly, or through the daemon when it holds
/// the store.
async fn manage(config: &Config, request: ControlRequest) -> Result<ControlResponse> {
    let lock = match daemon::acquire_lock(config) {
        Ok(lock) => lock,
        Err(lock_err) => {
            let socket = daemon::control_socket_path(config);
            if !socket.exists() {
                return Err(lock_err);
            }
            return control::send(&socket, &request).await;
        }
    };

    if matches!(
        request,
        ControlRequest::Pending | ControlRequest::Resolve { .. }
    ) {
        anyhow::bail!(
            "{}",
            pairguard::health::structured_error(
                "No pairguard daemon is running",
                "open prompts only exist inside the daemon",
                "start `pairguard daemon`, then retry"
            )
        );
    }

    let engine = daemon::open_engine(config, EngineMode::Management).await;
    if engine.is_degraded().await {
        anyhow::bail!(
            "{}",
            pairguard::health::structured_error(
                "Policy store is unreadable",
                &format!("could not load {}", daemon::policy_path(config).display()),
                "check the file's permissions and JSON syntax, or move it aside"
            )
        );
    }

    let response = control::dispatch(&engine, request).await;
    drop(lock);
    Ok(response)
}

fn print_response(response: &ControlResponse, json: bool) -> Result<()> {
    if !response.ok {
        anyhow::bail!("{}", response.message);
    }
    match (&response.data, json) {
        (Some(data), true) => {
            let text = serde_json::to_string_pretty(data).context("Failed to encode output")?;
            println!("{text}");
        }
        _ => println!("{}", response.message),
    }
    Ok(())
}
