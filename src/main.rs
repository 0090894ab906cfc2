//! Signing daemon.
//!
//! Verifies the operator's passphrases once, then serves signing requests
//! until told to stop. A second invocation against the same pidfile controls
//! the running instance.
//!
//! # Architecture Overview
//!
//! ```text
//!     signing-daemon CONFIG                 signing-daemon --stop/--reload/--restart
//!            │                                            │
//!            ▼                                            ▼
//!   ┌──────────────────┐                       ┌────────────────────┐
//!   │ vault (prompt +  │ ◄── --restart first ─ │ ProcessController  │
//!   │ sign script test)│                       │ pidfile → signal   │
//!   └────────┬─────────┘                       └─────────┬──────────┘
//!            ▼                                           │ SIGINT / SIGHUP
//!   detach → runtime → signals → pidfile → hash workers  │
//!            ▼                                           ▼
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │                     ReloadSupervisor                          │
//!   │   ListenerBinding ── http::server ── SigningApp ── HashPool   │
//!   │   DebugConsoleBinding (127.0.0.1, optional)                   │
//!   └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgGroup, Parser};

use signing_daemon::lifecycle::daemonize::absolute_path;
use signing_daemon::lifecycle::{restart, start, ProcessController, SignalOutcome, StartOptions};
use signing_daemon::observability::logging;
use signing_daemon::vault::TerminalPrompt;

#[derive(Parser, Debug)]
#[command(name = "signing-daemon", version)]
#[command(about = "Passphrase-verified signing server with live reload", long_about = None)]
#[command(group(ArgGroup::new("action").args(["stop", "reload", "restart"])))]
struct Cli {
    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long = "logfile", value_name = "LOGFILE")]
    logfile: Option<PathBuf>,

    /// Detach from the terminal after passphrases are verified
    #[arg(short, long)]
    daemonize: bool,

    /// Where the running daemon records its pid
    #[arg(long, value_name = "PATH", default_value = "signing.pid")]
    pidfile: PathBuf,

    /// Seconds to wait for the old process during --restart
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    stop_timeout: u64,

    /// Stop the running daemon
    #[arg(long)]
    stop: bool,

    /// Make the running daemon re-read its configuration
    #[arg(long)]
    reload: bool,

    /// Stop the running daemon, then start a new one
    #[arg(long)]
    restart: bool,

    /// Configuration file (TOML)
    #[arg(value_name = "CONFIG", required_unless_present_any = ["stop", "reload"])]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal");
            eprintln!("signing-daemon: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let logfile = cli.logfile.as_deref().map(absolute_path).transpose()?;
    logging::init(logging::level_from_flags(cli.verbose, cli.quiet), logfile.as_deref())?;

    let controller = ProcessController::new(absolute_path(&cli.pidfile)?)
        .stop_timeout(Duration::from_secs(cli.stop_timeout));

    if cli.stop {
        report(controller.stop()?, "stop");
        return Ok(());
    }
    if cli.reload {
        report(controller.reload()?, "reload");
        return Ok(());
    }
    let Some(config_path) = cli.config else {
        return Err("a configuration file is required".into());
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "signing-daemon starting");
    let options = StartOptions {
        config_path,
        pidfile: controller.pidfile().to_path_buf(),
        daemonize: cli.daemonize,
    };
    if cli.restart {
        restart(&options, &controller, &mut TerminalPrompt)?;
    } else {
        start(&options, &mut TerminalPrompt)?;
    }
    Ok(())
}

fn report(outcome: SignalOutcome, action: &str) {
    match outcome {
        SignalOutcome::Signalled(pid) => tracing::info!(pid = pid, action = action, "Signalled daemon"),
        SignalOutcome::NotRunning => tracing::info!(action = action, "Daemon not running"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stop_needs_no_config() {
        let cli = Cli::try_parse_from(["signing-daemon", "--stop"]).unwrap();
        assert!(cli.stop);
        assert_eq!(cli.pidfile, PathBuf::from("signing.pid"));
        assert_eq!(cli.stop_timeout, 30);
    }

    #[test]
    fn actions_are_exclusive() {
        assert!(Cli::try_parse_from(["signing-daemon", "--stop", "--reload"]).is_err());
        assert!(Cli::try_parse_from(["signing-daemon", "--restart"]).is_err());
        assert!(Cli::try_parse_from(["signing-daemon", "--restart", "signing.toml"]).is_ok());
    }
}
