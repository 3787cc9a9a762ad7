//! mandiag CLI - Command-line driver for manufacturer-diagnostic exchanges.
//!
//! ## Features
//!
//! - Send a diagnostic request and print the parsed response
//! - Validate a response field by field or against a wildcard pattern
//! - Request/response over SocketCAN (Linux)
//! - Serial port listing
//! - Environment variable and TOML configuration support

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;

mod commands;
mod config;

use config::Config;

/// Default baud rate when neither the command line nor a config file sets one.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// mandiag - Manufacturer-diagnostic request/response driver.
///
/// Environment variables:
///   MANDIAG_PORT   - Default serial port
///   MANDIAG_BAUD   - Default baud rate (default: 115200)
///   RUST_LOG       - Log filter (overrides -v/--quiet)
#[derive(Parser)]
#[command(name = "mandiag")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "MANDIAG_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "MANDIAG_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a request and print the response.
    Send {
        /// Request tokens; the request prefix is added when missing.
        #[arg(required = true, num_args = 1.., value_name = "COMMAND")]
        command: Vec<String>,

        /// Outer send attempts when nothing answers.
        #[arg(long)]
        attempts: Option<u32>,

        /// Budget for pending replies in milliseconds.
        #[arg(long, value_name = "MS")]
        pending_deadline_ms: Option<u64>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send a request and validate the response (exit 1 on failure).
    Check {
        /// Request tokens; the request prefix is added when missing.
        #[arg(required = true, num_args = 1.., value_name = "COMMAND")]
        command: Vec<String>,

        /// Expected status code.
        #[arg(long, default_value = "01")]
        status: String,

        /// Expected data length code.
        #[arg(long, default_value = "00")]
        length: String,

        /// Expected data bytes (checked when length is not 00).
        #[arg(long)]
        data: Option<String>,

        /// Wildcard pattern: full frame or "<Status> <Length> [Data..]", XX matches any byte.
        #[arg(long, value_name = "PATTERN", conflicts_with = "data")]
        expect: Option<String>,

        /// Number of repetitions; stops at the first failure.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        repeat: u32,

        /// Outer send attempts when nothing answers.
        #[arg(long)]
        attempts: Option<u32>,
    },

    /// Send one CAN frame and validate the reply (Linux SocketCAN).
    CanCheck {
        /// CAN interface (e.g., can0, vcan0).
        #[arg(long)]
        interface: Option<String>,

        /// Request arbitration ID (hex, e.g. 0x18DA10F1).
        #[arg(long, value_parser = commands::can::parse_can_id)]
        request_id: u32,

        /// Response arbitration ID (hex).
        #[arg(long, value_parser = commands::can::parse_can_id)]
        response_id: u32,

        /// Request payload as hex bytes.
        #[arg(long)]
        payload: String,

        /// Expected response payload; any payload passes when omitted.
        #[arg(long)]
        expect: Option<String>,

        /// Receive timeout in milliseconds.
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show configuration.
    Config {
        /// Print the effective merged configuration as TOML.
        #[arg(long)]
        show: bool,

        /// Print the global configuration file path.
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    // NO_COLOR and non-TTY stderr disable styling
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "mandiag v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Send {
            command,
            attempts,
            pending_deadline_ms,
            json,
        } => {
            if !commands::diag::cmd_send(
                &cli,
                &config,
                command,
                *attempts,
                *pending_deadline_ms,
                *json,
            )? {
                std::process::exit(1);
            }
        },
        Commands::Check {
            command,
            status,
            length,
            data,
            expect,
            repeat,
            attempts,
        } => {
            let check = commands::diag::CheckArgs {
                status,
                length,
                data: data.as_deref(),
                expect: expect.as_deref(),
                repeat: *repeat,
                attempts: *attempts,
            };
            if !commands::diag::cmd_check(&cli, &config, command, &check)? {
                std::process::exit(1);
            }
        },
        Commands::CanCheck {
            interface,
            request_id,
            response_id,
            payload,
            expect,
            timeout_ms,
        } => {
            let request = commands::can::CanCheckArgs {
                interface: interface.as_deref(),
                request_id: *request_id,
                response_id: *response_id,
                payload,
                expect: expect.as_deref(),
                timeout_ms: *timeout_ms,
            };
            if !commands::can::cmd_can_check(&cli, &config, &request)? {
                std::process::exit(1);
            }
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json)?;
        },
        Commands::Config { show, path } => {
            commands::settings::cmd_config(&config, *show, *path)?;
        },
    }

    Ok(())
}
