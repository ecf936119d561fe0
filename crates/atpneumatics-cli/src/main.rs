//! `run_atpneumatics` – ATPneumatics CSC command line
//!
//! 1. Loads `~/.atpneumatics/config.toml` (or `--config PATH`) and applies
//!    the `ATPNEUMATICS_*` environment overrides.
//! 2. Builds the CSC, in simulation mode with `--simulate`, and walks it to
//!    the `--state` requested.
//! 3. Prints controller events as they arrive and drops the operator into
//!    the REPL.
//! 4. On Ctrl-C or `quit`, closes the connections (and the simulator) before
//!    exiting.

mod repl;
mod telemetry;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use colored::Colorize;
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info, warn};

use atpneumatics_csc::{CscConfig, PneumaticsCsc, config};
use atpneumatics_middleware::{EventBus, Topic};
use atpneumatics_types::{BusPayload, LifecycleCommand, PneumaticsError, SummaryState};

#[derive(Parser, Debug)]
#[command(name = "run_atpneumatics", author, version, about = "Run the ATPneumatics CSC", long_about = None)]
struct Args {
    /// Configuration file [default: ~/.atpneumatics/config.toml]
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Start and talk to the bundled pneumatics simulator.
    #[arg(long)]
    simulate: bool,

    /// Summary state to reach before the shell opens (STANDBY, DISABLED or
    /// ENABLED).
    #[arg(long, value_name = "STATE", default_value = "STANDBY")]
    state: SummaryState,

    /// Print the configuration JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.print_schema {
        return match config::json_schema() {
            Ok(schema) => {
                println!("{schema}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Schema error".red(), e);
                ExitCode::FAILURE
            }
        };
    }

    let path = match startup_path(args.state) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{}: {}", "Invalid --state".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = telemetry::init_tracing("atpneumatics");

    let cfg = match load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the tokio runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let simulation_mode = u8::from(args.simulate);
    let csc = match PneumaticsCsc::new(cfg, simulation_mode) {
        Ok(csc) => Arc::new(csc),
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    print_banner(&csc);
    runtime.spawn(print_bus(csc.bus()));

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    // The REPL blocks on stdin, so the handler tears down and exits itself.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let csc = csc.clone();
        let handle = runtime.handle().clone();
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – closing connections …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            handle.block_on(csc.close());
            println!("{}", "  ✓ Exiting ATPneumatics.".green());
            std::process::exit(130);
        }) {
            warn!(error = %e, "Failed to install Ctrl-C handler");
        }
    }

    for command in path {
        if let Err(e) = runtime.block_on(csc.lifecycle(*command)) {
            println!("{} {}: {}", "✗".red().bold(), command, e);
            break;
        }
    }
    info!(state = %csc.summary_state(), "ready");

    println!(
        "  Type {} for a list of commands.\n",
        "help".bold().cyan()
    );
    repl::run(csc.clone(), runtime.handle().clone(), shutdown);

    runtime.block_on(csc.close());
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle commands that take a fresh CSC from STANDBY to `target`.
fn startup_path(target: SummaryState) -> Result<&'static [LifecycleCommand], PneumaticsError> {
    match target {
        SummaryState::Standby => Ok(&[]),
        SummaryState::Disabled => Ok(&[LifecycleCommand::Start]),
        SummaryState::Enabled => Ok(&[LifecycleCommand::Start, LifecycleCommand::Enable]),
        other => Err(PneumaticsError::InvalidConfig(format!(
            "cannot start in {other}"
        ))),
    }
}

/// Load `path`, or the default location when `None`.  A missing default file
/// falls back to [`CscConfig::default`]; a missing explicit file is an error.
fn load_config(path: Option<&Path>) -> Result<CscConfig, PneumaticsError> {
    let explicit = path.is_some();
    let path = path.map(Path::to_path_buf).unwrap_or_else(config::config_path);

    let mut cfg = match config::load_from(&path)? {
        Some(cfg) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        None if explicit => {
            return Err(PneumaticsError::Io(format!(
                "config file {} not found",
                path.display()
            )));
        }
        None => {
            info!(path = %path.display(), "no config file; using defaults");
            CscConfig::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus printer
// ─────────────────────────────────────────────────────────────────────────────

async fn print_bus(bus: Arc<EventBus>) {
    let mut messages = stream::select_all([
        bus.subscribe_to(Topic::Events).into_stream(),
        bus.subscribe_to(Topic::SystemAlerts).into_stream(),
        bus.subscribe_to(Topic::CommandAcks).into_stream(),
        bus.subscribe_to(Topic::Telemetry).into_stream(),
    ]);

    while let Some(envelope) = messages.next().await {
        match envelope.payload {
            BusPayload::Event(event) => {
                let body = serde_json::to_string(&event).unwrap_or_default();
                println!("  {} {} {}", "evt".magenta(), event.name().bold(), body.dimmed());
            }
            BusPayload::ConnectionLost { channel } => {
                println!("  {} {} connection lost", "⚠".yellow().bold(), channel);
            }
            BusPayload::CommandAck(ack) => {
                debug!(command = %ack.command, ack = ?ack.ack, result = %ack.result, "command ack");
            }
            BusPayload::Telemetry(tel) => {
                debug!(telemetry = tel.name(), ?tel, "telemetry");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(csc: &PneumaticsCsc) {
    let cfg = csc.config();
    println!();
    println!(
        "  {} {}",
        "ATPneumatics".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    if csc.simulation_mode() == 1 {
        println!("  Controller: {}", "bundled simulator".yellow());
    } else {
        println!(
            "  Controller: {}:{} (telemetry {})",
            cfg.host.bold(),
            cfg.cmd_evt_port,
            cfg.telemetry_port
        );
    }
    println!("  Command timeout: {:?}", csc.cmd_done_timeout());
    println!();
}
