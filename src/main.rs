//! reqtest: probe how an HTTP endpoint handles growing payloads
//!
//! Two modes:
//! - `listen <address>`: serve HTTP and log the body size of every non-GET
//!   request, optionally waiting `--resp-delay` before reading the body
//! - `send <url>`: PUT random hex payloads of 2^start-step .. 2^end-step
//!   bytes, stopping at the first transport error or non-200 response
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod listener;
mod payload;
mod sender;

use clap::{CommandFactory, Parser};
use config::{CliArgs, Command, Config, ListenConfig, Mode, SendConfig};
use listener::Listener;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = match CliArgs::try_parse() {
        Ok(cli) => cli,
        Err(e) if config::is_usage_error(e.kind()) => {
            eprint!("{}", e.render());
            return ExitCode::FAILURE;
        }
        Err(e) => e.exit(),
    };

    let log_level = cli.log_level.clone();
    let mode_name = cli.command.as_ref().map(Command::mode_name);

    // Load configuration
    let config = match Config::from_cli(cli) {
        Ok(Some(config)) => config,
        Ok(None) => {
            println!("{}", CliArgs::command().render_help());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            init_logging(&log_level);
            match mode_name {
                Some(mode) => error!("failed to {}: {}", mode, e),
                None => error!("{}", e),
            }
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log_level);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match config.mode {
        Mode::Listen(listen) => runtime.block_on(run_listen(listen)),
        Mode::Send(send) => runtime.block_on(run_send(send)),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_listen(config: ListenConfig) -> ExitCode {
    info!(
        address = %config.address,
        resp_delay = %humantime::format_duration(config.resp_delay),
        "Starting listener"
    );

    let result = match Listener::bind(&config).await {
        Ok(listener) => listener.run().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("failed to listen: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_send(config: SendConfig) -> ExitCode {
    match sender::run(&config).await {
        Ok(report) => {
            info!(
                requests = report.requests,
                bytes = report.bytes,
                elapsed = ?report.elapsed,
                "All requests acknowledged"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("failed to send: {}", e);
            ExitCode::FAILURE
        }
    }
}
