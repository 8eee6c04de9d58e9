//! stepwise CLI: the main entry point.
//!
//! Exit status:
//! - `0` a final answer was produced
//! - `1` runtime failure, or the step budget ran out
//! - `2` usage or configuration error

use clap::Parser;
use std::process::ExitCode;
use stepwise_agent::EXHAUSTED_DIAGNOSTIC;
use stepwise_config::ConfigError;
use stepwise_core::error::ProviderError;

mod args;
mod run;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = args::Cli::parse();

    // Logs go to stderr; stdout carries only routed channel output
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = match run::load_config(&cli) {
        Ok(config) => config,
        Err(e @ ConfigError::ValidationError(_)) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run::execute(&cli, &config).await {
        Ok(run::Completion::Answered) => ExitCode::SUCCESS,
        Ok(run::Completion::Exhausted) => {
            eprintln!("error: {EXHAUSTED_DIAGNOSTIC}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {}", describe(&e));
            ExitCode::FAILURE
        }
    }
}

/// One diagnostic line; timeouts are called out.
fn describe(e: &anyhow::Error) -> String {
    let timed_out = e
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ProviderError>())
        .any(ProviderError::is_timeout);
    if timed_out {
        format!("request timed out: {e:#}")
    } else {
        format!("{e:#}")
    }
}
