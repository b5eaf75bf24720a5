//! `rehearse-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use rehearse_api::config::Config;
use rehearse_api::server::Server;
use rehearse_core::observability::{LogFormat, init_logging};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    init_logging(choose_log_format(&config));
    rehearse_api::metrics::init_metrics();

    // The AI evaluation backend is an external collaborator wired in by the
    // deployment; without one the in-process workers run the no-op evaluator.
    tracing::warn!("no evaluation backend wired; workers run the no-op evaluator");

    let server = Server::new(config);
    server.serve().await?;
    Ok(())
}
