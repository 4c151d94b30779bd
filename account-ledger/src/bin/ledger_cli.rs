//! Ledger command-line front end
//!
//! Reads one JSON request per line from stdin, for example
//! `{"caller":"alice@example.com","op":"deposit","amount":"50"}`, and writes
//! one JSON outcome per line to stdout. Logs go to stderr.

use account_ledger::{
    AccountId, CallerContext, Config, FlashCategory, Gateway, Ledger, OperationRequest, Outcome,
};
use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Deserialize)]
struct RequestLine {
    caller: String,
    #[serde(flatten)]
    request: OperationRequest,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let json = std::env::var("LEDGER_LOG_JSON").map(|v| v == "1").unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config() -> anyhow::Result<Config> {
    match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading config from {}", path)),
        Err(_) => Config::from_env().context("loading config from environment"),
    }
}

fn malformed(reason: impl std::fmt::Display) -> Outcome {
    Outcome {
        success: false,
        category: FlashCategory::Danger,
        message: format!("Malformed request: {}", reason),
        balance: None,
        error: None,
        operation_id: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting account ledger");

    let config = load_config()?;
    let ledger = Ledger::open(&config)
        .with_context(|| format!("opening ledger at {}", config.data_dir.display()))?;
    tracing::info!(data_dir = %config.data_dir.display(), "Ledger opened successfully");

    let gateway = Gateway::new(ledger);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<RequestLine>(&line) {
            Ok(parsed) => match AccountId::parse(&parsed.caller) {
                Some(caller) => {
                    gateway
                        .handle(&CallerContext::authenticated(caller), parsed.request)
                        .await
                }
                None => malformed("caller is empty"),
            },
            Err(e) => malformed(e),
        };

        println!("{}", serde_json::to_string(&outcome)?);
    }

    tracing::debug!(metrics = %gateway.ledger().metrics().render(), "Final metrics");
    tracing::info!("Shutting down account ledger");
    Ok(())
}
