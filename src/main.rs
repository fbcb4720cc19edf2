//! Agentform - Agent Lifecycle Controller
//!
//! Main entry point: handles one lifecycle event per run.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use agentform::core::config::{ApiConfig, BackendType, LoggingConfig};
use agentform::core::logging;
use agentform::event::types::{parse_event_json, response_url};
use agentform::event::ResponseSender;
use agentform::{AgentformError, Config, EventDispatcher};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Remote agent management API
    Http,
    /// In-process simulation, for dry runs
    Memory,
}

/// Agentform - provisions hosted agents as custom resources
#[derive(Parser, Debug)]
#[command(name = "agentform")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lifecycle event JSON file ("-" or omitted reads stdin)
    #[arg(long, short = 'e')]
    event: Option<PathBuf>,

    /// Config file (defaults to the user config dir)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Management API backend
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Invocation timeout in seconds, including the reporting margin
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Enable debug output
    #[arg(long, short = 'd')]
    debug: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

async fn read_event(path: Option<&PathBuf>) -> agentform::Result<String> {
    match path {
        Some(path) if path.as_os_str() != "-" => {
            tokio::fs::read_to_string(path).await.map_err(|e| {
                AgentformError::invalid_event(format!(
                    "reading event from {}: {}",
                    path.display(),
                    e
                ))
            })
        }
        _ => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .map_err(|e| AgentformError::invalid_event(format!("reading event from stdin: {}", e)))?;
            Ok(input)
        }
    }
}

/// Read the event and parse it as JSON
async fn load_event(path: Option<&PathBuf>) -> agentform::Result<Value> {
    parse_event_json(&read_event(path).await?)
}

/// Configuration with CLI overrides applied; validated later, per event
fn build_config(args: &Args) -> agentform::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let _ = dotenvy::dotenv();
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };

    if let Some(backend) = args.backend {
        config.api.backend = match backend {
            Backend::Http => BackendType::Http,
            Backend::Memory => BackendType::Memory,
        };
    }

    if let Some(timeout) = args.timeout_secs {
        config.controller.invocation_timeout_secs = timeout;
    }

    if args.debug {
        config.logging.debug = true;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::default_config_toml());
        return Ok(());
    }

    let config = build_config(&args);
    match &config {
        Ok(config) => logging::init(&config.logging),
        Err(_) => logging::init(&LoggingConfig {
            debug: args.debug,
            ..LoggingConfig::default()
        }),
    }
    let response_timeout = config
        .as_ref()
        .map(|c| c.api.timeout_secs)
        .unwrap_or_else(|_| ApiConfig::default().timeout_secs);

    // Every failure from here on is reported, never returned early
    let (raw, outcome) = match (load_event(args.event.as_ref()).await, config) {
        (Err(e), _) => (Value::Null, EventDispatcher::reject(&Value::Null, e)),
        (Ok(raw), Err(e)) => {
            let outcome = EventDispatcher::reject(&raw, e);
            (raw, outcome)
        }
        (Ok(raw), Ok(config)) => {
            let outcome = EventDispatcher::invoke(&config, &raw).await;
            (raw, outcome)
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome.to_provider_json())?);

    if let Some(url) = response_url(&raw) {
        let sender = ResponseSender::new(Duration::from_secs(response_timeout))?;
        sender
            .send(url, &outcome.response_document(&raw))
            .await
            .context("delivering custom resource response")?;
    }

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
