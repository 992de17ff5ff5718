//! `httpl`: dispatch one request through a configured mediator.
//!
//! ```text
//! httpl [--config FILE] [-X METHOD] [-H 'name: value']... [--timeout-ms N] [--data BODY] URL
//! ```
//!
//! Prints the settled response as JSON and exits non-zero when the request
//! failed, was aborted, or timed out.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use httpl_mesh::bridge::{LocalContextHost, ScriptRegistry};
use httpl_mesh::config::loader::load_config;
use httpl_mesh::observability::logging::init_logging;
use httpl_mesh::{build_mediator, MediatorConfig, Request};

#[derive(Parser)]
#[command(name = "httpl", version)]
#[command(about = "Dispatch a request through an httpl mediator", long_about = None)]
struct Cli {
    /// Mediator configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header as `name: value`; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Request body; sent as JSON when it parses as JSON
    #[arg(short, long)]
    data: Option<String>,

    url: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MediatorConfig::default(),
    };
    init_logging(&config.observability);

    let host = LocalContextHost::new(ScriptRegistry::new());
    let wiring = build_mediator(&config, &host)?;

    let mut request = Request::new(&cli.method, &cli.url);
    for raw in &cli.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| format!("invalid header '{}', expected 'name: value'", raw))?;
        request.headers.set(name.trim(), value.trim());
    }
    if let Some(ms) = cli.timeout_ms {
        request.timeout = Some(Duration::from_millis(ms));
    }
    if let Some(data) = cli.data {
        request.body = serde_json::from_str(&data).unwrap_or(Value::String(data));
    }

    tracing::debug!(method = %request.method, uri = %request.uri(), "Dispatching");
    let result = wiring.mediator.dispatch(request).await;
    let (response, code) = match result {
        Ok(response) => (response, ExitCode::SUCCESS),
        Err(error) => {
            tracing::debug!(error = %error, "Request failed");
            (error.into_response(), ExitCode::FAILURE)
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    wiring.shutdown();
    Ok(code)
}
