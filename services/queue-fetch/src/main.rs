//! Queue Fetch
//!
//! Single-shot CLI around the queue client:
//! 1. Loads config and the sessions file
//! 2. Builds an in-memory session pool and usage counter
//! 3. Sends one request through the rotating client
//! 4. Prints the response body to stdout
//!
//! Usage: `queue-fetch [--config PATH] [--method METHOD] URL [KEY=VALUE ...]`
//!
//! Exit codes: 0 on a response, 2 when the request was skipped (no usable
//! session or an upstream dependency failure), 1 on errors.

mod config;
mod metrics;
mod sessions;

use anyhow::{Context, Result, bail};
use queue_client::{DumpSink, HttpConnector, QueueClient, SessionResponse};
use session_pool::MemoryPool;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::Method;
use usage_counter::MemoryCounter;

use crate::config::Config;

/// Parsed command line
#[derive(Debug, PartialEq)]
struct Args {
    config: Option<String>,
    method: Method,
    url: String,
    params: Vec<(String, String)>,
}

impl Args {
    /// Parse arguments, excluding the program name.
    fn parse(args: &[String]) -> Result<Self> {
        let mut config = None;
        let mut method = Method::GET;
        let mut url = None;
        let mut params = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    config = Some(iter.next().context("--config needs a path")?.clone());
                }
                "--method" => {
                    let name = iter.next().context("--method needs a value")?;
                    method = Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                        .with_context(|| format!("invalid method: {name}"))?;
                }
                other if url.is_none() => url = Some(other.to_string()),
                other => {
                    let (key, value) = other
                        .split_once('=')
                        .with_context(|| format!("expected KEY=VALUE, got: {other}"))?;
                    params.push((key.to_string(), value.to_string()));
                }
            }
        }

        let Some(url) = url else {
            bail!("usage: queue-fetch [--config PATH] [--method METHOD] URL [KEY=VALUE ...]");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("url must start with http:// or https://, got: {url}");
        }

        Ok(Self {
            config,
            method,
            url,
            params,
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // JSON logs on stderr; stdout carries only the response body
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let prometheus_handle = metrics::install_recorder()?;

    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = Args::parse(&raw_args)?;

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let sessions = sessions::load(&config.sessions_file).with_context(|| {
        format!(
            "failed to load sessions from {}",
            config.sessions_file.display()
        )
    })?;

    info!(
        queue = %config.client.options.queue,
        sessions = sessions.len(),
        change = config.client.options.change,
        balanced = config.client.options.balanced,
        proxy = config.http.proxy.is_some(),
        "configuration loaded"
    );

    let pool = Arc::new(MemoryPool::new(sessions));
    let connector = HttpConnector::new(
        Duration::from_secs(config.http.timeout_secs),
        Duration::from_secs(config.http.connect_timeout_secs),
    )
    .with_proxy(config.http.proxy.clone());

    let mut client = QueueClient::new(
        pool.clone(),
        Arc::new(connector),
        config.client.options.clone(),
    )
    .with_counter(Arc::new(MemoryCounter::new()));

    if config.client.dump {
        let sink = match &config.client.dump_dir {
            Some(dir) => DumpSink::new(dir.clone()),
            None => DumpSink::in_temp_dir(),
        };
        info!(dir = %sink.dir().display(), "dumping responses");
        client = client.with_dump(sink);
    }

    let Args {
        method,
        url,
        params,
        ..
    } = args;
    let result = client
        .scoped(move |c| Box::pin(async move { c.request(method, &url, &params).await }))
        .await;

    info!(health = %pool.health().await, "session pool state");
    if let Some(path) = &config.metrics.snapshot_file
        && let Err(e) = metrics::write_snapshot(&prometheus_handle, path)
    {
        warn!(error = %e, "metrics snapshot not written");
    }

    match result {
        Ok(Some(SessionResponse {
            session_id,
            response,
        })) => {
            info!(session_id, status = response.status, bytes = response.body.len(), "response received");
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&response.body)
                .and_then(|()| stdout.write_all(b"\n"))
                .context("failed to write response body")?;
            Ok(ExitCode::SUCCESS)
        }
        Ok(None) => {
            warn!("request skipped, no response");
            Ok(ExitCode::from(2))
        }
        Err(e) => {
            error!(error = %e, "request failed");
            Err(e).context("request failed")
        }
    }
}
