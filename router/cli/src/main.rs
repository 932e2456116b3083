//! MCP Router - Command-Line Surface
//!
//! Loads the router configuration, registers every handler declared in it,
//! and runs one routing operation. Results go to stdout as JSON; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! # Which handlers would answer?
//! mcp-router route "design a secure REST API"
//!
//! # Dispatch twice; the second run is served from the cache
//! mcp-router dispatch "design a secure REST API" --context team=platform --repeat 2
//!
//! # Registry snapshot with live health
//! mcp-router status
//!
//! # Prometheus metrics after dispatching a request
//! mcp-router metrics --prometheus --request "design a secure REST API"
//!
//! # Custom config and verbose logging
//! mcp-router --config ./router.toml --log-level debug status
//! ```

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use mcp_router_core::{
    default_config_path, load_config_from_path, ConfigOverrides, DomainRouter, HandlerResult,
    RequestContext, RouterConfigFile,
};

use handlers::StaticHandler;

/// MCP Router - route requests to the domain handlers best suited to answer them
#[derive(Parser, Debug)]
#[command(name = "mcp-router")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MCP_ROUTER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "MCP_ROUTER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Maximum handlers invoked in parallel
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank handlers for a request without invoking them
    Route {
        /// Request text
        text: String,

        /// Maximum handlers to select
        #[arg(short = 'm', long)]
        max_domains: Option<usize>,
    },

    /// Route a request and invoke the selected handlers
    Dispatch {
        /// Request text
        text: String,

        /// Maximum handlers to select
        #[arg(short = 'm', long)]
        max_domains: Option<usize>,

        /// Context entry passed to handlers (repeatable)
        #[arg(short = 'x', long = "context", value_name = "KEY=VALUE", value_parser = parse_context_pair)]
        context: Vec<(String, serde_json::Value)>,

        /// Dispatch the same request this many times
        #[arg(
            short = 'r',
            long,
            default_value_t = 1,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        repeat: u64,
    },

    /// Print the registry snapshot with live health
    Status,

    /// Print overall and per-handler metrics
    Metrics {
        /// Emit Prometheus text instead of JSON
        #[arg(long)]
        prometheus: bool,

        /// Dispatch these requests first (repeatable)
        #[arg(long = "request", value_name = "TEXT")]
        requests: Vec<String>,
    },
}

/// One dispatch run in `dispatch` output
#[derive(Serialize)]
struct DispatchRun {
    run: u64,
    results: Vec<HandlerResult>,
}

/// Parse `KEY=VALUE`; VALUE is read as JSON when it parses, else as a string
fn parse_context_pair(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("mcp_router_cli={level},mcp_router_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Resolve configuration: defaults, file, environment, then CLI flags
fn resolve_config(args: &Args) -> Result<RouterConfigFile> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load router configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(max) = args.max_concurrent {
        overrides = overrides.with_max_concurrent_handlers(max);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line override")?;

    info!(
        source = %config.source(),
        handlers = config.handlers.len(),
        "Configuration resolved"
    );
    Ok(config)
}

/// Build a router with every configured handler registered
fn build_router(config: &RouterConfigFile) -> Result<DomainRouter> {
    let router = DomainRouter::new(config.router.clone());
    for entry in &config.handlers {
        router
            .register(
                entry.descriptor.clone(),
                Arc::new(StaticHandler::new(entry.clone())),
            )
            .with_context(|| format!("Failed to register handler '{}'", entry.descriptor.id))?;
    }
    if router.registry().is_empty() {
        tracing::warn!("No handlers configured; every request will route to nothing");
    }
    Ok(router)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;
    let router = build_router(&config)?;
    let default_max = config.router.default_max_domains;

    match args.command {
        Command::Route { text, max_domains } => {
            let matches = router.route_with_limit(&text, max_domains.unwrap_or(default_max))?;
            print_json(&matches)
        }

        Command::Dispatch {
            text,
            max_domains,
            context,
            repeat,
        } => {
            let context: RequestContext = context.into_iter().collect();
            let max_domains = max_domains.unwrap_or(default_max);

            let mut runs = Vec::new();
            for run in 1..=repeat {
                let results = router
                    .dispatch_with_limit(&text, &context, max_domains)
                    .await?;
                runs.push(DispatchRun { run, results });
            }
            print_json(&runs)
        }

        Command::Status => print_json(&router.status().await),

        Command::Metrics {
            prometheus,
            requests,
        } => {
            let context = RequestContext::new();
            for text in &requests {
                router.dispatch(text, &context).await?;
            }

            let tracker = router.tracker();
            if prometheus {
                print!("{}", tracker.to_prometheus());
                Ok(())
            } else {
                print_json(&serde_json::json!({
                    "overall": tracker.overall_stats(),
                    "handlers": tracker.all_stats(),
                    "cache": router.cache().stats(),
                    "dispatcher": router.dispatcher_stats(),
                }))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    run(args).await
}
