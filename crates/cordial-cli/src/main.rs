//! `cordial` - connect to the gateway and log what happens.
//!
//! Loads layered configuration, installs logging, logs in and runs the
//! session until Ctrl+C or a disconnect with reconnecting disabled.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cordial_config::Config;
use cordial_events::{EventBus, FilterSubscriber, GatewayEvent};
use cordial_gateway::GatewayClient;
use tracing::{debug, info};

mod config_bridge;

/// Cordial - stateful gateway client.
#[derive(Parser, Debug)]
#[command(name = "cordial")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bot token (overrides config and CORDIAL_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Log level filter
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: pretty, compact, json or full
    #[arg(long)]
    log_format: Option<String>,

    /// Exit instead of reconnecting after a disconnect
    #[arg(long)]
    no_reconnect: bool,

    /// Shard assignment as INDEX/COUNT
    #[arg(long, value_parser = parse_shard)]
    shard: Option<[u32; 2]>,
}

impl Cli {
    /// Command-line flags win over every config layer.
    fn apply(&self, cfg: &mut Config) {
        if let Some(token) = &self.token {
            cfg.gateway.token = Some(token.clone());
        }
        if let Some(level) = &self.log_level {
            cfg.logging.level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            cfg.logging.format.clone_from(format);
        }
        if self.no_reconnect {
            cfg.gateway.auto_reconnect = false;
        }
        if let Some(shard) = self.shard {
            cfg.gateway.shard = Some(shard);
        }
    }
}

fn parse_shard(raw: &str) -> Result<[u32; 2], String> {
    let (index, count) = raw
        .split_once('/')
        .ok_or_else(|| format!("expected INDEX/COUNT, got {raw:?}"))?;
    let index = index
        .trim()
        .parse()
        .map_err(|e| format!("bad shard index: {e}"))?;
    let count = count
        .trim()
        .parse()
        .map_err(|e| format!("bad shard count: {e}"))?;
    Ok([index, count])
}

fn log_event(event: &GatewayEvent) {
    let meta = event.metadata();
    if event.is_lifecycle() {
        info!(event = event.event_type(), seq = ?meta.sequence, "{event:?}");
    } else {
        debug!(event = event.event_type(), seq = ?meta.sequence, source = %meta.source, "Event");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut cfg);

    if let Err(e) = cordial_telemetry::setup_logging(&config_bridge::to_log_config(&cfg)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let gateway_config = config_bridge::to_gateway_config(&cfg)?;
    let bus = EventBus::new();
    bus.registry()
        .register(Arc::new(FilterSubscriber::new("cli-log", log_event)));

    let client = GatewayClient::builder(gateway_config)
        .event_bus(bus)
        .login()
        .await
        .context("login failed")?;
    let handle = client.handle();
    let mut run = tokio::spawn(client.run());

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        result = &mut run => {
            result??;
            false
        },
    };

    if interrupted {
        info!("Interrupted, shutting down");
        handle.shutdown();
        run.await??;
    }
    Ok(())
}
