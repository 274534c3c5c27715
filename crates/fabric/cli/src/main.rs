//! fabricctl - drive an Entity Fabric from the command line
//!
//! - `demo`: bootstrap from configuration, then register, amplify and
//!   synchronize one entity, printing each result as JSON
//! - `check-config`: load and validate configuration, print the effective
//!   settings

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fabric_core::{
    Bootstrap, CompositeSink, FabricConfig, KindConfig, MemorySink, OperationSink,
    SubscriberFactory, SubscriberName, TracingSink, TracingSubscriber,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entity Fabric CLI
#[derive(Parser)]
#[command(name = "fabricctl")]
#[command(about = "Entity Fabric - registry, metric synthesis and subscriber fan-out", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FABRIC_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "FABRIC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "FABRIC_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register, amplify and synchronize one entity
    Demo {
        /// Entity id
        #[arg(long, default_value = "a1")]
        id: String,

        /// Kind to register under (defaults to the configured default kind)
        #[arg(long)]
        kind: Option<String>,

        /// Number of synchronize rounds after registration
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = FabricConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Demo { id, kind, rounds } => demo(config, &id, kind, rounds).await,
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn demo(mut config: FabricConfig, id: &str, kind: Option<String>, rounds: u32) -> Result<()> {
    let kind = match kind {
        Some(kind) => kind,
        None => config.default_kind.to_string(),
    };

    // Without configured subscribers the demo wires two logging peers
    if !config.kinds.iter().any(|k| k.name.as_str() == kind) {
        config.kinds.push(KindConfig {
            name: kind.parse()?,
            subscribers: vec![
                SubscriberName::parse("log.audit")?,
                SubscriberName::parse("log.metrics")?,
            ],
        });
    }

    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn OperationSink> = Arc::new(
        CompositeSink::new()
            .with(Arc::new(TracingSink))
            .with(memory.clone()),
    );
    let factory = SubscriberFactory::with_builtins()
        .fallback(|name| Arc::new(TracingSubscriber::new(name)));
    let fabric = Bootstrap::new(config, factory)
        .with_sink(sink)
        .build()
        .context("bootstrapping fabric")?;

    let record = fabric.register_as(&kind, id, json!({"round": 0}), "primary")?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    for round in 1..=rounds {
        let synced = fabric
            .synchronize(id, json!({"round": round}), "secondary")
            .await?;
        println!("{}", serde_json::to_string_pretty(&synced.dispatch)?);
        if !synced.dispatch.all_delivered() {
            info!(
                round,
                failed = synced.dispatch.failed_count(),
                "Some subscribers did not acknowledge"
            );
        }
    }

    let stats = fabric.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        operations = memory.len(),
        events = fabric.events().total(),
        "Demo complete"
    );
    Ok(())
}
