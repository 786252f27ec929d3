//! Console driver for the transition engine.
//!
//! Reads one JSON payload per line from stdin and dispatches it to the
//! configured senders. Frames are written to the log instead of the network.
//! On end of input every sender is shut down and its frame persisted.
//!
//! Run with: cargo run --bin dmx-fade -- --config stage.json --database frames.db

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use dmx_transitions::{
    Controller, ControllerConfig, DmxOutput, FrameStore, LogOutput, MemoryFrameStore, Payload,
    SenderConfig, SqliteFrameStore,
};

/// Timed DMX fades and pan/tilt arcs driven from stdin.
#[derive(Parser, Debug)]
#[command(name = "dmx-fade")]
#[command(version)]
#[command(long_about = None)]
struct Args {
    /// Controller configuration (JSON). Without it a single sender on
    /// universe 0:0:0 is used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite file persisting channel values between runs.
    #[arg(short, long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(args: &Args) -> Result<ControllerConfig, Box<dyn std::error::Error>> {
    match &args.config {
        Some(path) => Ok(ControllerConfig::load(path)?),
        None => {
            let config = ControllerConfig {
                name: "dmx-fade".to_string(),
                senders: vec![SenderConfig::new("default")],
                ..ControllerConfig::default()
            };
            config.validate()?;
            Ok(config)
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args)?;
    let store: Arc<dyn FrameStore> = match &args.database {
        Some(path) => Arc::new(SqliteFrameStore::open(path).await?),
        None => Arc::new(MemoryFrameStore::new()),
    };

    let controller = Controller::start(config, store, |sender| -> Box<dyn DmxOutput> {
        Box::new(LogOutput::new(format!("out {}", sender.label())))
    })
    .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let payload = match Payload::from_json(line) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("[dmx-fade] {}", e);
                continue;
            }
        };
        match controller.dispatch(payload).await {
            Ok(id) => log::debug!("[dmx-fade] handled by sender {}", id),
            Err(e) => log::warn!("[dmx-fade] {}", e),
        }
    }

    for (id, result) in controller.shutdown_all().await {
        if let Err(e) = result {
            log::error!("[dmx-fade] sender {} did not shut down cleanly: {}", id, e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_tracing(&args);
    if let Err(e) = run(args).await {
        log::error!("dmx-fade failed: {}", e);
        std::process::exit(1);
    }
}
