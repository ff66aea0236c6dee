pub mod config;
pub mod core;
pub mod error;
pub mod input;
pub mod services;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

pub use crate::config::SinkConfig;
pub use crate::core::{
    DestinationSpec, Direction, ElementType, FanoutEngine, SampleBuffer, StatusSnapshot, SwapWidth,
};
pub use crate::error::{Result, SinkError};
pub use crate::input::{InputPorts, SampleSource};
pub use crate::services::SinkService;

/// Command-line arguments of the `fanout-sink` binary.
#[derive(Debug, Parser)]
#[command(name = "fanout-sink", version, about = "Fan a sample stream out to TCP destinations")]
pub struct Args {
    /// JSON configuration file; re-read whenever it changes.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Element type of the input stream. Overrides the configuration file.
    #[arg(short, long)]
    pub element_type: Option<ElementType>,

    /// Raw native-endian input file, or `-` for stdin.
    #[arg(short, long, default_value = "-")]
    pub input: String,

    /// Log level for this crate; `RUST_LOG` is used when absent.
    #[arg(long)]
    pub log_level: Option<String>,
}

pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in fanout-sink: {info}");
        default_hook(info);
    }));

    let filter = match &args.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(format!("fanout_sink={level}")),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "fanout_sink=info".into()),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(serve(args))
}

async fn serve(args: Args) -> anyhow::Result<()> {
    let cfg = SinkConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let element = args.element_type.unwrap_or(cfg.element_type);

    let engine = Arc::new(FanoutEngine::tcp());
    let applied = engine.reconcile(cfg.connections);
    let profile = engine.swap_profile();
    tracing::info!(
        "{} destinations configured, input element type {element}, swapping on {} ports",
        applied.len(),
        match (profile.any_connection_swaps, profile.all_connections_swap) {
            (false, _) => "no",
            (true, true) => "all",
            (true, false) => "some",
        }
    );

    let source = if args.input == "-" {
        input::spawn_reader(element, std::io::stdin())?
    } else {
        let file = std::fs::File::open(&args.input)
            .with_context(|| format!("failed to open input {}", args.input))?;
        input::spawn_reader(element, file)?
    };
    let mut inputs = InputPorts::new();
    inputs.add(Box::new(source));

    let service = SinkService::start(Arc::clone(&engine), inputs)?;
    let reporter = SinkService::start_stats_reporter(Arc::clone(&engine));
    let watcher = SinkService::start_config_watcher(Arc::clone(&engine), args.config.clone());

    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = poll.tick() => {
                if service.is_finished() {
                    break;
                }
            }
        }
    }

    reporter.abort();
    watcher.abort();
    tokio::task::spawn_blocking(move || drop(service))
        .await
        .context("service shutdown failed")?;
    tracing::info!(
        "Final: {}, {} swap transforms",
        services::summarize(&engine.status()),
        engine.transforms_performed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["fanout-sink", "--config", "sink.json"]).unwrap();
        assert_eq!(args.config, PathBuf::from("sink.json"));
        assert_eq!(args.element_type, None);
        assert_eq!(args.input, "-");
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_args_element_type_case_insensitive() {
        let args = Args::try_parse_from([
            "fanout-sink",
            "-c",
            "sink.json",
            "--element-type",
            "Double",
            "--input",
            "capture.bin",
        ])
        .unwrap();
        assert_eq!(args.element_type, Some(ElementType::Double));
        assert_eq!(args.input, "capture.bin");
    }

    #[test]
    fn test_args_reject_unknown_element_type() {
        assert!(Args::try_parse_from(["fanout-sink", "-c", "x", "-e", "int128"]).is_err());
    }

    #[test]
    fn test_args_require_config() {
        assert!(Args::try_parse_from(["fanout-sink"]).is_err());
    }
}
