//! Command-line interface for statbucket.
//!
//! Loads a metric configuration and replays a JSON-lines recording of
//! pulls, events, condition and state changes into the configured engines.
//! Every `dump` line prints the resulting report as one JSON line.

pub mod replay;

pub use replay::{Replay, ReplayInput, ReplayPuller};

use crate::core::config::ConfigBuilder;
use crate::core::{Config, Result, StatError};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;

/// Windowed metric aggregation, replayed from a recording
#[derive(Parser, Debug)]
#[command(name = "statbucket")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Metric configuration file (YAML)
    #[arg(short, long, env = "STATBUCKET_CONFIG")]
    pub config: PathBuf,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// JSON-lines recording to replay; standard input when absent
    #[arg(short, long, env = "STATBUCKET_REPLAY")]
    pub replay: Option<PathBuf>,

    /// Time base that bucket boundaries align to, in nanoseconds
    #[arg(long, default_value_t = 0)]
    pub time_base_ns: i64,

    /// Start of the first bucket, in nanoseconds
    #[arg(long, default_value_t = 0)]
    pub start_ns: i64,

    /// Enable debug logging
    #[arg(short, long, env = "STATBUCKET_DEBUG")]
    pub debug: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load and validate the configuration file.
    pub async fn load_config(&self) -> Result<Config> {
        let content = tokio::fs::read_to_string(&self.config).await.map_err(|e| {
            StatError::config(format!("Failed to read config file {:?}: {}", self.config, e))
        })?;
        let config = ConfigBuilder::new().from_yaml(&content)?.build()?;
        tracing::info!(path = ?self.config, metrics = config.metrics.len(), "loaded configuration");
        Ok(config)
    }

    /// Initialize logging from the configuration, `--debug` and `RUST_LOG`.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let level = if self.debug {
            "debug"
        } else {
            config.logging.level.as_str()
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        // Reports go to stdout, logs to stderr
        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| StatError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the statbucket command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if cli.check_config {
        println!("Configuration is valid!");
        for metric in &config.metrics {
            println!(
                "  metric {}: bucket {:?}, fields {:?}, pulled {}, diff {}",
                metric.id, metric.bucket_size, metric.value_fields, metric.pulled, metric.use_diff
            );
        }
        return Ok(());
    }

    let mut replay = Replay::new(&config, cli.time_base_ns, cli.start_ns)?;
    let lines = match &cli.replay {
        Some(path) => {
            let content = tokio::fs::read_to_string(path).await?;
            replay_lines(&mut replay, content.lines().map(|l| Ok(l.to_string())))?
        },
        None => {
            let stdin = std::io::stdin();
            replay_lines(&mut replay, stdin.lock().lines())?
        },
    };
    tracing::info!(lines, "replay finished");
    Ok(())
}

fn replay_lines<I>(replay: &mut Replay, lines: I) -> Result<usize>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let mut count = 0;
    for (number, line) in lines.enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let input: ReplayInput = serde_json::from_str(line)
            .map_err(|e| StatError::parse(format!("line {}: {}", number + 1, e)))?;
        for report in replay.apply(input)? {
            println!("{}", serde_json::to_string(&report)?);
        }
        count += 1;
    }
    Ok(count)
}
