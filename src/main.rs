use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sqsfill::config::{FileConfig, FillArgs, FillConfig};
use sqsfill::logging;
use sqsfill::output::OutputWriter;
use sqsfill::roles::attributes::{
    AttributesConfig, DEFAULT_ATTRIBUTE, DEFAULT_QUEUE, run_attributes, split_list,
};
use sqsfill::roles::filler::run_filler;
use sqsfill::transport::config::{normalize_region, parse_connect_kv, parse_engine};
use sqsfill::transport::{Transport, TransportBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span, warn};

#[derive(Parser)]
#[command(name = "sqsfill")]
#[command(about = "Fill a queue with any number of uniquely identified test messages")]
struct Cli {
    /// Run ID for tagging log output (random if omitted)
    #[arg(long)]
    run_id: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Snapshot interval in seconds for periodic stats logging (0 disables)
    #[arg(long, default_value = "1")]
    snapshot_interval: u64,

    /// YAML file with default fill settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send messages to a queue
    Fill(FillArgs),
    /// Print queue attributes
    Attr {
        /// Queue names (comma-separated)
        #[arg(short = 'q', long, default_value = DEFAULT_QUEUE)]
        queues: String,

        /// Attribute names (comma-separated)
        #[arg(short = 'a', long, default_value = DEFAULT_ATTRIBUTE)]
        attrs: String,

        /// Queue region
        #[arg(short = 'r', long, default_value = "us-east-1")]
        region: String,

        /// Transport engine (sqs/mock)
        #[arg(long, default_value = "sqs")]
        engine: String,

        /// Extra transport parameters as KEY=VALUE
        #[arg(long = "connect", value_name = "KEY=VALUE")]
        connect: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level)?;

    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let span = info_span!("run", run_id = %run_id);

    async move {
        match cli.command {
            Commands::Fill(args) => {
                let file = match &cli.config {
                    Some(path) => FileConfig::load(path)?,
                    None => FileConfig::default(),
                };
                fill(FillConfig::resolve(args, file)?, cli.snapshot_interval).await
            }
            Commands::Attr {
                queues,
                attrs,
                region,
                engine,
                connect,
            } => {
                let engine = parse_engine(&engine)
                    .with_context(|| format!("unknown engine {engine}"))?;
                let connect = parse_connect_kv(&connect).with("region", normalize_region(&region));
                run_attributes(AttributesConfig {
                    engine,
                    queues: split_list(&queues),
                    attributes: split_list(&attrs),
                    connect,
                })
                .await;
                Ok(())
            }
        }
    }
    .instrument(span)
    .await
}

async fn fill(config: FillConfig, snapshot_interval_secs: u64) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::from(
        TransportBuilder::connect(config.engine.clone(), config.connect.clone())
            .await
            .context("transport connect error")?,
    );
    transport
        .health_check()
        .await
        .context("queue health check failed")?;

    let mut output = match &config.csv {
        Some(path) => OutputWriter::new_csv(path)?,
        None => OutputWriter::new_stdout(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, stopping workers");
                cancel.cancel();
            }
        })
    };

    let summary = run_filler(
        &config,
        Arc::clone(&transport),
        &mut output,
        cancel,
        snapshot_interval_secs,
    )
    .await;
    ctrl_c.abort();
    transport
        .shutdown()
        .await
        .context("transport shutdown error")?;

    let summary = summary?;
    println!("{} messages sent", summary.total_sent);
    if !summary.is_complete() {
        bail!(
            "only {} of {} messages were sent",
            summary.total_sent,
            summary.requested
        );
    }
    Ok(())
}
