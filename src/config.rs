//! Fill configuration: CLI flags layered over an optional YAML file.

use crate::message::MAX_BATCH_SIZE;
use crate::plan::DEFAULT_PER_WORKER_INTERVAL;
use crate::transport::config::{normalize_region, parse_connect_kv, parse_engine};
use crate::transport::{ConnectOptions, Engine};
use crate::worker::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_COUNT: u64 = 1000;
pub const DEFAULT_BODY: &str = "Message_Body";
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("give either a body template or a body file, not both")]
    ConflictingTemplate,
    #[error("message body template is empty")]
    EmptyTemplate,
    #[error("reading template file {path}: {source}")]
    TemplateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("reading config file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("per-worker interval must be positive")]
    ZeroInterval,
    #[error("concurrency must be positive")]
    ZeroConcurrency,
    #[error("batch size {0} outside 1..={max}", max = MAX_BATCH_SIZE)]
    BatchSize(usize),
    #[error("queue name is required")]
    MissingQueue,
    #[error("unknown engine {0}")]
    UnknownEngine(String),
}

/// `fill` subcommand flags. Every field is optional so that unset flags fall
/// through to the config file.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct FillArgs {
    /// Name of queue to fill
    #[arg(short = 'q', long)]
    pub queue: Option<String>,

    /// Queue region (e.g., "us-east-1", "usw01")
    #[arg(short = 'r', long)]
    pub region: Option<String>,

    /// Custom service endpoint URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Message body template [default: Message_Body]
    #[arg(short = 'b', long)]
    pub body: Option<String>,

    /// Read message body template from file
    #[arg(short = 'f', long)]
    pub body_file: Option<PathBuf>,

    /// Number of messages to insert [default: 1000]
    #[arg(short = 'c', long)]
    pub count: Option<u64>,

    /// Fill queue non-concurrently
    #[arg(long)]
    pub serial: bool,

    /// Messages per concurrent work unit [default: 1000]
    #[arg(long)]
    pub interval: Option<u64>,

    /// Messages per batch, at most 10 [default: 10]
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum work units in flight [default: 16]
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Consecutive send failures tolerated per worker, 0 = unlimited [default: 10]
    #[arg(long)]
    pub max_failures: Option<u32>,

    /// Base retry backoff in ms, doubled per failure [default: 100]
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Retry backoff ceiling in ms [default: 5000]
    #[arg(long)]
    pub backoff_max_ms: Option<u64>,

    /// Per-send timeout in ms
    #[arg(long)]
    pub send_timeout_ms: Option<u64>,

    /// Batches per second per worker. If omitted or <= 0, runs at max speed
    #[arg(long, allow_hyphen_values = true)]
    pub rate: Option<f64>,

    /// Transport engine (sqs/mock) [default: sqs]
    #[arg(long)]
    pub engine: Option<String>,

    /// Extra transport parameters as KEY=VALUE
    #[arg(long = "connect", value_name = "KEY=VALUE")]
    pub connect: Vec<String>,

    /// Optional CSV progress file (stdout if omitted)
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

/// The same settings as [`FillArgs`], read from YAML.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub queue: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub body: Option<String>,
    pub body_file: Option<PathBuf>,
    pub count: Option<u64>,
    pub serial: Option<bool>,
    pub interval: Option<u64>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub max_failures: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
    pub rate: Option<f64>,
    pub engine: Option<String>,
    pub connect: BTreeMap<String, String>,
    pub csv: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Validated, immutable settings for one fill run.
#[derive(Debug, Clone)]
pub struct FillConfig {
    pub engine: Engine,
    /// Includes `queue`, `region` and `endpoint` when set.
    pub connect: ConnectOptions,
    pub body_template: Arc<str>,
    pub total_count: u64,
    pub serial: bool,
    pub per_worker_interval: NonZeroU64,
    pub max_batch_size: usize,
    pub concurrency: NonZeroUsize,
    pub retry: RetryPolicy,
    pub send_timeout: Option<Duration>,
    pub rate: Option<f64>,
    pub csv: Option<PathBuf>,
}

impl FillConfig {
    /// Resolve flags over file values over defaults, then validate.
    pub fn resolve(args: FillArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let engine_name = args.engine.or(file.engine).unwrap_or_else(|| "sqs".into());
        let engine =
            parse_engine(&engine_name).ok_or_else(|| ConfigError::UnknownEngine(engine_name))?;

        let queue = args.queue.or(file.queue).filter(|q| !q.is_empty());
        if engine == Engine::Sqs && queue.is_none() {
            return Err(ConfigError::MissingQueue);
        }

        let mut connect = ConnectOptions {
            params: file.connect,
        };
        connect.params.extend(parse_connect_kv(&args.connect).params);
        if let Some(queue) = queue {
            connect.params.insert("queue".into(), queue);
        }
        if let Some(region) = args.region.or(file.region) {
            connect.params.insert("region".into(), normalize_region(&region));
        }
        if let Some(endpoint) = args.endpoint.or(file.endpoint) {
            connect.params.insert("endpoint".into(), endpoint);
        }

        // Template source is taken whole from the CLI when it names one.
        let (body, body_file) = if args.body.is_some() || args.body_file.is_some() {
            (args.body, args.body_file)
        } else {
            (file.body, file.body_file)
        };
        let body_template = resolve_template(body, body_file)?;

        let per_worker_interval =
            NonZeroU64::new(args.interval.or(file.interval).unwrap_or(DEFAULT_PER_WORKER_INTERVAL))
                .ok_or(ConfigError::ZeroInterval)?;
        let concurrency =
            NonZeroUsize::new(args.concurrency.or(file.concurrency).unwrap_or(DEFAULT_CONCURRENCY))
                .ok_or(ConfigError::ZeroConcurrency)?;
        let max_batch_size = args.batch_size.or(file.batch_size).unwrap_or(MAX_BATCH_SIZE);
        if !(1..=MAX_BATCH_SIZE).contains(&max_batch_size) {
            return Err(ConfigError::BatchSize(max_batch_size));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_consecutive_failures: args
                .max_failures
                .or(file.max_failures)
                .unwrap_or(defaults.max_consecutive_failures),
            backoff_base: args
                .backoff_ms
                .or(file.backoff_ms)
                .map_or(defaults.backoff_base, Duration::from_millis),
            backoff_max: args
                .backoff_max_ms
                .or(file.backoff_max_ms)
                .map_or(defaults.backoff_max, Duration::from_millis),
        };

        Ok(Self {
            engine,
            connect,
            body_template,
            total_count: args.count.or(file.count).unwrap_or(DEFAULT_COUNT),
            serial: args.serial || file.serial.unwrap_or(false),
            per_worker_interval,
            max_batch_size,
            concurrency,
            retry,
            send_timeout: args
                .send_timeout_ms
                .or(file.send_timeout_ms)
                .map(Duration::from_millis),
            rate: args.rate.or(file.rate).filter(|r| *r > 0.0),
            csv: args.csv.or(file.csv),
        })
    }
}

fn resolve_template(
    body: Option<String>,
    body_file: Option<PathBuf>,
) -> Result<Arc<str>, ConfigError> {
    let template = match (body, body_file) {
        (Some(_), Some(_)) => return Err(ConfigError::ConflictingTemplate),
        (Some(body), None) => body,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::TemplateFile { path, source })?,
        (None, None) => DEFAULT_BODY.to_string(),
    };
    if template.is_empty() {
        return Err(ConfigError::EmptyTemplate);
    }
    Ok(Arc::from(template))
}
