use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;

/// One aggregator observation, emitted after each completion report.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub worker_id: u32,
    pub sent_count: u64,
    pub running_total: u64,
    pub outcome: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub trait ProgressSink: Send {
    fn observe(&mut self, event: &ProgressEvent) -> Result<()>;
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

pub enum OutputWriter {
    Csv(csv::Writer<File>),
    Stdout,
}

impl OutputWriter {
    pub fn new_csv(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).ok();
            }
        }
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating CSV output {}", path.display()))?;
        tracing::info!("Writing progress CSV to: {}", path.display());
        Ok(Self::Csv(writer))
    }

    pub fn new_stdout() -> Self {
        Self::Stdout
    }
}

impl ProgressSink for OutputWriter {
    fn observe(&mut self, event: &ProgressEvent) -> Result<()> {
        match self {
            Self::Csv(writer) => {
                writer.serialize(event)?;
                // Flush so external tail/readers see progress promptly
                writer.flush()?;
            }
            Self::Stdout => {
                let note = if event.outcome == "completed" {
                    String::new()
                } else {
                    format!(" ({})", event.outcome)
                };
                println!(
                    "[worker {:02}] sent {} messages; total: {}{}",
                    event.worker_id, event.sent_count, event.running_total, note
                );
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Self::Csv(writer) = self {
            writer.flush()?;
        }
        Ok(())
    }
}
