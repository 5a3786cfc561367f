//! In-memory queue for tests and dry runs.
//!
//! Every sender handle shares one [`MockState`], so a test can keep a clone of
//! the [`MockTransport`] and inspect what the workers delivered.

use super::{ConnectOptions, QueueSender, Transport, TransportError};
use crate::message::{Batch, MAX_BATCH_SIZE};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Fail this many calls on each new sender handle before succeeding.
    pub fail_first: u32,
    pub fail_always: bool,
    pub latency: Duration,
    pub queue: Option<String>,
}

impl MockOptions {
    /// Reads `fail_first`, `fail_always`, `latency_ms` and `queue`.
    pub fn from_connect(opts: &ConnectOptions) -> Result<Self, TransportError> {
        let number = |key: &str| -> Result<u64, TransportError> {
            opts.get(key).map_or(Ok(0), |v| {
                v.parse()
                    .map_err(|_| TransportError::Connect(format!("invalid {key}: {v}")))
            })
        };
        Ok(Self {
            fail_first: number("fail_first")? as u32,
            fail_always: matches!(opts.get("fail_always"), Some("true" | "1")),
            latency: Duration::from_millis(number("latency_ms")?),
            queue: opts.get("queue").map(str::to_string),
        })
    }
}

#[derive(Default)]
struct MockState {
    delivered: AtomicU64,
    send_calls: AtomicU64,
    senders: AtomicU64,
    duplicate_ids: AtomicU64,
    batch_sizes: Mutex<Vec<usize>>,
    ids: Mutex<HashSet<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct MockTransport {
    options: MockOptions,
    state: Arc<MockState>,
}

pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(MockTransport::new(MockOptions::from_connect(&opts)?)))
}

impl MockTransport {
    pub fn new(options: MockOptions) -> Self {
        Self {
            options,
            state: Arc::new(MockState::default()),
        }
    }

    /// Messages accepted so far across all senders.
    pub fn delivered(&self) -> u64 {
        self.state.delivered.load(Ordering::SeqCst)
    }

    /// Calls to `send_batch`, failed ones included.
    pub fn send_calls(&self) -> u64 {
        self.state.send_calls.load(Ordering::SeqCst)
    }

    pub fn senders_created(&self) -> u64 {
        self.state.senders.load(Ordering::SeqCst)
    }

    pub fn duplicate_ids(&self) -> u64 {
        self.state.duplicate_ids.load(Ordering::SeqCst)
    }

    /// Sizes of accepted batches in arrival order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.state.batch_sizes).clone()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn create_sender(&self) -> Result<Box<dyn QueueSender>, TransportError> {
        self.state.senders.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSender {
            options: self.options.clone(),
            state: Arc::clone(&self.state),
            calls: 0,
        }))
    }

    async fn queue_attributes(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, String)>, TransportError> {
        let queue = self.options.queue.as_deref().unwrap_or("mock");
        names
            .iter()
            .map(|name| {
                let value = match name.as_str() {
                    "ApproximateNumberOfMessages" => self.delivered().to_string(),
                    "ApproximateNumberOfMessagesNotVisible" => "0".to_string(),
                    "QueueArn" => format!("arn:aws:sqs:mock:000000000000:{queue}"),
                    other => {
                        return Err(TransportError::Attributes(format!(
                            "unknown attribute {other}"
                        )));
                    }
                };
                Ok((name.clone(), value))
            })
            .collect()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct MockSender {
    options: MockOptions,
    state: Arc<MockState>,
    calls: u32,
}

#[async_trait::async_trait]
impl QueueSender for MockSender {
    async fn send_batch(&mut self, batch: Batch) -> Result<(), TransportError> {
        self.calls += 1;
        self.state.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.options.latency.is_zero() {
            tokio::time::sleep(self.options.latency).await;
        }
        if self.options.fail_always || self.calls <= self.options.fail_first {
            return Err(TransportError::Send("injected failure".into()));
        }
        if batch.is_empty() || batch.len() > MAX_BATCH_SIZE {
            return Err(TransportError::Rejected {
                failed: batch.len(),
                total: batch.len(),
                detail: "batch size out of range".into(),
            });
        }

        let len = batch.len();
        {
            let mut ids = lock(&self.state.ids);
            for msg in batch {
                if !ids.insert(msg.id) {
                    self.state.duplicate_ids.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        lock(&self.state.batch_sizes).push(len);
        self.state.delivered.fetch_add(len as u64, Ordering::SeqCst);
        Ok(())
    }
}
