//! Transport abstraction: trait, types, and builder factory.

pub mod config;
#[cfg(any(test, feature = "transport-mock"))]
pub mod mock;
#[cfg(feature = "transport-sqs")]
pub mod sqs;

use crate::message::Batch;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    Sqs,
    #[cfg(any(test, feature = "transport-mock"))]
    Mock,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub params: BTreeMap<String, String>,
}

impl ConnectOptions {
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("send: {0}")]
    Send(String),
    #[error("rejected {failed} of {total} entries: {detail}")]
    Rejected {
        failed: usize,
        total: usize,
        detail: String,
    },
    #[error("attributes: {0}")]
    Attributes(String),
    #[error("timeout")]
    Timeout,
    #[error("disconnected")]
    Disconnected,
    #[error("other: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Disconnected)
    }
}

/// A connection to one queue.
///
/// Senders handed out by [`Transport::create_sender`] are private to the
/// caller. The scheduler creates one per work unit and never shares a
/// handle between workers, so `QueueSender` implementations need not be
/// reentrant.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn create_sender(&self) -> Result<Box<dyn QueueSender>, TransportError>;
    /// Look up queue attributes by name, returned in request order.
    async fn queue_attributes(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, String)>, TransportError>;
    async fn shutdown(&self) -> Result<(), TransportError>;
    async fn health_check(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
pub trait QueueSender: Send {
    /// Submit one batch. Partial acceptance is reported as an error; the
    /// caller counts the whole batch as lost.
    async fn send_batch(&mut self, batch: Batch) -> Result<(), TransportError>;
}

pub struct TransportBuilder;

impl TransportBuilder {
    pub async fn connect(
        engine: Engine,
        opts: ConnectOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match engine {
            Engine::Sqs => {
                #[cfg(feature = "transport-sqs")]
                {
                    crate::transport::sqs::connect(opts).await
                }
                #[cfg(not(feature = "transport-sqs"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("sqs feature disabled".into()))
                }
            }
            #[cfg(any(test, feature = "transport-mock"))]
            Engine::Mock => crate::transport::mock::connect(opts).await,
        }
    }
}
