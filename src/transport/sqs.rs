//! Amazon SQS adapter (feature `transport-sqs`), using `SendMessageBatch`.
use super::{ConnectOptions, QueueSender, Transport, TransportError};
use crate::message::Batch;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use aws_sdk_sqs::types::{QueueAttributeName, SendMessageBatchRequestEntry};

pub struct SqsTransport {
    client: Client,
    queue_url: String,
}

/// Connect using credentials from the environment.
///
/// Recognized params: `queue` (required), `region`, `endpoint`.
pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    let queue = opts
        .get("queue")
        .filter(|q| !q.is_empty())
        .ok_or_else(|| TransportError::Connect("missing queue name".into()))?
        .to_string();

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = opts.get("region") {
        loader = loader.region(Region::new(region.to_string()));
    }
    if let Some(endpoint) = opts.get("endpoint") {
        loader = loader.endpoint_url(endpoint);
    }
    let client = Client::new(&loader.load().await);

    let out = client
        .get_queue_url()
        .queue_name(&queue)
        .send()
        .await
        .map_err(|e| TransportError::Connect(format!("queue {queue}: {}", describe(&e))))?;
    let queue_url = out
        .queue_url()
        .ok_or_else(|| TransportError::Connect(format!("queue {queue}: no url returned")))?
        .to_string();

    tracing::debug!(%queue, %queue_url, "resolved queue");
    Ok(Box::new(SqsTransport { client, queue_url }))
}

fn describe<E, R>(err: &SdkError<E, R>) -> String
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(se) => se.err().to_string(),
        other => DisplayErrorContext(other).to_string(),
    }
}

#[async_trait::async_trait]
impl Transport for SqsTransport {
    async fn create_sender(&self) -> Result<Box<dyn QueueSender>, TransportError> {
        // SDK clients are cheap handles over a shared connection pool.
        Ok(Box::new(SqsSender {
            client: self.client.clone(),
            queue_url: self.queue_url.clone(),
        }))
    }

    async fn queue_attributes(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, String)>, TransportError> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let resp = self
                .client
                .get_queue_attributes()
                .queue_url(&self.queue_url)
                .attribute_names(QueueAttributeName::from(name.as_str()))
                .send()
                .await
                .map_err(|e| TransportError::Attributes(format!("{name}: {}", describe(&e))))?;
            let value = resp
                .attributes()
                .and_then(|attrs| attrs.get(&QueueAttributeName::from(name.as_str())))
                .cloned()
                .ok_or_else(|| TransportError::Attributes(format!("{name}: not returned")))?;
            out.push((name.clone(), value));
        }
        Ok(out)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let names = vec![QueueAttributeName::QueueArn.as_str().to_string()];
        self.queue_attributes(&names).await.map(|_| ())
    }
}

struct SqsSender {
    client: Client,
    queue_url: String,
}

#[async_trait::async_trait]
impl QueueSender for SqsSender {
    async fn send_batch(&mut self, batch: Batch) -> Result<(), TransportError> {
        let total = batch.len();
        let entries = batch
            .into_iter()
            .map(|msg| {
                SendMessageBatchRequestEntry::builder()
                    .id(msg.id)
                    .message_body(msg.body)
                    .build()
                    .map_err(|e| TransportError::Other(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let out = self
            .client
            .send_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::TimeoutError(_) => TransportError::Timeout,
                SdkError::DispatchFailure(_) => TransportError::Disconnected,
                _ => TransportError::Send(describe(&e)),
            })?;

        let failed = out.failed();
        if failed.is_empty() {
            return Ok(());
        }
        let detail = failed
            .iter()
            .take(3)
            .map(|f| format!("{}: {} {}", f.id(), f.code(), f.message().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("; ");
        Err(TransportError::Rejected {
            failed: failed.len(),
            total,
            detail,
        })
    }
}
