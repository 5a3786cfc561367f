use crate::transport::{ConnectOptions, Engine, TransportBuilder};

pub const DEFAULT_QUEUE: &str = "message_queue";
pub const DEFAULT_ATTRIBUTE: &str = "ApproximateNumberOfMessages";

pub struct AttributesConfig {
    pub engine: Engine,
    pub queues: Vec<String>,
    pub attributes: Vec<String>,
    /// Base options; `queue` is set per queue.
    pub connect: ConnectOptions,
}

/// Split a comma-separated flag, dropping empty entries.
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Print `queue.Attribute: value` for every queue and attribute. Failures are
/// printed and skipped; the printed lines are returned.
pub async fn run_attributes(config: AttributesConfig) -> Vec<String> {
    let mut lines = Vec::new();
    let mut emit = |line: String| {
        println!("{line}");
        lines.push(line);
    };

    for queue in &config.queues {
        let opts = config.connect.clone().with("queue", queue.as_str());
        let transport = match TransportBuilder::connect(config.engine.clone(), opts).await {
            Ok(t) => t,
            Err(e) => {
                emit(format!("error for queue {queue}: {e}"));
                continue;
            }
        };
        for attr in &config.attributes {
            match transport.queue_attributes(std::slice::from_ref(attr)).await {
                Ok(values) => {
                    for (name, value) in values {
                        emit(format!("{queue}.{name}: {value}"));
                    }
                }
                Err(e) => emit(format!(
                    "error getting attribute {attr} for queue {queue}: {e}"
                )),
            }
        }
        if let Err(e) = transport.shutdown().await {
            tracing::warn!(%queue, "transport shutdown error: {e}");
        }
    }
    lines
}
