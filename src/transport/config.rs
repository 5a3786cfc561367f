use super::{ConnectOptions, Engine};

pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.to_lowercase().as_str() {
        "sqs" => Some(Engine::Sqs),
        #[cfg(any(test, feature = "transport-mock"))]
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

pub fn parse_connect_kv(pairs: &[String]) -> ConnectOptions {
    let mut opts = ConnectOptions::default();
    for p in pairs {
        if let Some((k, v)) = p.split_once('=') {
            opts.params.insert(k.to_string(), v.to_string());
        }
    }
    opts
}

/// Expand the short region aliases used in our queue naming scheme.
pub fn normalize_region(region: &str) -> String {
    match region {
        "use01" | "use" => "us-east-1",
        "usw01" | "usw" | "usw1" => "us-west-1",
        "usw02" | "usw2" => "us-west-2",
        "apn01" | "apn" => "ap-northeast-1",
        "sae01" | "sae" => "sa-east-1",
        other => other,
    }
    .to_string()
}
