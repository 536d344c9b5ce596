//! Health check on `realty.ping`

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PING_SUBJECT: &str = "realty.ping";

#[derive(Debug, Default, Deserialize)]
struct PingRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PongResponse {
    message: String,
    worker_version: &'static str,
    timestamp: String,
}

/// Malformed or empty payloads still get a pong
fn pong(payload: &[u8]) -> PongResponse {
    let request: PingRequest = serde_json::from_slice(payload).unwrap_or_default();
    PongResponse {
        message: request
            .message
            .map(|m| format!("Pong: {}", m))
            .unwrap_or_else(|| "Pong".to_string()),
        worker_version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

pub async fn handle_ping(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = msg.reply.clone() else {
            continue;
        };
        let response_bytes = serde_json::to_vec(&pong(&msg.payload))?;
        client.publish(reply, response_bytes.into()).await?;
        debug!("Sent pong response");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong_echoes_message() {
        assert_eq!(pong(br#"{"message":"hi"}"#).message, "Pong: hi");
    }

    #[test]
    fn test_pong_tolerates_empty_payload() {
        let response = pong(b"");
        assert_eq!(response.message, "Pong");
        assert!(!response.worker_version.is_empty());
    }
}
