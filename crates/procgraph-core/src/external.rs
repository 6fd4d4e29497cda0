//! Outbound adapter for events targeting external topics.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outbound channel for events whose target is an external topic rather
/// than another step.
///
/// Emission happens during the orchestrator's dispatch phase, so
/// implementations may freely await network or broker I/O.
#[async_trait]
pub trait ExternalChannel: Send + Sync {
    async fn emit(
        &self,
        topic: &str,
        channel_key: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<()>;
}

/// An event captured by [`RecordingExternalChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedExternalEvent {
    pub topic: String,
    pub channel_key: Option<String>,
    pub payload: Option<Value>,
}

/// In-memory channel that records emissions. The reference implementation
/// used by the test suite and by hosts that poll outbound events.
#[derive(Clone, Default)]
pub struct RecordingExternalChannel {
    emitted: Arc<RwLock<Vec<EmittedExternalEvent>>>,
}

impl RecordingExternalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn emitted(&self) -> Vec<EmittedExternalEvent> {
        self.emitted.read().await.clone()
    }

    pub async fn clear(&self) {
        self.emitted.write().await.clear();
    }
}

#[async_trait]
impl ExternalChannel for RecordingExternalChannel {
    async fn emit(
        &self,
        topic: &str,
        channel_key: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<()> {
        self.emitted.write().await.push(EmittedExternalEvent {
            topic: topic.to_string(),
            channel_key: channel_key.map(str::to_string),
            payload: payload.cloned(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn recording_channel_captures_emissions() {
        let channel = RecordingExternalChannel::new();
        channel
            .emit("orders", Some("key-1"), Some(&json!({"id": 7})))
            .await
            .unwrap();

        let emitted = channel.emitted().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].topic, "orders");
        assert_eq!(emitted[0].channel_key.as_deref(), Some("key-1"));
    }
}
