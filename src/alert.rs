//! Operator alerts
//!
//! Fire-and-forget: delivery failures are logged and swallowed so an
//! unreachable webhook never stalls a daemon.

use crate::config::AlertsConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, message: &str);
}

/// Posts Slack-style `{"text": ...}` messages to a webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
    instance_id: String,
}

impl WebhookNotifier {
    pub fn new(url: String, instance_id: String) -> RelayerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RelayerError::Config(format!("Failed to build webhook client: {}", e)))?;

        Ok(Self {
            client,
            url,
            instance_id,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn alert(&self, message: &str) {
        error!("ALERT: {}", message);

        let text = format!("[{}] {}", self.instance_id, message);
        match self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Alert webhook returned {}", resp.status()),
            Err(e) => warn!("Alert webhook unreachable: {:?}", e),
        }
    }
}

/// Used when no webhook is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn alert(&self, message: &str) {
        error!("ALERT: {}", message);
    }
}

pub fn from_config(config: &AlertsConfig, instance_id: &str) -> RelayerResult<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) if !url.is_empty() => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            instance_id.to_string(),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_webhook_is_swallowed() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:1/hook".to_string(), "test".to_string())
                .unwrap();
        notifier.alert("swap 1 missing").await;
    }

    #[test]
    fn test_empty_webhook_falls_back_to_log() {
        let config = AlertsConfig {
            webhook_url: Some(String::new()),
            liveness_threshold_secs: 60,
        };
        assert!(from_config(&config, "relayer-1").is_ok());
    }
}
