//! PubSubHubbub lease management for the channel's upload feed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use reqwest::Client;
use url::Url;

use crate::error::{HubLeg, Result, SyncError};

pub const DEFAULT_HUB_URL: &str = "https://pubsubhubbub.appspot.com/subscribe";
const FEED_URL: &str = "https://www.youtube.com/feeds/videos.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
}

impl HubMode {
    pub fn as_str(self) -> &'static str {
        match self {
            HubMode::Subscribe => "subscribe",
            HubMode::Unsubscribe => "unsubscribe",
        }
    }

    fn leg(self) -> HubLeg {
        match self {
            HubMode::Subscribe => HubLeg::Subscribe,
            HubMode::Unsubscribe => HubLeg::Unsubscribe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRequest {
    pub mode: HubMode,
    pub callback: String,
    pub topic: String,
}

impl HubRequest {
    /// Form fields for the hub. Only subscriptions ask for synchronous verification.
    pub fn form(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("hub.callback", self.callback.clone()),
            ("hub.mode", self.mode.as_str().to_string()),
            ("hub.topic", self.topic.clone()),
        ];
        if self.mode == HubMode::Subscribe {
            fields.push(("hub.verify", "sync".to_string()));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubResponse {
    pub status: u16,
    pub body: String,
}

impl HubResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn post(&self, request: HubRequest) -> anyhow::Result<HubResponse>;
}

pub struct ReqwestHubClient {
    client: Client,
    hub_url: String,
}

impl ReqwestHubClient {
    pub fn new(hub_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(ReqwestHubClient {
            client,
            hub_url: hub_url.into(),
        })
    }
}

#[async_trait]
impl HubClient for ReqwestHubClient {
    async fn post(&self, request: HubRequest) -> anyhow::Result<HubResponse> {
        let response = self
            .client
            .post(&self.hub_url)
            .form(&request.form())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(HubResponse { status, body })
    }
}

/// Feed URL the hub publishes for `channel_id`.
pub fn topic_url(channel_id: &str) -> std::result::Result<String, url::ParseError> {
    Url::parse_with_params(FEED_URL, &[("channel_id", channel_id)]).map(String::from)
}

pub struct SubscriptionManager {
    client: Arc<dyn HubClient>,
}

impl SubscriptionManager {
    pub fn new(client: Arc<dyn HubClient>) -> Self {
        SubscriptionManager { client }
    }

    pub async fn subscribe(&self, channel_id: &str, callback_url: &str) -> Result<()> {
        self.send(HubMode::Subscribe, channel_id, callback_url).await
    }

    pub async fn unsubscribe(&self, channel_id: &str, callback_url: &str) -> Result<()> {
        self.send(HubMode::Unsubscribe, channel_id, callback_url)
            .await
    }

    /// Moves the lease to a new callback. The old callback is released first;
    /// if that fails the new one is never registered.
    pub async fn migrate_callback(
        &self,
        channel_id: &str,
        old_callback: &str,
        new_callback: &str,
    ) -> Result<()> {
        self.unsubscribe(channel_id, old_callback).await?;
        self.subscribe(channel_id, new_callback).await?;
        info!("Hub callback for {channel_id} moved from {old_callback} to {new_callback}");
        Ok(())
    }

    async fn send(&self, mode: HubMode, channel_id: &str, callback_url: &str) -> Result<()> {
        let leg = mode.leg();
        Url::parse(callback_url).map_err(|e| SyncError::SubscriptionProtocol {
            leg,
            message: format!("invalid callback url '{callback_url}': {e}"),
        })?;
        let topic = topic_url(channel_id).map_err(|e| SyncError::SubscriptionProtocol {
            leg,
            message: format!("bad topic for channel {channel_id}: {e}"),
        })?;

        let request = HubRequest {
            mode,
            callback: callback_url.to_string(),
            topic,
        };

        let response = self.client.post(request).await.map_err(|e| {
            error!("Hub {leg} request for {channel_id} failed: {e}");
            SyncError::SubscriptionProtocol {
                leg,
                message: e.to_string(),
            }
        })?;

        if !response.is_success() {
            error!(
                "Hub rejected {leg} for {channel_id}: HTTP {} {}",
                response.status, response.body
            );
            return Err(SyncError::SubscriptionProtocol {
                leg,
                message: format!("HTTP {}", response.status),
            });
        }

        info!("Hub {leg} accepted for {channel_id} -> {callback_url}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::function;
    use mockall::Sequence;

    use super::*;

    fn accepted() -> anyhow::Result<HubResponse> {
        Ok(HubResponse {
            status: 202,
            body: String::new(),
        })
    }

    fn rejected() -> anyhow::Result<HubResponse> {
        Ok(HubResponse {
            status: 409,
            body: "conflict".into(),
        })
    }

    #[test]
    fn subscribe_form_asks_for_sync_verification() {
        let request = HubRequest {
            mode: HubMode::Subscribe,
            callback: "https://example.org/api/youtube/push".into(),
            topic: topic_url("UC123").unwrap(),
        };
        assert_eq!(
            request.form(),
            vec![
                ("hub.callback", "https://example.org/api/youtube/push".to_string()),
                ("hub.mode", "subscribe".to_string()),
                (
                    "hub.topic",
                    "https://www.youtube.com/feeds/videos.xml?channel_id=UC123".to_string()
                ),
                ("hub.verify", "sync".to_string()),
            ]
        );

        let unsubscribe = HubRequest {
            mode: HubMode::Unsubscribe,
            ..request
        };
        assert!(!unsubscribe.form().iter().any(|(k, _)| *k == "hub.verify"));
    }

    #[tokio::test]
    async fn non_2xx_is_an_error() {
        let mut hub = MockHubClient::new();
        hub.expect_post().times(1).returning(|_| rejected());

        let manager = SubscriptionManager::new(Arc::new(hub));
        let err = manager
            .subscribe("UC123", "https://example.org/push")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::SubscriptionProtocol {
                leg: HubLeg::Subscribe,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_unsubscribe_never_subscribes() {
        let mut hub = MockHubClient::new();
        hub.expect_post()
            .with(function(|r: &HubRequest| r.mode == HubMode::Unsubscribe))
            .times(1)
            .returning(|_| rejected());
        hub.expect_post()
            .with(function(|r: &HubRequest| r.mode == HubMode::Subscribe))
            .never();

        let manager = SubscriptionManager::new(Arc::new(hub));
        let err = manager
            .migrate_callback("UC123", "https://old.example.org/push", "https://new.example.org/push")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::SubscriptionProtocol {
                leg: HubLeg::Unsubscribe,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn migration_unsubscribes_old_then_subscribes_new() {
        let mut seq = Sequence::new();
        let mut hub = MockHubClient::new();
        hub.expect_post()
            .with(function(|r: &HubRequest| {
                r.mode == HubMode::Unsubscribe && r.callback == "https://old.example.org/push"
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| accepted());
        hub.expect_post()
            .with(function(|r: &HubRequest| {
                r.mode == HubMode::Subscribe && r.callback == "https://new.example.org/push"
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| accepted());

        let manager = SubscriptionManager::new(Arc::new(hub));
        manager
            .migrate_callback("UC123", "https://old.example.org/push", "https://new.example.org/push")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transport_failure_maps_to_subscription_error() {
        let mut hub = MockHubClient::new();
        hub.expect_post()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        let manager = SubscriptionManager::new(Arc::new(hub));
        let err = manager
            .unsubscribe("UC123", "https://example.org/push")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "hub unsubscribe request failed: connection refused"
        );
    }

    #[tokio::test]
    async fn invalid_callback_is_rejected_before_calling_the_hub() {
        let mut hub = MockHubClient::new();
        hub.expect_post().never();

        let manager = SubscriptionManager::new(Arc::new(hub));
        assert!(manager.subscribe("UC123", "not a url").await.is_err());
    }
}
