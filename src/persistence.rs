use tracing::{debug, warn};

use crate::models::ConversationRecord;

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    key: String,
}

/// Optional conversation log. Without a base URL and key every write is a no-op.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    client: reqwest::Client,
    endpoint: Option<Endpoint>,
}

impl ConversationStore {
    pub fn new(client: reqwest::Client, base_url: Option<&str>, key: Option<&str>) -> Self {
        let endpoint = match (base_url, key) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                Some(Endpoint {
                    url: format!("{}/rest/v1/conversations", url.trim().trim_end_matches('/')),
                    key: key.trim().to_string(),
                })
            }
            _ => None,
        };
        Self { client, endpoint }
    }

    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Writes in the background; failures are logged and otherwise ignored.
    pub fn spawn_save(&self, record: ConversationRecord) {
        if self.endpoint.is_none() {
            return;
        }
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&record).await {
                warn!(error = %e, user_id = %record.user_id, "failed to persist conversation");
            }
        });
    }

    pub async fn save(&self, record: &ConversationRecord) -> Result<(), reqwest::Error> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };
        self.client
            .post(&endpoint.url)
            .header("apikey", &endpoint.key)
            .bearer_auth(&endpoint.key)
            .json(record)
            .send()
            .await?
            .error_for_status()?;
        debug!(user_id = %record.user_id, "conversation persisted");
        Ok(())
    }
}
