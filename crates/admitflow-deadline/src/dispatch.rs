//! Webhook delivery adapter — POSTs notices as JSON to a configured endpoint.

use async_trait::async_trait;

use admitflow_core::error::{AdmitflowError, Result};

use crate::notify::{DeadlineNotice, NotificationPort};

/// Sends notices to an HTTP endpoint. The downstream service owns fan-out to
/// actual applicant channels (email, SMS, portal inbox).
pub struct WebhookNotifier {
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            url: url.to_string(),
            headers,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationPort for WebhookNotifier {
    async fn send(&self, notice: &DeadlineNotice) -> Result<()> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "application_id": notice.application_id,
                "deadline_id": notice.deadline_id,
                "kind": notice.kind,
                "description": notice.description,
                "due_date": notice.due_date.to_rfc3339(),
                "message": notice.render(),
            }))
            .timeout(std::time::Duration::from_secs(10));

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AdmitflowError::Dispatch(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::debug!(
                "✅ Notice delivered to {}: {}",
                self.url,
                notice.render()
            );
            Ok(())
        } else {
            let status = resp.status();
            Err(AdmitflowError::Dispatch(format!("Webhook error {status}")))
        }
    }
}
