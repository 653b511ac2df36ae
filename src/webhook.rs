use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::Error;

/// Endpoint notified with the outcome of an invocation
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
    /// Caller's fields, sent along with the domain lists
    #[serde(default)]
    pub body: Map<String, Value>,
}

/// Caller's body with `success_domains` and `failure_domains` added
pub fn webhook_body(webhook: &Webhook, success: &[String], failure: &[String]) -> Value {
    let mut body = webhook.body.clone();
    body.insert("success_domains".to_string(), Value::from(success.to_vec()));
    body.insert("failure_domains".to_string(), Value::from(failure.to_vec()));
    Value::Object(body)
}

pub async fn call_webhook(
    webhook: &Webhook,
    success: &[String],
    failure: &[String],
) -> Result<(), Error> {
    let response = reqwest::Client::new()
        .post(&webhook.url)
        .json(&webhook_body(webhook, success, failure))
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::WebhookStatus(status.as_u16(), text));
    }
    info!(url = %webhook.url, "webhook called");
    Ok(())
}

/// Call the webhook, a failure is only logged
pub async fn notify(webhook: &Webhook, success: &[String], failure: &[String]) {
    if let Err(e) = call_webhook(webhook, success, failure).await {
        warn!(url = %webhook.url, error = %e, "webhook failed");
    }
}
