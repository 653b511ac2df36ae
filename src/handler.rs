//! Lambda event processing.
//!
//! ```json
//! {"action": "renew"}
//! {"action": "issue", "domain": "example.com"}
//! {"action": "issue", "domains": ["example.com", "www.example.com"]}
//! {"action": "revoke", "domain": "example.com"}
//! ```
//!
//! Any event may carry `"webhook": {"url": ..., "body": {...}}`, called with
//! the domains that succeeded and failed.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::{AcmeClient, Certificate, Error, Webhook};

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct Event {
    pub action: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub webhook: Option<Webhook>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Renew,
    /// One certificate covering all domains, named after the first
    Issue(Vec<String>),
    Revoke(String),
}

impl Event {
    pub fn operation(&self) -> Result<Operation, Error> {
        match self.action.as_str() {
            "renew" => Ok(Operation::Renew),
            "issue" => {
                let mut domains = self.domain.iter().cloned().collect::<Vec<_>>();
                for domain in &self.domains {
                    if !domains.contains(domain) {
                        domains.push(domain.clone());
                    }
                }
                if domains.is_empty() {
                    return Err(Error::NoDomains);
                }
                Ok(Operation::Issue(domains))
            }
            "revoke" => self
                .domain
                .clone()
                .or_else(|| self.domains.first().cloned())
                .map(Operation::Revoke)
                .ok_or(Error::NoDomains),
            other => Err(Error::UnsupportedAction(other.to_string())),
        }
    }
}

/// Certificate operations the handler drives
#[async_trait]
pub trait CertificateManager: Send + Sync {
    /// Stored certificates past their fresh window
    async fn certificates_to_renew(&self) -> Result<Vec<Certificate>, Error>;

    async fn certificate(&self, name: &str) -> Result<Option<Certificate>, Error>;

    async fn issue(&self, domains: &[String]) -> Result<Certificate, Error>;

    async fn renew(&self, certificate: &Certificate) -> Result<Certificate, Error>;

    async fn revoke(&self, certificate: &Certificate) -> Result<(), Error>;
}

#[async_trait]
impl CertificateManager for AcmeClient {
    async fn certificates_to_renew(&self) -> Result<Vec<Certificate>, Error> {
        let due = crate::find_certificates_to_renew(
            self.store(),
            chrono::Utc::now(),
            self.cert_fresh_days(),
        )
        .await?;
        Ok(due.into_iter().map(|(certificate, _)| certificate).collect())
    }

    async fn certificate(&self, name: &str) -> Result<Option<Certificate>, Error> {
        self.store().get_certificate(name).await
    }

    async fn issue(&self, domains: &[String]) -> Result<Certificate, Error> {
        AcmeClient::issue(self, domains).await
    }

    async fn renew(&self, certificate: &Certificate) -> Result<Certificate, Error> {
        AcmeClient::renew(self, certificate).await
    }

    async fn revoke(&self, certificate: &Certificate) -> Result<(), Error> {
        AcmeClient::revoke(self, certificate).await
    }
}

/// Domains (certificate names) per result
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

impl Outcome {
    fn record(&mut self, name: &str, result: Result<(), Error>) {
        match result {
            Ok(()) => self.success.push(name.to_string()),
            Err(e) => {
                error!(certificate = name, error = %e, "operation failed");
                self.failure.push(name.to_string());
            }
        }
    }

    /// Nothing succeeded, which includes a renew run with nothing due
    pub fn all_failed(&self) -> bool {
        self.success.is_empty()
    }

    /// Succeeded names when every attempted operation succeeded.
    /// Nothing attempted is not an error here.
    pub fn into_strict_result(self) -> Result<Vec<String>, Error> {
        match (self.success.is_empty(), self.failure.is_empty()) {
            (_, true) => Ok(self.success),
            (true, false) => Err(Error::AllOperationsFailed(self.failure)),
            (false, false) => Err(Error::SomeOperationsFailed(self.failure)),
        }
    }

    pub fn to_response(&self) -> Value {
        json!({
            "statusCode": 200,
            "success_domains": self.success,
            "failure_domains": self.failure,
        })
    }
}

/// Run the operation, collecting per domain results. Domains are processed one
/// after the other.
pub async fn process_event(
    manager: &dyn CertificateManager,
    operation: &Operation,
) -> Result<Outcome, Error> {
    let mut outcome = Outcome::default();
    match operation {
        Operation::Renew => {
            let due = manager.certificates_to_renew().await?;
            info!(count = due.len(), "certificates due for renewal");
            for certificate in due {
                let result = manager.renew(&certificate).await.map(|_| ());
                outcome.record(certificate.name(), result);
            }
        }
        Operation::Issue(domains) => {
            let name = domains.first().ok_or(Error::NoDomains)?;
            let result = manager.issue(domains).await.map(|_| ());
            outcome.record(name, result);
        }
        Operation::Revoke(name) => {
            let result = match manager.certificate(name).await {
                Ok(Some(certificate)) => manager.revoke(&certificate).await,
                Ok(None) => Err(Error::CertificateNotFound(name.clone())),
                Err(e) => Err(e),
            };
            outcome.record(name, result);
        }
    }
    Ok(outcome)
}

/// Process a Lambda event, notify its webhook, and build the response
pub async fn handle_event(manager: &dyn CertificateManager, event: Value) -> Result<Value, Error> {
    let event = serde_json::from_value::<Event>(event)?;
    let operation = event.operation()?;
    info!(action = %event.action, "processing event");

    let outcome = process_event(manager, &operation).await?;

    if let Some(webhook) = &event.webhook {
        crate::webhook::notify(webhook, &outcome.success, &outcome.failure).await;
    }

    if outcome.all_failed() {
        return Err(Error::AllOperationsFailed(outcome.failure));
    }
    Ok(outcome.to_response())
}
