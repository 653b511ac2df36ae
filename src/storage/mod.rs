//! Bucket layout for the account, certificates and HTTP-01 validations.
//!
//! ```text
//! account.json
//! configs/<name>        {"domains": [...]}
//! keys/<name>           private key PEM
//! certificates/<name>   fullchain PEM
//! acm/<name>            ACM certificate ARN
//! .well-known/acme-challenge/<token>
//! ```

mod acm;
mod memory;
mod s3;

pub use acm::AcmObserver;
pub use memory::MemoryStore;
pub use s3::S3Bucket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{Certificate, Error};

const ACCOUNT_KEY: &str = "account.json";
const CERTIFICATE_PREFIX: &str = "certificates/";
const KEY_PREFIX: &str = "keys/";
const CONFIG_PREFIX: &str = "configs/";

/// Flat key/value object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// All objects whose key starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, Error>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Notified after a certificate has been saved, and before it is removed.
///
/// An observer failing on removal leaves the stored objects in place, so the
/// removal can be retried.
#[async_trait]
pub trait StorageObserver: Send + Sync {
    async fn save_certificate(&self, certificate: &Certificate) -> Result<(), Error>;

    async fn remove_certificate(&self, certificate: &Certificate) -> Result<(), Error>;
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CertificateConfig {
    domains: Vec<String>,
}

pub struct CertificateStore {
    objects: Box<dyn ObjectStore>,
    observers: Vec<Box<dyn StorageObserver>>,
}

impl CertificateStore {
    pub fn new(objects: impl ObjectStore + 'static) -> Self {
        Self {
            objects: Box::new(objects),
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: impl StorageObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub async fn get_account(&self) -> Result<Option<instant_acme::AccountCredentials>, Error> {
        match self.objects.get(ACCOUNT_KEY).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn set_account(
        &self,
        credentials: &instant_acme::AccountCredentials,
    ) -> Result<(), Error> {
        let data = serde_json::to_vec(credentials)?;
        self.objects.put(ACCOUNT_KEY, data).await
    }

    /// Name and last issue time of every stored certificate
    pub async fn list_certificates(&self) -> Result<Vec<(String, DateTime<Utc>)>, Error> {
        let objects = self.objects.list(CERTIFICATE_PREFIX).await?;
        Ok(objects
            .into_iter()
            .filter_map(|obj| {
                let name = obj.key.rsplit('/').next()?;
                if name.is_empty() {
                    None
                } else {
                    Some((name.to_string(), obj.last_modified))
                }
            })
            .collect())
    }

    /// Stored certificate by name. Missing key or config yields `None`,
    /// a certificate whose chain was never written is returned unissued.
    pub async fn get_certificate(&self, name: &str) -> Result<Option<Certificate>, Error> {
        let config = match self.objects.get(&config_key(name)).await? {
            Some(data) => serde_json::from_slice::<CertificateConfig>(&data)?,
            None => return Ok(None),
        };
        let private_key = match self.objects.get(&key_key(name)).await? {
            Some(data) => String::from_utf8_lossy(&data).into_owned(),
            None => return Ok(None),
        };

        let mut certificate = Certificate::new(config.domains, private_key)?;
        if let Some(fullchain) = self.objects.get(&certificate_key(name)).await? {
            certificate.set_fullchain(&String::from_utf8_lossy(&fullchain));
        }
        Ok(Some(certificate))
    }

    /// Stored certificate covering exactly `domains`, in order
    pub async fn find_certificate(&self, domains: &[String]) -> Result<Option<Certificate>, Error> {
        let name = domains.first().ok_or(Error::NoDomains)?;
        Ok(self
            .get_certificate(name)
            .await?
            .filter(|certificate| certificate.domains() == domains))
    }

    pub async fn save_certificate(&self, certificate: &Certificate) -> Result<(), Error> {
        let name = certificate.name();
        let fullchain = certificate.fullchain_pem()?;
        let config = serde_json::to_vec(&CertificateConfig {
            domains: certificate.domains().to_vec(),
        })?;

        self.objects.put(&config_key(name), config).await?;
        self.objects
            .put(&key_key(name), certificate.private_key_pem().as_bytes().to_vec())
            .await?;
        self.objects
            .put(&certificate_key(name), fullchain.into_bytes())
            .await?;
        info!(certificate = name, "certificate saved");

        for observer in &self.observers {
            observer.save_certificate(certificate).await?;
        }
        Ok(())
    }

    pub async fn remove_certificate(&self, certificate: &Certificate) -> Result<(), Error> {
        for observer in &self.observers {
            observer.remove_certificate(certificate).await?;
        }

        let name = certificate.name();
        self.objects.delete(&certificate_key(name)).await?;
        self.objects.delete(&key_key(name)).await?;
        self.objects.delete(&config_key(name)).await?;
        info!(certificate = name, "certificate removed");
        Ok(())
    }

    /// Publish an HTTP-01 key authorization at `path`
    pub async fn set_validation(&self, path: &str, value: &[u8]) -> Result<(), Error> {
        let key = path.trim_start_matches('/');
        debug!(key, "writing validation");
        self.objects.put(key, value.to_vec()).await
    }

    pub async fn del_validation(&self, path: &str) -> Result<(), Error> {
        let key = path.trim_start_matches('/');
        debug!(key, "deleting validation");
        self.objects.delete(key).await
    }
}

fn certificate_key(name: &str) -> String {
    format!("{}{}", CERTIFICATE_PREFIX, name)
}

fn key_key(name: &str) -> String {
    format!("{}{}", KEY_PREFIX, name)
}

fn config_key(name: &str) -> String {
    format!("{}{}", CONFIG_PREFIX, name)
}
