//! Mirrors stored certificates into AWS Certificate Manager.
//!
//! The ARN of each imported certificate is kept next to it in the bucket,
//! under `acm/<name>`, so re-imports and deletions never list ACM.
use async_trait::async_trait;
use tracing::{info, warn};

use super::{ObjectStore, StorageObserver};
use crate::{Certificate, Error};

const ARN_PREFIX: &str = "acm/";

pub struct AcmObserver {
    client: aws_sdk_acm::Client,
    arns: AcmArns,
}

impl AcmObserver {
    /// `objects` holds the ARN records, normally the certificate bucket
    pub fn new(aws_sdk_config: &aws_config::SdkConfig, objects: impl ObjectStore + 'static) -> Self {
        Self {
            client: aws_sdk_acm::Client::new(aws_sdk_config),
            arns: AcmArns::new(objects),
        }
    }

    /// ARN of the ACM certificate imported for `name`, if any
    pub async fn certificate_arn(&self, name: &str) -> Result<Option<String>, Error> {
        self.arns.get(name).await
    }
}

/// Certificate name to ACM ARN records
struct AcmArns {
    objects: Box<dyn ObjectStore>,
}

impl AcmArns {
    fn new(objects: impl ObjectStore + 'static) -> Self {
        Self {
            objects: Box::new(objects),
        }
    }

    async fn get(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .objects
            .get(&arn_key(name))
            .await?
            .map(|data| String::from_utf8_lossy(&data).trim().to_string())
            .filter(|arn| !arn.is_empty()))
    }

    async fn set(&self, name: &str, arn: &str) -> Result<(), Error> {
        self.objects
            .put(&arn_key(name), arn.as_bytes().to_vec())
            .await
    }

    async fn remove(&self, name: &str) -> Result<(), Error> {
        self.objects.delete(&arn_key(name)).await
    }
}

fn arn_key(name: &str) -> String {
    format!("{}{}", ARN_PREFIX, name)
}

#[async_trait]
impl StorageObserver for AcmObserver {
    /// Import a new certificate, or re-import in place when an ARN is recorded
    async fn save_certificate(&self, certificate: &Certificate) -> Result<(), Error> {
        use aws_sdk_acm::primitives::Blob;

        let existing_arn = self.arns.get(certificate.name()).await?;

        let mut request = self
            .client
            .import_certificate()
            .certificate(Blob::new(certificate.certificate_pem()?.as_bytes()))
            .private_key(Blob::new(certificate.private_key_pem().as_bytes()));
        if !certificate.chain_pem().is_empty() {
            request = request.certificate_chain(Blob::new(certificate.chain_pem().as_bytes()));
        }
        if let Some(arn) = &existing_arn {
            request = request.certificate_arn(arn);
        }

        let resp = request.send().await?;
        match (existing_arn, resp.certificate_arn()) {
            (None, Some(arn)) => {
                info!(certificate = certificate.name(), arn, "imported into ACM");
                self.arns.set(certificate.name(), arn).await?;
            }
            (Some(arn), _) => {
                info!(certificate = certificate.name(), arn = %arn, "re-imported into ACM");
            }
            (None, None) => {
                warn!(certificate = certificate.name(), "ACM import returned no ARN");
            }
        }

        Ok(())
    }

    /// Fails with ResourceInUseException while the certificate is attached
    async fn remove_certificate(&self, certificate: &Certificate) -> Result<(), Error> {
        if let Some(arn) = self.arns.get(certificate.name()).await? {
            self.client
                .delete_certificate()
                .certificate_arn(&arn)
                .send()
                .await?;
            info!(certificate = certificate.name(), arn = %arn, "deleted from ACM");
            self.arns.remove(certificate.name()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn arns_live_under_acm_prefix() {
        let objects = MemoryStore::new();
        let arns = AcmArns::new(objects.clone());
        let arn = "arn:aws:acm:us-east-1:123456789012:certificate/abcd";

        assert_eq!(arns.get("example.com").await.unwrap(), None);

        arns.set("example.com", arn).await.unwrap();
        assert_eq!(objects.keys().await, ["acm/example.com"]);
        assert_eq!(arns.get("example.com").await.unwrap().as_deref(), Some(arn));
        assert_eq!(arns.get("www.example.com").await.unwrap(), None);

        arns.remove("example.com").await.unwrap();
        assert!(objects.keys().await.is_empty());
    }

    #[tokio::test]
    async fn blank_record_is_no_arn() {
        let objects = MemoryStore::new();
        objects.put("acm/example.com", b"\n".to_vec()).await.unwrap();

        let arns = AcmArns::new(objects);
        assert_eq!(arns.get("example.com").await.unwrap(), None);
    }
}
