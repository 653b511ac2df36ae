use async_trait::async_trait;
use tracing::debug;

use super::{ObjectStore, ObjectSummary};
use crate::Error;

/// Objects in one S3 bucket
#[derive(Clone, Debug)]
pub struct S3Bucket {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Bucket {
    pub fn new(aws_sdk_config: &aws_config::SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(aws_sdk_config),
            bucket: bucket.into(),
        }
    }

    pub fn name<'a>(&'a self) -> &'a str {
        self.bucket.as_str()
    }
}

/// Content type for objects the CA or operators read
fn content_type(key: &str) -> &'static str {
    if key.starts_with(super::CERTIFICATE_PREFIX) {
        "application/pem-certificate-chain"
    } else if key.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

#[async_trait]
impl ObjectStore for S3Bucket {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        use aws_sdk_s3::error::SdkError;

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match resp {
            Ok(output) => {
                let body = output.body.collect().await?;
                Ok(Some(body.into_bytes().to_vec()))
            }
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_no_such_key() => {
                debug!(bucket = %self.bucket, key, "object not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), Error> {
        let _resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type(key))
            .body(data.into())
            .send()
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let _resp = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, Error> {
        // Call ListObjectsV2 API, all pages
        let pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send()
            .try_collect()
            .await?;

        // AWS SDK response -> ObjectSummary
        let objects = pages
            .iter()
            .flat_map(|page| page.contents())
            .filter_map(|obj| {
                let key = obj.key()?;
                let last_modified = obj.last_modified()?;
                let last_modified = chrono::DateTime::<chrono::Utc>::from_timestamp(
                    last_modified.secs(),
                    last_modified.subsec_nanos(),
                )?;
                Some(ObjectSummary {
                    key: key.to_string(),
                    last_modified,
                })
            });

        Ok(objects.collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(
            content_type("certificates/example.com"),
            "application/pem-certificate-chain"
        );
        assert_eq!(content_type("account.json"), "application/json");
        assert_eq!(
            content_type(".well-known/acme-challenge/token"),
            "application/octet-stream"
        );
    }
}
