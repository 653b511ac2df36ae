use std::sync::Arc;

use async_trait::async_trait;

use super::{Authenticator, PendingChallenge};
use crate::storage::CertificateStore;
use crate::Error;

pub const HTTP01_PATH_PREFIX: &str = ".well-known/acme-challenge/";

/// Publishes key authorizations to the bucket's public challenge path.
/// The domain's `/.well-known/acme-challenge/` must redirect to the bucket.
pub struct Http01Authenticator {
    store: Arc<CertificateStore>,
}

impl Http01Authenticator {
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }

    pub fn challenge_path(token: &str) -> String {
        format!("/{}{}", HTTP01_PATH_PREFIX, token)
    }
}

#[async_trait]
impl Authenticator for Http01Authenticator {
    fn is_supported(&self, _domain: &str, challenge_type: &instant_acme::ChallengeType) -> bool {
        *challenge_type == instant_acme::ChallengeType::Http01
    }

    async fn perform(&self, challenges: &[PendingChallenge]) -> Result<(), Error> {
        for challenge in challenges {
            self.store
                .set_validation(
                    &Self::challenge_path(&challenge.token),
                    challenge.key_authorization.as_bytes(),
                )
                .await?;
        }
        Ok(())
    }

    async fn cleanup(&self, challenges: &[PendingChallenge]) -> Result<(), Error> {
        for challenge in challenges {
            self.store
                .del_validation(&Self::challenge_path(&challenge.token))
                .await?;
        }
        Ok(())
    }
}
