//! ACME challenge solvers.
//!
//! For every pending authorization the first authenticator that supports one
//! of the offered challenges is used, so the order of the list given to
//! [`crate::AcmeClient`] is the order of preference.

mod http01;
mod route53;

pub use http01::Http01Authenticator;
pub use route53::{parse_zones, Route53Authenticator};

use async_trait::async_trait;

use crate::Error;

/// A challenge the CA expects us to fulfil
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Identifier being validated, without any `*.` prefix
    pub domain: String,
    pub token: String,
    /// `token.thumbprint`, served as-is for HTTP-01
    pub key_authorization: String,
    /// Base64url SHA-256 of the key authorization, for DNS-01 TXT records
    pub dns_value: String,
    /// Challenge URL to post readiness to
    pub url: String,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn is_supported(&self, domain: &str, challenge_type: &instant_acme::ChallengeType) -> bool;

    async fn perform(&self, challenges: &[PendingChallenge]) -> Result<(), Error>;

    async fn cleanup(&self, challenges: &[PendingChallenge]) -> Result<(), Error>;
}
