use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::authenticator::{Authenticator, PendingChallenge};
use crate::storage::CertificateStore;
use crate::{Certificate, CertificateKey, Error, X509Csr};

const ORDER_POLL_INTERVAL_SEC: u64 = 5;
const ORDER_POLL_MAX: u32 = 12;
const CERTIFICATE_POLL_MAX: u32 = 12;

/// Issues, renews and revokes certificates kept in a [`CertificateStore`]
pub struct AcmeClient {
    store: Arc<CertificateStore>,
    authenticators: Vec<Box<dyn Authenticator>>,
    directory_url: String,
    account_email: String,
    cert_fresh_days: i64,
}

impl AcmeClient {
    pub fn new(
        store: Arc<CertificateStore>,
        directory_url: impl Into<String>,
        account_email: impl Into<String>,
    ) -> Self {
        Self {
            store,
            authenticators: Vec::new(),
            directory_url: directory_url.into(),
            account_email: account_email.into(),
            cert_fresh_days: crate::DEFAULT_CERT_FRESH_DAYS,
        }
    }

    /// Age in days after which a stored certificate is renewed
    pub fn with_fresh_days(mut self, cert_fresh_days: i64) -> Self {
        self.cert_fresh_days = cert_fresh_days;
        self
    }

    pub fn cert_fresh_days(&self) -> i64 {
        self.cert_fresh_days
    }

    /// Authenticators are tried in the order they were added
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticators.push(Box::new(authenticator));
        self
    }

    pub fn store<'a>(&'a self) -> &'a CertificateStore {
        &self.store
    }

    /// New certificate with a fresh private key for `domains`
    pub async fn issue(&self, domains: &[String]) -> Result<Certificate, Error> {
        let key = CertificateKey::generate()?;
        let mut certificate = Certificate::new(domains.to_vec(), key.to_pem())?;
        self.obtain(&mut certificate, &key).await?;
        Ok(certificate)
    }

    /// Reissue a stored certificate, keeping its private key and domains
    pub async fn renew(&self, certificate: &Certificate) -> Result<Certificate, Error> {
        let key = CertificateKey::from_pem(certificate.private_key_pem())?;
        let mut renewed = Certificate::new(
            certificate.domains().to_vec(),
            certificate.private_key_pem().to_string(),
        )?;
        self.obtain(&mut renewed, &key).await?;
        Ok(renewed)
    }

    /// Ask the CA to revoke the certificate, then drop it from storage.
    ///
    /// A certificate the CA already revoked is still removed, so a removal
    /// that failed earlier can be retried.
    pub async fn revoke(&self, certificate: &Certificate) -> Result<(), Error> {
        let der = rustls_pki_types::CertificateDer::from(certificate.leaf_der()?);

        let account = self.account().await?;
        let revoked = account
            .revoke(&instant_acme::RevocationRequest {
                certificate: &der,
                reason: None,
            })
            .await;
        match revoked {
            Ok(()) => info!(certificate = certificate.name(), "certificate revoked"),
            Err(e) if is_already_revoked(&e) => {
                warn!(certificate = certificate.name(), "certificate was already revoked")
            }
            Err(e) => return Err(e.into()),
        }

        self.store.remove_certificate(certificate).await
    }

    async fn account(&self) -> Result<instant_acme::Account, Error> {
        crate::load_or_register_account(&self.store, &self.directory_url, &self.account_email)
            .await
    }

    async fn obtain(&self, certificate: &mut Certificate, key: &CertificateKey) -> Result<(), Error> {
        let account = self.account().await?;
        let csr = X509Csr::generate(certificate.domains(), key)?;

        let chain = self.request_certificate(&account, &csr).await?;
        certificate.set_fullchain(&chain.fullchain_pem());
        info!(
            certificate = certificate.name(),
            domains = ?certificate.domains(),
            not_after = ?certificate.not_after().ok(),
            "certificate issued"
        );

        self.store.save_certificate(certificate).await
    }

    async fn request_certificate(
        &self,
        account: &instant_acme::Account,
        csr: &X509Csr,
    ) -> Result<IssuedChain, Error> {
        let validate_hostnames = csr
            .subjects()
            .map(|hostname| instant_acme::Identifier::Dns(hostname.to_string()))
            .collect::<Vec<_>>();

        let mut order = account
            .new_order(&instant_acme::NewOrder {
                identifiers: &validate_hostnames,
            })
            .await?;

        let authorizations = order.authorizations().await?;
        let offered = authorizations
            .iter()
            .map(OfferedAuthorization::from)
            .collect::<Vec<_>>();

        // Pending challenges, grouped by the authenticator that will answer them
        let mut selected = vec![Vec::<PendingChallenge>::new(); self.authenticators.len()];
        for selection in select_challenges(&self.authenticators, &offered)? {
            let challenge = &authorizations[selection.authorization].challenges[selection.challenge];
            let key_auth = order.key_authorization(challenge);
            debug!(domain = %selection.domain, challenge = ?challenge.r#type, "challenge selected");
            selected[selection.authenticator].push(PendingChallenge {
                domain: selection.domain,
                token: challenge.token.clone(),
                key_authorization: key_auth.as_str().to_string(),
                dns_value: key_auth.dns_value(),
                url: challenge.url.clone(),
            });
        }

        let finalize = Self::validate_and_finalize(&mut order, &selected, csr);
        run_challenges(&self.authenticators, &selected, finalize).await
    }

    /// Mark published challenges ready, wait for the order, then download the chain
    async fn validate_and_finalize(
        order: &mut instant_acme::Order,
        selected: &[Vec<PendingChallenge>],
        csr: &X509Csr,
    ) -> Result<IssuedChain, Error> {
        // Challenges are published. Let ACME server to validate them.
        for challenge in selected.iter().flatten() {
            order.set_challenge_ready(&challenge.url).await?;
        }

        let mut status = order.state().status;
        for _retry in 0..ORDER_POLL_MAX {
            use instant_acme::OrderStatus::*;
            match status {
                Ready | Valid => break,
                Invalid => return Err(Error::AcmeChallengeIncomplete),
                // Pending or Processing, wait for validation
                _ => {
                    tokio::time::sleep(std::time::Duration::from_secs(ORDER_POLL_INTERVAL_SEC))
                        .await;
                    status = order.refresh().await?.status;
                }
            }
        }

        match status {
            instant_acme::OrderStatus::Ready => order.finalize(csr.der_bytes()).await?,
            instant_acme::OrderStatus::Valid => {}
            _ => return Err(Error::AcmeChallengeIncomplete),
        }

        // Issue certificate
        for _retry in 0..CERTIFICATE_POLL_MAX {
            if let Some(crt_pem_str) = order.certificate().await? {
                return IssuedChain::from_pem(&crt_pem_str);
            }
            tokio::time::sleep(std::time::Duration::from_secs(ORDER_POLL_INTERVAL_SEC)).await;
        }

        // Timeout
        Err(Error::CertificateIssueTimeout)
    }
}

fn is_already_revoked(err: &instant_acme::Error) -> bool {
    match err {
        instant_acme::Error::Api(problem) => {
            problem.r#type.as_deref() == Some("urn:ietf:params:acme:error:alreadyRevoked")
        }
        _ => false,
    }
}

/// What challenge selection looks at in an authorization
pub(crate) struct OfferedAuthorization<'a> {
    pub identifier: &'a instant_acme::Identifier,
    pub status: &'a instant_acme::AuthorizationStatus,
    pub challenge_types: Vec<&'a instant_acme::ChallengeType>,
}

impl<'a> From<&'a instant_acme::Authorization> for OfferedAuthorization<'a> {
    fn from(auth: &'a instant_acme::Authorization) -> Self {
        Self {
            identifier: &auth.identifier,
            status: &auth.status,
            challenge_types: auth.challenges.iter().map(|c| &c.r#type).collect(),
        }
    }
}

/// Challenge picked for one pending authorization, as indices into the
/// offered authorizations, their challenges and the authenticators
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ChallengeSelection {
    pub authorization: usize,
    pub challenge: usize,
    pub authenticator: usize,
    pub domain: String,
}

/// First authenticator, in order, supporting one of the offered challenges.
/// Valid authorizations need nothing, any other non-pending one fails the order.
pub(crate) fn select_challenges(
    authenticators: &[Box<dyn Authenticator>],
    offered: &[OfferedAuthorization<'_>],
) -> Result<Vec<ChallengeSelection>, Error> {
    let mut selections = Vec::new();
    for (authorization, auth) in offered.iter().enumerate() {
        use instant_acme::AuthorizationStatus::{Pending, Valid};
        match auth.status {
            Pending => {}
            // Already validated for this account
            Valid => continue,
            // Invalid, Revoked, Expired
            _ => return Err(Error::AcmeChallengeIncomplete),
        }

        #[allow(unreachable_patterns)]
        let domain = match auth.identifier {
            instant_acme::Identifier::Dns(hostname) => hostname.clone(),
            _ => return Err(Error::UnsupportedIdentifier),
        };

        let (authenticator, challenge) = authenticators
            .iter()
            .enumerate()
            .find_map(|(index, authenticator)| {
                auth.challenge_types
                    .iter()
                    .position(|challenge_type| authenticator.is_supported(&domain, challenge_type))
                    .map(|challenge| (index, challenge))
            })
            .ok_or_else(|| Error::NoAuthenticator(domain.clone()))?;

        selections.push(ChallengeSelection {
            authorization,
            challenge,
            authenticator,
            domain,
        });
    }
    Ok(selections)
}

/// Publish the selected challenges, then run `validate`. Whatever happens,
/// every authenticator with selected challenges cleans them up afterwards.
pub(crate) async fn run_challenges<T>(
    authenticators: &[Box<dyn Authenticator>],
    selected: &[Vec<PendingChallenge>],
    validate: impl std::future::Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    let result = match perform_challenges(authenticators, selected).await {
        Ok(()) => validate.await,
        Err(e) => Err(e),
    };

    for (authenticator, challenges) in authenticators.iter().zip(selected) {
        if challenges.is_empty() {
            continue;
        }
        if let Err(e) = authenticator.cleanup(challenges).await {
            warn!(error = %e, "challenge cleanup failed");
        }
    }

    result
}

async fn perform_challenges(
    authenticators: &[Box<dyn Authenticator>],
    selected: &[Vec<PendingChallenge>],
) -> Result<(), Error> {
    for (authenticator, challenges) in authenticators.iter().zip(selected) {
        if !challenges.is_empty() {
            authenticator.perform(challenges).await?;
        }
    }
    Ok(())
}

/// Certificate chain as downloaded from the CA, leaf first
pub struct IssuedChain {
    crt_pem: Vec<x509_parser::pem::Pem>,
}

impl IssuedChain {
    pub fn from_pem(crt_pem_str: &str) -> Result<Self, Error> {
        let crt_pem = x509_parser::pem::Pem::iter_from_buffer(crt_pem_str.as_bytes())
            .collect::<Result<Vec<_>, x509_parser::error::PEMError>>()?;
        if crt_pem.is_empty() {
            return Err(Error::EmptyCertificateChain);
        }
        Ok(Self { crt_pem })
    }

    pub fn fullchain_pem(&self) -> String {
        self.crt_pem.iter().map(Self::to_pem_string).collect::<String>()
    }

    fn to_pem_string(pem: &x509_parser::pem::Pem) -> String {
        use base64::engine::Engine;

        // Base64 encode with 64char line wrap
        let b64content = pem
            .contents
            .chunks(48)
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
            .collect::<Vec<String>>()
            .join("\n");

        format!(
            "-----BEGIN {}-----\n{}\n-----END {}-----\n",
            pem.label, b64content, pem.label
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use instant_acme::{AuthorizationStatus, ChallengeType, Identifier};

    use super::*;

    /// Supports one challenge type, records every call
    struct FakeAuthenticator {
        name: &'static str,
        challenge_type: ChallengeType,
        fail_perform: bool,
        calls: std::sync::Arc<Mutex<Vec<String>>>,
    }

    impl FakeAuthenticator {
        fn new(
            name: &'static str,
            challenge_type: ChallengeType,
            calls: &std::sync::Arc<Mutex<Vec<String>>>,
        ) -> Self {
            Self {
                name,
                challenge_type,
                fail_perform: false,
                calls: calls.clone(),
            }
        }
    }

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        fn is_supported(&self, domain: &str, challenge_type: &ChallengeType) -> bool {
            *challenge_type == self.challenge_type && !domain.ends_with(".invalid")
        }

        async fn perform(&self, challenges: &[PendingChallenge]) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} perform {}", self.name, challenges.len()));
            if self.fail_perform {
                return Err(Error::DnsUpdateTimeout("change".to_string()));
            }
            Ok(())
        }

        async fn cleanup(&self, challenges: &[PendingChallenge]) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} cleanup {}", self.name, challenges.len()));
            Ok(())
        }
    }

    fn dns(name: &str) -> Identifier {
        Identifier::Dns(name.to_string())
    }

    fn pending(domain: &str) -> PendingChallenge {
        PendingChallenge {
            domain: domain.to_string(),
            token: "token".to_string(),
            key_authorization: "token.thumbprint".to_string(),
            dns_value: "value".to_string(),
            url: "https://ca.example/chall".to_string(),
        }
    }

    fn authenticators(calls: &std::sync::Arc<Mutex<Vec<String>>>) -> Vec<Box<dyn Authenticator>> {
        vec![
            Box::new(FakeAuthenticator::new("dns", ChallengeType::Dns01, calls)),
            Box::new(FakeAuthenticator::new("http", ChallengeType::Http01, calls)),
        ]
    }

    #[test]
    fn first_supporting_authenticator_wins() {
        let authenticators = authenticators(&Default::default());
        let (apex, www, done) = (dns("example.com"), dns("www.example.com"), dns("old.example.com"));
        let offered = [
            OfferedAuthorization {
                identifier: &apex,
                status: &AuthorizationStatus::Pending,
                challenge_types: vec![&ChallengeType::Http01, &ChallengeType::Dns01],
            },
            OfferedAuthorization {
                identifier: &done,
                status: &AuthorizationStatus::Valid,
                challenge_types: vec![&ChallengeType::Dns01],
            },
            OfferedAuthorization {
                identifier: &www,
                status: &AuthorizationStatus::Pending,
                challenge_types: vec![&ChallengeType::TlsAlpn01, &ChallengeType::Http01],
            },
        ];

        let selections = select_challenges(&authenticators, &offered).unwrap();
        assert_eq!(
            selections,
            [
                // DNS-01 is preferred although offered second
                ChallengeSelection {
                    authorization: 0,
                    challenge: 1,
                    authenticator: 0,
                    domain: "example.com".to_string(),
                },
                ChallengeSelection {
                    authorization: 2,
                    challenge: 1,
                    authenticator: 1,
                    domain: "www.example.com".to_string(),
                },
            ]
        );
    }

    #[test]
    fn unusable_authorizations_fail_selection() {
        let authenticators = authenticators(&Default::default());
        let host = dns("example.com");
        let invalid = [OfferedAuthorization {
            identifier: &host,
            status: &AuthorizationStatus::Invalid,
            challenge_types: vec![&ChallengeType::Http01],
        }];
        assert!(matches!(
            select_challenges(&authenticators, &invalid),
            Err(Error::AcmeChallengeIncomplete)
        ));

        let unsupported = [OfferedAuthorization {
            identifier: &host,
            status: &AuthorizationStatus::Pending,
            challenge_types: vec![&ChallengeType::TlsAlpn01],
        }];
        assert!(matches!(
            select_challenges(&authenticators, &unsupported),
            Err(Error::NoAuthenticator(domain)) if domain == "example.com"
        ));

        let refused = dns("example.invalid");
        let refused = [OfferedAuthorization {
            identifier: &refused,
            status: &AuthorizationStatus::Pending,
            challenge_types: vec![&ChallengeType::Http01, &ChallengeType::Dns01],
        }];
        assert!(matches!(
            select_challenges(&authenticators, &refused),
            Err(Error::NoAuthenticator(_))
        ));

        assert!(select_challenges(&authenticators, &[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_follows_failed_perform() {
        let calls = std::sync::Arc::new(Mutex::new(Vec::new()));
        let mut failing = FakeAuthenticator::new("http", ChallengeType::Http01, &calls);
        failing.fail_perform = true;
        let authenticators: Vec<Box<dyn Authenticator>> = vec![
            Box::new(FakeAuthenticator::new("dns", ChallengeType::Dns01, &calls)),
            Box::new(failing),
            Box::new(FakeAuthenticator::new("unused", ChallengeType::TlsAlpn01, &calls)),
        ];
        let selected = vec![
            vec![pending("example.com")],
            vec![pending("www.example.com"), pending("api.example.com")],
            vec![],
        ];

        let validated = std::sync::Arc::new(Mutex::new(false));
        let validate = {
            let validated = validated.clone();
            async move {
                *validated.lock().unwrap() = true;
                Ok(())
            }
        };
        let result = run_challenges(&authenticators, &selected, validate).await;

        assert!(matches!(result, Err(Error::DnsUpdateTimeout(_))));
        assert!(!*validated.lock().unwrap());
        assert_eq!(
            *calls.lock().unwrap(),
            ["dns perform 1", "http perform 2", "dns cleanup 1", "http cleanup 2"]
        );
    }

    #[tokio::test]
    async fn cleanup_follows_failed_validation() {
        let calls = std::sync::Arc::new(Mutex::new(Vec::new()));
        let authenticators = authenticators(&calls);
        let selected = vec![vec![], vec![pending("example.com")]];

        let result: Result<(), Error> = run_challenges(&authenticators, &selected, async {
            Err(Error::AcmeChallengeIncomplete)
        })
        .await;

        assert!(matches!(result, Err(Error::AcmeChallengeIncomplete)));
        assert_eq!(*calls.lock().unwrap(), ["http perform 1", "http cleanup 1"]);
    }

    #[test]
    fn already_revoked_is_recognized() {
        let problem: instant_acme::Problem = serde_json::from_value(serde_json::json!({
            "type": "urn:ietf:params:acme:error:alreadyRevoked",
            "detail": "Certificate already revoked",
            "status": 400,
        }))
        .unwrap();
        assert!(is_already_revoked(&instant_acme::Error::Api(problem)));

        let problem: instant_acme::Problem = serde_json::from_value(serde_json::json!({
            "type": "urn:ietf:params:acme:error:unauthorized",
            "status": 403,
        }))
        .unwrap();
        assert!(!is_already_revoked(&instant_acme::Error::Api(problem)));
        assert!(!is_already_revoked(&instant_acme::Error::Str("timeout")));
    }

    // Two short bodies, CRLF line endings and blank lines as some CAs send them
    const CHAIN: &str = "-----BEGIN CERTIFICATE-----\r\nTEVBRg==\r\n-----END CERTIFICATE-----\r\n\r\n\
                         -----BEGIN CERTIFICATE-----\r\nSVNTVUVS\r\n-----END CERTIFICATE-----\r\n";

    #[test]
    fn normalizes_chain() {
        let chain = IssuedChain::from_pem(CHAIN).unwrap();
        let leaf = "-----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----\n";
        let issuer = "-----BEGIN CERTIFICATE-----\nSVNTVUVS\n-----END CERTIFICATE-----\n";

        assert_eq!(chain.fullchain_pem(), format!("{}{}", leaf, issuer));

        // Splits back into the same parts when stored
        let mut crt = Certificate::new(vec!["example.com".to_string()], String::new()).unwrap();
        crt.set_fullchain(&chain.fullchain_pem());
        assert_eq!(crt.certificate_pem().unwrap(), leaf);
        assert_eq!(crt.chain_pem(), issuer);
    }

    #[test]
    fn empty_chain_rejected() {
        assert!(matches!(
            IssuedChain::from_pem(""),
            Err(Error::EmptyCertificateChain)
        ));
    }
}
