mod account;
mod acme;
pub mod authenticator;
mod certificate;
mod config;
mod csr;
pub mod handler;
mod renewal;
mod sdk;
pub mod stack;
pub mod storage;
mod webhook;

// re-exports
pub use account::load_or_register_account;
pub use acme::{AcmeClient, IssuedChain};
pub use certificate::Certificate;
pub use config::{AppConfig, BucketConfig, FunctionConfig, LambdaEnv};
pub use csr::{CertificateKey, X509Csr};
pub use renewal::{find_certificates_to_renew, DEFAULT_CERT_FRESH_DAYS, MAX_CERT_FRESH_DAYS};
pub use sdk::aws_config_from_env;
pub use webhook::{call_webhook, webhook_body, Webhook};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    AcmeError(#[from] instant_acme::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    TomlError(#[from] toml::de::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    KeyGenError(#[from] rcgen::Error),
    #[error(transparent)]
    CrtPemParseError(#[from] x509_parser::error::PEMError),
    #[error(transparent)]
    PemParseError(#[from] x509_parser::nom::Err<x509_parser::error::PEMError>),
    #[error(transparent)]
    X509ParseError(#[from] x509_parser::nom::Err<x509_parser::error::X509Error>),
    #[error(transparent)]
    WebhookError(#[from] reqwest::Error),
    #[error(transparent)]
    AwsBuildError(#[from] aws_sdk_route53::error::BuildError),
    #[error(transparent)]
    S3GetObjectError(
        #[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>,
    ),
    #[error(transparent)]
    S3PutObjectError(
        #[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    ),
    #[error(transparent)]
    S3DeleteObjectError(
        #[from]
        aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::delete_object::DeleteObjectError>,
    ),
    #[error(transparent)]
    S3ListObjectsError(
        #[from]
        aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error>,
    ),
    #[error(transparent)]
    S3ByteStreamError(#[from] aws_sdk_s3::primitives::ByteStreamError),
    #[error(transparent)]
    Route53ChangeRecordError(
        #[from]
        aws_sdk_route53::error::SdkError<
            aws_sdk_route53::operation::change_resource_record_sets::ChangeResourceRecordSetsError,
        >,
    ),
    #[error(transparent)]
    Route53GetChangeError(
        #[from]
        aws_sdk_route53::error::SdkError<aws_sdk_route53::operation::get_change::GetChangeError>,
    ),
    #[error(transparent)]
    AcmImportCertificateError(
        #[from]
        aws_sdk_acm::error::SdkError<
            aws_sdk_acm::operation::import_certificate::ImportCertificateError,
        >,
    ),
    #[error(transparent)]
    AcmDeleteCertificateError(
        #[from]
        aws_sdk_acm::error::SdkError<
            aws_sdk_acm::operation::delete_certificate::DeleteCertificateError,
        >,
    ),
    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("Invalid value for {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("Certificate needs at least one domain")]
    NoDomains,
    #[error("Certificate for {0} has not been issued yet")]
    CertificateNotSet(String),
    #[error("Certificate for {0} not found")]
    CertificateNotFound(String),
    #[error("No authenticator supports the challenges offered for {0}")]
    NoAuthenticator(String),
    #[error("Unsupported ACME identifier")]
    UnsupportedIdentifier,
    #[error("ACME challenge did not complete unexpectedly")]
    AcmeChallengeIncomplete,
    #[error("Certificate issue timeout")]
    CertificateIssueTimeout,
    #[error("CA returned an empty certificate chain")]
    EmptyCertificateChain,
    #[error("Route53 change {0} did not reach INSYNC")]
    DnsUpdateTimeout(String),
    #[error("No Route53 hosted zone for {0}")]
    NoDnsZone(String),
    #[error("Unsupported action {0}")]
    UnsupportedAction(String),
    #[error("All operations failed: {0:?}")]
    AllOperationsFailed(Vec<String>),
    #[error("Some operations failed: {0:?}")]
    SomeOperationsFailed(Vec<String>),
    #[error("Webhook response [{0}]: {1}")]
    WebhookStatus(u16, String),
    #[error("Invalid deployment package location {0}")]
    InvalidCodeLocation(String),
}
