use serde_json::{json, Map, Value};

use super::iam::{policy_document, PolicyStatement, Principal};
use super::template::{get_att, join, reference, Output, Resource, Template};
use super::LambdaAcmeStack;

pub const BUCKET_ID: &str = "LambdaAcmeBucket";
pub const BUCKET_POLICY_ID: &str = "LambdaAcmeBucketPolicy";
pub const REDIRECT_DOMAIN_OUTPUT: &str = "LambdaAcmeRedirectDomain";

/// Objects the CA fetches for HTTP-01, public and short-lived
pub const CHALLENGE_PREFIX: &str = ".well-known/acme-challenge";
pub const CHALLENGE_EXPIRATION_DAYS: u32 = 1;

pub const READ_WRITE_ACTIONS: [&str; 10] = [
    "s3:Abort*",
    "s3:DeleteObject*",
    "s3:GetBucket*",
    "s3:GetObject*",
    "s3:List*",
    "s3:PutObject",
    "s3:PutObjectLegalHold",
    "s3:PutObjectRetention",
    "s3:PutObjectTagging",
    "s3:PutObjectVersionTagging",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    #[default]
    Retain,
    Destroy,
}

impl RemovalPolicy {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Retain => "Retain",
            Self::Destroy => "Delete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct LifecycleRule {
    pub prefix: String,
    pub expiration_days: u32,
}

impl LifecycleRule {
    fn to_json(&self) -> Value {
        json!({
            "ExpirationInDays": self.expiration_days,
            "Prefix": self.prefix,
            "Status": "Enabled",
        })
    }
}

/// Overrides for the certificate bucket. Its name always comes from the
/// function's `BUCKET` variable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketProps {
    pub versioned: bool,
    pub removal_policy: RemovalPolicy,
    pub lifecycle_rules: Vec<LifecycleRule>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketHandle {
    pub logical_id: String,
    pub bucket_name: String,
}

impl BucketHandle {
    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    /// ARN pattern of objects under `prefix`
    pub fn arn_for_objects(&self, prefix: &str) -> Value {
        join(vec![self.arn(), json!(format!("/{}", prefix))])
    }

    pub fn regional_domain_name(&self) -> Value {
        get_att(&self.logical_id, "RegionalDomainName")
    }
}

impl LambdaAcmeStack {
    pub(super) fn create_bucket(
        template: &mut Template,
        bucket_name: &str,
        props: &BucketProps,
    ) -> BucketHandle {
        let handle = BucketHandle {
            logical_id: BUCKET_ID.to_string(),
            bucket_name: bucket_name.to_string(),
        };

        let mut rules = vec![LifecycleRule {
            prefix: CHALLENGE_PREFIX.to_string(),
            expiration_days: CHALLENGE_EXPIRATION_DAYS,
        }];
        rules.extend(props.lifecycle_rules.iter().cloned());

        let mut properties = Map::new();
        // Empty name lets CloudFormation generate one
        if !bucket_name.is_empty() {
            properties.insert("BucketName".to_string(), json!(bucket_name));
        }
        properties.insert(
            "LifecycleConfiguration".to_string(),
            json!({ "Rules": rules.iter().map(LifecycleRule::to_json).collect::<Vec<_>>() }),
        );
        // Public bucket policies are blocked by default on new buckets
        properties.insert(
            "PublicAccessBlockConfiguration".to_string(),
            json!({
                "BlockPublicAcls": true,
                "BlockPublicPolicy": false,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": false,
            }),
        );
        if props.versioned {
            properties.insert(
                "VersioningConfiguration".to_string(),
                json!({ "Status": "Enabled" }),
            );
        }

        let mut bucket = Resource::new("AWS::S3::Bucket", Value::Object(properties));
        bucket.update_replace_policy = Some(props.removal_policy.as_str().to_string());
        bucket.deletion_policy = Some(props.removal_policy.as_str().to_string());
        template.resources.insert(BUCKET_ID.to_string(), bucket);

        template.outputs.insert(
            REDIRECT_DOMAIN_OUTPUT.to_string(),
            Output {
                value: handle.regional_domain_name(),
                description: Some(format!(
                    "Redirect http://<domain>/{}/ here",
                    CHALLENGE_PREFIX
                )),
            },
        );

        handle
    }

    pub(super) fn challenge_read_statement(bucket: &BucketHandle) -> PolicyStatement {
        PolicyStatement::allow(&["s3:GetObject"])
            .on(bucket.arn_for_objects(&format!("{}/*", CHALLENGE_PREFIX)))
            .for_principal(Principal::Arn("*".to_string()))
    }

    pub(super) fn read_write_statement(bucket: &BucketHandle) -> PolicyStatement {
        PolicyStatement::allow(&READ_WRITE_ACTIONS)
            .on(bucket.arn())
            .on(bucket.arn_for_objects("*"))
    }

    pub(super) fn bucket_policy_resource(&self) -> Resource {
        Resource::new(
            "AWS::S3::BucketPolicy",
            json!({
                "Bucket": reference(&self.bucket.logical_id),
                "PolicyDocument": policy_document(&self.bucket_policy),
            }),
        )
    }
}
