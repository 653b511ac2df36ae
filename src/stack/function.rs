use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use super::iam::{policy_document, PolicyStatement, Principal};
use super::template::{get_att, join, reference, Parameter, Resource, Template};
use super::LambdaAcmeStack;
use crate::Error;

pub const FUNCTION_ID: &str = "LambdaAcme";
pub const ROLE_ID: &str = "LambdaAcmeServiceRole";
pub const ROLE_POLICY_ID: &str = "LambdaAcmeServiceRoleDefaultPolicy";
pub const CODE_BUCKET_PARAMETER: &str = "LambdaAcmeCodeS3Bucket";
pub const CODE_KEY_PARAMETER: &str = "LambdaAcmeCodeS3Key";

pub const DEFAULT_FUNCTION_NAME: &str = "lambda-acme";
pub const DEFAULT_RUNTIME: &str = "python3.8";
pub const DEFAULT_HANDLER: &str = "main.handler";
pub const DEFAULT_MEMORY_SIZE: u32 = 1024;
pub const DEFAULT_TIMEOUT_SECS: u32 = 300;

/// Certificate ARNs are unknown at deploy time
pub const ACM_RESOURCE: &str = "arn:aws:acm:*";
pub const ACM_ACTIONS: [&str; 2] = ["acm:ImportCertificate", "acm:DeleteCertificate"];

/// Deployment package of the function
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Code {
    /// Zip archive on disk, uploaded by the deploy tooling
    Asset(PathBuf),
    /// Archive already in S3
    Bucket { bucket: String, key: String },
}

impl Code {
    /// `s3://bucket/key`, or a filesystem path relative to `base_dir`
    pub fn from_location(location: &str, base_dir: &Path) -> Result<Self, Error> {
        match url::Url::parse(location) {
            Ok(url) if url.scheme() == "s3" => {
                let bucket = url.host_str().unwrap_or_default().to_string();
                let key = url.path().trim_start_matches('/').to_string();
                if bucket.is_empty() || key.is_empty() {
                    return Err(Error::InvalidCodeLocation(location.to_string()));
                }
                Ok(Self::Bucket { bucket, key })
            }
            // Windows drive letters parse as one letter schemes
            Ok(url) if url.scheme().len() > 1 => {
                Err(Error::InvalidCodeLocation(location.to_string()))
            }
            _ => Ok(Self::Asset(base_dir.join(location))),
        }
    }
}

/// Environment handed to the deployed function
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionEnvironment {
    pub account_email: String,
    pub bucket: String,
    pub directory_url: String,
    /// `SENTRY_DSN`, `ROUTE53_ZONES` and the like
    pub extra: BTreeMap<String, String>,
}

impl FunctionEnvironment {
    pub fn variables(&self) -> BTreeMap<String, String> {
        let mut variables = self.extra.clone();
        variables.insert("ACCOUNT_EMAIL".to_string(), self.account_email.clone());
        variables.insert("BUCKET".to_string(), self.bucket.clone());
        variables.insert("DIRECTORY_URL".to_string(), self.directory_url.clone());
        variables
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionProps {
    pub environment: FunctionEnvironment,
    pub code: Code,
    pub function_name: Option<String>,
    pub runtime: Option<String>,
    pub handler: Option<String>,
    pub memory_size: Option<u32>,
    pub timeout_secs: Option<u32>,
}

impl FunctionProps {
    pub fn new(environment: FunctionEnvironment, code: Code) -> Self {
        Self {
            environment,
            code,
            function_name: None,
            runtime: None,
            handler: None,
            memory_size: None,
            timeout_secs: None,
        }
    }
}

/// Logical ids of the function and its execution role
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionHandle {
    pub logical_id: String,
    pub role_logical_id: String,
    pub function_name: String,
}

impl FunctionHandle {
    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }
}

impl LambdaAcmeStack {
    pub(super) fn create_function(template: &mut Template, props: &FunctionProps) -> FunctionHandle {
        let function_name = props
            .function_name
            .clone()
            .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string());

        template.resources.insert(
            ROLE_ID.to_string(),
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": policy_document(&[
                        PolicyStatement::allow(&["sts:AssumeRole"])
                            .for_principal(Principal::Service("lambda.amazonaws.com".to_string()))
                    ]),
                    "ManagedPolicyArns": [join(vec![
                        json!("arn:"),
                        reference("AWS::Partition"),
                        json!(":iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"),
                    ])],
                }),
            ),
        );

        let (code, metadata) = match &props.code {
            Code::Asset(path) => {
                let path = path.display().to_string();
                for (id, what) in [(CODE_BUCKET_PARAMETER, "S3 bucket"), (CODE_KEY_PARAMETER, "S3 key")] {
                    template.parameters.insert(
                        id.to_string(),
                        Parameter {
                            parameter_type: "String".to_string(),
                            description: format!("{} for asset \"{}\"", what, path),
                        },
                    );
                }
                (
                    json!({
                        "S3Bucket": reference(CODE_BUCKET_PARAMETER),
                        "S3Key": reference(CODE_KEY_PARAMETER),
                    }),
                    Some(json!({ "aws:asset:path": path, "aws:asset:property": "Code" })),
                )
            }
            Code::Bucket { bucket, key } => (json!({ "S3Bucket": bucket, "S3Key": key }), None),
        };

        let variables = props
            .environment
            .variables()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<_, _>>();

        let mut function = Resource::new(
            "AWS::Lambda::Function",
            json!({
                "Code": code,
                "Environment": { "Variables": variables },
                "FunctionName": function_name,
                "Handler": props.handler.as_deref().unwrap_or(DEFAULT_HANDLER),
                "MemorySize": props.memory_size.unwrap_or(DEFAULT_MEMORY_SIZE),
                "Role": get_att(ROLE_ID, "Arn"),
                "Runtime": props.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME),
                "Timeout": props.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            }),
        )
        .depends_on(&[ROLE_POLICY_ID, ROLE_ID]);
        if let Some(metadata) = metadata {
            function = function.with_metadata(metadata);
        }
        template.resources.insert(FUNCTION_ID.to_string(), function);

        FunctionHandle {
            logical_id: FUNCTION_ID.to_string(),
            role_logical_id: ROLE_ID.to_string(),
            function_name,
        }
    }

    pub(super) fn acm_statement() -> PolicyStatement {
        PolicyStatement::allow(&ACM_ACTIONS).on(ACM_RESOURCE)
    }

    /// Role policy rendered from the statements gathered so far
    pub(super) fn role_policy_resource(&self) -> Resource {
        Resource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyDocument": policy_document(&self.role_policy),
                "PolicyName": ROLE_POLICY_ID,
                "Roles": [reference(&self.function.role_logical_id)],
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_locations() {
        let base = Path::new("/deploy");
        assert_eq!(
            Code::from_location("s3://artifacts/lambda-acme/bootstrap.zip", base).unwrap(),
            Code::Bucket {
                bucket: "artifacts".to_string(),
                key: "lambda-acme/bootstrap.zip".to_string(),
            }
        );
        assert_eq!(
            Code::from_location("../target/lambda.zip", base).unwrap(),
            Code::Asset(PathBuf::from("/deploy/../target/lambda.zip"))
        );
        assert_eq!(
            Code::from_location("/abs/lambda.zip", base).unwrap(),
            Code::Asset(PathBuf::from("/abs/lambda.zip"))
        );
        assert!(Code::from_location("s3://artifacts", base).is_err());
        assert!(Code::from_location("https://example.com/lambda.zip", base).is_err());
    }

    #[test]
    fn required_variables_override_extra() {
        let environment = FunctionEnvironment {
            account_email: "admin@example.com".to_string(),
            bucket: "acme-bucket".to_string(),
            directory_url: String::new(),
            extra: BTreeMap::from([
                ("BUCKET".to_string(), "other".to_string()),
                ("SENTRY_DSN".to_string(), "https://key@sentry.example.com/1".to_string()),
            ]),
        };
        let variables = environment.variables();
        assert_eq!(variables["BUCKET"], "acme-bucket");
        assert_eq!(variables["DIRECTORY_URL"], "");
        assert_eq!(variables.len(), 4);
    }
}
