//! Configuration: Lambda environment and the application TOML file
//!
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::stack::{BucketProps, Code, FunctionEnvironment, FunctionProps, LifecycleRule, RemovalPolicy};
use crate::{Error, DEFAULT_CERT_FRESH_DAYS, MAX_CERT_FRESH_DAYS};

/// Settings the deployed function reads from its environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LambdaEnv {
    pub bucket: String,
    pub directory_url: String,
    pub account_email: String,
    /// Accepted for deployments that set it, errors are not reported there
    pub sentry_dsn: Option<String>,
    pub route53_zones: HashMap<String, String>,
    pub cert_fresh_days: i64,
}

impl LambdaEnv {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let required = |name: &'static str| lookup(name).ok_or(Error::MissingEnv(name));
        let optional = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let bucket = required("BUCKET")?;
        if bucket.is_empty() {
            return Err(Error::MissingEnv("BUCKET"));
        }
        let directory_url = required("DIRECTORY_URL")?;
        url::Url::parse(&directory_url)
            .map_err(|e| Error::InvalidEnv("DIRECTORY_URL", format!("{}: {}", directory_url, e)))?;
        // May be empty, the account is then registered without contact
        let account_email = required("ACCOUNT_EMAIL")?;

        let route53_zones = match optional("ROUTE53_ZONES") {
            Some(zones) => crate::authenticator::parse_zones(&zones)?,
            None => HashMap::new(),
        };
        let cert_fresh_days = match optional("CERT_FRESH_DAYS") {
            Some(days) => days
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|days| (0..=MAX_CERT_FRESH_DAYS).contains(days))
                .ok_or(Error::InvalidEnv("CERT_FRESH_DAYS", days))?,
            None => DEFAULT_CERT_FRESH_DAYS,
        };

        Ok(Self {
            bucket,
            directory_url,
            account_email,
            sentry_dsn: optional("SENTRY_DSN"),
            route53_zones,
            cert_fresh_days,
        })
    }
}

/// Application config, `lambda-acme.toml`
#[derive(Clone, Debug, serde::Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    /// Install the three-day renewal trigger
    #[serde(default = "default_true")]
    pub schedule: bool,
    pub function: FunctionConfig,
    #[serde(default)]
    pub bucket: BucketConfig,
    /// Directory of the config file, deployment package paths are relative to it
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct FunctionConfig {
    #[serde(default)]
    pub account_email: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    #[serde(default)]
    pub sentry_dsn: String,
    /// Zip archive path, or `s3://bucket/key`
    pub code: String,
    pub function_name: Option<String>,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_handler")]
    pub handler: String,
    pub memory_size: Option<u32>,
    pub timeout: Option<u32>,
    pub cert_fresh_days: Option<i64>,
    /// Domain -> hosted zone ID, enables DNS-01
    #[serde(default)]
    pub route53_zones: BTreeMap<String, String>,
    /// Passed through to the function as is
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct BucketConfig {
    #[serde(default)]
    pub versioned: bool,
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
    #[serde(default)]
    pub lifecycle_rules: Vec<LifecycleRule>,
}

fn default_stack_name() -> String {
    "LambdaAcmeStack".to_string()
}

fn default_true() -> bool {
    true
}

fn default_directory_url() -> String {
    instant_acme::LetsEncrypt::Production.url().to_string()
}

// The function built from this crate runs on the custom runtime
fn default_runtime() -> String {
    "provided.al2023".to_string()
}

fn default_handler() -> String {
    "bootstrap".to_string()
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(config_file: P) -> Result<Self, Error> {
        let config_file = config_file.as_ref();
        let toml_str = std::fs::read_to_string(config_file)?;

        let mut config = toml_str.parse::<AppConfig>()?;
        config.base_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    pub fn base_dir<'a>(&'a self) -> &'a Path {
        &self.base_dir
    }

    pub fn function_props(&self) -> Result<FunctionProps, Error> {
        let function = &self.function;

        let mut extra = function.environment.clone();
        if !function.sentry_dsn.is_empty() {
            extra.insert("SENTRY_DSN".to_string(), function.sentry_dsn.clone());
        }
        if !function.route53_zones.is_empty() {
            let zones = function
                .route53_zones
                .iter()
                .map(|(domain, zone_id)| format!("{}={}", domain, zone_id))
                .collect::<Vec<_>>()
                .join(",");
            extra.insert("ROUTE53_ZONES".to_string(), zones);
        }
        if let Some(days) = function.cert_fresh_days {
            extra.insert("CERT_FRESH_DAYS".to_string(), days.to_string());
        }

        let environment = FunctionEnvironment {
            account_email: function.account_email.clone(),
            bucket: function.bucket.clone(),
            directory_url: function.directory_url.clone(),
            extra,
        };

        let mut props = FunctionProps::new(
            environment,
            Code::from_location(&function.code, &self.base_dir)?,
        );
        props.function_name = function.function_name.clone();
        props.runtime = Some(function.runtime.clone());
        props.handler = Some(function.handler.clone());
        props.memory_size = function.memory_size;
        props.timeout_secs = function.timeout;
        Ok(props)
    }

    pub fn bucket_props(&self) -> BucketProps {
        BucketProps {
            versioned: self.bucket.versioned,
            removal_policy: self.bucket.removal_policy,
            lifecycle_rules: self.bucket.lifecycle_rules.clone(),
        }
    }

    /// Runtime settings for running operations from this machine
    pub fn lambda_env(&self) -> Result<LambdaEnv, Error> {
        let props = self.function_props()?;
        let variables = props.environment.variables();
        LambdaEnv::from_lookup(|name| variables.get(name).cloned())
    }
}

/// TOML text, paths relative to the working directory
impl std::str::FromStr for AppConfig {
    type Err = Error;

    fn from_str(cfg_toml_str: &str) -> Result<Self, Error> {
        let config = toml::from_str::<AppConfig>(cfg_toml_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
stack_name = "CertStack"

[function]
account_email = "admin@example.com"
bucket = "acme-bucket"
code = "target/lambda/bootstrap.zip"
memory_size = 512

[function.route53_zones]
"example.com" = "Z0123456789"

[bucket]
removal_policy = "destroy"
"#;

    #[test]
    fn app_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.stack_name, "CertStack");
        assert!(config.schedule);
        assert_eq!(config.bucket.removal_policy, RemovalPolicy::Destroy);

        let props = config.function_props().unwrap();
        let dir = file.path().parent().unwrap();
        assert_eq!(props.code, Code::Asset(dir.join("target/lambda/bootstrap.zip")));
        assert_eq!(props.memory_size, Some(512));
        assert_eq!(props.runtime.as_deref(), Some("provided.al2023"));
        assert_eq!(
            props.environment.directory_url,
            instant_acme::LetsEncrypt::Production.url()
        );
        assert_eq!(props.environment.extra["ROUTE53_ZONES"], "example.com=Z0123456789");
        assert!(!props.environment.extra.contains_key("SENTRY_DSN"));

        let env = config.lambda_env().unwrap();
        assert_eq!(env.bucket, "acme-bucket");
        assert_eq!(env.route53_zones["example.com"], "Z0123456789");
        assert_eq!(env.cert_fresh_days, DEFAULT_CERT_FRESH_DAYS);
    }

    #[test]
    fn parsed_config_has_no_base_dir() {
        let config: AppConfig = CONFIG.parse().unwrap();
        assert_eq!(config.base_dir(), Path::new(""));
        assert_eq!(
            config.function_props().unwrap().code,
            Code::Asset(PathBuf::from("target/lambda/bootstrap.zip"))
        );
    }

    #[test]
    fn code_is_required() {
        assert!(matches!(
            "[function]\nbucket = \"b\"\n".parse::<AppConfig>(),
            Err(Error::TomlError(_))
        ));
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn lambda_env() {
        let env = LambdaEnv::from_lookup(lookup(&[
            ("BUCKET", "acme-bucket"),
            ("DIRECTORY_URL", "https://acme-staging-v02.api.letsencrypt.org/directory"),
            ("ACCOUNT_EMAIL", ""),
            ("SENTRY_DSN", ""),
            ("CERT_FRESH_DAYS", "30"),
        ]))
        .unwrap();
        assert_eq!(env.account_email, "");
        assert_eq!(env.sentry_dsn, None);
        assert_eq!(env.cert_fresh_days, 30);
        assert!(env.route53_zones.is_empty());
    }

    #[test]
    fn lambda_env_errors() {
        assert!(matches!(
            LambdaEnv::from_lookup(lookup(&[("BUCKET", "b"), ("ACCOUNT_EMAIL", "")])),
            Err(Error::MissingEnv("DIRECTORY_URL"))
        ));
        assert!(matches!(
            LambdaEnv::from_lookup(lookup(&[
                ("BUCKET", "b"),
                ("DIRECTORY_URL", "not a url"),
                ("ACCOUNT_EMAIL", ""),
            ])),
            Err(Error::InvalidEnv("DIRECTORY_URL", _))
        ));
        assert!(matches!(
            LambdaEnv::from_lookup(lookup(&[
                ("BUCKET", "b"),
                ("DIRECTORY_URL", "https://acme.example.com/directory"),
                ("ACCOUNT_EMAIL", ""),
                ("CERT_FRESH_DAYS", "soon"),
            ])),
            Err(Error::InvalidEnv("CERT_FRESH_DAYS", _))
        ));
    }

    #[test]
    fn fresh_days_are_bounded() {
        let with_days = |days: &'static str| {
            LambdaEnv::from_lookup(lookup(&[
                ("BUCKET", "b"),
                ("DIRECTORY_URL", "https://acme.example.com/directory"),
                ("ACCOUNT_EMAIL", ""),
                ("CERT_FRESH_DAYS", days),
            ]))
        };
        assert_eq!(with_days("0").unwrap().cert_fresh_days, 0);
        assert_eq!(with_days("3650").unwrap().cert_fresh_days, MAX_CERT_FRESH_DAYS);
        for days in ["3651", "-1", "9223372036854775807"] {
            assert!(
                matches!(with_days(days), Err(Error::InvalidEnv("CERT_FRESH_DAYS", _))),
                "{}",
                days
            );
        }
    }
}
