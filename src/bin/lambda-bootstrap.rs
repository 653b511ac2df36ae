use lambda_acme::authenticator::{Http01Authenticator, Route53Authenticator};
use lambda_acme::handler::CertificateManager;
use lambda_acme::storage::{AcmObserver, CertificateStore, S3Bucket};
use lambda_acme::{AcmeClient, LambdaEnv};

/// main() for AWS Lambda
#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    use lambda_runtime::{run, service_fn};

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        // CloudWatch stamps every line
        .without_time()
        .init();

    let env = LambdaEnv::from_env()?;
    if env.sentry_dsn.is_some() {
        tracing::debug!("SENTRY_DSN is set, errors are reported to the log only");
    }

    let client = build_client(&env).await;
    let client = &client;
    run(service_fn(move |event| async move {
        lambda_handler(client, event).await
    }))
    .await?;
    Ok(())
}

async fn build_client(env: &LambdaEnv) -> AcmeClient {
    let aws_config = lambda_acme::aws_config_from_env(None).await;

    let bucket = S3Bucket::new(&aws_config, &env.bucket);
    let mut store = CertificateStore::new(bucket.clone());
    store.subscribe(AcmObserver::new(&aws_config, bucket));
    let store = std::sync::Arc::new(store);

    // DNS-01 first for the configured zones, HTTP-01 through the bucket otherwise
    let mut client = AcmeClient::new(store.clone(), &env.directory_url, &env.account_email)
        .with_fresh_days(env.cert_fresh_days);
    if !env.route53_zones.is_empty() {
        client = client.with_authenticator(Route53Authenticator::new(
            &aws_config,
            env.route53_zones.clone(),
        ));
    }
    client.with_authenticator(Http01Authenticator::new(store))
}

/// Lambda handler
async fn lambda_handler(
    client: &AcmeClient,
    event: lambda_runtime::LambdaEvent<serde_json::Value>,
) -> Result<serde_json::Value, lambda_runtime::Error> {
    let manager: &dyn CertificateManager = client;
    let response = lambda_acme::handler::handle_event(manager, event.payload).await?;
    Ok(response)
}
