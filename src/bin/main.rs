use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use lambda_acme::authenticator::{Http01Authenticator, Route53Authenticator};
use lambda_acme::handler::{process_event, CertificateManager, Operation};
use lambda_acme::storage::{AcmObserver, CertificateStore, S3Bucket};
use lambda_acme::{AcmeClient, AppConfig, Error};

#[derive(clap::Parser)]
#[command(version, about)]
struct Cli {
    /// Read configuration from file
    #[arg(
        short = 'c',
        long,
        value_name = "CONFIG FILE",
        default_value = "lambda-acme.toml"
    )]
    config_file: PathBuf,

    /// AWS region of the bucket, ACM and Route53 clients
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommands,
}

#[derive(clap::Subcommand)]
enum CliCommands {
    /// Write the CloudFormation template
    Synth {
        /// Output file, stdout by default
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Issue one certificate covering all domains
    Issue {
        #[arg(required(true))]
        domains: Vec<String>,
    },
    /// Renew stored certificates past their fresh window
    Renew {},
    /// Revoke a stored certificate and remove it from the bucket
    Revoke { domain: String },
}

/// main() for generic environment
#[tokio::main]
async fn main() -> ExitCode {
    use clap::Parser;

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "lambda-acme failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = AppConfig::from_file(&cli.config_file)?;

    let operation = match cli.command {
        CliCommands::Synth { out } => return synth(&config, out),
        CliCommands::Issue { domains } => Operation::Issue(domains),
        CliCommands::Renew {} => Operation::Renew,
        CliCommands::Revoke { domain } => Operation::Revoke(domain),
    };

    let client = build_client(&config, cli.region).await?;
    let manager: &dyn CertificateManager = &client;
    let outcome = process_event(manager, &operation).await?;

    for name in &outcome.success {
        println!("ok\t{}", name);
    }
    for name in &outcome.failure {
        println!("failed\t{}", name);
    }
    outcome.into_strict_result()?;
    Ok(())
}

fn synth(config: &AppConfig, out: Option<PathBuf>) -> Result<(), Error> {
    let stack = lambda_acme::stack::synthesize(config)?;
    let template = stack.to_template().to_json_pretty()?;

    match out {
        Some(path) => {
            std::fs::write(&path, template + "\n")?;
            tracing::info!(
                stack = stack.id(),
                path = %path.display(),
                schedule = stack.has_schedule(),
                "template written"
            );
        }
        None => println!("{}", template),
    }
    Ok(())
}

async fn build_client(config: &AppConfig, region: Option<String>) -> Result<AcmeClient, Error> {
    let env = config.lambda_env()?;
    let aws_config = lambda_acme::aws_config_from_env(region).await;

    let bucket = S3Bucket::new(&aws_config, &env.bucket);
    let mut store = CertificateStore::new(bucket.clone());
    store.subscribe(AcmObserver::new(&aws_config, bucket));
    let store = Arc::new(store);

    let mut client = AcmeClient::new(store.clone(), &env.directory_url, &env.account_email)
        .with_fresh_days(env.cert_fresh_days);
    if !env.route53_zones.is_empty() {
        client = client.with_authenticator(Route53Authenticator::new(
            &aws_config,
            env.route53_zones.clone(),
        ));
    }
    Ok(client.with_authenticator(Http01Authenticator::new(store)))
}
