/// Set region as "us-east-1", etc. or None for default region
pub async fn aws_config_from_env(region: Option<String>) -> aws_config::SdkConfig {
    let loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        // Specified region
        loader
            .region(aws_config::Region::new(region))
            .load()
            .await
    } else {
        // default region, from AWS_REGION or profile
        loader.load().await
    }
}
