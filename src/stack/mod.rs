//! CloudFormation stack deploying the certificate function.
//!
//! [`LambdaAcmeStack::new`] wires the function, its bucket and the grants
//! between them. [`synthesize`] is the application entry point building the
//! stack from an [`AppConfig`](crate::AppConfig).

mod bucket;
mod function;
mod iam;
mod schedule;
mod template;

pub use bucket::{
    BucketHandle, BucketProps, LifecycleRule, RemovalPolicy, BUCKET_ID, BUCKET_POLICY_ID,
    CHALLENGE_EXPIRATION_DAYS, CHALLENGE_PREFIX, REDIRECT_DOMAIN_OUTPUT,
};
pub use function::{
    Code, FunctionEnvironment, FunctionHandle, FunctionProps, ACM_ACTIONS, ACM_RESOURCE,
    FUNCTION_ID, ROLE_ID, ROLE_POLICY_ID,
};
pub use iam::{PolicyStatement, Principal};
pub use schedule::{RENEW_PAYLOAD, SCHEDULE_EXPRESSION, SCHEDULE_PERMISSION_ID, SCHEDULE_RULE_ID};
pub use template::{Output, Parameter, Resource, Template};

use crate::{AppConfig, Error};

pub struct LambdaAcmeStack {
    id: String,
    template: Template,
    function: FunctionHandle,
    bucket: BucketHandle,
    role_policy: Vec<PolicyStatement>,
    bucket_policy: Vec<PolicyStatement>,
}

impl LambdaAcmeStack {
    /// Function, bucket named after its `BUCKET` variable, and read/write
    /// from the function to the bucket.
    pub fn new(id: &str, function_props: FunctionProps, bucket_props: BucketProps) -> Self {
        let mut template = Template::new();
        template.description = Some(format!("{}: ACME certificates on AWS Lambda", id));

        let function = Self::create_function(&mut template, &function_props);
        let bucket = Self::create_bucket(
            &mut template,
            &function_props.environment.bucket,
            &bucket_props,
        );

        let mut stack = Self {
            id: id.to_string(),
            template,
            role_policy: vec![Self::acm_statement()],
            bucket_policy: vec![Self::challenge_read_statement(&bucket)],
            function,
            bucket,
        };
        let grant = Self::read_write_statement(&stack.bucket);
        stack.add_to_role_policy(grant);
        stack
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn function(&self) -> &FunctionHandle {
        &self.function
    }

    pub fn bucket(&self) -> &BucketHandle {
        &self.bucket
    }

    /// Extra permission for the function's execution role
    pub fn add_to_role_policy(&mut self, statement: PolicyStatement) {
        if !self.role_policy.contains(&statement) {
            self.role_policy.push(statement);
        }
    }

    pub fn to_template(&self) -> Template {
        let mut template = self.template.clone();
        template
            .resources
            .insert(ROLE_POLICY_ID.to_string(), self.role_policy_resource());
        template
            .resources
            .insert(BUCKET_POLICY_ID.to_string(), self.bucket_policy_resource());
        template
    }
}

/// Build the stack described by the application config
pub fn synthesize(config: &AppConfig) -> Result<LambdaAcmeStack, Error> {
    let mut stack = LambdaAcmeStack::new(
        &config.stack_name,
        config.function_props()?,
        config.bucket_props(),
    );

    for zone_id in config.function.route53_zones.values() {
        stack.add_to_role_policy(
            PolicyStatement::allow(&["route53:ChangeResourceRecordSets"])
                .on(format!("arn:aws:route53:::hostedzone/{}", zone_id)),
        );
    }
    if !config.function.route53_zones.is_empty() {
        stack.add_to_role_policy(
            PolicyStatement::allow(&["route53:GetChange"]).on("arn:aws:route53:::change/*"),
        );
    }

    if config.schedule {
        let function = stack.function().clone();
        stack.add_schedule(&function);
    }

    Ok(stack)
}
