use serde_json::json;

use super::function::FunctionHandle;
use super::template::{get_att, Resource};
use super::LambdaAcmeStack;

pub const SCHEDULE_RULE_ID: &str = "LambdaAcmeScheduleRule";
pub const SCHEDULE_PERMISSION_ID: &str = "LambdaAcmeScheduleRuleAllowEventRule";
pub const SCHEDULE_EXPRESSION: &str = "rate(3 days)";
pub const RENEW_PAYLOAD: &str = r#"{"action":"renew"}"#;

impl LambdaAcmeStack {
    /// Invoke `function` every three days with a renew event.
    ///
    /// Calling it again replaces the rule with an identical one.
    pub fn add_schedule(&mut self, function: &FunctionHandle) {
        let rule = Resource::new(
            "AWS::Events::Rule",
            json!({
                "ScheduleExpression": SCHEDULE_EXPRESSION,
                "State": "ENABLED",
                "Targets": [{
                    "Arn": function.arn(),
                    "Id": "Target0",
                    "Input": RENEW_PAYLOAD,
                }],
            }),
        );
        let permission = Resource::new(
            "AWS::Lambda::Permission",
            json!({
                "Action": "lambda:InvokeFunction",
                "FunctionName": function.arn(),
                "Principal": "events.amazonaws.com",
                "SourceArn": get_att(SCHEDULE_RULE_ID, "Arn"),
            }),
        );

        self.template
            .resources
            .insert(SCHEDULE_RULE_ID.to_string(), rule);
        self.template
            .resources
            .insert(SCHEDULE_PERMISSION_ID.to_string(), permission);
    }

    pub fn has_schedule(&self) -> bool {
        self.template.resources.contains_key(SCHEDULE_RULE_ID)
    }
}
