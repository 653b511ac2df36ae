use serde_json::{json, Map, Value};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// `{"AWS": arn}`, `"*"` for anyone
    Arn(String),
    /// `{"Service": "lambda.amazonaws.com"}`
    Service(String),
}

/// Allow statement, the only kind this stack grants
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
    pub principal: Option<Principal>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str]) -> Self {
        Self {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources: Vec::new(),
            principal: None,
        }
    }

    pub fn on(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn for_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Single actions and resources collapse to a scalar
    pub fn to_json(&self) -> Value {
        let mut statement = Map::new();
        statement.insert("Action".to_string(), scalar_or_list(&self.actions));
        statement.insert("Effect".to_string(), json!("Allow"));
        if let Some(principal) = &self.principal {
            let principal = match principal {
                Principal::Arn(arn) => json!({ "AWS": arn }),
                Principal::Service(service) => json!({ "Service": service }),
            };
            statement.insert("Principal".to_string(), principal);
        }
        if !self.resources.is_empty() {
            let resource = if self.resources.len() == 1 {
                self.resources[0].clone()
            } else {
                Value::Array(self.resources.clone())
            };
            statement.insert("Resource".to_string(), resource);
        }
        Value::Object(statement)
    }
}

fn scalar_or_list(values: &[String]) -> Value {
    if values.len() == 1 {
        json!(values[0])
    } else {
        json!(values)
    }
}

pub fn policy_document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Statement": statements.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
        "Version": POLICY_VERSION,
    })
}
