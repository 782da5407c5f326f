//! IAM policy documents

use serde::Serialize;
use serde_json::{Value, json};

/// Policy language version every document declares
pub const POLICY_VERSION: &str = "2012-10-17";

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
}

impl Statement {
    /// Allow the given actions (no resource yet)
    pub fn allow<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            action: actions.into_iter().map(Into::into).collect(),
            resource: None,
        }
    }

    /// Restrict to one resource (plain ARN or intrinsic)
    pub fn on(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Restrict to several resources
    pub fn on_all(mut self, resources: Vec<Value>) -> Self {
        self.resource = Some(Value::Array(resources));
        self
    }

    /// Principal is an AWS service (trust policies)
    pub fn for_service(mut self, service: &str) -> Self {
        self.principal = Some(json!({ "Service": service }));
        self
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }
}

/// A policy document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: &'static str,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION,
            statement,
        }
    }

    /// Trust policy allowing an AWS service to assume a role
    pub fn assume_role(service: &str) -> Self {
        Self::new(vec![
            Statement::allow(["sts:AssumeRole"]).for_service(service),
        ])
    }

    pub fn to_value(&self) -> Value {
        // Every field is a plain string, vector or JSON value
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assume_role_shape() {
        let doc = PolicyDocument::assume_role("ec2.amazonaws.com").to_value();
        assert_eq!(
            doc,
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "ec2.amazonaws.com" },
                    "Action": ["sts:AssumeRole"]
                }]
            })
        );
    }

    #[test]
    fn test_statement_with_resource() {
        let doc = PolicyDocument::new(vec![
            Statement::allow(["s3:GetObject", "s3:ListBucket"])
                .with_sid("ReadArtifacts")
                .on_all(vec![json!("arn:aws:s3:::b"), json!("arn:aws:s3:::b/*")]),
        ])
        .to_value();
        assert_eq!(doc["Statement"][0]["Sid"], "ReadArtifacts");
        assert_eq!(doc["Statement"][0]["Action"][1], "s3:ListBucket");
        assert_eq!(doc["Statement"][0]["Resource"][1], "arn:aws:s3:::b/*");
        assert!(doc["Statement"][0].get("Principal").is_none());
    }
}
