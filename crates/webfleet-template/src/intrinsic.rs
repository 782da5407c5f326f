//! Intrinsic functions, pseudo parameters and dynamic references

use serde_json::{Map, Value, json};

/// `AWS::Region` pseudo parameter
pub const AWS_REGION: &str = "AWS::Region";

/// `AWS::StackName` pseudo parameter
pub const AWS_STACK_NAME: &str = "AWS::StackName";

/// `AWS::Partition` pseudo parameter
pub const AWS_PARTITION: &str = "AWS::Partition";

/// `AWS::AccountId` pseudo parameter
pub const AWS_ACCOUNT_ID: &str = "AWS::AccountId";

/// `{ "Ref": id }`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{ "Fn::GetAtt": [id, attribute] }`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{ "Fn::Sub": text }`
pub fn sub(text: &str) -> Value {
    json!({ "Fn::Sub": text })
}

/// `{ "Fn::Sub": [text, variables] }`
pub fn sub_with(text: &str, variables: Map<String, Value>) -> Value {
    json!({ "Fn::Sub": [text, Value::Object(variables)] })
}

/// `{ "Fn::Join": [delimiter, parts] }`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// `{ "Fn::Select": [index, list] }`
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// `{ "Fn::GetAZs": "" }`, the zones of the stack's region
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

/// `{ "Fn::Base64": value }`
pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// `{ "Key": key, "Value": value }` resource tag
pub fn tag(key: &str, value: impl Into<Value>) -> Value {
    json!({ "Key": key, "Value": value.into() })
}

/// ARN of an AWS managed IAM policy in the stack's partition
pub fn managed_policy_arn(policy_name: &str) -> Value {
    sub(&format!("arn:${{{AWS_PARTITION}}}:iam::aws:policy/{policy_name}"))
}

/// Secrets Manager dynamic reference.
///
/// CloudFormation resolves the reference when it provisions the resource, so
/// the secret value never appears in the template or in stack metadata.
pub fn secrets_manager(secret_id: &str, json_key: Option<&str>) -> String {
    format!(
        "{{{{resolve:secretsmanager:{secret_id}:SecretString:{}::}}}}",
        json_key.unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_shapes() {
        assert_eq!(reference("Vpc"), json!({ "Ref": "Vpc" }));
        assert_eq!(
            get_att("Vpc", "CidrBlock"),
            json!({ "Fn::GetAtt": ["Vpc", "CidrBlock"] })
        );
        assert_eq!(
            select(1, get_azs()),
            json!({ "Fn::Select": [1, { "Fn::GetAZs": "" }] })
        );
    }

    #[test]
    fn test_managed_policy_arn_uses_partition() {
        assert_eq!(
            managed_policy_arn("AmazonSSMManagedInstanceCore"),
            json!({ "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/AmazonSSMManagedInstanceCore" })
        );
    }

    #[test]
    fn test_secrets_manager_reference() {
        assert_eq!(
            secrets_manager("github-token", None),
            "{{resolve:secretsmanager:github-token:SecretString:::}}"
        );
        assert_eq!(
            secrets_manager("ci", Some("token")),
            "{{resolve:secretsmanager:ci:SecretString:token::}}"
        );
    }
}
