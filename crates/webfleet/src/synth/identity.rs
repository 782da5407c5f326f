//! Instance identity: role and instance profile
//!
//! Instances need to read their own cfn-init metadata and signal the stack,
//! so the role always carries an inline policy for those two calls on top of
//! the configured managed policies.

use super::{StackBuilder, resource};
use crate::error::SynthError;
use serde_json::{Value, json};
use webfleet_common::ResourceKind;
use webfleet_template::intrinsic::{managed_policy_arn, reference};
use webfleet_template::{PolicyDocument, Statement};

/// Service principal instances assume their role through
pub const EC2_SERVICE: &str = "ec2.amazonaws.com";

#[derive(Debug, Clone)]
pub struct IdentityHandle {
    pub role_id: String,
    pub profile_id: String,
}

fn signal_policy() -> Value {
    let document = PolicyDocument::new(vec![
        Statement::allow([
            "cloudformation:DescribeStackResource",
            "cloudformation:SignalResource",
        ])
        .on(reference("AWS::StackId")),
    ]);
    json!({
        "PolicyName": "cfn-bootstrap",
        "PolicyDocument": document.to_value(),
    })
}

/// Add the instance role and its instance profile
pub fn build_identity(
    builder: &mut StackBuilder,
    managed_policies: &[String],
) -> Result<IdentityHandle, SynthError> {
    let arns: Vec<Value> = managed_policies
        .iter()
        .map(|name| managed_policy_arn(name))
        .collect();

    let mut role = resource(ResourceKind::IamRole)
        .property(
            "AssumeRolePolicyDocument",
            PolicyDocument::assume_role(EC2_SERVICE).to_value(),
        )
        .property("Policies", json!([signal_policy()]));
    if !arns.is_empty() {
        role = role.property("ManagedPolicyArns", Value::Array(arns));
    }
    let role_id = builder.add("InstanceRole", role)?;

    let profile_id = builder.add(
        "InstanceProfile",
        resource(ResourceKind::InstanceProfile).property("Roles", json!([reference(&role_id)])),
    )?;

    Ok(IdentityHandle {
        role_id,
        profile_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use webfleet_common::Layer;

    fn build(policies: &[&str]) -> StackBuilder {
        let mut builder = StackBuilder::new("test");
        builder.enter(Layer::Compute);
        let policies: Vec<String> = policies.iter().map(|p| p.to_string()).collect();
        build_identity(&mut builder, &policies).unwrap();
        builder
    }

    #[test]
    fn test_trust_policy() {
        let builder = build(&[]);
        let role = builder.template().resource("InstanceRole").unwrap();
        let trust = role.get("AssumeRolePolicyDocument").unwrap();
        assert_eq!(trust["Statement"][0]["Action"], json!(["sts:AssumeRole"]));
        assert_eq!(
            trust["Statement"][0]["Principal"]["Service"],
            "ec2.amazonaws.com"
        );
        assert!(role.get("ManagedPolicyArns").is_none());
    }

    #[test]
    fn test_managed_policies_use_partition() {
        let builder = build(&["AmazonSSMManagedInstanceCore"]);
        let role = builder.template().resource("InstanceRole").unwrap();
        assert_eq!(
            role.get("ManagedPolicyArns"),
            Some(&json!([{
                "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/AmazonSSMManagedInstanceCore"
            }]))
        );
    }

    #[test]
    fn test_signal_permissions() {
        let builder = build(&[]);
        let role = builder.template().resource("InstanceRole").unwrap();
        let statement = &role.get("Policies").unwrap()[0]["PolicyDocument"]["Statement"][0];
        assert_eq!(
            statement["Action"],
            json!([
                "cloudformation:DescribeStackResource",
                "cloudformation:SignalResource"
            ])
        );
        assert_eq!(statement["Resource"], json!({ "Ref": "AWS::StackId" }));
    }

    #[test]
    fn test_profile_wraps_role() {
        let builder = build(&[]);
        let profile = builder.template().resource("InstanceProfile").unwrap();
        assert_eq!(profile.get("Roles"), Some(&json!([{ "Ref": "InstanceRole" }])));
        builder.template().validate().unwrap();
    }
}
