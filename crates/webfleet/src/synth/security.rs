//! Security layer: the web tier's security group

use super::network::NetworkHandle;
use super::{StackBuilder, resource};
use crate::error::SynthError;
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::warn;
use webfleet_common::defaults::ANY_IPV4;
use webfleet_common::{IngressRuleConfig, Protocol, ResourceKind, SecurityConfig};
use webfleet_template::intrinsic::{reference, sub};

/// Ports that should normally not be reachable from the whole internet
const ADMIN_PORTS: &[u16] = &[22, 3389];

#[derive(Debug, Clone)]
pub struct SecurityHandle {
    pub group_id: String,
}

/// Render one inline ingress entry
fn ingress_entry(rule: &IngressRuleConfig) -> Value {
    let mut entry = json!({
        "CidrIp": rule.source.trunc().to_string(),
        "Description": rule.description,
        "IpProtocol": rule.protocol.as_ec2(),
    });
    match rule.protocol {
        Protocol::Tcp | Protocol::Udp => {
            entry["FromPort"] = json!(rule.port);
            entry["ToPort"] = json!(rule.port);
        }
        // For ICMP the port field carries the message type; any code matches
        Protocol::Icmp => {
            entry["FromPort"] = json!(rule.port);
            entry["ToPort"] = json!(-1);
        }
        Protocol::All => {}
    }
    entry
}

/// Egress entries. With outbound traffic disallowed, EC2 still needs one rule
/// to replace its implicit allow-all, so a rule matching nothing is emitted.
fn egress_entries(allow_all_outbound: bool) -> Value {
    if allow_all_outbound {
        json!([{
            "CidrIp": ANY_IPV4,
            "Description": "Allow all outbound traffic by default",
            "IpProtocol": "-1",
        }])
    } else {
        json!([{
            "CidrIp": "255.255.255.255/32",
            "Description": "Disallow all traffic",
            "FromPort": 252,
            "IpProtocol": "icmp",
            "ToPort": 86,
        }])
    }
}

/// Add the security group, attached to the VPC
pub fn build_security(
    builder: &mut StackBuilder,
    config: &SecurityConfig,
    network: &NetworkHandle,
) -> Result<SecurityHandle, SynthError> {
    let mut seen = HashSet::new();
    let mut ingress = Vec::with_capacity(config.ingress.len());
    for rule in &config.ingress {
        let source = rule.source.trunc();
        if !seen.insert((rule.protocol, rule.port, source)) {
            return Err(SynthError::DuplicateIngressRule {
                protocol: rule.protocol,
                port: rule.port,
                source_cidr: source,
            });
        }
        if rule.protocol == Protocol::Tcp
            && ADMIN_PORTS.contains(&rule.port)
            && source.prefix_len() == 0
        {
            warn!(
                port = rule.port,
                "Administrative port is open to the internet; consider restricting its source"
            );
        }
        ingress.push(ingress_entry(rule));
    }

    let group_id = builder.add(
        "WebSecurityGroup",
        resource(ResourceKind::SecurityGroup)
            .property("GroupDescription", "Web tier security group")
            .property("VpcId", reference(&network.vpc_id))
            .property("SecurityGroupIngress", Value::Array(ingress))
            .property("SecurityGroupEgress", egress_entries(config.allow_all_outbound))
            .property(
                "Tags",
                json!([{ "Key": "Name", "Value": sub("${AWS::StackName}/WebSecurityGroup") }]),
            ),
    )?;

    Ok(SecurityHandle { group_id })
}
