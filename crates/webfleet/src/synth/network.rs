//! Network layer: VPC, subnets, gateways and routes
//!
//! Every subnet tier is replicated into `max_azs` availability zones. Subnet
//! ranges are carved from the VPC range in declaration order, each aligned to
//! its own prefix length, so two tiers can never overlap.

use super::{StackBuilder, resource};
use crate::error::SynthError;
use ipnet::Ipv4Net;
use serde_json::json;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::debug;
use webfleet_common::defaults::ANY_IPV4;
use webfleet_common::tags::TAG_SUBNET_TYPE;
use webfleet_common::{NetworkConfig, ResourceKind, SubnetKind};
use webfleet_template::intrinsic::{get_att, get_azs, reference, select, sub, tag};

/// One subnet of a tier, in one availability zone
#[derive(Debug, Clone)]
pub struct SubnetHandle {
    pub subnet_id: String,
    pub cidr: Ipv4Net,
    pub route_table_id: String,
    /// Route to the internet or NAT gateway (isolated subnets have none)
    pub default_route_id: Option<String>,
}

/// A subnet tier across all availability zones
#[derive(Debug, Clone)]
pub struct SubnetTier {
    pub name: String,
    pub kind: SubnetKind,
    pub subnets: Vec<SubnetHandle>,
}

impl SubnetTier {
    pub fn subnet_ids(&self) -> impl Iterator<Item = &str> {
        self.subnets.iter().map(|s| s.subnet_id.as_str())
    }
}

/// Logical IDs of the network layer, for downstream layers
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    pub vpc_id: String,
    pub internet_gateway_id: String,
    pub gateway_attachment_id: String,
    pub tiers: Vec<SubnetTier>,
    pub nat_gateway_ids: Vec<String>,
}

impl NetworkHandle {
    pub fn tier(&self, name: &str) -> Option<&SubnetTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn first_public(&self) -> Option<&SubnetTier> {
        self.tiers.iter().find(|t| t.kind == SubnetKind::Public)
    }
}

/// Take the next `prefix`-sized block at or after `cursor`, aligned to its size.
///
/// `cursor` and `limit` are addresses widened to u64 so the end of
/// `255.255.255.255` does not overflow.
fn next_block(cursor: &mut u64, limit: u64, prefix: u8) -> Option<Ipv4Net> {
    let size = 1u64 << (32 - u32::from(prefix));
    let start = cursor.div_ceil(size) * size;
    let end = start + size;
    if end > limit {
        return None;
    }
    *cursor = end;
    let addr = Ipv4Addr::from(u32::try_from(start).ok()?);
    Ipv4Net::new(addr, prefix).ok()
}

/// Carve subnet ranges for every tier, `max_azs` per tier, in declared order
pub fn plan_subnets(config: &NetworkConfig) -> Result<Vec<Vec<Ipv4Net>>, SynthError> {
    let vpc = config.cidr.trunc();
    let mut seen = HashSet::new();
    let mut cursor = u64::from(u32::from(vpc.network()));
    let limit = cursor + (1u64 << (32 - u32::from(vpc.prefix_len())));

    let mut plan = Vec::with_capacity(config.subnets.len());
    for tier in &config.subnets {
        if !seen.insert(tier.name.as_str()) {
            return Err(SynthError::DuplicateTier(tier.name.clone()));
        }
        if tier.cidr_mask < vpc.prefix_len() || tier.cidr_mask > 32 {
            return Err(SynthError::MaskTooWide {
                tier: tier.name.clone(),
                mask: tier.cidr_mask,
                vpc,
            });
        }
        let mut blocks = Vec::with_capacity(usize::from(config.max_azs));
        for index in 0..usize::from(config.max_azs) {
            let block = next_block(&mut cursor, limit, tier.cidr_mask).ok_or_else(|| {
                SynthError::AddressSpaceExhausted {
                    tier: tier.name.clone(),
                    index: index + 1,
                    vpc,
                }
            })?;
            blocks.push(block);
        }
        plan.push(blocks);
    }

    ensure_disjoint(plan.iter().flatten().copied())?;
    Ok(plan)
}

/// Check that no two ranges overlap
pub fn ensure_disjoint(cidrs: impl IntoIterator<Item = Ipv4Net>) -> Result<(), SynthError> {
    let mut checked: Vec<Ipv4Net> = Vec::new();
    for cidr in cidrs {
        if let Some(other) = checked
            .iter()
            .find(|o| o.contains(&cidr.network()) || cidr.contains(&o.network()))
        {
            return Err(SynthError::OverlappingSubnets {
                first: *other,
                second: cidr,
            });
        }
        checked.push(cidr);
    }
    Ok(())
}

/// Number of NAT gateways to create, validated against the tier list
pub fn nat_gateway_count(config: &NetworkConfig) -> Result<usize, SynthError> {
    let count = usize::from(config.nat_gateways.min(config.max_azs));
    let has_public = config.subnets.iter().any(|t| t.kind == SubnetKind::Public);
    if count > 0 && !has_public {
        return Err(SynthError::NatWithoutPublicTier);
    }
    if count == 0 {
        if let Some(private) = config.subnets.iter().find(|t| t.kind == SubnetKind::Private) {
            return Err(SynthError::PrivateTierWithoutNat(private.name.clone()));
        }
    }
    Ok(count)
}

fn name_tag(path: &str) -> serde_json::Value {
    tag("Name", sub(&format!("${{AWS::StackName}}/{path}")))
}

/// Add the network layer
pub fn build_network(
    builder: &mut StackBuilder,
    config: &NetworkConfig,
) -> Result<NetworkHandle, SynthError> {
    let plan = plan_subnets(config)?;
    let nat_count = nat_gateway_count(config)?;

    let vpc_id = builder.add(
        "Vpc",
        resource(ResourceKind::Vpc)
            .property("CidrBlock", config.cidr.trunc().to_string())
            .property("EnableDnsHostnames", true)
            .property("EnableDnsSupport", true)
            .property("InstanceTenancy", "default")
            .property("Tags", json!([name_tag("Vpc")])),
    )?;

    let internet_gateway_id = builder.add(
        "VpcInternetGateway",
        resource(ResourceKind::InternetGateway).property("Tags", json!([name_tag("Vpc")])),
    )?;

    let gateway_attachment_id = builder.add(
        "VpcGatewayAttachment",
        resource(ResourceKind::VpcGatewayAttachment)
            .property("VpcId", reference(&vpc_id))
            .property("InternetGatewayId", reference(&internet_gateway_id)),
    )?;

    // NAT gateways live in the first public tier; IDs are fixed up front so
    // private routes can name them regardless of tier order
    let nat_tier = config
        .subnets
        .iter()
        .find(|t| t.kind == SubnetKind::Public)
        .map(|t| t.name.as_str());
    let nat_gateway_ids: Vec<String> = match nat_tier {
        Some(tier) => (1..=nat_count)
            .map(|n| format!("Vpc{tier}Subnet{n}NatGateway"))
            .collect(),
        None => Vec::new(),
    };

    let mut tiers = Vec::with_capacity(config.subnets.len());
    for (tier, blocks) in config.subnets.iter().zip(plan) {
        let mut subnets = Vec::with_capacity(blocks.len());
        for (index, cidr) in blocks.into_iter().enumerate() {
            let base = format!("Vpc{}Subnet{}", tier.name, index + 1);
            let path = format!("Vpc/{}Subnet{}", tier.name, index + 1);
            let public = tier.kind == SubnetKind::Public;

            let subnet_id = builder.add(
                &base,
                resource(ResourceKind::Subnet)
                    .property("VpcId", reference(&vpc_id))
                    .property("CidrBlock", cidr.to_string())
                    .property("AvailabilityZone", select(index, get_azs()))
                    .property("MapPublicIpOnLaunch", public)
                    .property(
                        "Tags",
                        json!([name_tag(&path), tag(TAG_SUBNET_TYPE, tier.kind.as_str())]),
                    ),
            )?;

            let route_table_id = builder.add(
                &format!("{base}RouteTable"),
                resource(ResourceKind::RouteTable)
                    .property("VpcId", reference(&vpc_id))
                    .property("Tags", json!([name_tag(&path)])),
            )?;

            builder.add(
                &format!("{base}RouteTableAssociation"),
                resource(ResourceKind::SubnetRouteTableAssociation)
                    .property("RouteTableId", reference(&route_table_id))
                    .property("SubnetId", reference(&subnet_id)),
            )?;

            let route = match tier.kind {
                SubnetKind::Public => Some(
                    resource(ResourceKind::Route)
                        .property("RouteTableId", reference(&route_table_id))
                        .property("DestinationCidrBlock", ANY_IPV4)
                        .property("GatewayId", reference(&internet_gateway_id))
                        .depends_on(gateway_attachment_id.as_str()),
                ),
                SubnetKind::Private => {
                    let nat = nat_gateway_ids
                        .get(index % nat_gateway_ids.len().max(1))
                        .ok_or_else(|| SynthError::PrivateTierWithoutNat(tier.name.clone()))?;
                    Some(
                        resource(ResourceKind::Route)
                            .property("RouteTableId", reference(&route_table_id))
                            .property("DestinationCidrBlock", ANY_IPV4)
                            .property("NatGatewayId", reference(nat)),
                    )
                }
                SubnetKind::Isolated => None,
            };
            let default_route_id = match route {
                Some(route) => Some(builder.add(&format!("{base}DefaultRoute"), route)?),
                None => None,
            };

            if nat_tier == Some(tier.name.as_str()) && index < nat_count {
                let eip_id = builder.add(
                    &format!("{base}Eip"),
                    resource(ResourceKind::Eip)
                        .property("Domain", "vpc")
                        .property("Tags", json!([name_tag(&path)])),
                )?;
                let mut nat = resource(ResourceKind::NatGateway)
                    .property("SubnetId", reference(&subnet_id))
                    .property("AllocationId", get_att(&eip_id, "AllocationId"))
                    .property("Tags", json!([name_tag(&path)]));
                if let Some(route_id) = &default_route_id {
                    nat = nat.depends_on(route_id.as_str());
                }
                builder.add(&format!("{base}NatGateway"), nat)?;
            }

            debug!(subnet = %subnet_id, %cidr, kind = tier.kind.as_str(), "Planned subnet");
            subnets.push(SubnetHandle {
                subnet_id,
                cidr,
                route_table_id,
                default_route_id,
            });
        }
        tiers.push(SubnetTier {
            name: tier.name.clone(),
            kind: tier.kind,
            subnets,
        });
    }

    Ok(NetworkHandle {
        vpc_id,
        internet_gateway_id,
        gateway_attachment_id,
        tiers,
        nat_gateway_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use webfleet_common::SubnetTierConfig;

    fn tier(name: &str, kind: SubnetKind, cidr_mask: u8) -> SubnetTierConfig {
        SubnetTierConfig {
            name: name.to_string(),
            kind,
            cidr_mask,
        }
    }

    fn config(cidr: &str, max_azs: u8, nat: u8, subnets: Vec<SubnetTierConfig>) -> NetworkConfig {
        NetworkConfig {
            cidr: cidr.parse().unwrap(),
            max_azs,
            nat_gateways: nat,
            subnets,
        }
    }

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_plan() {
        let plan = plan_subnets(&NetworkConfig::default()).unwrap();
        assert_eq!(plan, vec![vec![net("10.0.0.0/24"), net("10.0.1.0/24")]]);
    }

    #[test]
    fn test_mixed_masks_are_aligned() {
        let cfg = config(
            "10.0.0.0/16",
            2,
            1,
            vec![
                tier("Public", SubnetKind::Public, 26),
                tier("App", SubnetKind::Private, 24),
            ],
        );
        let plan = plan_subnets(&cfg).unwrap();
        assert_eq!(plan[0], vec![net("10.0.0.0/26"), net("10.0.0.64/26")]);
        // Next /24 boundary after 10.0.0.128
        assert_eq!(plan[1], vec![net("10.0.1.0/24"), net("10.0.2.0/24")]);
    }

    #[test]
    fn test_host_bits_in_vpc_cidr_are_ignored() {
        let cfg = config("10.0.3.7/16", 1, 1, vec![tier("Public", SubnetKind::Public, 24)]);
        assert_eq!(plan_subnets(&cfg).unwrap()[0], vec![net("10.0.0.0/24")]);
    }

    #[test]
    fn test_mask_wider_than_vpc() {
        let cfg = config("10.0.0.0/24", 1, 0, vec![tier("Public", SubnetKind::Public, 16)]);
        assert!(matches!(
            plan_subnets(&cfg).unwrap_err(),
            SynthError::MaskTooWide { mask: 16, .. }
        ));
    }

    #[test]
    fn test_address_space_exhausted() {
        let cfg = config("10.0.0.0/24", 3, 0, vec![tier("Public", SubnetKind::Public, 25)]);
        let err = plan_subnets(&cfg).unwrap_err();
        assert!(matches!(
            err,
            SynthError::AddressSpaceExhausted { index: 3, .. }
        ));
    }

    #[test]
    fn test_top_of_address_space() {
        let cfg = config("255.255.255.0/24", 2, 0, vec![tier("Edge", SubnetKind::Public, 25)]);
        let plan = plan_subnets(&cfg).unwrap();
        assert_eq!(plan[0][1], net("255.255.255.128/25"));
    }

    #[test]
    fn test_duplicate_tier_name() {
        let cfg = config(
            "10.0.0.0/16",
            1,
            0,
            vec![
                tier("Web", SubnetKind::Public, 24),
                tier("Web", SubnetKind::Isolated, 24),
            ],
        );
        assert!(matches!(
            plan_subnets(&cfg).unwrap_err(),
            SynthError::DuplicateTier(name) if name == "Web"
        ));
    }

    #[test]
    fn test_ensure_disjoint() {
        ensure_disjoint([net("10.0.0.0/24"), net("10.0.1.0/24")]).unwrap();
        let err = ensure_disjoint([net("10.0.0.0/16"), net("10.0.5.0/24")]).unwrap_err();
        assert!(matches!(err, SynthError::OverlappingSubnets { .. }));
    }

    #[test]
    fn test_nat_count_capped_by_azs() {
        let cfg = config("10.0.0.0/16", 2, 5, vec![tier("Public", SubnetKind::Public, 24)]);
        assert_eq!(nat_gateway_count(&cfg).unwrap(), 2);
    }

    #[test]
    fn test_nat_without_public_tier() {
        let cfg = config("10.0.0.0/16", 2, 1, vec![tier("Data", SubnetKind::Isolated, 24)]);
        assert!(matches!(
            nat_gateway_count(&cfg).unwrap_err(),
            SynthError::NatWithoutPublicTier
        ));
    }

    #[test]
    fn test_private_tier_needs_nat() {
        let cfg = config(
            "10.0.0.0/16",
            2,
            0,
            vec![
                tier("Public", SubnetKind::Public, 24),
                tier("App", SubnetKind::Private, 24),
            ],
        );
        assert!(matches!(
            nat_gateway_count(&cfg).unwrap_err(),
            SynthError::PrivateTierWithoutNat(name) if name == "App"
        ));
    }

    #[test]
    fn test_build_default_network() {
        let mut builder = StackBuilder::new("test");
        let handle = build_network(&mut builder, &NetworkConfig::default()).unwrap();
        let template = builder.template();

        assert_eq!(handle.vpc_id, "Vpc");
        assert_eq!(handle.tiers.len(), 1);
        assert_eq!(handle.tiers[0].subnets.len(), 2);
        assert_eq!(handle.nat_gateway_ids, vec!["VpcPublicSubnet1NatGateway"]);
        assert_eq!(template.resources_of_type("AWS::EC2::VPC").count(), 1);
        assert_eq!(template.resources_of_type("AWS::EC2::Subnet").count(), 2);
        assert_eq!(template.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        assert_eq!(template.resources_of_type("AWS::EC2::EIP").count(), 1);

        let subnet = template.resource("VpcPublicSubnet2").unwrap();
        assert_eq!(subnet.get("CidrBlock"), Some(&json!("10.0.1.0/24")));
        assert_eq!(subnet.get("MapPublicIpOnLaunch"), Some(&json!(true)));
        assert_eq!(
            subnet.get("AvailabilityZone"),
            Some(&json!({ "Fn::Select": [1, { "Fn::GetAZs": "" }] }))
        );

        let route = template.resource("VpcPublicSubnet1DefaultRoute").unwrap();
        assert_eq!(route.get("GatewayId"), Some(&reference("VpcInternetGateway")));
        assert_eq!(route.depends_on, vec!["VpcGatewayAttachment"]);

        template.validate().unwrap();
    }

    #[test]
    fn test_private_routes_spread_over_nat_gateways() {
        let cfg = config(
            "10.0.0.0/16",
            3,
            2,
            vec![
                tier("App", SubnetKind::Private, 24),
                tier("Public", SubnetKind::Public, 24),
                tier("Data", SubnetKind::Isolated, 28),
            ],
        );
        let mut builder = StackBuilder::new("test");
        let handle = build_network(&mut builder, &cfg).unwrap();
        let template = builder.template();

        let nat_of = |n: usize| {
            template
                .resource(&format!("VpcAppSubnet{n}DefaultRoute"))
                .and_then(|r| r.get("NatGatewayId"))
                .cloned()
        };
        assert_eq!(nat_of(1), Some(reference("VpcPublicSubnet1NatGateway")));
        assert_eq!(nat_of(2), Some(reference("VpcPublicSubnet2NatGateway")));
        assert_eq!(nat_of(3), Some(reference("VpcPublicSubnet1NatGateway")));

        let data = handle.tier("Data").unwrap();
        assert!(data.subnets.iter().all(|s| s.default_route_id.is_none()));
        assert!(template.resource("VpcDataSubnet1DefaultRoute").is_none());
        assert_eq!(handle.first_public().unwrap().name, "Public");

        template.validate().unwrap();
    }
}
