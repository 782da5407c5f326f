//! CloudFormation resource kinds and synthesis layers
//!
//! A stack is built in layer order. Each layer may only reference resources
//! from layers that come before it, so the object graph has no cycles.

use std::fmt;

/// Synthesis layer a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    /// VPC, subnets, gateways and routes
    Network,
    /// Security group and its rules
    Security,
    /// Instance identity, launch template and auto-scaling group
    Compute,
    /// Artifact bucket, build project, deployment group and pipeline
    Pipeline,
}

impl Layer {
    /// All layers in construction order
    pub const ALL: [Layer; 4] = [
        Layer::Network,
        Layer::Security,
        Layer::Compute,
        Layer::Pipeline,
    ];

    /// Get construction order (lower number = built first)
    ///
    /// - 0: Network (no dependencies)
    /// - 1: Security (attached to the network)
    /// - 2: Compute (placed in the network, guarded by the security group)
    /// - 3: Pipeline (deploys onto the compute pool)
    pub fn order(self) -> u8 {
        match self {
            Layer::Network => 0,
            Layer::Security => 1,
            Layer::Compute => 2,
            Layer::Pipeline => 3,
        }
    }

    /// Human-readable layer name
    pub fn name(self) -> &'static str {
        match self {
            Layer::Network => "network",
            Layer::Security => "security",
            Layer::Compute => "compute",
            Layer::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Types of CloudFormation resources webfleet declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Vpc,
    InternetGateway,
    VpcGatewayAttachment,
    Subnet,
    RouteTable,
    SubnetRouteTableAssociation,
    Route,
    Eip,
    NatGateway,
    SecurityGroup,
    IamRole,
    IamPolicy,
    InstanceProfile,
    LaunchTemplate,
    AutoScalingGroup,
    S3Bucket,
    CodeBuildProject,
    CodeDeployApplication,
    CodeDeployDeploymentGroup,
    Pipeline,
    PipelineWebhook,
}

impl ResourceKind {
    const TABLE: [(ResourceKind, &'static str); 21] = [
        (ResourceKind::Vpc, "AWS::EC2::VPC"),
        (ResourceKind::InternetGateway, "AWS::EC2::InternetGateway"),
        (ResourceKind::VpcGatewayAttachment, "AWS::EC2::VPCGatewayAttachment"),
        (ResourceKind::Subnet, "AWS::EC2::Subnet"),
        (ResourceKind::RouteTable, "AWS::EC2::RouteTable"),
        (
            ResourceKind::SubnetRouteTableAssociation,
            "AWS::EC2::SubnetRouteTableAssociation",
        ),
        (ResourceKind::Route, "AWS::EC2::Route"),
        (ResourceKind::Eip, "AWS::EC2::EIP"),
        (ResourceKind::NatGateway, "AWS::EC2::NatGateway"),
        (ResourceKind::SecurityGroup, "AWS::EC2::SecurityGroup"),
        (ResourceKind::IamRole, "AWS::IAM::Role"),
        (ResourceKind::IamPolicy, "AWS::IAM::Policy"),
        (ResourceKind::InstanceProfile, "AWS::IAM::InstanceProfile"),
        (ResourceKind::LaunchTemplate, "AWS::EC2::LaunchTemplate"),
        (
            ResourceKind::AutoScalingGroup,
            "AWS::AutoScaling::AutoScalingGroup",
        ),
        (ResourceKind::S3Bucket, "AWS::S3::Bucket"),
        (ResourceKind::CodeBuildProject, "AWS::CodeBuild::Project"),
        (
            ResourceKind::CodeDeployApplication,
            "AWS::CodeDeploy::Application",
        ),
        (
            ResourceKind::CodeDeployDeploymentGroup,
            "AWS::CodeDeploy::DeploymentGroup",
        ),
        (ResourceKind::Pipeline, "AWS::CodePipeline::Pipeline"),
        (ResourceKind::PipelineWebhook, "AWS::CodePipeline::Webhook"),
    ];

    /// CloudFormation type name, e.g. `AWS::EC2::VPC`
    pub fn cfn_type(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("")
    }

    /// Look up a kind from its CloudFormation type name
    pub fn from_cfn_type(type_name: &str) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(_, name)| *name == type_name)
            .map(|(kind, _)| *kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cfn_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_before_compute() {
        assert!(
            Layer::Network.order() < Layer::Compute.order(),
            "The pool is placed in subnets, so the network must exist first"
        );
    }

    #[test]
    fn test_compute_before_pipeline() {
        assert!(
            Layer::Compute.order() < Layer::Pipeline.order(),
            "The deploy stage targets the pool"
        );
    }

    #[test]
    fn test_all_is_sorted_by_order() {
        let orders: Vec<u8> = Layer::ALL.iter().map(|l| l.order()).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cfn_type_lookup_is_bijective() {
        for (kind, name) in ResourceKind::TABLE {
            assert_eq!(kind.cfn_type(), name);
            assert_eq!(ResourceKind::from_cfn_type(name), Some(kind));
        }
        assert_eq!(ResourceKind::from_cfn_type("AWS::Lambda::Function"), None);
    }
}
