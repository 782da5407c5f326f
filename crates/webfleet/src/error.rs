//! Synthesis errors
//!
//! Everything that can go wrong while turning a [`StackConfig`] into a
//! template. These are all detected before anything touches AWS.
//!
//! [`StackConfig`]: webfleet_common::StackConfig

use ipnet::Ipv4Net;
use std::path::PathBuf;
use thiserror::Error;
use webfleet_common::{ConfigError, Layer, Protocol};
use webfleet_template::TemplateError;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Subnet tier '{tier}' asks for /{mask}, which does not fit inside VPC {vpc}")]
    MaskTooWide { tier: String, mask: u8, vpc: Ipv4Net },

    #[error("VPC {vpc} has no room left for subnet {index} of tier '{tier}'")]
    AddressSpaceExhausted {
        tier: String,
        index: usize,
        vpc: Ipv4Net,
    },

    #[error("Subnets {first} and {second} overlap")]
    OverlappingSubnets { first: Ipv4Net, second: Ipv4Net },

    #[error("Duplicate subnet tier name '{0}'")]
    DuplicateTier(String),

    #[error("NAT gateways requested but no public subnet tier to place them in")]
    NatWithoutPublicTier,

    #[error("Private subnet tier '{0}' needs at least one NAT gateway")]
    PrivateTierWithoutNat(String),

    #[error("Unknown subnet tier '{0}'")]
    UnknownSubnetTier(String),

    #[error("Duplicate ingress rule: {protocol:?} port {port} from {source_cidr}")]
    DuplicateIngressRule {
        protocol: Protocol,
        port: u16,
        source_cidr: Ipv4Net,
    },

    #[error("Invalid capacity: min {min}, max {max}, desired {desired:?}")]
    Capacity {
        min: u32,
        max: u32,
        desired: Option<u32>,
    },

    #[error("Rolling update keeps {min_in_service} instances in service, which needs max capacity above {max}")]
    RollingUpdate { min_in_service: u32, max: u32 },

    #[error("Invalid character {ch:?} in {field}")]
    UnsafeShellValue { field: String, ch: char },

    #[error("Empty {0}")]
    EmptyRecipeValue(&'static str),

    #[error("Bootstrap file path must be absolute: {0}")]
    RelativeFilePath(String),

    #[error("File {file} restarts service '{service}', which the recipe never declares")]
    UnknownRestartService { file: String, service: String },

    #[error("Failed to read file asset {}: {source}", path.display())]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{from} ({from_layer} layer) references {target} from the later {target_layer} layer")]
    LayerViolation {
        from: String,
        from_layer: Layer,
        target: String,
        target_layer: Layer,
    },
}
