//! webfleet-common - Shared configuration types
//!
//! This crate holds the declarative records that describe a webfleet stack,
//! without any AWS SDK or template dependencies so it stays lightweight.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`error`]: Configuration loading and validation errors
//! - [`resource_kind`]: CloudFormation resource kinds and synthesis layers
//! - [`stack_config`]: The stack configuration record and its layer sections
//! - [`tags`]: Stack tag constants for discovery and cleanup

pub mod defaults;
pub mod error;
pub mod resource_kind;
pub mod stack_config;
pub mod tags;

// Re-export commonly used types
pub use error::ConfigError;
pub use resource_kind::{Layer, ResourceKind};
pub use stack_config::{
    BootstrapConfig, BootstrapStep, BuildConfig, ComputeConfig, DeployConfig, FileSource,
    IngressRuleConfig, MachineImage, NetworkConfig, PackageManager, PipelineConfig, Protocol,
    RollingUpdateConfig, SecurityConfig, SourceConfig, SourceTrigger, StackConfig, SubnetKind,
    SubnetTierConfig,
};
