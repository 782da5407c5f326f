//! Stack configuration
//!
//! The whole topology is described by one [`StackConfig`]. It can be loaded
//! from a JSON file; every field has a default, so an empty object (or no file
//! at all) yields the stock web stack. Validation is done via `garde::Validate`.

use crate::ConfigError;
use crate::defaults::{
    self, default_file_mode, default_file_owner, default_region, default_stack_name, default_true,
};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Stack names: a letter followed by letters, digits and hyphens.
fn validate_stack_name(value: &str, _ctx: &()) -> garde::Result {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(garde::Error::new("must start with a letter")),
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(garde::Error::new(format!(
            "contains forbidden character: {bad:?}"
        )));
    }
    Ok(())
}

fn validate_signal_timeout(value: &u64, _ctx: &()) -> garde::Result {
    // CloudFormation caps resource signal timeouts at 12 hours
    if *value == 0 || *value > 43_200 {
        return Err(garde::Error::new(
            "signal timeout must be between 1 and 43200 seconds",
        ));
    }
    Ok(())
}

/// Complete description of a web stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// CloudFormation stack name
    #[serde(default = "default_stack_name")]
    #[garde(length(min = 1, max = 128), custom(validate_stack_name))]
    pub stack_name: String,

    /// AWS region to deploy into
    #[serde(default = "default_region")]
    #[garde(length(min = 1))]
    pub region: String,

    /// Template description (a generated one is used if absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(max = 1024))]
    pub description: Option<String>,

    #[serde(default)]
    #[garde(dive)]
    pub network: NetworkConfig,

    #[serde(default)]
    #[garde(dive)]
    pub security: SecurityConfig,

    #[serde(default)]
    #[garde(dive)]
    pub compute: ComputeConfig,

    #[serde(default)]
    #[garde(dive)]
    pub pipeline: PipelineConfig,

    /// Directory that local file sources are resolved against
    #[serde(skip)]
    #[garde(skip)]
    pub base_dir: PathBuf,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            region: default_region(),
            description: None,
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
            compute: ComputeConfig::default(),
            pipeline: PipelineConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl StackConfig {
    /// Parse and validate a configuration from JSON text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    ///
    /// Local file sources in the bootstrap recipe resolve relative to the
    /// directory containing `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        let mut config = Self::from_json(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Run field-level validation
    pub fn check(&self) -> Result<(), ConfigError> {
        garde::Validate::validate(self)?;
        Ok(())
    }

    /// Resolve a local file source against [`StackConfig::base_dir`]
    pub fn resolve_local(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

// -- Network ---------------------------------------------------------------

/// Subnet tier kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetKind {
    /// Routes to the internet gateway, instances get public IPs
    Public,
    /// Routes outbound traffic through a NAT gateway
    Private,
    /// No route outside the VPC
    Isolated,
}

impl SubnetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubnetKind::Public => "Public",
            SubnetKind::Private => "Private",
            SubnetKind::Isolated => "Isolated",
        }
    }
}

/// One subnet tier, replicated across every availability zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct SubnetTierConfig {
    /// Tier name, used in logical IDs (e.g. "Public")
    #[garde(length(min = 1, max = 32), alphanumeric)]
    pub name: String,

    #[garde(skip)]
    pub kind: SubnetKind,

    /// Prefix length of each subnet in the tier
    #[serde(default = "default_subnet_mask")]
    #[garde(range(min = 16, max = 28))]
    pub cidr_mask: u8,
}

fn default_subnet_mask() -> u8 {
    defaults::DEFAULT_SUBNET_MASK
}

/// Network layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// VPC address range
    #[garde(skip)]
    pub cidr: Ipv4Net,

    /// Number of availability zones each tier is replicated into
    #[garde(range(min = 1, max = 6))]
    pub max_azs: u8,

    /// Number of NAT gateways (capped at `max_azs`)
    #[garde(range(max = 6))]
    pub nat_gateways: u8,

    /// Subnet tiers, allocated in order from the VPC range
    #[garde(length(min = 1), dive)]
    pub subnets: Vec<SubnetTierConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: defaults::DEFAULT_VPC_CIDR
                .parse()
                .unwrap_or_else(|_| Ipv4Net::default()),
            max_azs: defaults::DEFAULT_MAX_AZS,
            nat_gateways: defaults::DEFAULT_NAT_GATEWAYS,
            subnets: vec![SubnetTierConfig {
                name: "Public".to_string(),
                kind: SubnetKind::Public,
                cidr_mask: defaults::DEFAULT_SUBNET_MASK,
            }],
        }
    }
}

// -- Security --------------------------------------------------------------

/// IP protocol of an ingress rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    /// All protocols and ports
    All,
}

impl Protocol {
    /// Protocol name as EC2 expects it
    pub fn as_ec2(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::All => "-1",
        }
    }
}

/// An additive allow rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct IngressRuleConfig {
    #[serde(default = "default_protocol")]
    #[garde(skip)]
    pub protocol: Protocol,

    #[garde(skip)]
    pub port: u16,

    #[serde(default = "any_ipv4")]
    #[garde(skip)]
    pub source: Ipv4Net,

    #[garde(length(min = 1, max = 255))]
    pub description: String,
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

fn any_ipv4() -> Ipv4Net {
    Ipv4Net::default()
}

impl IngressRuleConfig {
    /// A TCP rule open to every IPv4 source
    pub fn tcp_from_anywhere(port: u16, description: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
            source: any_ipv4(),
            description: description.into(),
        }
    }
}

/// Access-control layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Allow every outbound connection
    #[garde(skip)]
    pub allow_all_outbound: bool,

    /// Allow rules, rendered in the order given
    #[garde(dive)]
    pub ingress: Vec<IngressRuleConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_all_outbound: true,
            ingress: vec![
                IngressRuleConfig::tcp_from_anywhere(443, "Allow HTTPS"),
                IngressRuleConfig::tcp_from_anywhere(80, "Allow HTTP"),
                IngressRuleConfig::tcp_from_anywhere(22, "Allow SSH"),
            ],
        }
    }
}

// -- Compute ---------------------------------------------------------------

/// Machine image the pool launches from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineImage {
    /// Resolved at deploy time from a public SSM parameter
    SsmParameter { parameter: String },
    /// A fixed AMI ID
    Ami { id: String },
}

impl Default for MachineImage {
    fn default() -> Self {
        MachineImage::SsmParameter {
            parameter: defaults::DEFAULT_IMAGE_PARAMETER.to_string(),
        }
    }
}

/// Package manager used by a package step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Yum,
    Rpm,
    Apt,
    Python,
    Rubygems,
}

impl PackageManager {
    /// Key used in `AWS::CloudFormation::Init` packages
    pub fn as_str(self) -> &'static str {
        match self {
            PackageManager::Yum => "yum",
            PackageManager::Rpm => "rpm",
            PackageManager::Apt => "apt",
            PackageManager::Python => "python",
            PackageManager::Rubygems => "rubygems",
        }
    }
}

/// Where a placed file's content comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    /// Content given directly in the config
    Inline(String),
    /// A local file read at synthesis time
    Local(PathBuf),
}

/// One step of the first-boot recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BootstrapStep {
    /// Install a package
    Package {
        #[serde(default)]
        manager: PackageManager,
        name: String,
        #[serde(default)]
        versions: Vec<String>,
    },
    /// Run a shell command
    Command {
        command: String,
        /// Resolve `${AWS::Region}`-style references with `Fn::Sub`
        #[serde(default)]
        substitute: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default)]
        ignore_errors: bool,
    },
    /// Place a file
    File {
        path: String,
        source: FileSource,
        #[serde(default = "default_file_mode")]
        mode: String,
        #[serde(default = "default_file_owner")]
        owner: String,
        #[serde(default = "default_file_owner")]
        group: String,
        /// Services restarted when this file changes
        #[serde(default)]
        restarts: Vec<String>,
    },
    /// Enable and start a service
    Service {
        name: String,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default = "default_true")]
        ensure_running: bool,
    },
}

/// First-boot recipe: an ordered list of declarative steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    #[garde(skip)]
    pub steps: Vec<BootstrapStep>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                BootstrapStep::Package {
                    manager: PackageManager::Yum,
                    name: "nginx".to_string(),
                    versions: Vec::new(),
                },
                BootstrapStep::Command {
                    command: "mkdir -p /var/www/app && chown -R nginx:nginx /var/www/app"
                        .to_string(),
                    substitute: false,
                    cwd: None,
                    env: BTreeMap::new(),
                    ignore_errors: false,
                },
                BootstrapStep::Command {
                    command: "yum install -y ruby wget && \
                              wget -q https://aws-codedeploy-${AWS::Region}.s3.${AWS::Region}.amazonaws.com/latest/install -O /tmp/codedeploy-install && \
                              chmod +x /tmp/codedeploy-install && /tmp/codedeploy-install auto"
                        .to_string(),
                    substitute: true,
                    cwd: None,
                    env: BTreeMap::new(),
                    ignore_errors: false,
                },
                BootstrapStep::File {
                    path: defaults::DEFAULT_VHOST_PATH.to_string(),
                    source: FileSource::Local(PathBuf::from(defaults::DEFAULT_VHOST_SOURCE)),
                    mode: default_file_mode(),
                    owner: default_file_owner(),
                    group: default_file_owner(),
                    restarts: vec!["nginx".to_string()],
                },
                BootstrapStep::Service {
                    name: "nginx".to_string(),
                    enabled: true,
                    ensure_running: true,
                },
            ],
        }
    }
}

/// Rolling replacement settings applied when the launch template changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct RollingUpdateConfig {
    #[garde(range(min = 1))]
    pub max_batch_size: u32,
    #[garde(skip)]
    pub min_instances_in_service: u32,
}

impl Default for RollingUpdateConfig {
    fn default() -> Self {
        Self {
            max_batch_size: defaults::DEFAULT_ROLLING_BATCH_SIZE,
            min_instances_in_service: 0,
        }
    }
}

/// Compute layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeConfig {
    /// EC2 instance type (e.g. "t2.micro")
    #[garde(length(min = 1))]
    pub instance_type: String,

    #[garde(skip)]
    pub image: MachineImage,

    /// Subnet tier the pool is placed in (first public tier if absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub subnet_tier: Option<String>,

    #[garde(range(min = 1))]
    pub min_capacity: u32,

    #[garde(range(min = 1))]
    pub max_capacity: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub desired_capacity: Option<u32>,

    /// Percentage of new instances that must signal success
    #[garde(range(max = 100))]
    pub min_success_percent: u8,

    /// Time allowed for instances to signal, in seconds
    #[garde(custom(validate_signal_timeout))]
    pub signal_timeout_secs: u64,

    /// AWS managed policy names attached to the instance role
    #[garde(skip)]
    pub managed_policies: Vec<String>,

    /// Replacement policy for launch template changes; `null` disables it
    #[garde(dive)]
    pub rolling_update: Option<RollingUpdateConfig>,

    #[garde(dive)]
    pub bootstrap: BootstrapConfig,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            instance_type: defaults::DEFAULT_INSTANCE_TYPE.to_string(),
            image: MachineImage::default(),
            subnet_tier: None,
            min_capacity: defaults::DEFAULT_MIN_CAPACITY,
            max_capacity: defaults::DEFAULT_MAX_CAPACITY,
            desired_capacity: None,
            min_success_percent: defaults::DEFAULT_MIN_SUCCESS_PERCENT,
            signal_timeout_secs: defaults::DEFAULT_SIGNAL_TIMEOUT_SECS,
            managed_policies: defaults::DEFAULT_MANAGED_POLICIES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            rolling_update: Some(RollingUpdateConfig::default()),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

// -- Pipeline --------------------------------------------------------------

/// How the source stage learns about new commits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTrigger {
    /// A GitHub webhook starts the pipeline
    #[default]
    Webhook,
    /// CodePipeline polls the repository
    Poll,
    /// Only manual releases
    Manual,
}

/// Source stage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    #[garde(length(min = 1))]
    pub owner: String,
    #[garde(length(min = 1))]
    pub repo: String,
    #[garde(length(min = 1))]
    pub branch: String,
    /// Secrets Manager secret name holding the access token
    #[garde(length(min = 1))]
    pub token_secret: String,
    #[garde(skip)]
    pub trigger: SourceTrigger,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            owner: defaults::DEFAULT_REPO_OWNER.to_string(),
            repo: defaults::DEFAULT_REPO_NAME.to_string(),
            branch: defaults::DEFAULT_BRANCH.to_string(),
            token_secret: defaults::DEFAULT_TOKEN_SECRET.to_string(),
            trigger: SourceTrigger::default(),
        }
    }
}

/// Build stage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// CodeBuild container image
    #[garde(length(min = 1))]
    pub image: String,
    #[garde(length(min = 1))]
    pub compute_type: String,
    /// Runtime name → version for the install phase
    #[garde(skip)]
    pub runtime_versions: BTreeMap<String, String>,
    #[garde(skip)]
    pub install_commands: Vec<String>,
    #[garde(length(min = 1))]
    pub build_commands: Vec<String>,
    /// Output glob(s) captured as the build artifact
    #[garde(length(min = 1))]
    pub artifact_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub base_directory: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: defaults::DEFAULT_BUILD_IMAGE.to_string(),
            compute_type: defaults::DEFAULT_BUILD_COMPUTE_TYPE.to_string(),
            runtime_versions: BTreeMap::from([("nodejs".to_string(), "18".to_string())]),
            install_commands: vec!["npm install".to_string()],
            build_commands: vec!["npm run build".to_string()],
            artifact_files: vec!["**/*".to_string()],
            base_directory: None,
        }
    }
}

/// Deploy stage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    #[garde(length(min = 1))]
    pub deployment_config: String,
    /// Roll back automatically when a deployment fails
    #[garde(skip)]
    pub auto_rollback: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            deployment_config: defaults::DEFAULT_DEPLOYMENT_CONFIG.to_string(),
            auto_rollback: true,
        }
    }
}

/// Pipeline layer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    #[garde(dive)]
    pub source: SourceConfig,
    #[garde(dive)]
    pub build: BuildConfig,
    #[garde(dive)]
    pub deploy: DeployConfig,
}
