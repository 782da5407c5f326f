//! Default configuration values
//!
//! These constants describe the stock topology: one public subnet tier, three
//! web/admin ingress rules, an nginx pool that needs 80% of its instances to
//! signal within five minutes, and a GitHub → CodeBuild → CodeDeploy pipeline.

/// Default CloudFormation stack name
pub const DEFAULT_STACK_NAME: &str = "WebAppStack";

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-2";

/// Default VPC address range
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";

/// Default number of availability zones to spread subnets across
pub const DEFAULT_MAX_AZS: u8 = 2;

/// Default number of NAT gateways
pub const DEFAULT_NAT_GATEWAYS: u8 = 1;

/// Default prefix length for each subnet
pub const DEFAULT_SUBNET_MASK: u8 = 24;

/// Source range meaning "anywhere"
pub const ANY_IPV4: &str = "0.0.0.0/0";

/// Default EC2 instance type
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

/// Public SSM parameter resolving to the latest Amazon Linux 2 AMI
pub const DEFAULT_IMAGE_PARAMETER: &str =
    "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";

/// Default minimum number of instances
pub const DEFAULT_MIN_CAPACITY: u32 = 1;

/// Default maximum number of instances
pub const DEFAULT_MAX_CAPACITY: u32 = 3;

/// Default percentage of instances that must signal success
pub const DEFAULT_MIN_SUCCESS_PERCENT: u8 = 80;

/// Default time allowed for instances to signal, in seconds (5 minutes)
pub const DEFAULT_SIGNAL_TIMEOUT_SECS: u64 = 300;

/// Default number of instances replaced at a time when the recipe changes
pub const DEFAULT_ROLLING_BATCH_SIZE: u32 = 1;

/// Managed policies attached to the instance role
pub const DEFAULT_MANAGED_POLICIES: &[&str] = &[
    "AmazonSSMManagedInstanceCore",
    "service-role/AmazonEC2RoleforAWSCodeDeploy",
];

/// Default branch the pipeline tracks
pub const DEFAULT_BRANCH: &str = "main";

/// Default Secrets Manager secret holding the GitHub token
pub const DEFAULT_TOKEN_SECRET: &str = "github-token";

/// Default repository owner
pub const DEFAULT_REPO_OWNER: &str = "example-org";

/// Default repository name
pub const DEFAULT_REPO_NAME: &str = "web-app";

/// Default CodeBuild image
pub const DEFAULT_BUILD_IMAGE: &str = "aws/codebuild/standard:7.0";

/// Default CodeBuild compute type
pub const DEFAULT_BUILD_COMPUTE_TYPE: &str = "BUILD_GENERAL1_SMALL";

/// Default CodeDeploy deployment configuration (rolling, one instance at a time)
pub const DEFAULT_DEPLOYMENT_CONFIG: &str = "CodeDeployDefault.OneAtATime";

/// Default web server virtual host placed on each instance
pub const DEFAULT_VHOST_PATH: &str = "/etc/nginx/conf.d/app.conf";

/// Local source of the virtual host file, relative to the config directory
pub const DEFAULT_VHOST_SOURCE: &str = "assets/nginx.conf";

/// Default deploy/destroy wait timeout in seconds (30 minutes)
pub const DEFAULT_STACK_TIMEOUT: u64 = 1800;

/// Largest template body CloudFormation accepts inline, in bytes
pub const MAX_INLINE_TEMPLATE_BYTES: usize = 51_200;

// Serde default functions for struct field defaults

/// Returns the default stack name
pub fn default_stack_name() -> String {
    DEFAULT_STACK_NAME.to_string()
}

/// Returns the default region
pub fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Returns the default file mode for placed files
pub fn default_file_mode() -> String {
    "000644".to_string()
}

/// Returns the default owner/group for placed files
pub fn default_file_owner() -> String {
    "root".to_string()
}

/// Returns `true`, for flags that default on
pub fn default_true() -> bool {
    true
}
