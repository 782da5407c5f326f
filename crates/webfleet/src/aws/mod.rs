//! AWS client modules
//!
//! Wrappers around the AWS SDK clients used to deploy a synthesized stack:
//! - CloudFormation: create, update, delete and inspect stacks
//! - S3: stage templates too large to pass inline

pub mod cloudformation;
pub mod context;
pub mod error;
pub mod s3;
pub mod tags;

pub use cloudformation::{
    CloudFormationClient, FailedEvent, StackOperations, StackPhase, StackSummary, TemplateSource,
    classify_stack_status, failure_hint,
};
pub use context::AwsContext;
pub use error::{AwsError, classify_aws_error, classify_sdk_error, not_found_as_none};
pub use s3::S3Client;
pub use tags::cfn_stack_tags;
