//! webfleet - CloudFormation synthesis and deployment for a web fleet
//!
//! This crate turns a [`config::StackConfig`] into a CloudFormation template
//! (VPC, security group, auto scaling web pool, build and deploy pipeline)
//! and drives the CloudFormation API to deploy or destroy it.
//!
//! ## Modules
//!
//! - [`synth`]: Layered template synthesis
//! - [`deploy`]: Create/update/delete flows with waiting and failure reports
//! - [`aws`]: CloudFormation and S3 clients
//! - [`wait`]: Polling with backoff and cancellation

pub mod aws;
pub mod config;
pub mod deploy;
pub mod error;
pub mod synth;
pub mod wait;
