//! webfleet-template - CloudFormation document model
//!
//! A small, typed model of a CloudFormation template: resources, parameters
//! and outputs kept in insertion order, intrinsic-function helpers, IAM policy
//! documents and reference checking. Serializes to JSON or YAML.
//!
//! ## Modules
//!
//! - [`duration`]: ISO-8601 durations for signal timeouts and pause times
//! - [`intrinsic`]: `Ref`, `Fn::GetAtt`, `Fn::Sub` and friends
//! - [`policy`]: IAM policy documents
//! - [`template`]: The template, its resources and reference validation

pub mod duration;
pub mod intrinsic;
pub mod policy;
pub mod template;

pub use duration::iso8601_duration;
pub use policy::{Effect, PolicyDocument, Statement};
pub use template::{DeletionPolicy, Output, Parameter, Resource, Template, TemplateError};
