//! Stack tag conversion for the CloudFormation API
//!
//! Tag keys and values are defined in `webfleet_common::tags`; this module
//! turns them into SDK types.

use aws_sdk_cloudformation::types::Tag;
use webfleet_common::tags::stack_tags;

/// Standard webfleet tags for a stack, as CloudFormation tags
pub fn cfn_stack_tags(stack_name: &str, now: chrono::DateTime<chrono::Utc>) -> Vec<Tag> {
    stack_tags(stack_name, now)
        .into_iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}
