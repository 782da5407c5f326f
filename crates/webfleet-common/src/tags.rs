//! Stack tag constants for webfleet
//!
//! Every stack webfleet deploys carries these tags. CloudFormation propagates
//! stack tags to the resources it creates, so they also mark the VPC, the
//! instances and the pipeline for discovery and cleanup.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `webfleet:tool` | Static identifier ("webfleet") |
//! | `webfleet:stack` | Stack name the resource belongs to |
//! | `webfleet:created-at` | RFC 3339 time of the deploy that created/updated it |
//! | `webfleet:subnet-type` | Tier kind of a subnet, set in the template |

/// Tag key for tool identification - all webfleet stacks have this
pub const TAG_TOOL: &str = "webfleet:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "webfleet";

/// Tag key for the owning stack name
pub const TAG_STACK: &str = "webfleet:stack";

/// Tag key for deploy timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "webfleet:created-at";

/// Tag key marking a subnet's tier kind (Public, Private or Isolated)
pub const TAG_SUBNET_TYPE: &str = "webfleet:subnet-type";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Standard key/value pairs for a stack, in a stable order.
pub fn stack_tags(
    stack_name: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<(&'static str, String)> {
    vec![
        (TAG_TOOL, TAG_TOOL_VALUE.to_string()),
        (TAG_STACK, stack_name.to_string()),
        (TAG_CREATED_AT, format_created_at(now)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_created_at_is_rfc3339() {
        let now = Utc::now();
        let formatted = format_created_at(now);
        let parsed = chrono::DateTime::parse_from_rfc3339(&formatted).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), now);
    }

    #[test]
    fn test_stack_tags_order() {
        let tags = stack_tags("WebAppStack", Utc::now());
        let keys: Vec<_> = tags.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![TAG_TOOL, TAG_STACK, TAG_CREATED_AT]);
        assert_eq!(tags[1].1, "WebAppStack");
    }
}
