//! CloudFormation stack operations
//!
//! [`CloudFormationClient`] wraps the SDK calls webfleet needs: describe,
//! create, update and delete a stack, and read its events and outputs.
//! Throttled calls are retried with exponential backoff. The
//! [`StackOperations`] trait is the seam the deploy flow is written against.

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, not_found_as_none};
use anyhow::{Context, Result};
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::types::{Capability, Tag};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where CloudFormation reads the template from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Inline template text
    Body(String),
    /// URL of a staged template object
    Url(String),
}

impl TemplateSource {
    fn body(&self) -> Option<String> {
        match self {
            TemplateSource::Body(text) => Some(text.clone()),
            TemplateSource::Url(_) => None,
        }
    }

    fn url(&self) -> Option<String> {
        match self {
            TemplateSource::Url(url) => Some(url.clone()),
            TemplateSource::Body(_) => None,
        }
    }
}

/// Current state of a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSummary {
    pub stack_id: String,
    pub status: String,
    pub reason: Option<String>,
}

/// A resource event that ended in failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEvent {
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    pub reason: String,
}

/// Coarse classification of a stack status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    InProgress,
    Complete,
    /// The last operation failed or was rolled back
    Failed,
    Deleted,
}

/// Classify a CloudFormation stack status string
pub fn classify_stack_status(status: &str) -> StackPhase {
    if status.ends_with("_IN_PROGRESS") {
        StackPhase::InProgress
    } else if status == "DELETE_COMPLETE" {
        StackPhase::Deleted
    } else if status.ends_with("_FAILED") || status.ends_with("ROLLBACK_COMPLETE") {
        StackPhase::Failed
    } else if status.ends_with("_COMPLETE") {
        StackPhase::Complete
    } else {
        StackPhase::Failed
    }
}

/// Patterns in failure reasons that point at a known cause
const FAILURE_HINTS: &[(&str, &str)] = &[
    (
        "FAILURE signal",
        "An instance's bootstrap recipe failed. Check /var/log/cfn-init.log on the instance.",
    ),
    (
        "Failed to receive",
        "Instances did not signal in time. The recipe may be slow or unable to reach the internet.",
    ),
    (
        "secretsmanager",
        "The source token secret could not be resolved. Check that it exists in this region.",
    ),
    (
        "already exists",
        "A resource with the same physical name exists outside this stack.",
    ),
];

/// Hint for a failure reason, if the cause is recognizable
pub fn failure_hint(reason: &str) -> Option<&'static str> {
    FAILURE_HINTS
        .iter()
        .find(|(pattern, _)| reason.contains(pattern))
        .map(|(_, hint)| *hint)
}

/// Stack operations the deploy flow needs
pub trait StackOperations: Send + Sync {
    /// Current state, or `None` if no such stack exists
    fn describe(&self, name: &str) -> impl Future<Output = Result<Option<StackSummary>>> + Send;

    /// Create a stack and return its ID
    fn create(
        &self,
        name: &str,
        source: &TemplateSource,
        tags: &[Tag],
    ) -> impl Future<Output = Result<String>> + Send;

    /// Update a stack; `None` when there is nothing to change
    fn update(
        &self,
        name: &str,
        source: &TemplateSource,
        tags: &[Tag],
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    fn delete(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Most recent failed resource events, newest first
    fn failed_events(&self, name: &str) -> impl Future<Output = Result<Vec<FailedEvent>>> + Send;

    /// Stack outputs as key/value pairs
    fn outputs(&self, name: &str) -> impl Future<Output = Result<Vec<(String, String)>>> + Send;
}

/// Backoff for throttled API calls
fn throttle_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(5)
        .with_jitter()
}

/// Number of failed events reported with a stack failure
const MAX_FAILED_EVENTS: usize = 10;

pub struct CloudFormationClient {
    client: Client,
}

impl CloudFormationClient {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.cloudformation_client(),
        }
    }
}

impl StackOperations for CloudFormationClient {
    async fn describe(&self, name: &str) -> Result<Option<StackSummary>> {
        let result = (|| async { self.client.describe_stacks().stack_name(name).send().await })
            .retry(throttle_backoff())
            .when(|e| classify_sdk_error(e).is_retryable())
            .notify(|e, delay| warn!(error = %e, ?delay, "DescribeStacks throttled, retrying"))
            .await;

        let Some(output) = not_found_as_none(result)
            .with_context(|| format!("Failed to describe stack {name}"))?
        else {
            return Ok(None);
        };

        Ok(output.stacks().first().map(|stack| StackSummary {
            stack_id: stack.stack_id().unwrap_or_default().to_string(),
            status: stack
                .stack_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            reason: stack.stack_status_reason().map(str::to_string),
        }))
    }

    async fn create(&self, name: &str, source: &TemplateSource, tags: &[Tag]) -> Result<String> {
        info!(stack = %name, "Creating stack");
        let output = (|| async {
            self.client
                .create_stack()
                .stack_name(name)
                .set_template_body(source.body())
                .set_template_url(source.url())
                .capabilities(Capability::CapabilityIam)
                .capabilities(Capability::CapabilityNamedIam)
                .set_tags(Some(tags.to_vec()))
                .send()
                .await
        })
        .retry(throttle_backoff())
        .when(|e| classify_sdk_error(e).is_retryable())
        .notify(|e, delay| warn!(error = %e, ?delay, "CreateStack throttled, retrying"))
        .await
        .map_err(|e| {
            let classified = classify_sdk_error(&e);
            match classified.suggestion() {
                Some(hint) => anyhow::Error::new(e).context(hint),
                None => anyhow::Error::new(e),
            }
        })
        .with_context(|| format!("Failed to create stack {name}"))?;

        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn update(
        &self,
        name: &str,
        source: &TemplateSource,
        tags: &[Tag],
    ) -> Result<Option<String>> {
        info!(stack = %name, "Updating stack");
        let result = (|| async {
            self.client
                .update_stack()
                .stack_name(name)
                .set_template_body(source.body())
                .set_template_url(source.url())
                .capabilities(Capability::CapabilityIam)
                .capabilities(Capability::CapabilityNamedIam)
                .set_tags(Some(tags.to_vec()))
                .send()
                .await
        })
        .retry(throttle_backoff())
        .when(|e| classify_sdk_error(e).is_retryable())
        .notify(|e, delay| warn!(error = %e, ?delay, "UpdateStack throttled, retrying"))
        .await;

        match result {
            Ok(output) => Ok(Some(output.stack_id().unwrap_or_default().to_string())),
            Err(e) if classify_sdk_error(&e).is_no_changes() => {
                debug!(stack = %name, "Template and tags unchanged");
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("Failed to update stack {name}")),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        info!(stack = %name, "Deleting stack");
        (|| async { self.client.delete_stack().stack_name(name).send().await })
            .retry(throttle_backoff())
            .when(|e| classify_sdk_error(e).is_retryable())
            .await
            .with_context(|| format!("Failed to delete stack {name}"))?;
        Ok(())
    }

    async fn failed_events(&self, name: &str) -> Result<Vec<FailedEvent>> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(name)
            .send()
            .await
            .with_context(|| format!("Failed to read events of stack {name}"))?;

        Ok(output
            .stack_events()
            .iter()
            .filter_map(|event| {
                let status = event.resource_status()?.as_str().to_string();
                if !status.ends_with("_FAILED") {
                    return None;
                }
                Some(FailedEvent {
                    logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
                    resource_type: event.resource_type().unwrap_or_default().to_string(),
                    status,
                    reason: event.resource_status_reason().unwrap_or_default().to_string(),
                })
            })
            .take(MAX_FAILED_EVENTS)
            .collect())
    }

    async fn outputs(&self, name: &str) -> Result<Vec<(String, String)>> {
        let output = self
            .client
            .describe_stacks()
            .stack_name(name)
            .send()
            .await
            .with_context(|| format!("Failed to read outputs of stack {name}"))?;

        Ok(output
            .stacks()
            .first()
            .map(|stack| {
                stack
                    .outputs()
                    .iter()
                    .filter_map(|o| {
                        Some((o.output_key()?.to_string(), o.output_value()?.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
