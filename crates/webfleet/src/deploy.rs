//! Deploy and destroy flows
//!
//! These drive a [`StackOperations`] implementation: decide between create
//! and update, wait for the stack to settle, and report outputs or the
//! events that made it fail.

use crate::aws::{
    FailedEvent, StackOperations, StackPhase, TemplateSource, classify_stack_status, failure_hint,
};
use crate::wait::{WaitConfig, wait_for_resource};
use anyhow::{Result, bail};
use aws_sdk_cloudformation::types::Tag;
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status a stack is left in when its first creation fails; it can only be
/// deleted
const ROLLBACK_COMPLETE: &str = "ROLLBACK_COMPLETE";

/// Operation being waited on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOperation {
    Create,
    Update,
    Delete,
}

impl StackOperation {
    fn verb(self) -> &'static str {
        match self {
            StackOperation::Create => "create",
            StackOperation::Update => "update",
            StackOperation::Delete => "delete",
        }
    }
}

#[derive(Debug)]
pub struct DeployRequest {
    pub stack_name: String,
    pub source: TemplateSource,
    pub tags: Vec<Tag>,
    /// Wait for completion with this polling profile, or return right away
    pub wait: Option<WaitConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Created { stack_id: String },
    Updated { stack_id: String },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub outcome: DeployOutcome,
    /// Stack outputs; empty when not waiting for completion
    pub outputs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// No stack by that name
    Absent,
    /// Dry run: the stack exists with this status and would be deleted
    WouldDelete { status: String },
    Deleted,
}

/// Render failed events (and hints) into an error message body
fn describe_failures(events: &[FailedEvent]) -> String {
    let mut text = String::new();
    for event in events {
        let _ = write!(
            text,
            "\n  {} ({}) {}: {}",
            event.logical_id, event.resource_type, event.status, event.reason
        );
        if let Some(hint) = failure_hint(&event.reason) {
            let _ = write!(text, "\n    hint: {hint}");
        }
    }
    text
}

/// Poll a stack until the operation settles
pub async fn wait_for_stack<S: StackOperations>(
    ops: &S,
    name: &str,
    operation: StackOperation,
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let label = format!("stack {name} {}", operation.verb());
    wait_for_resource(
        config,
        cancel,
        move || async move {
            let Some(summary) = ops.describe(name).await? else {
                if operation == StackOperation::Delete {
                    return Ok(true);
                }
                bail!("Stack {name} disappeared during {}", operation.verb());
            };
            match classify_stack_status(&summary.status) {
                StackPhase::InProgress => {
                    debug!(stack = %name, status = %summary.status, "Stack in progress");
                    Ok(false)
                }
                StackPhase::Deleted => Ok(operation == StackOperation::Delete),
                StackPhase::Complete if operation != StackOperation::Delete => Ok(true),
                StackPhase::Complete => Ok(false),
                StackPhase::Failed => {
                    let events = ops.failed_events(name).await.unwrap_or_else(|e| {
                        warn!(error = %e, "Could not read stack events");
                        Vec::new()
                    });
                    bail!(
                        "Stack {name} {} failed with status {}{}{}",
                        operation.verb(),
                        summary.status,
                        summary
                            .reason
                            .map(|r| format!(": {r}"))
                            .unwrap_or_default(),
                        describe_failures(&events)
                    )
                }
            }
        },
        &label,
    )
    .await?;
    Ok(())
}

/// Create the stack if absent, otherwise update it
pub async fn deploy_stack<S: StackOperations>(
    ops: &S,
    request: &DeployRequest,
    cancel: Option<&CancellationToken>,
) -> Result<DeployReport> {
    let name = request.stack_name.as_str();

    let outcome = match ops.describe(name).await? {
        None => {
            let stack_id = ops.create(name, &request.source, &request.tags).await?;
            info!(stack = %name, %stack_id, "Stack creation started");
            DeployOutcome::Created { stack_id }
        }
        Some(summary) if summary.status == ROLLBACK_COMPLETE => {
            bail!(
                "Stack {name} is in {ROLLBACK_COMPLETE} after a failed create and cannot be updated; \
                 run `webfleet destroy --execute` first"
            )
        }
        Some(summary) if classify_stack_status(&summary.status) == StackPhase::InProgress => {
            bail!(
                "Stack {name} is busy ({}); wait for the current operation to finish",
                summary.status
            )
        }
        Some(_) => match ops.update(name, &request.source, &request.tags).await? {
            Some(stack_id) => {
                info!(stack = %name, %stack_id, "Stack update started");
                DeployOutcome::Updated { stack_id }
            }
            None => {
                info!(stack = %name, "No changes to deploy");
                DeployOutcome::Unchanged
            }
        },
    };

    let Some(wait) = request.wait.clone() else {
        return Ok(DeployReport {
            outcome,
            outputs: Vec::new(),
        });
    };

    let operation = match outcome {
        DeployOutcome::Created { .. } => Some(StackOperation::Create),
        DeployOutcome::Updated { .. } => Some(StackOperation::Update),
        DeployOutcome::Unchanged => None,
    };
    if let Some(operation) = operation {
        wait_for_stack(ops, name, operation, wait, cancel).await?;
        info!(stack = %name, "Stack {} complete", operation.verb());
    }

    let outputs = ops.outputs(name).await?;
    Ok(DeployReport { outcome, outputs })
}

/// Delete the stack. Without `execute` only report what would happen.
pub async fn destroy_stack<S: StackOperations>(
    ops: &S,
    name: &str,
    execute: bool,
    wait: Option<WaitConfig>,
    cancel: Option<&CancellationToken>,
) -> Result<DestroyOutcome> {
    let Some(summary) = ops.describe(name).await? else {
        info!(stack = %name, "Stack does not exist");
        return Ok(DestroyOutcome::Absent);
    };

    if !execute {
        return Ok(DestroyOutcome::WouldDelete {
            status: summary.status,
        });
    }

    ops.delete(name).await?;
    if let Some(wait) = wait {
        wait_for_stack(ops, name, StackOperation::Delete, wait, cancel).await?;
        info!(stack = %name, "Stack deleted");
    }
    Ok(DestroyOutcome::Deleted)
}
