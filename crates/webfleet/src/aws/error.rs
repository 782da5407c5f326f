//! AWS error classification
//!
//! Provides typed errors for AWS SDK operations using the `.code()` and
//! `.message()` accessors instead of string matching on Debug format.

use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use thiserror::Error;

/// AWS error categories for retry and deploy logic
#[derive(Debug, Error)]
pub enum AwsError {
    /// Stack or object was not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// An update would not change anything
    #[error("No updates are to be performed")]
    NoChanges,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// The template declares IAM resources the call did not acknowledge
    #[error("Insufficient capabilities: {0}")]
    InsufficientCapabilities(String),

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound(_))
    }

    pub fn is_no_changes(&self) -> bool {
        matches!(self, AwsError::NoChanges)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            AwsError::InsufficientCapabilities(_) => {
                suggestion_for_code("InsufficientCapabilitiesException")
            }
            AwsError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            _ => None,
        }
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &["NoSuchBucket", "NoSuchKey", "StackNotFoundException"];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Classify an AWS SDK error using the error code.
///
/// CloudFormation reports both a missing stack and an empty update as
/// `ValidationError`, so those two are told apart by message.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound(message),
        Some("ValidationError") if message.contains("does not exist") => {
            AwsError::NotFound(message)
        }
        Some("ValidationError") if message.contains("No updates are to be performed") => {
            AwsError::NoChanges
        }
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some("InsufficientCapabilitiesException") => AwsError::InsufficientCapabilities(message),
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK error that exposes error metadata
pub fn classify_sdk_error<E: ProvideErrorMetadata>(error: &E) -> AwsError {
    classify_aws_error(error.code(), error.message())
}

/// Turn a "not found" error into `Ok(None)`
pub fn not_found_as_none<T, E>(result: Result<T, E>) -> Result<Option<T>, E>
where
    E: ProvideErrorMetadata,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if classify_sdk_error(&e).is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "InsufficientCapabilitiesException",
        "The template creates IAM roles; deploy with CAPABILITY_IAM and CAPABILITY_NAMED_IAM.",
    ),
    (
        "LimitExceededException",
        "An account quota was reached. Request a service limit increase via the Service Quotas console.",
    ),
    (
        "TokenAlreadyExistsException",
        "A request with the same client token is already in flight. Wait for it to finish.",
    ),
    (
        "AccessDenied",
        "The credentials in use lack permission for this call. Check the active AWS profile.",
    ),
    (
        "ExpiredToken",
        "The session credentials have expired. Refresh them and retry.",
    ),
    (
        "Throttling",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
    (
        "ThrottlingException",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
];

fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
