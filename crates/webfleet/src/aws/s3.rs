//! Template staging in S3
//!
//! CloudFormation only accepts inline template bodies up to 51 200 bytes;
//! larger templates are uploaded to a staging bucket and passed by URL.

use crate::aws::context::AwsContext;
use anyhow::{Context, Result};
use aws_sdk_s3::{Client, primitives::ByteStream};
use tracing::{debug, info};

pub struct S3Client {
    client: Client,
    region: String,
}

/// Virtual-hosted-style URL of an object
pub fn object_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}

/// Object key a stack's template is staged under
pub fn template_key(stack_name: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "webfleet/{stack_name}/{}.template.json",
        now.format("%Y%m%dT%H%M%SZ")
    )
}

impl S3Client {
    /// Create an S3 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
            region: ctx.region().to_string(),
        }
    }

    /// Upload bytes to S3
    pub async fn upload_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        debug!(bucket = %bucket, key = %key, size = data.len(), "Uploading bytes");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload bytes")?;

        Ok(())
    }

    /// Upload a template body and return the URL CloudFormation reads it from
    pub async fn stage_template(&self, bucket: &str, key: &str, body: &str) -> Result<String> {
        info!(bucket = %bucket, key = %key, size = body.len(), "Staging template");
        self.upload_bytes(bucket, key, body.as_bytes().to_vec(), "application/json")
            .await
            .with_context(|| format!("Failed to stage template in bucket {bucket}"))?;
        Ok(object_url(bucket, &self.region, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_url() {
        assert_eq!(
            object_url("staging", "us-east-2", "webfleet/App/t.json"),
            "https://staging.s3.us-east-2.amazonaws.com/webfleet/App/t.json"
        );
    }

    #[test]
    fn test_template_key() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            template_key("WebAppStack", now),
            "webfleet/WebAppStack/20260304T050607Z.template.json"
        );
    }
}
