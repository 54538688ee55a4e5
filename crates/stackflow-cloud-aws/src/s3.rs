//! S3 bucket operations

use crate::error::sdk_error;
use crate::provider::AwsProvider;
use async_trait::async_trait;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
    PublicAccessBlockConfiguration,
};
use stackflow_cloud::{BucketApi, CloudError, CloudProvider, Result};

/// us-east-1 rejects an explicit location constraint
fn location_constraint(region: &str) -> Option<BucketLocationConstraint> {
    (region != "us-east-1").then(|| BucketLocationConstraint::from(region))
}

fn public_access_block(blocked: bool) -> PublicAccessBlockConfiguration {
    PublicAccessBlockConfiguration::builder()
        .block_public_acls(blocked)
        .ignore_public_acls(blocked)
        .block_public_policy(blocked)
        .restrict_public_buckets(blocked)
        .build()
}

#[async_trait]
impl BucketApi for AwsProvider {
    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        match self.s3.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => match sdk_error("head_bucket", e) {
                err if err.is_not_found() => Ok(false),
                err => Err(err),
            },
        }
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        tracing::debug!("s3:CreateBucket {}", name);
        let mut request = self.s3.create_bucket().bucket(name);
        if let Some(constraint) = location_constraint(self.region()) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| sdk_error("create_bucket", e))?;
        Ok(())
    }

    async fn set_public_access_block(&self, name: &str, blocked: bool) -> Result<()> {
        self.s3
            .put_public_access_block()
            .bucket(name)
            .public_access_block_configuration(public_access_block(blocked))
            .send()
            .await
            .map_err(|e| sdk_error("put_public_access_block", e))?;
        Ok(())
    }

    async fn put_bucket_policy(&self, name: &str, policy: &str) -> Result<()> {
        self.s3
            .put_bucket_policy()
            .bucket(name)
            .policy(policy)
            .send()
            .await
            .map_err(|e| sdk_error("put_bucket_policy", e))?;
        Ok(())
    }

    async fn empty_bucket(&self, name: &str) -> Result<usize> {
        let mut removed = 0;
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .s3
                .list_objects_v2()
                .bucket(name)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| sdk_error("list_objects_v2", e))?;

            let objects = page
                .contents()
                .iter()
                .filter_map(|o| o.key())
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CloudError::api("delete_objects", e))?;

            if !objects.is_empty() {
                let count = objects.len();
                let delete = Delete::builder()
                    .set_objects(Some(objects))
                    .quiet(true)
                    .build()
                    .map_err(|e| CloudError::api("delete_objects", e))?;
                let output = self
                    .s3
                    .delete_objects()
                    .bucket(name)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| sdk_error("delete_objects", e))?;

                if let Some(failed) = output.errors().first() {
                    return Err(CloudError::api(
                        "delete_objects",
                        format!(
                            "{} object(s) could not be deleted, first {}: {}",
                            output.errors().len(),
                            failed.key().unwrap_or("?"),
                            failed.message().unwrap_or("unknown error")
                        ),
                    ));
                }
                removed += count;
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        tracing::debug!("Removed {} object(s) from {}", removed, name);
        Ok(removed)
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        tracing::debug!("s3:DeleteBucket {}", name);
        self.s3
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| sdk_error("delete_bucket", e))?;
        Ok(())
    }
}
