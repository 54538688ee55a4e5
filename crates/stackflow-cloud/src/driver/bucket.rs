use super::{DeleteOutcome, ResourceDriver, create_or_reuse};
use crate::error::Result;
use crate::provider::{BucketApi, ResourceKind, ResourceStatus};
use async_trait::async_trait;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct BucketSpec {
    pub name: String,
}

/// Object storage bucket
pub struct BucketDriver<'a, P: ?Sized> {
    api: &'a P,
}

impl<'a, P: BucketApi + ?Sized> BucketDriver<'a, P> {
    pub fn new(api: &'a P) -> Self {
        Self { api }
    }

    /// Make every object publicly readable
    ///
    /// Lifts the bucket's public-access block and attaches a public-read
    /// policy. Accounts may forbid public buckets, so callers treat a failure
    /// here as a warning.
    pub async fn open_public_read(&self, name: &str) -> Result<()> {
        self.api.set_public_access_block(name, false).await?;
        self.api
            .put_bucket_policy(name, &public_read_policy(name))
            .await?;
        tracing::info!("Bucket {} is publicly readable", name);
        Ok(())
    }

    /// Delete every object so the bucket itself can be deleted
    pub async fn empty(&self, name: &str) -> Result<usize> {
        let removed = self.api.empty_bucket(name).await?;
        tracing::debug!("Removed {} objects from {}", removed, name);
        Ok(removed)
    }
}

#[async_trait]
impl<'a, P: BucketApi + ?Sized> ResourceDriver for BucketDriver<'a, P> {
    type Spec = BucketSpec;

    const KIND: ResourceKind = ResourceKind::Bucket;

    async fn create(&self, spec: &BucketSpec) -> Result<String> {
        if self.api.bucket_exists(&spec.name).await? {
            tracing::info!("Bucket {} already exists, reusing", spec.name);
            return Ok(spec.name.clone());
        }

        create_or_reuse(
            Self::KIND,
            &spec.name,
            move || async move {
                self.api.create_bucket(&spec.name).await?;
                Ok(spec.name.clone())
            },
            move || async move {
                Ok(self
                    .api
                    .bucket_exists(&spec.name)
                    .await?
                    .then(|| spec.name.clone()))
            },
        )
        .await
    }

    async fn describe(&self, id: &str) -> Result<ResourceStatus> {
        Ok(if self.api.bucket_exists(id).await? {
            ResourceStatus::Available
        } else {
            ResourceStatus::Absent
        })
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        DeleteOutcome::from_result(self.api.delete_bucket(id).await)
    }
}

fn public_read_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicReadGetObject",
            "Effect": "Allow",
            "Principal": "*",
            "Action": "s3:GetObject",
            "Resource": format!("arn:aws:s3:::{}/*", bucket),
        }]
    })
    .to_string()
}
