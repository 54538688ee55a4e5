use super::{DeleteOutcome, ResourceDriver, create_or_reuse, not_ready};
use crate::error::Result;
use crate::provider::{ComputeApi, InstanceSpec, ResourceKind, ResourceStatus};
use async_trait::async_trait;

/// Compute instance, found again by its `Name` tag
pub struct InstanceDriver<'a, P: ?Sized> {
    api: &'a P,
}

impl<'a, P: ComputeApi + ?Sized> InstanceDriver<'a, P> {
    pub fn new(api: &'a P) -> Self {
        Self { api }
    }

    /// Image to boot: the configured one, or the newest match of `name_filter`
    pub async fn resolve_image(
        &self,
        configured: Option<&str>,
        owner: &str,
        name_filter: &str,
    ) -> Result<String> {
        if let Some(image_id) = configured.filter(|id| !id.is_empty()) {
            return Ok(image_id.to_string());
        }

        let image_id = self.api.latest_image_id(owner, name_filter).await?;
        tracing::info!("Resolved image {} from '{}'", image_id, name_filter);
        Ok(image_id)
    }

    /// Public address; only known once the instance is running
    pub async fn public_ip(&self, instance_id: &str) -> Result<String> {
        self.api
            .describe_instance(instance_id)
            .await?
            .filter(|info| {
                ResourceStatus::from_instance_state(&info.state) == ResourceStatus::Available
            })
            .and_then(|info| info.public_ip)
            .ok_or_else(|| not_ready(Self::KIND, instance_id, "public address"))
    }
}

#[async_trait]
impl<'a, P: ComputeApi + ?Sized> ResourceDriver for InstanceDriver<'a, P> {
    type Spec = InstanceSpec;

    const KIND: ResourceKind = ResourceKind::Instance;

    async fn create(&self, spec: &InstanceSpec) -> Result<String> {
        if let Some(info) = self.api.find_instance_by_name(&spec.name).await? {
            tracing::info!(
                "Instance {} already exists ({}), reusing",
                spec.name,
                info.id
            );
            return Ok(info.id);
        }

        create_or_reuse(
            Self::KIND,
            &spec.name,
            move || async move { self.api.run_instance(spec).await },
            move || async move {
                Ok(self
                    .api
                    .find_instance_by_name(&spec.name)
                    .await?
                    .map(|info| info.id))
            },
        )
        .await
    }

    async fn describe(&self, id: &str) -> Result<ResourceStatus> {
        Ok(match self.api.describe_instance(id).await? {
            Some(info) => ResourceStatus::from_instance_state(&info.state),
            None => ResourceStatus::Absent,
        })
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        if self.describe(id).await?.is_gone() {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        DeleteOutcome::from_result(self.api.terminate_instance(id).await)
    }
}
