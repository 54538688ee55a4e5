//! AWS provider implementation

use crate::error::sdk_error;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use stackflow_cloud::{AuthStatus, CloudProvider};

/// AWS provider
///
/// Holds one SDK client per service, all bound to the same region.
pub struct AwsProvider {
    region: String,
    pub(crate) s3: aws_sdk_s3::Client,
    pub(crate) iam: aws_sdk_iam::Client,
    pub(crate) ec2: aws_sdk_ec2::Client,
    pub(crate) rds: aws_sdk_rds::Client,
    sts: aws_sdk_sts::Client,
}

impl AwsProvider {
    /// Load credentials from the default chain and target `region`
    pub async fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        Self::from_sdk_config(region, &config)
    }

    pub fn from_sdk_config(region: impl Into<String>, config: &SdkConfig) -> Self {
        Self {
            region: region.into(),
            s3: aws_sdk_s3::Client::new(config),
            iam: aws_sdk_iam::Client::new(config),
            ec2: aws_sdk_ec2::Client::new(config),
            rds: aws_sdk_rds::Client::new(config),
            sts: aws_sdk_sts::Client::new(config),
        }
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn check_auth(&self) -> stackflow_cloud::Result<AuthStatus> {
        match self.sts.get_caller_identity().send().await {
            Ok(identity) => {
                let account = identity.account().unwrap_or("unknown");
                let arn = identity.arn().unwrap_or("unknown");
                tracing::debug!("Authenticated as {} in account {}", arn, account);
                Ok(AuthStatus::ok(format!("{} ({})", account, arn)))
            }
            Err(e) => Ok(AuthStatus::failed(
                sdk_error("get_caller_identity", e).to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sdk_config() {
        let config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("ap-northeast-1"))
            .build();

        let provider = AwsProvider::from_sdk_config("ap-northeast-1", &config);
        assert_eq!(provider.name(), "aws");
        assert_eq!(provider.region(), "ap-northeast-1");
    }
}
