//! AWS provider for stackflow
//!
//! This crate implements the `stackflow-cloud` provider traits on top of the
//! AWS SDK for Rust:
//!
//! - S3 for the bucket ([`BucketApi`](stackflow_cloud::BucketApi))
//! - IAM for the role, inline policy and instance profile
//! - EC2 for the default VPC, security groups, images and the instance
//! - RDS for the subnet group and the database instance
//! - STS for the caller-identity check
//!
//! # Requirements
//!
//! Credentials are resolved by the standard AWS chain (environment, shared
//! config/credentials files, SSO, instance metadata).
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::CloudProvider;
//! use stackflow_cloud_aws::AwsProvider;
//!
//! let provider = AwsProvider::new("us-east-1").await;
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

mod ec2;
pub mod error;
mod iam;
pub mod provider;
mod rds;
mod s3;

pub use provider::AwsProvider;
