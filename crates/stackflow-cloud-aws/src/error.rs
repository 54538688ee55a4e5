//! AWS service errors mapped onto `CloudError`
//!
//! Every service crate re-exports the same smithy error types, so one
//! generic conversion serves S3, IAM, EC2, RDS and STS alike.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use stackflow_cloud::{CloudError, Result};

/// Error codes meaning the addressed resource does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "NotFound",
    "NoSuchBucket",
    "NoSuchEntity",
    "InvalidGroup.NotFound",
    "InvalidInstanceID.NotFound",
    "InvalidVpcID.NotFound",
    "InvalidPermission.NotFound",
    "DBInstanceNotFound",
    "DBSubnetGroupNotFoundFault",
];

/// Error codes meaning the name is already taken by us
const ALREADY_EXISTS_CODES: &[&str] = &[
    "BucketAlreadyOwnedByYou",
    "EntityAlreadyExists",
    "InvalidGroup.Duplicate",
    "InvalidPermission.Duplicate",
    "DBInstanceAlreadyExists",
    "DBSubnetGroupAlreadyExists",
];

const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "InvalidClientTokenId",
    "ExpiredToken",
    "SignatureDoesNotMatch",
];

/// Classify an AWS error code
///
/// `BucketAlreadyExists` (a bucket of another account) stays an API error.
pub fn classify(operation: &str, code: Option<&str>, message: &str) -> CloudError {
    match code {
        Some(code) if NOT_FOUND_CODES.contains(&code) => {
            CloudError::ResourceNotFound(format!("{} ({}): {}", operation, code, message))
        }
        Some(code) if ALREADY_EXISTS_CODES.contains(&code) => {
            CloudError::ResourceAlreadyExists(format!("{} ({}): {}", operation, code, message))
        }
        Some(code) if ACCESS_DENIED_CODES.contains(&code) => {
            CloudError::AccessDenied(format!("{} ({}): {}", operation, code, message))
        }
        Some(code) => CloudError::api(operation, format!("{}: {}", code, message)),
        None => CloudError::api(operation, message),
    }
}

/// Convert an SDK error into a `CloudError`
pub(crate) fn sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let service = err.as_service_error();
    let code = service.and_then(|e| e.code()).map(str::to_string);
    let message = match service.and_then(|e| e.message()) {
        Some(message) => message.to_string(),
        None => DisplayErrorContext(&err).to_string(),
    };

    tracing::debug!(operation, code = ?code, "AWS call failed: {}", message);
    classify(operation, code.as_deref(), &message)
}

/// Turn "not found" into `None`
pub(crate) fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
