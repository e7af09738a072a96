//! Provider boundary for the stack-management and blob-store services.
//!
//! The harness talks to the cloud exclusively through the [`StackProvider`] and
//! [`BlobStore`] traits. The production implementations live in [`aws`]; tests use an
//! in-memory double.

pub mod aws;

#[cfg(test)]
pub(crate) mod testing;

use std::{future::Future, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aws::{AwsStackProvider, S3BlobStore};

/// Broad classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The addressed entity (stack, bucket, object) does not exist.
    NotFound,
    /// Anything else the provider rejected or failed to answer.
    Other,
}

/// A failed call against the provider.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct ProviderError {
    /// The provider operation that failed (e.g. `DescribeStacks`).
    pub operation: &'static str,
    /// The provider's diagnostic message.
    pub message: String,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            kind: ProviderErrorKind::Other,
        }
    }

    pub fn not_found(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            kind: ProviderErrorKind::NotFound,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

/// Stack status as reported by the stack-management service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    CreateInProgress,
    CreateFailed,
    CreateComplete,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    UpdateInProgress,
    UpdateCompleteCleanupInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackComplete,
    ReviewInProgress,
    ImportInProgress,
    ImportComplete,
    ImportRollbackInProgress,
    ImportRollbackFailed,
    ImportRollbackComplete,
}

impl StackStatus {
    /// Returns true while the provider is still working on the stack.
    pub fn is_in_progress(&self) -> bool {
        self.as_ref().ends_with("_IN_PROGRESS")
    }

    /// Returns true for statuses that mean the last operation did not apply.
    ///
    /// Every rollback outcome, every `*_FAILED` status and `DELETE_COMPLETE` count.
    pub fn is_failure(&self) -> bool {
        if self.is_in_progress() {
            return false;
        }
        let status = self.as_ref();
        status.contains("ROLLBACK") || status.ends_with("_FAILED") || *self == Self::DeleteComplete
    }
}

/// Kind of changeset, chosen from whether the stack already exists.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSetType {
    Create,
    Update,
}

impl ChangeSetType {
    /// The stack status that marks a successful execution of this changeset type.
    pub fn success_status(&self) -> StackStatus {
        match self {
            ChangeSetType::Create => StackStatus::CreateComplete,
            ChangeSetType::Update => StackStatus::UpdateComplete,
        }
    }
}

/// Changeset status as reported by the stack-management service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSetStatus {
    CreatePending,
    CreateInProgress,
    CreateComplete,
    DeletePending,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    Failed,
}

/// Acknowledgements the caller grants for templates that need them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum Capability {
    #[strum(serialize = "CAPABILITY_IAM")]
    #[serde(rename = "CAPABILITY_IAM")]
    Iam,
    #[strum(serialize = "CAPABILITY_NAMED_IAM")]
    #[serde(rename = "CAPABILITY_NAMED_IAM")]
    NamedIam,
    #[strum(serialize = "CAPABILITY_AUTO_EXPAND")]
    #[serde(rename = "CAPABILITY_AUTO_EXPAND")]
    AutoExpand,
}

/// One poll result for a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_name: String,
    pub stack_id: Option<String>,
    pub status: StackStatus,
    pub status_reason: Option<String>,
}

/// Everything needed to submit a changeset.
#[derive(Debug, Clone)]
pub struct ChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub change_set_type: ChangeSetType,
    pub template_body: String,
    pub capabilities: Vec<Capability>,
    /// Always empty for this harness; kept so the wire call is explicit.
    pub parameters: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,
    pub description: Option<String>,
}

/// Identity of a submitted changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetHandle {
    pub id: String,
    pub stack_id: Option<String>,
}

/// One poll result for a changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetDescription {
    pub status: ChangeSetStatus,
    pub status_reason: Option<String>,
}

/// One row of a stack's resource listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackResource {
    pub logical_id: String,
    pub resource_type: String,
    pub physical_id: Option<String>,
}

/// The stack-management service.
pub trait StackProvider: Send + Sync {
    /// Describe a stack by name. Returns `None` if it does not exist.
    fn describe_stack(
        &self,
        stack_name: &str,
    ) -> impl Future<Output = Result<Option<StackDescription>, ProviderError>> + Send;

    fn create_change_set(
        &self,
        request: ChangeSetRequest,
    ) -> impl Future<Output = Result<ChangeSetHandle, ProviderError>> + Send;

    fn describe_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> impl Future<Output = Result<ChangeSetDescription, ProviderError>> + Send;

    /// Start executing a changeset. Returns before the stack settles.
    fn execute_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    fn delete_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    fn list_stack_resources(
        &self,
        stack_name: &str,
    ) -> impl Future<Output = Result<Vec<StackResource>, ProviderError>> + Send;

    /// Request deletion of a stack. Deleting a stack that is already gone succeeds.
    fn delete_stack(&self, stack_name: &str)
    -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// The blob store used to stage assets.
pub trait BlobStore: Send + Sync {
    /// Create a bucket, constrained to `region` when one is given.
    fn create_bucket(
        &self,
        bucket: &str,
        region: Option<&str>,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    fn upload_file(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// List every object key in the bucket.
    fn list_objects(
        &self,
        bucket: &str,
    ) -> impl Future<Output = Result<Vec<String>, ProviderError>> + Send;

    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    fn delete_bucket(&self, bucket: &str)
    -> impl Future<Output = Result<(), ProviderError>> + Send;
}

impl<T: StackProvider> StackProvider for Arc<T> {
    fn describe_stack(
        &self,
        stack_name: &str,
    ) -> impl Future<Output = Result<Option<StackDescription>, ProviderError>> + Send {
        (**self).describe_stack(stack_name)
    }

    fn create_change_set(
        &self,
        request: ChangeSetRequest,
    ) -> impl Future<Output = Result<ChangeSetHandle, ProviderError>> + Send {
        (**self).create_change_set(request)
    }

    fn describe_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> impl Future<Output = Result<ChangeSetDescription, ProviderError>> + Send {
        (**self).describe_change_set(change_set_id, stack_name)
    }

    fn execute_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).execute_change_set(change_set_id, stack_name)
    }

    fn delete_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).delete_change_set(change_set_id, stack_name)
    }

    fn list_stack_resources(
        &self,
        stack_name: &str,
    ) -> impl Future<Output = Result<Vec<StackResource>, ProviderError>> + Send {
        (**self).list_stack_resources(stack_name)
    }

    fn delete_stack(
        &self,
        stack_name: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).delete_stack(stack_name)
    }
}

impl<T: BlobStore> BlobStore for Arc<T> {
    fn create_bucket(
        &self,
        bucket: &str,
        region: Option<&str>,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).create_bucket(bucket, region)
    }

    fn upload_file(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).upload_file(path, bucket, key)
    }

    fn list_objects(
        &self,
        bucket: &str,
    ) -> impl Future<Output = Result<Vec<String>, ProviderError>> + Send {
        (**self).list_objects(bucket)
    }

    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).delete_object(bucket, key)
    }

    fn delete_bucket(&self, bucket: &str) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).delete_bucket(bucket)
    }
}
