//! Typed failures of the deployment orchestrator.

use std::time::Duration;

use thiserror::Error;

use crate::provider::{ProviderError, StackStatus};

/// Why a deployment did not reach its success status.
///
/// Changeset and stack failures mean the provider answered "no"; [`DeployError::Timeout`]
/// means it never answered within the configured bound.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The changeset settled as failed. Nothing was executed.
    #[error("changeset {change_set_id} for stack {stack_name} failed: {reason}")]
    ChangeSetFailed {
        stack_name: String,
        change_set_id: String,
        reason: String,
    },

    /// The stack reached a terminal status that is not success.
    #[error(
        "stack {stack_name} finished with status {status}{}",
        .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
    )]
    StackFailed {
        stack_name: String,
        status: StackStatus,
        reason: Option<String>,
    },

    /// Polling exceeded its bound without observing a terminal status.
    #[error(
        "timed out after {elapsed:?} waiting for {operation}{}",
        .last_status.as_deref().map(|s| format!(" (last status: {s})")).unwrap_or_default()
    )]
    Timeout {
        operation: String,
        elapsed: Duration,
        last_status: Option<String>,
    },

    /// A provider call failed outright.
    #[error(
        "provider error{}: {source}",
        .last_status.as_deref().map(|s| format!(" (last status: {s})")).unwrap_or_default()
    )]
    Provider {
        last_status: Option<String>,
        #[source]
        source: ProviderError,
    },
}

impl DeployError {
    pub(crate) fn provider(source: ProviderError, last_status: Option<String>) -> Self {
        Self::Provider {
            last_status,
            source,
        }
    }

    /// Attach the last observed status to a provider failure that lacks one.
    pub(crate) fn with_last_status(self, status: Option<String>) -> Self {
        match self {
            Self::Provider {
                last_status: None,
                source,
            } => Self::Provider {
                last_status: status,
                source,
            },
            other => other,
        }
    }

    /// Returns true if the failure was a polling timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
