//! Changeset-based deployment of a single stack.
//!
//! The lifecycle is: pick the changeset type, create the changeset, wait for it to
//! settle, execute it, then wait for the stack to reach a terminal status. A changeset
//! that settles with nothing to change is a successful outcome; it is deleted instead
//! of executed.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    error::DeployError,
    poll::{DEFAULT_POLL_INTERVAL_SECS, Poll, PollPolicy},
    provider::{
        Capability, ChangeSetHandle, ChangeSetRequest, ChangeSetStatus, ChangeSetType,
        StackProvider, StackStatus,
    },
};

/// Default prefix for changeset names.
pub const DEFAULT_CHANGE_SET_PREFIX: &str = "sam-integ-";

/// Provider reasons attached to a FAILED changeset that had nothing to change.
const NO_CHANGES_REASONS: &[&str] = &[
    "The submitted information didn't contain changes",
    "No updates are to be performed",
];

/// Timing and naming configuration for the [`ChangeSetDeployer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Prefix of every changeset name, followed by a unix timestamp.
    pub change_set_prefix: String,
    /// How long to wait for a changeset to leave its pending state.
    pub change_set_poll: PollPolicy,
    /// How long to wait for the stack to reach a terminal status after execution.
    pub stack_poll: PollPolicy,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            change_set_prefix: DEFAULT_CHANGE_SET_PREFIX.to_string(),
            change_set_poll: PollPolicy::new(DEFAULT_POLL_INTERVAL_SECS, 600),
            stack_poll: PollPolicy::new(DEFAULT_POLL_INTERVAL_SECS, 3600),
        }
    }
}

/// Per-deployment inputs besides the template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    pub capabilities: Vec<Capability>,
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,
}

/// How a changeset settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSetSettlement {
    /// Ready to execute.
    Ready,
    /// The template resolves to the stack as it already is.
    NoChanges { reason: String },
}

/// Result of a successful [`ChangeSetDeployer::deploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// The stack status once the deployment settled.
    pub stack_status: StackStatus,
    pub change_set_type: ChangeSetType,
    pub change_set_id: String,
    /// False when the changeset had no changes and was not executed.
    pub applied: bool,
}

/// Drives the changeset state machine against a [`StackProvider`].
pub struct ChangeSetDeployer<P> {
    provider: P,
    config: DeployerConfig,
}

impl<P: StackProvider> ChangeSetDeployer<P> {
    pub fn new(provider: P, config: DeployerConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Deploy `template_body` to `stack_name` and wait for the outcome.
    pub async fn deploy(
        &self,
        stack_name: &str,
        template_body: &str,
        options: &DeployOptions,
    ) -> Result<DeployOutcome, DeployError> {
        tracing::info!(stack_name, "Starting changeset deployment...");

        let (handle, change_set_type) = self
            .create_change_set(stack_name, template_body, options)
            .await?;

        let settlement = match self.wait_for_change_set(&handle.id, stack_name).await {
            Ok(settlement) => settlement,
            Err(err) => {
                self.abandon_change_set(&handle.id, stack_name).await;
                return Err(err);
            }
        };

        if let ChangeSetSettlement::NoChanges { reason } = settlement {
            tracing::info!(stack_name, reason = %reason, "Changeset contains no changes, nothing to execute");
            self.abandon_change_set(&handle.id, stack_name).await;

            let stack_status = self
                .provider
                .describe_stack(stack_name)
                .await
                .map_err(|e| DeployError::provider(e, None))?
                .map(|stack| stack.status)
                .ok_or_else(|| DeployError::StackFailed {
                    stack_name: stack_name.to_string(),
                    status: StackStatus::DeleteComplete,
                    reason: Some("stack disappeared after an empty changeset".to_string()),
                })?;

            return Ok(DeployOutcome {
                stack_status,
                change_set_type,
                change_set_id: handle.id,
                applied: false,
            });
        }

        if let Err(err) = self.execute_change_set(&handle.id, stack_name).await {
            self.abandon_change_set(&handle.id, stack_name).await;
            return Err(err);
        }
        let stack_status = self.wait_for_execute(stack_name, change_set_type).await?;

        tracing::info!(
            stack_name,
            %stack_status,
            %change_set_type,
            "✓ Deployment complete"
        );

        Ok(DeployOutcome {
            stack_status,
            change_set_type,
            change_set_id: handle.id,
            applied: true,
        })
    }

    /// Whether a stack that a changeset can update exists under this name.
    ///
    /// A stack left in `REVIEW_IN_PROGRESS` by a never-executed create changeset does
    /// not count, nor does a deleted one.
    pub async fn has_stack(&self, stack_name: &str) -> Result<bool, DeployError> {
        let stack = match self.provider.describe_stack(stack_name).await {
            Ok(stack) => stack,
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(DeployError::provider(err, None)),
        };

        Ok(stack.is_some_and(|stack| {
            !matches!(
                stack.status,
                StackStatus::ReviewInProgress | StackStatus::DeleteComplete
            )
        }))
    }

    /// Submit a changeset, choosing CREATE or UPDATE from whether the stack exists.
    pub async fn create_change_set(
        &self,
        stack_name: &str,
        template_body: &str,
        options: &DeployOptions,
    ) -> Result<(ChangeSetHandle, ChangeSetType), DeployError> {
        let change_set_type = if self.has_stack(stack_name).await? {
            ChangeSetType::Update
        } else {
            ChangeSetType::Create
        };

        let now = Utc::now();
        let request = ChangeSetRequest {
            stack_name: stack_name.to_string(),
            change_set_name: format!("{}{}", self.config.change_set_prefix, now.timestamp()),
            change_set_type,
            template_body: template_body.to_string(),
            capabilities: options.capabilities.clone(),
            parameters: Vec::new(),
            tags: Vec::new(),
            role_arn: options.role_arn.clone(),
            notification_arns: options.notification_arns.clone(),
            description: Some(format!(
                "Created by stackcheck at {} UTC",
                now.format("%Y-%m-%dT%H:%M:%S")
            )),
        };

        tracing::debug!(
            stack_name,
            change_set_name = %request.change_set_name,
            %change_set_type,
            capabilities = ?request.capabilities,
            "Creating changeset"
        );

        let handle = self
            .provider
            .create_change_set(request)
            .await
            .map_err(|e| DeployError::provider(e, None))?;

        tracing::info!(stack_name, change_set_id = %handle.id, %change_set_type, "Changeset created");

        Ok((handle, change_set_type))
    }

    /// Poll the changeset until it leaves the pending state.
    pub async fn wait_for_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> Result<ChangeSetSettlement, DeployError> {
        let operation = format!("changeset {change_set_id}");

        self.config
            .change_set_poll
            .poll(&operation, || async {
                let description = match self
                    .provider
                    .describe_change_set(change_set_id, stack_name)
                    .await
                {
                    Ok(description) => description,
                    Err(err) => return Poll::Failed(DeployError::provider(err, None)),
                };

                match description.status {
                    ChangeSetStatus::CreateComplete => Poll::Ready(ChangeSetSettlement::Ready),
                    ChangeSetStatus::CreatePending | ChangeSetStatus::CreateInProgress => {
                        Poll::Pending(description.status.to_string())
                    }
                    ChangeSetStatus::Failed => {
                        let reason = description.status_reason.unwrap_or_default();
                        if is_no_changes_reason(&reason) {
                            Poll::Ready(ChangeSetSettlement::NoChanges { reason })
                        } else {
                            Poll::Failed(DeployError::ChangeSetFailed {
                                stack_name: stack_name.to_string(),
                                change_set_id: change_set_id.to_string(),
                                reason,
                            })
                        }
                    }
                    status => Poll::Failed(DeployError::ChangeSetFailed {
                        stack_name: stack_name.to_string(),
                        change_set_id: change_set_id.to_string(),
                        reason: description
                            .status_reason
                            .unwrap_or_else(|| format!("changeset is {status}")),
                    }),
                }
            })
            .await
    }

    /// Start executing a settled changeset. Does not wait for the stack.
    pub async fn execute_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> Result<(), DeployError> {
        tracing::info!(stack_name, change_set_id, "Executing changeset");
        self.provider
            .execute_change_set(change_set_id, stack_name)
            .await
            .map_err(|e| DeployError::provider(e, Some(ChangeSetStatus::CreateComplete.to_string())))
    }

    /// Poll the stack until it reaches a terminal status for `change_set_type`.
    pub async fn wait_for_execute(
        &self,
        stack_name: &str,
        change_set_type: ChangeSetType,
    ) -> Result<StackStatus, DeployError> {
        let success = change_set_type.success_status();
        let operation = format!("stack {stack_name} to reach {success}");

        self.config
            .stack_poll
            .poll(&operation, || async {
                let stack = match self.provider.describe_stack(stack_name).await {
                    Ok(Some(stack)) => stack,
                    Ok(None) => {
                        return Poll::Failed(DeployError::StackFailed {
                            stack_name: stack_name.to_string(),
                            status: StackStatus::DeleteComplete,
                            reason: Some("stack no longer exists".to_string()),
                        });
                    }
                    Err(err) => return Poll::Failed(DeployError::provider(err, None)),
                };

                tracing::debug!(stack_name, status = %stack.status, "Stack status");

                if stack.status == success {
                    Poll::Ready(stack.status)
                } else if stack.status.is_failure() {
                    Poll::Failed(DeployError::StackFailed {
                        stack_name: stack_name.to_string(),
                        status: stack.status,
                        reason: stack.status_reason,
                    })
                } else {
                    Poll::Pending(stack.status.to_string())
                }
            })
            .await
    }

    /// Delete a changeset that will not be executed. Failures are only logged.
    async fn abandon_change_set(&self, change_set_id: &str, stack_name: &str) {
        match self
            .provider
            .delete_change_set(change_set_id, stack_name)
            .await
        {
            Ok(()) => tracing::debug!(stack_name, change_set_id, "Abandoned changeset deleted"),
            Err(err) => {
                tracing::warn!(stack_name, change_set_id, error = %err, "Failed to delete abandoned changeset")
            }
        }
    }
}

fn is_no_changes_reason(reason: &str) -> bool {
    NO_CHANGES_REASONS
        .iter()
        .any(|marker| reason.contains(marker))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::provider::testing::FakeCloud;

    const BUCKET_TEMPLATE: &str = "Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n";
    const ROLE_TEMPLATE: &str = "Resources:\n  Role:\n    Type: AWS::IAM::Role\n  Bucket:\n    Type: AWS::S3::Bucket\n";

    fn deployer(cloud: &Arc<FakeCloud>) -> ChangeSetDeployer<Arc<FakeCloud>> {
        ChangeSetDeployer::new(cloud.clone(), DeployerConfig::default())
    }

    fn options() -> DeployOptions {
        DeployOptions {
            capabilities: vec![Capability::Iam, Capability::AutoExpand],
            ..Default::default()
        }
    }

    #[test]
    fn test_no_changes_reasons() {
        assert!(is_no_changes_reason(
            "The submitted information didn't contain changes. Submit different information to create a change set."
        ));
        assert!(is_no_changes_reason("No updates are to be performed."));
        assert!(!is_no_changes_reason("Requires capabilities : [CAPABILITY_IAM]"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_deploy_creates_stack() {
        let cloud = Arc::new(FakeCloud::default());
        let deployer = deployer(&cloud);

        let outcome = deployer
            .deploy("stack-a", ROLE_TEMPLATE, &options())
            .await
            .unwrap();

        assert_eq!(outcome.change_set_type, ChangeSetType::Create);
        assert_eq!(outcome.stack_status, StackStatus::CreateComplete);
        assert!(outcome.applied);
        assert_eq!(cloud.executed(), vec![outcome.change_set_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redeploying_same_template_is_update_with_no_changes() {
        let cloud = Arc::new(FakeCloud::default());
        let deployer = deployer(&cloud);

        deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap();
        let outcome = deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap();

        assert_eq!(outcome.change_set_type, ChangeSetType::Update);
        assert!(!outcome.applied);
        assert_eq!(outcome.stack_status, StackStatus::CreateComplete);
        assert_eq!(cloud.executed().len(), 1);
        assert_eq!(cloud.deleted_change_sets(), vec![outcome.change_set_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_template_updates_stack() {
        let cloud = Arc::new(FakeCloud::default());
        let deployer = deployer(&cloud);

        deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap();
        let outcome = deployer
            .deploy("stack-a", ROLE_TEMPLATE, &options())
            .await
            .unwrap();

        assert_eq!(outcome.change_set_type, ChangeSetType::Update);
        assert_eq!(outcome.stack_status, StackStatus::UpdateComplete);
        assert!(outcome.applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_capability_fails_without_execution() {
        let cloud = Arc::new(FakeCloud::default());
        let deployer = deployer(&cloud);

        let err = deployer
            .deploy("stack-a", ROLE_TEMPLATE, &DeployOptions::default())
            .await
            .unwrap_err();

        match err {
            DeployError::ChangeSetFailed { reason, .. } => {
                assert!(reason.contains("CAPABILITY_IAM"), "{reason}");
            }
            other => panic!("expected changeset failure, got {other:?}"),
        }
        assert!(cloud.executed().is_empty());
        assert_eq!(cloud.deleted_change_sets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_is_reported_as_stack_failure() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.fail_resource_type("AWS::S3::Bucket");
        let deployer = deployer(&cloud);

        let err = deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap_err();

        match err {
            DeployError::StackFailed { status, reason, .. } => {
                assert_eq!(status, StackStatus::RollbackComplete);
                assert!(reason.is_some());
            }
            other => panic!("expected stack failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stack_times_out() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.stall_stacks();
        let deployer = ChangeSetDeployer::new(
            cloud.clone(),
            DeployerConfig {
                stack_poll: PollPolicy::new(5, 60),
                ..Default::default()
            },
        );

        let err = deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap_err();

        match err {
            DeployError::Timeout { last_status, .. } => {
                assert_eq!(last_status.as_deref(), Some("CREATE_IN_PROGRESS"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_change_set_times_out_and_is_abandoned() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.stall_change_sets();
        let deployer = ChangeSetDeployer::new(
            cloud.clone(),
            DeployerConfig {
                change_set_poll: PollPolicy::new(5, 30),
                ..Default::default()
            },
        );

        let err = deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap_err();

        match err {
            DeployError::Timeout { last_status, .. } => {
                assert_eq!(last_status.as_deref(), Some("CREATE_IN_PROGRESS"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(cloud.executed().is_empty());
        assert_eq!(cloud.deleted_change_sets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_execution_abandons_change_set() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.fail_execute("Throttling: Rate exceeded");
        let deployer = deployer(&cloud);

        let err = deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap_err();

        match err {
            DeployError::Provider { source, .. } => {
                assert_eq!(source.operation, "ExecuteChangeSet");
                assert_eq!(source.message, "Throttling: Rate exceeded");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
        assert!(cloud.executed().is_empty());
        assert_eq!(cloud.deleted_change_sets().len(), 1);
    }

    #[tokio::test]
    async fn test_review_in_progress_stack_counts_as_missing() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.insert_stack("stack-a", StackStatus::ReviewInProgress);
        cloud.insert_stack("stack-b", StackStatus::UpdateRollbackComplete);
        let deployer = deployer(&cloud);

        assert!(!deployer.has_stack("stack-a").await.unwrap());
        assert!(deployer.has_stack("stack-b").await.unwrap());
        assert!(!deployer.has_stack("stack-c").await.unwrap());
    }

    #[tokio::test]
    async fn test_describe_failure_propagates_as_provider_error() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.fail_describe("Rate exceeded");
        let deployer = deployer(&cloud);

        let err = deployer
            .deploy("stack-a", BUCKET_TEMPLATE, &options())
            .await
            .unwrap_err();

        match err {
            DeployError::Provider { source, .. } => {
                assert_eq!(source.operation, "DescribeStacks");
                assert_eq!(source.message, "Rate exceeded");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
