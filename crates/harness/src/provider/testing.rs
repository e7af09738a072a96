//! In-memory cloud used by the unit tests.
//!
//! Stacks and changesets advance one status per describe call, so the orchestrator
//! observes the same pending → settled progression it sees against the real service.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use serde_yaml_ng::Value;

use super::{
    BlobStore, Capability, ChangeSetDescription, ChangeSetHandle, ChangeSetRequest,
    ChangeSetStatus, ChangeSetType, ProviderError, StackDescription, StackProvider, StackResource,
    StackStatus,
};

pub(crate) const NO_CHANGES_REASON: &str = "The submitted information didn't contain changes. \
     Submit different information to create a change set.";

#[derive(Default)]
pub(crate) struct FakeCloud {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    stacks: HashMap<String, FakeStack>,
    change_sets: HashMap<String, FakeChangeSet>,
    buckets: HashMap<String, BTreeMap<String, Vec<u8>>>,
    next_id: usize,

    /// Executed changeset ids, in order.
    executed: Vec<String>,
    deleted_change_sets: Vec<String>,
    deleted_stacks: Vec<String>,

    /// Stacks stay in progress forever after execution.
    stall: bool,
    /// Changesets never leave CREATE_IN_PROGRESS.
    stall_change_sets: bool,
    /// Executions touching this resource type roll back.
    failing_resource_type: Option<String>,
    /// Fail every describe_stack call with this message.
    describe_error: Option<String>,
    /// Reject every execute_change_set call with this message.
    execute_error: Option<String>,
    /// Reject uploads of this object key.
    failing_upload: Option<String>,
}

struct FakeStack {
    status: StackStatus,
    reason: Option<String>,
    pending: VecDeque<StackStatus>,
    template: Option<String>,
    resources: Vec<StackResource>,
}

struct FakeChangeSet {
    stack_name: String,
    change_set_type: ChangeSetType,
    template: String,
    status: ChangeSetStatus,
    reason: Option<String>,
    pending: VecDeque<(ChangeSetStatus, Option<String>)>,
}

impl FakeCloud {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn stall_stacks(&self) {
        self.state().stall = true;
    }

    pub(crate) fn stall_change_sets(&self) {
        self.state().stall_change_sets = true;
    }

    pub(crate) fn fail_execute(&self, message: &str) {
        self.state().execute_error = Some(message.to_string());
    }

    pub(crate) fn fail_upload(&self, key: &str) {
        self.state().failing_upload = Some(key.to_string());
    }

    pub(crate) fn fail_resource_type(&self, resource_type: &str) {
        self.state().failing_resource_type = Some(resource_type.to_string());
    }

    pub(crate) fn fail_describe(&self, message: &str) {
        self.state().describe_error = Some(message.to_string());
    }

    /// Put a stack in place without going through a changeset.
    pub(crate) fn insert_stack(&self, name: &str, status: StackStatus) {
        self.state().stacks.insert(
            name.to_string(),
            FakeStack {
                status,
                reason: None,
                pending: VecDeque::new(),
                template: None,
                resources: Vec::new(),
            },
        );
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub(crate) fn deleted_change_sets(&self) -> Vec<String> {
        self.state().deleted_change_sets.clone()
    }

    pub(crate) fn deleted_stacks(&self) -> Vec<String> {
        self.state().deleted_stacks.clone()
    }

    pub(crate) fn has_stack(&self, name: &str) -> bool {
        self.state().stacks.contains_key(name)
    }

    pub(crate) fn objects(&self, bucket: &str) -> Option<Vec<String>> {
        self.state()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
    }

    pub(crate) fn has_bucket(&self, bucket: &str) -> bool {
        self.state().buckets.contains_key(bucket)
    }
}

/// Logical ids and types declared under `Resources`.
fn template_resources(template: &str) -> Result<Vec<(String, String)>, String> {
    let doc: Value = serde_yaml_ng::from_str(template).map_err(|e| e.to_string())?;
    let resources = doc
        .get("Resources")
        .and_then(Value::as_mapping)
        .ok_or_else(|| "Template format error: missing Resources section".to_string())?;

    resources
        .iter()
        .map(|(logical_id, body)| {
            let logical_id = logical_id
                .as_str()
                .ok_or_else(|| "Template format error: non-string logical id".to_string())?;
            let resource_type = body
                .get("Type")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("Template format error: {logical_id} has no Type"))?;
            Ok((logical_id.to_string(), resource_type.to_string()))
        })
        .collect()
}

impl StackProvider for FakeCloud {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackDescription>, ProviderError> {
        let mut state = self.state();
        if let Some(message) = &state.describe_error {
            return Err(ProviderError::new("DescribeStacks", message.clone()));
        }

        let Some(stack) = state.stacks.get_mut(stack_name) else {
            return Ok(None);
        };
        if let Some(next) = stack.pending.pop_front() {
            stack.status = next;
        }

        Ok(Some(StackDescription {
            stack_name: stack_name.to_string(),
            stack_id: Some(format!("arn:fake:stack/{stack_name}")),
            status: stack.status,
            status_reason: stack.reason.clone(),
        }))
    }

    async fn create_change_set(
        &self,
        request: ChangeSetRequest,
    ) -> Result<ChangeSetHandle, ProviderError> {
        let mut state = self.state();
        let existing = state.stacks.get(&request.stack_name);

        match (request.change_set_type, existing) {
            (ChangeSetType::Create, Some(stack)) if stack.status != StackStatus::ReviewInProgress => {
                return Err(ProviderError::new(
                    "CreateChangeSet",
                    format!(
                        "Stack [{}] already exists and cannot be created again with the changeSet",
                        request.stack_name
                    ),
                ));
            }
            (ChangeSetType::Update, None) => {
                return Err(ProviderError::not_found(
                    "CreateChangeSet",
                    format!("Stack [{}] does not exist", request.stack_name),
                ));
            }
            _ => {}
        }

        let previous_template = existing.and_then(|stack| stack.template.clone());
        if request.change_set_type == ChangeSetType::Create {
            state.stacks.insert(
                request.stack_name.clone(),
                FakeStack {
                    status: StackStatus::ReviewInProgress,
                    reason: None,
                    pending: VecDeque::new(),
                    template: None,
                    resources: Vec::new(),
                },
            );
        }

        let settled = match template_resources(&request.template_body) {
            Err(reason) => (ChangeSetStatus::Failed, Some(reason)),
            Ok(resources)
                if resources.iter().any(|(_, ty)| ty.starts_with("AWS::IAM::"))
                    && !request.capabilities.contains(&Capability::Iam)
                    && !request.capabilities.contains(&Capability::NamedIam) =>
            {
                (
                    ChangeSetStatus::Failed,
                    Some("Requires capabilities : [CAPABILITY_IAM]".to_string()),
                )
            }
            Ok(_) if previous_template.as_deref() == Some(request.template_body.as_str()) => {
                (ChangeSetStatus::Failed, Some(NO_CHANGES_REASON.to_string()))
            }
            Ok(_) => (ChangeSetStatus::CreateComplete, None),
        };

        let pending = if state.stall_change_sets {
            VecDeque::from([(ChangeSetStatus::CreateInProgress, None)])
        } else {
            VecDeque::from([(ChangeSetStatus::CreateInProgress, None), settled])
        };

        state.next_id += 1;
        let id = format!(
            "arn:fake:changeSet/{}/{}",
            request.change_set_name, state.next_id
        );
        state.change_sets.insert(
            id.clone(),
            FakeChangeSet {
                stack_name: request.stack_name.clone(),
                change_set_type: request.change_set_type,
                template: request.template_body,
                status: ChangeSetStatus::CreatePending,
                reason: None,
                pending,
            },
        );

        Ok(ChangeSetHandle {
            id,
            stack_id: Some(format!("arn:fake:stack/{}", request.stack_name)),
        })
    }

    async fn describe_change_set(
        &self,
        change_set_id: &str,
        _stack_name: &str,
    ) -> Result<ChangeSetDescription, ProviderError> {
        let mut state = self.state();
        let change_set = state.change_sets.get_mut(change_set_id).ok_or_else(|| {
            ProviderError::not_found(
                "DescribeChangeSet",
                format!("ChangeSet [{change_set_id}] does not exist"),
            )
        })?;

        if let Some((status, reason)) = change_set.pending.pop_front() {
            change_set.status = status;
            change_set.reason = reason;
        }

        Ok(ChangeSetDescription {
            status: change_set.status,
            status_reason: change_set.reason.clone(),
        })
    }

    async fn execute_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        if let Some(message) = &state.execute_error {
            return Err(ProviderError::new("ExecuteChangeSet", message.clone()));
        }
        let change_set = state.change_sets.get(change_set_id).ok_or_else(|| {
            ProviderError::not_found(
                "ExecuteChangeSet",
                format!("ChangeSet [{change_set_id}] does not exist"),
            )
        })?;
        if change_set.status != ChangeSetStatus::CreateComplete {
            return Err(ProviderError::new(
                "ExecuteChangeSet",
                format!(
                    "ChangeSet [{change_set_id}] cannot be executed in its current status of [{}]",
                    change_set.status
                ),
            ));
        }

        let change_set_type = change_set.change_set_type;
        let template = change_set.template.clone();
        let resources = template_resources(&template).unwrap_or_default();
        let rolls_back = state
            .failing_resource_type
            .as_ref()
            .is_some_and(|failing| resources.iter().any(|(_, ty)| ty == failing));
        let stall = state.stall;

        let stack = state.stacks.get_mut(stack_name).ok_or_else(|| {
            ProviderError::not_found("ExecuteChangeSet", format!("Stack [{stack_name}] does not exist"))
        })?;

        let in_progress = match change_set_type {
            ChangeSetType::Create => StackStatus::CreateInProgress,
            ChangeSetType::Update => StackStatus::UpdateInProgress,
        };
        stack.pending = if stall {
            VecDeque::from([in_progress])
        } else if rolls_back {
            stack.reason = Some("The following resource(s) failed to create".to_string());
            match change_set_type {
                ChangeSetType::Create => VecDeque::from([
                    in_progress,
                    StackStatus::RollbackInProgress,
                    StackStatus::RollbackComplete,
                ]),
                ChangeSetType::Update => VecDeque::from([
                    in_progress,
                    StackStatus::UpdateRollbackInProgress,
                    StackStatus::UpdateRollbackComplete,
                ]),
            }
        } else {
            stack.template = Some(template);
            stack.resources = resources
                .into_iter()
                .map(|(logical_id, resource_type)| StackResource {
                    physical_id: Some(format!("{stack_name}-{logical_id}-PHYSICAL")),
                    logical_id,
                    resource_type,
                })
                .collect();
            match change_set_type {
                ChangeSetType::Create => {
                    VecDeque::from([in_progress, in_progress, StackStatus::CreateComplete])
                }
                ChangeSetType::Update => VecDeque::from([
                    in_progress,
                    StackStatus::UpdateCompleteCleanupInProgress,
                    StackStatus::UpdateComplete,
                ]),
            }
        };

        state.executed.push(change_set_id.to_string());
        Ok(())
    }

    async fn delete_change_set(
        &self,
        change_set_id: &str,
        _stack_name: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.change_sets.remove(change_set_id).is_none() {
            return Err(ProviderError::not_found(
                "DeleteChangeSet",
                format!("ChangeSet [{change_set_id}] does not exist"),
            ));
        }
        state.deleted_change_sets.push(change_set_id.to_string());
        Ok(())
    }

    async fn list_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResource>, ProviderError> {
        self.state()
            .stacks
            .get(stack_name)
            .map(|stack| stack.resources.clone())
            .ok_or_else(|| {
                ProviderError::not_found(
                    "ListStackResources",
                    format!("Stack with id {stack_name} does not exist"),
                )
            })
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.stacks.remove(stack_name);
        state.deleted_stacks.push(stack_name.to_string());
        Ok(())
    }
}

impl BlobStore for FakeCloud {
    async fn create_bucket(&self, bucket: &str, _region: Option<&str>) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.buckets.contains_key(bucket) {
            return Err(ProviderError::new(
                "CreateBucket",
                format!("BucketAlreadyOwnedByYou: {bucket}"),
            ));
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn upload_file(&self, path: &Path, bucket: &str, key: &str) -> Result<(), ProviderError> {
        let contents = std::fs::read(path).map_err(|e| {
            ProviderError::new("PutObject", format!("{}: {e}", path.display()))
        })?;
        let mut state = self.state();
        let objects = state.buckets.get_mut(bucket).ok_or_else(|| {
            ProviderError::not_found("PutObject", format!("NoSuchBucket: {bucket}"))
        })?;
        objects.insert(key.to_string(), contents);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, ProviderError> {
        self.objects(bucket)
            .ok_or_else(|| ProviderError::not_found("ListObjectsV2", format!("NoSuchBucket: {bucket}")))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        let objects = state.buckets.get_mut(bucket).ok_or_else(|| {
            ProviderError::not_found("DeleteObject", format!("NoSuchBucket: {bucket}"))
        })?;
        objects.remove(key);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        match state.buckets.get(bucket) {
            None => Err(ProviderError::not_found(
                "DeleteBucket",
                format!("NoSuchBucket: {bucket}"),
            )),
            Some(objects) if !objects.is_empty() => Err(ProviderError::new(
                "DeleteBucket",
                format!("BucketNotEmpty: {bucket}"),
            )),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }
}
