//! AWS implementations of the provider traits.

use std::{fmt::Debug, path::Path, str::FromStr};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::{
        Capability as CfnCapability, ChangeSetType as CfnChangeSetType, Parameter,
        StackStatus as CfnStackStatus, Tag,
    },
};
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use derive_more::Deref;

use super::{
    BlobStore, ChangeSetDescription, ChangeSetHandle, ChangeSetRequest, ChangeSetStatus,
    ProviderError, StackDescription, StackProvider, StackResource, StackStatus,
};

/// Region in which buckets must be created without a location constraint.
const DEFAULT_BUCKET_REGION: &str = "us-east-1";

/// Load the shared SDK configuration from the environment, optionally pinned to `region`.
pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

/// Turn an SDK failure into a [`ProviderError`], keeping the service's code and message.
fn provider_error<E, R>(operation: &'static str, err: &SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let message = match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (None, Some(message)) => message.to_string(),
        _ => DisplayErrorContext(err).to_string(),
    };

    let not_found = matches!(err.code(), Some("NoSuchBucket" | "NoSuchKey"))
        || message.contains("does not exist");
    if not_found {
        ProviderError::not_found(operation, message)
    } else {
        ProviderError::new(operation, message)
    }
}

fn stack_tags(tags: &[(String, String)]) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

/// CloudFormation-backed [`StackProvider`].
#[derive(Debug, Clone, Deref)]
pub struct AwsStackProvider {
    #[deref]
    client: aws_sdk_cloudformation::Client,
}

impl AwsStackProvider {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(config),
        }
    }

    pub fn from_client(client: aws_sdk_cloudformation::Client) -> Self {
        Self { client }
    }
}

impl StackProvider for AwsStackProvider {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackDescription>, ProviderError> {
        let output = match self.client.describe_stacks().stack_name(stack_name).send().await {
            Ok(output) => output,
            Err(err) => {
                let err = provider_error("DescribeStacks", &err);
                return if err.is_not_found() { Ok(None) } else { Err(err) };
            }
        };

        let Some(stack) = output.stacks().first() else {
            return Ok(None);
        };

        let status: Option<&CfnStackStatus> = Option::from(stack.stack_status());
        let status = status
            .map(|status| status.as_str())
            .ok_or_else(|| {
                ProviderError::new("DescribeStacks", format!("no status reported for {stack_name}"))
            })?;
        let status = StackStatus::from_str(status).map_err(|_| {
            ProviderError::new(
                "DescribeStacks",
                format!("unrecognised stack status {status} for {stack_name}"),
            )
        })?;

        Ok(Some(StackDescription {
            stack_name: stack_name.to_string(),
            stack_id: stack.stack_id().map(str::to_string),
            status,
            status_reason: stack.stack_status_reason().map(str::to_string),
        }))
    }

    async fn create_change_set(
        &self,
        request: ChangeSetRequest,
    ) -> Result<ChangeSetHandle, ProviderError> {
        let capabilities = request
            .capabilities
            .iter()
            .map(|capability| CfnCapability::from(capability.as_ref()))
            .collect::<Vec<_>>();
        let parameters = request
            .parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect::<Vec<_>>();
        let tags = stack_tags(&request.tags);

        let output = self
            .client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(CfnChangeSetType::from(request.change_set_type.as_ref()))
            .template_body(request.template_body)
            .set_capabilities(Some(capabilities))
            .set_parameters(Some(parameters))
            .set_tags(Some(tags))
            .set_role_arn(request.role_arn)
            .set_notification_arns(Some(request.notification_arns))
            .set_description(request.description)
            .send()
            .await
            .map_err(|e| provider_error("CreateChangeSet", &e))?;

        let id = output.id().ok_or_else(|| {
            ProviderError::new("CreateChangeSet", "no changeset id in the response")
        })?;

        Ok(ChangeSetHandle {
            id: id.to_string(),
            stack_id: output.stack_id().map(str::to_string),
        })
    }

    async fn describe_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> Result<ChangeSetDescription, ProviderError> {
        let output = self
            .client
            .describe_change_set()
            .change_set_name(change_set_id)
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| provider_error("DescribeChangeSet", &e))?;

        let status = output.status().map(|status| status.as_str()).ok_or_else(|| {
            ProviderError::new("DescribeChangeSet", format!("no status for {change_set_id}"))
        })?;
        let status = ChangeSetStatus::from_str(status).map_err(|_| {
            ProviderError::new(
                "DescribeChangeSet",
                format!("unrecognised changeset status {status}"),
            )
        })?;

        Ok(ChangeSetDescription {
            status,
            status_reason: output.status_reason().map(str::to_string),
        })
    }

    async fn execute_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .execute_change_set()
            .change_set_name(change_set_id)
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| provider_error("ExecuteChangeSet", &e))?;
        Ok(())
    }

    async fn delete_change_set(
        &self,
        change_set_id: &str,
        stack_name: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_change_set()
            .change_set_name(change_set_id)
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| provider_error("DeleteChangeSet", &e))?;
        Ok(())
    }

    async fn list_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResource>, ProviderError> {
        let mut pages = self
            .client
            .list_stack_resources()
            .stack_name(stack_name)
            .into_paginator()
            .send();

        let mut resources = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| provider_error("ListStackResources", &e))?;
            for summary in page.stack_resource_summaries() {
                let logical_id: Option<&str> = Option::from(summary.logical_resource_id());
                let resource_type: Option<&str> = Option::from(summary.resource_type());
                let (Some(logical_id), Some(resource_type)) = (logical_id, resource_type) else {
                    tracing::warn!(stack_name, "Skipping resource summary without id or type");
                    continue;
                };
                resources.push(StackResource {
                    logical_id: logical_id.to_string(),
                    resource_type: resource_type.to_string(),
                    physical_id: summary.physical_resource_id().map(str::to_string),
                });
            }
        }

        Ok(resources)
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ProviderError> {
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| provider_error("DeleteStack", &e))?;
        Ok(())
    }
}

/// S3-backed [`BlobStore`].
#[derive(Debug, Clone, Deref)]
pub struct S3BlobStore {
    #[deref]
    client: aws_sdk_s3::Client,
}

impl S3BlobStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

impl BlobStore for S3BlobStore {
    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<(), ProviderError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(region) = region.filter(|region| *region != DEFAULT_BUCKET_REGION) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| provider_error("CreateBucket", &e))?;
        Ok(())
    }

    async fn upload_file(&self, path: &Path, bucket: &str, key: &str) -> Result<(), ProviderError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ProviderError::new("PutObject", format!("{}: {e}", path.display())))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| provider_error("PutObject", &e))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, ProviderError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| provider_error("ListObjectsV2", &e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(str::to_string),
            );
        }

        Ok(keys)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ProviderError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| provider_error("DeleteObject", &e))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ProviderError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| provider_error("DeleteBucket", &e))?;
        Ok(())
    }
}
