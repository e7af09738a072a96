//! Suite and case lifecycle.
//!
//! A [`FixtureSuite`] stages the shared assets once, then runs any number of cases. Each
//! case resolves its template, transforms it, deploys it to a stack of its own and
//! verifies the stack's resources. The case's stack and generated files are removed
//! whether the case passed or not; [`FixtureSuite::teardown`] removes the staging bucket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::{
    config::HarnessConfig,
    deployer::{ChangeSetDeployer, DeployOutcome},
    fs::FsHandler,
    naming,
    provider::{
        AwsStackProvider, BlobStore, S3BlobStore, StackProvider, StackStatus, aws::load_sdk_config,
    },
    stager::{AssetKey, AssetStager, StagedAssets},
    template::TemplateResolver,
    transform::{CommandTransform, TemplateTransform},
    verifier::{self, ResourceManifest, VerificationReport},
};

/// Why a case failed after its stack deployed.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("stack {stack_name} is {actual}, expected {expected}")]
    UnexpectedStatus {
        stack_name: String,
        expected: StackStatus,
        actual: StackStatus,
    },

    #[error("stack {stack_name} does not match {}:\n{report}", .manifest.display())]
    ResourceMismatch {
        stack_name: String,
        manifest: PathBuf,
        report: VerificationReport,
    },
}

/// State shared by every case of a suite. Written once during setup.
#[derive(Debug, Clone)]
pub struct FixtureContext {
    pub bucket: String,
    pub assets: StagedAssets,
}

/// Names and paths owned by one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureCase {
    pub name: String,
    pub stack_name: String,
    pub template_path: PathBuf,
    pub substituted_path: PathBuf,
    pub transformed_path: PathBuf,
    pub manifest_path: PathBuf,
}

/// What a passing case observed.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub stack_name: String,
    pub deployment: DeployOutcome,
    pub verification: VerificationReport,
}

pub struct FixtureSuite<P, B, X> {
    config: HarnessConfig,
    deployer: ChangeSetDeployer<P>,
    stager: AssetStager<B>,
    resolver: TemplateResolver,
    transform: X,
    context: FixtureContext,
}

/// A suite running against AWS.
pub type AwsFixtureSuite = FixtureSuite<AwsStackProvider, S3BlobStore, Option<CommandTransform>>;

impl AwsFixtureSuite {
    /// Build AWS clients from the environment and set the suite up.
    pub async fn setup_aws(config: HarnessConfig) -> Result<Self> {
        let sdk_config = load_sdk_config(config.region.as_deref()).await;
        let region = config
            .region
            .clone()
            .or_else(|| sdk_config.region().map(|region| region.to_string()));
        let config = HarnessConfig { region, ..config };

        let transform = config.transform();
        Self::setup(
            config,
            AwsStackProvider::new(&sdk_config),
            S3BlobStore::new(&sdk_config),
            transform,
        )
        .await
    }
}

impl<P, B, X> FixtureSuite<P, B, X>
where
    P: StackProvider,
    B: BlobStore,
    X: TemplateTransform,
{
    /// Stage the assets into a freshly named bucket.
    ///
    /// The effective configuration is saved to the output directory first, so a run can
    /// be repeated with `HarnessConfig::load(Some(&output_dir))`. Any failure here is
    /// fatal for the whole suite.
    pub async fn setup(config: HarnessConfig, provider: P, store: B, transform: X) -> Result<Self> {
        FsHandler::create_output_directory(&config.output_dir).await?;
        config
            .save_to_file(&config.output_dir)
            .context("Suite setup failed")?;

        let bucket = naming::bucket_name(&config.bucket_prefix, &naming::generate_suffix());
        let stager = AssetStager::new(store);

        let assets = stager
            .stage(
                &AssetKey::default_assets(&config.code_path()),
                &bucket,
                config.region.as_deref(),
            )
            .await
            .context("Suite setup failed")?;

        tracing::info!(bucket = %bucket, assets = assets.len(), "Suite set up");

        Ok(Self {
            deployer: ChangeSetDeployer::new(provider, config.deployer.clone()),
            resolver: TemplateResolver::new(&config.output_dir),
            config,
            stager,
            transform,
            context: FixtureContext { bucket, assets },
        })
    }

    pub fn context(&self) -> &FixtureContext {
        &self.context
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn deployer(&self) -> &ChangeSetDeployer<P> {
        &self.deployer
    }

    /// Names and paths for the case built from template `<name>.yaml`.
    pub fn case(&self, name: &str) -> FixtureCase {
        let template_path = self.config.templates_path().join(format!("{name}.yaml"));
        FixtureCase {
            name: name.to_string(),
            stack_name: naming::stack_name(
                &self.config.stack_prefix,
                name,
                &naming::generate_suffix(),
            ),
            substituted_path: self.resolver.materialized_path(&template_path),
            transformed_path: self.config.output_dir.join(format!("cfn_{name}.yaml")),
            manifest_path: self.config.expected_path().join(format!("{name}.json")),
            template_path,
        }
    }

    /// Deploy and verify the case `name`, then tear it down.
    ///
    /// A teardown failure fails a passing case. After a failing case it is logged and
    /// the case's own error is returned.
    pub async fn run_case(&self, name: &str) -> Result<CaseReport> {
        let case = self.case(name);
        tracing::info!(case = name, stack_name = %case.stack_name, "Running case");

        let result = self.create_and_verify_stack(&case).await;
        let teardown = self.teardown_case(&case).await;

        match (result, teardown) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(err)) => {
                tracing::warn!(case = name, error = %format!("{err:#}"), "Case teardown failed");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(teardown_err)) => {
                tracing::warn!(
                    case = name,
                    error = %format!("{teardown_err:#}"),
                    "Case teardown failed after the case failed"
                );
                Err(err)
            }
        }
    }

    /// Resolve, transform, deploy and verify one case. Leaves cleanup to the caller.
    pub async fn create_and_verify_stack(&self, case: &FixtureCase) -> Result<CaseReport> {
        let substituted = self
            .resolver
            .resolve(&case.template_path, &self.context.assets.substitutions())
            .await?;

        self.transform
            .transform(&substituted, &case.transformed_path)
            .await
            .with_context(|| format!("Failed to transform template for case {}", case.name))?;

        let template_body = tokio::fs::read_to_string(&case.transformed_path)
            .await
            .with_context(|| format!("Failed to read {}", case.transformed_path.display()))?;

        let deployment = self
            .deployer
            .deploy(&case.stack_name, &template_body, &self.config.deploy_options())
            .await
            .with_context(|| format!("Failed to deploy stack {}", case.stack_name))?;

        self.verify_status(case, &deployment).await?;

        let manifest = ResourceManifest::load(&case.manifest_path).await?;
        let verification =
            verifier::verify_stack(self.deployer.provider(), &case.stack_name, &manifest).await?;
        if !verification.is_match() {
            return Err(CaseError::ResourceMismatch {
                stack_name: case.stack_name.clone(),
                manifest: case.manifest_path.clone(),
                report: verification,
            }
            .into());
        }

        tracing::info!(case = %case.name, stack_name = %case.stack_name, "✓ Stack verified");
        Ok(CaseReport {
            stack_name: case.stack_name.clone(),
            deployment,
            verification,
        })
    }

    /// Describe the stack again and check it holds the status the deployment promised.
    async fn verify_status(&self, case: &FixtureCase, deployment: &DeployOutcome) -> Result<()> {
        let expected = if deployment.applied {
            deployment.change_set_type.success_status()
        } else {
            deployment.stack_status
        };

        let actual = self
            .deployer
            .provider()
            .describe_stack(&case.stack_name)
            .await
            .with_context(|| format!("Failed to describe stack {}", case.stack_name))?
            .map(|stack| stack.status)
            .unwrap_or(StackStatus::DeleteComplete);

        if actual != expected {
            return Err(CaseError::UnexpectedStatus {
                stack_name: case.stack_name.clone(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Delete the case's stack and generated templates. Safe to call repeatedly.
    ///
    /// Every step runs. Each failure is logged as it happens and all of them are
    /// returned together.
    pub async fn teardown_case(&self, case: &FixtureCase) -> Result<()> {
        let mut failures = Vec::new();

        if let Err(err) = self
            .deployer
            .provider()
            .delete_stack(&case.stack_name)
            .await
        {
            if !err.is_not_found() {
                let err = anyhow::Error::new(err)
                    .context(format!("Failed to delete stack {}", case.stack_name));
                tracing::warn!(case = %case.name, error = %format!("{err:#}"), "Stack deletion failed");
                failures.push(err);
            }
        }

        for path in [&case.transformed_path, &case.substituted_path] {
            if let Err(err) = FsHandler::remove_if_exists(path).await {
                tracing::warn!(case = %case.name, error = %format!("{err:#}"), "File removal failed");
                failures.push(err);
            }
        }

        match failures.len() {
            0 => {
                tracing::debug!(case = %case.name, stack_name = %case.stack_name, "Case torn down");
                Ok(())
            }
            1 => Err(failures.remove(0)),
            count => {
                let details = failures
                    .iter()
                    .map(|err| format!("{err:#}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(anyhow::anyhow!(
                    "{count} teardown steps failed for case {}: {details}",
                    case.name
                ))
            }
        }
    }

    /// Drain and delete the staging bucket.
    pub async fn teardown(&self) -> Result<()> {
        self.stager
            .teardown(&self.context.bucket)
            .await
            .context("Suite teardown failed")?;
        tracing::info!(bucket = %self.context.bucket, "Suite torn down");
        Ok(())
    }
}
