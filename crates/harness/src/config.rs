//! Harness configuration.
//!
//! Values come from, in increasing priority: built-in defaults, an optional TOML file,
//! and `STACKCHECK_`-prefixed environment variables (`__` separates nested keys, so
//! `STACKCHECK_DEPLOYER__STACK_POLL__TIMEOUT_SECS=1200` overrides the stack wait bound).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    deployer::{DeployOptions, DeployerConfig},
    provider::Capability,
    transform::CommandTransform,
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "stackcheck.toml";

/// Prefix of the environment variables that override the configuration.
pub const ENV_PREFIX: &str = "STACKCHECK_";

pub const DEFAULT_STACK_PREFIX: &str = "sam-integ-stack-";
pub const DEFAULT_BUCKET_PREFIX: &str = "sam-integ-bucket-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root of the fixture resources. The directories below are relative to it.
    pub resource_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub expected_dir: PathBuf,
    pub code_dir: PathBuf,

    /// Where substituted and transformed templates are written.
    pub output_dir: PathBuf,

    pub stack_prefix: String,
    pub bucket_prefix: String,

    pub capabilities: Vec<Capability>,
    /// Region for the clients and the staging bucket. Falls back to the environment.
    pub region: Option<String>,
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,

    /// `[program, args..]` of the template transform. Empty deploys templates as substituted.
    pub transform_command: Vec<String>,

    pub deployer: DeployerConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("tests/resources"),
            templates_dir: PathBuf::from("templates/single"),
            expected_dir: PathBuf::from("expected/single"),
            code_dir: PathBuf::from("code"),
            output_dir: PathBuf::from("target/stackcheck"),
            stack_prefix: DEFAULT_STACK_PREFIX.to_string(),
            bucket_prefix: DEFAULT_BUCKET_PREFIX.to_string(),
            capabilities: vec![Capability::Iam, Capability::AutoExpand],
            region: None,
            role_arn: None,
            notification_arns: Vec::new(),
            transform_command: Vec::new(),
            deployer: DeployerConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Defaults, then the TOML file at `path` if it exists, then the environment.
    ///
    /// A directory stands for the [`CONFIG_FILENAME`] inside it, which is where
    /// [`HarnessConfig::save_to_file`] puts a suite's snapshot.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            let file = if path.is_dir() {
                path.join(CONFIG_FILENAME)
            } else {
                path.to_path_buf()
            };
            figment = figment.merge(Toml::file(file));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to load harness configuration")?;

        tracing::debug!(?config, "Harness configuration loaded");
        Ok(config)
    }

    /// Write the configuration as TOML to [`CONFIG_FILENAME`] under `dir`.
    pub fn save_to_file(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILENAME);
        let content =
            toml::to_string_pretty(self).context("Failed to serialize harness config to TOML")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Configuration snapshot written");
        Ok(path)
    }

    pub fn templates_path(&self) -> PathBuf {
        self.resource_dir.join(&self.templates_dir)
    }

    pub fn expected_path(&self) -> PathBuf {
        self.resource_dir.join(&self.expected_dir)
    }

    pub fn code_path(&self) -> PathBuf {
        self.resource_dir.join(&self.code_dir)
    }

    pub fn deploy_options(&self) -> DeployOptions {
        DeployOptions {
            capabilities: self.capabilities.clone(),
            role_arn: self.role_arn.clone(),
            notification_arns: self.notification_arns.clone(),
        }
    }

    pub fn transform(&self) -> Option<CommandTransform> {
        CommandTransform::from_command_line(&self.transform_command)
    }
}
