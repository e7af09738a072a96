//! The step that turns a substituted template into the deployable template.
//!
//! The deployment tool under test owns this transform; the harness only runs it as
//! `<program> <args..> <input> <output>` and reads back what it wrote.

use std::{
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tokio::process::Command;

/// Produces the deployable template at `output` from the substituted template at `input`.
pub trait TemplateTransform: Send + Sync {
    fn transform(&self, input: &Path, output: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Deploys the substituted template unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl TemplateTransform for Passthrough {
    async fn transform(&self, input: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(input, output).await.with_context(|| {
            format!("Failed to copy {} to {}", input.display(), output.display())
        })?;
        Ok(())
    }
}

/// Runs an external program to transform the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTransform {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTransform {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args..]` command line. Empty means no command.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program, args.to_vec()))
    }
}

impl TemplateTransform for CommandTransform {
    async fn transform(&self, input: &Path, output: &Path) -> Result<()> {
        tracing::debug!(
            program = %self.program.display(),
            args = ?self.args,
            input = %input.display(),
            output = %output.display(),
            "Running template transform"
        );

        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        if !result.status.success() {
            bail!(
                "Template transform {} exited with {}: {}",
                self.program.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }

        Ok(())
    }
}

/// `None` falls back to [`Passthrough`].
impl<T: TemplateTransform> TemplateTransform for Option<T> {
    async fn transform(&self, input: &Path, output: &Path) -> Result<()> {
        match self {
            Some(transform) => transform.transform(input, output).await,
            None => Passthrough.transform(input, output).await,
        }
    }
}
