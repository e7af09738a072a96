//! Placeholder substitution and materialization of templates.
//!
//! Substitution is plain text replacement of `${key}` tokens and happens before the
//! document is parsed, so a locator can land anywhere a scalar can. Parsing afterwards
//! guarantees every materialized template is well-formed YAML.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde_yaml_ng::Value;

use crate::fs::FsHandler;

/// Replace every `${key}` occurrence for the keys present in `substitutions`.
///
/// Tokens whose key is not in the map are left as they are.
pub fn substitute(text: &str, substitutions: &BTreeMap<String, String>) -> String {
    substitutions
        .iter()
        .fold(text.to_string(), |text, (key, value)| {
            text.replace(&format!("${{{key}}}"), value)
        })
}

/// Substitute, parse and re-serialize a template.
pub fn materialize(text: &str, substitutions: &BTreeMap<String, String>) -> Result<String> {
    let substituted = substitute(text, substitutions);
    let document: Value =
        serde_yaml_ng::from_str(&substituted).context("Template is not valid YAML after substitution")?;
    serde_yaml_ng::to_string(&document).context("Failed to serialize template")
}

/// Writes substituted templates into an output directory.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    output_dir: PathBuf,
}

impl TemplateResolver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where the substituted form of `template_path` is written.
    pub fn materialized_path(&self, template_path: &Path) -> PathBuf {
        let stem = template_path
            .file_stem()
            .map(|stem| stem.to_string_lossy())
            .unwrap_or_default();
        self.output_dir.join(format!("sub_{stem}.yaml"))
    }

    /// Materialize `template_path` with `substitutions` and return the written file.
    pub async fn resolve(
        &self,
        template_path: &Path,
        substitutions: &BTreeMap<String, String>,
    ) -> Result<PathBuf> {
        let text = tokio::fs::read_to_string(template_path)
            .await
            .with_context(|| format!("Failed to read template {}", template_path.display()))?;

        let materialized = materialize(&text, substitutions)
            .with_context(|| format!("Failed to resolve template {}", template_path.display()))?;

        FsHandler::create_output_directory(&self.output_dir).await?;
        let output_path = self.materialized_path(template_path);
        tokio::fs::write(&output_path, materialized)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;

        tracing::debug!(
            template = %template_path.display(),
            output = %output_path.display(),
            "Template resolved"
        );
        Ok(output_path)
    }
}
