//! Comparison of a live stack's resources against an expected manifest.
//!
//! Only (logical id, resource type) pairs are compared, as an exact set: every expected
//! resource must exist and nothing else may. Physical ids and properties are ignored.
//! Some resources get a generated 10 hex character suffix on their logical id (function
//! versions, API deployments), so a live id also matches an expected id when it is that
//! id followed by such a suffix.

use std::{collections::BTreeSet, fmt, path::Path};

use anyhow::{Context, Result, bail};
use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};

use crate::provider::{StackProvider, StackResource};

/// Length of the generated hash suffix some logical ids carry.
const LOGICAL_ID_SUFFIX_LEN: usize = 10;

/// One entry of the expected-resources manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpectedResource {
    #[serde(rename = "LogicalResourceId")]
    pub logical_id: String,
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
}

impl ExpectedResource {
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
        }
    }
}

impl From<&StackResource> for ExpectedResource {
    fn from(resource: &StackResource) -> Self {
        Self::new(&resource.logical_id, &resource.resource_type)
    }
}

impl fmt::Display for ExpectedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.logical_id, self.resource_type)
    }
}

/// The resource set a successful deployment must produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, From)]
#[serde(transparent)]
pub struct ResourceManifest {
    resources: Vec<ExpectedResource>,
}

impl ResourceManifest {
    /// Parse a JSON array of `{"LogicalResourceId", "ResourceType"}` objects.
    ///
    /// The manifest is a set, so an entry listed twice is rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(json).context("Failed to parse resource manifest")?;

        let mut seen = BTreeSet::new();
        if let Some(duplicate) = manifest.resources.iter().find(|resource| !seen.insert(*resource)) {
            bail!("Duplicate manifest entry {duplicate}");
        }
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read resource manifest {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn resources(&self) -> &[ExpectedResource] {
        &self.resources
    }
}

/// Outcome of comparing a stack against a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub matched: usize,
    /// Expected but not present on the stack.
    pub missing: Vec<ExpectedResource>,
    /// Present on the stack but not expected.
    pub unexpected: Vec<ExpectedResource>,
}

impl VerificationReport {
    pub fn is_match(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match() {
            return write!(f, "all {} resources match", self.matched);
        }

        writeln!(
            f,
            "resource set mismatch ({} matched, {} missing, {} unexpected)",
            self.matched,
            self.missing.len(),
            self.unexpected.len()
        )?;
        for resource in &self.missing {
            writeln!(f, "  - {resource}")?;
        }
        for resource in &self.unexpected {
            writeln!(f, "  + {resource}")?;
        }
        Ok(())
    }
}

/// Returns true if `actual` is `expected` or `expected` plus a generated suffix.
fn logical_id_matches(expected: &str, actual: &str) -> bool {
    match actual.strip_prefix(expected) {
        Some("") => true,
        Some(suffix) => {
            suffix.len() == LOGICAL_ID_SUFFIX_LEN
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        }
        None => false,
    }
}

/// Compare `actual` against `manifest` and report the differences.
pub fn compare(manifest: &ResourceManifest, actual: &[StackResource]) -> VerificationReport {
    let mut missing: BTreeSet<ExpectedResource> = manifest.resources().iter().cloned().collect();
    let mut unexpected: BTreeSet<ExpectedResource> =
        actual.iter().map(ExpectedResource::from).collect();
    let mut matched = 0;

    // Exact ids first so a suffixed id never steals an exact match.
    for expected in missing.clone() {
        if unexpected.remove(&expected) {
            missing.remove(&expected);
            matched += 1;
        }
    }

    for expected in missing.clone() {
        let candidate = unexpected
            .iter()
            .find(|live| {
                live.resource_type == expected.resource_type
                    && logical_id_matches(&expected.logical_id, &live.logical_id)
            })
            .cloned();
        if let Some(live) = candidate {
            unexpected.remove(&live);
            missing.remove(&expected);
            matched += 1;
        }
    }

    VerificationReport {
        matched,
        missing: missing.into_iter().collect(),
        unexpected: unexpected.into_iter().collect(),
    }
}

/// Returns true iff `actual` is exactly the manifest's resource set.
pub fn verify(manifest: &ResourceManifest, actual: &[StackResource]) -> bool {
    compare(manifest, actual).is_match()
}

/// List the resources of `stack_name` and compare them against `manifest`.
pub async fn verify_stack<P: StackProvider>(
    provider: &P,
    stack_name: &str,
    manifest: &ResourceManifest,
) -> Result<VerificationReport> {
    let resources = provider
        .list_stack_resources(stack_name)
        .await
        .with_context(|| format!("Failed to list resources of stack {stack_name}"))?;

    let report = compare(manifest, &resources);
    tracing::debug!(
        stack_name,
        matched = report.matched,
        missing = report.missing.len(),
        unexpected = report.unexpected.len(),
        "Stack resources compared"
    );
    Ok(report)
}
