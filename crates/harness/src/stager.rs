//! Staging of fixture assets into a blob-store bucket.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use strum::IntoEnumIterator;

use crate::provider::BlobStore;

/// The fixed set of assets a template may reference.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum AssetKey {
    /// Archived function code.
    CodeUri,
    /// Archived layer content.
    ContentUri,
    /// API definition document.
    DefinitionUri,
}

impl AssetKey {
    /// Local file name of the asset, also used as its object key.
    pub fn file_name(&self) -> &'static str {
        match self {
            AssetKey::CodeUri => "code.zip",
            AssetKey::ContentUri => "layer1.zip",
            AssetKey::DefinitionUri => "swagger1.json",
        }
    }

    /// The `${key}` token templates use to reference this asset.
    pub fn placeholder(&self) -> String {
        format!("${{{self}}}")
    }

    /// Every asset, each mapped to its file under `code_dir`.
    pub fn default_assets(code_dir: &Path) -> BTreeMap<AssetKey, PathBuf> {
        AssetKey::iter()
            .map(|key| (key, code_dir.join(key.file_name())))
            .collect()
    }
}

/// Remote locators of staged assets. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagedAssets {
    locators: BTreeMap<AssetKey, String>,
}

impl StagedAssets {
    pub fn locator(&self, key: AssetKey) -> Option<&str> {
        self.locators.get(&key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetKey, &str)> {
        self.locators.iter().map(|(key, url)| (*key, url.as_str()))
    }

    /// Placeholder key → locator, ready for template substitution.
    pub fn substitutions(&self) -> BTreeMap<String, String> {
        self.locators
            .iter()
            .map(|(key, url)| (key.to_string(), url.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }
}

/// The `s3://bucket/key` locator of an object.
pub fn object_url(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

/// Uploads assets to a bucket and removes them again.
pub struct AssetStager<B> {
    store: B,
}

impl<B: BlobStore> AssetStager<B> {
    pub fn new(store: B) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Create `bucket` and upload every asset under its fixed object key.
    ///
    /// Provider failures are returned as-is, without retry.
    pub async fn stage(
        &self,
        assets: &BTreeMap<AssetKey, PathBuf>,
        bucket: &str,
        region: Option<&str>,
    ) -> Result<StagedAssets> {
        tracing::info!(bucket, region, "Creating staging bucket");
        self.store
            .create_bucket(bucket, region)
            .await
            .with_context(|| format!("Failed to create staging bucket {bucket}"))?;

        let locators = match self.upload_all(assets, bucket).await {
            Ok(locators) => locators,
            Err(err) => {
                // Nothing owns the bucket yet, so remove it before giving up.
                if let Err(cleanup_err) = self.teardown(bucket).await {
                    tracing::warn!(
                        bucket,
                        error = %format!("{cleanup_err:#}"),
                        "Failed to remove partially staged bucket"
                    );
                }
                return Err(err);
            }
        };

        tracing::info!(bucket, assets = locators.len(), "Assets staged");
        Ok(StagedAssets { locators })
    }

    async fn upload_all(
        &self,
        assets: &BTreeMap<AssetKey, PathBuf>,
        bucket: &str,
    ) -> Result<BTreeMap<AssetKey, String>> {
        let mut locators = BTreeMap::new();
        for (key, path) in assets {
            let object_key = key.file_name();
            self.store
                .upload_file(path, bucket, object_key)
                .await
                .with_context(|| {
                    format!(
                        "Failed to upload {} to s3://{bucket}/{object_key}",
                        path.display()
                    )
                })?;

            let url = object_url(bucket, object_key);
            tracing::debug!(asset = %key, url = %url, "Asset staged");
            locators.insert(*key, url);
        }
        Ok(locators)
    }

    /// Delete every object in `bucket`, then the bucket itself.
    ///
    /// An empty bucket is fine, and so is a bucket that is already gone.
    pub async fn teardown(&self, bucket: &str) -> Result<()> {
        let keys = match self.store.list_objects(bucket).await {
            Ok(keys) => keys,
            Err(err) if err.is_not_found() => {
                tracing::debug!(bucket, "Staging bucket already deleted");
                return Ok(());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to list objects in {bucket}"));
            }
        };

        for key in &keys {
            self.store
                .delete_object(bucket, key)
                .await
                .with_context(|| format!("Failed to delete s3://{bucket}/{key}"))?;
        }

        self.store
            .delete_bucket(bucket)
            .await
            .with_context(|| format!("Failed to delete staging bucket {bucket}"))?;

        tracing::info!(bucket, objects = keys.len(), "Staging bucket removed");
        Ok(())
    }
}
