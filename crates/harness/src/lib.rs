//! stackcheck-harness - End-to-end fixtures for stack deployments.
//!
//! This crate stages assets, materializes templates, deploys them through changesets
//! and checks the resulting stacks against expected resource manifests.

pub mod config;
pub use config::HarnessConfig;

mod deployer;
pub use deployer::{
    ChangeSetDeployer, ChangeSetSettlement, DEFAULT_CHANGE_SET_PREFIX, DeployOptions,
    DeployOutcome, DeployerConfig,
};

mod error;
pub use error::DeployError;

mod fixture;
pub use fixture::{
    AwsFixtureSuite, CaseError, CaseReport, FixtureCase, FixtureContext, FixtureSuite,
};

mod fs;

pub mod naming;

mod poll;
pub use poll::{DEFAULT_POLL_INTERVAL_SECS, Poll, PollPolicy};

pub mod provider;
pub use provider::{
    BlobStore, Capability, ChangeSetType, ProviderError, StackProvider, StackResource,
    StackStatus,
};

pub mod stager;
pub use stager::{AssetKey, AssetStager, StagedAssets};

pub mod template;
pub use template::TemplateResolver;

pub mod transform;
pub use transform::{CommandTransform, Passthrough, TemplateTransform};

pub mod verifier;
pub use verifier::{ExpectedResource, ResourceManifest, VerificationReport};
