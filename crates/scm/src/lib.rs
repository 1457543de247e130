//! Unified SCM abstraction for release automation.
//!
//! This crate identifies git hosting providers from repository addresses and
//! offers a small capability interface over their REST APIs:
//!
//! - [`ScmProvider::release`] creates a release for a tag, or updates a
//!   pending draft release in place
//! - [`ScmProvider::create_issue`] opens an issue, or comments on an open
//!   issue with the same title
//!
//! # Usage
//!
//! ```no_run
//! use scm::{client_for, ApiEndpoints, ProviderKind, ProviderTarget, ReleaseSpec};
//!
//! # async fn run() -> Result<(), scm::ScmError> {
//! let address = "https://github.com/example/widgets.git";
//! let target = ProviderTarget::from_address(ProviderKind::GitHub, address, None)?
//!     .with_token(Some("token".to_string()));
//!
//! if let Some(client) = client_for(&target, &ApiEndpoints::default())? {
//!     client
//!         .release(&ReleaseSpec::new("v1.2.3", "master").prerelease(false))
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`ProviderKind`] is the closed set of providers a repository may name
//! - [`ScmProvider`] is implemented by [`GitHubProvider`], [`GitLabProvider`]
//!   and [`GiteaProvider`]
//! - [`client_for`] maps a [`ProviderTarget`] to a client; Bitbucket, Gitee and
//!   unknown hosts are recognised but have no client

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod error;
pub mod kind;
pub mod providers;

pub use address::{server_base, RepoPath};
pub use error::ScmError;
pub use kind::ProviderKind;
pub use providers::gitea::GiteaProvider;
pub use providers::github::GitHubProvider;
pub use providers::gitlab::GitLabProvider;
pub use providers::{
    client_for, ApiEndpoints, IssueOutcome, ProviderTarget, ReleaseOutcome, ReleaseSpec,
    ScmProvider,
};

/// Result type for SCM operations.
pub type Result<T> = std::result::Result<T, ScmError>;
