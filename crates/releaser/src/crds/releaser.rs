//! `Releaser` Custom Resource Definition for release requests

use kube::CustomResource;
use schemars::JsonSchema;
use scm::ProviderKind;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_TAG_MESSAGE: &str = "released by ks-releaser";

/// Annotation holding the hash of the last processed desired state
pub const HASH_ANNOTATION: &str = "releaser.devops.kubesphere.io/hash";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "devops.kubesphere.io", version = "v1alpha1", kind = "Releaser")]
#[kube(namespaced)]
#[kube(status = "ReleaserStatus")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".spec.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ReleaserSpec {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ops: Option<GitOps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
}

/// Lifecycle phase of a release request
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Being edited; the controller ignores it
    #[default]
    Draft,
    /// Released on the next pass
    Ready,
    /// Released; terminal
    Done,
}

/// What to do with a repository once its tag is pushed
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseAction {
    #[default]
    Tag,
    PreRelease,
    Release,
    /// `pre-release` for pre-release versions, `release` otherwise
    Auto,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ReleaseAction>,
}

impl Repository {
    /// Declared provider, or the one implied by the address host.
    pub fn effective_provider(&self) -> ProviderKind {
        self.provider
            .or_else(|| ProviderKind::from_address(&self.address))
            .unwrap_or(ProviderKind::Unknown)
    }

    pub fn effective_branch(&self) -> &str {
        non_empty(self.branch.as_deref()).unwrap_or(DEFAULT_BRANCH)
    }

    /// Repository version, falling back to the request version.
    pub fn effective_version<'a>(&'a self, request_version: &'a str) -> &'a str {
        non_empty(self.version.as_deref()).unwrap_or(request_version)
    }

    pub fn effective_message(&self) -> &str {
        non_empty(self.message.as_deref()).unwrap_or(DEFAULT_TAG_MESSAGE)
    }

    /// Declared action with `auto` resolved against `version`.
    pub fn effective_action(&self, version: &str) -> ReleaseAction {
        match self.action.unwrap_or_default() {
            ReleaseAction::Auto if crate::tasks::version::is_pre_release(version) => {
                ReleaseAction::PreRelease
            }
            ReleaseAction::Auto => ReleaseAction::Release,
            action => action,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitOps {
    #[serde(default)]
    pub enable: bool,
    pub repository: Repository,
    /// Overrides the request secret when a name is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
}

/// Reference to a Kubernetes Secret holding git credentials
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaserStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// RFC3339 start of the latest pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// RFC3339 completion of the successful pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

/// One recorded outcome of a release pass
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    Release,
    Other,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConditionStatus {
    Success,
    Failed,
}

impl ConditionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Release => "release",
            ConditionType::Other => "other",
        }
    }
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::Success => "success",
            ConditionStatus::Failed => "failed",
        }
    }
}

impl Releaser {
    pub fn phase(&self) -> Phase {
        self.spec.phase
    }

    /// Whether GitOps write-back is configured and enabled.
    pub fn git_ops_enabled(&self) -> Option<&GitOps> {
        self.spec.git_ops.as_ref().filter(|g| g.enable)
    }

    /// Secret used for the GitOps repository.
    pub fn git_ops_secret(&self) -> Option<&SecretRef> {
        self.spec
            .git_ops
            .as_ref()
            .and_then(|g| g.secret.as_ref())
            .filter(|s| !s.name.is_empty())
            .or(self.spec.secret.as_ref())
    }

    /// Drop server-assigned identity so the object can be written as a new
    /// record or file.
    pub fn strip_transient_metadata(&mut self) {
        let meta = &mut self.metadata;
        meta.resource_version = None;
        meta.uid = None;
        meta.generation = None;
        meta.creation_timestamp = None;
        meta.deletion_timestamp = None;
        meta.deletion_grace_period_seconds = None;
        meta.managed_fields = None;
        meta.self_link = None;

        if let Some(annotations) = meta.annotations.as_mut() {
            annotations.remove(HASH_ANNOTATION);
            if annotations.is_empty() {
                meta.annotations = None;
            }
        }
    }

    pub fn failed_conditions(&self) -> Vec<&Condition> {
        self.status
            .iter()
            .flat_map(|s| s.conditions.iter())
            .filter(|c| c.status == ConditionStatus::Failed)
            .collect()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
