//! Idempotency gate over the desired state of a release request
//!
//! The gate hashes the parts of `.spec` that describe *what* to release and
//! compares the digest with the one stored in the hash annotation. Phase,
//! status and metadata are not part of the digest, so lifecycle updates do
//! not look like new work.

use crate::crds::{GitOps, Releaser, ReleaserSpec, Repository, SecretRef, HASH_ANNOTATION};
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// No hash stored yet; carries the freshly computed digest
    Bootstrap(String),
    /// Desired state differs from the last processed one
    Changed,
    Unchanged,
}

impl GateDecision {
    pub fn needs_processing(&self) -> bool {
        !matches!(self, GateDecision::Unchanged)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DesiredState<'a> {
    version: &'a str,
    repositories: &'a [Repository],
    git_ops: Option<&'a GitOps>,
    secret: Option<&'a SecretRef>,
}

/// SHA-256 hex digest of the canonical JSON of the desired state.
pub fn compute_hash(spec: &ReleaserSpec) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(DesiredState {
        version: &spec.version,
        repositories: &spec.repositories,
        git_ops: spec.git_ops.as_ref(),
        secret: spec.secret.as_ref(),
    })?;

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn needs_processing(releaser: &Releaser) -> Result<GateDecision, serde_json::Error> {
    let hash = compute_hash(&releaser.spec)?;
    let decision = match releaser.annotations().get(HASH_ANNOTATION) {
        None => GateDecision::Bootstrap(hash),
        Some(stored) if stored.is_empty() => GateDecision::Bootstrap(hash),
        Some(stored) if *stored == hash => GateDecision::Unchanged,
        Some(_) => GateDecision::Changed,
    };
    debug!(releaser = %releaser.name_any(), ?decision, "Change gate evaluated");
    Ok(decision)
}

/// Persists gate state in the hash annotation.
pub struct ChangeGate {
    api: Api<Releaser>,
}

impl ChangeGate {
    pub fn new(api: Api<Releaser>) -> Self {
        Self { api }
    }

    /// Store the digest of the current desired state.
    pub async fn record_hash(&self, releaser: &Releaser) -> crate::tasks::types::Result<String> {
        let hash = compute_hash(&releaser.spec)?;
        self.patch_annotation(releaser, Value::String(hash.clone()))
            .await?;
        Ok(hash)
    }

    /// Remove the stored digest so the next pass is admitted.
    pub async fn invalidate(&self, releaser: &Releaser) -> crate::tasks::types::Result<()> {
        self.patch_annotation(releaser, Value::Null).await
    }

    async fn patch_annotation(
        &self,
        releaser: &Releaser,
        value: Value,
    ) -> crate::tasks::types::Result<()> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(HASH_ANNOTATION.to_string(), value);
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.api
            .patch(
                &releaser.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::Phase;

    fn spec() -> ReleaserSpec {
        ReleaserSpec {
            phase: Phase::Ready,
            version: "v1.0.0".to_string(),
            repositories: vec![Repository {
                name: "core".to_string(),
                address: "https://github.com/org/core".to_string(),
                ..Repository::default()
            }],
            ..ReleaserSpec::default()
        }
    }

    #[test]
    fn test_hash_ignores_phase() {
        let ready = spec();
        let mut done = spec();
        done.phase = Phase::Done;
        assert_eq!(compute_hash(&ready).unwrap(), compute_hash(&done).unwrap());
    }

    #[test]
    fn test_hash_tracks_desired_state() {
        let base = compute_hash(&spec()).unwrap();
        assert_eq!(base.len(), 64);

        let mut bumped = spec();
        bumped.version = "v1.0.1".to_string();
        assert_ne!(base, compute_hash(&bumped).unwrap());

        let mut rebranched = spec();
        rebranched.repositories[0].branch = Some("main".to_string());
        assert_ne!(base, compute_hash(&rebranched).unwrap());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":[2,{"z":1,"y":0}],"c":null}}"#)
            .unwrap();
        let mut out = String::new();
        write_canonical(&a, &mut out);
        assert_eq!(out, r#"{"a":{"c":null,"d":[2,{"y":0,"z":1}]},"b":1}"#);
    }

    #[test]
    fn test_decisions() {
        let mut releaser = Releaser::new("r", spec());
        let hash = compute_hash(&releaser.spec).unwrap();

        assert_eq!(
            needs_processing(&releaser).unwrap(),
            GateDecision::Bootstrap(hash.clone())
        );

        releaser
            .annotations_mut()
            .insert(HASH_ANNOTATION.to_string(), hash);
        let decision = needs_processing(&releaser).unwrap();
        assert_eq!(decision, GateDecision::Unchanged);
        assert!(!decision.needs_processing());

        releaser.spec.version = "v2.0.0".to_string();
        assert_eq!(needs_processing(&releaser).unwrap(), GateDecision::Changed);
    }
}
