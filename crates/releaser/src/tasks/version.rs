//! Next-version computation and release request bumping

use crate::crds::{Phase, Releaser};
use kube::ResourceExt;
use semver::{Prerelease, Version};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("cannot bump an invalid version '{version}': {reason}")]
    Invalid { version: String, reason: String },
}

/// Result of [`bump_version`]. On error `next` is the unchanged input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bump {
    pub next: String,
    pub was_pre_release: bool,
    pub error: Option<VersionError>,
}

/// Parse a version, accepting a leading `v` and a missing minor or patch.
pub fn parse_lenient(version: &str) -> Result<Version, VersionError> {
    let invalid = |reason: String| VersionError::Invalid {
        version: version.to_string(),
        reason,
    };

    let trimmed = version.trim();
    let body = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split = body.find(|c: char| c == '-' || c == '+').unwrap_or(body.len());
    let (core, rest) = body.split_at(split);

    let mut parts: Vec<&str> = core.split('.').collect();
    if core.is_empty() || parts.len() > 3 {
        return Err(invalid(format!("expected MAJOR[.MINOR[.PATCH]], got '{core}'")));
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{rest}", parts.join("."))).map_err(|e| invalid(e.to_string()))
}

pub fn is_pre_release(version: &str) -> bool {
    parse_lenient(version).is_ok_and(|v| !v.pre.is_empty())
}

/// Compute the version that follows `version`.
///
/// Final versions get a patch bump. Pre-releases either keep their
/// pre-release with the rightmost numeric identifier incremented
/// (`retain_pre_release`), or are promoted to the final version.
pub fn bump_version(version: &str, retain_pre_release: bool) -> Bump {
    let unchanged = |error: VersionError| Bump {
        next: version.to_string(),
        was_pre_release: false,
        error: Some(error),
    };

    let mut parsed = match parse_lenient(version) {
        Ok(parsed) => parsed,
        Err(err) => return unchanged(err),
    };

    let was_pre_release = !parsed.pre.is_empty();
    if !was_pre_release {
        match parsed.patch.checked_add(1) {
            Some(patch) => parsed.patch = patch,
            None => {
                return unchanged(VersionError::Invalid {
                    version: version.to_string(),
                    reason: "patch overflow".to_string(),
                })
            }
        }
    } else if retain_pre_release {
        match next_pre_release(&parsed.pre) {
            Ok(pre) => parsed.pre = pre,
            Err(reason) => {
                return unchanged(VersionError::Invalid {
                    version: version.to_string(),
                    reason,
                })
            }
        }
    } else {
        parsed.pre = Prerelease::EMPTY;
    }

    let prefix = match version.trim_start().chars().next() {
        Some(c @ ('v' | 'V')) => c.to_string(),
        _ => String::new(),
    };

    Bump {
        next: format!("{prefix}{parsed}"),
        was_pre_release,
        error: None,
    }
}

fn next_pre_release(pre: &Prerelease) -> Result<Prerelease, String> {
    let mut identifiers: Vec<String> = pre.as_str().split('.').map(str::to_string).collect();

    let numeric = identifiers
        .iter()
        .rposition(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()));

    match numeric {
        Some(index) => {
            let value: u64 = identifiers[index]
                .parse()
                .map_err(|e| format!("pre-release identifier '{}': {e}", identifiers[index]))?;
            identifiers[index] = (value + 1).to_string();
        }
        None => identifiers.push("1".to_string()),
    }

    Prerelease::new(&identifiers.join(".")).map_err(|e| e.to_string())
}

/// Turn a finished request into the next draft of the series.
///
/// Returns whether the request version was a pre-release.
pub fn bump_request(releaser: &mut Releaser, retain_pre_release: bool) -> bool {
    let current = releaser.spec.version.clone();
    let bump = bump_version(&current, retain_pre_release);
    if let Some(err) = &bump.error {
        warn!(releaser = %releaser.name_any(), error = %err, "Keeping request version");
    }

    let name = releaser.name_any();
    if !current.is_empty() {
        if let Some(prefix) = name.strip_suffix(&current) {
            releaser.metadata.name = Some(format!("{prefix}{}", bump.next));
        }
    }

    releaser.spec.phase = Phase::Draft;
    releaser.spec.version = bump.next;

    for repo in &mut releaser.spec.repositories {
        let Some(version) = repo.version.as_deref().filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let repo_bump = bump_version(version, retain_pre_release);
        if let Some(err) = &repo_bump.error {
            warn!(repository = %repo.name, error = %err, "Keeping repository version");
        }
        repo.version = Some(repo_bump.next);
    }

    releaser.status = None;
    releaser.strip_transient_metadata();

    bump.was_pre_release
}

/// Bump a serialized request document.
///
/// Returns the new document, its file name (`<next-name>.yaml`) and whether
/// the bumped version was a pre-release.
pub fn bump_request_document(
    data: &[u8],
    retain_pre_release: bool,
) -> Result<(Vec<u8>, String, bool), serde_yaml::Error> {
    let mut releaser: Releaser = serde_yaml::from_slice(data)?;
    let was_pre_release = bump_request(&mut releaser, retain_pre_release);
    let filename = format!("{}.yaml", releaser.name_any());
    let document = serde_yaml::to_string(&releaser)?;
    Ok((document.into_bytes(), filename, was_pre_release))
}
