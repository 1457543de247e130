//! Path-addressed cache of git working copies.
//!
//! Each remote maps to `<root>/<host>/<url path>`. Callers hold the entry's
//! lock for the whole time they use the working copy.

use super::GitError;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct WorkspaceCache {
    root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl WorkspaceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working copy location for `address`.
    pub fn path_for(&self, address: &str) -> Result<PathBuf, GitError> {
        let invalid = || GitError::InvalidAddress(address.to_string());
        let (host, path) = split_address(address).ok_or_else(invalid)?;

        let mut dir = self.root.join(sanitize(&host));
        let mut segments = 0;
        for segment in path.split('/') {
            let segment = segment.strip_suffix(".git").unwrap_or(segment);
            if segment.is_empty() {
                continue;
            }
            // Drop anything that would climb out of the cache root.
            if !matches!(Path::new(segment).components().next(), Some(Component::Normal(_))) {
                continue;
            }
            dir.push(sanitize(segment));
            segments += 1;
        }

        if segments == 0 {
            return Err(invalid());
        }
        Ok(dir)
    }

    /// Acquire the exclusive lock of a cache entry.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        // Entries only the map references have no holder and no waiter.
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        let mutex = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        debug!(path = %path.display(), "Waiting for working copy lock");
        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}

/// Host (with port) and path of an URL or scp-like `user@host:path` address.
fn split_address(address: &str) -> Option<(String, String)> {
    let address = address.trim();
    if let Ok(url) = Url::parse(address) {
        if url.scheme() == "file" {
            return Some(("local".to_string(), url.path().to_string()));
        }
        // `host:path` without a user parses as a URL with no host.
        if let Some(host) = url.host_str() {
            let host = match url.port() {
                Some(port) => format!("{host}_{port}"),
                None => host.to_string(),
            };
            return Some((host, url.path().to_string()));
        }
    }

    let (user_host, path) = address.split_once(':')?;
    let host = user_host.rsplit_once('@').map_or(user_host, |(_, host)| host);
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some((host.to_string(), path.to_string()))
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
