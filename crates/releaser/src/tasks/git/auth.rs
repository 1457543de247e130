//! Git authentication environment.
//!
//! Basic credentials are fed to git through a `GIT_ASKPASS` script and SSH
//! keys through `GIT_SSH_COMMAND`. Both live in a private temporary directory
//! that is removed when the [`GitAuth`] is dropped, so one value must outlive
//! every git command of a repository step.

use super::GitError;
use crate::tasks::credentials::Credentials;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::warn;

/// Escapes a value for use inside a single-quoted shell string.
fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Loose check that key material is a PEM or OpenSSH private key.
pub fn looks_like_private_key(material: &str) -> bool {
    let material = material.trim();
    material.starts_with("-----BEGIN") && material.contains("PRIVATE KEY-----")
}

#[derive(Debug)]
pub struct GitAuth {
    env: Vec<(String, String)>,
    scratch: Option<TempDir>,
}

impl GitAuth {
    pub fn anonymous() -> Self {
        Self {
            env: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            scratch: None,
        }
    }

    pub fn from_credentials(credentials: &Credentials) -> Result<Self, GitError> {
        match credentials {
            Credentials::Anonymous => Ok(Self::anonymous()),
            Credentials::Basic { username, password } => Self::basic(username, password),
            Credentials::SshKey { private_key } if looks_like_private_key(private_key) => {
                Self::ssh_key(private_key)
            }
            Credentials::SshKey { .. } => {
                warn!("ssh-privatekey is not a private key, using anonymous access");
                Ok(Self::anonymous())
            }
        }
    }

    fn basic(username: &str, password: &str) -> Result<Self, GitError> {
        let dir = private_dir()?;
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  Username*) printf '%s\\n' '{}' ;;\n  *) printf '%s\\n' '{}' ;;\nesac\n",
            shell_escape(username),
            shell_escape(password)
        );
        let path = write_private_file(dir.path(), "askpass.sh", script.as_bytes(), 0o700)?;

        let mut auth = Self::anonymous();
        auth.env
            .push(("GIT_ASKPASS".to_string(), path.display().to_string()));
        auth.scratch = Some(dir);
        Ok(auth)
    }

    fn ssh_key(private_key: &str) -> Result<Self, GitError> {
        let dir = private_dir()?;
        let mut key = private_key.trim().to_string();
        key.push('\n');
        let path = write_private_file(dir.path(), "id_key", key.as_bytes(), 0o600)?;

        let command = format!(
            "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
            shell_escape(&path.display().to_string())
        );

        let mut auth = Self::anonymous();
        auth.env.push(("GIT_SSH_COMMAND".to_string(), command));
        auth.scratch = Some(dir);
        Ok(auth)
    }

    /// Environment variables to set on every git command.
    pub fn envs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_anonymous(&self) -> bool {
        self.scratch.is_none()
    }
}

fn private_dir() -> Result<TempDir, GitError> {
    tempfile::Builder::new()
        .prefix("releaser-auth-")
        .tempdir()
        .map_err(GitError::Auth)
}

fn write_private_file(
    dir: &Path,
    name: &str,
    contents: &[u8],
    mode: u32,
) -> Result<PathBuf, GitError> {
    let path = dir.join(name);

    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)
            .map_err(GitError::Auth)?
    };

    #[cfg(not(unix))]
    let mut file = {
        let _ = mode;
        std::fs::File::create(&path).map_err(GitError::Auth)?
    };

    file.write_all(contents).map_err(GitError::Auth)?;
    Ok(path)
}
