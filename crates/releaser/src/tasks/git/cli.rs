//! Git operations using the system `git` binary.
//!
//! Uses `tokio::process::Command` so long fetches and pushes do not block the
//! runtime.

use super::{GitAuth, GitError, GitOperations};
use crate::tasks::credentials::Author;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Whether the configured binary can be executed.
    pub async fn available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .is_ok_and(|output| output.status.success())
    }

    async fn run(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        auth: Option<&GitAuth>,
        author: Option<&Author>,
    ) -> Result<String, GitError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        debug!(command = %command, dir = ?dir, "Running git");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        match auth {
            Some(auth) => {
                cmd.envs(auth.envs());
            }
            None => {
                cmd.env("GIT_TERMINAL_PROMPT", "0");
            }
        }
        if let Some(author) = author {
            cmd.env("GIT_AUTHOR_NAME", &author.name)
                .env("GIT_AUTHOR_EMAIL", &author.email)
                .env("GIT_COMMITTER_NAME", &author.name)
                .env("GIT_COMMITTER_EMAIL", &author.email);
        }

        let output = cmd.output().await.map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(GitError::Failed {
            command,
            stderr: if stderr.is_empty() {
                stdout.trim().to_string()
            } else {
                stderr
            },
        })
    }
}

fn path_arg(path: &Path) -> Result<&str, GitError> {
    path.to_str()
        .ok_or_else(|| GitError::InvalidAddress(path.display().to_string()))
}

#[async_trait]
impl GitOperations for GitCli {
    async fn clone_branch(
        &self,
        remote: &str,
        branch: &str,
        dest: &Path,
        auth: &GitAuth,
    ) -> Result<(), GitError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| GitError::Spawn {
                    command: "clone".to_string(),
                    source,
                })?;
        }
        self.run(
            None,
            &[
                "clone",
                "--branch",
                branch,
                "--no-tags",
                remote,
                path_arg(dest)?,
            ],
            Some(auth),
            None,
        )
        .await?;
        Ok(())
    }

    async fn fetch(&self, dir: &Path, auth: &GitAuth) -> Result<(), GitError> {
        // Explicit refspec: every remote branch, whatever the clone configured.
        self.run(
            Some(dir),
            &[
                "fetch",
                "--tags",
                "--force",
                "--prune",
                "origin",
                "+refs/heads/*:refs/remotes/origin/*",
            ],
            Some(auth),
            None,
        )
        .await?;
        Ok(())
    }

    async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let upstream = format!("origin/{branch}");
        self.run(
            Some(dir),
            &["checkout", "-f", "-B", branch, &upstream],
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn reset_to_remote(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let upstream = format!("origin/{branch}");
        self.run(Some(dir), &["reset", "--hard", &upstream], None, None)
            .await?;
        self.run(Some(dir), &["clean", "-fd"], None, None).await?;
        Ok(())
    }

    async fn remote_tag_exists(
        &self,
        dir: &Path,
        tag: &str,
        auth: &GitAuth,
    ) -> Result<bool, GitError> {
        let reference = format!("refs/tags/{tag}");
        let output = self
            .run(
                Some(dir),
                &["ls-remote", "--tags", "origin", &reference],
                Some(auth),
                None,
            )
            .await?;

        Ok(output.lines().any(|line| {
            line.split_whitespace()
                .nth(1)
                .is_some_and(|name| name == reference || name == format!("{reference}^{{}}"))
        }))
    }

    async fn create_tag(
        &self,
        dir: &Path,
        tag: &str,
        message: &str,
        author: &Author,
    ) -> Result<(), GitError> {
        // -f replaces a local tag left behind by a pass whose push failed.
        self.run(
            Some(dir),
            &["tag", "-f", "-a", tag, "-m", message],
            None,
            Some(author),
        )
        .await?;
        Ok(())
    }

    async fn push_tag(&self, dir: &Path, tag: &str, auth: &GitAuth) -> Result<(), GitError> {
        let refspec = format!("refs/tags/{tag}:refs/tags/{tag}");
        match self
            .run(Some(dir), &["push", "origin", &refspec], Some(auth), None)
            .await
        {
            Err(GitError::Failed { stderr, .. }) if stderr.contains("up-to-date") => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn commit_all(
        &self,
        dir: &Path,
        message: &str,
        author: &Author,
    ) -> Result<bool, GitError> {
        self.run(Some(dir), &["add", "-A"], None, None).await?;

        let status = self
            .run(Some(dir), &["status", "--porcelain"], None, None)
            .await?;
        if status.trim().is_empty() {
            debug!(dir = %dir.display(), "Nothing to commit");
            return Ok(false);
        }

        self.run(Some(dir), &["commit", "-m", message], None, Some(author))
            .await?;
        Ok(true)
    }

    async fn push_branch(
        &self,
        dir: &Path,
        branch: &str,
        auth: &GitAuth,
    ) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.run(Some(dir), &["push", "origin", &refspec], Some(auth), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::git::sync_working_copy;
    use tempfile::TempDir;

    fn author() -> Author {
        Author {
            name: "tester".to_string(),
            email: "tester@example.com".to_string(),
        }
    }

    /// Bare origin with `master` and a `release-1.0` branch carrying
    /// `CHANGELOG.md`, or `None` without git.
    async fn origin(git: &GitCli, root: &Path) -> Option<String> {
        if !git.available().await {
            return None;
        }
        let seed = root.join("seed");
        let bare = root.join("origin.git");
        std::fs::create_dir_all(&seed).unwrap();

        let run = |dir: &Path, args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(dir)
                .env("GIT_AUTHOR_NAME", "seed")
                .env("GIT_AUTHOR_EMAIL", "seed@example.com")
                .env("GIT_COMMITTER_NAME", "seed")
                .env("GIT_COMMITTER_EMAIL", "seed@example.com")
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?}");
        };

        run(&seed, &["init", "-q", "-b", "master"]);
        std::fs::write(seed.join("README.md"), "seed\n").unwrap();
        run(&seed, &["add", "-A"]);
        run(&seed, &["commit", "-q", "-m", "init"]);
        run(&seed, &["checkout", "-q", "-b", "release-1.0"]);
        std::fs::write(seed.join("CHANGELOG.md"), "1.0\n").unwrap();
        run(&seed, &["add", "-A"]);
        run(&seed, &["commit", "-q", "-m", "release branch"]);
        run(&seed, &["checkout", "-q", "master"]);
        run(root, &["clone", "-q", "--bare", "seed", "origin.git"]);

        Some(format!("file://{}", bare.display()))
    }

    #[tokio::test]
    async fn test_tag_push_and_lookup() {
        let git = GitCli::default();
        let root = TempDir::new().unwrap();
        let Some(remote) = origin(&git, root.path()).await else {
            return;
        };
        let auth = GitAuth::anonymous();
        let work = root.path().join("work");

        git.clone_branch(&remote, "master", &work, &auth).await.unwrap();
        assert!(!git.remote_tag_exists(&work, "v0.1.0", &auth).await.unwrap());

        git.create_tag(&work, "v0.1.0", "released", &author())
            .await
            .unwrap();
        git.push_tag(&work, "v0.1.0", &auth).await.unwrap();
        assert!(git.remote_tag_exists(&work, "v0.1.0", &auth).await.unwrap());

        // A second push of the same tag is a no-op.
        git.push_tag(&work, "v0.1.0", &auth).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_and_push_branch() {
        let git = GitCli::default();
        let root = TempDir::new().unwrap();
        let Some(remote) = origin(&git, root.path()).await else {
            return;
        };
        let auth = GitAuth::anonymous();
        let work = root.path().join("work");

        git.clone_branch(&remote, "master", &work, &auth).await.unwrap();
        assert!(!git.commit_all(&work, "noop", &author()).await.unwrap());

        std::fs::write(work.join("release.yaml"), "phase: done\n").unwrap();
        assert!(git.commit_all(&work, "release", &author()).await.unwrap());
        git.push_branch(&work, "master", &auth).await.unwrap();

        let other = root.path().join("other");
        git.clone_branch(&remote, "master", &other, &auth).await.unwrap();
        assert!(other.join("release.yaml").exists());

        git.fetch(&work, &auth).await.unwrap();
        git.checkout(&work, "master").await.unwrap();
        git.reset_to_remote(&work, "master").await.unwrap();
    }

    #[tokio::test]
    async fn test_cached_copy_switches_branch() {
        let git = GitCli::default();
        let root = TempDir::new().unwrap();
        let Some(remote) = origin(&git, root.path()).await else {
            return;
        };
        let auth = GitAuth::anonymous();
        let work = root.path().join("work");

        sync_working_copy(&git, &remote, "master", &work, &auth)
            .await
            .unwrap();
        assert!(!work.join("CHANGELOG.md").exists());

        sync_working_copy(&git, &remote, "release-1.0", &work, &auth)
            .await
            .unwrap();
        assert!(work.join("CHANGELOG.md").exists());

        sync_working_copy(&git, &remote, "master", &work, &auth)
            .await
            .unwrap();
        assert!(!work.join("CHANGELOG.md").exists());
    }

    #[tokio::test]
    async fn test_failures_carry_stderr() {
        let git = GitCli::default();
        if !git.available().await {
            return;
        }
        let root = TempDir::new().unwrap();
        let err = git
            .clone_branch(
                &format!("file://{}/missing.git", root.path().display()),
                "master",
                &root.path().join("work"),
                &GitAuth::anonymous(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Failed { ref command, .. } if command == "clone"));
    }
}
