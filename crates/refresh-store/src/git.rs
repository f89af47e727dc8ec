//! Keeps an up-to-date checkout of a Git repository.
//!
//! The repository is cloned into a private temporary directory by the first update and pulled
//! by every update after that. The `git` executable must be available on the `PATH`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;

use crate::config::StoreConfig;
use crate::engine::UpdateContext;
use crate::error::StoreError;
use crate::store::Store;

/// Name of the checkout inside the store's temporary directory.
const WORKTREE_DIR: &str = "worktree";

/// An error updating a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GitError {
    /// The `git` executable could not be started.
    #[error("failed to run git: {0}")]
    Spawn(String),
    /// A `git` command did not finish before the update deadline.
    #[error("git {command} timed out")]
    Timeout { command: String },
    /// A `git` command exited unsuccessfully.
    #[error("git {command} failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    /// The checkout directory could not be prepared.
    #[error("failed to prepare checkout: {0}")]
    Io(String),
}

impl From<io::Error> for GitError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A snapshot of the checkout after a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitWorktree {
    /// The working tree of the checkout.
    ///
    /// The directory is updated in place by later updates and removed once the store has shut
    /// down.
    pub path: PathBuf,
    /// The commit id of `HEAD` after the update.
    pub head: String,
}

/// The repository a [`GitRepoStore`] tracks, and where it is checked out.
#[derive(Debug)]
struct Checkout {
    url: String,
    branch: Option<String>,
    dir: TempDir,
}

impl Checkout {
    fn worktree(&self) -> PathBuf {
        self.dir.path().join(WORKTREE_DIR)
    }

    async fn update(&self, ctx: UpdateContext) -> Result<GitWorktree, GitError> {
        let worktree = self.worktree();

        if tokio::fs::try_exists(worktree.join(".git")).await? {
            run_git(&ctx, &worktree, &["pull", "--ff-only", "--quiet"]).await?;
        } else {
            self.clone_into(&ctx, &worktree).await?;
        }

        let head = run_git(&ctx, &worktree, &["rev-parse", "HEAD"]).await?;
        let head = head.trim().to_owned();
        tracing::debug!(%head, "Updated checkout of `{}`", self.url);

        Ok(GitWorktree {
            path: worktree,
            head,
        })
    }

    async fn clone_into(&self, ctx: &UpdateContext, worktree: &Path) -> Result<(), GitError> {
        // Left behind by a clone that failed or ran out of time.
        if tokio::fs::try_exists(worktree).await? {
            tokio::fs::remove_dir_all(worktree).await?;
        }

        let worktree = worktree.to_string_lossy();
        let mut args = vec!["clone", "--quiet"];
        if let Some(branch) = &self.branch {
            args.extend(["--branch", branch.as_str(), "--single-branch"]);
        }
        args.extend(["--", self.url.as_str(), &*worktree]);

        run_git(ctx, self.dir.path(), &args).await?;
        Ok(())
    }
}

/// Runs `git` with `args` in `cwd` and returns its standard output.
///
/// The child process is killed if `ctx` is cancelled before it exits.
async fn run_git(ctx: &UpdateContext, cwd: &Path, args: &[&str]) -> Result<String, GitError> {
    let command = args.first().copied().unwrap_or_default().to_owned();
    tracing::trace!("Running `git {}`", args.join(" "));

    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match ctx.run(output).await {
        Ok(output) => output.map_err(|err| GitError::Spawn(err.to_string()))?,
        Err(_) => return Err(GitError::Timeout { command }),
    };

    if !output.status.success() {
        return Err(GitError::Command {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A [`Store`] holding a checkout of a Git repository.
#[derive(Clone, Debug)]
pub struct GitRepoStore {
    url: String,
    store: Store<GitWorktree, GitError>,
}

impl GitRepoStore {
    /// Creates a store tracking the default branch of the repository at `url`.
    ///
    /// `url` can be anything `git clone` accepts, including local paths.
    ///
    /// # Panics
    ///
    /// Panics if the config is invalid or when called outside of a tokio runtime.
    pub fn new(url: impl Into<String>, config: StoreConfig) -> Result<Self, GitError> {
        Self::with_branch(url, None, config)
    }

    /// Creates a store tracking `branch`, or the default branch if `None`.
    ///
    /// # Panics
    ///
    /// Panics if the config is invalid or when called outside of a tokio runtime.
    pub fn with_branch(
        url: impl Into<String>,
        branch: Option<String>,
        config: StoreConfig,
    ) -> Result<Self, GitError> {
        let url = url.into();
        let dir = tempfile::Builder::new()
            .prefix("refresh-store-git-")
            .tempdir()?;

        let checkout = Arc::new(Checkout {
            url: url.clone(),
            branch,
            dir,
        });
        let producer = move |ctx: UpdateContext| {
            let checkout = Arc::clone(&checkout);
            async move { checkout.update(ctx).await }
        };

        Ok(Self {
            url,
            store: Store::new(producer, config),
        })
    }

    /// The checkout after the last update.
    pub fn get(&self) -> Result<GitWorktree, StoreError<GitError>> {
        self.store.get()
    }

    /// Waits until the repository was cloned once, see [`Store::wait`].
    pub async fn wait(&self, max_wait: Duration) -> Result<(), StoreError<GitError>> {
        self.store.wait(max_wait).await
    }

    /// Stops updating the checkout.
    pub fn shutdown(&self) {
        self.store.shutdown()
    }

    /// The tracked repository.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The underlying store.
    pub fn store(&self) -> &Store<GitWorktree, GitError> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command as StdCommand;

    use super::*;
    use crate::test;

    /// Runs git synchronously, for setting up fixtures.
    fn git(cwd: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args([
                "-c",
                "user.name=Test",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(cwd)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed: {output:?}");
        String::from_utf8(output.stdout).unwrap()
    }

    fn has_git() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    /// Creates a repository with a single commit on `main`.
    fn upstream() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "--quiet", "--initial-branch=main"]);
        commit(dir.path(), "README", "first\n");
        dir
    }

    fn commit(repo: &Path, file: &str, contents: &str) -> String {
        std::fs::write(repo.join(file), contents).unwrap();
        git(repo, &["add", file]);
        git(repo, &["commit", "--quiet", "-m", file]);
        git(repo, &["rev-parse", "HEAD"]).trim().to_owned()
    }

    fn config() -> StoreConfig {
        StoreConfig {
            update_interval: Duration::from_secs(1),
            update_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_clone_and_pull() {
        test::setup();
        if !has_git() {
            return;
        }

        let upstream = upstream();
        let first = git(upstream.path(), &["rev-parse", "HEAD"]).trim().to_owned();

        let store = GitRepoStore::new(upstream.path().to_string_lossy(), config()).unwrap();
        store.wait(Duration::from_secs(10)).await.unwrap();

        let worktree = store.get().unwrap();
        assert_eq!(worktree.head, first);
        assert_eq!(
            std::fs::read_to_string(worktree.path.join("README")).unwrap(),
            "first\n"
        );

        let second = commit(upstream.path(), "CHANGELOG", "second\n");

        let mut updated = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(worktree) = store.get() {
                if worktree.head == second {
                    updated = Some(worktree);
                    break;
                }
            }
        }

        let updated = updated.expect("checkout was not updated");
        assert_eq!(updated.path, worktree.path);
        assert!(updated.path.join("CHANGELOG").exists());
    }

    #[tokio::test]
    async fn test_branch() {
        test::setup();
        if !has_git() {
            return;
        }

        let upstream = upstream();
        git(upstream.path(), &["checkout", "--quiet", "-b", "release"]);
        let release = commit(upstream.path(), "RELEASE", "1.0\n");
        git(upstream.path(), &["checkout", "--quiet", "main"]);

        let store = GitRepoStore::with_branch(
            upstream.path().to_string_lossy(),
            Some("release".to_owned()),
            config(),
        )
        .unwrap();
        store.wait(Duration::from_secs(10)).await.unwrap();

        let worktree = store.get().unwrap();
        assert_eq!(worktree.head, release);
        assert!(worktree.path.join("RELEASE").exists());
    }

    #[tokio::test]
    async fn test_missing_repository() {
        test::setup();
        if !has_git() {
            return;
        }

        let missing = tempfile::tempdir().unwrap();
        let store = GitRepoStore::new(
            missing.path().join("nope").to_string_lossy(),
            config(),
        )
        .unwrap();
        store.wait(Duration::from_secs(10)).await.unwrap();

        match store.get() {
            Err(StoreError::Producer(GitError::Command { command, .. })) => {
                assert_eq!(command, "clone");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
