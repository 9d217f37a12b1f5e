//! Workspace Manager: local clones and commit checkout.
//!
//! One clone directory per repository lives under the workspace root and is
//! kept across runs as a cache. Access to a clone is exclusive: preparing a
//! workspace takes a per-repository async lock, and the returned
//! [`Workspace`] holds the guard until it is dropped.

pub mod git;
pub mod validate;

pub use validate::{validate_git_ref, validate_repo_name};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::error::CheckoutError;
use git::{run_git, truncate, GitOutput};

/// Default remote hosting the benchmark repositories.
pub const DEFAULT_REMOTE_BASE: &str = "https://github.com";

/// Default workspace root when `CLONE_DIR` is not set.
pub const DEFAULT_WORKSPACE_ROOT: &str = "./swe-workspaces";

/// Configuration for the workspace manager.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Directory holding one clone per repository.
    pub root: PathBuf,
    /// Base URL (or `file://` path) repositories are cloned from.
    pub remote_base: String,
    /// Token injected into HTTPS clone URLs.
    pub github_token: Option<String>,
    /// Shallow clone depth. `None` clones full history.
    pub clone_depth: Option<u32>,
    /// Fetch from origin once when a commit is missing locally.
    pub fetch_missing: bool,
    /// Bound on clone and fetch operations.
    pub network_timeout: Duration,
    /// Bound on local git operations.
    pub local_timeout: Duration,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORKSPACE_ROOT)
    }
}

impl WorkspaceConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
            github_token: None,
            clone_depth: None,
            fetch_missing: true,
            network_timeout: Duration::from_secs(1800),
            local_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_remote_base(mut self, base: impl Into<String>) -> Self {
        self.remote_base = base.into();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.github_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_clone_depth(mut self, depth: Option<u32>) -> Self {
        self.clone_depth = depth;
        self
    }

    pub fn with_fetch_missing(mut self, fetch: bool) -> Self {
        self.fetch_missing = fetch;
        self
    }
}

/// An exclusively owned checkout of one repository at one commit.
///
/// Dropping the workspace releases the repository lock.
#[derive(Debug)]
pub struct Workspace {
    repo: String,
    path: PathBuf,
    commit: String,
    _guard: OwnedMutexGuard<()>,
}

impl Workspace {
    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full hash of the checked-out commit.
    pub fn commit(&self) -> &str {
        &self.commit
    }
}

/// Owns the clone directories under the workspace root.
pub struct WorkspaceManager {
    config: WorkspaceConfig,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Clone directory for `repo`: `<root>/<owner>/<name>`.
    ///
    /// Validated owner and name parts never contain `/` or start with `.`,
    /// so distinct repositories never share a directory.
    pub fn clone_dir(&self, repo: &str) -> PathBuf {
        repo.split('/')
            .fold(self.config.root.clone(), |dir, part| dir.join(part))
    }

    fn clone_url(&self, repo: &str) -> String {
        let base = self.config.remote_base.trim_end_matches('/');
        match (&self.config.github_token, base.strip_prefix("https://")) {
            (Some(token), Some(host)) => format!("https://x-access-token:{token}@{host}/{repo}.git"),
            _ => format!("{base}/{repo}.git"),
        }
    }

    fn redact(&self, text: &str) -> String {
        match &self.config.github_token {
            Some(token) => text.replace(token.as_str(), "***"),
            None => text.to_string(),
        }
    }

    fn lock_for(&self, repo: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(repo.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Obtain the clone of `repo`, discard local modifications and check out
    /// `commit`.
    ///
    /// Waits while another workspace for the same repository is alive.
    pub async fn prepare(&self, repo: &str, commit: &str) -> Result<Workspace, CheckoutError> {
        validate_repo_name(repo)?;
        validate_git_ref(commit)?;

        let guard = self.lock_for(repo).lock_owned().await;
        let dir = self.clone_dir(repo);

        if dir.join(".git").exists() {
            debug!(repo = repo, path = %dir.display(), "Reusing existing clone");
        } else {
            self.clone_repo(repo, &dir).await?;
        }

        let target = match self.resolve_commit(repo, &dir, commit).await? {
            Some(hash) => hash,
            None if self.config.fetch_missing => {
                debug!(repo = repo, commit = commit, "Commit missing locally, fetching origin");
                if let Err(e) = self.fetch(repo, &dir).await {
                    warn!(repo = repo, error = %e, "Fetch failed");
                }
                self.resolve_commit(repo, &dir, commit)
                    .await?
                    .ok_or_else(|| CheckoutError::CommitNotFound {
                        repo: repo.to_string(),
                        commit: commit.to_string(),
                    })?
            }
            None => {
                return Err(CheckoutError::CommitNotFound {
                    repo: repo.to_string(),
                    commit: commit.to_string(),
                })
            }
        };

        self.git_ok(repo, &dir, &["reset", "--hard", "--quiet"]).await?;
        self.git_ok(repo, &dir, &["clean", "-fdxq"]).await?;
        self.git_ok(repo, &dir, &["checkout", "--force", "--quiet", "--detach", &target])
            .await?;

        let head = self.git_ok(repo, &dir, &["rev-parse", "HEAD"]).await?;
        let head = head.first_line().to_string();
        if head != target {
            return Err(CheckoutError::HeadMismatch {
                repo: repo.to_string(),
                expected: target,
                actual: head,
            });
        }

        info!(repo = repo, commit = %target, path = %dir.display(), "Workspace ready");

        Ok(Workspace {
            repo: repo.to_string(),
            path: dir,
            commit: target,
            _guard: guard,
        })
    }

    async fn clone_repo(&self, repo: &str, dir: &Path) -> Result<(), CheckoutError> {
        let parent = dir.parent().unwrap_or(&self.config.root);
        std::fs::create_dir_all(parent)?;
        if dir.exists() {
            // Leftover from an interrupted clone.
            std::fs::remove_dir_all(dir)?;
        }

        // git runs inside the owner directory, so the target is the bare name.
        let url = self.clone_url(repo);
        let dir_arg = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let depth;
        let mut args = vec!["clone", "--quiet"];
        if let Some(d) = self.config.clone_depth {
            depth = d.to_string();
            args.extend(["--depth", depth.as_str(), "--no-single-branch"]);
        }
        args.extend([url.as_str(), dir_arg.as_str()]);

        info!(repo = repo, depth = ?self.config.clone_depth, "Cloning repository");
        let output = run_git(parent, &args, self.config.network_timeout)
            .await
            .map_err(|e| CheckoutError::CloneFailed {
                repo: repo.to_string(),
                stderr: self.redact(&e.to_string()),
            })?;
        if !output.success {
            return Err(CheckoutError::CloneFailed {
                repo: repo.to_string(),
                stderr: truncate(&self.redact(&output.stderr), 500),
            });
        }
        Ok(())
    }

    async fn fetch(&self, repo: &str, dir: &Path) -> Result<(), CheckoutError> {
        let output = run_git(
            dir,
            &["fetch", "--quiet", "--tags", "origin"],
            self.config.network_timeout,
        )
        .await?;
        if !output.success {
            return Err(CheckoutError::GitFailed {
                repo: repo.to_string(),
                command: "fetch".to_string(),
                stderr: truncate(&self.redact(&output.stderr), 500),
            });
        }
        Ok(())
    }

    /// Full hash of `commit` if the object exists locally.
    async fn resolve_commit(
        &self,
        repo: &str,
        dir: &Path,
        commit: &str,
    ) -> Result<Option<String>, CheckoutError> {
        let object = format!("{commit}^{{commit}}");
        let exists = run_git(dir, &["cat-file", "-e", &object], self.config.local_timeout).await?;
        if !exists.success {
            debug!(repo = repo, commit = commit, "Commit not present in local history");
            return Ok(None);
        }
        let output = self
            .git_ok(repo, dir, &["rev-parse", "--verify", "--quiet", &object])
            .await?;
        Ok(Some(output.first_line().to_string()))
    }

    async fn git_ok(
        &self,
        repo: &str,
        dir: &Path,
        args: &[&str],
    ) -> Result<GitOutput, CheckoutError> {
        let output = run_git(dir, args, self.config.local_timeout).await?;
        if !output.success {
            return Err(CheckoutError::GitFailed {
                repo: repo.to_string(),
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: truncate(&output.stderr, 500),
            });
        }
        Ok(output)
    }
}
