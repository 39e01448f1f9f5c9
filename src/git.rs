use crate::config::RemoteConfig;
use crate::store::LocalStore;
use crate::utils::{run_command_at, run_command_status, run_command_with_env};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// The version-control operations publishing needs. All of them act on the
/// store directory only.
pub trait VersionControl {
    /// Porcelain status; empty when nothing changed since the last commit.
    fn status(&self) -> anyhow::Result<String>;
    fn stage_all(&self) -> anyhow::Result<()>;
    /// Commits the staged changes of the store directory and nothing else.
    fn commit(&self, message: &str) -> anyhow::Result<()>;
    fn push(&self) -> anyhow::Result<()>;
    /// Current HEAD, or `None` in a repository without commits.
    fn head(&self) -> anyhow::Result<Option<String>>;
    /// Moves HEAD back to `sha`, or back to an unborn branch when `sha` is
    /// `None`, keeping the index and working tree.
    fn reset_head(&self, sha: Option<&str>) -> anyhow::Result<()>;
}

/// Drives the `git` executable inside the store directory.
pub struct GitCli {
    git: PathBuf,
    dir: PathBuf,
    remote: RemoteConfig,
}

impl GitCli {
    /// Tries to find `git` on `PATH`.
    pub fn lookup(dir: &Path, remote: RemoteConfig) -> Option<Self> {
        which::which("git").ok().map(|git| Self {
            git,
            dir: dir.to_path_buf(),
            remote,
        })
    }

    fn git(&self, args: &[&str]) -> anyhow::Result<String> {
        let git = self.git.to_string_lossy();
        let mut cmd = vec![&*git];
        cmd.extend_from_slice(args);
        run_command_at(&cmd, &self.dir)
    }

    /// Git config entries that inject the token into the remote's https URL.
    fn credential_env(&self, token: &str) -> anyhow::Result<Vec<(String, String)>> {
        let url = self
            .git(&["remote", "get-url", &self.remote.remote_name])
            .with_context(|| format!("cannot resolve remote `{}`", self.remote.remote_name))?;
        let Some(authed) = authenticated_url(&url, token) else {
            warn!("Remote URL is not https, pushing without the configured token");
            return Ok(vec![]);
        };
        Ok(vec![
            ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
            ("GIT_CONFIG_KEY_0".to_string(), format!("url.{authed}.insteadOf")),
            ("GIT_CONFIG_VALUE_0".to_string(), url),
        ])
    }
}

impl VersionControl for GitCli {
    fn status(&self) -> anyhow::Result<String> {
        self.git(&["status", "--porcelain", "--", "."])
            .context("cannot query git status")
    }

    fn stage_all(&self) -> anyhow::Result<()> {
        self.git(&["add", "-A", "--", "."])
            .context("cannot stage changes")?;
        Ok(())
    }

    fn commit(&self, message: &str) -> anyhow::Result<()> {
        self.git(&["commit", "-m", message, "--", "."])
            .context("cannot create sync commit")?;
        Ok(())
    }

    fn push(&self) -> anyhow::Result<()> {
        let env = match &self.remote.remote_token {
            Some(token) if !token.is_empty() => self.credential_env(token)?,
            _ => vec![],
        };
        let git = self.git.to_string_lossy();
        run_command_with_env(
            [&*git, "push", &self.remote.remote_name, "HEAD"],
            &self.dir,
            &env,
        )
        .with_context(|| format!("cannot push to `{}`", self.remote.remote_name))?;
        Ok(())
    }

    fn head(&self) -> anyhow::Result<Option<String>> {
        let git = self.git.to_string_lossy();
        let args = [&*git, "rev-parse", "--verify", "-q", "HEAD"];
        // `-q --verify` exits with 1 when HEAD does not resolve yet.
        match run_command_status(&args, &self.dir, &[])? {
            (Some(0), sha) => Ok(Some(sha)),
            (Some(1), _) => Ok(None),
            (code, _) => Err(anyhow::anyhow!(
                "cannot resolve HEAD: `{}` exited with {code:?}",
                args.join(" ")
            )),
        }
    }

    fn reset_head(&self, sha: Option<&str>) -> anyhow::Result<()> {
        match sha {
            Some(sha) => self.git(&["reset", "--soft", sha])?,
            None => self.git(&["update-ref", "-d", "HEAD"])?,
        };
        Ok(())
    }
}

/// Inserts `x-access-token:<token>@` into an https URL, replacing any user info.
fn authenticated_url(url: &str, token: &str) -> Option<String> {
    let rest = url.strip_prefix("https://")?;
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    Some(format!(
        "https://x-access-token:{}@{host}/{path}",
        urlencoding::encode(token)
    ))
}

#[derive(Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The store matches the last commit.
    NothingToPublish,
    Published,
}

/// Commits and pushes the store when it has changed.
pub struct ChangePublisher<'a> {
    vcs: &'a dyn VersionControl,
    commit_message: String,
}

impl<'a> ChangePublisher<'a> {
    pub fn new(vcs: &'a dyn VersionControl, commit_message: &str) -> Self {
        Self {
            vcs,
            commit_message: commit_message.to_string(),
        }
    }

    pub fn has_changes(&self, store: &LocalStore) -> anyhow::Result<bool> {
        store.has_changes(self.vcs)
    }

    /// Stages, commits and pushes when `has_changes`, as reported by
    /// [`ChangePublisher::has_changes`].
    pub fn publish(&self, has_changes: bool) -> anyhow::Result<PublishOutcome> {
        if !has_changes {
            info!("No changes detected, skipping commit");
            return Ok(PublishOutcome::NothingToPublish);
        }

        self.vcs.stage_all()?;

        // Undo the sync commit if it cannot be pushed.
        let mut reset = ResetOnDrop::new(self.vcs, self.vcs.head()?);

        info!("Committing changes");
        self.vcs.commit(&self.commit_message)?;
        info!("Pushing changes");
        self.vcs.push()?;

        reset.disarm();
        Ok(PublishOutcome::Published)
    }
}

/// Soft-resets HEAD to `reset_to` on drop, unless `disarm` is called first.
/// `None` means HEAD was unborn.
struct ResetOnDrop<'a> {
    vcs: &'a dyn VersionControl,
    disarmed: bool,
    reset_to: Option<String>,
}

impl<'a> ResetOnDrop<'a> {
    fn new(vcs: &'a dyn VersionControl, reset_to: Option<String>) -> Self {
        Self {
            vcs,
            disarmed: false,
            reset_to,
        }
    }

    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        let target = self.reset_to.as_deref().unwrap_or("<no commits>");
        warn!("Reverting HEAD to {target}");
        if let Err(err) = self.vcs.reset_head(self.reset_to.as_deref()) {
            error!("cannot reset current branch to {target}: {err:?}");
        }
    }
}
