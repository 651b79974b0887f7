//! Source fetcher: a shallow checkout of exactly one commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{FetchError, SourceFetcher, run};

/// Fetches into a single reusable directory.
///
/// The directory is deleted and recreated before every fetch, so nothing
/// from a previous task (or a previous run on this machine) leaks into the
/// next measurement. One fetcher must not serve two tasks at once.
pub struct GitFetcher {
    work_dir: PathBuf,
}

impl GitFetcher {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn reset(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.work_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.work_dir)
    }
}

impl SourceFetcher for GitFetcher {
    fn fetch(&self, remote_url: &str, commit_id: &str) -> Result<PathBuf, FetchError> {
        self.reset().map_err(|source| FetchError::Reset {
            path: self.work_dir.clone(),
            source,
        })?;

        run(git(&self.work_dir).args(["init", "--quiet"]))?;
        run(git(&self.work_dir).args(["fetch", "--quiet", "--depth", "1", remote_url, commit_id]))?;
        run(git(&self.work_dir).args(["checkout", "--quiet", "--detach", "FETCH_HEAD"]))?;

        Ok(self.work_dir.clone())
    }
}

/// A `git` command rooted at `dir` that never prompts for credentials.
fn git(dir: &Path) -> Command {
    let mut command = Command::new("git");
    command
        .arg("-C")
        .arg(dir)
        .env("GIT_TERMINAL_PROMPT", "0");
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::external::CommandError;

    fn git_ok(dir: &Path, args: &[&str]) -> String {
        let out = run(git(dir).args(args)).unwrap();
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// An upstream repository with two commits; returns the first commit's id.
    fn upstream(dir: &Path) -> String {
        fs::create_dir_all(dir).unwrap();
        git_ok(dir, &["init", "--quiet"]);
        git_ok(dir, &["config", "user.email", "census@example.com"]);
        git_ok(dir, &["config", "user.name", "census"]);
        git_ok(dir, &["config", "uploadpack.allowReachableSHA1InWant", "true"]);
        fs::write(dir.join("main.py"), "print('one')\n").unwrap();
        git_ok(dir, &["add", "."]);
        git_ok(dir, &["commit", "--quiet", "-m", "one"]);
        let first = git_ok(dir, &["rev-parse", "HEAD"]);
        fs::write(dir.join("extra.py"), "print('two')\n").unwrap();
        git_ok(dir, &["add", "."]);
        git_ok(dir, &["commit", "--quiet", "-m", "two"]);
        first
    }

    #[test]
    fn fetches_requested_commit_into_fresh_dir() {
        let dir = TempDir::new().unwrap();
        let remote = dir.path().join("remote");
        let first = upstream(&remote);

        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("stale.txt"), "from a previous task").unwrap();

        let fetcher = GitFetcher::new(&work);
        let url = format!("file://{}", remote.display());
        let path = fetcher.fetch(&url, &first).unwrap();

        assert_eq!(path, work);
        assert!(path.join("main.py").exists());
        assert!(!path.join("extra.py").exists());
        assert!(!path.join("stale.txt").exists());
        assert_eq!(git_ok(&path, &["rev-parse", "HEAD"]), first);
    }

    #[test]
    fn unknown_remote_fails() {
        let dir = TempDir::new().unwrap();
        let fetcher = GitFetcher::new(dir.path().join("work"));
        let missing = format!("file://{}", dir.path().join("missing").display());

        let err = fetcher
            .fetch(&missing, "0000000000000000000000000000000000000000")
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Command(CommandError::Failed { .. })
        ));
    }
}
