use anyhow::{Context, Result, anyhow};
use git2::{Repository, StatusOptions};
use std::path::{Path, PathBuf};

/// Trait defining the version-control queries required by the verifier.
/// This abstraction allows for easier testing and decoupling from specific git implementations.
pub trait GitClient {
    /// Returns every untracked, non-ignored file below `folder`, as absolute paths.
    fn get_untracked_files(&self, folder: &Path) -> Result<Vec<PathBuf>>;
}

/// Concrete implementation of GitClient using the git2 crate.
pub struct Git2Client {
    repo: Repository,
}

impl Git2Client {
    /// Opens the repository containing `path`.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::discover(path.as_ref()).with_context(|| {
            format!("No Git repository found at {}", path.as_ref().display())
        })?;
        Ok(Self { repo })
    }

    fn workdir(&self) -> Result<PathBuf> {
        self.repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Repository has no working directory"))
    }

    /// Converts an absolute path to the forward-slash form git uses.
    fn repo_relative(&self, path: &Path) -> Result<String> {
        let workdir = self.workdir()?;
        let workdir = workdir.canonicalize().unwrap_or(workdir);
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let relative = path
            .strip_prefix(&workdir)
            .with_context(|| format!("{} is outside the repository", path.display()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }
}

impl GitClient for Git2Client {
    fn get_untracked_files(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let workdir = self.workdir()?;
        let prefix = self.repo_relative(folder)?;

        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        if !prefix.is_empty() {
            options.pathspec(prefix.as_str());
        }

        let statuses = self
            .repo
            .statuses(Some(&mut options))
            .context("Failed to read repository status")?;

        let mut untracked = Vec::new();
        for entry in statuses.iter() {
            if !entry.status().is_wt_new() {
                continue;
            }
            if let Some(path) = entry.path()
                && (prefix.is_empty() || path.starts_with(&format!("{prefix}/")))
            {
                untracked.push(workdir.join(path));
            }
        }
        untracked.sort();
        Ok(untracked)
    }
}
