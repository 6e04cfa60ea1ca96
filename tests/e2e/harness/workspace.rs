use anyhow::{Context, Result};
use depot_core::{repo_dir_from_name, GitDir, RepoName};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated repository store on disk
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty store
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        fs::create_dir_all(dir.path().join("repos")).context("Failed to create repos dir")?;
        Ok(Self { dir })
    }

    /// Workspace root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory holding every repository
    pub fn repos_dir(&self) -> PathBuf {
        self.path().join("repos")
    }

    /// Control directory of a repository, whether or not it exists
    pub fn git_dir(&self, name: &str) -> GitDir {
        repo_dir_from_name(&self.repos_dir(), &RepoName::new(name))
    }

    /// Create a minimal bare repository layout
    pub fn add_repo(&self, name: &str) -> Result<GitDir> {
        let dir = self.git_dir(name);
        let layout: [&[&str]; 4] = [
            &["objects", "pack"],
            &["objects", "info"],
            &["refs", "heads"],
            &["info"],
        ];
        for sub in layout {
            let path = dir.path(sub);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }
        self.write_repo_file(name, "HEAD", b"ref: refs/heads/main\n")?;
        self.write_repo_file(name, "config", b"[core]\n\tbare = true\n")?;
        self.write_repo_file(name, "refs/heads/main", b"0123456789abcdef0123456789abcdef01234567\n")?;
        Ok(dir)
    }

    /// Write a file inside a repository's control directory
    pub fn write_repo_file(&self, name: &str, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.repo_file(name, path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directories for {}", path))?;
        }
        fs::write(&full_path, content)
            .with_context(|| format!("Failed to write {} in {}", path, name))?;
        Ok(())
    }

    /// Delete a file inside a repository's control directory
    pub fn remove_repo_file(&self, name: &str, path: &str) -> Result<()> {
        fs::remove_file(self.repo_file(name, path))
            .with_context(|| format!("Failed to remove {} in {}", path, name))
    }

    /// Path of a file inside a repository's control directory
    pub fn repo_file(&self, name: &str, path: &str) -> PathBuf {
        let parts: Vec<&str> = path.split('/').collect();
        self.git_dir(name).path(&parts)
    }

    /// Read a file inside a repository's control directory
    pub fn read_repo_file(&self, name: &str, path: &str) -> Result<Vec<u8>> {
        fs::read(self.repo_file(name, path))
            .with_context(|| format!("Failed to read {} in {}", path, name))
    }

    pub fn repo_exists(&self, name: &str) -> bool {
        self.git_dir(name).as_path().exists()
    }

    pub fn repo_file_exists(&self, name: &str, path: &str) -> bool {
        self.repo_file(name, path).exists()
    }
}
