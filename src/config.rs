//! Project configuration and the `.foreman/` directory layout.
//!
//! Configuration lives in `.foreman/config.toml`. Every field is optional;
//! missing fields fall back to defaults so a project works with no config
//! file at all.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration for a foreman project.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// Branch merges integrate into.
    pub base_branch: String,
    /// Command used to launch the execution worker for a task.
    pub worker_cmd: String,
    pub worker_args: Vec<String>,
}

/// Raw TOML structure for `.foreman/config.toml`.
#[derive(Debug, Deserialize)]
struct ConfigToml {
    foreman: Option<ConfigSection>,
}

#[derive(Debug, Deserialize)]
struct ConfigSection {
    base_branch: Option<String>,
    worker_cmd: Option<String>,
    worker_args: Option<Vec<String>>,
}

impl Config {
    /// Load config from `.foreman/config.toml` in the project directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut config = Self::defaults(project_dir);
        let config_path = config.foreman_dir().join("config.toml");
        if !config_path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let toml: ConfigToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if let Some(section) = toml.foreman {
            if let Some(base_branch) = section.base_branch {
                config.base_branch = base_branch;
            }
            if let Some(worker_cmd) = section.worker_cmd {
                config.worker_cmd = worker_cmd;
            }
            if let Some(worker_args) = section.worker_args {
                config.worker_args = worker_args;
            }
        }

        Ok(config)
    }

    fn defaults(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            base_branch: "main".to_string(),
            worker_cmd: "foreman-worker".to_string(),
            worker_args: Vec::new(),
        }
    }

    pub fn foreman_dir(&self) -> PathBuf {
        self.project_dir.join(".foreman")
    }

    /// One directory per task specification: `task.json`, `plan.json`,
    /// `phase_logs.json`.
    pub fn specs_dir(&self) -> PathBuf {
        self.foreman_dir().join("specs")
    }

    pub fn spec_dir(&self, spec_id: &str) -> PathBuf {
        self.specs_dir().join(spec_id)
    }

    /// One isolated workspace per active review, addressable by task id.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.foreman_dir().join("worktrees")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.foreman_dir().join("logs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.specs_dir()).context("Failed to create specs directory")?;
        std::fs::create_dir_all(self.worktrees_dir())
            .context("Failed to create worktrees directory")?;
        std::fs::create_dir_all(self.log_dir()).context("Failed to create log directory")?;

        // The data dir lives inside the repository working tree; make it
        // self-ignoring so task state and worktree checkouts never show up
        // in the main repo's status or get swept into commits.
        let gitignore = self.foreman_dir().join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n").context("Failed to write .foreman/.gitignore")?;
        }
        Ok(())
    }
}
