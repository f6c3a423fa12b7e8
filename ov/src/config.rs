//! Overseer configuration
//!
//! Loaded from YAML with a fallback chain: explicit path, `overseer.yml`
//! in the working directory, `~/.config/overseer/config.yml`, then
//! built-in defaults. Keys are kebab-case.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::worktree::WorktreeConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default, rename = "loop")]
    pub loop_config: LoopConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub git: GitConfig,
}

/// Where shared state lives on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
    /// The repository the loops work on
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Parent of the queue, registry, control, and session dirs
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,

    /// Sibling directory holding task worktrees
    #[serde(default = "default_worktree_root")]
    pub worktree_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoopConfig {
    /// Delay between tasks, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Poll interval while the queue is empty, in milliseconds
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Retries per task for recoverable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Consecutive failures before the session pauses itself
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Execution fetches from `analysed` instead of `todo`
    #[serde(default)]
    pub preflight_analysis: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Agent command to spawn per task
    #[serde(default = "default_worker_command")]
    pub command: String,

    /// Arguments; `{{session-id}}` and `{{model}}` are substituted
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Wall-clock timeout per worker run, in milliseconds
    #[serde(default = "default_worker_timeout_ms")]
    pub timeout_ms: u64,

    /// Prompt template for execution tasks
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,

    /// Prompt template for pre-flight analysis
    #[serde(default = "default_analysis_template")]
    pub analysis_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitConfig {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Gitignored-but-needed files copied into each worktree
    #[serde(default = "default_copy_files")]
    pub copy_files: Vec<String>,

    /// Path segments never copied
    #[serde(default = "default_deny_dirs")]
    pub deny_dirs: Vec<String>,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("overseer")
}

fn default_worktree_root() -> PathBuf {
    PathBuf::from("../overseer-worktrees")
}

fn default_cooldown_ms() -> u64 {
    2_000
}

fn default_idle_poll_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_worker_command() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_worker_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_prompt_template() -> String {
    "Work on task {{task-id}}: {{task-name}}\n\n{{task-description}}\n\n\
     Acceptance criteria:\n- {{acceptance-criteria}}\n\n\
     You are in {{working-directory}}. Commit your work when done."
        .to_string()
}

fn default_analysis_template() -> String {
    "Analyse task {{task-id}}: {{task-name}}\n\n{{task-description}}\n\n\
     Read the codebase in {{working-directory}} and produce acceptance \
     criteria and steps. If anything is ambiguous, print lines starting \
     with QUESTION: instead of guessing."
        .to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_copy_files() -> Vec<String> {
    vec![".env".to_string()]
}

fn default_deny_dirs() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        "target".to_string(),
        "dist".to_string(),
        ".git".to_string(),
    ]
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            state_root: default_state_root(),
            worktree_root: default_worktree_root(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            max_retries: default_max_retries(),
            failure_threshold: default_failure_threshold(),
            preflight_analysis: false,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: Vec::new(),
            model: default_model(),
            timeout_ms: default_worker_timeout_ms(),
            prompt_template: default_prompt_template(),
            analysis_template: default_analysis_template(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            copy_files: default_copy_files(),
            deny_dirs: default_deny_dirs(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let config: Config = serde_yaml::from_str(&content).context("Failed to parse config")?;
            config.validate()?;
            return Ok(config);
        }

        let default_paths = [
            Some(PathBuf::from("overseer.yml")),
            dirs::config_dir().map(|p| p.join("overseer").join("config.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content).context("Failed to parse config")?;
                config.validate()?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Fail fast on settings no loop can run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.command.trim().is_empty() {
            eyre::bail!("worker.command must not be empty");
        }
        if self.worker.timeout_ms == 0 {
            eyre::bail!("worker.timeout-ms must be positive");
        }
        if self.loop_config.failure_threshold == 0 {
            eyre::bail!("loop.failure-threshold must be positive");
        }
        if self.git.base_branch.trim().is_empty() {
            eyre::bail!("git.base-branch must not be empty");
        }
        Ok(())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.paths.state_root.join("queue")
    }

    pub fn control_dir(&self) -> PathBuf {
        self.paths.state_root.join("control")
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.paths.state_root.join("registry")
    }

    pub fn session_dir(&self) -> PathBuf {
        self.paths.state_root.join("session")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.paths.state_root.join("scratch")
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.loop_config.cooldown_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.loop_config.idle_poll_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker.timeout_ms)
    }

    /// Worktree manager settings assembled from the paths and git
    /// sections
    pub fn worktree_config(&self) -> WorktreeConfig {
        WorktreeConfig {
            project_root: self.paths.project_root.clone(),
            shared_root: self.paths.worktree_root.clone(),
            base_branch: self.git.base_branch.clone(),
            queue_dir: self.queue_dir(),
            control_dir: self.control_dir(),
            queue_mount: PathBuf::from(".overseer/queue"),
            control_mount: PathBuf::from(".overseer/control"),
            copy_files: self.git.copy_files.clone(),
            deny_dirs: self.git.deny_dirs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.loop_config.failure_threshold, 3);
        assert_eq!(config.git.base_branch, "main");
        assert!(!config.loop_config.preflight_analysis);
        assert!(config.worker.prompt_template.contains("{{task-name}}"));
    }

    #[test]
    fn test_load_kebab_case_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "loop:\n  max-retries: 5\n  preflight-analysis: true\ngit:\n  base-branch: develop\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.loop_config.max_retries, 5);
        assert!(config.loop_config.preflight_analysis);
        assert_eq!(config.git.base_branch, "develop");
        // Untouched sections keep defaults
        assert_eq!(config.worker.command, "claude");
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.loop_config.cooldown_ms = 1234;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.loop_config.cooldown_ms, 1234);
    }

    #[test]
    fn test_validate_rejects_empty_worker_command() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "worker:\n  command: \"\"\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }
}
