//! Configuration loading and persistence.
//!
//! The config lives at `<workspace>/config.json`. Saving writes a
//! timestamped copy under `<workspace>/backups/` first, so a bad edit can
//! always be rolled back.

pub mod types;

pub use types::{
    AgentDefaults, AgentsConfig, Config, EmbeddingConfig, GatewayConfig, HeartbeatConfig,
    HourRange, McpServerConfig, MemoryConfig, ModelEntry, ProviderCredential, QdrantConfig,
    ScheduleConfig, ScheduleRule, ScheduleTarget, ToolsConfig, WebhookConfig, WebhookFormat,
};

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::error::{PicoError, Result};

/// Default workspace directory under the user's home.
const DEFAULT_WORKSPACE: &str = "~/.picoclaw";

impl Config {
    /// Load the config from a JSON file, rejecting unknown fields.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| PicoError::Config(format!("invalid config {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Save the config to `<workspace>/config.json`, writing a timestamped
    /// backup of the previous version first.
    pub fn save(&self) -> Result<PathBuf> {
        let workspace = self.workspace_path();
        std::fs::create_dir_all(&workspace)?;
        let target = workspace.join("config.json");

        if target.exists() {
            let backups = workspace.join("backups");
            std::fs::create_dir_all(&backups)?;
            let stamp = Utc::now().format("%Y%m%d%H%M%S");
            let backup = backups.join(format!("config_{}.json", stamp));
            std::fs::copy(&target, &backup)?;
            info!(backup = %backup.display(), "Backed up previous config");
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&target, content)?;
        Ok(target)
    }

    /// The workspace root with `~` expanded.
    pub fn workspace_path(&self) -> PathBuf {
        let raw = if self.workspace.is_empty() {
            DEFAULT_WORKSPACE
        } else {
            &self.workspace
        };
        expand_home(raw)
    }

    /// Path of the persistent cron job store.
    pub fn cron_store_path(&self) -> PathBuf {
        self.workspace_path().join("cron").join("jobs.json")
    }

    /// Path of the heartbeat checklist file.
    pub fn heartbeat_file_path(&self) -> PathBuf {
        self.workspace_path().join("HEARTBEAT.md")
    }

    /// Workspace id used for memory scoping: the directory name.
    pub fn workspace_id(&self) -> String {
        self.workspace_path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "default".to_string())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Create the workspace tree and write a default config if none exists.
///
/// Used by the `onboard` subcommand. Returns the config file path.
pub fn onboard(workspace: &str) -> Result<PathBuf> {
    let mut config = Config::default();
    config.workspace = workspace.to_string();

    let root = config.workspace_path();
    std::fs::create_dir_all(root.join("memory"))?;
    std::fs::create_dir_all(root.join("cron"))?;
    std::fs::create_dir_all(root.join("backups"))?;

    let target = root.join("config.json");
    if target.exists() {
        return Err(PicoError::Config(format!(
            "config already exists at {}",
            target.display()
        )));
    }
    config.save()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_valid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"workspace": "/tmp/ws"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.workspace, "/tmp/ws");
    }

    #[test]
    fn test_load_rejects_unknown_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"workspce": "/tmp/ws"}"#).unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(PicoError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/config.json"));
        assert!(matches!(result, Err(PicoError::Io(_))));
    }

    #[test]
    fn test_save_creates_file_and_backup() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.workspace = dir.path().to_string_lossy().to_string();

        // First save: no backup yet.
        let target = config.save().unwrap();
        assert!(target.exists());
        let backups: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
            .map(|rd| rd.count())
            .ok()
            .into_iter()
            .collect();
        assert!(backups.is_empty() || backups[0] == 0);

        // Second save: previous version is backed up.
        config.save().unwrap();
        let backup_count = std::fs::read_dir(dir.path().join("backups")).unwrap().count();
        assert_eq!(backup_count, 1);
        let backup_name = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .file_name();
        let name = backup_name.to_string_lossy().to_string();
        assert!(name.starts_with("config_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_workspace_path_defaults() {
        let config = Config::default();
        let path = config.workspace_path();
        assert!(path.to_string_lossy().ends_with(".picoclaw"));
    }

    #[test]
    fn test_workspace_helpers() {
        let mut config = Config::default();
        config.workspace = "/tmp/family-ws".to_string();
        assert_eq!(
            config.cron_store_path(),
            PathBuf::from("/tmp/family-ws/cron/jobs.json")
        );
        assert_eq!(
            config.heartbeat_file_path(),
            PathBuf::from("/tmp/family-ws/HEARTBEAT.md")
        );
        assert_eq!(config.workspace_id(), "family-ws");
    }

    #[test]
    fn test_onboard_creates_tree() {
        let dir = tempdir().unwrap();
        let ws = dir.path().join("claw");
        let target = onboard(&ws.to_string_lossy()).unwrap();

        assert!(target.exists());
        assert!(ws.join("memory").is_dir());
        assert!(ws.join("cron").is_dir());

        // Running onboard twice must not clobber an existing config.
        let again = onboard(&ws.to_string_lossy());
        assert!(matches!(again, Err(PicoError::Config(_))));
    }
}
