//! Configuration loader with tier-based merging.

use super::merge::deep_merge_all;
use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the config file looked up in each tier directory.
const CONFIG_FILE: &str = "config.yaml";

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Built-in defaults
    Defaults = 0,
    /// Project-level config ($CWD/nested-todo/)
    Project = 1,
    /// User-level config (~/.nested-todo/)
    User = 2,
    /// Environment variables
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Project-level config directory
    pub project_dir: Option<PathBuf>,
    /// User-level config directory
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        // User dir: NESTED_TODO_USER_DIR or ~/.nested-todo
        let user_dir = std::env::var("NESTED_TODO_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".nested-todo")));

        // Project dir: NESTED_TODO_PROJECT_DIR or $CWD/nested-todo
        let project_dir = std::env::var("NESTED_TODO_PROJECT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("nested-todo"));

        Self {
            project_dir: Some(project_dir),
            user_dir,
        }
    }

    /// Create paths with explicit directories.
    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }
}

/// Read one tier's YAML file. Missing files are skipped; unreadable or
/// malformed ones are skipped with a warning.
fn read_tier(dir: &Path, tier: ConfigTier) -> Option<(Value, PathBuf)> {
    let file = dir.join(CONFIG_FILE);
    if !file.exists() {
        return None;
    }
    let parsed = std::fs::read_to_string(&file)
        .map_err(anyhow::Error::from)
        .and_then(|content| serde_yaml::from_str::<Value>(&content).map_err(Into::into));
    match parsed {
        Ok(value) => {
            debug!(%tier, path = %file.display(), "Loaded config tier");
            Some((value, file))
        }
        Err(e) => {
            warn!(%tier, path = %file.display(), error = %e, "Ignoring unreadable config file");
            None
        }
    }
}

/// Configuration loader that handles tier-based merging.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Paths for each tier
    pub paths: ConfigPaths,
    /// Loaded configuration
    config: Config,
    /// Config files that contributed, lowest tier first
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration from all tiers.
    ///
    /// An explicit path (from `--config` or `NESTED_TODO_CONFIG_PATH`)
    /// replaces the file tiers entirely; environment overrides still apply.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        let explicit = explicit.or_else(|| {
            std::env::var("NESTED_TODO_CONFIG_PATH")
                .ok()
                .map(PathBuf::from)
        });
        Self::load_with_paths(ConfigPaths::discover(), explicit, |key| std::env::var(key).ok())
    }

    /// Load configuration with explicit paths and environment lookup.
    pub fn load_with_paths<E>(paths: ConfigPaths, explicit: Option<PathBuf>, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let (mut config, sources) = match explicit {
            Some(path) => {
                let config = Config::load(&path)
                    .with_context(|| format!("Failed to load config file {}", path.display()))?;
                (config, vec![path])
            }
            None => {
                let mut tiers: Vec<Value> = vec![serde_json::to_value(Config::default())?];
                let mut sources = Vec::new();

                let tier_dirs = [
                    (paths.project_dir.as_deref(), ConfigTier::Project),
                    (paths.user_dir.as_deref(), ConfigTier::User),
                ];
                for (dir, tier) in tier_dirs {
                    if let Some((value, file)) = dir.and_then(|d| read_tier(d, tier)) {
                        tiers.push(value);
                        sources.push(file);
                    }
                }

                let config: Config = serde_json::from_value(deep_merge_all(tiers))
                    .context("Invalid configuration")?;
                (config, sources)
            }
        };

        Self::apply_env_overrides(&mut config, env);

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    /// Apply environment variable overrides to config.
    fn apply_env_overrides<E>(config: &mut Config, env: E)
    where
        E: Fn(&str) -> Option<String>,
    {
        let tier = ConfigTier::Environment;

        if let Some(db_path) = env("NESTED_TODO_DB_PATH") {
            debug!(%tier, key = "server.db_path", value = %db_path, "Config override");
            config.server.db_path = PathBuf::from(db_path);
        }

        if let Some(port) = env("NESTED_TODO_PORT") {
            match port.parse() {
                Ok(parsed) => {
                    debug!(%tier, key = "server.port", value = %port, "Config override");
                    config.server.port = parsed;
                }
                Err(_) => warn!(%tier, value = %port, "Ignoring invalid NESTED_TODO_PORT"),
            }
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference for CLI overrides.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Config files that contributed to the result.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PORT;
    use std::fs;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_when_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::with_dirs(Some(dir.path().join("project")), None);
        let loader = ConfigLoader::load_with_paths(paths, None, no_env).unwrap();
        assert_eq!(loader.config().server.port, DEFAULT_PORT);
        assert!(loader.sources().is_empty());
    }

    #[test]
    fn user_tier_overrides_project_tier_field_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        let user = dir.path().join("user");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(&user).unwrap();
        fs::write(
            project.join(CONFIG_FILE),
            "server:\n  port: 4000\n  host: 0.0.0.0\n",
        )
        .unwrap();
        fs::write(user.join(CONFIG_FILE), "server:\n  port: 5000\n").unwrap();

        let paths = ConfigPaths::with_dirs(Some(project), Some(user));
        let loader = ConfigLoader::load_with_paths(paths, None, no_env).unwrap();
        assert_eq!(loader.config().server.port, 5000);
        assert_eq!(loader.config().server.host, "0.0.0.0");
        assert_eq!(loader.sources().len(), 2);
    }

    #[test]
    fn malformed_tier_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "server: [unclosed").unwrap();

        let paths = ConfigPaths::with_dirs(Some(dir.path().to_path_buf()), None);
        let loader = ConfigLoader::load_with_paths(paths, None, no_env).unwrap();
        assert_eq!(loader.config().server.port, DEFAULT_PORT);
    }

    #[test]
    fn explicit_file_must_exist() {
        let paths = ConfigPaths::with_dirs(None, None);
        let result = ConfigLoader::load_with_paths(
            paths,
            Some(PathBuf::from("/definitely/not/here.yaml")),
            no_env,
        );
        assert!(result.is_err());
    }

    #[test]
    fn tiers_order_and_display() {
        assert!(ConfigTier::Defaults < ConfigTier::Project);
        assert!(ConfigTier::User < ConfigTier::Environment);
        assert_eq!(ConfigTier::Environment.to_string(), "environment");
    }

    #[test]
    fn env_port_override_applies() {
        let paths = ConfigPaths::with_dirs(None, None);
        let env = |key: &str| (key == "NESTED_TODO_PORT").then(|| "8123".to_string());
        let loader = ConfigLoader::load_with_paths(paths, None, env).unwrap();
        assert_eq!(loader.config().server.port, 8123);
    }

    #[test]
    fn env_overrides_win_and_bad_port_is_ignored() {
        let paths = ConfigPaths::with_dirs(None, None);
        let env = |key: &str| match key {
            "NESTED_TODO_DB_PATH" => Some("/tmp/other.db".to_string()),
            "NESTED_TODO_PORT" => Some("not-a-port".to_string()),
            _ => None,
        };
        let loader = ConfigLoader::load_with_paths(paths, None, env).unwrap();
        assert_eq!(loader.config().server.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(loader.config().server.port, DEFAULT_PORT);
    }
}
