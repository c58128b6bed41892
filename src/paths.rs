use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment override for the config directory
pub const CONFIG_DIR_ENV: &str = "FRAMEBUF_CONFIG_DIR";

/// Default config file name
pub const CONFIG_FILE: &str = "framebuf.json";

/// Where configuration and logs live
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (FRAMEBUF_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. FRAMEBUF_CONFIG_DIR environment variable
/// 3. Local folder IF framebuf.json exists there
/// 4. Platform-specific config directory from dirs-next
///
/// Platform paths:
/// - Linux: ~/.config/framebuf/{name}
/// - macOS: ~/Library/Application Support/framebuf/{name}
/// - Windows: %APPDATA%\framebuf\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Create the config directory if missing
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }
    Ok(())
}

fn has_local_config(dir: &Path) -> bool {
    dir.join(CONFIG_FILE).exists()
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    if let Ok(current_dir) = std::env::current_dir() {
        if has_local_config(&current_dir) {
            return current_dir;
        }
    }

    if let Some(dir) = dirs_next::config_dir() {
        return dir.join("framebuf");
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(
            config_file(CONFIG_FILE, &config),
            PathBuf::from("/custom").join(CONFIG_FILE)
        );
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from/cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from/cli")));
    }

    #[test]
    fn test_ensure_dirs_creates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("cfg");
        let config = PathConfig {
            config_dir: Some(dir.clone()),
        };
        ensure_dirs(&config).unwrap();
        assert!(dir.is_dir());
    }
}
