// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

use super::types::{BatchConfig, ConfigFile};

/// Workspace config file names, in search order.
pub const CONFIG_FILES: &[&str] = &[
    ".tracehound.json",
    ".tracehound.yaml",
    ".tracehound.yml",
    ".tracehound/config.json",
];

/// Per-directory overrides, meant to stay out of version control.
pub const LOCAL_CONFIG_FILE: &str = ".tracehound.local.json";

/// Global config directory name under the home directory.
pub const GLOBAL_CONFIG_DIR: &str = ".tracehound";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load `~/.tracehound/config.json` if it exists.
pub fn load_global_config() -> Result<Option<ConfigFile>, ConfigError> {
    match get_global_config_path() {
        Some(path) => load_optional(&path),
        None => Ok(None),
    }
}

/// Load the first workspace config file found in `workspace_root`.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load `.tracehound.local.json` if it exists.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    load_optional(&workspace_root.join(LOCAL_CONFIG_FILE))
}

fn load_optional(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(path).map(Some)
}

/// Load a configuration file, JSON or YAML by extension.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    debug!(path = %path.display(), "Loading config file");
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Write `config` as pretty JSON to `workspace_root/filename`
/// (default `.tracehound.json`).
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &ConfigFile,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(filename.unwrap_or(CONFIG_FILES[0]));
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Write a starter config unless one already exists.
pub fn init_config(workspace_root: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = CONFIG_FILES
        .iter()
        .map(|f| workspace_root.join(f))
        .find(|p| p.exists())
    {
        return Err(ConfigError::InvalidValue {
            field: "config".to_string(),
            message: format!("{} already exists", existing.display()),
        });
    }
    save_workspace_config(workspace_root, &get_example_config(), None)
}

/// Walk up from `start` to the first directory holding a workspace config.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| CONFIG_FILES.iter().any(|f| dir.join(f).exists()))
        .map(Path::to_path_buf)
}

/// Starter configuration. Credentials are left to the environment.
pub fn get_example_config() -> ConfigFile {
    ConfigFile {
        domain: Some(crate::api::DEFAULT_DOMAIN.to_string()),
        default_tags: Some([("owner".to_string(), "me".to_string())].into()),
        path_exclusions: Some(vec!["^/health$".to_string()]),
        batch: Some(BatchConfig {
            max_batch_size: Some(64),
            max_batch_age_ms: Some(5_000),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_global_config_dir() {
        let dir = get_global_config_dir().unwrap();
        assert!(dir.ends_with(".tracehound"));
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        assert!(load_workspace_config(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".tracehound.json"),
            r#"{"domain": "staging.test", "includeTrackers": true}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.domain.as_deref(), Some("staging.test"));
        assert_eq!(config.include_trackers, Some(true));
    }

    #[test]
    fn test_load_workspace_config_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".tracehound.yaml"),
            "domain: yaml.test\nhostExclusions:\n  - internal\n",
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.domain.as_deref(), Some("yaml.test"));
        assert_eq!(config.host_exclusions, Some(vec!["internal".to_string()]));
    }

    #[test]
    fn test_json_wins_over_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".tracehound.json"), r#"{"domain": "json.test"}"#).unwrap();
        std::fs::write(temp.path().join(".tracehound.yaml"), "domain: yaml.test\n").unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.domain.as_deref(), Some("json.test"));
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".tracehound.json"), "{ nope").unwrap();
        let err = load_workspace_config(temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_local_config() {
        let temp = TempDir::new().unwrap();
        assert!(load_local_config(temp.path()).unwrap().is_none());
        std::fs::write(temp.path().join(LOCAL_CONFIG_FILE), r#"{"skipTlsVerify": true}"#).unwrap();
        let local = load_local_config(temp.path()).unwrap().unwrap();
        assert_eq!(local.skip_tls_verify, Some(true));
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = init_config(temp.path()).unwrap();
        assert!(path.ends_with(".tracehound.json"));

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded, get_example_config());
        assert!(init_config(temp.path()).is_err());
    }

    #[test]
    fn test_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join(".tracehound.json"), "{}").unwrap();

        assert_eq!(find_workspace_root(&nested).unwrap(), temp.path());
    }
}
