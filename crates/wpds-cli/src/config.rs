use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;
use wpds::FileType;
use wpds_wporg::Endpoints;

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub concurrent_actions: usize,
    pub file_type: FileType,
    pub connector: ConnectorChoice,
    pub svn_program: PathBuf,
    pub fetch_timeout_secs: u64,
    pub endpoints: Endpoints,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            concurrent_actions: 10,
            file_type: FileType::All,
            connector: ConnectorChoice::Auto,
            svn_program: PathBuf::from("svn"),
            fetch_timeout_secs: 60,
            endpoints: Endpoints::default(),
        }
    }
}

/// Which backend to use for positions and item lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorChoice {
    /// `svn` when the client is installed, otherwise the HTTP API.
    #[default]
    Auto,
    Api,
    Svn,
}

/// Config file path: `~/.config/wpds/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wpds").join("config.toml"))
}

/// Load config from `path` (or the default location), falling back to
/// defaults if the file is missing or unreadable.
pub fn load_config(path: Option<&Path>) -> AppConfig {
    let explicit = path.is_some();
    let Some(path) = path.map(Path::to_path_buf).or_else(config_path) else {
        return AppConfig::default();
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "failed to parse config, using defaults: {e}");
                AppConfig::default()
            }
        },
        Err(e) => {
            if explicit {
                warn!(path = %path.display(), "failed to read config, using defaults: {e}");
            }
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.concurrent_actions, 10);
        assert_eq!(config.connector, ConnectorChoice::Auto);
    }

    #[test]
    fn parse_full_config_from_toml() {
        let toml_str = r#"
concurrent_actions = 250
file_type = "readme"
connector = "svn"
svn_program = "/usr/local/bin/svn"
fetch_timeout_secs = 120

[endpoints]
svn = "https://mirror.example/{kind}/svn"
trac = "https://mirror.example/{kind}/trac"
downloads = "https://mirror.example/downloads"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.concurrent_actions, 250);
        assert_eq!(config.file_type, FileType::Readme);
        assert_eq!(config.connector, ConnectorChoice::Svn);
        assert_eq!(config.svn_program, PathBuf::from("/usr/local/bin/svn"));
        assert_eq!(config.fetch_timeout_secs, 120);
        assert_eq!(config.endpoints.downloads, "https://mirror.example/downloads");
    }

    #[test]
    fn partial_endpoints_keep_defaults() {
        let toml_str = r#"
[endpoints]
downloads = "http://localhost:8080"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let defaults = Endpoints::default();
        assert_eq!(config.endpoints.downloads, "http://localhost:8080");
        assert_eq!(config.endpoints.svn, defaults.svn);
        assert_eq!(config.endpoints.trac, defaults.trac);
    }

    #[test]
    fn unknown_connector_is_rejected() {
        assert!(toml::from_str::<AppConfig>(r#"connector = "git""#).is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wpds.toml");
        std::fs::write(&path, "concurrent_actions = 42\n").unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.concurrent_actions, 42);
    }

    #[test]
    fn malformed_or_missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "concurrent_actions = [").unwrap();

        assert_eq!(load_config(Some(&path)), AppConfig::default());
        assert_eq!(
            load_config(Some(&dir.path().join("absent.toml"))),
            AppConfig::default()
        );
    }
}
