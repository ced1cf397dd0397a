//! Configuration loading (§4.9).
//!
//! Precedence, lowest to highest: `config.json` in the working directory,
//! `TD_USERNAME`/`TD_PASSWORD` environment variables (credentials only),
//! CLI flags. CLI always wins a conflict.

use std::path::PathBuf;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Deserialize;

/// WebDAV sync server for userscript-manager extensions.
#[derive(Debug, Parser)]
#[command(name = "tamperdav", version, about)]
pub struct Cli {
    /// Directory to serve.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Bind host.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Basic auth username.
    #[arg(long)]
    pub username: Option<String>,

    /// Basic auth password.
    #[arg(long)]
    pub password: Option<String>,

    /// Bump `*.meta.json` mtime whenever the matching `*.user.js` changes.
    #[arg(long)]
    pub meta_touch: bool,

    /// Verbose per-request logging.
    #[arg(long)]
    pub debug: bool,

    /// Shell command template used by the EDITOR verb; `{}` is replaced
    /// with the absolute path.
    #[arg(long)]
    pub open_in_editor: Option<String>,

    /// Suppress the startup warning when no credentials are configured.
    #[arg(long)]
    pub no_auth_warning: bool,

    /// Path to the JSON config file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
    path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    meta_touch: bool,
    #[serde(default)]
    debug: bool,
    open_in_editor: Option<String>,
    #[serde(default)]
    no_auth_warning: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root: Utf8PathBuf,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub meta_touch: bool,
    pub debug: bool,
    pub open_in_editor: Option<String>,
    pub no_auth_warning: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),

    #[error("`path` is required (pass --path or set it in config.json)")]
    MissingPath,

    #[error("storage root `{0}` is not valid UTF-8")]
    NotUtf8(PathBuf),
}

impl Config {
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = load_file_config(&cli.config)?;

        let path = cli
            .path
            .or(file.path)
            .ok_or(ConfigError::MissingPath)?;
        let root = Utf8PathBuf::from_path_buf(path.clone())
            .map_err(|_| ConfigError::NotUtf8(path))?;

        let username = cli
            .username
            .or_else(|| std::env::var("TD_USERNAME").ok())
            .or(file.username);
        let password = cli
            .password
            .or_else(|| std::env::var("TD_PASSWORD").ok())
            .or(file.password);

        Ok(Config {
            root,
            host: cli.host.or(file.host).unwrap_or_else(|| "localhost".to_string()),
            port: cli.port.or(file.port).unwrap_or(7000),
            username,
            password,
            meta_touch: cli.meta_touch || file.meta_touch,
            debug: cli.debug || file.debug,
            open_in_editor: cli.open_in_editor.or(file.open_in_editor),
            no_auth_warning: cli.no_auth_warning || file.no_auth_warning,
        })
    }

    pub fn auth_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

fn load_file_config(path: &std::path::Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError::Read(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            path: Some(PathBuf::from("/srv/scripts")),
            host: None,
            port: None,
            username: None,
            password: None,
            meta_touch: false,
            debug: false,
            open_in_editor: None,
            no_auth_warning: false,
            config: PathBuf::from("/nonexistent/config.json"),
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::load(base_cli()).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 7000);
        assert!(!config.auth_configured());
    }

    #[test]
    fn missing_path_is_an_error() {
        let mut cli = base_cli();
        cli.path = None;
        assert!(matches!(
            Config::load(cli),
            Err(ConfigError::MissingPath)
        ));
    }

    #[test]
    fn cli_credentials_mark_auth_configured() {
        let mut cli = base_cli();
        cli.username = Some("dev".to_string());
        cli.password = Some("hunter2".to_string());
        let config = Config::load(cli).unwrap();
        assert!(config.auth_configured());
    }
}
