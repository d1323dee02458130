use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";
const DEFAULT_APPLICATION_NAME: &str = "ftpvault";
const DEFAULT_FTP_PORT: u16 = 21;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_PASS_BACKOFF_MS: u64 = 1_000;
const DEFAULT_PASS_BACKOFF_MAX_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_application_name")]
    pub application_name: String,
    pub download_path: PathBuf,
    pub root_folder: String,
    #[serde(default = "default_true")]
    pub skip_dot_files: bool,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_transfers: usize,
    #[serde(default)]
    pub max_passes: Option<u32>,
    #[serde(default = "default_pass_backoff_ms")]
    pub pass_backoff_ms: u64,
    #[serde(default = "default_pass_backoff_max_ms")]
    pub pass_backoff_max_ms: u64,
    pub ftp_sources: Vec<FtpSourceSettings>,
    #[serde(default)]
    pub disk: DiskSettings,
    #[serde(default)]
    pub slack: SlackSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSourceSettings {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskSettings {
    #[serde(default)]
    pub token_store_path: Option<PathBuf>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub oauth_base_url: Option<String>,
    #[serde(default)]
    pub web_base_url: Option<String>,
    /// Access token taken as-is; skips the token store.
    #[serde(skip)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackSettings {
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Send per-file progress messages, not just completions and lifecycle events.
    #[serde(default)]
    pub log_progress: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Loads the file named by `FTPVAULT_SETTINGS` (or `appsettings.json`) and
    /// applies environment overrides.
    pub fn from_env() -> Result<Self, SettingsError> {
        let path = std::env::var("FTPVAULT_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE));
        let mut settings = Self::load(&path)?;
        settings.apply_overrides(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("FTPVAULT_DOWNLOAD_DIR").filter(|v| !v.trim().is_empty()) {
            self.download_path = PathBuf::from(dir);
        }
        if let Some(token) = lookup("FTPVAULT_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.disk.access_token = Some(token);
        }
        if let Some(client_id) = lookup("FTPVAULT_CLIENT_ID") {
            self.disk.client_id = Some(client_id);
        }
        if let Some(client_secret) = lookup("FTPVAULT_CLIENT_SECRET") {
            self.disk.client_secret = Some(client_secret);
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.download_path.as_os_str().is_empty() {
            return Err(SettingsError::Invalid("downloadPath is empty".into()));
        }
        if self.root_folder.trim().is_empty() || self.root_folder.contains('/') {
            return Err(SettingsError::Invalid(
                "rootFolder must be a single folder name".into(),
            ));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(SettingsError::Invalid(
                "maxConcurrentTransfers must be positive".into(),
            ));
        }
        if self.ftp_sources.is_empty() {
            return Err(SettingsError::Invalid("no ftpSources configured".into()));
        }
        if let Some(source) = self.ftp_sources.iter().find(|s| s.folders.is_empty()) {
            return Err(SettingsError::Invalid(format!(
                "ftp source {} has no folders",
                source.host
            )));
        }
        Ok(())
    }

    /// Where OAuth state is kept between runs.
    pub fn token_store_dir(&self) -> PathBuf {
        self.disk.token_store_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_APPLICATION_NAME)
        })
    }
}

fn default_application_name() -> String {
    DEFAULT_APPLICATION_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_pass_backoff_ms() -> u64 {
    DEFAULT_PASS_BACKOFF_MS
}

fn default_pass_backoff_max_ms() -> u64 {
    DEFAULT_PASS_BACKOFF_MAX_MS
}

fn default_ftp_port() -> u16 {
    DEFAULT_FTP_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"{
        "downloadPath": "/var/lib/ftpvault/downloads",
        "rootFolder": "CameraArchive",
        "ftpSources": [
            { "host": "cam1.local", "folders": ["/DCIM"] },
            { "host": "cam2.local", "port": 2121, "user": "u", "password": "p", "folders": ["/a", "/b"] }
        ],
        "slack": { "webhookUrl": "https://hooks.example/T0" }
    }"#;

    #[test]
    fn parses_sample_with_defaults() {
        let settings = Settings::parse(SAMPLE).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.application_name, "ftpvault");
        assert_eq!(settings.root_folder, "CameraArchive");
        assert!(settings.skip_dot_files);
        assert_eq!(settings.max_concurrent_transfers, 4);
        assert_eq!(settings.max_passes, None);
        assert_eq!(settings.ftp_sources[0].port, 21);
        assert_eq!(settings.ftp_sources[1].port, 2121);
        assert_eq!(settings.ftp_sources[1].folders.len(), 2);
        assert!(!settings.slack.log_progress);
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn environment_overrides_take_precedence() {
        let mut settings = Settings::parse(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("FTPVAULT_DOWNLOAD_DIR", "/tmp/dl"),
            ("FTPVAULT_TOKEN", "tok"),
        ]);
        settings.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.download_path, PathBuf::from("/tmp/dl"));
        assert_eq!(settings.disk.access_token.as_deref(), Some("tok"));
        assert_eq!(settings.disk.client_id, None);
    }

    #[test]
    fn rejects_source_without_folders() {
        let settings = Settings::parse(
            r#"{
                "downloadPath": "/tmp",
                "rootFolder": "A",
                "ftpSources": [{ "host": "h", "folders": [] }]
            }"#,
        )
        .unwrap();

        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn rejects_nested_root_folder() {
        let mut settings = Settings::parse(SAMPLE).unwrap();
        settings.root_folder = "a/b".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn token_store_dir_prefers_configured_path() {
        let mut settings = Settings::parse(SAMPLE).unwrap();
        settings.disk.token_store_path = Some(PathBuf::from("/etc/ftpvault/token"));
        assert_eq!(
            settings.token_store_dir(),
            PathBuf::from("/etc/ftpvault/token")
        );
    }
}
