//! Configuration loading and management
//!
//! Handles parsing of `.joblink.toml` configuration files. The backend
//! endpoint and key are not part of the file: they come from the
//! `JOBLINK_BACKEND_URL` and `JOBLINK_BACKEND_KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::view::PAGE_SIZES;

pub const CONFIG_FILE_NAME: &str = ".joblink.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP client settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Dashboard behaviour
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Role resolution
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Where auth emails (magic link, reset) send the user back to
    #[serde(default)]
    pub redirect_url: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            redirect_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    /// Log rows fetched per refresh
    #[serde(default = "default_log_fetch_limit")]
    pub log_fetch_limit: usize,

    /// Activity feed length
    #[serde(default = "default_feed_cap")]
    pub feed_cap: usize,

    /// Default page size for `tasks`
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Change-feed poll interval for `watch`
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
}

fn default_log_fetch_limit() -> usize {
    crate::activity::DEFAULT_LOG_FETCH_LIMIT
}

fn default_feed_cap() -> usize {
    crate::overlay::DEFAULT_FEED_CAP
}

fn default_page_size() -> usize {
    PAGE_SIZES[0]
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_search_debounce_ms() -> u64 {
    200
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            log_fetch_limit: default_log_fetch_limit(),
            feed_cap: default_feed_cap(),
            page_size: default_page_size(),
            poll_interval_secs: default_poll_interval_secs(),
            search_debounce_ms: default_search_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RolesConfig {
    /// Emails treated as admin when the role table has no answer
    #[serde(default)]
    pub fallback_admins: Vec<String>,
}

impl RolesConfig {
    pub fn is_fallback_admin(&self, email: &str) -> bool {
        let email = email.trim();
        self.fallback_admins
            .iter()
            .any(|admin| admin.trim().eq_ignore_ascii_case(email))
    }
}

impl Config {
    /// Load configuration from a `.joblink.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.joblink.toml` from `dir`, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// An explicit path must load; otherwise fall back to the working directory.
    pub fn resolve(explicit: Option<&PathBuf>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let cwd = std::env::current_dir()?;
                Ok(Self::load_from_dir(&cwd))
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.dashboard.validate()?;
        Ok(())
    }
}

impl BackendConfig {
    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "backend.timeout_secs must be > 0".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "backend.connect_timeout_secs must be > 0".to_string(),
            ));
        }
        if let Some(url) = self.redirect_url.as_deref() {
            reqwest::Url::parse(url).map_err(|err| {
                Error::InvalidConfig(format!("backend.redirect_url is not a URL: {err}"))
            })?;
        }
        Ok(())
    }
}

impl DashboardConfig {
    fn validate(&self) -> Result<()> {
        if self.log_fetch_limit == 0 || self.log_fetch_limit > 1000 {
            return Err(Error::InvalidConfig(
                "dashboard.log_fetch_limit must be between 1 and 1000".to_string(),
            ));
        }
        if self.feed_cap == 0 {
            return Err(Error::InvalidConfig(
                "dashboard.feed_cap must be >= 1".to_string(),
            ));
        }
        if !PAGE_SIZES.contains(&self.page_size) {
            return Err(Error::InvalidConfig(format!(
                "dashboard.page_size must be one of {PAGE_SIZES:?}"
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "dashboard.poll_interval_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_reads_every_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        let content = r#"
[backend]
timeout_secs = 12
redirect_url = "https://jobs.example.com/"

[dashboard]
log_fetch_limit = 100
feed_cap = 20
page_size = 20
poll_interval_secs = 2

[roles]
fallback_admins = ["lead@example.com"]
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.backend.timeout_secs, 12);
        assert_eq!(cfg.backend.connect_timeout_secs, 10);
        assert_eq!(cfg.dashboard.log_fetch_limit, 100);
        assert_eq!(cfg.dashboard.feed_cap, 20);
        assert_eq!(cfg.dashboard.page_size, 20);
        assert_eq!(cfg.dashboard.search_debounce_ms, 200);
        assert!(cfg.roles.is_fallback_admin("LEAD@example.com"));
    }

    #[test]
    fn invalid_page_size_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[dashboard]\npage_size = 7").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("log_fetch_limit = 50"));
        assert_eq!(Config::load(&path).expect("reload"), Config::default());
    }
}
