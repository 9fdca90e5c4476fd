// src/config/mod.rs
//! Monitor settings loaded from `settings.toml` / `settings.json`.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::credentials::Credential;
use crate::model::OwnerId;

pub const ENV_CONFIG_PATH: &str = "ARTWATCH_CONFIG_PATH";
pub const ENV_REFRESH_TOKEN_PREFIX: &str = "ARTWATCH_REFRESH_TOKEN_";
pub const ENV_ACCESS_TOKEN_PREFIX: &str = "ARTWATCH_ACCESS_TOKEN_";

fn default_check_interval() -> f64 {
    300.0
}
fn default_num_workers() -> usize {
    3
}
fn default_event_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub owner_ids: Vec<OwnerId>,
    /// Seconds between the end of one cycle and the start of the next.
    #[serde(default = "default_check_interval")]
    pub check_interval: f64,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default)]
    pub crash_on_exception: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub metrics_addr: Option<String>,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_secs: f64,
    /// Consecutive transient failures tolerated before a task is abandoned.
    pub transient_retry_limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5.0,
            transient_retry_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub seen_path: PathBuf,
    pub log_path: PathBuf,
    pub feed_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            seen_path: PathBuf::from("seen.json"),
            log_path: PathBuf::from("discoverylog.json"),
            feed_path: PathBuf::from("feed.xml"),
        }
    }
}

/// One credential slot. `"ENV"` means: read from `ARTWATCH_*_TOKEN_<slot>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app-api.pixiv.net".into(),
            auth_url: "https://oauth.secure.pixiv.net/auth/token".into(),
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: "PixivAndroidApp/5.0.234 (Android 11; Pixel 5)".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub desktop: bool,
    pub ntfy_topic: Option<String>,
    pub ntfy_server: String,
    /// Each hook is a command plus leading arguments; item fields are appended.
    pub hooks: Vec<Vec<String>>,
    pub email: Option<EmailConfig>,
    /// Deadline for one notifier call; a hung sink is abandoned after it.
    pub send_timeout_secs: u64,
    /// HTTP timeout of a single ntfy request.
    pub ntfy_timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            desktop: false,
            ntfy_topic: None,
            ntfy_server: "https://ntfy.sh".into(),
            hooks: Vec::new(),
            email: None,
            send_timeout_secs: 60,
            ntfy_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub from: String,
    pub to: String,
    pub login: String,
    pub password: String,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub directory: PathBuf,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            title: "artwatch feed".into(),
            link: "https://www.pixiv.net/".into(),
            description: "New works from followed artists".into(),
        }
    }
}

impl MonitorConfig {
    /// Parse (TOML or JSON, by extension) and validate a config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = Self::parse(&content, &ext)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Lookup order:
    /// 1) $ARTWATCH_CONFIG_PATH
    /// 2) settings.toml
    /// 3) settings.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from(&pb);
        }
        for candidate in ["settings.toml", "settings.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Err(anyhow!(
            "no configuration found (set {ENV_CONFIG_PATH} or create settings.toml / settings.json)"
        ))
    }

    fn parse(s: &str, ext: &str) -> Result<Self> {
        match ext {
            "toml" => Ok(toml::from_str(s)?),
            "json" => Ok(serde_json::from_str(s)?),
            _ => serde_json::from_str(s)
                .or_else(|_| toml::from_str(s))
                .map_err(|e| anyhow!("unsupported config format: {e}")),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner_ids.is_empty() {
            bail!("owner_ids must list at least one owner");
        }
        if let Some(bad) = self.owner_ids.iter().find(|&&id| id < 1) {
            bail!("owner id {bad} is invalid; ids start at 1");
        }
        if !self.check_interval.is_finite() || self.check_interval < 0.0 {
            bail!("check_interval must be a non-negative number of seconds");
        }
        if self.num_workers == 0 {
            bail!("num_workers must be at least 1");
        }
        if !self.retry.delay_secs.is_finite() || self.retry.delay_secs < 0.0 {
            bail!("retry.delay_secs must be a non-negative number of seconds");
        }
        if self.credentials.is_empty() {
            bail!("at least one credential slot is required");
        }
        if self.event_buffer == 0 {
            bail!("event_buffer must be at least 1");
        }
        if let Some(topic) = &self.notifications.ntfy_topic {
            if topic.trim().is_empty() {
                bail!("notifications.ntfy_topic must not be empty");
            }
        }
        if self.notifications.hooks.iter().any(|h| h.is_empty()) {
            bail!("notifications.hooks entries need at least a command");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry.delay_secs)
    }

    /// Credential slots with `"ENV"` placeholders resolved.
    pub fn resolve_credentials(&self) -> Result<Vec<Credential>> {
        self.credentials
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let refresh_token = resolve_env(&c.refresh_token, ENV_REFRESH_TOKEN_PREFIX, i)?;
                let access_token = match &c.access_token {
                    Some(t) => resolve_env(t, ENV_ACCESS_TOKEN_PREFIX, i)?,
                    None => String::new(),
                };
                if refresh_token.trim().is_empty() {
                    bail!("credential slot {i} has an empty refresh_token");
                }
                Ok(Credential {
                    access_token,
                    refresh_token,
                })
            })
            .collect()
    }
}

fn resolve_env(value: &str, prefix: &str, slot: usize) -> Result<String> {
    if value.trim().eq_ignore_ascii_case("env") {
        let var = format!("{prefix}{slot}");
        env::var(&var).map_err(|_| anyhow!("Missing {var} env var"))
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = r#"
owner_ids = [10, 20]
[[credentials]]
refresh_token = "r0"
"#;

    #[test]
    fn defaults_are_applied() {
        let cfg = MonitorConfig::parse(MINIMAL_TOML, "toml").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.check_interval, 300.0);
        assert_eq!(cfg.num_workers, 3);
        assert!(!cfg.crash_on_exception);
        assert_eq!(cfg.retry.delay_secs, 5.0);
        assert_eq!(cfg.storage.seen_path, PathBuf::from("seen.json"));
        assert_eq!(cfg.notifications.ntfy_server, "https://ntfy.sh");
    }

    #[test]
    fn rejects_empty_and_zero_owner_ids() {
        let empty = r#"{"owner_ids": [], "credentials": [{"refresh_token": "r"}]}"#;
        let cfg = MonitorConfig::parse(empty, "json").unwrap();
        assert!(cfg.validate().is_err());

        let zero = r#"{"owner_ids": [5, 0], "credentials": [{"refresh_token": "r"}]}"#;
        let cfg = MonitorConfig::parse(zero, "json").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("owner id 0"));
    }

    #[test]
    fn rejects_negative_interval_and_zero_workers() {
        let mut cfg = MonitorConfig::parse(MINIMAL_TOML, "toml").unwrap();
        cfg.check_interval = -1.0;
        assert!(cfg.validate().is_err());
        cfg.check_interval = 0.0;
        cfg.num_workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_extension_tries_json_then_toml() {
        let cfg = MonitorConfig::parse(MINIMAL_TOML, "conf").unwrap();
        assert_eq!(cfg.owner_ids, vec![10, 20]);
    }
}
