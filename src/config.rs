use dirs::config_dir;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RadarError, Result};

/// Environment variable that overrides `wecom_webhook`.
pub const WEBHOOK_ENV: &str = "WECOM_WEBHOOK";

/// Marker left in the example config until a real robot key is filled in.
const WEBHOOK_PLACEHOLDER: &str = "YOUR_KEY_HERE";

const DEFAULT_CHECK_INTERVAL_HOURS: u32 = 6;
const DEFAULT_MAX_ITEMS_PER_PUSH: usize = 10;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_DIGEST_TITLE: &str = "AI News Digest";
const DEFAULT_STATE_FILE: &str = "data/news_history.json";

/// Shape of config.toml on disk
///
/// Example:
/// wecom_webhook = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=YOUR_KEY_HERE"
/// keywords = ["AI", "GPT", "LLM"]
///
/// [push_settings]
/// check_interval_hours = 6
/// max_items_per_push = 10
///
/// [[news_sources]]
/// name = "Hacker News"
/// url = "https://hnrss.org/frontpage"
/// type = "rss"
/// enabled = true
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub wecom_webhook: Option<String>,
    #[serde(default)]
    pub news_sources: Vec<SourceConfig>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub push_settings: Option<RawPushSettings>,
    pub digest_title: Option<String>,
    pub state_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawPushSettings {
    pub check_interval_hours: Option<u32>,
    pub max_items_per_push: Option<usize>,
    pub history_retention_days: Option<u32>,
}

/// One feed definition
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default = "default_source_kind")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_source_kind() -> String {
    "rss".to_string()
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn is_rss(&self) -> bool {
        self.kind.eq_ignore_ascii_case("rss")
    }
}

/// Resolved config used by the app
#[derive(Debug, Clone)]
pub struct Config {
    /// Webhook after the environment override; validated by [`Config::webhook`].
    pub webhook_url: Option<String>,
    pub sources: Vec<SourceConfig>,
    pub keywords: Vec<String>,
    pub check_interval_hours: u32,
    pub max_items_per_push: usize,
    pub history_retention_days: u32,
    pub digest_title: String,
    pub state_path: PathBuf,
}

impl Config {
    /// The webhook to deliver to, rejecting unset and placeholder values.
    pub fn webhook(&self) -> Result<&str> {
        let url = self
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                RadarError::Config(format!(
                    "webhook not configured; set `wecom_webhook` in the config file or the {} environment variable",
                    WEBHOOK_ENV
                ))
            })?;

        if url.contains(WEBHOOK_PLACEHOLDER) {
            return Err(RadarError::Config(format!(
                "webhook still contains the placeholder {}",
                WEBHOOK_PLACEHOLDER
            )));
        }

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| RadarError::Config(format!("invalid webhook URL: {}", e)))?;
        match parsed.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(RadarError::Config(format!(
                "unsupported webhook URL scheme: {}",
                scheme
            ))),
        }
    }
}

/// Pick the config file: an explicit path wins, then ./config.toml,
/// then ~/.config/ai-news-radar/config.toml.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from("config.toml");
    if local.exists() {
        return local;
    }

    config_dir()
        .map(|dir| dir.join("ai-news-radar").join("config.toml"))
        .unwrap_or(local)
}

/// Load config from `path`. A missing file is an error: without sources and
/// a webhook there is nothing to do.
///
/// `env_webhook` is the value of [`WEBHOOK_ENV`], if set.
pub fn load_config(path: &Path, env_webhook: Option<String>) -> Result<Config> {
    if !path.exists() {
        return Err(RadarError::Config(format!(
            "config file not found: {} (copy config.example.toml and fill it in)",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path)?;
    let raw: RawConfig = toml::from_str(&contents).map_err(|e| {
        RadarError::Config(format!("failed to parse {}: {}", path.display(), e))
    })?;

    resolve(raw, env_webhook)
}

/// Apply defaults and the webhook override to a parsed file.
pub fn resolve(raw: RawConfig, env_webhook: Option<String>) -> Result<Config> {
    let push = raw.push_settings.unwrap_or_default();

    let check_interval_hours = push
        .check_interval_hours
        .unwrap_or(DEFAULT_CHECK_INTERVAL_HOURS);
    let max_items_per_push = push
        .max_items_per_push
        .unwrap_or(DEFAULT_MAX_ITEMS_PER_PUSH);
    let history_retention_days = push
        .history_retention_days
        .unwrap_or(DEFAULT_RETENTION_DAYS);

    if check_interval_hours == 0 {
        return Err(RadarError::Config(
            "push_settings.check_interval_hours must be at least 1".to_string(),
        ));
    }
    if max_items_per_push == 0 {
        return Err(RadarError::Config(
            "push_settings.max_items_per_push must be at least 1".to_string(),
        ));
    }
    if history_retention_days == 0 {
        return Err(RadarError::Config(
            "push_settings.history_retention_days must be at least 1".to_string(),
        ));
    }

    let webhook_url = env_webhook
        .filter(|v| !v.trim().is_empty())
        .or(raw.wecom_webhook);

    let state_path = raw
        .state_file
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

    Ok(Config {
        webhook_url,
        sources: raw.news_sources,
        keywords: raw.keywords,
        check_interval_hours,
        max_items_per_push,
        history_retention_days,
        digest_title: raw
            .digest_title
            .unwrap_or_else(|| DEFAULT_DIGEST_TITLE.to_string()),
        state_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(toml_text: &str) -> RawConfig {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let cfg = resolve(parse(r#"wecom_webhook = "https://example.com/hook""#), None).unwrap();
        assert_eq!(cfg.check_interval_hours, 6);
        assert_eq!(cfg.max_items_per_push, 10);
        assert_eq!(cfg.history_retention_days, 30);
        assert_eq!(cfg.digest_title, "AI News Digest");
        assert_eq!(cfg.state_path, PathBuf::from("data/news_history.json"));
        assert!(cfg.sources.is_empty());
        assert!(cfg.keywords.is_empty());
    }

    #[test]
    fn sources_default_to_enabled_rss() {
        let raw = parse(
            r#"
            keywords = ["AI", "gpt"]

            [push_settings]
            check_interval_hours = 24
            max_items_per_push = 5

            [[news_sources]]
            name = "One"
            url = "https://one.example/feed"

            [[news_sources]]
            name = "Two"
            url = "https://two.example/feed"
            type = "atom"
            enabled = false
            "#,
        );
        let cfg = resolve(raw, None).unwrap();

        assert_eq!(cfg.check_interval_hours, 24);
        assert_eq!(cfg.max_items_per_push, 5);
        assert_eq!(cfg.keywords, vec!["AI", "gpt"]);
        assert!(cfg.sources[0].enabled);
        assert!(cfg.sources[0].is_rss());
        assert!(!cfg.sources[1].enabled);
        assert!(!cfg.sources[1].is_rss());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let raw = parse("[push_settings]\nmax_items_per_push = 0\n");
        assert!(matches!(resolve(raw, None), Err(RadarError::Config(_))));

        let raw = parse("[push_settings]\ncheck_interval_hours = 0\n");
        assert!(matches!(resolve(raw, None), Err(RadarError::Config(_))));
    }

    #[test]
    fn env_webhook_overrides_file() {
        let raw = parse(r#"wecom_webhook = "https://file.example/hook""#);
        let cfg = resolve(raw, Some("https://env.example/hook".to_string())).unwrap();
        assert_eq!(cfg.webhook().unwrap(), "https://env.example/hook");
    }

    #[test]
    fn blank_env_webhook_falls_back_to_file() {
        let raw = parse(r#"wecom_webhook = "https://file.example/hook""#);
        let cfg = resolve(raw, Some("  ".to_string())).unwrap();
        assert_eq!(cfg.webhook().unwrap(), "https://file.example/hook");
    }

    #[test]
    fn missing_webhook_is_config_error() {
        let cfg = resolve(parse(""), None).unwrap();
        assert!(matches!(cfg.webhook(), Err(RadarError::Config(_))));
    }

    #[test]
    fn placeholder_webhook_is_config_error() {
        let raw = parse(
            r#"wecom_webhook = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=YOUR_KEY_HERE""#,
        );
        let cfg = resolve(raw, None).unwrap();
        let err = cfg.webhook().unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn non_http_webhook_is_config_error() {
        let cfg = resolve(parse(r#"wecom_webhook = "ftp://example.com/hook""#), None).unwrap();
        assert!(cfg.webhook().is_err());

        let cfg = resolve(parse(r#"wecom_webhook = "not a url""#), None).unwrap();
        assert!(cfg.webhook().is_err());
    }

    #[test]
    fn load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("config.toml"), None).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn load_config_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "news_sources = 12 = 3").unwrap();
        let err = load_config(file.path(), None).unwrap_err();
        assert!(matches!(err, RadarError::Config(_)));
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
wecom_webhook = "https://example.com/hook"
state_file = "/tmp/radar/history.json"

[[news_sources]]
name = "Feed"
url = "https://feed.example/rss"
"#
        )
        .unwrap();

        let cfg = load_config(file.path(), None).unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.state_path, PathBuf::from("/tmp/radar/history.json"));
        assert_eq!(cfg.webhook().unwrap(), "https://example.com/hook");
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = Path::new("/etc/radar.toml");
        assert_eq!(config_path(Some(path)), PathBuf::from("/etc/radar.toml"));
    }
}
