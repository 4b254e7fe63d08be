use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file consulted when `--config` is not given.  A missing file is not
/// an error; every value can come from the environment instead.
pub const DEFAULT_CONFIG_PATH: &str = "config/onoffpc.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token.  Overridden by `BOT_TOKEN`.
    pub bot_token: String,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            poll_timeout_secs: 25,
        }
    }
}

/// The machine being powered on and off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub mac_address: String,
    /// Address pinged for the status line.  Also the Wake-on-LAN destination
    /// when `broadcast_address` is unset.
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_address: Option<String>,
    pub ping_count: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            mac_address: String::new(),
            ip_address: String::new(),
            broadcast_address: None,
            ping_count: 1,
        }
    }
}

/// TCP control link to the agent running on the PC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 65432,
            reconnect_delay_secs: 2,
            connect_timeout_secs: 2,
            read_timeout_secs: 5,
        }
    }
}

impl LinkConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub poll_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
        }
    }
}

impl StatusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccessConfig {
    /// Telegram user ids allowed to use the bot.  Empty means nobody.
    pub allowed_users: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub host: HostConfig,
    pub link: LinkConfig,
    pub status: StatusConfig,
    pub access: AccessConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Reads the TOML file at `path` (if present) and applies environment
    /// overrides.  Does not validate; call [`AppConfig::validate`] before use.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_with(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from `lookup`.  Unset and empty variables leave the
    /// current value alone.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(value) = get("BOT_TOKEN") {
            self.telegram.bot_token = value;
        }
        if let Some(value) = get("PC_MAC_ADDRESS") {
            self.host.mac_address = value;
        }
        if let Some(value) = get("PC_IP_ADDRESS") {
            self.host.ip_address = value;
        }
        if let Some(value) = get("BROADCAST_ADDRESS") {
            self.host.broadcast_address = Some(value);
        }
        if let Some(value) = get("PING_COUNT") {
            self.host.ping_count = parse_number("PING_COUNT", &value)?;
        }
        if let Some(value) = get("TCP_SERVER_IP") {
            self.link.host = value;
        }
        if let Some(value) = get("TCP_SERVER_PORT") {
            self.link.port = parse_number("TCP_SERVER_PORT", &value)?;
        }
        if let Some(value) = get("ALLOWED_USERS") {
            self.access.allowed_users = parse_user_list(&value)?;
        }
        if let Some(value) = get("LOG_LEVEL") {
            self.telemetry.log_level = value;
        }
        Ok(())
    }

    /// Fails on the first class of problem found: all missing required
    /// values are reported together, then out-of-range numbers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.telegram.bot_token.trim().is_empty() {
            missing.push("BOT_TOKEN");
        }
        if self.host.mac_address.trim().is_empty() {
            missing.push("PC_MAC_ADDRESS");
        }
        if self.host.ip_address.trim().is_empty() {
            missing.push("PC_IP_ADDRESS");
        }
        if self.link.host.trim().is_empty() {
            missing.push("TCP_SERVER_IP");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let positive = [
            ("TCP_SERVER_PORT", u64::from(self.link.port)),
            ("PING_COUNT", u64::from(self.host.ping_count)),
            ("link.reconnect_delay_secs", self.link.reconnect_delay_secs),
            ("link.connect_timeout_secs", self.link.connect_timeout_secs),
            ("link.read_timeout_secs", self.link.read_timeout_secs),
            ("status.poll_interval_secs", self.status.poll_interval_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Destination for the magic packet.
    pub fn wake_target(&self) -> &str {
        self.host
            .broadcast_address
            .as_deref()
            .unwrap_or(&self.host.ip_address)
    }

    /// Copy safe to print: the bot token is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.telegram.bot_token.is_empty() {
            copy.telegram.bot_token = "<redacted>".to_string();
        }
        copy
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|err| ConfigError::Invalid {
        key,
        reason: format!("{raw:?}: {err}"),
    })
}

fn parse_user_list(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_number("ALLOWED_USERS", part))
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("BOT_TOKEN", "123:abc"),
            ("PC_MAC_ADDRESS", "AA:BB:CC:DD:EE:FF"),
            ("PC_IP_ADDRESS", "192.168.1.20"),
            ("TCP_SERVER_IP", "192.168.1.20"),
        ]
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.link.port, 65432);
        assert_eq!(cfg.link.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(cfg.link.connect_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.link.read_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.status.poll_interval(), Duration::from_secs(3));
        assert_eq!(cfg.host.ping_count, 1);
        assert_eq!(cfg.telegram.poll_timeout_secs, 25);
        assert_eq!(cfg.telemetry.log_level, "info");
        assert!(cfg.access.allowed_users.is_empty());
    }

    #[test]
    fn empty_config_reports_every_missing_value() {
        let err = AppConfig::default().validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![
                "BOT_TOKEN",
                "PC_MAC_ADDRESS",
                "PC_IP_ADDRESS",
                "TCP_SERVER_IP"
            ])
        );
        assert!(err.to_string().contains("BOT_TOKEN, PC_MAC_ADDRESS"));
    }

    #[test]
    fn env_fills_required_values() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_with(env_from(&complete_env())).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.telegram.bot_token, "123:abc");
        assert_eq!(cfg.link.host, "192.168.1.20");
        assert_eq!(cfg.link.port, 65432);
    }

    #[test]
    fn env_parses_numbers_and_user_list() {
        let mut pairs = complete_env();
        pairs.push(("TCP_SERVER_PORT", "7000"));
        pairs.push(("PING_COUNT", "3"));
        pairs.push(("ALLOWED_USERS", "42, 1001,,"));
        let mut cfg = AppConfig::default();
        cfg.apply_env_with(env_from(&pairs)).unwrap();
        assert_eq!(cfg.link.port, 7000);
        assert_eq!(cfg.host.ping_count, 3);
        assert_eq!(cfg.access.allowed_users, vec![42, 1001]);
    }

    #[test]
    fn env_rejects_bad_numbers() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_env_with(env_from(&[("TCP_SERVER_PORT", "seventy")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TCP_SERVER_PORT", .. }));

        let err = cfg
            .apply_env_with(env_from(&[("ALLOWED_USERS", "42,bob")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ALLOWED_USERS", .. }));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = AppConfig::default();
        cfg.link.host = "from-file".to_string();
        cfg.apply_env_with(env_from(&[("TCP_SERVER_IP", "  ")])).unwrap();
        assert_eq!(cfg.link.host, "from-file");
    }

    #[test]
    fn zero_intervals_are_invalid() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_with(env_from(&complete_env())).unwrap();
        cfg.link.read_timeout_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "link.read_timeout_secs", .. }));
    }

    #[test]
    fn wake_target_prefers_broadcast_address() {
        let mut cfg = AppConfig::default();
        cfg.host.ip_address = "192.168.1.20".to_string();
        assert_eq!(cfg.wake_target(), "192.168.1.20");
        cfg.host.broadcast_address = Some("192.168.1.255".to_string());
        assert_eq!(cfg.wake_target(), "192.168.1.255");
    }

    #[test]
    fn redacted_masks_token_only() {
        let mut cfg = AppConfig::default();
        cfg.telegram.bot_token = "secret".to_string();
        cfg.link.host = "pc.lan".to_string();
        let shown = cfg.redacted().to_toml_string().unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("<redacted>"));
        assert!(shown.contains("pc.lan"));
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("onoffpc.toml");
        fs::write(
            &path,
            r#"
[link]
host = "10.0.0.5"
read_timeout_secs = 9

[access]
allowed_users = [7, 8]
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.link.read_timeout_secs, 9);
        assert_eq!(cfg.link.reconnect_delay_secs, 2);
        assert_eq!(cfg.status.poll_interval_secs, 3);
        assert_eq!(cfg.telegram.poll_timeout_secs, 25);
        // Overridable from the environment, so only checked when unset there.
        if std::env::var("TCP_SERVER_IP").is_err() {
            assert_eq!(cfg.link.host, "10.0.0.5");
        }
        if std::env::var("ALLOWED_USERS").is_err() {
            assert_eq!(cfg.access.allowed_users, vec![7, 8]);
        }
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg: AppConfig = toml::from_str(
            r#"
[link]
host = "from-file"
port = 1234
"#,
        )
        .unwrap();
        cfg.apply_env_with(env_from(&[("TCP_SERVER_IP", "from-env")]))
            .unwrap();
        assert_eq!(cfg.link.host, "from-env");
        assert_eq!(cfg.link.port, 1234);
    }

    #[test]
    fn load_from_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.link.read_timeout_secs, 5);
        assert_eq!(cfg.status.poll_interval_secs, 3);
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
