//! AutoReply configuration loader.
//!
//! Config lives in `~/.autoreply/config.toml`. A missing or broken file
//! never prevents startup: the responder falls back to built-in
//! defaults and logs what happened.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub flood: FloodConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// Sender id allowed to issue admin commands. Empty disables the
    /// admin surface entirely.
    #[serde(default)]
    pub owner_id: String,
}

fn default_bot_name() -> String {
    "autoreply".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            owner_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_max_message_len() -> usize {
    1000
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Global action ceiling per sliding minute. Values above the hard
    /// cap (100) are clamped at limiter construction.
    #[serde(default = "default_max_actions_per_minute")]
    pub max_actions_per_minute: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_block_secs")]
    pub max_block_secs: u64,
}

fn default_max_actions_per_minute() -> u32 {
    50
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_block_secs() -> u64 {
    300
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_actions_per_minute: default_max_actions_per_minute(),
            backoff_multiplier: default_backoff_multiplier(),
            max_block_secs: default_max_block_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodConfig {
    #[serde(default = "default_flood_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_flood_max_per_window")]
    pub max_per_window: u32,
    #[serde(default = "default_flood_mute_secs")]
    pub mute_secs: u64,
    #[serde(default = "default_flood_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_flood_window_secs() -> u64 {
    60
}

fn default_flood_max_per_window() -> u32 {
    7
}

fn default_flood_mute_secs() -> u64 {
    60
}

fn default_flood_sweep_interval_secs() -> u64 {
    300
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            window_secs: default_flood_window_secs(),
            max_per_window: default_flood_max_per_window(),
            mute_secs: default_flood_mute_secs(),
            sweep_interval_secs: default_flood_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_typing_min_ms")]
    pub typing_min_ms: u64,
    #[serde(default = "default_typing_max_ms")]
    pub typing_max_ms: u64,
    #[serde(default = "default_cooldown_min_ms")]
    pub cooldown_min_ms: u64,
    #[serde(default = "default_cooldown_max_ms")]
    pub cooldown_max_ms: u64,
    #[serde(default = "default_reaction_chance")]
    pub reaction_chance: f64,
}

fn default_typing_min_ms() -> u64 {
    800
}

fn default_typing_max_ms() -> u64 {
    4000
}

fn default_cooldown_min_ms() -> u64 {
    500
}

fn default_cooldown_max_ms() -> u64 {
    2000
}

fn default_reaction_chance() -> f64 {
    0.3
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            typing_min_ms: default_typing_min_ms(),
            typing_max_ms: default_typing_max_ms(),
            cooldown_min_ms: default_cooldown_min_ms(),
            cooldown_max_ms: default_cooldown_max_ms(),
            reaction_chance: default_reaction_chance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_enabled() -> bool {
    true
}

fn default_server_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            port: default_server_port(),
        }
    }
}

impl AppConfig {
    /// Load config, falling back to defaults on any read, parse or
    /// validation failure.
    pub async fn load_or_default(path: Option<PathBuf>) -> Self {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "config parse failed; using defaults");
                    AppConfig::default()
                }
            },
            Err(e) => {
                tracing::info!(path = %path.display(), error = %e, "config not readable; using defaults");
                AppConfig::default()
            }
        };

        cfg.apply_env_overrides();
        if let Err(e) = cfg.validate() {
            tracing::warn!(error = %e, "config invalid; using defaults");
            cfg = AppConfig::default();
        }
        cfg
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<String>("AUTOREPLY_OWNER_ID") {
            self.general.owner_id = v;
        }
        if let Some(v) = env_parse::<u16>("AUTOREPLY_PORT") {
            self.server.port = v;
        }
        if let Some(v) = env_parse::<u32>("MAX_ACTIONS_PER_MINUTE") {
            self.limits.max_actions_per_minute = v;
        }
        if let Some(v) = env_parse::<u64>("TYPING_MIN_DELAY") {
            self.pacing.typing_min_ms = v;
        }
        if let Some(v) = env_parse::<u64>("TYPING_MAX_DELAY") {
            self.pacing.typing_max_ms = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.limits.max_actions_per_minute == 0 {
            return Err(anyhow::anyhow!("limits.max_actions_per_minute must be > 0"));
        }
        if self.limits.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("limits.backoff_multiplier must be >= 1.0"));
        }
        if self.flood.max_per_window == 0 {
            return Err(anyhow::anyhow!("flood.max_per_window must be > 0"));
        }
        if self.pacing.typing_min_ms > self.pacing.typing_max_ms {
            return Err(anyhow::anyhow!(
                "pacing.typing_min_ms must not exceed pacing.typing_max_ms"
            ));
        }
        if self.pacing.cooldown_min_ms > self.pacing.cooldown_max_ms {
            return Err(anyhow::anyhow!(
                "pacing.cooldown_min_ms must not exceed pacing.cooldown_max_ms"
            ));
        }
        if !(0.0..=1.0).contains(&self.pacing.reaction_chance) {
            return Err(anyhow::anyhow!(
                "pacing.reaction_chance must be within [0, 1]"
            ));
        }
        if self.server.enabled && self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

pub fn default_config_path() -> PathBuf {
    home_dir().join(".autoreply").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    home_dir().join(".autoreply").join("data")
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.limits.max_actions_per_minute, 50);
        assert_eq!(cfg.limits.backoff_multiplier, 1.5);
        assert_eq!(cfg.limits.max_block_secs, 300);
        assert_eq!(cfg.flood.max_per_window, 7);
        assert_eq!(cfg.flood.mute_secs, 60);
        assert_eq!(cfg.pacing.typing_min_ms, 800);
        assert_eq!(cfg.pacing.typing_max_ms, 4000);
        assert_eq!(cfg.pacing.reaction_chance, 0.3);
        assert_eq!(cfg.behavior.max_message_len, 1000);
        assert_eq!(cfg.matcher.cache_ttl_secs, 300);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
[general]
owner_id = "owner-1"

[limits]
max_actions_per_minute = 10
"#,
        )
        .expect("parse");
        assert_eq!(cfg.general.owner_id, "owner-1");
        assert_eq!(cfg.limits.max_actions_per_minute, 10);
        assert_eq!(cfg.pacing.typing_max_ms, 4000);
    }

    #[test]
    fn validation_rejects_inverted_delay_ranges() {
        let mut cfg = AppConfig::default();
        cfg.pacing.typing_min_ms = 5000;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn unreadable_config_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("autoreply-missing-{}.toml", uuid::Uuid::new_v4()));
        let cfg = AppConfig::load_or_default(Some(path)).await;
        assert_eq!(cfg.limits.max_actions_per_minute, 50);
    }
}
