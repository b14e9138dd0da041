use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::feeder::bucket::ChunkPolicy;
use crate::feeder::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub max_date_range_days: u64,
    pub chunk_message_threshold: usize,
    pub chunk_date_range_days: u64,
    pub conversation_delay_ms: u64,
    pub page_delay_ms: u64,
    pub page_size: u32,
    /// Stop paging after this many pages; 0 means no limit.
    pub max_pages: u32,
    pub include_threads: bool,
    pub display_timezone: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_date_range_days: 365,
            chunk_message_threshold: 10_000,
            chunk_date_range_days: 30,
            conversation_delay_ms: 1_000,
            page_delay_ms: 1_200,
            page_size: 200,
            max_pages: 0,
            include_threads: true,
            display_timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub rate_limit_interval: usize,
    pub rate_limit_delay_ms: u64,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            rate_limit_interval: 10,
            rate_limit_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeederConfig {
    pub export: ExportConfig,
    pub retry: RetryConfig,
    pub sharing: SharingConfig,
}

impl FeederConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        ChunkPolicy {
            message_threshold: self.export.chunk_message_threshold,
            date_range_days: self.export.chunk_date_range_days,
        }
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.export
            .display_timezone
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid display timezone `{}`: {err}", self.export.display_timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialFeederConfig {
    export: Option<ExportConfig>,
    retry: Option<RetryConfig>,
    sharing: Option<SharingConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &FeederConfig) -> Result<()> {
    if cfg.export.max_date_range_days == 0 {
        return Err(anyhow!("invalid max date range: must be >= 1 day"));
    }
    if cfg.export.chunk_date_range_days == 0 {
        return Err(anyhow!("invalid chunk date range: must be >= 1 day"));
    }
    if cfg.export.chunk_message_threshold == 0 {
        return Err(anyhow!("invalid chunk message threshold: must be >= 1"));
    }
    if !(1..=1000).contains(&cfg.export.page_size) {
        return Err(anyhow!("invalid page size: require 1..=1000"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(anyhow!("invalid retry attempts: must be >= 1"));
    }
    if cfg.sharing.rate_limit_interval == 0 {
        return Err(anyhow!("invalid sharing rate limit interval: must be >= 1"));
    }
    cfg.timezone()?;
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("FEEDER_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    Some(dirs::config_dir()?.join("slack-feeder").join("feeder.toml"))
}

fn merge_file_config(base: &mut FeederConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialFeederConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse feeder config {}: {err}", path.display()))?;
    if let Some(export) = parsed.export {
        base.export = export;
    }
    if let Some(retry) = parsed.retry {
        base.retry = retry;
    }
    if let Some(sharing) = parsed.sharing {
        base.sharing = sharing;
    }
    Ok(())
}

pub fn load_config() -> Result<FeederConfig> {
    let mut cfg = FeederConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.export.max_date_range_days =
        env_or_u64("FEEDER_MAX_DATE_RANGE_DAYS", cfg.export.max_date_range_days);
    cfg.export.chunk_message_threshold = env_or_usize(
        "FEEDER_CHUNK_MESSAGE_THRESHOLD",
        cfg.export.chunk_message_threshold,
    );
    cfg.export.chunk_date_range_days =
        env_or_u64("FEEDER_CHUNK_DATE_RANGE_DAYS", cfg.export.chunk_date_range_days);
    cfg.export.conversation_delay_ms =
        env_or_u64("FEEDER_CONVERSATION_DELAY_MS", cfg.export.conversation_delay_ms);
    cfg.export.page_delay_ms = env_or_u64("FEEDER_PAGE_DELAY_MS", cfg.export.page_delay_ms);
    cfg.export.page_size = env_or_u32("FEEDER_PAGE_SIZE", cfg.export.page_size);
    cfg.export.max_pages = env_or_u32("FEEDER_MAX_PAGES", cfg.export.max_pages);
    cfg.export.include_threads =
        env_or_bool("FEEDER_INCLUDE_THREADS", cfg.export.include_threads);
    cfg.export.display_timezone =
        env_or_string("FEEDER_DISPLAY_TIMEZONE", &cfg.export.display_timezone);
    cfg.retry.max_attempts = env_or_u32("FEEDER_RETRY_MAX_ATTEMPTS", cfg.retry.max_attempts);
    cfg.retry.base_delay_ms = env_or_u64("FEEDER_RETRY_BASE_DELAY_MS", cfg.retry.base_delay_ms);
    cfg.sharing.rate_limit_interval = env_or_usize(
        "FEEDER_SHARE_RATE_LIMIT_INTERVAL",
        cfg.sharing.rate_limit_interval,
    );
    cfg.sharing.rate_limit_delay_ms = env_or_u64(
        "FEEDER_SHARE_RATE_LIMIT_DELAY_MS",
        cfg.sharing.rate_limit_delay_ms,
    );

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = FeederConfig::default();
        assert_eq!(cfg.export.max_date_range_days, 365);
        assert_eq!(cfg.export.chunk_message_threshold, 10_000);
        assert_eq!(cfg.export.chunk_date_range_days, 30);
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.sharing.rate_limit_interval, 10);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn partial_sections_fill_missing_fields_with_defaults() {
        let parsed: PartialFeederConfig = toml::from_str(
            "[export]\nmax_date_range_days = 90\ndisplay_timezone = \"Europe/Berlin\"\n",
        )
        .expect("parse");
        let export = parsed.export.expect("export section");
        assert_eq!(export.max_date_range_days, 90);
        assert_eq!(export.page_size, 200);
        assert!(parsed.retry.is_none());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut cfg = FeederConfig::default();
        cfg.export.display_timezone = "Mars/Olympus".into();
        assert!(validate(&cfg).is_err());
        cfg.export.display_timezone = "America/New_York".into();
        assert!(validate(&cfg).is_ok());
    }
}
