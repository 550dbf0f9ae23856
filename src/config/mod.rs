use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub epg: EpgConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// EPG source gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub health_timeout_secs: u64,
}

/// EPG window and paging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgConfig {
    /// Global paging bound backwards from today, in days
    pub days_past: u32,
    /// Global paging bound forwards from today, in days
    pub days_ahead: u32,
    /// Whole local days added per paging step
    pub page_days: u32,
    /// Slack allowed when deciding whether a window already covers a range
    pub coverage_tolerance_ms: i64,
    /// Clock delta below which a TIME_SET broadcast is treated as routine
    /// NTP drift rather than a manual clock change
    pub clock_skew_tolerance_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub seek_increment_ms: i64,
    /// Floor applied to archive durations when building catch-up requests
    pub min_archive_duration_secs: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            connect_timeout_secs: 180,
            read_timeout_secs: 180,
            health_timeout_secs: 5,
        }
    }
}

impl Default for EpgConfig {
    fn default() -> Self {
        Self {
            days_past: 7,
            days_ahead: 7,
            page_days: 2,
            coverage_tolerance_ms: 60_000,
            clock_skew_tolerance_secs: 5,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            seek_increment_ms: 10_000,
            min_archive_duration_secs: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("EPG_DVR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}
