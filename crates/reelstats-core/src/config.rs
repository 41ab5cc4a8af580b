use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::IdentityKey;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "REELSTATS_DIR";

const HOUR_MS: i64 = 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub comb: CombConfig,
    #[serde(default)]
    pub prune: PruneConfig,
    #[serde(default)]
    pub top_today: TopTodayConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

/// Retention downsampling ("comb mode") preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Identity keys whose history is never thinned.
    #[serde(default)]
    pub exceptions: Vec<IdentityKey>,
    #[serde(default = "default_comb_interval_hours")]
    pub interval_hours: u32,
    #[serde(default = "default_comb_recent_days")]
    pub recent_days: u32,
    #[serde(default = "default_comb_min_gap_minutes")]
    pub min_gap_minutes: u32,
}

impl Default for CombConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            exceptions: Vec::new(),
            interval_hours: default_comb_interval_hours(),
            recent_days: default_comb_recent_days(),
            min_gap_minutes: default_comb_min_gap_minutes(),
        }
    }
}

impl CombConfig {
    #[must_use]
    pub fn interval_ms(&self) -> i64 {
        i64::from(self.interval_hours) * HOUR_MS
    }

    #[must_use]
    pub fn recent_window_ms(&self) -> i64 {
        i64::from(self.recent_days) * DAY_MS
    }

    #[must_use]
    pub fn min_gap_ms(&self) -> i64 {
        i64::from(self.min_gap_minutes) * MINUTE_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Minimum age before a post without metrics may be removed.
    #[serde(default = "default_grace_hours")]
    pub grace_hours: u32,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            grace_hours: default_grace_hours(),
        }
    }
}

impl PruneConfig {
    #[must_use]
    pub fn grace_ms(&self) -> i64 {
        i64::from(self.grace_hours) * HOUR_MS
    }
}

/// Thresholds for the virtual top-today bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopTodayConfig {
    #[serde(default = "default_top_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_min_unique_views")]
    pub min_unique_views: u64,
    #[serde(default = "default_min_likes")]
    pub min_likes: u64,
}

impl Default for TopTodayConfig {
    fn default() -> Self {
        Self {
            window_hours: default_top_window_hours(),
            min_unique_views: default_min_unique_views(),
            min_likes: default_min_likes(),
        }
    }
}

impl TopTodayConfig {
    #[must_use]
    pub fn window_ms(&self) -> i64 {
        i64::from(self.window_hours) * HOUR_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Consecutive skipped refreshes before one is forced.
    #[serde(default = "default_max_skip_streak")]
    pub max_skip_streak: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_skip_streak: default_max_skip_streak(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_purge_stale_after_minutes")]
    pub purge_stale_after_minutes: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            purge_stale_after_minutes: default_purge_stale_after_minutes(),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub fn purge_stale_after(&self) -> Duration {
        Duration::from_secs(u64::from(self.purge_stale_after_minutes) * 60)
    }
}

/// Load `config.toml` from the data directory, or defaults if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(data_dir: &Path) -> Result<StoreConfig> {
    let path = data_dir.join("config.toml");
    if !path.exists() {
        return Ok(StoreConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<StoreConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve the data directory: explicit flag, then `REELSTATS_DIR`, then the
/// platform data directory.
///
/// # Errors
///
/// Returns an error if no candidate is available.
pub fn resolve_data_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("reelstats"))
        .context("no data directory available; pass --data-dir or set REELSTATS_DIR")
}

const fn default_true() -> bool {
    true
}

const fn default_comb_interval_hours() -> u32 {
    24
}

const fn default_comb_recent_days() -> u32 {
    7
}

const fn default_comb_min_gap_minutes() -> u32 {
    60
}

const fn default_grace_hours() -> u32 {
    24
}

const fn default_top_window_hours() -> u32 {
    24
}

const fn default_min_unique_views() -> u64 {
    100
}

const fn default_min_likes() -> u64 {
    15
}

const fn default_max_skip_streak() -> u32 {
    5
}

const fn default_purge_stale_after_minutes() -> u32 {
    10
}
