// Configuration Storage Service
// Handles settings/engine config read/write, version backup and env overrides

use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::models::MaskingMode;

const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
const MAX_BACKUPS: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config IO error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============ User Settings ============

/// Settings owned by the preferences collaborator and consumed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold", deserialize_with = "deserialize_threshold")]
    pub threshold: u8,
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: MaskingMode,
}

/// Persisted thresholds outside 0..=100 are clamped instead of rejected.
fn deserialize_threshold<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() {
        warn!("[CONFIG] non-finite threshold, using {}", default_threshold());
        return Ok(default_threshold());
    }
    Ok(clamp_threshold(raw.round() as i64))
}

/// Unknown persisted modes fall back to the default mode instead of failing
/// the whole config.
fn deserialize_mode<'de, D>(deserializer: D) -> Result<MaskingMode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(MaskingMode::parse(&raw).unwrap_or_else(|| {
        let fallback = MaskingMode::default();
        warn!("[CONFIG] unknown mode '{}', using '{}'", raw, fallback.as_str());
        fallback
    }))
}

impl Default for MaskingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 50,
            mode: MaskingMode::Medical,
        }
    }
}

/// Partial settings update. Out-of-range thresholds are clamped and unknown
/// modes keep the current mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub enabled: Option<bool>,
    pub threshold: Option<i64>,
    pub mode: Option<String>,
}

pub fn clamp_threshold(raw: i64) -> u8 {
    if !(0..=100).contains(&raw) {
        warn!("[CONFIG] threshold {} out of range, clamping to 0..=100", raw);
    }
    raw.clamp(0, 100) as u8
}

impl MaskingSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(threshold) = patch.threshold {
            self.threshold = clamp_threshold(threshold);
        }
        if let Some(mode) = patch.mode.as_deref() {
            match MaskingMode::parse(mode) {
                Some(m) => self.mode = m,
                None => warn!(
                    "[CONFIG] unknown mode '{}', keeping '{}'",
                    mode,
                    self.mode.as_str()
                ),
            }
        }
    }
}

// ============ Engine Config ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Timeout for a remote masking request.
    #[serde(default = "default_mask_timeout_ms")]
    pub mask_timeout_ms: u64,
    /// Timeout for a reachability probe, independent of the masking timeout.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Background re-probing stops after this many consecutive failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// State older than this triggers an out-of-band probe.
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_sweep_secs")]
    pub cache_sweep_secs: u64,
    /// When false, a failed remote call yields an error result instead of local masking.
    #[serde(default = "default_true")]
    pub local_fallback: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            mask_timeout_ms: default_mask_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            health_interval_secs: default_health_interval_secs(),
            max_attempts: default_max_attempts(),
            freshness_window_secs: default_freshness_window_secs(),
            cache_enabled: true,
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_sweep_secs: default_cache_sweep_secs(),
            local_fallback: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl EngineConfig {
    pub fn mask_timeout(&self) -> Duration {
        Duration::from_millis(self.mask_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Apply `PRIVACY_GUARD_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var("PRIVACY_GUARD_ENDPOINT") {
            let url = url.trim();
            if !url.is_empty() {
                self.endpoint = url.trim_end_matches('/').to_string();
            }
        }
        if let Some(v) = env_bool("PRIVACY_GUARD_LOCAL_FALLBACK") {
            self.local_fallback = v;
        }
        if let Some(v) = env_bool("PRIVACY_GUARD_CACHE_ENABLED") {
            self.cache_enabled = v;
        }
        if let Some(v) = env_u64("PRIVACY_GUARD_MASK_TIMEOUT_MS") {
            self.mask_timeout_ms = v;
        }
        if let Some(v) = env_u64("PRIVACY_GUARD_PROBE_TIMEOUT_MS") {
            self.probe_timeout_ms = v;
        }
        self
    }
}

fn env_bool(key: &str) -> Option<bool> {
    match env::var(key).ok()?.trim() {
        "1" | "true" | "TRUE" | "yes" => Some(true),
        "0" | "false" | "FALSE" | "no" => Some(false),
        other => {
            warn!("[CONFIG] ignoring {}={} (expected boolean)", key, other);
            None
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[CONFIG] ignoring {}={} (expected integer)", key, raw);
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: MaskingSettings,
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_true() -> bool { true }
fn default_threshold() -> u8 { 50 }
fn default_endpoint() -> String { DEFAULT_ENDPOINT.to_string() }
fn default_mask_timeout_ms() -> u64 { 5000 }
fn default_probe_timeout_ms() -> u64 { 3000 }
fn default_health_interval_secs() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_freshness_window_secs() -> u64 { 30 }
fn default_cache_capacity() -> usize { 100 }
fn default_cache_ttl_secs() -> u64 { 300 }
fn default_cache_sweep_secs() -> u64 { 600 }
fn default_debounce_ms() -> u64 { 300 }

// ============ Store ============

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("privacy-guard"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Ensure config directory exists
    pub fn ensure_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.config_dir).map_err(io_err(&self.config_dir))
    }

    /// Load configuration from file, defaults when absent
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file).map_err(io_err(&self.config_file))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        self.ensure_dir()?;

        // Create backup if file exists
        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_file, content).map_err(io_err(&self.config_file))
    }

    /// Merge a partial settings update into the stored config.
    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<MaskingSettings, ConfigError> {
        let mut config = self.load()?;
        config.settings.apply(patch);
        self.save(&config)?;
        Ok(config.settings)
    }

    /// Create a backup of current config
    fn create_backup(&self) -> Result<(), ConfigError> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir).map_err(io_err(&backup_dir))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%3f");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));

        fs::copy(&self.config_file, &backup_file).map_err(io_err(&backup_file))?;

        self.cleanup_old_backups(&backup_dir, MAX_BACKUPS)
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), ConfigError> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)
            .map_err(io_err(backup_dir))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        // File names embed the timestamp, so lexical order is age order
        entries.sort_by_key(|e| e.file_name());

        for entry in entries.iter().take(entries.len() - keep) {
            let _ = fs::remove_file(entry.path());
        }

        Ok(())
    }
}
