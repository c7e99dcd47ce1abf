//! Pipeline configuration.
//!
//! Handles loading, validating, and merging `cropdeck.toml`. Stock defaults
//! form the base layer; a user file overrides only the keys it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [crop]
//! default_percentage = 10.0 # Border removed from each edge, 5-20
//!
//! [cache]
//! max_entries = 50          # Cropped results kept in memory
//! max_cost_mb = 100         # Total estimated pixel memory of those results
//!
//! [processing]
//! max_concurrent = 4        # Omit for auto = min(CPU cores, 4)
//! max_dimension = 1024      # Longer edge of the working resolution
//!
//! [selection]
//! limit = 100               # Images accepted per selection
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::cache::CacheLimits;
use crate::imaging::{CropPercentage, DEFAULT_MAX_DIMENSION};
use crate::limiter::MAX_DEFAULT_SLOTS;
use crate::view_model::DEFAULT_SELECTION_LIMIT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "cropdeck.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Pipeline configuration loaded from `cropdeck.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Initial crop percentage.
    pub crop: CropConfig,
    /// Result cache bounds.
    pub cache: CacheConfig,
    /// Admission and working resolution.
    pub processing: ProcessingConfig,
    /// Selection handling.
    pub selection: SelectionConfig,
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pct = self.crop.default_percentage;
        if !(CropPercentage::MIN..=CropPercentage::MAX).contains(&pct) {
            return Err(ConfigError::Validation(format!(
                "crop.default_percentage must be {}-{}",
                CropPercentage::MIN,
                CropPercentage::MAX
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "cache.max_entries must be non-zero".into(),
            ));
        }
        if self.cache.max_cost_mb == 0 {
            return Err(ConfigError::Validation(
                "cache.max_cost_mb must be non-zero".into(),
            ));
        }
        if self.processing.max_concurrent == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_concurrent must be non-zero".into(),
            ));
        }
        if self.processing.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "processing.max_dimension must be non-zero".into(),
            ));
        }
        if self.selection.limit == 0 {
            return Err(ConfigError::Validation(
                "selection.limit must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn crop_percentage(&self) -> CropPercentage {
        CropPercentage::new(self.crop.default_percentage)
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_entries: self.cache.max_entries,
            max_cost_bytes: self.cache.max_cost_mb.saturating_mul(1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CropConfig {
    /// Percentage of each edge removed, 5-20.
    pub default_percentage: f64,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            default_percentage: CropPercentage::DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Aggregate cost bound in MiB.
    pub max_cost_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_cost_mb: 100,
        }
    }
}

/// Admission and working-resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum operations in the pipeline at once.
    /// When absent, defaults to `min(CPU cores, 4)`.
    /// Larger values are clamped down to that.
    pub max_concurrent: Option<usize>,
    /// Longer edge of the downsampled working image.
    pub max_dimension: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Resolve the effective concurrency from config.
///
/// - `None` → `min(cores, 4)`
/// - `Some(n)` → `min(n, cores, 4)` (user can constrain down, not up)
///
/// Never less than 1.
pub fn effective_concurrency(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let cap = cores.min(MAX_DEFAULT_SLOTS);
    config
        .max_concurrent
        .map(|n| n.min(cap))
        .unwrap_or(cap)
        .max(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    pub limit: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SELECTION_LIMIT,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(PipelineConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<PipelineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`, falling back to stock defaults when
/// it does not exist.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `cropdeck.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# cropdeck configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Crop
# ---------------------------------------------------------------------------
[crop]
# Percentage removed from each edge. Values are limited to 5-20.
default_percentage = 10.0

# ---------------------------------------------------------------------------
# Result cache
# ---------------------------------------------------------------------------
[cache]
# Maximum number of cropped results kept in memory.
max_entries = 50

# Maximum total estimated memory of cached results, in MiB.
# Cost is width x height x 4 bytes per result.
max_cost_mb = 100

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum images in the pipeline at once.
# Omit or comment out to auto-detect (= CPU cores, at most 4).
# max_concurrent = 4

# Images are downsampled so their longer edge is at most this many pixels
# before cropping.
max_dimension = 1024

# ---------------------------------------------------------------------------
# Selection
# ---------------------------------------------------------------------------
[selection]
# Maximum images accepted per selection. Extra images are dropped.
limit = 100
"##
}
