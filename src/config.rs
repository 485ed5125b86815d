//! Harvester configuration.
//!
//! One immutable [`HarvestConfig`] value is built up front (defaults,
//! environment, then explicit overrides) and handed to the pipeline at
//! construction time.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Archive prefix replaced by [`MirrorConfig::local_root`].
pub const DEFAULT_MIRROR_PREFIX: &str = "http://archive.stsci.edu/missions/k2/target_pixel_files";

/// File-name fragment identifying short-cadence files.
pub const DEFAULT_CADENCE_MARKER: &str = "spd-targ";

/// Download chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Local copy of a remote archive tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// URL prefix the mirror replaces
    pub remote_prefix: String,

    /// Directory holding the mirrored tree
    pub local_root: PathBuf,
}

impl MirrorConfig {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_prefix: DEFAULT_MIRROR_PREFIX.to_string(),
            local_root: local_root.into(),
        }
    }

    /// Maps `url` into the mirror, if it lives under the remote prefix.
    pub fn map(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(self.remote_prefix.trim_end_matches('/'))?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(self.local_root.join(rest.trim_start_matches('/')))
    }
}

/// Settings for one harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Attempts per record before giving up
    pub max_attempts: u32,

    /// Pause between two attempts on the same record
    pub retry_delay: Duration,

    /// Upper bound for a single attempt (None = unbounded)
    pub attempt_timeout: Option<Duration>,

    /// Where remote files are downloaded to
    pub temp_dir: PathBuf,

    /// Skip records whose locator contains `cadence_variant_marker`
    pub exclude_cadence_variant: bool,

    pub cadence_variant_marker: String,

    /// Serve matching URLs from a local mirror instead of the network
    pub mirror: Option<MirrorConfig>,

    /// Append corner/bounding-box columns to every row
    pub include_geometry: bool,

    /// Download chunk size in bytes
    pub chunk_size: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            retry_delay: Duration::from_secs(30),
            attempt_timeout: None,
            temp_dir: std::env::temp_dir(),
            exclude_cadence_variant: false,
            cadence_variant_marker: DEFAULT_CADENCE_MARKER.to_string(),
            mirror: None,
            include_geometry: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        _ => Ok(None),
    }
}

fn env_flag(key: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        },
        Err(_) => Ok(None),
    }
}

impl HarvestConfig {
    /// Defaults overridden by `HARVEST_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = env_value("HARVEST_MAX_ATTEMPTS")? {
            config.max_attempts = n;
        }
        if let Some(secs) = env_value::<u64>("HARVEST_RETRY_DELAY_SECS")? {
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = env_value::<u64>("HARVEST_ATTEMPT_TIMEOUT_SECS")? {
            config.attempt_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(dir) = env_value::<PathBuf>("HARVEST_TMPDIR")? {
            config.temp_dir = dir;
        }
        if let Some(flag) = env_flag("HARVEST_EXCLUDE_SHORT_CADENCE")? {
            config.exclude_cadence_variant = flag;
        }
        if let Some(marker) = env_value::<String>("HARVEST_CADENCE_MARKER")? {
            config.cadence_variant_marker = marker;
        }
        if let Some(root) = env_value::<PathBuf>("HARVEST_LOCAL_MIRROR")? {
            let mut mirror = MirrorConfig::new(root);
            if let Some(prefix) = env_value::<String>("HARVEST_MIRROR_PREFIX")? {
                mirror.remote_prefix = prefix;
            }
            config.mirror = Some(mirror);
        }
        if let Some(flag) = env_flag("HARVEST_GEOMETRY")? {
            config.include_geometry = flag;
        }

        Ok(config)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_cadence_exclusion(mut self, exclude: bool) -> Self {
        self.exclude_cadence_variant = exclude;
        self
    }

    pub fn with_mirror(mut self, mirror: Option<MirrorConfig>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_geometry(mut self, include: bool) -> Self {
        self.include_geometry = include;
        self
    }

    /// Marker used by the cadence filter, if the filter is enabled.
    pub fn cadence_filter(&self) -> Option<&str> {
        self.exclude_cadence_variant
            .then_some(self.cadence_variant_marker.as_str())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.exclude_cadence_variant && self.cadence_variant_marker.is_empty() {
            return Err(ConfigError::Validation(
                "cadence_variant_marker cannot be empty".to_string(),
            ));
        }
        if let Some(mirror) = &self.mirror {
            if mirror.remote_prefix.is_empty() {
                return Err(ConfigError::Validation(
                    "mirror remote_prefix cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
