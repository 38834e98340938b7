use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const MIN_TRANSFER_BUFFER: usize = 1024;
pub const MAX_TRANSFER_BUFFER: usize = 8 * 1024 * 1024;

/// Runtime configuration for the bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Private cache directory holding staged copies (default: <tmp>/wormhole-bridge/cache)
    pub cache_dir: PathBuf,

    /// OS-visible downloads area (default: $HOME/Downloads)
    pub downloads_dir: PathBuf,

    /// Fixed buffer used by every streaming copy, in bytes (default: 64 KiB)
    pub transfer_buffer_size: usize,

    /// Staged files older than this are purged by housekeeping (default: 24)
    pub staging_max_age_hours: u64,

    /// tracing filter used when RUST_LOG is unset (default: "wormhole_bridge=info")
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let scratch = env::temp_dir().join("wormhole-bridge");
        Self {
            cache_dir: scratch.join("cache"),
            downloads_dir: env::var_os("HOME")
                .map(|home| PathBuf::from(home).join("Downloads"))
                .unwrap_or_else(|| scratch.join("downloads")),
            transfer_buffer_size: 64 * 1024, // 64 KiB
            staging_max_age_hours: 24,
            log_filter: "wormhole_bridge=info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            cache_dir: env::var_os("BRIDGE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.cache_dir),

            downloads_dir: env::var_os("BRIDGE_DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.downloads_dir),

            transfer_buffer_size: env::var("BRIDGE_TRANSFER_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(clamp_buffer)
                .unwrap_or(default.transfer_buffer_size),

            staging_max_age_hours: env::var("BRIDGE_STAGING_MAX_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_max_age_hours),

            log_filter: env::var("RUST_LOG").unwrap_or(default.log_filter),
        }
    }

    /// Everything under the temp dir, verbose logging, short staging retention
    pub fn development() -> Self {
        let scratch = env::temp_dir().join("wormhole-bridge-dev");
        Self {
            cache_dir: scratch.join("cache"),
            downloads_dir: scratch.join("downloads"),
            transfer_buffer_size: 64 * 1024,
            staging_max_age_hours: 1,
            log_filter: "wormhole_bridge=debug".to_string(),
        }
    }

    /// Default settings rooted at explicit directories
    pub fn with_dirs(cache_dir: impl Into<PathBuf>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            downloads_dir: downloads_dir.into(),
            ..Self::default()
        }
    }

    pub fn staging_max_age(&self) -> Duration {
        Duration::from_secs(self.staging_max_age_hours.saturating_mul(3600))
    }
}

fn clamp_buffer(size: usize) -> usize {
    size.clamp(MIN_TRANSFER_BUFFER, MAX_TRANSFER_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.transfer_buffer_size, 64 * 1024);
        assert_eq!(config.staging_max_age_hours, 24);
        assert!(config.cache_dir.ends_with("cache"));
    }

    #[test]
    fn test_development_config() {
        let config = BridgeConfig::development();
        assert_eq!(config.staging_max_age_hours, 1);
        assert!(config.downloads_dir.starts_with(env::temp_dir()));
    }

    #[test]
    fn test_with_dirs_keeps_defaults() {
        let config = BridgeConfig::with_dirs("/c", "/d");
        assert_eq!(config.cache_dir, PathBuf::from("/c"));
        assert_eq!(config.downloads_dir, PathBuf::from("/d"));
        assert_eq!(config.transfer_buffer_size, 64 * 1024);
    }

    #[test]
    fn test_buffer_is_clamped() {
        assert_eq!(clamp_buffer(1), MIN_TRANSFER_BUFFER);
        assert_eq!(clamp_buffer(usize::MAX), MAX_TRANSFER_BUFFER);
        assert_eq!(clamp_buffer(4096), 4096);
    }

    #[test]
    fn test_staging_max_age() {
        let mut config = BridgeConfig::default();
        config.staging_max_age_hours = 2;
        assert_eq!(config.staging_max_age(), Duration::from_secs(7200));
    }

    #[test]
    fn test_huge_staging_max_age_saturates() {
        let mut config = BridgeConfig::default();
        config.staging_max_age_hours = u64::MAX / 1000;
        assert_eq!(config.staging_max_age(), Duration::from_secs(u64::MAX));
    }
}
