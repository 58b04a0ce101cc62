//! Configuration types and operational constants.
//!
//! Configuration is re-read by the background loops on every tick, so a host
//! process can enable/disable geolocation or rotate the license key without a
//! restart. License key validation, however, is a startup-time concern: a
//! malformed key with geolocation enabled refuses the whole configuration
//! load rather than failing tick by tick.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;

// Size limits
/// Maximum raw database payload size in bytes (50 MiB).
/// Payloads larger than this are a hard failure, never truncated.
pub const MAX_DATABASE_PAYLOAD_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum encoded metadata section size in the container format (1 KiB).
pub const MAX_METADATA_BYTES: u64 = 1024;
/// Maximum vendor archive download size in bytes (64 MiB).
/// The tar.gz wraps the payload plus license/readme files, so it gets a
/// little headroom over the payload cap.
pub const MAX_ARCHIVE_DOWNLOAD_BYTES: u64 = 64 * 1024 * 1024;

// Origin client
/// How long a successful full-archive download is reused before the origin
/// is contacted again. Failsafe against a crash between download and
/// install burning through the vendor's daily download quota.
pub const ORIGIN_DOWNLOAD_COOLDOWN: Duration = Duration::from_secs(30 * 60);
/// HTTP timeout for vendor requests. Generous because the full archive is
/// tens of megabytes.
pub const ORIGIN_HTTP_TIMEOUT: Duration = Duration::from_secs(300);
/// Vendor download endpoint.
pub const ORIGIN_DOWNLOAD_BASE: &str = "https://download.maxmind.com/app/geoip_download";
/// Vendor edition identifier for the country database.
pub const ORIGIN_EDITION_ID: &str = "GeoLite2-Country";

// Propagation timing
/// Fixed delay between propagator ticks.
pub const PROPAGATION_TICK_PERIOD: Duration = Duration::from_secs(10);
/// How often the leader checks the origin for a newer build. Long, to bound
/// vendor load.
pub const ORIGIN_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// How often every node checks the replica for a newer build.
pub const REPLICA_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Sampling period of the resident-age metrics reporter.
pub const METRICS_SAMPLE_PERIOD: Duration = Duration::from_secs(10);

/// Maximum age of the resident database before lookups refuse to answer.
pub const RESIDENT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Error raised when the configuration cannot be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Geolocation is enabled but no license key was supplied.
    #[error("geolocation is enabled but no license key is configured")]
    MissingLicenseKey,

    /// The configured license key is empty or contains characters the vendor
    /// endpoint cannot accept.
    #[error("license key is not a non-empty printable-ASCII string without whitespace")]
    InvalidLicenseKey,
}

/// Process-level geolocation configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoConfig {
    /// Master switch for the whole pipeline.
    pub enabled: bool,
    /// Vendor license key; required whenever `enabled` is true.
    pub license_key: Option<String>,
}

impl GeoConfig {
    /// Returns the license key after validating it, or `Ok(None)` when
    /// geolocation is disabled.
    ///
    /// Called once at service startup; a bad key fails the configuration
    /// load outright rather than surfacing as per-tick errors later.
    pub fn validated_license_key(&self) -> Result<Option<&str>, ConfigError> {
        if !self.enabled {
            return Ok(None);
        }
        let key = self
            .license_key
            .as_deref()
            .ok_or(ConfigError::MissingLicenseKey)?;
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ConfigError::InvalidLicenseKey);
        }
        Ok(Some(key))
    }
}

/// Source of the current configuration, re-read between ticks.
pub trait ConfigProvider: Send + Sync {
    fn current(&self) -> GeoConfig;
}

/// Shared, updatable configuration handle.
///
/// Cloning shares the underlying value; `set` makes the new configuration
/// visible to all background loops on their next tick.
#[derive(Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<GeoConfig>>,
}

impl SharedConfig {
    pub fn new(config: GeoConfig) -> Self {
        SharedConfig {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn set(&self, config: GeoConfig) {
        *self.inner.write().expect("config lock poisoned") = config;
    }
}

impl ConfigProvider for SharedConfig {
    fn current(&self) -> GeoConfig {
        self.inner.read().expect("config lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_config_needs_no_key() {
        let config = GeoConfig {
            enabled: false,
            license_key: None,
        };
        assert!(matches!(config.validated_license_key(), Ok(None)));
    }

    #[test]
    fn test_enabled_config_requires_key() {
        let config = GeoConfig {
            enabled: true,
            license_key: None,
        };
        assert!(matches!(
            config.validated_license_key(),
            Err(ConfigError::MissingLicenseKey)
        ));
    }

    #[test]
    fn test_valid_key_is_returned() {
        let config = GeoConfig {
            enabled: true,
            license_key: Some("abcDEF123_xyz".to_string()),
        };
        assert_eq!(config.validated_license_key().unwrap(), Some("abcDEF123_xyz"));
    }

    #[test]
    fn test_rejects_empty_and_whitespace_keys() {
        for bad in ["", " ", "key with spaces", "key\twith\ttabs", "kéy", "key\n"] {
            let config = GeoConfig {
                enabled: true,
                license_key: Some(bad.to_string()),
            };
            assert!(
                matches!(
                    config.validated_license_key(),
                    Err(ConfigError::InvalidLicenseKey)
                ),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_shared_config_updates_are_visible() {
        let shared = SharedConfig::new(GeoConfig {
            enabled: true,
            license_key: Some("key".to_string()),
        });
        assert!(shared.current().enabled);

        shared.set(GeoConfig {
            enabled: false,
            license_key: None,
        });
        assert!(!shared.current().enabled);
    }
}
