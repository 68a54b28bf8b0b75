//! Configuration for the orchestration engine.
//!
//! All engine behaviour is controlled through [`EngineConfig`], built via
//! its [`EngineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config across tasks and to log it when diagnosing
//! why two deployments behave differently.
//!
//! # Design choice: builder over constructor
//! A many-field constructor breaks on every new field. The builder lets
//! hosts set only what they care about and rely on documented defaults.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`crate::engine::Engine`].
///
/// Built via [`EngineConfig::builder()`].
///
/// # Example
/// ```rust
/// use fileforge::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .scratch_root("/tmp/fileforge")
///     .max_concurrent_conversions(4)
///     .conversion_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for per-session scratch subdirectories.
    ///
    /// Each session gets an exclusively-owned `{user_id}_{token}/` below
    /// this root; the root itself is shared across all sessions.
    pub scratch_root: PathBuf,

    /// Maximum accepted inbound file size in bytes. Default: 20 MiB.
    ///
    /// Checked before any scratch write so an oversized upload costs no
    /// disk at all. Messaging platforms cap bot downloads around this
    /// size anyway.
    pub max_file_size_bytes: u64,

    /// Maximum conversions running at once. Default: 4.
    ///
    /// Conversions are memory-heavy (image decoding, PDF assembly).
    /// Requests beyond the cap wait on the dispatcher's semaphore, which
    /// is the backpressure the resource model requires — never drop, never
    /// run unbounded.
    pub max_concurrent_conversions: usize,

    /// Wall-clock limit per conversion request. Default: 60 s.
    ///
    /// One stuck external converter must not pin a worker permit forever;
    /// on expiry the request fails with a timeout cause and its partial
    /// outputs are cleaned with the scratch directory.
    pub conversion_timeout_secs: u64,

    /// Maximum images accepted in one collecting-images session. Default: 50.
    ///
    /// Bounds the disk a single user can hold in scratch before `/done`.
    pub max_collected_images: usize,

    /// Default JPEG quality for `compress_image`, 1–100. Default: 85.
    pub default_jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("fileforge"),
            max_file_size_bytes: 20 * 1024 * 1024,
            max_concurrent_conversions: 4,
            conversion_timeout_secs: 60,
            max_collected_images: 50,
            default_jpeg_quality: 85,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The per-conversion timeout as a [`Duration`].
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = root.into();
        self
    }

    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_size_bytes = bytes.max(1);
        self
    }

    pub fn max_concurrent_conversions(mut self, n: usize) -> Self {
        self.config.max_concurrent_conversions = n.max(1);
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs.max(1);
        self
    }

    pub fn max_collected_images(mut self, n: usize) -> Self {
        self.config.max_collected_images = n.max(1);
        self
    }

    pub fn default_jpeg_quality(mut self, q: u8) -> Self {
        self.config.default_jpeg_quality = q.clamp(1, 100);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        let c = &self.config;
        if c.scratch_root.as_os_str().is_empty() {
            return Err(EngineError::InvalidConfig(
                "scratch_root must not be empty".into(),
            ));
        }
        if c.max_concurrent_conversions == 0 {
            return Err(EngineError::InvalidConfig(
                "max_concurrent_conversions must be ≥ 1".into(),
            ));
        }
        if c.default_jpeg_quality == 0 || c.default_jpeg_quality > 100 {
            return Err(EngineError::InvalidConfig(format!(
                "default_jpeg_quality must be 1–100, got {}",
                c.default_jpeg_quality
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = EngineConfig::builder().build().unwrap();
        assert_eq!(c.max_concurrent_conversions, 4);
        assert_eq!(c.default_jpeg_quality, 85);
        assert_eq!(c.conversion_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn setters_clamp() {
        let c = EngineConfig::builder()
            .max_concurrent_conversions(0)
            .default_jpeg_quality(200)
            .conversion_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.max_concurrent_conversions, 1);
        assert_eq!(c.default_jpeg_quality, 100);
        assert_eq!(c.conversion_timeout_secs, 1);
    }

    #[test]
    fn empty_scratch_root_rejected() {
        let err = EngineConfig::builder().scratch_root("").build();
        assert!(matches!(err, Err(EngineError::InvalidConfig(_))));
    }
}
