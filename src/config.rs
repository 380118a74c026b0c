//! Configuration for fieldstore
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::error::{Result, StoreError};

/// Main configuration shared by the registry, codec, store and walker
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Codec Configuration
    // -------------------------------------------------------------------------
    /// Track bits consumed per member of streamed bit groups and fail on disagreement
    pub validate_bit_groups: bool,

    /// Whether writes may record type ids for types the registry has not seen
    pub allow_new_type_ids: bool,

    // -------------------------------------------------------------------------
    // Walker Configuration
    // -------------------------------------------------------------------------
    /// Collect cumulative walk time per concrete type (callback time excluded)
    pub walk_timing: bool,

    // -------------------------------------------------------------------------
    // Compilation Configuration
    // -------------------------------------------------------------------------
    /// Slice (milliseconds) of each condvar wait while another thread compiles a schema
    pub compile_wait_slice_ms: u64,

    /// Total time (milliseconds) to wait for another thread's compilation before failing
    pub compile_wait_limit_ms: u64,

    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Open stores built from this config as read-only
    pub read_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validate_bit_groups: true,
            allow_new_type_ids: true,
            walk_timing: false,
            compile_wait_slice_ms: 50,
            compile_wait_limit_ms: 30_000,
            read_only: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn compile_wait_slice(&self) -> Duration {
        Duration::from_millis(self.compile_wait_slice_ms)
    }

    pub fn compile_wait_limit(&self) -> Duration {
        Duration::from_millis(self.compile_wait_limit_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Enable or disable per-member bit accounting in streamed bit groups
    pub fn validate_bit_groups(mut self, enabled: bool) -> Self {
        self.config.validate_bit_groups = enabled;
        self
    }

    /// Allow writes to record ids for previously unseen types
    pub fn allow_new_type_ids(mut self, allowed: bool) -> Self {
        self.config.allow_new_type_ids = allowed;
        self
    }

    /// Enable per-type walk timing
    pub fn walk_timing(mut self, enabled: bool) -> Self {
        self.config.walk_timing = enabled;
        self
    }

    /// Set the condvar wait slice (in milliseconds)
    pub fn compile_wait_slice_ms(mut self, ms: u64) -> Self {
        self.config.compile_wait_slice_ms = ms;
        self
    }

    /// Set the total compile wait limit (in milliseconds)
    pub fn compile_wait_limit_ms(mut self, ms: u64) -> Self {
        self.config.compile_wait_limit_ms = ms;
        self
    }

    /// Open stores built from this config as read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Validate and build the config
    pub fn build(self) -> Result<Config> {
        if self.config.compile_wait_slice_ms == 0 {
            return Err(StoreError::Config(
                "compile_wait_slice_ms must be greater than zero".to_string(),
            ));
        }
        if self.config.compile_wait_limit_ms < self.config.compile_wait_slice_ms {
            return Err(StoreError::Config(format!(
                "compile_wait_limit_ms ({}) is shorter than one wait slice ({})",
                self.config.compile_wait_limit_ms, self.config.compile_wait_slice_ms
            )));
        }
        Ok(self.config)
    }
}
