//! Configuration for a `PoolManager`.

use crate::error::PoolError;

/// Hard upper bound used by the default configuration.
pub const DEFAULT_MAX_SIZE: usize = 8;

/// Sizing and naming for a pool.
///
/// Every size the pool is asked to take (initial or via `resize`) is clamped
/// into `[min_size, max_size]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Name used in logs and completion notifications.
  pub pool_name: String,

  /// Number of execution units created at startup (clamped into bounds).
  pub initial_size: usize,

  pub min_size: usize,

  pub max_size: usize,
}

impl Default for PoolConfig {
  fn default() -> Self {
    let hardware_parallelism = std::thread::available_parallelism()
      .map(|n| n.get())
      .unwrap_or(1);

    Self {
      pool_name: "parallel_pool".to_string(),
      initial_size: hardware_parallelism.clamp(1, DEFAULT_MAX_SIZE),
      min_size: 1,
      max_size: DEFAULT_MAX_SIZE,
    }
  }
}

impl PoolConfig {
  pub fn new(pool_name: &str, initial_size: usize) -> Self {
    Self {
      pool_name: pool_name.to_string(),
      initial_size,
      ..Self::default()
    }
  }

  pub fn with_name(mut self, pool_name: &str) -> Self {
    self.pool_name = pool_name.to_string();
    self
  }

  pub fn with_initial_size(mut self, initial_size: usize) -> Self {
    self.initial_size = initial_size;
    self
  }

  pub fn with_bounds(mut self, min_size: usize, max_size: usize) -> Self {
    self.min_size = min_size;
    self.max_size = max_size;
    self
  }

  /// Load configuration from environment variables with defaults.
  ///
  /// # Environment Variables
  ///
  /// - `PARALLEL_POOL_NAME` (default: "parallel_pool")
  /// - `PARALLEL_POOL_SIZE` (default: available parallelism, clamped)
  /// - `PARALLEL_POOL_MIN_SIZE` (default: 1)
  /// - `PARALLEL_POOL_MAX_SIZE` (default: 8)
  ///
  /// Absent or unparsable values fall back to the defaults.
  pub fn from_env() -> Self {
    let default = Self::default();

    Self {
      pool_name: std::env::var("PARALLEL_POOL_NAME")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default.pool_name),

      initial_size: std::env::var("PARALLEL_POOL_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default.initial_size),

      min_size: std::env::var("PARALLEL_POOL_MIN_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default.min_size),

      max_size: std::env::var("PARALLEL_POOL_MAX_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default.max_size),
    }
  }

  /// Checks that the bounds describe a non-empty range starting at one or more units.
  pub fn validate(&self) -> Result<(), PoolError> {
    if self.min_size == 0 {
      return Err(PoolError::InvalidConfig(
        "min_size must be at least 1".to_string(),
      ));
    }
    if self.min_size > self.max_size {
      return Err(PoolError::InvalidConfig(format!(
        "min_size ({}) must not exceed max_size ({})",
        self.min_size, self.max_size
      )));
    }
    Ok(())
  }

  /// Clamps a requested unit count into `[min_size, max_size]`.
  pub fn clamp_size(&self, requested: usize) -> usize {
    requested.clamp(self.min_size, self.max_size)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config() {
    let config = PoolConfig::default();
    assert_eq!(config.pool_name, "parallel_pool");
    assert_eq!(config.min_size, 1);
    assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
    assert!(config.initial_size >= 1 && config.initial_size <= DEFAULT_MAX_SIZE);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_clamp_size() {
    let config = PoolConfig::new("clamp", 2).with_bounds(1, 8);
    assert_eq!(config.clamp_size(0), 1);
    assert_eq!(config.clamp_size(5), 5);
    assert_eq!(config.clamp_size(64), 8);
  }

  #[test]
  fn test_validate_rejects_bad_bounds() {
    let zero_min = PoolConfig::new("bad", 1).with_bounds(0, 4);
    assert!(matches!(zero_min.validate(), Err(PoolError::InvalidConfig(_))));

    let inverted = PoolConfig::new("bad", 1).with_bounds(5, 2);
    assert!(matches!(inverted.validate(), Err(PoolError::InvalidConfig(_))));
  }

  #[test]
  fn test_config_env_loading() {
    // Only this test touches these variables.
    unsafe {
      std::env::set_var("PARALLEL_POOL_NAME", "env_pool");
      std::env::set_var("PARALLEL_POOL_SIZE", "3");
      std::env::set_var("PARALLEL_POOL_MAX_SIZE", "not-a-number");
    }

    let config = PoolConfig::from_env();
    assert_eq!(config.pool_name, "env_pool");
    assert_eq!(config.initial_size, 3);
    assert_eq!(config.max_size, DEFAULT_MAX_SIZE);

    unsafe {
      std::env::remove_var("PARALLEL_POOL_NAME");
      std::env::remove_var("PARALLEL_POOL_SIZE");
      std::env::remove_var("PARALLEL_POOL_MAX_SIZE");
    }
  }
}
