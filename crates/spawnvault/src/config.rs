//! # Runtime Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an
//! empty document is a valid configuration.
//!
//! ```toml
//! max_stack_size = 1000
//! slots_per_stack = 45
//! presence_strategy = "spatial"
//! worker_threads = 4
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{SpawnerError, SpawnerResult};

/// Largest activation range. Keeps the spatial scan footprint bounded.
pub const MAX_RANGE: f32 = 128.0;

/// How presence of actors around spawners is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStrategyKind {
    /// One list of qualifying actors per tick, linear scan per spawner.
    #[default]
    Batch,
    /// Visit the chunk cells under each spawner's range.
    Spatial,
}

/// Runtime configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnvaultConfig {
    /// Largest stack a spawner may reach.
    pub max_stack_size: u32,
    /// Inventory slots granted per stacked spawner.
    pub slots_per_stack: u64,
    /// Resource capacity granted per stacked spawner.
    pub resource_per_stack: u64,
    /// Activation range for spawners placed without one.
    pub default_range: f32,
    /// Generation interval for spawners placed without one.
    pub default_spawn_interval_ms: u64,
    /// Presence evaluation interval.
    pub activation_tick_ms: u64,
    /// Deadline between sell request and commit.
    pub sell_timeout_ms: u64,
    /// Background worker threads (clamped to at least 1).
    pub worker_threads: usize,
    /// Serial region executors (clamped to at least 1).
    pub region_executors: usize,
    /// Presence evaluation strategy.
    pub presence_strategy: PresenceStrategyKind,
    /// Master seed for per-cycle loot RNGs.
    pub rng_seed: u64,
    /// Capacity of the post-event channel.
    pub event_capacity: usize,
}

impl Default for SpawnvaultConfig {
    fn default() -> Self {
        let cores = num_cpus::get().max(1);
        Self {
            max_stack_size: 1000,
            slots_per_stack: 45,
            resource_per_stack: 1000,
            default_range: 16.0,
            default_spawn_interval_ms: 25_000,
            activation_tick_ms: 1_000,
            sell_timeout_ms: 5_000,
            worker_threads: cores.min(4),
            region_executors: cores.min(8),
            presence_strategy: PresenceStrategyKind::Batch,
            rng_seed: 0x5EED_5EED,
            event_capacity: 1024,
        }
    }
}

impl SpawnvaultConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::InvalidConfiguration` on I/O, parse or range errors.
    pub fn load_file(path: impl AsRef<Path>) -> SpawnerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SpawnerError::InvalidConfiguration(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::InvalidConfiguration` on parse or range errors.
    pub fn from_toml_str(content: &str) -> SpawnerResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SpawnerError::InvalidConfiguration(e.to_string()))?;
        config.validated()
    }

    /// Clamps thread counts and rejects unusable values.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::InvalidConfiguration` naming the first bad field.
    pub fn validated(mut self) -> SpawnerResult<Self> {
        let invalid = |field: &str| Err(SpawnerError::InvalidConfiguration(format!("{field} must be positive")));

        if self.max_stack_size == 0 {
            return invalid("max_stack_size");
        }
        if self.slots_per_stack == 0 {
            return invalid("slots_per_stack");
        }
        check_range(self.default_range)?;
        check_interval(self.default_spawn_interval_ms)?;
        if self.activation_tick_ms == 0 {
            return invalid("activation_tick_ms");
        }

        self.worker_threads = self.worker_threads.clamp(1, num_cpus::get().max(1) * 4);
        self.region_executors = self.region_executors.max(1);
        self.event_capacity = self.event_capacity.max(1);
        Ok(self)
    }

    /// Sell deadline as a duration.
    #[must_use]
    pub fn sell_timeout(&self) -> Duration {
        Duration::from_millis(self.sell_timeout_ms)
    }

    /// Capacity rules derived from this configuration.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        Capacity {
            max_stack_size: self.max_stack_size,
            slots_per_stack: self.slots_per_stack,
            resource_per_stack: self.resource_per_stack,
        }
    }
}

/// Checks `0 < range <= MAX_RANGE`.
///
/// # Errors
///
/// Returns `SpawnerError::InvalidConfiguration` otherwise.
pub fn check_range(range: f32) -> SpawnerResult<()> {
    if range.is_finite() && range > 0.0 && range <= MAX_RANGE {
        Ok(())
    } else {
        Err(SpawnerError::InvalidConfiguration(format!(
            "range {range} outside (0, {MAX_RANGE}]"
        )))
    }
}

/// Checks that a spawn interval is positive.
///
/// # Errors
///
/// Returns `SpawnerError::InvalidConfiguration` for zero.
pub fn check_interval(interval_ms: u64) -> SpawnerResult<()> {
    if interval_ms == 0 {
        return Err(SpawnerError::InvalidConfiguration(
            "spawn interval must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Per-stack capacity rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    /// Largest allowed stack.
    pub max_stack_size: u32,
    /// Slots per stacked spawner.
    pub slots_per_stack: u64,
    /// Resource units per stacked spawner.
    pub resource_per_stack: u64,
}

impl Capacity {
    /// Inventory slots of a spawner with `stack` stacked spawners.
    #[inline]
    #[must_use]
    pub fn max_slots(&self, stack: u32) -> u64 {
        self.slots_per_stack.saturating_mul(u64::from(stack))
    }

    /// Resource capacity of a spawner with `stack` stacked spawners.
    #[inline]
    #[must_use]
    pub fn max_resource(&self, stack: u32) -> u64 {
        self.resource_per_stack.saturating_mul(u64::from(stack))
    }

    /// Checks `1 <= stack <= max_stack_size`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::StackOutOfRange` otherwise.
    pub fn check_stack(&self, stack: u32) -> SpawnerResult<()> {
        if stack == 0 || stack > self.max_stack_size {
            return Err(SpawnerError::StackOutOfRange {
                requested: stack,
                max: self.max_stack_size,
            });
        }
        Ok(())
    }
}
