//! # Spawner Records
//!
//! A spawner is split three ways:
//!
//! | Part | Mutability | Guarded by |
//! |------|------------|------------|
//! | [`SpawnerConfig`] | immutable | nothing |
//! | [`SpawnerState`] | mutable | exclusive [`SpawnerGuard`] + short `RwLock` sections |
//! | [`SpawnerView`] | derived copy | nothing (may be stale) |
//!
//! ## Exclusive lock
//!
//! Generation commits, sells, withdrawals and resizes are serialized by an
//! ownership token acquired with a non-blocking compare-exchange. The
//! [`SpawnerGuard`] returned by [`Spawner::try_lock`] owns an `Arc` to the
//! spawner, so it can travel from the caller thread to a worker and then
//! to the region executor. Dropping it releases the token.
//!
//! The `RwLock` around the state is only held for the few instructions of
//! a read or a write, never across a gateway call.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use spawnvault_economy::{ItemCatalog, ItemStack, VirtualInventory};
use spawnvault_shared::{Location, SpawnerId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{check_interval, check_range, Capacity};
use crate::error::{SpawnerError, SpawnerResult};

/// Page size used by [`SpawnerView`].
pub const VIEW_PAGE_SIZE: usize = 45;

/// Activation state of a spawner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// No generation task, no presence overhead.
    #[default]
    Dormant,
    /// A periodic generation task is registered.
    Active,
}

/// Immutable part of a spawner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnerConfig {
    /// Unique id.
    pub id: SpawnerId,
    /// Where the spawner sits.
    pub location: Location,
    /// Entity kind it simulates.
    pub entity: String,
    /// Loot table key.
    pub loot_table: String,
    /// Generation interval.
    pub spawn_interval_ms: u64,
    /// Activation range.
    pub range: f32,
}

impl SpawnerConfig {
    /// Checks the activation range and spawn interval.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::InvalidConfiguration` naming the spawner.
    pub fn validate(&self) -> SpawnerResult<()> {
        check_range(self.range)
            .and_then(|()| check_interval(self.spawn_interval_ms))
            .map_err(|err| match err {
                SpawnerError::InvalidConfiguration(reason) => {
                    SpawnerError::InvalidConfiguration(format!("{}: {reason}", self.id))
                }
                other => other,
            })
    }
}

/// Mutable part of a spawner.
#[derive(Clone, Debug)]
pub struct SpawnerState {
    /// Stacked spawners, `1..=max_stack_size`.
    pub stack_size: u32,
    /// Last generation (or the activation baseline), epoch millis.
    pub last_generation_ms: u64,
    /// Stored resource.
    pub resource: u64,
    /// Resource capacity for the current stack size.
    pub max_resource: u64,
    /// Raised when a cycle could not store everything it produced.
    pub capacity_reached: bool,
    /// Activation state. Written only by the scheduler, outside the exclusive lock.
    pub activation: ActivationState,
    /// Stored loot.
    pub inventory: VirtualInventory,
    /// Needs persisting.
    pub modified: bool,
}

impl SpawnerState {
    /// Fresh state for a newly placed spawner.
    #[must_use]
    pub fn new(catalog: Arc<ItemCatalog>, capacity: &Capacity, stack_size: u32) -> Self {
        Self {
            stack_size,
            last_generation_ms: 0,
            resource: 0,
            max_resource: capacity.max_resource(stack_size),
            capacity_reached: false,
            activation: ActivationState::Dormant,
            inventory: VirtualInventory::new(catalog, capacity.max_slots(stack_size)),
            modified: true,
        }
    }

    /// True when neither the resource counter nor the inventory can take more.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.resource >= self.max_resource && self.inventory.is_full()
    }
}

/// A located resource generator.
#[derive(Debug)]
pub struct Spawner {
    config: SpawnerConfig,
    locked: AtomicBool,
    pub(crate) state: RwLock<SpawnerState>,
    cycles: AtomicU64,
}

impl Spawner {
    /// Creates a spawner from its parts.
    #[must_use]
    pub fn new(config: SpawnerConfig, state: SpawnerState) -> Self {
        Self {
            config,
            locked: AtomicBool::new(false),
            state: RwLock::new(state),
            cycles: AtomicU64::new(0),
        }
    }

    /// Rebuilds a spawner from a persisted snapshot.
    ///
    /// Activation always restarts as dormant; the next scheduler tick
    /// re-evaluates it.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::StackOutOfRange` if the stored stack size is
    /// no longer allowed, `SpawnerError::InvalidConfiguration` for a bad
    /// range or interval.
    pub fn from_snapshot(
        snapshot: SpawnerSnapshot,
        catalog: Arc<ItemCatalog>,
        capacity: &Capacity,
    ) -> SpawnerResult<Self> {
        snapshot.config.validate()?;
        capacity.check_stack(snapshot.stack_size)?;
        let max_resource = capacity.max_resource(snapshot.stack_size);
        let inventory = VirtualInventory::from_stacks(
            catalog,
            capacity.max_slots(snapshot.stack_size),
            &snapshot.items,
        );
        let state = SpawnerState {
            stack_size: snapshot.stack_size,
            last_generation_ms: snapshot.last_generation_ms,
            resource: snapshot.resource.min(max_resource),
            max_resource,
            capacity_reached: snapshot.capacity_reached,
            activation: ActivationState::Dormant,
            inventory,
            modified: false,
        };
        let spawner = Self::new(snapshot.config, state);
        spawner.cycles.store(snapshot.cycles, Ordering::Relaxed);
        Ok(spawner)
    }

    /// Spawner id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SpawnerId {
        self.config.id
    }

    /// Immutable configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SpawnerConfig {
        &self.config
    }

    /// Tries to take the exclusive lock without blocking.
    #[must_use]
    pub fn try_lock(self: &Arc<Self>) -> Option<SpawnerGuard> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpawnerGuard {
                spawner: Arc::clone(self),
            })
    }

    /// True while some operation holds the exclusive lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Short read access to the state.
    pub fn read_state(&self) -> RwLockReadGuard<'_, SpawnerState> {
        self.state.read()
    }

    /// Short write access for scheduler and persistence bookkeeping.
    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, SpawnerState> {
        self.state.write()
    }

    /// Claims the next generation cycle number.
    pub(crate) fn next_cycle(&self) -> u64 {
        self.cycles.fetch_add(1, Ordering::Relaxed)
    }

    /// Point-in-time read model for presentation.
    #[must_use]
    pub fn view(&self) -> SpawnerView {
        let state = self.state.read();
        SpawnerView {
            id: self.config.id,
            entity: self.config.entity.clone(),
            location: self.config.location,
            stack_size: state.stack_size,
            resource: state.resource,
            max_resource: state.max_resource,
            used_slots: state.inventory.used_slots(),
            max_slots: state.inventory.max_slots(),
            total_items: state.inventory.total_items(),
            activation: state.activation,
            capacity_reached: state.capacity_reached,
            busy: self.is_locked(),
            pages: state.inventory.display_view(VIEW_PAGE_SIZE),
        }
    }

    /// Everything needed to rebuild this spawner.
    #[must_use]
    pub fn snapshot(&self) -> SpawnerSnapshot {
        let state = self.state.read();
        SpawnerSnapshot {
            config: self.config.clone(),
            stack_size: state.stack_size,
            last_generation_ms: state.last_generation_ms,
            resource: state.resource,
            capacity_reached: state.capacity_reached,
            activation: state.activation,
            cycles: self.cycles.load(Ordering::Relaxed),
            items: state.inventory.to_stacks(),
        }
    }

    /// True if a committed mutation has not been persisted yet.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.state.read().modified
    }
}

/// Exclusive ownership of a spawner's mutation rights.
///
/// `Send`, so it can be moved into the closure that eventually commits.
#[derive(Debug)]
pub struct SpawnerGuard {
    spawner: Arc<Spawner>,
}

impl SpawnerGuard {
    /// The locked spawner.
    #[inline]
    #[must_use]
    pub fn spawner(&self) -> &Arc<Spawner> {
        &self.spawner
    }

    /// Write access to the state. Keep the returned guard short-lived.
    pub fn state(&self) -> RwLockWriteGuard<'_, SpawnerState> {
        self.spawner.state.write()
    }
}

impl Drop for SpawnerGuard {
    fn drop(&mut self) {
        self.spawner.locked.store(false, Ordering::Release);
    }
}

/// Lock-free, possibly stale copy of a spawner for rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnerView {
    /// Spawner id.
    pub id: SpawnerId,
    /// Entity kind.
    pub entity: String,
    /// Location.
    pub location: Location,
    /// Stack size.
    pub stack_size: u32,
    /// Stored resource.
    pub resource: u64,
    /// Resource capacity.
    pub max_resource: u64,
    /// Used inventory slots.
    pub used_slots: u64,
    /// Inventory capacity.
    pub max_slots: u64,
    /// Total stored items.
    pub total_items: u64,
    /// Activation state.
    pub activation: ActivationState,
    /// Capacity flag.
    pub capacity_reached: bool,
    /// An operation holds the exclusive lock.
    pub busy: bool,
    /// Inventory flattened into stacks, paged.
    pub pages: Vec<Vec<ItemStack>>,
}

/// Persisted form of a spawner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnerSnapshot {
    /// Immutable configuration.
    pub config: SpawnerConfig,
    /// Stack size.
    pub stack_size: u32,
    /// Last generation timestamp, epoch millis.
    pub last_generation_ms: u64,
    /// Stored resource.
    pub resource: u64,
    /// Capacity flag.
    pub capacity_reached: bool,
    /// Activation state when saved.
    pub activation: ActivationState,
    /// Generation cycles run so far (RNG stream position).
    pub cycles: u64,
    /// Stored items.
    pub items: Vec<ItemStack>,
}
