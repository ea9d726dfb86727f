//! # Spawnvault
//!
//! Concurrent runtime for spawner resource generators.
//!
//! A spawner sits at a world location, produces loot into a
//! capacity-limited virtual inventory while an actor is nearby, and lets
//! actors withdraw, restack or sell what it stored.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────── SpawnerRegistry ─────────────────────────────┐
//! │                                                                            │
//! │  ActivationScheduler ──due──> GenerationPipeline                           │
//! │  (batch | spatial scan)        roll on WorkerPool, commit on region lane   │
//! │                                                                            │
//! │  TransactionCoordinator                                                    │
//! │  sell: lock ─> quote on WorkerPool ─> validate, deposit, remove on lane    │
//! │                                                                            │
//! └───── WorldQuery ──── CurrencyGateway ──── Presentation ──── SpawnerStore ──┘
//! ```
//!
//! ## Rules
//!
//! 1. **One writer per spawner** - an exclusive, non-blocking lock token
//! 2. **Region affinity** - every commit and every gateway call runs on the
//!    spawner's region executor
//! 3. **Validate, then pay, then remove** - nothing leaves the inventory
//!    before the deposit succeeded
//! 4. **Busy is not an error** - contention surfaces as an outcome variant
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use spawnvault::{
//!     Actor, MemoryLedger, MemoryWorld, NullPresentation, SpawnerRegistry, SpawnvaultConfig,
//! };
//! use spawnvault_economy::EconomyData;
//! use spawnvault_shared::{ActorId, Location, Vec3, WorldId};
//!
//! let data = EconomyData::load_file("data/economy.toml")?;
//! let registry = SpawnerRegistry::new(
//!     SpawnvaultConfig::default(),
//!     data,
//!     Arc::new(MemoryLedger::new()),
//!     Arc::new(NullPresentation),
//! )?;
//!
//! let spawner = registry.place(Location::new(WorldId(0), Vec3::new(0.0, 64.0, 0.0)), "skeleton", 1)?;
//! let world = MemoryWorld::new();
//! world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(3.0, 64.0, 0.0)));
//! registry.tick(&world, spawnvault::now_ms());
//!
//! let outcome = registry.sell(spawner.id(), ActorId(1))?.wait(Duration::from_secs(5))?;
//! println!("{outcome:?}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod activation;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod gateway;
pub mod generation;
pub mod registry;
pub mod spawner;
pub mod store;
pub mod transaction;
pub mod world;

pub use activation::{presence_strategy, ActivationReport, ActivationScheduler, BatchScan, PresenceStrategy, SpatialIndexScan};
pub use config::{Capacity, PresenceStrategyKind, SpawnvaultConfig};
pub use error::{SpawnerError, SpawnerResult};
pub use events::{
    ChannelPresentation, EventBus, EventHub, EventObserver, EventReceiver, EventSender, NullPresentation, PreEvent,
    Presentation, PresentationUpdate, SpawnerEvent, Verdict,
};
pub use executor::{CancelToken, Completion, RegionExecutors, Ticket, WorkerPool};
pub use gateway::{CurrencyGateway, DepositError, MemoryLedger};
pub use generation::{GenerationOutcome, GenerationPipeline};
pub use registry::{SpawnerRegistry, TickReport};
pub use spawner::{ActivationState, Spawner, SpawnerConfig, SpawnerGuard, SpawnerSnapshot, SpawnerState, SpawnerView};
pub use store::{MemoryStore, SpawnerStore};
pub use transaction::{ClaimOutcome, ResizeOutcome, SellOutcome, SellTicket, TransactionCoordinator, WithdrawOutcome};
pub use world::{within_range, Actor, MemoryWorld, WorldQuery};

/// Wall-clock time in epoch milliseconds, the time base of every spawner timestamp.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
