//! # Activation Scheduler
//!
//! **Spawners only work while someone is watching**
//!
//! Every activation tick the scheduler asks its [`PresenceStrategy`] which
//! spawners have a qualifying actor within range, then applies the
//! transitions:
//!
//! ```text
//!            actor within range
//!   Dormant ────────────────────> Active   register periodic task
//!      ^                             │     last_generation = now + interval
//!      └─────────────────────────────┘
//!            nobody in range               cancel token, drop task
//! ```
//!
//! Re-evaluating a spawner already in the right state does nothing.
//!
//! The same tick reports which active spawners are due for generation;
//! the caller dispatches them. A deactivation cancels the task's token
//! before returning, so a cycle already in flight never commits.
//!
//! ## Scheduler-owned fields
//!
//! `activation` and the `last_generation_ms` baseline are written here,
//! on the ticking thread, without the exclusive lock or the region lane.
//! Cancellation has to be visible when `tick` returns, and an in-flight
//! sale must not delay it. Nothing else writes `activation`; generation
//! commits re-check their token under the state write lock, so a
//! cancelled cycle cannot overwrite a newer baseline.

use parking_lot::Mutex;
use spawnvault_shared::{ChunkCoord, SpawnerId, Vec3, WorldId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PresenceStrategyKind;
use crate::events::{EventHub, Presentation, SpawnerEvent};
use crate::executor::CancelToken;
use crate::spawner::{ActivationState, Spawner};
use crate::world::{within_range, WorldQuery};

/// Decides, for a batch of spawners, whether anyone qualifying is near.
pub trait PresenceStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// One presence flag per spawner, in input order.
    fn evaluate(&self, world: &dyn WorldQuery, spawners: &[Arc<Spawner>]) -> Vec<bool>;
}

/// Fetches qualifying actors once per world, then scans linearly.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchScan;

impl PresenceStrategy for BatchScan {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn evaluate(&self, world: &dyn WorldQuery, spawners: &[Arc<Spawner>]) -> Vec<bool> {
        let mut positions: HashMap<WorldId, Vec<Vec3>> = HashMap::new();

        spawners
            .iter()
            .map(|spawner| {
                let config = spawner.config();
                let actors = positions.entry(config.location.world).or_insert_with(|| {
                    world
                        .qualifying_actors(config.location.world)
                        .into_iter()
                        .map(|actor| actor.position)
                        .collect()
                });
                actors
                    .iter()
                    .any(|&position| within_range(config.location.position, position, config.range))
            })
            .collect()
    }
}

/// Visits the loaded chunk cells under each spawner's range footprint.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpatialIndexScan;

impl PresenceStrategy for SpatialIndexScan {
    fn name(&self) -> &'static str {
        "spatial"
    }

    fn evaluate(&self, world: &dyn WorldQuery, spawners: &[Arc<Spawner>]) -> Vec<bool> {
        spawners
            .iter()
            .map(|spawner| {
                let config = spawner.config();
                let location = config.location;
                ChunkCoord::covering(location.position, config.range)
                    .into_iter()
                    .filter(|&cell| world.is_cell_loaded(location.world, cell))
                    .any(|cell| {
                        world.actors_in_cell(location.world, cell).iter().any(|actor| {
                            actor.world == location.world
                                && actor.qualifies()
                                && within_range(location.position, actor.position, config.range)
                        })
                    })
            })
            .collect()
    }
}

/// Builds the strategy selected by configuration.
#[must_use]
pub fn presence_strategy(kind: PresenceStrategyKind) -> Box<dyn PresenceStrategy> {
    match kind {
        PresenceStrategyKind::Batch => Box::new(BatchScan),
        PresenceStrategyKind::Spatial => Box::new(SpatialIndexScan),
    }
}

#[derive(Debug)]
struct PeriodicTask {
    spawner: Arc<Spawner>,
    next_due_ms: u64,
    interval_ms: u64,
    token: CancelToken,
}

/// A generation cycle that should run now.
#[derive(Debug)]
pub struct DueGeneration {
    /// Spawner to generate for.
    pub spawner: Arc<Spawner>,
    /// Token of the task that scheduled it.
    pub token: CancelToken,
}

/// Result of one scheduler tick.
#[derive(Debug, Default)]
pub struct ActivationReport {
    /// Spawners that became active.
    pub activated: Vec<SpawnerId>,
    /// Spawners that became dormant.
    pub deactivated: Vec<SpawnerId>,
    /// Generation cycles due this tick.
    pub due: Vec<DueGeneration>,
}

/// Dormant/Active state machine for every spawner.
pub struct ActivationScheduler {
    strategy: Box<dyn PresenceStrategy>,
    tasks: Mutex<HashMap<SpawnerId, PeriodicTask>>,
    presentation: Arc<dyn Presentation>,
    events: Arc<EventHub>,
}

impl ActivationScheduler {
    /// Creates a scheduler using `strategy`.
    #[must_use]
    pub fn new(
        strategy: Box<dyn PresenceStrategy>,
        presentation: Arc<dyn Presentation>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            strategy,
            tasks: Mutex::new(HashMap::new()),
            presentation,
            events,
        }
    }

    /// Name of the presence strategy in use.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Evaluates presence, applies transitions and collects due cycles.
    pub fn tick(&self, world: &dyn WorldQuery, spawners: &[Arc<Spawner>], now_ms: u64) -> ActivationReport {
        let presence = self.strategy.evaluate(world, spawners);
        let mut report = ActivationReport::default();

        for (spawner, present) in spawners.iter().zip(presence) {
            let scheduled = self.is_scheduled(spawner.id());
            if present && !scheduled {
                self.activate(spawner, now_ms);
                report.activated.push(spawner.id());
            } else if !present && scheduled && self.deactivate(spawner.id()) {
                report.deactivated.push(spawner.id());
            }
        }

        let mut tasks = self.tasks.lock();
        for task in tasks.values_mut() {
            if task.next_due_ms <= now_ms {
                report.due.push(DueGeneration {
                    spawner: Arc::clone(&task.spawner),
                    token: task.token.clone(),
                });
                let behind = (now_ms - task.next_due_ms) / task.interval_ms;
                task.next_due_ms += (behind + 1) * task.interval_ms;
            }
        }

        report
    }

    fn activate(&self, spawner: &Arc<Spawner>, now_ms: u64) {
        let interval_ms = spawner.config().spawn_interval_ms.max(1);
        let next_due_ms = now_ms + interval_ms;

        {
            let mut state = spawner.write_state();
            state.activation = ActivationState::Active;
            state.last_generation_ms = next_due_ms;
        }
        self.tasks.lock().insert(
            spawner.id(),
            PeriodicTask {
                spawner: Arc::clone(spawner),
                next_due_ms,
                interval_ms,
                token: CancelToken::new(),
            },
        );

        tracing::info!("{} activated, first cycle at {next_due_ms}", spawner.id());
        self.presentation
            .notify_activation_changed(spawner.id(), ActivationState::Active);
        self.events.publish(SpawnerEvent::ActivationChanged {
            spawner: spawner.id(),
            state: ActivationState::Active,
        });
    }

    /// Cancels a spawner's periodic task. Returns `false` if none was registered.
    pub fn deactivate(&self, id: SpawnerId) -> bool {
        let Some(task) = self.tasks.lock().remove(&id) else {
            return false;
        };
        task.token.cancel();
        task.spawner.write_state().activation = ActivationState::Dormant;

        tracing::info!("{id} deactivated");
        self.presentation
            .notify_activation_changed(id, ActivationState::Dormant);
        self.events.publish(SpawnerEvent::ActivationChanged {
            spawner: id,
            state: ActivationState::Dormant,
        });
        true
    }

    /// True if the spawner has a live periodic task.
    #[must_use]
    pub fn is_scheduled(&self, id: SpawnerId) -> bool {
        self.tasks.lock().contains_key(&id)
    }

    /// Number of active spawners.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl std::fmt::Debug for ActivationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationScheduler")
            .field("strategy", &self.strategy.name())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpawnvaultConfig;
    use crate::events::NullPresentation;
    use crate::generation::{commit_batch, GenerationOutcome};
    use crate::spawner::{SpawnerConfig, SpawnerState};
    use crate::world::{Actor, MemoryWorld};
    use spawnvault_economy::{ItemCatalog, LootBatch};
    use spawnvault_shared::{ActorId, Location};

    fn spawner_at(id: u64, x: f32, interval_ms: u64) -> Arc<Spawner> {
        let capacity = SpawnvaultConfig::default().capacity();
        Arc::new(Spawner::new(
            SpawnerConfig {
                id: SpawnerId(id),
                location: Location::new(WorldId(0), Vec3::new(x, 64.0, 0.0)),
                entity: "zombie".to_string(),
                loot_table: "zombie".to_string(),
                spawn_interval_ms: interval_ms,
                range: 16.0,
            },
            SpawnerState::new(Arc::new(ItemCatalog::new()), &capacity, 1),
        ))
    }

    fn scheduler(kind: PresenceStrategyKind) -> ActivationScheduler {
        ActivationScheduler::new(
            presence_strategy(kind),
            Arc::new(NullPresentation),
            Arc::new(EventHub::new(64)),
        )
    }

    #[test]
    fn test_activation_follows_range() {
        for kind in [PresenceStrategyKind::Batch, PresenceStrategyKind::Spatial] {
            let world = MemoryWorld::new();
            let scheduler = scheduler(kind);
            let spawners = vec![spawner_at(1, 0.0, 1_000)];

            world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(15.9, 64.0, 0.0)));
            let report = scheduler.tick(&world, &spawners, 0);
            assert_eq!(report.activated, vec![SpawnerId(1)], "{}", scheduler.strategy_name());
            assert_eq!(spawners[0].view().activation, ActivationState::Active);

            world.move_actor(ActorId(1), Vec3::new(16.1, 64.0, 0.0));
            let report = scheduler.tick(&world, &spawners, 100);
            assert_eq!(report.deactivated, vec![SpawnerId(1)]);
            assert_eq!(spawners[0].view().activation, ActivationState::Dormant);
        }
    }

    #[test]
    fn test_reevaluation_is_idempotent() {
        let world = MemoryWorld::new();
        let scheduler = scheduler(PresenceStrategyKind::Batch);
        let spawners = vec![spawner_at(1, 0.0, 1_000)];
        world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(3.0, 64.0, 0.0)));

        assert_eq!(scheduler.tick(&world, &spawners, 0).activated.len(), 1);
        let again = scheduler.tick(&world, &spawners, 10);
        assert!(again.activated.is_empty() && again.deactivated.is_empty());
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn test_first_cycle_waits_one_interval() {
        let world = MemoryWorld::new();
        let scheduler = scheduler(PresenceStrategyKind::Batch);
        let spawners = vec![spawner_at(1, 0.0, 1_000)];
        world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(3.0, 64.0, 0.0)));

        assert!(scheduler.tick(&world, &spawners, 5_000).due.is_empty());
        assert_eq!(spawners[0].view().activation, ActivationState::Active);
        assert_eq!(spawners[0].read_state().last_generation_ms, 6_000);
        assert!(scheduler.tick(&world, &spawners, 5_999).due.is_empty());
        assert_eq!(scheduler.tick(&world, &spawners, 6_000).due.len(), 1);
        assert!(scheduler.tick(&world, &spawners, 6_500).due.is_empty());
        assert_eq!(scheduler.tick(&world, &spawners, 9_700).due.len(), 1);
        assert!(scheduler.tick(&world, &spawners, 9_900).due.is_empty());
        assert_eq!(scheduler.tick(&world, &spawners, 10_000).due.len(), 1);
    }

    #[test]
    fn test_deactivation_cancels_in_flight_token() {
        let world = MemoryWorld::new();
        let scheduler = scheduler(PresenceStrategyKind::Spatial);
        let spawners = vec![spawner_at(1, 0.0, 1_000)];
        world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(3.0, 64.0, 0.0)));

        scheduler.tick(&world, &spawners, 0);
        let due = scheduler.tick(&world, &spawners, 1_000).due;
        assert_eq!(due.len(), 1);

        world.remove_actor(ActorId(1));
        scheduler.tick(&world, &spawners, 1_001);
        assert!(due[0].token.is_cancelled());
        assert!(scheduler.tick(&world, &spawners, 5_000).due.is_empty());
    }

    #[test]
    fn test_transitions_ignore_exclusive_lock_and_stale_cycles() {
        let world = MemoryWorld::new();
        let scheduler = scheduler(PresenceStrategyKind::Batch);
        let spawners = vec![spawner_at(1, 0.0, 1_000)];
        world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(3.0, 64.0, 0.0)));

        scheduler.tick(&world, &spawners, 0);
        let stale = scheduler.tick(&world, &spawners, 1_000).due.remove(0);

        // A sale in flight holds the lock; the transition still lands at once.
        let guard = spawners[0].try_lock().unwrap();
        world.remove_actor(ActorId(1));
        assert_eq!(scheduler.tick(&world, &spawners, 1_100).deactivated, vec![SpawnerId(1)]);
        assert_eq!(spawners[0].view().activation, ActivationState::Dormant);
        assert!(spawners[0].is_locked());
        drop(guard);

        world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(3.0, 64.0, 0.0)));
        scheduler.tick(&world, &spawners, 1_500);
        assert_eq!(spawners[0].read_state().last_generation_ms, 2_500);

        let batch = LootBatch {
            mob_count: 2,
            resource: 4,
            items: Vec::new(),
            rolls: Vec::new(),
        };
        let hub = EventHub::new(8);
        let outcome = commit_batch(&stale.spawner, &batch, &stale.token, &hub, &NullPresentation, 1_000);
        assert_eq!(outcome, GenerationOutcome::Cancelled);
        let state = spawners[0].read_state();
        assert_eq!(state.last_generation_ms, 2_500);
        assert_eq!(state.resource, 0);
        assert_eq!(state.activation, ActivationState::Active);
    }

    #[test]
    fn test_unloaded_cells_are_skipped() {
        struct Unloaded(MemoryWorld);

        impl WorldQuery for Unloaded {
            fn qualifying_actors(&self, world: WorldId) -> Vec<Actor> {
                self.0.qualifying_actors(world)
            }
            fn actors_in_cell(&self, world: WorldId, cell: ChunkCoord) -> Vec<Actor> {
                self.0.actors_in_cell(world, cell)
            }
            fn is_cell_loaded(&self, _world: WorldId, _cell: ChunkCoord) -> bool {
                false
            }
        }

        let world = Unloaded(MemoryWorld::new());
        world.0.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(3.0, 64.0, 0.0)));
        let spawners = vec![spawner_at(1, 0.0, 1_000)];

        assert_eq!(SpatialIndexScan.evaluate(&world, &spawners), vec![false]);
        assert_eq!(BatchScan.evaluate(&world, &spawners), vec![true]);
    }
}
