//! # Generation Pipeline
//!
//! One cycle, split across the two executors:
//!
//! ```text
//! scheduler tick ──> dispatch ──> [worker]  roll LootBatch (per-cycle RNG)
//!                                    │
//!                                    └──> [region lane] commit_batch:
//!                                           token live?  lock free?  observers ok?
//!                                           top up resource, insert_trimmed
//! ```
//!
//! A cycle never blocks: if the spawner is busy it is skipped, and a
//! saturated spawner skips before any loot is rolled.

use spawnvault_economy::{cycle_rng, LootBatch, LootGenerator, LootTable};
use std::collections::HashMap;
use std::sync::Arc;

use crate::events::{EventHub, PreEvent, Presentation, SpawnerEvent};
use crate::executor::{CancelToken, RegionExecutors, Ticket, WorkerPool};
use crate::spawner::Spawner;

/// What happened to one generation cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Loot was stored (possibly trimmed).
    Generated {
        /// Mobs simulated.
        mob_count: u64,
        /// Resource added after capping.
        resource_added: u64,
        /// Items stored.
        items_accepted: u64,
        /// Items trimmed away.
        items_dropped: u64,
    },
    /// Resource counter and inventory were both full.
    SkippedSaturated,
    /// Another operation held the spawner lock.
    SkippedBusy,
    /// The task was cancelled or an observer vetoed the cycle.
    Cancelled,
    /// The spawner references an unknown loot table.
    MissingLootTable,
}

/// Runs generation cycles for due spawners.
pub struct GenerationPipeline {
    pool: Arc<WorkerPool>,
    regions: Arc<RegionExecutors>,
    loot_tables: HashMap<String, Arc<LootTable>>,
    master_seed: u64,
    events: Arc<EventHub>,
    presentation: Arc<dyn Presentation>,
}

impl GenerationPipeline {
    /// Creates a pipeline over shared executors.
    #[must_use]
    pub fn new(
        pool: Arc<WorkerPool>,
        regions: Arc<RegionExecutors>,
        loot_tables: HashMap<String, Arc<LootTable>>,
        master_seed: u64,
        events: Arc<EventHub>,
        presentation: Arc<dyn Presentation>,
    ) -> Self {
        Self {
            pool,
            regions,
            loot_tables,
            master_seed,
            events,
            presentation,
        }
    }

    /// True if a loot table is registered under `key`.
    #[must_use]
    pub fn has_table(&self, key: &str) -> bool {
        self.loot_tables.contains_key(key)
    }

    /// Starts one cycle. The ticket resolves after the region commit.
    pub fn dispatch(&self, spawner: Arc<Spawner>, token: CancelToken, now_ms: u64) -> Ticket<GenerationOutcome> {
        let id = spawner.id();
        let Some(table) = self.loot_tables.get(&spawner.config().loot_table).cloned() else {
            tracing::warn!("{id}: no loot table {:?}", spawner.config().loot_table);
            return Ticket::ready(GenerationOutcome::MissingLootTable);
        };

        let stack_size = {
            let state = spawner.read_state();
            if state.is_saturated() {
                tracing::debug!("{id}: saturated, cycle skipped");
                return Ticket::ready(GenerationOutcome::SkippedSaturated);
            }
            state.stack_size
        };

        let cycle = spawner.next_cycle();
        let seed = self.master_seed;
        let regions = Arc::clone(&self.regions);
        let events = Arc::clone(&self.events);
        let presentation = Arc::clone(&self.presentation);
        let (completion, ticket) = Ticket::pair();

        let queued = self.pool.execute(move || {
            let batch = LootGenerator::generate(&table, stack_size, &mut cycle_rng(seed, id.0, cycle));
            let region = spawner.config().location.region();
            let submitted = regions.submit(region, move || {
                let outcome = commit_batch(&spawner, &batch, &token, &events, presentation.as_ref(), now_ms);
                completion.complete(outcome);
            });
            if let Err(err) = submitted {
                tracing::warn!("{id}: generation commit not queued: {err}");
            }
        });
        if let Err(err) = queued {
            tracing::warn!("{id}: generation not queued: {err}");
        }

        ticket
    }
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("loot_tables", &self.loot_tables.len())
            .finish_non_exhaustive()
    }
}

/// Stores a rolled batch. Must run on the spawner's region executor.
pub fn commit_batch(
    spawner: &Arc<Spawner>,
    batch: &LootBatch,
    token: &CancelToken,
    events: &EventHub,
    presentation: &dyn Presentation,
    now_ms: u64,
) -> GenerationOutcome {
    let id = spawner.id();
    if token.is_cancelled() {
        return GenerationOutcome::Cancelled;
    }
    let Some(guard) = spawner.try_lock() else {
        tracing::debug!("{id}: busy, cycle skipped");
        return GenerationOutcome::SkippedBusy;
    };
    let pending = PreEvent::GenerationPending {
        spawner: id,
        mob_count: batch.mob_count,
        item_total: batch.total_items(),
    };
    if !events.allow(&pending) {
        return GenerationOutcome::Cancelled;
    }

    let outcome = {
        let mut state = guard.state();
        // Deactivation cancels before it writes, so a token still live
        // here orders this commit before any new activation baseline.
        if token.is_cancelled() {
            return GenerationOutcome::Cancelled;
        }
        if state.is_saturated() {
            tracing::debug!("{id}: saturated, cycle skipped");
            return GenerationOutcome::SkippedSaturated;
        }

        let before = state.resource;
        state.resource = before.saturating_add(batch.resource).min(state.max_resource);
        let resource_added = state.resource - before;
        let report = state.inventory.insert_trimmed(&batch.items);

        if report.is_partial() || resource_added < batch.resource {
            state.capacity_reached = true;
        }
        state.last_generation_ms = now_ms;
        state.modified = true;

        GenerationOutcome::Generated {
            mob_count: batch.mob_count,
            resource_added,
            items_accepted: report.accepted_amount,
            items_dropped: report.dropped_amount,
        }
    };
    drop(guard);

    if let GenerationOutcome::Generated {
        mob_count,
        resource_added,
        items_accepted,
        items_dropped,
    } = outcome
    {
        presentation.notify_inventory_changed(id);
        events.publish(SpawnerEvent::GenerationOccurred {
            spawner: id,
            mob_count,
            resource_added,
            items_accepted,
            items_dropped,
        });
    }
    outcome
}
