//! # Spawner Registry
//!
//! Owns every spawner and wires the pipelines together:
//!
//! ```text
//!                       ┌────────────────────────┐
//!   tick(world, now) ──>│  ActivationScheduler   │── due ──> GenerationPipeline
//!                       └────────────────────────┘
//!   sell / withdraw /   ┌────────────────────────┐
//!   claim / resize ────>│ TransactionCoordinator │
//!                       └────────────────────────┘
//!                 both share one WorkerPool and one RegionExecutors set
//! ```
//!
//! The map itself is read-mostly: lookups and ticks take a read lock and
//! clone the `Arc`s they need, placement and removal take the write lock.

use parking_lot::{Mutex, RwLock};
use spawnvault_economy::{AuditJournal, EconomyData, ItemCatalog, ItemStack, JournalConfig, LootTable};
use spawnvault_shared::{ActorId, Location, SpawnerId};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::activation::{presence_strategy, ActivationScheduler};
use crate::config::SpawnvaultConfig;
use crate::error::{SpawnerError, SpawnerResult};
use crate::events::{EventHub, EventObserver, EventReceiver, Presentation};
use crate::executor::{RegionExecutors, Ticket, WorkerPool};
use crate::gateway::CurrencyGateway;
use crate::generation::{GenerationOutcome, GenerationPipeline};
use crate::spawner::{Spawner, SpawnerConfig, SpawnerSnapshot, SpawnerState, SpawnerView};
use crate::store::SpawnerStore;
use crate::transaction::{ClaimOutcome, ResizeOutcome, SellTicket, TransactionCoordinator, WithdrawOutcome};
use crate::world::WorldQuery;

/// What one registry tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Spawners that became active.
    pub activated: Vec<SpawnerId>,
    /// Spawners that went dormant.
    pub deactivated: Vec<SpawnerId>,
    /// Generation cycles dispatched this tick.
    pub generations: Vec<(SpawnerId, Ticket<GenerationOutcome>)>,
}

/// All spawners of a server, plus the machinery that runs them.
pub struct SpawnerRegistry {
    config: SpawnvaultConfig,
    catalog: Arc<ItemCatalog>,
    spawners: RwLock<HashMap<SpawnerId, Arc<Spawner>>>,
    // Removed since the last persist; their stored snapshots must go too.
    removed: Mutex<BTreeSet<SpawnerId>>,
    next_id: AtomicU64,
    events: Arc<EventHub>,
    scheduler: ActivationScheduler,
    generation: GenerationPipeline,
    transactions: TransactionCoordinator,
}

impl SpawnerRegistry {
    /// Builds a registry and starts its executors.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::InvalidConfiguration` for a bad configuration
    /// or if executor threads cannot be started.
    pub fn new(
        config: SpawnvaultConfig,
        data: EconomyData,
        gateway: Arc<dyn CurrencyGateway>,
        presentation: Arc<dyn Presentation>,
    ) -> SpawnerResult<Self> {
        let config = config.validated()?;
        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        let regions = Arc::new(RegionExecutors::new(config.region_executors)?);
        let events = Arc::new(EventHub::new(config.event_capacity));

        let loot_tables: HashMap<String, Arc<LootTable>> = data
            .loot_tables
            .into_iter()
            .map(|(key, table)| (key, Arc::new(table)))
            .collect();

        let scheduler = ActivationScheduler::new(
            presence_strategy(config.presence_strategy),
            Arc::clone(&presentation),
            Arc::clone(&events),
        );
        let generation = GenerationPipeline::new(
            Arc::clone(&pool),
            Arc::clone(&regions),
            loot_tables,
            config.rng_seed,
            Arc::clone(&events),
            Arc::clone(&presentation),
        );
        let transactions = TransactionCoordinator::new(
            &config,
            pool,
            regions,
            Arc::clone(&events),
            presentation,
            Arc::new(data.prices),
            gateway,
        );

        tracing::info!(
            "spawner registry ready: {} workers, {} region executors, {} presence",
            config.worker_threads,
            config.region_executors,
            scheduler.strategy_name()
        );

        Ok(Self {
            config,
            catalog: Arc::new(data.catalog),
            spawners: RwLock::new(HashMap::new()),
            removed: Mutex::new(BTreeSet::new()),
            next_id: AtomicU64::new(1),
            events,
            scheduler,
            generation,
            transactions,
        })
    }

    /// Appends committed transactions to `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<AuditJournal>) -> Self {
        self.transactions = self.transactions.with_journal(journal);
        self
    }

    /// Opens the audit journal at `path` and appends committed transactions to it.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::Economy` if the journal cannot be opened.
    pub fn open_journal(self, path: impl AsRef<Path>, config: JournalConfig) -> SpawnerResult<Self> {
        let journal = AuditJournal::open(path, config)?;
        Ok(self.with_journal(Arc::new(journal)))
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SpawnvaultConfig {
        &self.config
    }

    /// Registers a pre-event observer.
    pub fn observe(&self, observer: Arc<dyn EventObserver>) {
        self.events.observe(observer);
    }

    /// A consumer handle for post-events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Places a new spawner using the configured interval and range.
    ///
    /// # Errors
    ///
    /// `SpawnerError::StackOutOfRange` for a bad stack size,
    /// `SpawnerError::InvalidConfiguration` if no loot table exists for `entity`.
    pub fn place(&self, location: Location, entity: &str, stack_size: u32) -> SpawnerResult<Arc<Spawner>> {
        let capacity = self.config.capacity();
        capacity.check_stack(stack_size)?;
        if !self.generation.has_table(entity) {
            return Err(SpawnerError::InvalidConfiguration(format!("no loot table for {entity}")));
        }

        let id = SpawnerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let config = SpawnerConfig {
            id,
            location,
            entity: entity.to_string(),
            loot_table: entity.to_string(),
            spawn_interval_ms: self.config.default_spawn_interval_ms,
            range: self.config.default_range,
        };
        let state = SpawnerState::new(Arc::clone(&self.catalog), &capacity, stack_size);
        let spawner = Arc::new(Spawner::new(config, state));
        self.spawners.write().insert(id, Arc::clone(&spawner));

        tracing::info!("{id} placed: {entity} x{stack_size} at {:?}", location.position);
        Ok(spawner)
    }

    /// Removes a spawner, cancelling its generation task first.
    ///
    /// The stored snapshot is deleted by the next [`Self::persist_modified`].
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::UnknownSpawner` if `id` is not registered.
    pub fn remove(&self, id: SpawnerId) -> SpawnerResult<Arc<Spawner>> {
        self.scheduler.deactivate(id);
        let spawner = self
            .spawners
            .write()
            .remove(&id)
            .ok_or(SpawnerError::UnknownSpawner(id))?;
        self.removed.lock().insert(id);
        tracing::info!("{id} removed");
        Ok(spawner)
    }

    /// A registered spawner.
    #[must_use]
    pub fn get(&self, id: SpawnerId) -> Option<Arc<Spawner>> {
        self.spawners.read().get(&id).cloned()
    }

    /// Presentation copy of a spawner.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::UnknownSpawner` if `id` is not registered.
    pub fn view(&self, id: SpawnerId) -> SpawnerResult<SpawnerView> {
        Ok(self.lookup(id)?.view())
    }

    /// Number of spawners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spawners.read().len()
    }

    /// True if no spawner is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spawners.read().is_empty()
    }

    /// Number of spawners with a live generation task.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.scheduler.active_count()
    }

    fn lookup(&self, id: SpawnerId) -> SpawnerResult<Arc<Spawner>> {
        self.get(id).ok_or(SpawnerError::UnknownSpawner(id))
    }

    fn all(&self) -> Vec<Arc<Spawner>> {
        let mut spawners: Vec<_> = self.spawners.read().values().cloned().collect();
        spawners.sort_by_key(|spawner| spawner.id());
        spawners
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Runs one activation tick and dispatches every due generation cycle.
    pub fn tick(&self, world: &dyn WorldQuery, now_ms: u64) -> TickReport {
        let report = self.scheduler.tick(world, &self.all(), now_ms);
        let generations = report
            .due
            .into_iter()
            .map(|due| {
                let id = due.spawner.id();
                (id, self.generation.dispatch(due.spawner, due.token, now_ms))
            })
            .collect();

        TickReport {
            activated: report.activated,
            deactivated: report.deactivated,
            generations,
        }
    }

    /// Puts every spawner to sleep.
    pub fn deactivate_all(&self) -> usize {
        self.all()
            .iter()
            .filter(|spawner| self.scheduler.deactivate(spawner.id()))
            .count()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Sells the content of spawner `id` for `actor`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::UnknownSpawner` if `id` is not registered.
    pub fn sell(&self, id: SpawnerId, actor: ActorId) -> SpawnerResult<SellTicket> {
        Ok(self.transactions.sell(&self.lookup(id)?, actor))
    }

    /// Withdraws `items` from spawner `id` for `actor`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::UnknownSpawner` if `id` is not registered.
    pub fn withdraw(&self, id: SpawnerId, actor: ActorId, items: Vec<ItemStack>) -> SpawnerResult<Ticket<WithdrawOutcome>> {
        Ok(self.transactions.withdraw(&self.lookup(id)?, actor, items))
    }

    /// Drains the resource counter of spawner `id` for `actor`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::UnknownSpawner` if `id` is not registered.
    pub fn claim_resource(&self, id: SpawnerId, actor: ActorId) -> SpawnerResult<Ticket<ClaimOutcome>> {
        Ok(self.transactions.claim_resource(&self.lookup(id)?, actor))
    }

    /// Changes the stack size of spawner `id`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::UnknownSpawner` if `id` is not registered.
    pub fn resize_stack(
        &self,
        id: SpawnerId,
        actor: ActorId,
        to: u32,
    ) -> SpawnerResult<Ticket<SpawnerResult<ResizeOutcome>>> {
        Ok(self.transactions.resize_stack(&self.lookup(id)?, actor, to))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Snapshots of every spawner, ordered by id.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SpawnerSnapshot> {
        self.all().iter().map(|spawner| spawner.snapshot()).collect()
    }

    /// Deletes removed spawners from `store`, then saves every modified
    /// spawner in one batch. Returns how many were saved.
    ///
    /// # Errors
    ///
    /// Propagates the store error. Pending deletions and modified flags
    /// are kept for the next attempt.
    pub fn persist_modified(&self, store: &dyn SpawnerStore) -> SpawnerResult<usize> {
        self.delete_removed(store)?;

        let modified: Vec<Arc<Spawner>> = self
            .all()
            .into_iter()
            .filter(|spawner| {
                let mut state = spawner.write_state();
                std::mem::replace(&mut state.modified, false)
            })
            .collect();
        if modified.is_empty() {
            return Ok(0);
        }

        let snapshots: Vec<SpawnerSnapshot> = modified.iter().map(|spawner| spawner.snapshot()).collect();
        if let Err(err) = store.save_all(&snapshots) {
            for spawner in &modified {
                spawner.write_state().modified = true;
            }
            tracing::warn!("persisting {} spawners failed: {err}", modified.len());
            return Err(err);
        }

        tracing::info!("persisted {} spawners", snapshots.len());
        Ok(snapshots.len())
    }

    fn delete_removed(&self, store: &dyn SpawnerStore) -> SpawnerResult<()> {
        let removed = std::mem::take(&mut *self.removed.lock());
        let mut pending = removed.iter();
        while let Some(&id) = pending.next() {
            if let Err(err) = store.delete(id) {
                let mut retry = self.removed.lock();
                retry.insert(id);
                retry.extend(pending);
                tracing::warn!("deleting {id} from store failed: {err}");
                return Err(err);
            }
        }
        if !removed.is_empty() {
            tracing::info!("deleted {} removed spawners from store", removed.len());
        }
        Ok(())
    }

    /// Restores spawners from `store`. Records that no longer fit the
    /// configuration are skipped with a warning. Returns how many loaded.
    ///
    /// # Errors
    ///
    /// Propagates a store read failure.
    pub fn load_from(&self, store: &dyn SpawnerStore) -> SpawnerResult<usize> {
        let capacity = self.config.capacity();
        let mut loaded = 0;

        for snapshot in store.load_all()? {
            let id = snapshot.config.id;
            if !self.generation.has_table(&snapshot.config.loot_table) {
                tracing::warn!("{id}: skipped, unknown loot table {:?}", snapshot.config.loot_table);
                continue;
            }
            let spawner = match Spawner::from_snapshot(snapshot, Arc::clone(&self.catalog), &capacity) {
                Ok(spawner) => spawner,
                Err(err) => {
                    tracing::warn!("{id}: skipped: {err}");
                    continue;
                }
            };

            self.next_id.fetch_max(id.0 + 1, Ordering::Relaxed);
            self.removed.lock().remove(&id);
            if let Some(previous) = self.spawners.write().insert(id, Arc::new(spawner)) {
                self.scheduler.deactivate(previous.id());
            }
            loaded += 1;
        }

        tracing::info!("loaded {loaded} spawners");
        Ok(loaded)
    }
}

impl std::fmt::Debug for SpawnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnerRegistry")
            .field("spawners", &self.len())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}
