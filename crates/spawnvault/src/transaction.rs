//! # Transaction Coordinator
//!
//! **Every actor-driven mutation of a spawner goes through here.**
//!
//! ## Sell pipeline (validate-then-pay)
//!
//! ```text
//! caller thread        worker pool           region executor
//! ─────────────        ───────────           ───────────────
//! pending-actor check
//! SellPending observers
//! try_lock ──busy──> Busy
//! snapshot inventory ─> price snapshot ───> deadline check
//!                       build SellQuote     re-validate quantities
//!                                           deposit (gateway)
//!                                           remove quoted items
//!                                           events, journal
//! ```
//!
//! The spawner guard travels with the work and is released when the
//! region closure returns. Nothing is removed before the deposit
//! succeeded; a removal that fails after payment is escalated as a
//! removal inconsistency.
//!
//! Withdrawals, resource claims and stack resizes take the same lock and
//! commit on the same region executor.

use parking_lot::Mutex;
use spawnvault_economy::{
    AuditJournal, FixedPoint, ItemSignature, ItemStack, PricingSource, RecordKind, SellQuote, TradeRecord,
};
use spawnvault_shared::{ActorId, SpawnerId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Capacity, SpawnvaultConfig};
use crate::error::{SpawnerError, SpawnerResult};
use crate::events::{EventHub, PreEvent, Presentation, SpawnerEvent};
use crate::executor::{Completion, RegionExecutors, Ticket, WorkerPool};
use crate::gateway::{CurrencyGateway, DepositError};
use crate::spawner::{Spawner, SpawnerGuard};

/// Result of a sell request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SellOutcome {
    /// Paid and removed.
    Sold {
        /// Currency deposited.
        total: FixedPoint,
        /// Items removed.
        item_count: u64,
    },
    /// No stored item has a positive price.
    NothingToSell,
    /// The actor already has a sale in flight.
    AlreadyPending,
    /// Another operation holds the spawner ("transaction in progress").
    Busy,
    /// The commit deadline passed before the region executor got to it.
    TimedOut,
    /// The inventory changed after the quote was built.
    ValidationFailed,
    /// The gateway refused the deposit; nothing was removed.
    DepositFailed(DepositError),
    /// Paid, but the quoted items were not all removed.
    Inconsistent {
        /// Currency deposited.
        total: FixedPoint,
        /// Items actually removed.
        removed: u64,
    },
    /// An observer vetoed the sale.
    Cancelled,
}

impl SellOutcome {
    /// True if currency was deposited.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Sold { .. } | Self::Inconsistent { .. })
    }

    /// Converts into `(total, item_count)` of a completed sale.
    ///
    /// # Errors
    ///
    /// Every outcome other than `Sold` maps to the matching `SpawnerError`:
    /// contention to `LockContention`, refused or vetoed sales to
    /// `ValidationFailure`, a refused deposit to `DepositFailure`.
    pub fn into_result(self, spawner: SpawnerId) -> SpawnerResult<(FixedPoint, u64)> {
        match self {
            Self::Sold { total, item_count } => Ok((total, item_count)),
            Self::Busy | Self::AlreadyPending => Err(SpawnerError::LockContention(spawner)),
            Self::NothingToSell => Err(SpawnerError::ValidationFailure("nothing to sell".to_string())),
            Self::ValidationFailed => Err(SpawnerError::ValidationFailure(
                "inventory changed since quote".to_string(),
            )),
            Self::Cancelled => Err(SpawnerError::ValidationFailure("cancelled by observer".to_string())),
            Self::TimedOut => Err(SpawnerError::WaitTimedOut),
            Self::DepositFailed(err) => Err(SpawnerError::DepositFailure(err.to_string())),
            Self::Inconsistent { .. } => Err(SpawnerError::RemovalInconsistency(spawner)),
        }
    }
}

/// Pending result of [`TransactionCoordinator::sell`].
pub type SellTicket = Ticket<SellOutcome>;

/// Result of a withdrawal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// Items removed, to be handed to the actor.
    Withdrawn(Vec<ItemStack>),
    /// At least one requested amount was not available; nothing removed.
    Insufficient,
    /// Another operation holds the spawner.
    Busy,
}

impl WithdrawOutcome {
    /// Converts into the withdrawn stacks.
    ///
    /// # Errors
    ///
    /// `LockContention` when busy, `ValidationFailure` when short.
    pub fn into_result(self, spawner: SpawnerId) -> SpawnerResult<Vec<ItemStack>> {
        match self {
            Self::Withdrawn(items) => Ok(items),
            Self::Insufficient => Err(SpawnerError::ValidationFailure("requested items not available".to_string())),
            Self::Busy => Err(SpawnerError::LockContention(spawner)),
        }
    }
}

/// Result of a resource claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The counter was drained.
    Claimed(u64),
    /// The counter was already zero.
    Empty,
    /// Another operation holds the spawner.
    Busy,
}

/// Result of a stack resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Stack size changed.
    Resized {
        /// Previous size.
        from: u32,
        /// New size.
        to: u32,
    },
    /// Requested size equals the current one.
    Unchanged,
    /// Another operation holds the spawner.
    Busy,
    /// An observer vetoed the resize.
    Cancelled,
}

/// Collaborators used inside region commits.
struct CommitContext {
    pricing: Arc<dyn PricingSource>,
    gateway: Arc<dyn CurrencyGateway>,
    events: Arc<EventHub>,
    presentation: Arc<dyn Presentation>,
    journal: Option<Arc<AuditJournal>>,
}

impl CommitContext {
    fn journal(&self, kind: RecordKind, record: &TradeRecord) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.record(kind, record) {
                tracing::warn!("{}: audit record dropped: {err}", record.spawner);
            }
        }
    }

    fn journal_resize(&self, spawner: SpawnerId, actor: ActorId, from: u32, to: u32) {
        let Some(journal) = &self.journal else {
            return;
        };
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&spawner.0.to_le_bytes());
        payload.extend_from_slice(&actor.0.to_le_bytes());
        payload.extend_from_slice(&from.to_le_bytes());
        payload.extend_from_slice(&to.to_le_bytes());
        if let Err(err) = journal.append(RecordKind::Resize, payload) {
            tracing::warn!("{spawner}: audit record dropped: {err}");
        }
    }
}

/// Marks an actor as having a sale in flight until dropped.
struct PendingSell {
    actor: ActorId,
    pending: Arc<Mutex<HashSet<ActorId>>>,
}

impl PendingSell {
    fn acquire(pending: &Arc<Mutex<HashSet<ActorId>>>, actor: ActorId) -> Option<Self> {
        pending.lock().insert(actor).then(|| Self {
            actor,
            pending: Arc::clone(pending),
        })
    }
}

impl Drop for PendingSell {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.actor);
    }
}

/// Sell, withdraw, claim and resize pipelines.
pub struct TransactionCoordinator {
    pool: Arc<WorkerPool>,
    regions: Arc<RegionExecutors>,
    context: Arc<CommitContext>,
    capacity: Capacity,
    sell_timeout: Duration,
    pending: Arc<Mutex<HashSet<ActorId>>>,
}

impl TransactionCoordinator {
    /// Creates a coordinator over shared executors.
    #[must_use]
    pub fn new(
        config: &SpawnvaultConfig,
        pool: Arc<WorkerPool>,
        regions: Arc<RegionExecutors>,
        events: Arc<EventHub>,
        presentation: Arc<dyn Presentation>,
        pricing: Arc<dyn PricingSource>,
        gateway: Arc<dyn CurrencyGateway>,
    ) -> Self {
        Self {
            pool,
            regions,
            context: Arc::new(CommitContext {
                pricing,
                gateway,
                events,
                presentation,
                journal: None,
            }),
            capacity: config.capacity(),
            sell_timeout: config.sell_timeout(),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Appends committed operations to `journal`.
    ///
    /// Must be called before the coordinator is shared.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<AuditJournal>) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.journal = Some(journal);
        }
        self
    }

    /// Number of actors with a sale in flight.
    #[must_use]
    pub fn pending_sells(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sells every priced item of `spawner` for `actor`.
    pub fn sell(&self, spawner: &Arc<Spawner>, actor: ActorId) -> SellTicket {
        let id = spawner.id();
        let Some(pending) = PendingSell::acquire(&self.pending, actor) else {
            return Ticket::ready(SellOutcome::AlreadyPending);
        };
        if !self.context.events.allow(&PreEvent::SellPending { spawner: id, actor }) {
            return Ticket::ready(SellOutcome::Cancelled);
        }
        let Some(guard) = spawner.try_lock() else {
            tracing::debug!("{id}: sell by {actor} refused, transaction in progress");
            return Ticket::ready(SellOutcome::Busy);
        };

        let snapshot = guard.spawner().read_state().inventory.consolidated_view();
        if snapshot.is_empty() {
            return Ticket::ready(SellOutcome::NothingToSell);
        }

        let deadline = Instant::now() + self.sell_timeout;
        let region = spawner.config().location.region();
        let context = Arc::clone(&self.context);
        let regions = Arc::clone(&self.regions);
        let (completion, ticket) = Ticket::pair();

        let queued = self.pool.execute(move || {
            let quote = match SellQuote::build(&snapshot, context.pricing.as_ref()) {
                Ok(quote) if quote.success => quote,
                Ok(_) => {
                    drop(guard);
                    drop(pending);
                    completion.complete(SellOutcome::NothingToSell);
                    return;
                }
                Err(err) => {
                    tracing::warn!("{id}: quote failed: {err}");
                    drop(guard);
                    drop(pending);
                    completion.complete(SellOutcome::ValidationFailed);
                    return;
                }
            };

            let submitted = regions.submit(region, move || {
                let outcome = commit_sale(&context, &guard, actor, &quote, deadline);
                drop(guard);
                drop(pending);
                completion.complete(outcome);
            });
            if let Err(err) = submitted {
                tracing::warn!("{id}: sell commit not queued: {err}");
            }
        });
        if let Err(err) = queued {
            tracing::warn!("{id}: sell not queued: {err}");
        }

        ticket
    }

    /// Takes `items` out of `spawner` for `actor`, all or nothing.
    pub fn withdraw(&self, spawner: &Arc<Spawner>, actor: ActorId, items: Vec<ItemStack>) -> Ticket<WithdrawOutcome> {
        let Some(guard) = spawner.try_lock() else {
            return Ticket::ready(WithdrawOutcome::Busy);
        };
        let context = Arc::clone(&self.context);
        self.on_region(spawner, move |completion| {
            let outcome = commit_withdrawal(&context, &guard, actor, &items);
            drop(guard);
            completion.complete(outcome);
        })
    }

    /// Drains the resource counter for `actor`.
    pub fn claim_resource(&self, spawner: &Arc<Spawner>, actor: ActorId) -> Ticket<ClaimOutcome> {
        let Some(guard) = spawner.try_lock() else {
            return Ticket::ready(ClaimOutcome::Busy);
        };
        let context = Arc::clone(&self.context);
        self.on_region(spawner, move |completion| {
            let id = guard.spawner().id();
            let amount = {
                let mut state = guard.state();
                let amount = std::mem::take(&mut state.resource);
                if amount > 0 {
                    state.capacity_reached = false;
                    state.modified = true;
                }
                amount
            };
            drop(guard);

            if amount == 0 {
                completion.complete(ClaimOutcome::Empty);
                return;
            }
            context.presentation.notify_inventory_changed(id);
            context
                .events
                .publish(SpawnerEvent::ResourceClaimed { spawner: id, actor, amount });
            completion.complete(ClaimOutcome::Claimed(amount));
        })
    }

    /// Changes the stack size of `spawner`.
    ///
    /// The ticket carries `SpawnerError::StackOutOfRange` for sizes outside
    /// `1..=max_stack_size` and `SpawnerError::ResizeWouldOverflow` when
    /// shrinking below the used slots.
    pub fn resize_stack(&self, spawner: &Arc<Spawner>, actor: ActorId, to: u32) -> Ticket<SpawnerResult<ResizeOutcome>> {
        if let Err(err) = self.capacity.check_stack(to) {
            return Ticket::ready(Err(err));
        }
        let id = spawner.id();
        let Some(guard) = spawner.try_lock() else {
            return Ticket::ready(Ok(ResizeOutcome::Busy));
        };
        let from = guard.spawner().read_state().stack_size;
        if from == to {
            return Ticket::ready(Ok(ResizeOutcome::Unchanged));
        }
        if !self
            .context
            .events
            .allow(&PreEvent::StackResizePending { spawner: id, actor, from, to })
        {
            return Ticket::ready(Ok(ResizeOutcome::Cancelled));
        }

        let context = Arc::clone(&self.context);
        let capacity = self.capacity;
        self.on_region(spawner, move |completion| {
            let result = commit_resize(&context, &guard, actor, to, capacity);
            drop(guard);
            completion.complete(result);
        })
    }

    fn on_region<T, F>(&self, spawner: &Arc<Spawner>, job: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        let (completion, ticket) = Ticket::pair();
        let region = spawner.config().location.region();
        if let Err(err) = self.regions.submit(region, move || job(completion)) {
            tracing::warn!("{}: commit not queued: {err}", spawner.id());
        }
        ticket
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("sell_timeout", &self.sell_timeout)
            .field("pending_sells", &self.pending_sells())
            .finish_non_exhaustive()
    }
}

fn commit_sale(
    context: &CommitContext,
    guard: &SpawnerGuard,
    actor: ActorId,
    quote: &SellQuote,
    deadline: Instant,
) -> SellOutcome {
    let spawner = guard.spawner();
    let id = spawner.id();

    if Instant::now() >= deadline {
        tracing::warn!("{id}: sell by {actor} timed out before commit");
        return SellOutcome::TimedOut;
    }

    let still_available = {
        let state = spawner.read_state();
        quote
            .removals
            .iter()
            .all(|stack| state.inventory.available(&stack.signature) >= stack.amount)
    };
    if !still_available {
        tracing::debug!("{id}: inventory changed since quote, sell aborted");
        return SellOutcome::ValidationFailed;
    }

    if let Err(err) = context.gateway.deposit(actor, quote.total) {
        tracing::warn!("{id}: deposit of {} to {actor} failed: {err}", quote.total);
        return SellOutcome::DepositFailed(err);
    }

    let (removed_all, realized) = {
        let mut state = guard.state();
        let realized: Vec<ItemStack> = quote
            .removals
            .iter()
            .map(|stack| {
                let amount = state.inventory.available(&stack.signature).min(stack.amount);
                ItemStack::new(stack.signature.clone(), amount)
            })
            .filter(|stack| stack.amount > 0)
            .collect();
        let removed_all = state.inventory.remove(&quote.removals);
        state.capacity_reached = false;
        state.modified = true;
        (removed_all, realized)
    };

    context.presentation.notify_inventory_changed(id);

    if removed_all {
        context.events.publish(SpawnerEvent::SellCommitted {
            spawner: id,
            actor,
            total: quote.total,
            item_count: quote.item_count,
        });
        context.journal(
            RecordKind::Sale,
            &TradeRecord::from_stacks(id, actor, quote.total, &quote.removals),
        );
        return SellOutcome::Sold {
            total: quote.total,
            item_count: quote.item_count,
        };
    }

    let removed: u64 = realized.iter().map(|stack| stack.amount).sum();
    tracing::error!(
        "{}: paid {} to {actor} but removed {removed} of {} quoted items; quote={quote:?} realized={realized:?}",
        SpawnerError::RemovalInconsistency(id),
        quote.total,
        quote.item_count,
    );
    context.journal(
        RecordKind::Inconsistency,
        &TradeRecord::from_stacks(id, actor, quote.total, &realized),
    );
    context.events.publish(SpawnerEvent::RemovalInconsistency {
        spawner: id,
        actor,
        quote: quote.clone(),
        realized,
    });
    SellOutcome::Inconsistent {
        total: quote.total,
        removed,
    }
}

fn commit_withdrawal(
    context: &CommitContext,
    guard: &SpawnerGuard,
    actor: ActorId,
    items: &[ItemStack],
) -> WithdrawOutcome {
    let id = guard.spawner().id();
    let mut requested: BTreeMap<ItemSignature, u64> = BTreeMap::new();
    for stack in items.iter().filter(|stack| stack.amount > 0) {
        let entry = requested.entry(stack.signature.clone()).or_insert(0);
        *entry = entry.saturating_add(stack.amount);
    }
    let requested: Vec<ItemStack> = requested
        .into_iter()
        .map(|(signature, amount)| ItemStack::new(signature, amount))
        .collect();

    {
        let mut state = guard.state();
        let available = requested
            .iter()
            .all(|stack| state.inventory.available(&stack.signature) >= stack.amount);
        if !available {
            return WithdrawOutcome::Insufficient;
        }
        if requested.is_empty() {
            return WithdrawOutcome::Withdrawn(Vec::new());
        }
        state.inventory.remove(&requested);
        state.capacity_reached = false;
        state.modified = true;
    }

    context.presentation.notify_inventory_changed(id);
    context.journal(
        RecordKind::Withdrawal,
        &TradeRecord::from_stacks(id, actor, FixedPoint::ZERO, &requested),
    );
    context.events.publish(SpawnerEvent::ItemsWithdrawn {
        spawner: id,
        actor,
        items: requested.clone(),
    });
    WithdrawOutcome::Withdrawn(requested)
}

fn commit_resize(
    context: &CommitContext,
    guard: &SpawnerGuard,
    actor: ActorId,
    to: u32,
    capacity: Capacity,
) -> SpawnerResult<ResizeOutcome> {
    let id = guard.spawner().id();
    let from = {
        let mut state = guard.state();
        let from = state.stack_size;
        if from == to {
            return Ok(ResizeOutcome::Unchanged);
        }
        let new_slots = capacity.max_slots(to);
        let used_slots = state.inventory.used_slots();
        if used_slots > new_slots {
            return Err(SpawnerError::ResizeWouldOverflow { used_slots, new_slots });
        }

        state.stack_size = to;
        state.max_resource = capacity.max_resource(to);
        state.resource = state.resource.min(state.max_resource);
        state.inventory.set_max_slots(new_slots);
        if to > from {
            state.capacity_reached = false;
        }
        state.modified = true;
        from
    };

    tracing::debug!("{id}: stack {from} -> {to} by {actor}");
    context.presentation.notify_inventory_changed(id);
    context.journal_resize(id, actor, from, to);
    context
        .events
        .publish(SpawnerEvent::StackResized { spawner: id, from, to });
    Ok(ResizeOutcome::Resized { from, to })
}
