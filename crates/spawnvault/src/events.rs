//! # Spawner Events
//!
//! Two flows leave the runtime:
//!
//! ```text
//! ┌──────────────┐ PreEvent  ┌──────────────────┐
//! │  operation   │──────────>│  EventObserver   │  may cancel (sync)
//! │ (region lane)│           └──────────────────┘
//! │              │ SpawnerEvent ┌──────────┐
//! │              │─────────────>│ EventBus │──> audit, anti-cheat, logs
//! └──────────────┘  try_send    └──────────┘
//! ```
//!
//! Post-events go through a bounded crossbeam channel. A full channel
//! drops the event instead of stalling a region executor.
//!
//! Presentation refreshes are a separate fire-and-forget contract
//! ([`Presentation`]).

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use spawnvault_economy::{FixedPoint, ItemStack, SellQuote};
use spawnvault_shared::{ActorId, SpawnerId};
use std::sync::Arc;

use crate::spawner::ActivationState;

/// Cancellable notification sent before a mutation commits.
#[derive(Clone, Debug, PartialEq)]
pub enum PreEvent {
    /// A generation batch is about to be stored.
    GenerationPending {
        /// Target spawner.
        spawner: SpawnerId,
        /// Mobs simulated.
        mob_count: u64,
        /// Items produced before trimming.
        item_total: u64,
    },
    /// An actor asked to sell a spawner's content.
    SellPending {
        /// Target spawner.
        spawner: SpawnerId,
        /// Seller.
        actor: ActorId,
    },
    /// An actor asked to change the stack size.
    StackResizePending {
        /// Target spawner.
        spawner: SpawnerId,
        /// Requesting actor.
        actor: ActorId,
        /// Current stack size.
        from: u32,
        /// Requested stack size.
        to: u32,
    },
}

/// Observer decision on a [`PreEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Let the operation proceed.
    Allow,
    /// Abort the operation without side effects.
    Cancel,
}

/// Synchronous pre-event hook.
pub trait EventObserver: Send + Sync {
    /// Inspects a pending operation.
    fn on_pre_event(&self, event: &PreEvent) -> Verdict;
}

/// Non-cancellable notification of a committed change.
#[derive(Clone, Debug, PartialEq)]
pub enum SpawnerEvent {
    // =========================================================================
    // Generation
    // =========================================================================
    /// A generation cycle stored loot.
    GenerationOccurred {
        /// Spawner.
        spawner: SpawnerId,
        /// Mobs simulated.
        mob_count: u64,
        /// Resource added after capping.
        resource_added: u64,
        /// Items stored.
        items_accepted: u64,
        /// Items trimmed away.
        items_dropped: u64,
    },

    // =========================================================================
    // Transactions
    // =========================================================================
    /// A sale was committed.
    SellCommitted {
        /// Spawner.
        spawner: SpawnerId,
        /// Seller.
        actor: ActorId,
        /// Currency deposited.
        total: FixedPoint,
        /// Items removed.
        item_count: u64,
    },
    /// Paid, but the quoted items were not all removed.
    RemovalInconsistency {
        /// Spawner.
        spawner: SpawnerId,
        /// Seller.
        actor: ActorId,
        /// The quote that was paid.
        quote: SellQuote,
        /// What was actually removed.
        realized: Vec<ItemStack>,
    },
    /// Items were handed to an actor.
    ItemsWithdrawn {
        /// Spawner.
        spawner: SpawnerId,
        /// Receiving actor.
        actor: ActorId,
        /// Items removed.
        items: Vec<ItemStack>,
    },
    /// The resource counter was drained.
    ResourceClaimed {
        /// Spawner.
        spawner: SpawnerId,
        /// Receiving actor.
        actor: ActorId,
        /// Amount claimed.
        amount: u64,
    },
    /// The stack size changed.
    StackResized {
        /// Spawner.
        spawner: SpawnerId,
        /// Old stack size.
        from: u32,
        /// New stack size.
        to: u32,
    },

    // =========================================================================
    // Scheduling
    // =========================================================================
    /// Activation state changed.
    ActivationChanged {
        /// Spawner.
        spawner: SpawnerId,
        /// New state.
        state: ActivationState,
    },
}

/// Bounded channel for post-events.
pub struct EventBus {
    sender: Sender<SpawnerEvent>,
    receiver: Receiver<SpawnerEvent>,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// A producer handle.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// A consumer handle (clones share the queue).
    #[must_use]
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.receiver.clone(),
        }
    }
}

/// Handle for sending post-events.
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<SpawnerEvent>,
}

impl EventSender {
    /// Sends without blocking. Returns `false` if the event was dropped.
    #[inline]
    pub fn send(&self, event: SpawnerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!("event bus full, dropping {event:?}");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Handle for receiving post-events.
#[derive(Clone)]
pub struct EventReceiver {
    receiver: Receiver<SpawnerEvent>,
}

impl EventReceiver {
    /// All pending events (non-blocking).
    #[must_use]
    pub fn drain(&self) -> Vec<SpawnerEvent> {
        self.receiver.try_iter().collect()
    }

    /// One event, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<SpawnerEvent> {
        self.receiver.try_recv().ok()
    }

    /// Number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}

/// Observers plus the post-event bus, shared by every pipeline.
pub struct EventHub {
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
    bus: EventBus,
    sender: EventSender,
}

impl EventHub {
    /// Creates a hub with a bus of `capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let bus = EventBus::new(capacity);
        let sender = bus.sender();
        Self {
            observers: RwLock::new(Vec::new()),
            bus,
            sender,
        }
    }

    /// Registers a pre-event observer.
    pub fn observe(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().push(observer);
    }

    /// Asks every observer. Returns `true` if the operation may proceed.
    #[must_use]
    pub fn allow(&self, event: &PreEvent) -> bool {
        let observers = self.observers.read();
        let cancelled = observers
            .iter()
            .any(|observer| observer.on_pre_event(event) == Verdict::Cancel);
        if cancelled {
            tracing::debug!("pre-event cancelled: {event:?}");
        }
        !cancelled
    }

    /// Publishes a post-event.
    pub fn publish(&self, event: SpawnerEvent) {
        self.sender.send(event);
    }

    /// A consumer handle for post-events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.bus.receiver()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

/// Presentation refresh contract. Fire-and-forget.
pub trait Presentation: Send + Sync {
    /// A spawner's content changed.
    fn notify_inventory_changed(&self, spawner: SpawnerId);

    /// A spawner was activated or deactivated.
    fn notify_activation_changed(&self, spawner: SpawnerId, state: ActivationState);
}

/// Presentation that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPresentation;

impl Presentation for NullPresentation {
    fn notify_inventory_changed(&self, _spawner: SpawnerId) {}

    fn notify_activation_changed(&self, _spawner: SpawnerId, _state: ActivationState) {}
}

/// One presentation refresh request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentationUpdate {
    /// Re-render the inventory view.
    Inventory(SpawnerId),
    /// Show or tear down activation visuals.
    Activation(SpawnerId, ActivationState),
}

/// Presentation forwarding refreshes to a channel, for a render thread.
#[derive(Clone, Debug)]
pub struct ChannelPresentation {
    sender: Sender<PresentationUpdate>,
}

impl ChannelPresentation {
    /// Creates the presentation and the receiving end.
    #[must_use]
    pub fn new() -> (Self, Receiver<PresentationUpdate>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl Presentation for ChannelPresentation {
    fn notify_inventory_changed(&self, spawner: SpawnerId) {
        let _ = self.sender.send(PresentationUpdate::Inventory(spawner));
    }

    fn notify_activation_changed(&self, spawner: SpawnerId, state: ActivationState) {
        let _ = self.sender.send(PresentationUpdate::Activation(spawner, state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Deny;

    impl EventObserver for Deny {
        fn on_pre_event(&self, event: &PreEvent) -> Verdict {
            match event {
                PreEvent::SellPending { .. } => Verdict::Cancel,
                _ => Verdict::Allow,
            }
        }
    }

    #[test]
    fn test_observer_cancels_selectively() {
        let hub = EventHub::new(8);
        hub.observe(Arc::new(Deny));

        assert!(!hub.allow(&PreEvent::SellPending {
            spawner: SpawnerId(1),
            actor: ActorId(1),
        }));
        assert!(hub.allow(&PreEvent::StackResizePending {
            spawner: SpawnerId(1),
            actor: ActorId(1),
            from: 1,
            to: 2,
        }));
    }

    #[test]
    fn test_full_bus_drops_instead_of_blocking() {
        let bus = EventBus::new(2);
        let sender = bus.sender();
        let event = SpawnerEvent::StackResized {
            spawner: SpawnerId(1),
            from: 1,
            to: 2,
        };

        assert!(sender.send(event.clone()));
        assert!(sender.send(event.clone()));
        assert!(!sender.send(event));
        assert_eq!(bus.receiver().drain().len(), 2);
    }

    #[test]
    fn test_channel_presentation_forwards() {
        let (presentation, updates) = ChannelPresentation::new();
        presentation.notify_activation_changed(SpawnerId(4), ActivationState::Active);
        assert_eq!(
            updates.try_recv(),
            Ok(PresentationUpdate::Activation(SpawnerId(4), ActivationState::Active))
        );
    }
}
