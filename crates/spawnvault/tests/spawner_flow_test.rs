//! Registry-level flows: activation by range, generation, selling,
//! contention and persistence.

use crossbeam_channel::{bounded, Receiver, Sender};
use spawnvault::{
    Actor, ActivationState, CurrencyGateway, DepositError, EventObserver, GenerationOutcome, MemoryLedger,
    MemoryStore, MemoryWorld, NullPresentation, PreEvent, PresenceStrategyKind, SellOutcome, SpawnerConfig,
    SpawnerError, SpawnerEvent, SpawnerRegistry, SpawnerSnapshot, SpawnerStore, SpawnvaultConfig, Verdict,
};
use spawnvault_economy::{
    read_journal, EconomyData, EconomyError, FixedPoint, ItemSignature, ItemStack, JournalConfig, RecordKind,
    TradeRecord,
};
use spawnvault_shared::{ActorId, Location, SpawnerId, Vec3, WorldId};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

const DATA: &str = r#"
[[loot_tables]]
entity = "skeleton"
per_mob_yield = 5
min_mobs_per_stack = 1
max_mobs_per_stack = 4

[[loot_tables.entries]]
item = "bone"
min_amount = 1
max_amount = 2
chance_percent = 100.0
sell_price = 2.5
"#;

fn config(strategy: PresenceStrategyKind) -> SpawnvaultConfig {
    SpawnvaultConfig {
        default_spawn_interval_ms: 1_000,
        worker_threads: 2,
        region_executors: 2,
        presence_strategy: strategy,
        ..SpawnvaultConfig::default()
    }
}

fn registry_with(strategy: PresenceStrategyKind, gateway: Arc<dyn CurrencyGateway>) -> SpawnerRegistry {
    SpawnerRegistry::new(
        config(strategy),
        EconomyData::from_toml_str(DATA).unwrap(),
        gateway,
        Arc::new(NullPresentation),
    )
    .unwrap()
}

fn origin() -> Location {
    Location::new(WorldId(0), Vec3::new(0.0, 64.0, 0.0))
}

/// Restores a spawner holding `items` through the persistence path.
fn seed(registry: &SpawnerRegistry, id: u64, stack_size: u32, resource: u64, items: Vec<ItemStack>) -> SpawnerId {
    let id = SpawnerId(id);
    let store = MemoryStore::new();
    store
        .save_all(&[SpawnerSnapshot {
            config: SpawnerConfig {
                id,
                location: Location::new(WorldId(0), Vec3::new(id.0 as f32 * 500.0, 64.0, 0.0)),
                entity: "skeleton".to_string(),
                loot_table: "skeleton".to_string(),
                spawn_interval_ms: 1_000,
                range: 16.0,
            },
            stack_size,
            last_generation_ms: 0,
            resource,
            capacity_reached: false,
            activation: ActivationState::Active,
            cycles: 0,
            items,
        }])
        .unwrap();
    assert_eq!(registry.load_from(&store), Ok(1));
    id
}

fn bones(amount: u64) -> ItemStack {
    ItemStack::new(ItemSignature::of("bone"), amount)
}

/// Blocks inside `deposit` until released.
struct GatedGateway {
    entered: Sender<()>,
    release: Receiver<()>,
    ledger: MemoryLedger,
}

impl CurrencyGateway for GatedGateway {
    fn deposit(&self, recipient: ActorId, amount: FixedPoint) -> Result<(), DepositError> {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(WAIT);
        self.ledger.deposit(recipient, amount)
    }
}

struct NoSelling;

impl EventObserver for NoSelling {
    fn on_pre_event(&self, event: &PreEvent) -> Verdict {
        if matches!(event, PreEvent::SellPending { .. }) {
            Verdict::Cancel
        } else {
            Verdict::Allow
        }
    }
}

#[test]
fn test_activation_follows_range_for_both_strategies() {
    for strategy in [PresenceStrategyKind::Batch, PresenceStrategyKind::Spatial] {
        let registry = registry_with(strategy, Arc::new(MemoryLedger::new()));
        let world = MemoryWorld::new();
        let spawner = registry.place(origin(), "skeleton", 1).unwrap();

        world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(15.9, 64.0, 0.0)));
        let report = registry.tick(&world, 1_000);
        assert_eq!(report.activated, vec![spawner.id()], "{strategy:?}");
        assert_eq!(spawner.view().activation, ActivationState::Active);

        world.move_actor(ActorId(1), Vec3::new(16.1, 64.0, 0.0));
        let report = registry.tick(&world, 2_000);
        assert_eq!(report.deactivated, vec![spawner.id()], "{strategy:?}");
        assert!(report.generations.is_empty());
        assert_eq!(spawner.view().activation, ActivationState::Dormant);
    }
}

#[test]
fn test_observer_mode_actor_does_not_activate() {
    let registry = registry_with(PresenceStrategyKind::Batch, Arc::new(MemoryLedger::new()));
    let world = MemoryWorld::new();
    registry.place(origin(), "skeleton", 1).unwrap();
    world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(1.0, 64.0, 0.0)));
    world.set_status(ActorId(1), true, true, true);

    assert!(registry.tick(&world, 0).activated.is_empty());
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn test_generation_fills_then_skips_when_saturated() {
    let registry = registry_with(PresenceStrategyKind::Spatial, Arc::new(MemoryLedger::new()));
    let world = MemoryWorld::new();
    let id = seed(&registry, 1, 1, 1_000, vec![bones(64 * 45)]);
    let spawner = registry.get(id).unwrap();
    assert_eq!(spawner.view().activation, ActivationState::Dormant);

    world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(500.0, 64.0, 3.0)));
    registry.tick(&world, 0);
    let report = registry.tick(&world, 1_000);
    assert_eq!(report.generations.len(), 1);
    assert_eq!(report.generations[0].1.wait(WAIT), Ok(GenerationOutcome::SkippedSaturated));
    assert_eq!(spawner.view().total_items, 64 * 45);
}

#[test]
fn test_generation_commits_events() {
    let registry = registry_with(PresenceStrategyKind::Batch, Arc::new(MemoryLedger::new()));
    let events = registry.subscribe();
    let world = MemoryWorld::new();
    let spawner = registry.place(origin(), "skeleton", 1).unwrap();
    world.upsert_actor(Actor::new(ActorId(1), WorldId(0), Vec3::new(2.0, 64.0, 2.0)));

    registry.tick(&world, 0);
    for now in [1_000, 2_000, 3_000] {
        for (_, ticket) in registry.tick(&world, now).generations {
            assert!(matches!(ticket.wait(WAIT), Ok(GenerationOutcome::Generated { .. })));
        }
    }

    let generated = events
        .drain()
        .into_iter()
        .filter(|event| matches!(event, SpawnerEvent::GenerationOccurred { .. }))
        .count();
    assert_eq!(generated, 3);
    assert!(spawner.view().resource >= 15);
    assert!(spawner.is_modified());
}

#[test]
fn test_sell_hundred_units_at_two_and_a_half() {
    let ledger = Arc::new(MemoryLedger::new());
    let registry = registry_with(PresenceStrategyKind::Batch, ledger.clone());
    let id = seed(&registry, 1, 1, 0, vec![bones(100)]);

    let outcome = registry.sell(id, ActorId(9)).unwrap().wait(WAIT).unwrap();
    assert_eq!(
        outcome,
        SellOutcome::Sold {
            total: FixedPoint::from_whole(250),
            item_count: 100,
        }
    );
    assert_eq!(ledger.balance(ActorId(9)), FixedPoint::from_whole(250));
    assert_eq!(registry.view(id).unwrap().used_slots, 0);
}

#[test]
fn test_second_sell_sees_transaction_in_progress() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let gateway = Arc::new(GatedGateway {
        entered: entered_tx,
        release: release_rx,
        ledger: MemoryLedger::new(),
    });
    let registry = registry_with(PresenceStrategyKind::Batch, gateway.clone());
    let id = seed(&registry, 1, 1, 0, vec![bones(100)]);

    let first = registry.sell(id, ActorId(1)).unwrap();
    entered_rx.recv_timeout(WAIT).unwrap();
    assert!(registry.view(id).unwrap().busy);

    let second = registry.sell(id, ActorId(2)).unwrap();
    assert_eq!(second.wait(WAIT), Ok(SellOutcome::Busy));

    release_tx.send(()).unwrap();
    assert!(first.wait(WAIT).unwrap().is_paid());
    assert_eq!(gateway.ledger.balance(ActorId(1)), FixedPoint::from_whole(250));
    assert_eq!(gateway.ledger.balance(ActorId(2)), FixedPoint::ZERO);
}

#[test]
fn test_cancelled_sell_changes_nothing() {
    let ledger = Arc::new(MemoryLedger::new());
    let registry = registry_with(PresenceStrategyKind::Batch, ledger.clone());
    registry.observe(Arc::new(NoSelling));
    let id = seed(&registry, 1, 1, 0, vec![bones(10)]);

    assert_eq!(registry.sell(id, ActorId(1)).unwrap().wait(WAIT), Ok(SellOutcome::Cancelled));
    assert_eq!(registry.view(id).unwrap().total_items, 10);
    assert!(!registry.view(id).unwrap().busy);
}

#[test]
fn test_restored_spawner_round_trips() {
    let registry = registry_with(PresenceStrategyKind::Batch, Arc::new(MemoryLedger::new()));
    let id = seed(&registry, 4, 3, 2_500, vec![bones(130), ItemStack::new(ItemSignature::of("bone").with_wear(12), 3)]);

    let snapshot = registry
        .snapshots()
        .into_iter()
        .find(|snapshot| snapshot.config.id == id)
        .unwrap();
    assert_eq!(snapshot.stack_size, 3);
    assert_eq!(snapshot.resource, 2_500);
    assert_eq!(snapshot.activation, ActivationState::Dormant);
    assert_eq!(registry.view(id).unwrap().used_slots, 4);

    let store = MemoryStore::new();
    store.save_all(&[snapshot.clone()]).unwrap();
    let other = registry_with(PresenceStrategyKind::Spatial, Arc::new(MemoryLedger::new()));
    assert_eq!(other.load_from(&store), Ok(1));
    assert_eq!(other.snapshots(), vec![snapshot]);
}

#[test]
fn test_removed_spawner_stays_removed_after_reload() {
    let registry = registry_with(PresenceStrategyKind::Batch, Arc::new(MemoryLedger::new()));
    let store = MemoryStore::new();
    let kept = registry.place(origin(), "skeleton", 1).unwrap();
    let removed = registry.place(Location::new(WorldId(0), Vec3::new(90.0, 64.0, 0.0)), "skeleton", 2).unwrap();
    assert_eq!(registry.persist_modified(&store), Ok(2));

    registry.remove(removed.id()).unwrap();
    assert_eq!(registry.persist_modified(&store), Ok(0));
    assert!(store.get(removed.id()).is_none());

    let reloaded = registry_with(PresenceStrategyKind::Batch, Arc::new(MemoryLedger::new()));
    assert_eq!(reloaded.load_from(&store), Ok(1));
    assert!(reloaded.get(removed.id()).is_none());
    assert!(reloaded.get(kept.id()).is_some());
}

#[test]
fn test_sales_are_journaled() {
    let path = std::env::temp_dir().join(format!(
        "spawnvault_registry_{}.log",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    {
        let registry = registry_with(PresenceStrategyKind::Batch, Arc::new(MemoryLedger::new()))
            .open_journal(&path, JournalConfig::default())
            .unwrap();
        let id = seed(&registry, 1, 1, 0, vec![bones(100)]);
        assert!(registry.sell(id, ActorId(9)).unwrap().wait(WAIT).unwrap().is_paid());
    }

    let sale = read_journal(&path)
        .unwrap()
        .into_iter()
        .find(|frame| frame.kind == RecordKind::Sale)
        .unwrap();
    let record = TradeRecord::decode(&sale.payload).unwrap();
    assert_eq!(record.spawner, SpawnerId(1));
    assert_eq!(record.total, FixedPoint::from_whole(250));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_unreadable_journal_is_an_economy_error() {
    let result = registry_with(PresenceStrategyKind::Batch, Arc::new(MemoryLedger::new()))
        .open_journal(std::env::temp_dir(), JournalConfig::default());
    assert!(matches!(result, Err(SpawnerError::Economy(EconomyError::Journal(_)))));
}

#[test]
fn test_restore_skips_unusable_range() {
    let registry = registry_with(PresenceStrategyKind::Spatial, Arc::new(MemoryLedger::new()));
    let store = MemoryStore::new();
    let snapshot = |id: u64, range: f32| SpawnerSnapshot {
        config: SpawnerConfig {
            id: SpawnerId(id),
            location: origin(),
            entity: "skeleton".to_string(),
            loot_table: "skeleton".to_string(),
            spawn_interval_ms: 1_000,
            range,
        },
        stack_size: 1,
        last_generation_ms: 0,
        resource: 0,
        capacity_reached: false,
        activation: ActivationState::Dormant,
        cycles: 0,
        items: Vec::new(),
    };
    store
        .save_all(&[snapshot(1, -5.0), snapshot(2, 1.0e9), snapshot(3, 16.0)])
        .unwrap();

    assert_eq!(registry.load_from(&store), Ok(1));
    assert!(registry.get(SpawnerId(3)).is_some());
    assert!(registry.get(SpawnerId(1)).is_none());
}
