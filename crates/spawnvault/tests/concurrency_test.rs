//! Randomized checks: presence strategies agree, the exclusive lock
//! serializes every mutation, and capacity holds under concurrent load.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spawnvault::{
    Actor, BatchScan, ClaimOutcome, GenerationOutcome, MemoryLedger, MemoryStore, MemoryWorld, NullPresentation,
    PresenceStrategy, SellOutcome, Spawner, SpawnerConfig, SpawnerRegistry, SpawnerSnapshot, SpawnerState,
    SpawnerStore, SpawnvaultConfig, SpatialIndexScan, WithdrawOutcome,
};
use spawnvault_economy::{EconomyData, FixedPoint, ItemCatalog, ItemSignature, ItemStack};
use spawnvault_shared::{ActorId, Location, SpawnerId, Vec3, WorldId};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

const DATA: &str = r#"
[[loot_tables]]
entity = "skeleton"
per_mob_yield = 5
min_mobs_per_stack = 1
max_mobs_per_stack = 4

[[loot_tables.entries]]
item = "bone"
min_amount = 0
max_amount = 2
chance_percent = 100.0
sell_price = 2.5

[[loot_tables.entries]]
item = "arrow"
min_amount = 1
max_amount = 3
chance_percent = 40.0
sell_price = 1.0
"#;

fn random_position(rng: &mut ChaCha8Rng) -> Vec3 {
    Vec3::new(rng.gen_range(-200.0..200.0), rng.gen_range(0.0..128.0), rng.gen_range(-200.0..200.0))
}

#[test]
fn test_presence_strategies_agree() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xACE);
    let catalog = Arc::new(ItemCatalog::new());
    let capacity = SpawnvaultConfig::default().capacity();

    for round in 0..20 {
        let world = MemoryWorld::new();
        for id in 0..rng.gen_range(0..60) {
            let mut actor = Actor::new(ActorId(id), WorldId(rng.gen_range(0..2)), random_position(&mut rng));
            actor.connected = rng.gen_bool(0.9);
            actor.alive = rng.gen_bool(0.9);
            actor.observer = rng.gen_bool(0.1);
            world.upsert_actor(actor);
        }

        let spawners: Vec<Arc<Spawner>> = (0..100)
            .map(|id| {
                let config = SpawnerConfig {
                    id: SpawnerId(id),
                    location: Location::new(WorldId(rng.gen_range(0..2)), random_position(&mut rng)),
                    entity: "skeleton".to_string(),
                    loot_table: "skeleton".to_string(),
                    spawn_interval_ms: 1_000,
                    range: rng.gen_range(1.0..48.0),
                };
                Arc::new(Spawner::new(config, SpawnerState::new(Arc::clone(&catalog), &capacity, 1)))
            })
            .collect();

        let batch = BatchScan.evaluate(&world, &spawners);
        let spatial = SpatialIndexScan.evaluate(&world, &spawners);
        assert_eq!(batch, spatial, "round {round}");
    }
}

fn registry(ledger: Arc<MemoryLedger>) -> SpawnerRegistry {
    let config = SpawnvaultConfig {
        default_spawn_interval_ms: 100,
        worker_threads: 4,
        region_executors: 4,
        ..SpawnvaultConfig::default()
    };
    SpawnerRegistry::new(config, EconomyData::from_toml_str(DATA).unwrap(), ledger, Arc::new(NullPresentation))
        .unwrap()
}

fn seed_bones(registry: &SpawnerRegistry, amount: u64) -> SpawnerId {
    let id = SpawnerId(1);
    let store = MemoryStore::new();
    store
        .save_all(&[SpawnerSnapshot {
            config: SpawnerConfig {
                id,
                location: Location::new(WorldId(0), Vec3::new(0.0, 64.0, 0.0)),
                entity: "skeleton".to_string(),
                loot_table: "skeleton".to_string(),
                spawn_interval_ms: 100,
                range: 16.0,
            },
            stack_size: 1,
            last_generation_ms: 0,
            resource: 500,
            capacity_reached: false,
            activation: spawnvault::ActivationState::Dormant,
            cycles: 0,
            items: vec![ItemStack::new(ItemSignature::of("bone"), amount)],
        }])
        .unwrap();
    registry.load_from(&store).unwrap();
    id
}

#[test]
fn test_racing_sellers_are_paid_once() {
    let ledger = Arc::new(MemoryLedger::new());
    let registry = Arc::new(registry(ledger.clone()));
    let id = seed_bones(&registry, 100);
    let sellers = 8;
    let barrier = Arc::new(Barrier::new(sellers));

    let handles: Vec<_> = (0..sellers as u64)
        .map(|actor| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.sell(id, ActorId(actor)).unwrap().wait(WAIT).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<SellOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let sold = outcomes.iter().filter(|o| matches!(o, SellOutcome::Sold { .. })).count();
    assert_eq!(sold, 1, "{outcomes:?}");
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, SellOutcome::Sold { .. } | SellOutcome::Busy | SellOutcome::NothingToSell)));

    let paid = (0..sellers as u64).fold(FixedPoint::ZERO, |sum, actor| {
        sum.checked_add(ledger.balance(ActorId(actor))).unwrap()
    });
    assert_eq!(paid, FixedPoint::from_whole(250));
    assert_eq!(registry.view(id).unwrap().total_items, 0);
}

#[test]
fn test_mixed_operations_keep_books_balanced() {
    let ledger = Arc::new(MemoryLedger::new());
    let registry = Arc::new(registry(ledger.clone()));
    let id = seed_bones(&registry, 1_000);
    let barrier = Arc::new(Barrier::new(3));

    let withdrawer = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut taken = 0;
            for _ in 0..200 {
                let request = vec![ItemStack::new(ItemSignature::of("bone"), 3)];
                if let Ok(WithdrawOutcome::Withdrawn(items)) = registry.withdraw(id, ActorId(1), request).unwrap().wait(WAIT) {
                    taken += items.iter().map(|s| s.amount).sum::<u64>();
                }
            }
            taken
        })
    };
    let claimer = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut claimed = 0;
            for _ in 0..200 {
                if let Ok(ClaimOutcome::Claimed(amount)) = registry.claim_resource(id, ActorId(2)).unwrap().wait(WAIT) {
                    claimed += amount;
                }
            }
            claimed
        })
    };

    barrier.wait();
    let mut sold_items = 0;
    for _ in 0..50 {
        if let Ok(SellOutcome::Sold { item_count, .. }) = registry.sell(id, ActorId(3)).unwrap().wait(WAIT) {
            sold_items += item_count;
        }
    }

    let taken = withdrawer.join().unwrap();
    let claimed = claimer.join().unwrap();
    let left = registry.view(id).unwrap();

    assert_eq!(taken + sold_items + left.total_items, 1_000);
    assert_eq!(claimed + left.resource, 500);
    assert_eq!(
        ledger.balance(ActorId(3)),
        FixedPoint::from_parts(2, 500_000).safe_mul_quantity(sold_items).unwrap()
    );
}

#[test]
fn test_generation_under_contention_respects_capacity() {
    let ledger = Arc::new(MemoryLedger::new());
    let registry = Arc::new(registry(ledger.clone()));
    let world = MemoryWorld::new();
    let mut ids = Vec::new();
    for i in 0..6 {
        let location = Location::new(WorldId(0), Vec3::new(i as f32 * 40.0, 64.0, 0.0));
        ids.push(registry.place(location, "skeleton", 1).unwrap().id());
        world.upsert_actor(Actor::new(ActorId(i), WorldId(0), location.position));
    }

    let seller = {
        let registry = Arc::clone(&registry);
        let ids = ids.clone();
        thread::spawn(move || {
            for round in 0..40 {
                let id = ids[round % ids.len()];
                let _ = registry.sell(id, ActorId(100)).unwrap().wait(WAIT);
            }
        })
    };

    for step in 0..200u64 {
        for (_, ticket) in registry.tick(&world, step * 100).generations {
            let outcome = ticket.wait(WAIT).unwrap();
            assert!(!matches!(outcome, GenerationOutcome::MissingLootTable));
        }
        for id in &ids {
            let view = registry.view(*id).unwrap();
            assert!(view.used_slots <= view.max_slots);
            assert!(view.resource <= view.max_resource);
        }
    }
    seller.join().unwrap();
}
