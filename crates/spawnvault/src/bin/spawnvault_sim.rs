//! # Spawnvault Simulation
//!
//! Runs a small world in virtual time: a few spawners, one wandering
//! actor, periodic sells, then a persistence round trip.
//!
//! Usage: `spawnvault_sim [config.toml] [economy.toml]`

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spawnvault::{
    now_ms, Actor, GenerationOutcome, MemoryLedger, MemoryStore, MemoryWorld, NullPresentation, SellOutcome,
    SpawnerEvent, SpawnerRegistry, SpawnvaultConfig, WorldQuery,
};
use spawnvault_economy::{read_journal, EconomyData, JournalConfig, RecordKind};
use spawnvault_shared::{ActorId, Location, Vec3, WorldId};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG: &str = r#"
default_spawn_interval_ms = 5000
activation_tick_ms = 1000
worker_threads = 2
region_executors = 2
presence_strategy = "spatial"
"#;

const DEFAULT_DATA: &str = r#"
[[items]]
kind = "bow"
max_stack = 1

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
min_amount = 0
max_amount = 2
chance_percent = 60.0
sell_price = 1.25

[[loot_tables.entries]]
item = "bow"
min_amount = 1
max_amount = 1
chance_percent = 8.5
wear = { min = 10, max = 300 }
sell_price = 12.0

[[loot_tables]]
entity = "zombie"
per_mob_yield = 3
min_mobs_per_stack = 2
max_mobs_per_stack = 3

[[loot_tables.entries]]
item = "rotten_flesh"
min_amount = 0
max_amount = 2
chance_percent = 100.0
sell_price = 0.75
"#;

const TICKS: u64 = 120;
const SELL_EVERY: u64 = 30;
const WAIT: Duration = Duration::from_secs(5);

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         SPAWNVAULT SIMULATION                                    ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => SpawnvaultConfig::load_file(path),
        None => SpawnvaultConfig::from_toml_str(DEFAULT_CONFIG),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };
    let data = match args.get(2) {
        Some(path) => EconomyData::load_file(path),
        None => EconomyData::from_toml_str(DEFAULT_DATA),
    };
    let data = match data {
        Ok(data) => data,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };
    if data.skipped > 0 {
        println!("⚠ {} economy entries skipped", data.skipped);
    }

    let tick_ms = config.activation_tick_ms;
    let ledger = Arc::new(MemoryLedger::new());
    let journal_path = std::env::temp_dir().join(format!("spawnvault_sim_{}.log", std::process::id()));
    let registry = SpawnerRegistry::new(config, data, ledger.clone(), Arc::new(NullPresentation))
        .and_then(|registry| registry.open_journal(&journal_path, JournalConfig::default()));
    let registry = match registry {
        Ok(registry) => registry,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };
    let events = registry.subscribe();

    let world = MemoryWorld::new();
    let overworld = WorldId(0);
    let placements = [
        (Vec3::new(0.0, 64.0, 0.0), "skeleton", 2),
        (Vec3::new(40.0, 64.0, 8.0), "zombie", 5),
        (Vec3::new(600.0, 64.0, -300.0), "skeleton", 1),
    ];
    let mut spawners = Vec::new();
    for (position, entity, stack) in placements {
        match registry.place(Location::new(overworld, position), entity, stack) {
            Ok(spawner) => spawners.push(spawner),
            Err(e) => println!("Could not place {entity}: {e}"),
        }
    }

    let player = ActorId(1);
    let mut position = Vec3::new(10.0, 64.0, 0.0);
    world.upsert_actor(Actor::new(player, overworld, position));
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    println!("Placed {} spawners, running {TICKS} ticks of {tick_ms} ms", spawners.len());
    println!();

    let start = now_ms();
    let mut generated = 0u64;
    let mut skipped = 0u64;
    let mut earned_sales = 0u64;

    for tick in 0..TICKS {
        position.x = (position.x + rng.gen_range(-3.0..3.0)).clamp(-20.0, 60.0);
        position.z = (position.z + rng.gen_range(-3.0..3.0)).clamp(-20.0, 30.0);
        world.move_actor(player, position);

        let report = registry.tick(&world, start + tick * tick_ms);
        for id in &report.activated {
            println!("  [{tick:>3}] {id} active");
        }
        for id in &report.deactivated {
            println!("  [{tick:>3}] {id} dormant");
        }
        for (_, ticket) in &report.generations {
            match ticket.wait(WAIT) {
                Ok(GenerationOutcome::Generated { .. }) => generated += 1,
                Ok(_) => skipped += 1,
                Err(e) => println!("  [{tick:>3}] generation lost: {e}"),
            }
        }

        if tick > 0 && tick % SELL_EVERY == 0 {
            for spawner in &spawners {
                let id = spawner.id();
                let outcome = registry.sell(id, player).and_then(|ticket| ticket.wait(WAIT));
                match outcome.and_then(|outcome| match outcome {
                    SellOutcome::NothingToSell => Ok(None),
                    other => other.into_result(id).map(Some),
                }) {
                    Ok(Some((total, item_count))) => {
                        earned_sales += 1;
                        println!("  [{tick:>3}] {id} sold {item_count} items for {total}");
                    }
                    Ok(None) => {}
                    Err(e) => println!("  [{tick:>3}] {id} sell failed: {e}"),
                }
            }
        }
    }

    let nearby = world
        .qualifying_actors_near(Location::new(overworld, Vec3::ZERO), 16.0)
        .len();
    let published = events.drain();
    let inconsistencies = published
        .iter()
        .filter(|event| matches!(event, SpawnerEvent::RemovalInconsistency { .. }))
        .count();

    println!();
    println!("┌─ RESULTS ────────────────────────────────────────────────────────┐");
    println!("│ Cycles generated:     {generated}");
    println!("│ Cycles skipped:       {skipped}");
    println!("│ Sales:                {earned_sales}");
    println!("│ Balance:              {}", ledger.balance(player));
    println!("│ Events published:     {}", published.len());
    println!("│ Actors near origin:   {nearby}");
    for spawner in &spawners {
        let view = spawner.view();
        println!(
            "│ {:<12} {:<9} stack {:>2}  slots {:>3}/{:<3} resource {:>5}/{:<5} {:?}",
            view.id.to_string(),
            view.entity,
            view.stack_size,
            view.used_slots,
            view.max_slots,
            view.resource,
            view.max_resource,
            view.activation,
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let store = MemoryStore::new();
    match registry.persist_modified(&store) {
        Ok(saved) => println!("Persisted {saved} spawners"),
        Err(e) => println!("Persist failed: {e}"),
    }
    if let Some(snapshot) = spawners.first().and_then(|spawner| store.get(spawner.id())) {
        match toml::to_string(&snapshot) {
            Ok(text) => println!("{text}"),
            Err(e) => println!("Snapshot not printable: {e}"),
        }
    }

    registry.deactivate_all();
    drop(registry);
    match read_journal(&journal_path) {
        Ok(frames) => {
            let audited = frames.iter().filter(|frame| frame.kind == RecordKind::Sale).count();
            println!("Audit journal: {audited} sales in {} frames", frames.len());
        }
        Err(e) => println!("Audit journal unreadable: {e}"),
    }
    let _ = std::fs::remove_file(&journal_path);

    if inconsistencies == 0 {
        println!("✓ No removal inconsistencies");
    } else {
        println!("⚠ {inconsistencies} removal inconsistencies - manual review recommended");
    }
}
