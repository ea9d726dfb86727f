//! # Loot Generation
//!
//! **Batch Bernoulli drops, reproducible from a seed**
//!
//! One generation cycle of a spawner simulates `mob_count` virtual kills at
//! once instead of spawning anything:
//!
//! ```text
//! mob_count   ~ U[min_mobs_per_stack * stack, max_mobs_per_stack * stack]
//! resource    = per_mob_yield * mob_count
//! per entry:  successes ~ Binomial(mob_count, chance)   (explicit trials)
//!             amount    = Σ U[min_amount, max_amount] over the successes
//!             one prototype item (fresh wear / effect roll) carries amount
//! ```
//!
//! The batch is consolidated by signature before it is returned, so two
//! entries producing the same item collapse into one counter.
//!
//! ## Determinism
//!
//! Every random draw goes through the caller's RNG. The runtime derives a
//! fresh `ChaCha8Rng` per cycle with [`cycle_rng`]; tests pass a seeded one.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher24;
use std::collections::BTreeMap;
use std::hash::Hasher;

use crate::error::{EconomyError, EconomyResult};
use crate::item::{ItemKind, ItemSignature, ItemStack, StatusEffect};

/// Wear range rolled for damageable drops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WearRange {
    /// Minimum wear.
    pub min: u16,
    /// Maximum wear (inclusive).
    pub max: u16,
}

/// Status effect rolled for tipped drops.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectSpec {
    /// Candidate effects; one is picked per prototype.
    pub effects: Vec<String>,
    /// Minimum duration in ticks.
    pub min_duration_ticks: u32,
    /// Maximum duration in ticks (inclusive).
    pub max_duration_ticks: u32,
    /// Amplifier applied to the picked effect.
    #[serde(default)]
    pub amplifier: u8,
}

/// A single entry in a loot table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LootEntry {
    /// Item kind dropped.
    pub item: ItemKind,
    /// Minimum amount per successful drop.
    pub min_amount: u32,
    /// Maximum amount per successful drop (inclusive).
    pub max_amount: u32,
    /// Drop chance per mob, in percent (0-100).
    pub chance_percent: f64,
    /// Optional wear roll.
    #[serde(default)]
    pub wear: Option<WearRange>,
    /// Optional status effect roll.
    #[serde(default)]
    pub effect: Option<EffectSpec>,
    /// Unit sell price, merged into the price book at load time.
    #[serde(default)]
    pub sell_price: Option<f64>,
}

impl LootEntry {
    /// Checks the entry's ranges.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` describing the first problem.
    pub fn validate(&self) -> EconomyResult<()> {
        let fail = |why: &str| Err(EconomyError::InvalidConfig(format!("{}: {why}", self.item)));

        if self.item.as_str().is_empty() {
            return fail("empty item kind");
        }
        if self.min_amount > self.max_amount {
            return fail("min_amount > max_amount");
        }
        if !(0.0..=100.0).contains(&self.chance_percent) {
            return fail("chance_percent outside 0-100");
        }
        if let Some(wear) = self.wear {
            if wear.min > wear.max {
                return fail("wear.min > wear.max");
            }
        }
        if let Some(effect) = &self.effect {
            if effect.effects.is_empty() {
                return fail("effect without candidates");
            }
            if effect.min_duration_ticks > effect.max_duration_ticks {
                return fail("effect duration range inverted");
            }
        }
        if let Some(price) = self.sell_price {
            if !price.is_finite() || price < 0.0 {
                return fail("negative or non-finite sell_price");
            }
        }
        Ok(())
    }

    /// Rolls a fresh prototype signature for this entry.
    fn prototype<R: Rng + ?Sized>(&self, rng: &mut R) -> ItemSignature {
        let mut signature = ItemSignature::of(self.item.clone());
        if let Some(wear) = self.wear {
            signature.wear = Some(rng.gen_range(wear.min..=wear.max));
        }
        if let Some(spec) = &self.effect {
            let effect = spec.effects[rng.gen_range(0..spec.effects.len())].clone();
            signature.effect = Some(StatusEffect {
                effect,
                duration_ticks: rng.gen_range(spec.min_duration_ticks..=spec.max_duration_ticks),
                amplifier: spec.amplifier,
            });
        }
        signature
    }
}

/// Loot table of one entity kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LootTable {
    /// Entity kind this table belongs to (e.g. `"skeleton"`).
    pub entity: String,
    /// Resource (experience) yielded per mob.
    #[serde(default)]
    pub per_mob_yield: u32,
    /// Minimum mobs per cycle, per stacked spawner.
    pub min_mobs_per_stack: u32,
    /// Maximum mobs per cycle, per stacked spawner (inclusive).
    pub max_mobs_per_stack: u32,
    /// Drop entries.
    #[serde(default)]
    pub entries: Vec<LootEntry>,
}

impl LootTable {
    /// Mob count range for a given stack size.
    #[must_use]
    pub fn mob_range(&self, stack_size: u32) -> (u64, u64) {
        let stack = u64::from(stack_size.max(1));
        let min = u64::from(self.min_mobs_per_stack) * stack;
        let max = u64::from(self.max_mobs_per_stack) * stack;
        (min.min(max), max.max(min))
    }

    /// Drops invalid entries, logging each one. Returns how many were dropped.
    pub fn retain_valid_entries(&mut self) -> usize {
        let before = self.entries.len();
        let entity = self.entity.clone();
        self.entries.retain(|entry| match entry.validate() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("loot table {entity}: skipping entry ({err})");
                false
            }
        });
        before - self.entries.len()
    }
}

/// Roll details of one table entry within a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryRoll {
    /// Item kind of the entry.
    pub item: ItemKind,
    /// Bernoulli successes out of `mob_count` trials.
    pub successful_drops: u64,
    /// Summed amount over all successes.
    pub amount: u64,
}

/// Output of one generation cycle. Consumed immediately by insertion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LootBatch {
    /// Virtual mobs killed this cycle.
    pub mob_count: u64,
    /// Resource counter increment.
    pub resource: u64,
    /// Consolidated items, sorted by signature.
    pub items: Vec<ItemStack>,
    /// Per-entry roll details, in table order.
    pub rolls: Vec<EntryRoll>,
}

impl LootBatch {
    /// Total number of items in the batch.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.items.iter().map(|s| s.amount).sum()
    }

    /// True when the cycle produced nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource == 0 && self.items.is_empty()
    }
}

/// Stateless batch generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct LootGenerator;

impl LootGenerator {
    /// Produces one batch for a spawner of `stack_size` using `table`.
    pub fn generate<R: Rng + ?Sized>(table: &LootTable, stack_size: u32, rng: &mut R) -> LootBatch {
        let (min_mobs, max_mobs) = table.mob_range(stack_size);
        let mob_count = rng.gen_range(min_mobs..=max_mobs);
        let resource = u64::from(table.per_mob_yield).saturating_mul(mob_count);

        let mut consolidated: BTreeMap<ItemSignature, u64> = BTreeMap::new();
        let mut rolls = Vec::with_capacity(table.entries.len());

        for entry in &table.entries {
            let roll = Self::roll_entry(entry, mob_count, rng);
            if roll.amount > 0 {
                let prototype = entry.prototype(rng);
                let merged = consolidated.entry(prototype).or_insert(0);
                *merged = merged.saturating_add(roll.amount);
            }
            rolls.push(roll);
        }

        LootBatch {
            mob_count,
            resource,
            items: consolidated
                .into_iter()
                .map(|(signature, amount)| ItemStack::new(signature, amount))
                .collect(),
            rolls,
        }
    }

    /// Runs `mob_count` independent trials for one entry.
    pub fn roll_entry<R: Rng + ?Sized>(entry: &LootEntry, mob_count: u64, rng: &mut R) -> EntryRoll {
        let chance = (entry.chance_percent / 100.0).clamp(0.0, 1.0);
        let mut successful_drops = 0u64;
        let mut amount = 0u64;

        for _ in 0..mob_count {
            if rng.gen_bool(chance) {
                successful_drops += 1;
                amount += u64::from(rng.gen_range(entry.min_amount..=entry.max_amount));
            }
        }

        EntryRoll {
            item: entry.item.clone(),
            successful_drops,
            amount,
        }
    }
}

/// Derives the RNG for one generation cycle.
///
/// Mixes the master seed, the spawner and the cycle number so that worker
/// threads never share RNG state and any cycle can be replayed.
#[must_use]
pub fn cycle_rng(master_seed: u64, spawner: u64, cycle: u64) -> ChaCha8Rng {
    let mut hasher = SipHasher24::new_with_keys(master_seed, master_seed.rotate_left(29));
    hasher.write_u64(spawner);
    hasher.write_u64(cycle);
    ChaCha8Rng::seed_from_u64(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(item: &str, min: u32, max: u32, chance: f64) -> LootEntry {
        LootEntry {
            item: ItemKind::new(item),
            min_amount: min,
            max_amount: max,
            chance_percent: chance,
            wear: None,
            effect: None,
            sell_price: None,
        }
    }

    fn skeleton() -> LootTable {
        LootTable {
            entity: "skeleton".to_string(),
            per_mob_yield: 5,
            min_mobs_per_stack: 1,
            max_mobs_per_stack: 4,
            entries: vec![
                entry("bone", 0, 2, 100.0),
                entry("arrow", 0, 2, 100.0),
                LootEntry {
                    wear: Some(WearRange { min: 0, max: 380 }),
                    ..entry("bow", 1, 1, 8.5)
                },
            ],
        }
    }

    #[test]
    fn test_certain_single_drop_consolidates() {
        let table = LootTable {
            entity: "test".to_string(),
            per_mob_yield: 2,
            min_mobs_per_stack: 5,
            max_mobs_per_stack: 5,
            entries: vec![entry("bone", 1, 1, 100.0)],
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let batch = LootGenerator::generate(&table, 1, &mut rng);

        assert_eq!(batch.mob_count, 5);
        assert_eq!(batch.resource, 10);
        assert_eq!(batch.items, vec![ItemStack::new(ItemSignature::of("bone"), 5)]);
    }

    #[test]
    fn test_loot_bounds() {
        let table = skeleton();
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        for stack in 1..=20 {
            let (min, max) = table.mob_range(stack);
            let batch = LootGenerator::generate(&table, stack, &mut rng);
            assert!(min <= batch.mob_count && batch.mob_count <= max);
            for roll in &batch.rolls {
                assert!(roll.successful_drops <= batch.mob_count);
            }
        }
    }

    #[test]
    fn test_same_seed_same_batch() {
        let table = skeleton();
        let a = LootGenerator::generate(&table, 7, &mut cycle_rng(1234, 9, 3));
        let b = LootGenerator::generate(&table, 7, &mut cycle_rng(1234, 9, 3));
        assert_eq!(a, b);

        let different = (0..20)
            .map(|cycle| LootGenerator::generate(&table, 7, &mut cycle_rng(1234, 9, cycle)))
            .any(|c| c != a);
        assert!(different, "cycles should not all repeat");
    }

    #[test]
    fn test_duplicate_kinds_collapse() {
        let table = LootTable {
            entity: "dup".to_string(),
            per_mob_yield: 0,
            min_mobs_per_stack: 3,
            max_mobs_per_stack: 3,
            entries: vec![entry("bone", 1, 1, 100.0), entry("bone", 2, 2, 100.0)],
        };
        let batch = LootGenerator::generate(&table, 1, &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(batch.items, vec![ItemStack::new(ItemSignature::of("bone"), 9)]);
    }

    #[test]
    fn test_zero_chance_never_drops() {
        let roll = LootGenerator::roll_entry(&entry("gold", 1, 9, 0.0), 1_000, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(roll.successful_drops, 0);
        assert_eq!(roll.amount, 0);
    }

    #[test]
    fn test_effect_prototype_rolls() {
        let tipped = LootEntry {
            effect: Some(EffectSpec {
                effects: vec!["slowness".to_string()],
                min_duration_ticks: 100,
                max_duration_ticks: 100,
                amplifier: 1,
            }),
            ..entry("tipped_arrow", 1, 1, 100.0)
        };
        let table = LootTable {
            entity: "stray".to_string(),
            per_mob_yield: 0,
            min_mobs_per_stack: 2,
            max_mobs_per_stack: 2,
            entries: vec![tipped],
        };
        let batch = LootGenerator::generate(&table, 1, &mut ChaCha8Rng::seed_from_u64(8));
        let effect = batch.items[0].signature.effect.as_ref().unwrap();
        assert_eq!(effect.effect, "slowness");
        assert_eq!(effect.duration_ticks, 100);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let mut table = skeleton();
        table.entries.push(entry("bad", 5, 1, 50.0));
        table.entries.push(entry("worse", 1, 1, 150.0));

        assert_eq!(table.retain_valid_entries(), 2);
        assert_eq!(table.entries.len(), 3);
    }
}
