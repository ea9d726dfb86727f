//! # Spawnvault Economy
//!
//! Pure logic behind every spawner: what it stores, what it produces and
//! what that is worth.
//!
//! ## Design Principles
//!
//! 1. **Counters, not items** - inventories store one counter per signature
//! 2. **Capacity is slots** - `Σ ceil(qty / max_stack) ≤ max_slots` after every capacity-aware insert
//! 3. **Zero floating point in totals** - money is fixed-point
//! 4. **Reproducible loot** - every draw goes through a seedable RNG
//! 5. **External configuration** - catalog, loot tables and prices live in TOML
//!
//! ## Thread Safety
//!
//! Nothing in this crate spawns threads except the audit journal writer.
//! Callers own synchronization of inventories.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use spawnvault_economy::{ItemCatalog, ItemSignature, ItemStack, VirtualInventory};
//!
//! let catalog = Arc::new(ItemCatalog::new());
//! let mut inventory = VirtualInventory::new(catalog, 45);
//! let report = inventory.insert_trimmed(&[ItemStack::new(ItemSignature::of("bone"), 2_880)]);
//! assert_eq!(report.accepted_amount, 2_880);
//! assert!(inventory.is_full());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod data;
pub mod error;
pub mod fixed_point;
pub mod inventory;
pub mod item;
pub mod journal;
pub mod loot;
pub mod pricing;

pub use data::EconomyData;
pub use error::{EconomyError, EconomyResult};
pub use fixed_point::FixedPoint;
pub use inventory::{InsertReport, VirtualInventory};
pub use item::{CatalogEntry, ItemCatalog, ItemKind, ItemSignature, ItemStack, PricingKey, StatusEffect};
pub use journal::{read_journal, AuditJournal, JournalConfig, JournalFrame, RecordKind, TradeRecord};
pub use loot::{cycle_rng, EffectSpec, EntryRoll, LootBatch, LootEntry, LootGenerator, LootTable, WearRange};
pub use pricing::{PriceBook, PricingSource, SellQuote};
