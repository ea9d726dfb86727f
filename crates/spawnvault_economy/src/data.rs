//! # Economy Data Loading
//!
//! Item catalog, loot tables and prices come from one TOML document:
//!
//! ```toml
//! [[items]]
//! kind = "bow"
//! max_stack = 1
//!
//! [[loot_tables]]
//! entity = "skeleton"
//! per_mob_yield = 5
//! min_mobs_per_stack = 1
//! max_mobs_per_stack = 4
//!
//! [[loot_tables.entries]]
//! item = "bone"
//! min_amount = 0
//! max_amount = 2
//! chance_percent = 100.0
//! sell_price = 2.5
//!
//! [prices]
//! arrow = 1.25
//! ```
//!
//! Malformed entries are skipped with a warning; the rest still loads.
//! Only a document that is not valid TOML at all fails.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{EconomyError, EconomyResult};
use crate::fixed_point::FixedPoint;
use crate::item::{CatalogEntry, ItemCatalog, ItemKind};
use crate::loot::{LootEntry, LootTable};
use crate::pricing::PriceBook;

/// Everything the economy needs at startup.
#[derive(Debug, Default)]
pub struct EconomyData {
    /// Item kinds and their stack sizes.
    pub catalog: ItemCatalog,
    /// Loot tables by entity kind.
    pub loot_tables: HashMap<String, LootTable>,
    /// Unit prices.
    pub prices: PriceBook,
    /// Number of entries skipped while loading.
    pub skipped: usize,
}

#[derive(Deserialize)]
struct CatalogRow {
    kind: ItemKind,
    #[serde(flatten)]
    entry: CatalogEntry,
}

#[derive(Deserialize)]
struct TableHeader {
    entity: String,
    #[serde(default)]
    per_mob_yield: u32,
    min_mobs_per_stack: u32,
    max_mobs_per_stack: u32,
}

impl EconomyData {
    /// Loads a data file from disk.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` if the file cannot be read or
    /// is not a TOML document.
    pub fn load_file(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EconomyError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parses a data document.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::InvalidConfig` if the document is not TOML.
    pub fn from_toml_str(content: &str) -> EconomyResult<Self> {
        let document: toml::Table = content
            .parse()
            .map_err(|e: toml::de::Error| EconomyError::InvalidConfig(e.to_string()))?;

        let mut data = Self::default();

        for row in array(&document, "items") {
            match row.clone().try_into::<CatalogRow>() {
                Ok(row) => data.catalog.register(row.kind, row.entry),
                Err(err) => data.skip(&format!("item entry: {err}")),
            }
        }

        for raw in array(&document, "loot_tables") {
            data.load_table(raw);
        }

        if let Some(prices) = document.get("prices").and_then(toml::Value::as_table) {
            for (kind, value) in prices {
                match value.as_float().or_else(|| value.as_integer().map(|i| i as f64)) {
                    Some(price) => data.set_price(kind, price),
                    None => data.skip(&format!("price of {kind}: not a number")),
                }
            }
        }

        Ok(data)
    }

    /// Returns the loot table of an entity kind.
    #[must_use]
    pub fn loot_table(&self, entity: &str) -> Option<&LootTable> {
        self.loot_tables.get(entity)
    }

    fn load_table(&mut self, raw: &toml::Value) {
        let header = match raw.clone().try_into::<TableHeader>() {
            Ok(header) => header,
            Err(err) => return self.skip(&format!("loot table: {err}")),
        };
        if header.min_mobs_per_stack > header.max_mobs_per_stack {
            return self.skip(&format!("loot table {}: min_mobs_per_stack > max_mobs_per_stack", header.entity));
        }

        let mut table = LootTable {
            entity: header.entity,
            per_mob_yield: header.per_mob_yield,
            min_mobs_per_stack: header.min_mobs_per_stack,
            max_mobs_per_stack: header.max_mobs_per_stack,
            entries: Vec::new(),
        };

        let entries = raw.get("entries").and_then(toml::Value::as_array);
        for entry in entries.into_iter().flatten() {
            match entry.clone().try_into::<LootEntry>() {
                Ok(entry) => table.entries.push(entry),
                Err(err) => self.skip(&format!("loot table {}: entry: {err}", table.entity)),
            }
        }
        self.skipped += table.retain_valid_entries();

        for entry in &table.entries {
            if let Some(price) = entry.sell_price {
                self.set_price(entry.item.as_str(), price);
            }
        }

        self.loot_tables.insert(table.entity.clone(), table);
    }

    fn set_price(&mut self, kind: &str, price: f64) {
        match FixedPoint::from_decimal(price) {
            Some(price) => self.prices.set_kind_price(kind, price),
            None => self.skip(&format!("price of {kind}: {price} is not a valid amount")),
        }
    }

    fn skip(&mut self, what: &str) {
        tracing::warn!("economy data: skipping {what}");
        self.skipped += 1;
    }
}

fn array<'a>(document: &'a toml::Table, key: &str) -> impl Iterator<Item = &'a toml::Value> {
    document
        .get(key)
        .and_then(toml::Value::as_array)
        .into_iter()
        .flatten()
}
