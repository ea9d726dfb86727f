//! # Item Signatures
//!
//! Items are never stored one by one. A spawner keeps a counter per
//! [`ItemSignature`]: everything that makes two items interchangeable
//! (kind, enchantments, custom model, display name, wear, status effect)
//! and nothing else. Quantity is carried separately by [`ItemStack`].
//!
//! Two keys are derived from the same signature:
//!
//! - the signature itself is the **consolidation key**,
//! - [`ItemSignature::pricing_key`] drops wear so a worn bow and a fresh bow
//!   sell for the same price.
//!
//! The pricing key is always computed from the signature, never stored.

use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher24};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

/// Default maximum stack size for kinds missing from the catalog.
pub const DEFAULT_MAX_STACK: u32 = 64;

/// Fingerprint keys. Changing them invalidates journaled fingerprints.
const FINGERPRINT_KEYS: (u64, u64) = (0x5350_4157_4E56_4155, 0x4C54_5349_474E_0001);

/// Base item type, e.g. `"bone"` or `"tipped_arrow"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKind(String);

impl ItemKind {
    /// Creates a kind from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The kind name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Status effect carried by an item (tipped arrows, potions).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatusEffect {
    /// Effect name.
    pub effect: String,
    /// Duration in ticks.
    pub duration_ticks: u32,
    /// Amplifier (0 = level I).
    pub amplifier: u8,
}

/// Canonical identity of an item, excluding quantity.
///
/// Field order matters: the derived ordering sorts by kind first, which is
/// the order used by trimming and by paged display.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemSignature {
    /// Base item type.
    pub kind: ItemKind,
    /// Enchantment name -> level. Ordered so equal sets compare equal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enchantments: BTreeMap<String, u8>,
    /// Custom model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_model: Option<u32>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Accumulated wear (durability damage). Ignored for pricing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wear: Option<u16>,
    /// Status effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<StatusEffect>,
}

impl ItemSignature {
    /// Plain item of the given kind.
    #[must_use]
    pub fn of(kind: impl Into<ItemKind>) -> Self {
        Self {
            kind: kind.into(),
            enchantments: BTreeMap::new(),
            custom_model: None,
            display_name: None,
            wear: None,
            effect: None,
        }
    }

    /// Adds an enchantment.
    #[must_use]
    pub fn with_enchantment(mut self, name: impl Into<String>, level: u8) -> Self {
        self.enchantments.insert(name.into(), level);
        self
    }

    /// Sets the custom model id.
    #[must_use]
    pub fn with_custom_model(mut self, model: u32) -> Self {
        self.custom_model = Some(model);
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the wear.
    #[must_use]
    pub fn with_wear(mut self, wear: u16) -> Self {
        self.wear = Some(wear);
        self
    }

    /// Sets the status effect.
    #[must_use]
    pub fn with_effect(mut self, effect: StatusEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Coarse key used for pricing: the signature without wear.
    #[must_use]
    pub fn pricing_key(&self) -> PricingKey {
        PricingKey {
            kind: self.kind.clone(),
            enchantments: self.enchantments.clone(),
            custom_model: self.custom_model,
            display_name: self.display_name.clone(),
            effect: self.effect.clone(),
        }
    }

    /// 128-bit fingerprint of the signature.
    ///
    /// Stable across processes, used where a compact id is needed
    /// (journal payloads).
    #[must_use]
    pub fn fingerprint(&self) -> u128 {
        let mut hasher = SipHasher24::new_with_keys(FINGERPRINT_KEYS.0, FINGERPRINT_KEYS.1);
        self.hash(&mut hasher);
        hasher.finish128().as_u128()
    }
}

impl fmt::Display for ItemSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{name} ({})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Pricing identity: kind plus everything except wear.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PricingKey {
    /// Base item type.
    pub kind: ItemKind,
    /// Enchantments.
    pub enchantments: BTreeMap<String, u8>,
    /// Custom model id.
    pub custom_model: Option<u32>,
    /// Display name.
    pub display_name: Option<String>,
    /// Status effect.
    pub effect: Option<StatusEffect>,
}

/// A quantity of one signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// What the items are.
    pub signature: ItemSignature,
    /// How many.
    pub amount: u64,
}

impl ItemStack {
    /// Creates a new stack.
    #[must_use]
    pub fn new(signature: ItemSignature, amount: u64) -> Self {
        Self { signature, amount }
    }
}

/// Per-kind item properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Maximum stack size of one slot.
    pub max_stack: u32,
    /// Maximum durability for damageable items.
    #[serde(default)]
    pub max_durability: Option<u16>,
}

/// Registry of item kinds, built at startup and injected where needed.
#[derive(Clone, Debug, Default)]
pub struct ItemCatalog {
    entries: HashMap<ItemKind, CatalogEntry>,
}

impl ItemCatalog {
    /// Creates an empty catalog. Unknown kinds stack to [`DEFAULT_MAX_STACK`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a kind.
    pub fn register(&mut self, kind: impl Into<ItemKind>, entry: CatalogEntry) {
        self.entries.insert(kind.into(), entry);
    }

    /// Builder form of [`ItemCatalog::register`].
    #[must_use]
    pub fn with(mut self, kind: impl Into<ItemKind>, max_stack: u32) -> Self {
        self.register(kind, CatalogEntry { max_stack, max_durability: None });
        self
    }

    /// Properties of a kind, if registered.
    #[must_use]
    pub fn get(&self, kind: &ItemKind) -> Option<&CatalogEntry> {
        self.entries.get(kind)
    }

    /// Maximum stack size of a kind. Never zero.
    #[inline]
    #[must_use]
    pub fn max_stack(&self, kind: &ItemKind) -> u64 {
        let max = self.entries.get(kind).map_or(DEFAULT_MAX_STACK, |e| e.max_stack);
        u64::from(max.max(1))
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no kind is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wear_splits_consolidation_but_not_pricing() {
        let fresh = ItemSignature::of("bow").with_enchantment("power", 2);
        let worn = fresh.clone().with_wear(120);

        assert_ne!(fresh, worn);
        assert_eq!(fresh.pricing_key(), worn.pricing_key());
    }

    #[test]
    fn test_enchantment_order_is_canonical() {
        let a = ItemSignature::of("sword")
            .with_enchantment("sharpness", 3)
            .with_enchantment("looting", 1);
        let b = ItemSignature::of("sword")
            .with_enchantment("looting", 1)
            .with_enchantment("sharpness", 3);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_signatures_sort_by_kind_first() {
        let mut sigs = vec![
            ItemSignature::of("string"),
            ItemSignature::of("arrow").with_display_name("Zed"),
            ItemSignature::of("bone"),
        ];
        sigs.sort();
        let kinds: Vec<_> = sigs.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, ["arrow", "bone", "string"]);
    }

    #[test]
    fn test_catalog_defaults() {
        let catalog = ItemCatalog::new().with("bow", 1).with("broken", 0);
        assert_eq!(catalog.max_stack(&ItemKind::new("bow")), 1);
        assert_eq!(catalog.max_stack(&ItemKind::new("broken")), 1);
        assert_eq!(catalog.max_stack(&ItemKind::new("bone")), 64);
    }
}
