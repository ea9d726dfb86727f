//! # Pricing
//!
//! Turns a consolidated inventory snapshot into a [`SellQuote`].
//!
//! Prices are looked up by [`PricingKey`], so wear never changes what an
//! item is worth. Signatures with no price, or a zero price, are left in
//! the inventory.

use std::collections::{BTreeMap, HashMap};

use crate::error::EconomyResult;
use crate::fixed_point::FixedPoint;
use crate::item::{ItemKind, ItemSignature, ItemStack, PricingKey};

/// Source of unit prices.
///
/// Implementations are shared between worker threads.
pub trait PricingSource: Send + Sync {
    /// Unit price for a pricing key, if the item can be sold at all.
    fn price(&self, key: &PricingKey) -> Option<FixedPoint>;
}

/// In-memory price list.
///
/// Kind-level prices cover every variant of a kind; exact-key overrides
/// win over them (e.g. a named or enchanted variant).
#[derive(Clone, Debug, Default)]
pub struct PriceBook {
    by_kind: HashMap<ItemKind, FixedPoint>,
    overrides: HashMap<PricingKey, FixedPoint>,
}

impl PriceBook {
    /// Creates an empty price book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the price of every variant of a kind.
    pub fn set_kind_price(&mut self, kind: impl Into<ItemKind>, price: FixedPoint) {
        self.by_kind.insert(kind.into(), price);
    }

    /// Builder form of [`PriceBook::set_kind_price`].
    #[must_use]
    pub fn with_kind_price(mut self, kind: impl Into<ItemKind>, price: FixedPoint) -> Self {
        self.set_kind_price(kind, price);
        self
    }

    /// Sets the price of one exact pricing key.
    pub fn set_override(&mut self, key: PricingKey, price: FixedPoint) {
        self.overrides.insert(key, price);
    }

    /// Number of priced kinds and overrides.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.len() + self.overrides.len()
    }

    /// Returns true if nothing is priced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PricingSource for PriceBook {
    fn price(&self, key: &PricingKey) -> Option<FixedPoint> {
        self.overrides
            .get(key)
            .or_else(|| self.by_kind.get(&key.kind))
            .copied()
    }
}

/// Priced removal plan for one sell attempt.
///
/// Built from a snapshot and only valid against that snapshot: a retry
/// must build a new quote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SellQuote {
    /// Total currency value.
    pub total: FixedPoint,
    /// Total number of items to remove.
    pub item_count: u64,
    /// Exact stacks to remove, sorted by signature.
    pub removals: Vec<ItemStack>,
    /// True when at least one item is sellable.
    pub success: bool,
}

impl SellQuote {
    /// Prices a consolidated snapshot.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::ArithmeticOverflow` if the total does not fit.
    pub fn build(
        snapshot: &BTreeMap<ItemSignature, u64>,
        prices: &dyn PricingSource,
    ) -> EconomyResult<Self> {
        let mut total = FixedPoint::ZERO;
        let mut item_count = 0u64;
        let mut removals = Vec::new();

        for (signature, &amount) in snapshot {
            if amount == 0 {
                continue;
            }
            let Some(unit) = prices.price(&signature.pricing_key()) else {
                continue;
            };
            if unit.is_zero() {
                continue;
            }

            total = total.safe_add(unit.safe_mul_quantity(amount)?)?;
            item_count = item_count.saturating_add(amount);
            removals.push(ItemStack::new(signature.clone(), amount));
        }

        Ok(Self {
            total,
            item_count,
            success: !removals.is_empty(),
            removals,
        })
    }

    /// Quote with nothing to sell.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            total: FixedPoint::ZERO,
            item_count: 0,
            removals: Vec::new(),
            success: false,
        }
    }
}
