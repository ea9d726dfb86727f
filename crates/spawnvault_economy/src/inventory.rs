//! # Virtual Inventory
//!
//! Capacity-bounded, consolidated storage for a spawner's loot.
//!
//! Items are held as one counter per [`ItemSignature`] with no physical stack
//! limit. Capacity is expressed in *slots*: a signature holding `q` items of
//! a kind stacking to `m` occupies `ceil(q / m)` slots.
//!
//! ## Invariant
//!
//! ```text
//! Σ ceil(qty(sig) / max_stack(sig)) <= max_slots
//! ```
//!
//! holds after every insertion made through [`VirtualInventory::insert_trimmed`].
//! Plain [`VirtualInventory::add`] trusts its caller and is never rejected.
//!
//! The slot count is maintained incrementally on every counter change, so
//! `used_slots()` is O(1).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::item::{ItemCatalog, ItemSignature, ItemStack};

/// Slots needed to hold `amount` items stacking to `max_stack`.
#[inline]
fn slots_for(amount: u64, max_stack: u64) -> u64 {
    amount.div_ceil(max_stack)
}

/// Outcome of a capacity-aware insertion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Stacks that were (or would be) inserted, sorted by signature.
    pub accepted: Vec<ItemStack>,
    /// Total accepted amount.
    pub accepted_amount: u64,
    /// Total amount that did not fit.
    pub dropped_amount: u64,
}

impl InsertReport {
    /// True if part of the candidate batch was trimmed away.
    #[inline]
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.dropped_amount > 0
    }
}

/// Consolidated, capacity-aware item store owned by one spawner.
#[derive(Clone, Debug)]
pub struct VirtualInventory {
    /// Item kind registry (max stack sizes).
    catalog: Arc<ItemCatalog>,
    /// Signature -> quantity. Never holds zero quantities.
    counters: BTreeMap<ItemSignature, u64>,
    /// Capacity in slots.
    max_slots: u64,
    /// Cached slot usage.
    used_slots: u64,
    /// Presentation must re-render.
    dirty: bool,
}

impl VirtualInventory {
    /// Creates an empty inventory with the given slot capacity.
    #[must_use]
    pub fn new(catalog: Arc<ItemCatalog>, max_slots: u64) -> Self {
        Self {
            catalog,
            counters: BTreeMap::new(),
            max_slots,
            used_slots: 0,
            dirty: false,
        }
    }

    /// Rebuilds an inventory from persisted stacks.
    ///
    /// Restored content is trusted: it was valid when it was saved.
    #[must_use]
    pub fn from_stacks(catalog: Arc<ItemCatalog>, max_slots: u64, stacks: &[ItemStack]) -> Self {
        let mut inventory = Self::new(catalog, max_slots);
        inventory.add(stacks);
        inventory.dirty = false;
        inventory
    }

    /// The item catalog this inventory uses.
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &Arc<ItemCatalog> {
        &self.catalog
    }

    /// Capacity in slots.
    #[inline]
    #[must_use]
    pub const fn max_slots(&self) -> u64 {
        self.max_slots
    }

    /// Changes the capacity (stack resize). Content is left untouched.
    pub fn set_max_slots(&mut self, max_slots: u64) {
        self.max_slots = max_slots;
        self.dirty = true;
    }

    /// Slots currently in use.
    #[inline]
    #[must_use]
    pub const fn used_slots(&self) -> u64 {
        self.used_slots
    }

    /// Slots still free.
    #[inline]
    #[must_use]
    pub const fn free_slots(&self) -> u64 {
        self.max_slots.saturating_sub(self.used_slots)
    }

    /// True when no slot is free.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.used_slots >= self.max_slots
    }

    /// True when nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Quantity held for one signature.
    #[inline]
    #[must_use]
    pub fn available(&self, signature: &ItemSignature) -> u64 {
        self.counters.get(signature).copied().unwrap_or(0)
    }

    /// Total number of items across all signatures.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.counters.values().sum()
    }

    /// True if the view must be re-rendered.
    #[inline]
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag after a render.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Sets one counter and keeps the slot cache in step.
    fn set_quantity(&mut self, signature: &ItemSignature, quantity: u64) {
        let max_stack = self.catalog.max_stack(&signature.kind);
        let old = self.available(signature);
        self.used_slots = (self.used_slots - slots_for(old, max_stack)).saturating_add(slots_for(quantity, max_stack));

        if quantity == 0 {
            self.counters.remove(signature);
        } else if let Some(counter) = self.counters.get_mut(signature) {
            *counter = quantity;
        } else {
            self.counters.insert(signature.clone(), quantity);
        }
        self.dirty = true;
    }

    /// Merges every stack into its signature's counter. Never rejected.
    pub fn add(&mut self, items: &[ItemStack]) {
        for item in items.iter().filter(|i| i.amount > 0) {
            let current = self.available(&item.signature);
            self.set_quantity(&item.signature, current.saturating_add(item.amount));
        }
    }

    /// Removes each requested amount, flooring each counter at zero.
    ///
    /// Returns `true` only if every requested amount was fully present.
    /// Shortfalls are not rolled back: callers validate with
    /// [`VirtualInventory::available`] first.
    pub fn remove(&mut self, items: &[ItemStack]) -> bool {
        let mut satisfied = true;
        for item in items.iter().filter(|i| i.amount > 0) {
            let current = self.available(&item.signature);
            if current < item.amount {
                satisfied = false;
            }
            if current > 0 {
                self.set_quantity(&item.signature, current.saturating_sub(item.amount));
            }
        }
        satisfied
    }

    /// Point-in-time copy of signature -> quantity.
    #[must_use]
    pub fn consolidated_view(&self) -> BTreeMap<ItemSignature, u64> {
        self.counters.clone()
    }

    /// Stored content as stacks, one per signature.
    #[must_use]
    pub fn to_stacks(&self) -> Vec<ItemStack> {
        self.counters
            .iter()
            .map(|(sig, qty)| ItemStack::new(sig.clone(), *qty))
            .collect()
    }

    /// Flattens the content into slot-sized stacks, split into pages.
    ///
    /// Ordering is by signature, so an unchanged inventory always renders
    /// the same layout.
    #[must_use]
    pub fn display_view(&self, page_size: usize) -> Vec<Vec<ItemStack>> {
        let page_size = page_size.max(1);
        let mut pages: Vec<Vec<ItemStack>> = Vec::new();
        let mut page = Vec::with_capacity(page_size);

        for (signature, quantity) in &self.counters {
            let max_stack = self.catalog.max_stack(&signature.kind);
            let mut remaining = *quantity;
            while remaining > 0 {
                let amount = remaining.min(max_stack);
                page.push(ItemStack::new(signature.clone(), amount));
                remaining -= amount;
                if page.len() == page_size {
                    pages.push(std::mem::replace(&mut page, Vec::with_capacity(page_size)));
                }
            }
        }
        if !page.is_empty() {
            pages.push(page);
        }
        pages
    }

    /// Simulates a capacity-aware insertion without mutating anything.
    ///
    /// Candidates are merged per signature and processed in signature order.
    /// Each is accepted fully while the simulated slot count stays within
    /// capacity; the first one that does not fit is accepted partially (as
    /// much as the remaining slots plus its partial stack can hold) and
    /// every later candidate is dropped.
    #[must_use]
    pub fn plan_insert(&self, items: &[ItemStack]) -> InsertReport {
        let mut candidates: BTreeMap<&ItemSignature, u64> = BTreeMap::new();
        for item in items.iter().filter(|i| i.amount > 0) {
            let merged = candidates.entry(&item.signature).or_insert(0);
            *merged = merged.saturating_add(item.amount);
        }

        let mut report = InsertReport::default();
        let mut used = self.used_slots;
        let mut stopped = false;

        for (signature, amount) in candidates {
            if stopped {
                report.dropped_amount = report.dropped_amount.saturating_add(amount);
                continue;
            }

            let max_stack = self.catalog.max_stack(&signature.kind);
            let current = self.available(signature);
            let extra_slots = slots_for(current.saturating_add(amount), max_stack) - slots_for(current, max_stack);

            if used.saturating_add(extra_slots) <= self.max_slots {
                used += extra_slots;
                report.accepted_amount = report.accepted_amount.saturating_add(amount);
                report.accepted.push(ItemStack::new(signature.clone(), amount));
                continue;
            }

            let remaining_slots = self.max_slots.saturating_sub(used);
            let partial_room = match current % max_stack {
                0 => 0,
                rem => max_stack - rem,
            };
            let fits = remaining_slots
                .saturating_mul(max_stack)
                .saturating_add(partial_room)
                .min(amount);
            if fits > 0 {
                report.accepted_amount = report.accepted_amount.saturating_add(fits);
                report.accepted.push(ItemStack::new(signature.clone(), fits));
            }
            report.dropped_amount = report.dropped_amount.saturating_add(amount - fits);
            stopped = true;
        }

        report
    }

    /// Inserts as much of `items` as capacity allows.
    ///
    /// See [`VirtualInventory::plan_insert`] for the trimming order.
    pub fn insert_trimmed(&mut self, items: &[ItemStack]) -> InsertReport {
        let report = self.plan_insert(items);
        self.add(&report.accepted);
        debug_assert!(self.used_slots <= self.max_slots || report.accepted.is_empty());
        report
    }
}
