//! # Currency Gateway
//!
//! The only way currency leaves the runtime. Called from a region executor
//! while the spawner's exclusive lock is held, never while its state lock
//! is held.

use parking_lot::Mutex;
use spawnvault_economy::FixedPoint;
use spawnvault_shared::ActorId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Why a deposit did not happen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepositError {
    /// The economy backend refused the deposit.
    #[error("deposit rejected: {0}")]
    Rejected(String),
    /// The economy backend could not be reached.
    #[error("currency backend unavailable")]
    Unavailable,
}

/// External currency backend.
pub trait CurrencyGateway: Send + Sync {
    /// Credits `amount` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns a [`DepositError`] when nothing was credited.
    fn deposit(&self, recipient: ActorId, amount: FixedPoint) -> Result<(), DepositError>;
}

/// In-memory balances, with switchable failure injection.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<ActorId, FixedPoint>>,
    failures_left: AtomicU32,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of an actor.
    #[must_use]
    pub fn balance(&self, actor: ActorId) -> FixedPoint {
        self.balances.lock().get(&actor).copied().unwrap_or(FixedPoint::ZERO)
    }

    /// Makes the next `count` deposits fail with [`DepositError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }
}

impl CurrencyGateway for MemoryLedger {
    fn deposit(&self, recipient: ActorId, amount: FixedPoint) -> Result<(), DepositError> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DepositError::Unavailable);
        }

        let mut balances = self.balances.lock();
        let balance = balances.entry(recipient).or_insert(FixedPoint::ZERO);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| DepositError::Rejected(format!("balance overflow for {recipient}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposits_accumulate() {
        let ledger = MemoryLedger::new();
        ledger.deposit(ActorId(1), FixedPoint::from_whole(250)).unwrap();
        ledger.deposit(ActorId(1), FixedPoint::from_parts(0, 500_000)).unwrap();
        assert_eq!(ledger.balance(ActorId(1)), FixedPoint::from_parts(250, 500_000));
        assert_eq!(ledger.balance(ActorId(2)), FixedPoint::ZERO);
    }

    #[test]
    fn test_injected_failures_are_counted() {
        let ledger = MemoryLedger::new();
        ledger.fail_next(1);
        assert_eq!(ledger.deposit(ActorId(1), FixedPoint::ONE), Err(DepositError::Unavailable));
        assert!(ledger.deposit(ActorId(1), FixedPoint::ONE).is_ok());
        assert_eq!(ledger.balance(ActorId(1)), FixedPoint::ONE);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let ledger = MemoryLedger::new();
        ledger.deposit(ActorId(1), FixedPoint::MAX).unwrap();
        assert!(matches!(
            ledger.deposit(ActorId(1), FixedPoint::ONE),
            Err(DepositError::Rejected(_))
        ));
        assert_eq!(ledger.balance(ActorId(1)), FixedPoint::MAX);
    }
}
