// 🔒 Payment Locks - one writer per payment at a time
//
// Operations keyed on the same payment are linearized here before they open
// their store transaction. Different payments never wait on each other.
// The payment version token (db::bump_payment_version) catches writers that
// bypass this process, e.g. a second process on the same database file.

use crate::entities::PaymentId;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct PaymentLocks {
    held: Mutex<HashSet<PaymentId>>,
    released: Condvar,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no other guard for `payment_id` is alive.
    pub fn acquire(&self, payment_id: PaymentId) -> PaymentGuard<'_> {
        let mut held = self.lock_set();
        while held.contains(&payment_id) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(payment_id);

        PaymentGuard {
            locks: self,
            payment_id,
        }
    }

    /// Non-blocking variant; None if the payment is busy
    pub fn try_acquire(&self, payment_id: PaymentId) -> Option<PaymentGuard<'_>> {
        let mut held = self.lock_set();
        if !held.insert(payment_id) {
            return None;
        }

        Some(PaymentGuard {
            locks: self,
            payment_id,
        })
    }

    pub fn is_held(&self, payment_id: PaymentId) -> bool {
        self.lock_set().contains(&payment_id)
    }

    fn lock_set(&self) -> MutexGuard<'_, HashSet<PaymentId>> {
        // the set stays consistent even if a holder panicked
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the payment when dropped.
#[derive(Debug)]
pub struct PaymentGuard<'a> {
    locks: &'a PaymentLocks,
    payment_id: PaymentId,
}

impl PaymentGuard<'_> {
    pub fn payment_id(&self) -> PaymentId {
        self.payment_id
    }
}

impl Drop for PaymentGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.lock_set();
        held.remove(&self.payment_id);
        drop(held);
        self.locks.released.notify_all();
    }
}
