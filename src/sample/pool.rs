//! Allocation accounting for entries and sample string storage.
//!
//! The hub runs with fixed capacities decided at startup. Rather than
//! carving out real memory blocks, each pool is a slot counter: callers
//! take a slot up front and the slot returns when the lease drops, so
//! rollback paths keep the accounting exact.

use std::cell::Cell;
use std::rc::Rc;

use crate::config::StringTierConfig;
use crate::error::{Error, Result};

/// Fixed-capacity slot counter.
#[derive(Debug)]
pub struct Quota {
    label: &'static str,
    capacity: usize,
    used: Cell<usize>,
}

impl Quota {
    pub fn new(label: &'static str, capacity: usize) -> Rc<Self> {
        Rc::new(Self {
            label,
            capacity,
            used: Cell::new(0),
        })
    }

    /// Take one slot, or `None` when the pool is dry.
    pub fn try_take(self: &Rc<Self>) -> Option<QuotaLease> {
        if self.used.get() >= self.capacity {
            return None;
        }
        self.used.set(self.used.get() + 1);
        Some(QuotaLease {
            quota: Rc::clone(self),
        })
    }

    pub fn in_use(&self) -> usize {
        self.used.get()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// RAII slot held against a [`Quota`].
#[derive(Debug)]
pub struct QuotaLease {
    quota: Rc<Quota>,
}

impl Drop for QuotaLease {
    fn drop(&mut self) {
        let used = self.quota.used.get();
        debug_assert!(used > 0, "pool {} released more than it took", self.quota.label);
        self.quota.used.set(used.saturating_sub(1));
    }
}

/// Layered string storage accounting: small, medium and large classes.
#[derive(Debug)]
pub struct StringTiers {
    small_max_len: usize,
    medium_max_len: usize,
    small: Rc<Quota>,
    medium: Rc<Quota>,
    large: Rc<Quota>,
}

impl StringTiers {
    pub fn new(cfg: &StringTierConfig) -> Self {
        Self {
            small_max_len: cfg.small_max_len,
            medium_max_len: cfg.medium_max_len,
            small: Quota::new("small string pool", cfg.small_capacity),
            medium: Quota::new("medium string pool", cfg.medium_capacity),
            large: Quota::new("large string pool", cfg.large_capacity),
        }
    }

    /// Take a slot for a string of `len` bytes. A class exhausts its own
    /// slots before borrowing from the next larger one.
    pub fn checkout(&self, len: usize) -> Result<QuotaLease> {
        let mut ladder: Vec<&Rc<Quota>> = Vec::with_capacity(3);
        if len <= self.small_max_len {
            ladder.push(&self.small);
        }
        if len <= self.medium_max_len {
            ladder.push(&self.medium);
        }
        ladder.push(&self.large);

        for quota in ladder {
            if let Some(lease) = quota.try_take() {
                return Ok(lease);
            }
        }
        Err(Error::NoMemory("string pool"))
    }

    pub fn in_use(&self) -> usize {
        self.small.in_use() + self.medium.in_use() + self.large.in_use()
    }
}
