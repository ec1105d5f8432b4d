use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A byte budget shared by all arrays of one backing.
#[derive(Debug)]
pub struct MemoryBudget {
    name: &'static str,
    limit: u64,
    used: AtomicU64,
}

impl MemoryBudget {
    /// Create a budget of `limit` bytes.
    #[must_use]
    pub fn new(name: &'static str, limit: u64) -> Arc<Self> {
        Arc::new(Self {
            name,
            limit,
            used: AtomicU64::new(0),
        })
    }

    /// Budget name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Total bytes this budget allows.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes still available.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    fn try_take(&self, bytes: u64) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.checked_add(bytes)?;
                (next <= self.limit).then_some(next)
            })
            .is_ok()
    }

    fn give_back(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Reserve `bytes`, or `None` if the budget cannot cover them.
    #[must_use]
    pub fn try_reserve(self: &Arc<Self>, bytes: u64) -> Option<Reservation> {
        self.try_take(bytes).then(|| Reservation {
            budget: Some(Arc::clone(self)),
            bytes: AtomicU64::new(bytes),
        })
    }
}

/// Bytes held against a [`MemoryBudget`]; released on drop.
pub struct Reservation {
    budget: Option<Arc<MemoryBudget>>,
    bytes: AtomicU64,
}

impl Reservation {
    /// A reservation that is not charged to any budget.
    #[must_use]
    pub const fn untracked() -> Self {
        Self {
            budget: None,
            bytes: AtomicU64::new(0),
        }
    }

    /// Bytes held.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Extend this reservation by `more` bytes.
    pub fn try_grow(&self, more: u64) -> bool {
        let ok = self.budget.as_ref().map_or(true, |b| b.try_take(more));
        if ok {
            self.bytes.fetch_add(more, Ordering::AcqRel);
        }
        ok
    }

    /// Return `less` bytes of this reservation to the budget.
    pub fn shrink(&self, less: u64) {
        let prev = self.bytes.fetch_sub(less, Ordering::AcqRel);
        debug_assert!(prev >= less, "reservation shrunk below zero");
        if let Some(budget) = &self.budget {
            budget.give_back(less);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(budget) = &self.budget {
            budget.give_back(*self.bytes.get_mut());
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("budget", &self.budget.as_ref().map(|b| b.name()))
            .field("bytes", &self.bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_is_released_on_drop() {
        let budget = MemoryBudget::new("heap", 100);
        let r = budget.try_reserve(60).unwrap();
        assert_eq!(budget.remaining(), 40);
        assert!(budget.try_reserve(41).is_none());
        drop(r);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn grow_respects_limit() {
        let budget = MemoryBudget::new("paged", 10);
        let r = budget.try_reserve(4).unwrap();
        assert!(r.try_grow(6));
        assert!(!r.try_grow(1));
        assert_eq!(r.bytes(), 10);
        r.shrink(3);
        assert_eq!(budget.used(), 7);
    }
}
