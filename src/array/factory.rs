use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::budget::{MemoryBudget, Reservation};
use super::off_heap::OffHeapCells;
use super::paged::{DynamicArray, Pages};
use super::{Backing, Element, NumberArray};
use crate::error::AllocationError;

const GIB: u64 = 1024 * 1024 * 1024;

/// Memory budgets that steer backing selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Bytes of contiguous in-process arrays allowed at once.
    pub heap_budget_bytes: u64,
    /// Bytes of anonymous mappings allowed at once.
    pub off_heap_budget_bytes: u64,
    /// Bytes of allocated pages allowed at once (fixed and dynamic arrays).
    pub paged_budget_bytes: u64,
    /// Elements per page; rounded up to a power of two.
    pub page_len: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            heap_budget_bytes: GIB,
            off_heap_budget_bytes: 8 * GIB,
            paged_budget_bytes: 16 * GIB,
            page_len: 1 << 20,
        }
    }
}

/// Allocates number arrays, choosing a backing per request.
///
/// Selection order is heap, then off-heap, then paged; each is tried only if
/// the request fits its remaining budget. Clones share budgets.
#[derive(Debug, Clone)]
pub struct NumberArrayFactory {
    config: AllocatorConfig,
    heap: Arc<MemoryBudget>,
    off_heap: Arc<MemoryBudget>,
    paged: Arc<MemoryBudget>,
    forced: Option<Backing>,
}

impl Default for NumberArrayFactory {
    fn default() -> Self {
        Self::new(AllocatorConfig::default())
    }
}

impl NumberArrayFactory {
    /// Create a factory that picks backings automatically.
    #[must_use]
    pub fn new(config: AllocatorConfig) -> Self {
        Self {
            heap: MemoryBudget::new("heap", config.heap_budget_bytes),
            off_heap: MemoryBudget::new("off-heap", config.off_heap_budget_bytes),
            paged: MemoryBudget::new("paged", config.paged_budget_bytes),
            config,
            forced: None,
        }
    }

    /// Create a factory that only ever uses `backing`.
    #[must_use]
    pub fn with_strategy(config: AllocatorConfig, backing: Backing) -> Self {
        Self {
            forced: Some(backing),
            ..Self::new(config)
        }
    }

    /// Configuration this factory was built from.
    #[must_use]
    pub const fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Budget for the given backing.
    #[must_use]
    pub fn budget(&self, backing: Backing) -> &MemoryBudget {
        match backing {
            Backing::Heap => &self.heap,
            Backing::OffHeap => &self.off_heap,
            Backing::Paged => &self.paged,
        }
    }

    /// Total bytes currently reserved across all budgets.
    #[must_use]
    pub fn bytes_in_use(&self) -> u64 {
        self.heap.used() + self.off_heap.used() + self.paged.used()
    }

    /// Allocate `len` elements, each initialised to `default`.
    ///
    /// # Errors
    /// `OutOfMemory` if no backing can hold the request. The request is never
    /// truncated.
    pub fn new_array<T: Element>(&self, len: u64, default: T) -> Result<NumberArray<T>, AllocationError> {
        let out_of_memory = || AllocationError::OutOfMemory {
            element_count: len,
            width: T::WIDTH,
            requested_bytes: len.saturating_mul(T::WIDTH as u64),
        };
        let bytes = len.checked_mul(T::WIDTH as u64).ok_or_else(out_of_memory)?;

        let order = [Backing::Heap, Backing::OffHeap, Backing::Paged];
        let candidates: &[Backing] = match &self.forced {
            Some(backing) => std::slice::from_ref(backing),
            None => &order,
        };

        for &backing in candidates {
            let array = match backing {
                Backing::Heap => self.try_heap(len, bytes, default),
                Backing::OffHeap => self.try_off_heap(len, bytes, default),
                Backing::Paged => self.try_paged(len, bytes, default),
            };
            if let Some(array) = array {
                tracing::debug!(%backing, len, bytes, width = T::WIDTH, "allocated number array");
                return Ok(array);
            }
            tracing::debug!(
                %backing,
                bytes,
                remaining = self.budget(backing).remaining(),
                "number array does not fit backing, falling back"
            );
        }

        tracing::warn!(len, bytes, width = T::WIDTH, "no backing can hold number array");
        Err(out_of_memory())
    }

    /// Create a growable paged array that can reach `capacity` elements.
    ///
    /// Nothing is allocated until the first write; each page is charged to the
    /// paged budget as it appears.
    pub fn new_dynamic_array<T: Element>(&self, capacity: u64, default: T) -> DynamicArray<T> {
        DynamicArray::new(Pages::new(capacity, self.config.page_len, default), self.paged_reservation())
    }

    /// An empty reservation against the paged budget, grown by callers that
    /// allocate incrementally.
    #[must_use]
    pub fn paged_reservation(&self) -> Reservation {
        self.paged.try_reserve(0).unwrap_or_else(Reservation::untracked)
    }

    fn try_heap<T: Element>(&self, len: u64, bytes: u64, default: T) -> Option<NumberArray<T>> {
        let reservation = self.heap.try_reserve(bytes)?;
        let len = usize::try_from(len).ok()?;
        let mut cells = Vec::new();
        cells.try_reserve_exact(len).ok()?;
        cells.extend((0..len).map(|_| T::new_cell(default)));
        Some(NumberArray::heap(cells.into_boxed_slice(), default, reservation))
    }

    fn try_off_heap<T: Element>(&self, len: u64, bytes: u64, default: T) -> Option<NumberArray<T>> {
        if len == 0 {
            return None;
        }
        let reservation = self.off_heap.try_reserve(bytes)?;
        match OffHeapCells::map(len, default) {
            Ok(cells) => Some(NumberArray::off_heap(cells, default, reservation)),
            Err(err) => {
                tracing::debug!(error = %err, bytes, "anonymous mapping failed");
                None
            }
        }
    }

    fn try_paged<T: Element>(&self, len: u64, bytes: u64, default: T) -> Option<NumberArray<T>> {
        let reservation = self.paged.try_reserve(bytes)?;
        let pages = Pages::new(len, self.config.page_len, default);
        Some(NumberArray::paged(pages, len, reservation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AllocatorConfig {
        AllocatorConfig {
            heap_budget_bytes: 1024,
            off_heap_budget_bytes: 4096,
            paged_budget_bytes: 16 * 1024,
            page_len: 64,
        }
    }

    #[test]
    fn small_request_uses_heap() {
        let factory = NumberArrayFactory::new(small_config());
        let array = factory.new_array::<u64>(100, 0).unwrap();
        assert_eq!(array.backing(), Backing::Heap);
        assert_eq!(factory.budget(Backing::Heap).used(), 800);
    }

    #[test]
    fn request_over_heap_budget_never_uses_heap() {
        let factory = NumberArrayFactory::new(small_config());
        let array = factory.new_array::<u64>(200, 0).unwrap();
        assert_ne!(array.backing(), Backing::Heap);
        assert_eq!(array.backing(), Backing::OffHeap);
    }

    #[test]
    fn falls_back_to_paged_when_off_heap_is_exhausted() {
        let factory = NumberArrayFactory::new(small_config());
        let array = factory.new_array::<u64>(1000, 3).unwrap();
        assert_eq!(array.backing(), Backing::Paged);
        assert_eq!(array.get(999), 3);
    }

    #[test]
    fn oversized_request_is_out_of_memory() {
        let factory = NumberArrayFactory::new(small_config());
        let err = factory.new_array::<u64>(1_000_000, 0).unwrap_err();
        let AllocationError::OutOfMemory { requested_bytes, .. } = &err else {
            panic!("expected OutOfMemory, got {err:?}");
        };
        assert_eq!(*requested_bytes, 8_000_000);
    }

    #[test]
    fn overflowing_request_is_out_of_memory() {
        let factory = NumberArrayFactory::default();
        assert!(factory.new_array::<u64>(u64::MAX, 0).is_err());
    }

    #[test]
    fn dropping_arrays_releases_budget() {
        let factory = NumberArrayFactory::new(small_config());
        let a = factory.new_array::<u32>(200, 0).unwrap();
        assert_eq!(a.backing(), Backing::Heap);
        let b = factory.new_array::<u32>(200, 0).unwrap();
        assert_eq!(b.backing(), Backing::OffHeap, "heap budget already taken by a");
        drop(a);
        drop(b);
        assert_eq!(factory.bytes_in_use(), 0);
        let c = factory.new_array::<u32>(200, 0).unwrap();
        assert_eq!(c.backing(), Backing::Heap);
    }

    #[test]
    fn forced_strategy_is_respected() {
        let factory = NumberArrayFactory::with_strategy(small_config(), Backing::Paged);
        let array = factory.new_array::<u32>(10, 0).unwrap();
        assert_eq!(array.backing(), Backing::Paged);
    }
}
