//! Large fixed-width integer arrays.
//!
//! Every array hands out `&self` accessors backed by atomic cells, so a single
//! array can be shared by many writer threads as long as each thread owns a
//! disjoint index range. Loads and stores use relaxed ordering; visibility
//! between phases comes from the thread join (or scope exit) that separates
//! them.
//!
//! Three backings are available and selected by [`NumberArrayFactory`]:
//!
//! - [`Backing::Heap`]: one contiguous in-process allocation.
//! - [`Backing::OffHeap`]: an anonymous memory mapping, outside the allocator.
//! - [`Backing::Paged`]: fixed-size pages allocated on first write.

mod budget;
mod factory;
mod off_heap;
mod paged;

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use budget::{MemoryBudget, Reservation};
pub use factory::{AllocatorConfig, NumberArrayFactory};
pub use paged::DynamicArray;

use off_heap::OffHeapCells;
use paged::Pages;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// A fixed-width unsigned integer that can live in a number array.
pub trait Element: sealed::Sealed + Copy + Eq + Ord + Send + Sync + fmt::Debug + 'static {
    /// Cell type with interior mutability; same size and alignment as `Self`.
    type Atomic: Send + Sync;

    /// Width of one element in bytes.
    const WIDTH: usize;

    /// Zero value; freshly mapped memory reads as this.
    const ZERO: Self;

    #[doc(hidden)]
    fn new_cell(value: Self) -> Self::Atomic;
    #[doc(hidden)]
    fn load(cell: &Self::Atomic) -> Self;
    #[doc(hidden)]
    fn store(cell: &Self::Atomic, value: Self);
    #[doc(hidden)]
    fn compare_exchange(cell: &Self::Atomic, current: Self, new: Self) -> bool;
}

impl Element for u32 {
    type Atomic = AtomicU32;
    const WIDTH: usize = 4;
    const ZERO: Self = 0;

    fn new_cell(value: Self) -> AtomicU32 {
        AtomicU32::new(value)
    }

    fn load(cell: &AtomicU32) -> Self {
        cell.load(Ordering::Relaxed)
    }

    fn store(cell: &AtomicU32, value: Self) {
        cell.store(value, Ordering::Relaxed);
    }

    fn compare_exchange(cell: &AtomicU32, current: Self, new: Self) -> bool {
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Element for u64 {
    type Atomic = AtomicU64;
    const WIDTH: usize = 8;
    const ZERO: Self = 0;

    fn new_cell(value: Self) -> AtomicU64 {
        AtomicU64::new(value)
    }

    fn load(cell: &AtomicU64) -> Self {
        cell.load(Ordering::Relaxed)
    }

    fn store(cell: &AtomicU64, value: Self) {
        cell.store(value, Ordering::Relaxed);
    }

    fn compare_exchange(cell: &AtomicU64, current: Self, new: Self) -> bool {
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Backing strategy of a number array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backing {
    /// Contiguous in-process memory.
    Heap,
    /// Anonymous memory mapping.
    OffHeap,
    /// Fixed-size pages allocated on demand.
    Paged,
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heap => write!(f, "heap"),
            Self::OffHeap => write!(f, "off-heap"),
            Self::Paged => write!(f, "paged"),
        }
    }
}

enum Storage<T: Element> {
    Heap(Box<[T::Atomic]>),
    OffHeap(OffHeapCells<T>),
    Paged(Pages<T>),
}

/// A fixed-length array of `T`, obtained from [`NumberArrayFactory::new_array`].
///
/// Indexing past `len()` panics, like slice indexing. Budget reserved for the
/// array is returned when it is dropped.
pub struct NumberArray<T: Element> {
    storage: Storage<T>,
    len: u64,
    default: T,
    _reservation: Reservation,
}

impl<T: Element> NumberArray<T> {
    pub(crate) fn heap(cells: Box<[T::Atomic]>, default: T, reservation: Reservation) -> Self {
        let len = cells.len() as u64;
        Self {
            storage: Storage::Heap(cells),
            len,
            default,
            _reservation: reservation,
        }
    }

    pub(crate) fn off_heap(cells: OffHeapCells<T>, default: T, reservation: Reservation) -> Self {
        let len = cells.len();
        Self {
            storage: Storage::OffHeap(cells),
            len,
            default,
            _reservation: reservation,
        }
    }

    pub(crate) fn paged(pages: Pages<T>, len: u64, reservation: Reservation) -> Self {
        let default = pages.default_value();
        Self {
            storage: Storage::Paged(pages),
            len,
            default,
            _reservation: reservation,
        }
    }

    #[inline]
    fn check(&self, index: u64) {
        assert!(
            index < self.len,
            "number array index out of bounds: index={index} len={}",
            self.len
        );
    }

    /// Number of elements.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the array holds no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value every element held at allocation time.
    #[must_use]
    pub const fn default_value(&self) -> T {
        self.default
    }

    /// Which backing the factory chose.
    #[must_use]
    pub const fn backing(&self) -> Backing {
        match self.storage {
            Storage::Heap(_) => Backing::Heap,
            Storage::OffHeap(_) => Backing::OffHeap,
            Storage::Paged(_) => Backing::Paged,
        }
    }

    /// Bytes accounted to this array against its budget.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.len * T::WIDTH as u64
    }

    /// Reads the element at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u64) -> T {
        self.check(index);
        match &self.storage {
            Storage::Heap(cells) => T::load(&cells[index as usize]),
            Storage::OffHeap(cells) => T::load(cells.cell(index)),
            Storage::Paged(pages) => pages.get(index),
        }
    }

    /// Writes `value` at `index`.
    #[inline]
    pub fn set(&self, index: u64, value: T) {
        self.check(index);
        match &self.storage {
            Storage::Heap(cells) => T::store(&cells[index as usize], value),
            Storage::OffHeap(cells) => T::store(cells.cell(index), value),
            Storage::Paged(pages) => T::store(pages.cell_or_alloc(index), value),
        }
    }

    /// Swaps the elements at `a` and `b`.
    ///
    /// Not atomic as a pair: the caller must own both indices.
    #[inline]
    pub fn swap(&self, a: u64, b: u64) {
        if a == b {
            return;
        }
        let va = self.get(a);
        let vb = self.get(b);
        self.set(a, vb);
        self.set(b, va);
    }

    /// Replaces the element at `index` with `new` if it currently equals
    /// `expected`. Returns whether the swap happened.
    pub fn compare_and_swap(&self, index: u64, expected: T, new: T) -> bool {
        self.check(index);
        match &self.storage {
            Storage::Heap(cells) => T::compare_exchange(&cells[index as usize], expected, new),
            Storage::OffHeap(cells) => T::compare_exchange(cells.cell(index), expected, new),
            Storage::Paged(pages) => T::compare_exchange(pages.cell_or_alloc(index), expected, new),
        }
    }

    /// Sets every element to `value`.
    pub fn fill(&self, value: T) {
        for i in 0..self.len {
            self.set(i, value);
        }
    }
}

impl<T: Element> fmt::Debug for NumberArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberArray")
            .field("backing", &self.backing())
            .field("len", &self.len)
            .field("width", &T::WIDTH)
            .finish_non_exhaustive()
    }
}
