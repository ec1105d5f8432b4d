//! Page-on-demand backing and the growable array built on it.

use std::fmt;
use std::sync::OnceLock;

use super::{Element, Reservation};
use crate::error::AllocationError;

/// A table of fixed-size pages. A page is allocated the first time one of its
/// elements is written; reads of unallocated pages return the default.
pub(crate) struct Pages<T: Element> {
    slots: Box<[OnceLock<Box<[T::Atomic]>>]>,
    shift: u32,
    mask: u64,
    default: T,
}

impl<T: Element> Pages<T> {
    /// `page_len` is rounded up to a power of two.
    pub(crate) fn new(capacity: u64, page_len: usize, default: T) -> Self {
        let page_len = page_len.max(1).next_power_of_two() as u64;
        let shift = page_len.trailing_zeros();
        let slot_count = capacity.div_ceil(page_len) as usize;
        let slots = (0..slot_count).map(|_| OnceLock::new()).collect();
        Self {
            slots,
            shift,
            mask: page_len - 1,
            default,
        }
    }

    pub(crate) const fn default_value(&self) -> T {
        self.default
    }

    pub(crate) const fn page_len(&self) -> u64 {
        self.mask + 1
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.slots.len() as u64 * self.page_len()
    }

    pub(crate) fn allocated_pages(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    fn new_page(&self) -> Box<[T::Atomic]> {
        (0..self.page_len()).map(|_| T::new_cell(self.default)).collect()
    }

    #[inline]
    pub(crate) fn get(&self, index: u64) -> T {
        let slot = &self.slots[(index >> self.shift) as usize];
        match slot.get() {
            Some(page) => T::load(&page[(index & self.mask) as usize]),
            None => self.default,
        }
    }

    #[inline]
    pub(crate) fn cell_or_alloc(&self, index: u64) -> &T::Atomic {
        let page = self.slots[(index >> self.shift) as usize].get_or_init(|| self.new_page());
        &page[(index & self.mask) as usize]
    }

    /// Like `cell_or_alloc`, but charges a newly allocated page to `reservation`.
    pub(crate) fn try_cell_or_alloc(
        &self,
        index: u64,
        reservation: &Reservation,
    ) -> Result<&T::Atomic, AllocationError> {
        let Some(slot) = self.slots.get((index >> self.shift) as usize) else {
            return Err(AllocationError::CapacityExceeded {
                index,
                capacity: self.capacity(),
            });
        };
        if let Some(page) = slot.get() {
            return Ok(&page[(index & self.mask) as usize]);
        }

        let page_bytes = self.page_len() * T::WIDTH as u64;
        if !reservation.try_grow(page_bytes) {
            return Err(AllocationError::OutOfMemory {
                element_count: self.page_len(),
                width: T::WIDTH,
                requested_bytes: page_bytes,
            });
        }
        let mut ours = false;
        let page = slot.get_or_init(|| {
            ours = true;
            self.new_page()
        });
        if !ours {
            // Another writer won the race for this page.
            reservation.shrink(page_bytes);
        }
        Ok(&page[(index & self.mask) as usize])
    }
}

/// A paged array that grows page by page up to a fixed capacity.
///
/// Used where the final element count is unknown up front, such as the
/// id mapper's per-node caches. Every page is charged to the paged budget when
/// it is first written.
pub struct DynamicArray<T: Element> {
    pages: Pages<T>,
    reservation: Reservation,
}

impl<T: Element> DynamicArray<T> {
    pub(crate) fn new(pages: Pages<T>, reservation: Reservation) -> Self {
        Self { pages, reservation }
    }

    /// Highest index + 1 that can ever be written.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.pages.capacity()
    }

    /// Value of never-written elements.
    #[must_use]
    pub const fn default_value(&self) -> T {
        self.pages.default_value()
    }

    /// Reads the element at `index`; the default for untouched or out-of-range
    /// positions.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u64) -> T {
        if index >= self.capacity() {
            return self.default_value();
        }
        self.pages.get(index)
    }

    /// Writes `value` at `index`, allocating its page if needed.
    ///
    /// # Errors
    /// - `CapacityExceeded` if `index` is past the capacity
    /// - `OutOfMemory` if the page cannot be charged to the budget
    #[inline]
    pub fn try_set(&self, index: u64, value: T) -> Result<(), AllocationError> {
        let cell = self.pages.try_cell_or_alloc(index, &self.reservation)?;
        T::store(cell, value);
        Ok(())
    }

    /// Bytes currently charged to the paged budget.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.reservation.bytes()
    }

    /// Number of pages allocated so far.
    #[must_use]
    pub fn allocated_pages(&self) -> usize {
        self.pages.allocated_pages()
    }
}

impl<T: Element> fmt::Debug for DynamicArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicArray")
            .field("capacity", &self.capacity())
            .field("page_len", &self.pages.page_len())
            .field("allocated_pages", &self.allocated_pages())
            .field("reservation", &self.reservation)
            .finish()
    }
}
