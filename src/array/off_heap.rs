//! Anonymous-mapping backing.
//!
//! Memory comes straight from the kernel through `memmap2`, so a multi-GiB
//! array costs no allocator bookkeeping and is returned to the OS on drop.

use std::io;
use std::marker::PhantomData;
use std::mem;

use memmap2::{MmapMut, MmapOptions};

use super::Element;

pub(crate) struct OffHeapCells<T: Element> {
    map: MmapMut,
    len: u64,
    _marker: PhantomData<T>,
}

impl<T: Element> OffHeapCells<T> {
    /// Map `len` zeroed elements, then fill them with `default` if non-zero.
    pub(crate) fn map(len: u64, default: T) -> io::Result<Self> {
        assert_eq!(mem::size_of::<T::Atomic>(), T::WIDTH);
        let bytes = len
            .checked_mul(T::WIDTH as u64)
            .and_then(|b| usize::try_from(b).ok())
            .filter(|&b| b > 0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid off-heap array length"))?;

        let map = MmapOptions::new().len(bytes).map_anon()?;
        let cells = Self {
            map,
            len,
            _marker: PhantomData,
        };
        if default != T::ZERO {
            for i in 0..len {
                T::store(cells.cell(i), default);
            }
        }
        Ok(cells)
    }

    pub(crate) const fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub(crate) fn cell(&self, index: u64) -> &T::Atomic {
        debug_assert!(index < self.len);
        // SAFETY: the mapping is page aligned and exactly `len * WIDTH` bytes;
        // `T::Atomic` has the size and alignment of `T`, zeroed memory is a valid
        // atomic, and all access goes through the atomic cell so no `&mut` to the
        // mapping is ever created.
        unsafe { &*self.map.as_ptr().cast::<T::Atomic>().add(index as usize) }
    }
}
