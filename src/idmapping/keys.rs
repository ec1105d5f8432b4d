//! Original key bytes, kept for exact comparison of inexact encodings.

use std::sync::{Mutex, OnceLock, PoisonError};

use crate::array::Reservation;
use crate::error::AllocationError;

use super::InternalId;

const CHUNK_SHIFT: u32 = 17;
const CHUNK_LEN: u64 = 1 << CHUNK_SHIFT;
const ABSENT: (u32, u32) = (0, u32::MAX);
/// Bookkeeping bytes charged per key on top of the key itself.
const SPAN_BYTES: u64 = 8;

#[derive(Debug, Default)]
struct KeyChunk {
    /// (offset, len) into `bytes`, indexed by internal id within the chunk.
    spans: Vec<(u32, u32)>,
    bytes: Vec<u8>,
}

impl KeyChunk {
    fn get(&self, slot: usize) -> Option<&[u8]> {
        let &(offset, len) = self.spans.get(slot)?;
        if (offset, len) == ABSENT {
            return None;
        }
        let start = offset as usize;
        self.bytes.get(start..start + len as usize)
    }
}

/// Write side: one mutex per chunk of internal ids, so writers with disjoint
/// id ranges rarely meet.
pub(crate) struct KeyStore {
    chunks: Box<[OnceLock<Box<Mutex<KeyChunk>>>]>,
    reservation: Reservation,
}

impl KeyStore {
    pub(crate) fn new(capacity: u64, reservation: Reservation) -> Self {
        let count = capacity.div_ceil(CHUNK_LEN) as usize;
        Self {
            chunks: (0..count).map(|_| OnceLock::new()).collect(),
            reservation,
        }
    }

    pub(crate) fn put(&self, internal: InternalId, key: &[u8]) -> Result<(), AllocationError> {
        let capacity = self.chunks.len() as u64 * CHUNK_LEN;
        let too_large = || AllocationError::CapacityExceeded { index: internal, capacity };
        let chunk = self
            .chunks
            .get((internal >> CHUNK_SHIFT) as usize)
            .ok_or_else(too_large)?
            .get_or_init(Box::default);

        let charge = key.len() as u64 + SPAN_BYTES;
        if !self.reservation.try_grow(charge) {
            return Err(AllocationError::OutOfMemory {
                element_count: 1,
                width: key.len(),
                requested_bytes: charge,
            });
        }

        let mut chunk = chunk.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = (internal & (CHUNK_LEN - 1)) as usize;
        let (Ok(offset), Ok(len)) = (u32::try_from(chunk.bytes.len()), u32::try_from(key.len())) else {
            self.reservation.shrink(charge);
            return Err(too_large());
        };
        if len == u32::MAX || offset.checked_add(len).is_none() {
            self.reservation.shrink(charge);
            return Err(too_large());
        }
        if chunk.spans.len() <= slot {
            chunk.spans.resize(slot + 1, ABSENT);
        }
        chunk.spans[slot] = (offset, len);
        chunk.bytes.extend_from_slice(key);
        Ok(())
    }

    /// Bytes charged for retained keys so far.
    pub(crate) fn size_in_bytes(&self) -> u64 {
        self.reservation.bytes()
    }

    /// Switch to the read-only form. Requires exclusive access, so no writer
    /// can still be holding a chunk.
    pub(crate) fn freeze(self) -> FrozenKeys {
        let chunks = self
            .chunks
            .into_vec()
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .map(|chunk| (*chunk).into_inner().unwrap_or_else(PoisonError::into_inner))
            })
            .collect();
        FrozenKeys {
            chunks,
            reservation: self.reservation,
        }
    }
}

/// Read side of [`KeyStore`]; lookups take no locks.
pub(crate) struct FrozenKeys {
    chunks: Vec<Option<KeyChunk>>,
    reservation: Reservation,
}

impl FrozenKeys {
    #[inline]
    pub(crate) fn get(&self, internal: InternalId) -> Option<&[u8]> {
        self.chunks
            .get((internal >> CHUNK_SHIFT) as usize)?
            .as_ref()?
            .get((internal & (CHUNK_LEN - 1)) as usize)
    }

    pub(crate) fn size_in_bytes(&self) -> u64 {
        self.reservation.bytes()
    }
}
