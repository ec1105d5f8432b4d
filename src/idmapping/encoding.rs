//! Sort-based mapper for string and sparse integer ids.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use super::encoder::{Encoder, EMPTY};
use super::keys::{FrozenKeys, KeyStore};
use super::sort::sort_ids;
use super::{InternalId, Phase, PrepareSummary};
use crate::array::{DynamicArray, NumberArray, NumberArrayFactory};
use crate::collector::{BadCollector, BadEntry};
use crate::error::{ImportError, ImportResult, MapperError};
use crate::input::{ExternalId, Group, Groups};

/// Maps (group, external id) to internal ids by sorting encodings.
///
/// During accumulation every `put` writes the encoding and group of one node
/// into arrays indexed by its internal id, plus the raw key when the encoding
/// is not exact. `prepare` sorts the ids by (encoding, group, key, id), drops
/// every entry whose key equals its predecessor's, and keeps the sorted ids
/// for binary search.
pub struct EncodingIdMapper {
    encoder: Encoder,
    factory: NumberArrayFactory,
    groups: Arc<Groups>,
    partitions: usize,
    phase: Phase,

    encodings: DynamicArray<u64>,
    group_ids: DynamicArray<u32>,
    keys: Option<KeyStore>,
    frozen_keys: Option<FrozenKeys>,
    high: AtomicU64,
    puts: AtomicU64,

    sorted: Option<NumberArray<u64>>,
    sorted_len: u64,
}

impl EncodingIdMapper {
    /// `capacity` bounds the internal ids that can be put; `partitions` is the
    /// sort parallelism.
    #[must_use]
    pub fn new(
        encoder: Encoder,
        factory: &NumberArrayFactory,
        groups: Arc<Groups>,
        capacity: u64,
        partitions: usize,
    ) -> Self {
        let keys = (!encoder.is_exact()).then(|| KeyStore::new(capacity, factory.paged_reservation()));
        Self {
            encoder,
            factory: factory.clone(),
            groups,
            partitions: partitions.max(1),
            phase: Phase::Accumulating,
            encodings: factory.new_dynamic_array(capacity, EMPTY),
            group_ids: factory.new_dynamic_array(capacity, 0),
            keys,
            frozen_keys: None,
            high: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            sorted: None,
            sorted_len: 0,
        }
    }

    #[must_use]
    pub const fn encoder(&self) -> Encoder {
        self.encoder
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Record that `external` in `group` was assigned `internal`.
    ///
    /// Safe to call concurrently as long as callers use distinct `internal`
    /// values.
    ///
    /// # Errors
    /// - `AlreadyPrepared` after `prepare`
    /// - a validation error if the id does not fit the encoder
    /// - `CapacityExceeded` / `OutOfMemory` from the backing arrays
    pub fn put(&self, group: &Group, external: &ExternalId, internal: InternalId) -> ImportResult<()> {
        if self.phase != Phase::Accumulating {
            return Err(MapperError::AlreadyPrepared.into());
        }
        let encoding = self.encoder.encode(external)?;
        self.encodings.try_set(internal, encoding)?;
        self.group_ids.try_set(internal, u32::from(group.id()))?;
        if let Some(keys) = &self.keys {
            keys.put(internal, &external.key_bytes())?;
        }
        self.high.fetch_max(internal + 1, AtomicOrdering::AcqRel);
        self.puts.fetch_add(1, AtomicOrdering::AcqRel);
        Ok(())
    }

    fn key_of(&self, internal: InternalId) -> Option<&[u8]> {
        self.frozen_keys.as_ref().and_then(|keys| keys.get(internal))
    }

    fn compare(&self, a: InternalId, b: InternalId) -> Ordering {
        self.same_slot_order(a, b).then(a.cmp(&b))
    }

    /// Order by (encoding, group, key) without the id tie-break.
    fn same_slot_order(&self, a: InternalId, b: InternalId) -> Ordering {
        self.encodings
            .get(a)
            .cmp(&self.encodings.get(b))
            .then_with(|| self.group_ids.get(a).cmp(&self.group_ids.get(b)))
            .then_with(|| {
                if self.encoder.is_exact() {
                    Ordering::Equal
                } else {
                    self.key_of(a).cmp(&self.key_of(b))
                }
            })
    }

    fn external_of(&self, internal: InternalId) -> ExternalId {
        if self.encoder.is_exact() {
            ExternalId::Int(i64::try_from(self.encodings.get(internal)).unwrap_or(i64::MAX))
        } else {
            ExternalId::Str(String::from_utf8_lossy(self.key_of(internal).unwrap_or_default()).into_owned())
        }
    }

    /// Sort, detect duplicates and switch to lookups.
    ///
    /// For every key put more than once, the lowest internal id is kept and
    /// each other occurrence is sent to `collector` as a duplicate.
    ///
    /// # Errors
    /// - `AlreadyPrepared` if called twice
    /// - `OutOfMemory` if the sort arrays cannot be allocated
    /// - any error from `collector` (e.g. tolerance exceeded)
    pub fn prepare(&mut self, collector: &BadCollector) -> ImportResult<PrepareSummary> {
        if self.phase != Phase::Accumulating {
            return Err(MapperError::AlreadyPrepared.into());
        }
        self.phase = Phase::Preparing;
        let started = Instant::now();
        let high = self.high.load(AtomicOrdering::Acquire);
        let puts = self.puts.load(AtomicOrdering::Acquire);
        let span = tracing::debug_span!("prepare", encoder = self.encoder.name(), puts, high);
        let _guard = span.enter();
        tracing::info!(puts, "preparing id mapper");

        self.frozen_keys = self.keys.take().map(KeyStore::freeze);

        let tracker = self.factory.new_array::<u64>(puts, 0)?;
        let mut len = 0u64;
        for id in 0..high {
            if self.encodings.get(id) != EMPTY && len < puts {
                tracker.set(len, id);
                len += 1;
            }
        }

        let this = &*self;
        let sorted = sort_ids(
            &this.factory,
            tracker,
            len,
            this.partitions,
            &|id: u64| this.encodings.get(id),
            &|a: u64, b: u64| this.compare(a, b),
        )?;

        let mut kept = 0u64;
        let mut duplicates = 0u64;
        let mut i = 0u64;
        while i < len {
            let canonical = sorted.get(i);
            sorted.set(kept, canonical);
            kept += 1;

            let mut j = i + 1;
            while j < len {
                let duplicate = sorted.get(j);
                if this.same_slot_order(canonical, duplicate) != Ordering::Equal {
                    break;
                }
                duplicates += 1;
                let group_id = u16::try_from(this.group_ids.get(canonical))
                    .map_err(|_| ImportError::internal("group id out of range"))?;
                collector.collect(BadEntry::DuplicateNode {
                    group: this.groups.get(group_id)?,
                    id: this.external_of(canonical),
                    canonical,
                    duplicate,
                })?;
                j += 1;
            }
            i = j;
        }

        self.sorted = Some(sorted);
        self.sorted_len = kept;
        self.phase = Phase::Prepared;

        let summary = PrepareSummary {
            entries: kept,
            duplicates,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            entries = summary.entries,
            duplicates = summary.duplicates,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "id mapper prepared"
        );
        Ok(summary)
    }

    /// Look up the internal id for `external` in `group`.
    ///
    /// Returns `None` for keys never put and for nothing else; duplicates
    /// resolve to their canonical id. Does not allocate for string ids.
    ///
    /// # Errors
    /// - `NotPrepared` before `prepare`
    /// - a validation error if the id does not fit the encoder
    pub fn get(&self, group: &Group, external: &ExternalId) -> ImportResult<Option<InternalId>> {
        if self.phase != Phase::Prepared {
            return Err(MapperError::NotPrepared.into());
        }
        let Some(sorted) = &self.sorted else {
            return Err(MapperError::NotPrepared.into());
        };
        let encoding = self.encoder.encode(external)?;
        let group_id = u32::from(group.id());
        let target = (encoding, group_id);
        let slot_of = |index: u64| {
            let id = sorted.get(index);
            (self.encodings.get(id), self.group_ids.get(id))
        };

        // Lower bound of (encoding, group).
        let (mut lo, mut hi) = (0u64, self.sorted_len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if slot_of(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        if self.encoder.is_exact() {
            return Ok((lo < self.sorted_len && slot_of(lo) == target).then(|| sorted.get(lo)));
        }

        let key = external.key_bytes();
        let mut index = lo;
        while index < self.sorted_len && slot_of(index) == target {
            let id = sorted.get(index);
            if self.key_of(id) == Some(key.as_ref()) {
                return Ok(Some(id));
            }
            index += 1;
        }
        Ok(None)
    }

    /// Entries put so far, or unique entries once prepared.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self.phase {
            Phase::Prepared => self.sorted_len,
            Phase::Accumulating | Phase::Preparing => self.puts.load(AtomicOrdering::Acquire),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by the mapper's arrays and retained keys.
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        self.encodings.size_in_bytes()
            + self.group_ids.size_in_bytes()
            + self.keys.as_ref().map_or(0, KeyStore::size_in_bytes)
            + self.frozen_keys.as_ref().map_or(0, FrozenKeys::size_in_bytes)
            + self.sorted.as_ref().map_or(0, NumberArray::size_in_bytes)
    }
}

impl std::fmt::Debug for EncodingIdMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingIdMapper")
            .field("encoder", &self.encoder)
            .field("phase", &self.phase)
            .field("len", &self.len())
            .field("memory_usage", &self.memory_usage())
            .finish_non_exhaustive()
    }
}
