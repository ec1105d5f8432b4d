//! Parallel partitioned sort over a [`NumberArray`] of internal ids.
//!
//! Ids are first distributed into buckets by the range their encoding falls
//! in, so every bucket holds a contiguous slice of the final order. Each
//! bucket is then sorted in place by one rayon task. Both steps only ever
//! write disjoint index ranges of a shared array.

use std::cmp::Ordering;
use std::ops::Range;

use rayon::prelude::*;

use crate::array::{NumberArray, NumberArrayFactory};
use crate::error::AllocationError;

const INSERTION_SORT_MAX: u64 = 16;
const BUCKETS_PER_PARTITION: usize = 4;

fn split(len: u64, parts: usize) -> Vec<Range<u64>> {
    let parts = (parts as u64).clamp(1, len.max(1));
    let step = len.div_ceil(parts);
    (0..parts)
        .map(|p| (p * step).min(len)..((p + 1) * step).min(len))
        .collect()
}

/// Sort the first `len` ids of `tracker` by `cmp` and return the sorted copy.
///
/// `encoding` must be consistent with `cmp`: if `encoding(a) < encoding(b)`
/// then `cmp(a, b)` is `Less`. `cmp` must be a total order.
pub(crate) fn sort_ids<E, C>(
    factory: &NumberArrayFactory,
    tracker: NumberArray<u64>,
    len: u64,
    partitions: usize,
    encoding: &E,
    cmp: &C,
) -> Result<NumberArray<u64>, AllocationError>
where
    E: Fn(u64) -> u64 + Sync,
    C: Fn(u64, u64) -> Ordering + Sync,
{
    if len <= 1 {
        return Ok(tracker);
    }

    let ranges = split(len, partitions);
    let (min, max) = ranges
        .par_iter()
        .map(|r| {
            r.clone()
                .map(|i| encoding(tracker.get(i)))
                .fold((u64::MAX, 0), |(lo, hi), v| (lo.min(v), hi.max(v)))
        })
        .reduce(|| (u64::MAX, 0), |a, b| (a.0.min(b.0), a.1.max(b.1)));

    let buckets = partitions.max(1) * BUCKETS_PER_PARTITION;
    let width = u128::from(max - min) + 1;
    let bucket_of = |id: u64| -> usize {
        let offset = u128::from(encoding(id) - min);
        (offset * buckets as u128 / width) as usize
    };

    let histograms: Vec<Vec<u64>> = ranges
        .par_iter()
        .map(|r| {
            let mut counts = vec![0u64; buckets];
            for i in r.clone() {
                counts[bucket_of(tracker.get(i))] += 1;
            }
            counts
        })
        .collect();

    // Write cursor for every (range, bucket); ranges fill a bucket in range
    // order so the scatter is deterministic.
    let mut bucket_bounds = Vec::with_capacity(buckets + 1);
    let mut cursors = vec![vec![0u64; buckets]; ranges.len()];
    let mut at = 0u64;
    for b in 0..buckets {
        bucket_bounds.push(at);
        for (r, counts) in histograms.iter().enumerate() {
            cursors[r][b] = at;
            at += counts[b];
        }
    }
    bucket_bounds.push(at);

    let sorted = factory.new_array::<u64>(len, 0)?;
    ranges
        .par_iter()
        .zip(cursors.into_par_iter())
        .for_each(|(r, mut cursor)| {
            for i in r.clone() {
                let id = tracker.get(i);
                let b = bucket_of(id);
                sorted.set(cursor[b], id);
                cursor[b] += 1;
            }
        });
    drop(tracker);

    (0..buckets).into_par_iter().for_each(|b| {
        quicksort(&sorted, bucket_bounds[b], bucket_bounds[b + 1], cmp);
    });
    Ok(sorted)
}

/// Sort `[lo, hi)` of `array` in place.
pub(crate) fn quicksort<C>(array: &NumberArray<u64>, mut lo: u64, mut hi: u64, cmp: &C)
where
    C: Fn(u64, u64) -> Ordering,
{
    while hi - lo > INSERTION_SORT_MAX {
        let mid = lo + (hi - lo) / 2;
        median_of_three(array, lo, mid, hi - 1, cmp);
        array.swap(mid, hi - 1);
        let pivot = array.get(hi - 1);

        let mut store = lo;
        for i in lo..hi - 1 {
            if cmp(array.get(i), pivot) == Ordering::Less {
                array.swap(i, store);
                store += 1;
            }
        }
        array.swap(store, hi - 1);

        // Recurse into the smaller side, loop on the larger.
        if store - lo < hi - store - 1 {
            quicksort(array, lo, store, cmp);
            lo = store + 1;
        } else {
            quicksort(array, store + 1, hi, cmp);
            hi = store;
        }
    }
    insertion_sort(array, lo, hi, cmp);
}

fn median_of_three<C>(array: &NumberArray<u64>, a: u64, b: u64, c: u64, cmp: &C)
where
    C: Fn(u64, u64) -> Ordering,
{
    if cmp(array.get(b), array.get(a)) == Ordering::Less {
        array.swap(a, b);
    }
    if cmp(array.get(c), array.get(b)) == Ordering::Less {
        array.swap(b, c);
        if cmp(array.get(b), array.get(a)) == Ordering::Less {
            array.swap(a, b);
        }
    }
}

fn insertion_sort<C>(array: &NumberArray<u64>, lo: u64, hi: u64, cmp: &C)
where
    C: Fn(u64, u64) -> Ordering,
{
    for i in lo.saturating_add(1)..hi {
        let v = array.get(i);
        let mut j = i;
        while j > lo && cmp(array.get(j - 1), v) == Ordering::Greater {
            array.set(j, array.get(j - 1));
            j -= 1;
        }
        array.set(j, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{AllocatorConfig, Backing};

    fn tracker_of(factory: &NumberArrayFactory, ids: &[u64]) -> NumberArray<u64> {
        let array = factory.new_array::<u64>(ids.len() as u64, 0).unwrap();
        for (i, id) in ids.iter().enumerate() {
            array.set(i as u64, *id);
        }
        array
    }

    fn contents(array: &NumberArray<u64>, len: u64) -> Vec<u64> {
        (0..len).map(|i| array.get(i)).collect()
    }

    #[test]
    fn quicksort_orders_a_range() {
        let factory = NumberArrayFactory::default();
        let values: Vec<u64> = (0..500u64).map(|i| (i * 7919) % 503).collect();
        let array = tracker_of(&factory, &values);
        quicksort(&array, 0, 500, &|a: u64, b: u64| a.cmp(&b));

        let mut expected = values;
        expected.sort_unstable();
        assert_eq!(contents(&array, 500), expected);
    }

    #[test]
    fn sort_ids_orders_by_encoding_then_id() {
        let factory = NumberArrayFactory::with_strategy(AllocatorConfig::default(), Backing::Paged);
        // Encoding collapses ids into 10 values; ties break on the id.
        let ids: Vec<u64> = (0..2_000u64).rev().collect();
        let encoding = |id: u64| id % 10;
        let cmp = |a: u64, b: u64| encoding(a).cmp(&encoding(b)).then(a.cmp(&b));

        let tracker = tracker_of(&factory, &ids);
        let sorted = sort_ids(&factory, tracker, 2_000, 4, &encoding, &cmp).unwrap();

        let mut expected = ids;
        expected.sort_by(|a, b| cmp(*a, *b));
        assert_eq!(contents(&sorted, 2_000), expected);
    }

    #[test]
    fn sort_ids_handles_a_single_encoding() {
        let factory = NumberArrayFactory::default();
        let ids = [5u64, 3, 9, 1];
        let tracker = tracker_of(&factory, &ids);
        let sorted = sort_ids(&factory, tracker, 4, 8, &|_| 42, &|a: u64, b: u64| a.cmp(&b)).unwrap();
        assert_eq!(contents(&sorted, 4), vec![1, 3, 5, 9]);
    }

    #[test]
    fn split_covers_the_whole_range() {
        let ranges = split(10, 3);
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(split(2, 8).len(), 2);
    }
}
