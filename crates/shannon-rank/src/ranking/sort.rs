//! Cancellable descending sorts over lazily computed keys.
//!
//! Both sorts check the cancellation token at every comparison and return
//! [`RankingError::Cancelled`] as soon as it fires. The key function gets
//! `&mut T` so it can compute and cache a missing score on first use.

use serde::{Deserialize, Serialize};

use super::progress::CancellationToken;
use crate::error::{RankingError, Result};

/// Reorder algorithm of a ranking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortAlgorithm {
    /// Full reorder; unstable, middle-element pivot.
    Quicksort,
    /// Incremental fix-up of a nearly sorted order; stable.
    Insertion,
}

#[inline]
fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(RankingError::Cancelled)
    } else {
        Ok(())
    }
}

pub fn sort_descending<T, K>(
    algorithm: SortAlgorithm,
    items: &mut [T],
    key: K,
    cancel: &CancellationToken,
) -> Result<()>
where
    K: FnMut(&mut T) -> Result<f32>,
{
    match algorithm {
        SortAlgorithm::Quicksort => quicksort(items, key, cancel),
        SortAlgorithm::Insertion => insertion_sort(items, key, cancel),
    }
}

/// Sort by non-increasing key with quicksort.
///
/// Ties are ordered deterministically for a given input order.
pub fn quicksort<T, K>(items: &mut [T], mut key: K, cancel: &CancellationToken) -> Result<()>
where
    K: FnMut(&mut T) -> Result<f32>,
{
    if items.len() > 1 {
        let hi = items.len() - 1;
        quicksort_range(items, 0, hi, &mut key, cancel)?;
    }
    Ok(())
}

fn quicksort_range<T, K>(
    items: &mut [T],
    mut lo: usize,
    mut hi: usize,
    key: &mut K,
    cancel: &CancellationToken,
) -> Result<()>
where
    K: FnMut(&mut T) -> Result<f32>,
{
    // Recurse into the smaller side and loop on the larger one to keep the
    // stack logarithmic when many scores tie.
    while lo < hi {
        check(cancel)?;
        let pivot = partition(items, lo, hi, lo + (hi - lo) / 2, key, cancel)?;
        if pivot - lo < hi - pivot {
            if pivot > lo {
                quicksort_range(items, lo, pivot - 1, key, cancel)?;
            }
            lo = pivot + 1;
        } else {
            if pivot < hi {
                quicksort_range(items, pivot + 1, hi, key, cancel)?;
            }
            if pivot == 0 {
                break;
            }
            hi = pivot - 1;
        }
    }
    Ok(())
}

fn partition<T, K>(
    items: &mut [T],
    lo: usize,
    hi: usize,
    pivot: usize,
    key: &mut K,
    cancel: &CancellationToken,
) -> Result<usize>
where
    K: FnMut(&mut T) -> Result<f32>,
{
    let pivot_value = key(&mut items[pivot])?;
    items.swap(pivot, hi);
    let mut store = lo;
    for i in lo..hi {
        check(cancel)?;
        if key(&mut items[i])? > pivot_value {
            items.swap(i, store);
            store += 1;
        }
    }
    items.swap(hi, store);
    Ok(store)
}

/// Stable sort by non-increasing key with insertion sort.
///
/// Every prefix `items[..i]` is sorted whenever the token is checked, so a
/// cancelled pass leaves a consistent partial order.
pub fn insertion_sort<T, K>(items: &mut [T], mut key: K, cancel: &CancellationToken) -> Result<()>
where
    K: FnMut(&mut T) -> Result<f32>,
{
    for i in 1..items.len() {
        check(cancel)?;
        let value = key(&mut items[i])?;
        let mut j = i;
        while j > 0 {
            check(cancel)?;
            if value > key(&mut items[j - 1])? {
                j -= 1;
            } else {
                break;
            }
        }
        items[j..=i].rotate_right(1);
    }
    Ok(())
}
