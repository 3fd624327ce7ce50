//! Cached arithmetic on interned weight handles.
//!
//! `plus`/`matvec`/etc. never touch [`Complex`] values directly once an
//! edge's weight has been resolved to a handle — they call through here so
//! that repeated `add`/`mul` on the same pair of handles hits the operation
//! cache (C6) instead of re-resolving and re-interning. Commutative
//! operations canonically order their operands before hashing so `a+b` and
//! `b+a` share one cache slot, which is also what lets [`crate::algebra::plus`]
//! guarantee `plus(a, b) == plus(b, a)` bit-for-bit.

use crate::cache::{CacheKey, OpCache};
use crate::complex::Complex;
use crate::weight_table::{WeightHandle, WeightTable};
use evbdd_common::OpTag;

/// When set, every `mul(a, b) = c` insertion also memoizes `div(c, a) = b`
/// and `div(c, b) = a` (and the mirror image for a cached `div`), trading
/// cache pressure for fewer redundant divisions in code that repeatedly
/// un-does a multiplication (e.g. gate-inverse checks).
#[derive(Debug, Clone, Copy)]
pub struct ArithConfig {
    pub inverse_caching: bool,
}

fn canon_commutative(a: WeightHandle, b: WeightHandle) -> (WeightHandle, WeightHandle) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn as_edge(handle: WeightHandle) -> u64 {
    handle as u64
}

fn from_edge(edge: u64) -> WeightHandle {
    edge as WeightHandle
}

pub fn wgt_add(weights: &WeightTable, cache: &OpCache, a: WeightHandle, b: WeightHandle) -> WeightHandle {
    let (lo, hi) = canon_commutative(a, b);
    let key = CacheKey::binary(OpTag::WgtAdd, as_edge(lo), as_edge(hi));
    if let Some(hit) = cache.get(key) {
        return from_edge(hit);
    }
    let result = weights.lookup(weights.value(a).add(weights.value(b)));
    cache.put(key, as_edge(result));
    result
}

pub fn wgt_sub(weights: &WeightTable, cache: &OpCache, a: WeightHandle, b: WeightHandle) -> WeightHandle {
    let key = CacheKey::binary(OpTag::WgtSub, as_edge(a), as_edge(b));
    if let Some(hit) = cache.get(key) {
        return from_edge(hit);
    }
    let result = weights.lookup(weights.value(a).sub(weights.value(b)));
    cache.put(key, as_edge(result));
    result
}

pub fn wgt_mul(
    weights: &WeightTable,
    cache: &OpCache,
    cfg: ArithConfig,
    a: WeightHandle,
    b: WeightHandle,
) -> WeightHandle {
    let (lo, hi) = canon_commutative(a, b);
    let key = CacheKey::binary(OpTag::WgtMul, as_edge(lo), as_edge(hi));
    if let Some(hit) = cache.get(key) {
        return from_edge(hit);
    }
    let result = weights.lookup(weights.value(a).mul(weights.value(b)));
    cache.put(key, as_edge(result));
    if cfg.inverse_caching {
        if !weights.value(lo).exact_eq(Complex::ZERO) {
            cache.put(CacheKey::binary(OpTag::WgtDiv, as_edge(result), as_edge(lo)), as_edge(hi));
        }
        if !weights.value(hi).exact_eq(Complex::ZERO) {
            cache.put(CacheKey::binary(OpTag::WgtDiv, as_edge(result), as_edge(hi)), as_edge(lo));
        }
    }
    result
}

pub fn wgt_div(
    weights: &WeightTable,
    cache: &OpCache,
    cfg: ArithConfig,
    a: WeightHandle,
    b: WeightHandle,
) -> WeightHandle {
    let key = CacheKey::binary(OpTag::WgtDiv, as_edge(a), as_edge(b));
    if let Some(hit) = cache.get(key) {
        return from_edge(hit);
    }
    debug_assert!(!weights.value(b).exact_eq(Complex::ZERO), "division by zero weight");
    let result = weights.lookup(weights.value(a).div(weights.value(b)));
    cache.put(key, as_edge(result));
    if cfg.inverse_caching {
        cache.put(CacheKey::binary(OpTag::WgtMul, as_edge(b), as_edge(result)), as_edge(a));
    }
    result
}

pub fn wgt_neg(weights: &WeightTable, a: WeightHandle) -> WeightHandle {
    weights.lookup(weights.value(a).neg())
}

pub fn wgt_conj(weights: &WeightTable, a: WeightHandle) -> WeightHandle {
    weights.lookup(weights.value(a).conj())
}

#[cfg(test)]
mod tests {
    use super::*;
    use evbdd_common::reserved;

    fn fixtures() -> (WeightTable, OpCache) {
        (WeightTable::new(64, 1e-12), OpCache::new(64))
    }

    #[test]
    fn add_is_commutative_and_cached() {
        let (weights, cache) = fixtures();
        let a = weights.lookup(Complex::new(2.0, 0.0));
        let b = weights.lookup(Complex::new(3.0, 0.0));
        let ab = wgt_add(&weights, &cache, a, b);
        let ba = wgt_add(&weights, &cache, b, a);
        assert_eq!(ab, ba);
        assert!(weights.value(ab).approx_eq(Complex::new(5.0, 0.0), 1e-9));
    }

    #[test]
    fn inverse_caching_prepopulates_div() {
        let (weights, cache) = fixtures();
        let cfg = ArithConfig { inverse_caching: true };
        let a = weights.lookup(Complex::new(2.0, 0.0));
        let b = weights.lookup(Complex::new(3.0, 0.0));
        let c = wgt_mul(&weights, &cache, cfg, a, b);
        let key = CacheKey::binary(OpTag::WgtDiv, c as u64, a as u64);
        assert_eq!(cache.get(key), Some(b as u64));
    }

    #[test]
    fn mul_by_reserved_one_is_identity() {
        let (weights, cache) = fixtures();
        let cfg = ArithConfig { inverse_caching: false };
        let a = weights.lookup(Complex::new(0.3, -0.4));
        let result = wgt_mul(&weights, &cache, cfg, a, reserved::W_ONE);
        assert_eq!(result, a);
    }
}
