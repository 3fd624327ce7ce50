//! Concurrent, tolerance-equality interning table for complex edge weights.
//!
//! Two close-enough floating point values collapse onto a single small
//! integer handle; whichever insert wins the race becomes the canonical
//! representative and the losing thread simply retries the lookup. Readers
//! never block. The table never shrinks and never overwrites a filled
//! slot — growth always means building a fresh, larger table and relocating
//! every live handle into it (see [`crate::gc`]).

use crate::complex::Complex;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use evbdd_common::{reserved, EvbddError};

/// A stable small-integer handle into a [`WeightTable`].
pub type WeightHandle = u32;

const STATE_EMPTY: u8 = 0;
const STATE_WRITING: u8 = 1;
const STATE_FILLED: u8 = 2;

/// One slot of the table.
///
/// `value` is written exactly once, by whichever thread wins the CAS from
/// `STATE_EMPTY` to `STATE_WRITING`; the subsequent `STATE_FILLED` store
/// with `Release` ordering publishes it to every reader that observes the
/// state with `Acquire`. Because a slot is never mutated again after
/// publication, this is strictly simpler than a general seqlock (no reader
/// ever needs to retry a torn read).
struct Slot {
    state: AtomicU8,
    value: core::cell::UnsafeCell<Complex>,
}

// SAFETY: `value` is only written while `state` is `STATE_WRITING` and only
// read after observing `STATE_FILLED` with `Acquire`, which happens-after
// the writer's `Release` store. No two threads ever write the same slot.
unsafe impl Sync for Slot {}

impl Slot {
    fn empty() -> Self {
        Self {
            state: AtomicU8::new(STATE_EMPTY),
            value: core::cell::UnsafeCell::new(Complex::ZERO),
        }
    }
}

/// Fixed-capacity, process-wide table mapping complex values to stable
/// handles under a configured tolerance.
pub struct WeightTable {
    slots: Box<[Slot]>,
    mask: usize,
    tolerance: f64,
    entries: AtomicUsize,
}

impl WeightTable {
    /// Builds a table of `capacity` slots (rounded up to a power of two)
    /// with the three reserved handles pre-installed at indices 0, 1, 2.
    pub fn new(capacity: usize, tolerance: f64) -> Self {
        let capacity = capacity.next_power_of_two().max(4);
        let slots = (0..capacity).map(|_| Slot::empty()).collect::<Vec<_>>().into_boxed_slice();
        let table = Self {
            slots,
            mask: capacity - 1,
            tolerance,
            entries: AtomicUsize::new(0),
        };
        table.install_reserved();
        table
    }

    /// Installs the three reserved values directly at indices
    /// [`reserved::W_ZERO`], [`reserved::W_ONE`], and
    /// [`reserved::W_MINUS_ONE`], bypassing the hash-based probe so their
    /// handle values are deterministic regardless of tolerance or table
    /// size. Every later `lookup` of these values finds them here because
    /// the linear probe from any starting bucket eventually visits every
    /// slot in a power-of-two-sized table... which is too slow in the
    /// common case, so `lookup` special-cases exact equality to these
    /// three constants before hashing.
    fn install_reserved(&self) {
        self.force_install(reserved::W_ZERO as usize, Complex::ZERO);
        self.force_install(reserved::W_ONE as usize, Complex::ONE);
        self.force_install(reserved::W_MINUS_ONE as usize, Complex::MINUS_ONE);
    }

    fn force_install(&self, idx: usize, value: Complex) {
        let slot = &self.slots[idx];
        let prev = slot
            .state
            .compare_exchange(STATE_EMPTY, STATE_WRITING, Ordering::AcqRel, Ordering::Acquire);
        debug_assert!(prev.is_ok(), "reserved slot {idx} already occupied");
        unsafe { *slot.value.get() = value };
        slot.state.store(STATE_FILLED, Ordering::Release);
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    fn hash_bucket(&self, c: Complex) -> usize {
        // Quantize to an epsilon-sized grid before hashing so that two
        // tolerance-equal values are likely to hash to the same bucket and
        // therefore land in the same linear-probe cluster.
        let q = (1.0 / self.tolerance).max(1.0);
        let re_bits = (c.re * q).round() as i64 as u64;
        let im_bits = (c.im * q).round() as i64 as u64;
        let mut h = re_bits.wrapping_mul(0x9E3779B97F4A7C15);
        h ^= im_bits.wrapping_mul(0xC2B2AE3D27D4EB4F);
        h ^= h >> 29;
        (h as usize) & self.mask
    }

    /// Returns an existing handle tolerance-equal to `c`, or interns a
    /// fresh one. The three reserved values always map back to their
    /// fixed handles regardless of which bucket they hash to, because
    /// they are pre-installed and the linear probe will find them first
    /// whenever `c` is exactly `0`, `1`, or `-1`.
    ///
    /// Panics if the table is genuinely full (every slot filled, none
    /// tolerance-equal to `c`) — this can only happen to a caller that did
    /// not go through [`WeightTable::try_lookup`]'s `CapacityExceeded` path,
    /// i.e. a read of an already-built diagram, not the insertion path the
    /// engine's GC-and-retry machinery covers.
    pub fn lookup(&self, c: Complex) -> WeightHandle {
        self.try_lookup(c).unwrap_or_else(|_| {
            panic!(
                "weight table exhausted at capacity {} (tolerance {}) with no GC-aware caller to recover",
                self.capacity(),
                self.tolerance
            )
        })
    }

    /// Fallible counterpart of [`WeightTable::lookup`], used by the
    /// node-allocating insertion path (`edge::makenode`) so a full table
    /// surfaces `CapacityExceeded` instead of silently panicking or, as a
    /// prior version of this table did, spinning forever: a single bounded
    /// sweep of every slot, exactly mirroring
    /// [`crate::node_table::NodeTable::lookup`]'s one-pass probe, rather
    /// than an outer loop that never terminates once the table is full.
    pub fn try_lookup(&self, c: Complex) -> Result<WeightHandle, EvbddError> {
        // The reserved constants live outside the hash-bucket cluster their
        // own value would probe to (they are force-installed at fixed
        // indices), so a value merely *tolerance-close* to one of them —
        // e.g. an amplitude that rounded to 1e-16 instead of exactly 0 —
        // must be checked against them directly or the general probe would
        // never find it and would intern a needless near-duplicate.
        if c.approx_eq(Complex::ZERO, self.tolerance) {
            return Ok(reserved::W_ZERO);
        }
        if c.approx_eq(Complex::ONE, self.tolerance) {
            return Ok(reserved::W_ONE);
        }
        if c.approx_eq(Complex::MINUS_ONE, self.tolerance) {
            return Ok(reserved::W_MINUS_ONE);
        }
        let start = self.hash_bucket(c);
        for probe in 0..self.slots.len() {
            let idx = (start + probe) & self.mask;
            let slot = &self.slots[idx];
            match slot.state.load(Ordering::Acquire) {
                STATE_FILLED => {
                    let stored = unsafe { *slot.value.get() };
                    if stored.approx_eq(c, self.tolerance) {
                        return Ok(idx as WeightHandle);
                    }
                }
                STATE_EMPTY => {
                    if slot
                        .state
                        .compare_exchange(STATE_EMPTY, STATE_WRITING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        unsafe { *slot.value.get() = c };
                        slot.state.store(STATE_FILLED, Ordering::Release);
                        self.entries.fetch_add(1, Ordering::Relaxed);
                        return Ok(idx as WeightHandle);
                    }
                    // Lost the race for this slot; move on to the next probe
                    // rather than spinning on it.
                }
                _ => {
                    // STATE_WRITING: another thread is publishing this slot.
                    // Don't wait on it — move to the next probe, same as
                    // NodeTable::lookup.
                    core::hint::spin_loop();
                }
            }
        }
        Err(EvbddError::CapacityExceeded { table: "weight", capacity: self.capacity() })
    }

    /// Exact stored value for `handle`. Panics (precondition violation) on
    /// an out-of-range or never-filled handle.
    pub fn value(&self, handle: WeightHandle) -> Complex {
        let slot = &self.slots[handle as usize];
        debug_assert_eq!(
            slot.state.load(Ordering::Acquire),
            STATE_FILLED,
            "read of unfilled weight handle {handle}"
        );
        unsafe { *slot.value.get() }
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.entries()
    }

    pub fn fill_fraction(&self) -> f64 {
        self.entries() as f64 / self.capacity() as f64
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Interns `self.value(old)` into `self` and returns the (possibly new)
    /// handle. Used by GC to carry a handle from the old table into a
    /// freshly allocated, larger one.
    pub fn relocate(&self, old: WeightHandle, old_table: &WeightTable) -> WeightHandle {
        self.lookup(old_table.value(old))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_handles_land_at_fixed_indices() {
        let t = WeightTable::new(64, 1e-14);
        assert_eq!(t.lookup(Complex::ZERO), reserved::W_ZERO);
        assert_eq!(t.lookup(Complex::ONE), reserved::W_ONE);
        assert_eq!(t.lookup(Complex::MINUS_ONE), reserved::W_MINUS_ONE);
    }

    #[test]
    fn tolerance_equal_values_collapse_to_one_handle() {
        let t = WeightTable::new(64, 1e-10);
        let a = Complex::new(0.5, 0.5);
        let b = Complex::new(0.5 + 1e-13, 0.5 - 1e-13);
        assert_eq!(t.lookup(a), t.lookup(b));
    }

    #[test]
    fn distinct_values_get_distinct_handles() {
        let t = WeightTable::new(64, 1e-10);
        let a = t.lookup(Complex::new(0.1, 0.2));
        let b = t.lookup(Complex::new(0.3, 0.4));
        assert_ne!(a, b);
    }

    #[test]
    fn relocate_preserves_value_across_tables() {
        let small = WeightTable::new(8, 1e-12);
        let h = small.lookup(Complex::new(0.123, 0.456));
        let big = WeightTable::new(64, 1e-12);
        let relocated = big.relocate(h, &small);
        assert!(big.value(relocated).approx_eq(Complex::new(0.123, 0.456), 1e-12));
    }

    #[test]
    fn entries_tracks_distinct_insertions() {
        let t = WeightTable::new(64, 1e-10);
        assert_eq!(t.entries(), 3); // reserved 0, 1, -1
        t.lookup(Complex::new(7.0, 7.0));
        assert_eq!(t.entries(), 4);
        t.lookup(Complex::new(7.0, 7.0));
        assert_eq!(t.entries(), 4);
    }
}
