//! Shared constants and error types for the EVBDD quantum state-vector engine.
//!
//! Mirrors the role the bare MMIO/ISA definitions played for the source
//! firmware: a small, dependency-free crate that both the engine and any
//! downstream consumer link against so that handle widths, reserved values,
//! and error variants never drift between crates.

#![no_std]

extern crate core;

use core::fmt;

/// Reserved weight and node handles.
///
/// These values are installed before any client code runs and re-installed
/// at every GC cycle at the same numeric handle, so a reference to them
/// never needs to be relocated.
pub mod reserved {
    /// Handle of the interned value `0 + 0i`.
    pub const W_ZERO: u32 = 0;
    /// Handle of the interned value `1 + 0i`.
    pub const W_ONE: u32 = 1;
    /// Handle of the interned value `-1 + 0i`.
    pub const W_MINUS_ONE: u32 = 2;

    /// Node handle 0 never denotes a real node.
    pub const NODE_INVALID: u32 = 0;
    /// The single reserved sink node every edge eventually targets.
    pub const TERMINAL: u32 = 1;
}

/// Selects which of the four invariants `makenode` enforces on a freshly
/// built node's child weights.
///
/// The active strategy is fixed for the lifetime of an `Engine`; switching
/// strategies mid-run would silently break the unique-table's canonicity
/// guarantee for any node built under the old strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormStrategy {
    /// Normalize so the low edge carries the reserved weight `W_ONE`
    /// whenever it is nonzero.
    Low,
    /// Normalize by dividing through by whichever child has the larger
    /// magnitude.
    Max,
    /// Normalize by dividing through by whichever child has the smaller
    /// nonzero magnitude, with a deterministic tie-break favoring the low
    /// edge (see DESIGN.md).
    Min,
    /// Normalize onto the unit circle in the (low, high) plane, storing
    /// only the high weight and reconstructing the low weight from
    /// `sqrt(1 - |high|^2)`.
    L2,
}

/// Selects the edge bit-packing layout, fixed once at `Engine::init` and
/// never changed afterward.
///
/// The choice trades weight-table capacity against node-table capacity: a
/// simulator expecting few distinct amplitudes (most circuits) wants
/// `Narrow`; one expecting enormous amplitude diversity (e.g. heavily
/// randomized benchmarks) wants `Wide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeLayout {
    /// 23 weight bits / 40 node bits.
    Narrow,
    /// 33 weight bits / 30 node bits.
    Wide,
}

impl EdgeLayout {
    /// Number of bits reserved for the weight handle.
    pub const fn weight_bits(self) -> u32 {
        match self {
            EdgeLayout::Narrow => 23,
            EdgeLayout::Wide => 33,
        }
    }

    /// Number of bits reserved for the node handle.
    pub const fn node_bits(self) -> u32 {
        match self {
            EdgeLayout::Narrow => 40,
            EdgeLayout::Wide => 30,
        }
    }

    /// Largest weight-table size this layout can address.
    pub const fn max_weight_table_size(self) -> u64 {
        1u64 << self.weight_bits()
    }

    /// Largest node-table size this layout can address.
    pub const fn max_node_table_size(self) -> u64 {
        1u64 << self.node_bits()
    }
}

/// Closed set of operation tags used to key the operation cache (C6).
///
/// New diagram operations must add a variant here rather than reusing an
/// existing tag with a different meaning, or unrelated operations could
/// collide on the same cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTag {
    WgtAdd,
    WgtSub,
    WgtMul,
    WgtDiv,
    Plus,
    MatVec,
    MatMat,
    InnerProduct,
    Tensor,
    Shift,
    ProbSum,
    /// `tensor`'s internal leaf-substitution pass (§4.8.7); cached
    /// separately from `Tensor` itself since it recurses on its own.
    ReplaceTerminal,
}

/// The error taxonomy of the engine.
///
/// Per the error-handling design, almost every variant here is fatal: the
/// crate is a pure functional core in which any recursive step may need to
/// allocate a node or a weight, so there is no meaningful partial result to
/// unwind to. Callers that hit `PreconditionViolated` have a bug in their
/// own code, not a recoverable runtime condition.
#[derive(Debug)]
pub enum EvbddError {
    /// A table could not grow enough to satisfy an insert even after GC.
    CapacityExceeded {
        /// Human-readable identifier of the exhausted table (e.g. `"node"`,
        /// `"weight"`).
        table: &'static str,
        /// The capacity at which exhaustion was observed.
        capacity: usize,
    },
    /// An API was called with a handle or shape that violates its contract.
    PreconditionViolated(&'static str),
    /// A normalization strategy attempted to divide by a zero weight.
    ///
    /// Invariant (§3) guarantees this cannot happen when the active
    /// strategy is implemented correctly; observing this variant means a
    /// normalization strategy has a bug.
    NumericDomain(&'static str),
}

impl fmt::Display for EvbddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvbddError::CapacityExceeded { table, capacity } => {
                write!(f, "{table} table exhausted at capacity {capacity}")
            }
            EvbddError::PreconditionViolated(msg) => write!(f, "precondition violated: {msg}"),
            EvbddError::NumericDomain(msg) => write!(f, "numeric domain error: {msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EvbddError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_layout_bit_widths_sum_to_63() {
        for layout in [EdgeLayout::Narrow, EdgeLayout::Wide] {
            assert_eq!(layout.weight_bits() + layout.node_bits(), 63);
        }
    }

    #[test]
    fn reserved_handles_are_distinct() {
        use reserved::*;
        assert_ne!(W_ZERO, W_ONE);
        assert_ne!(W_ONE, W_MINUS_ONE);
        assert_ne!(W_ZERO, W_MINUS_ONE);
        assert_ne!(NODE_INVALID, TERMINAL);
    }
}
