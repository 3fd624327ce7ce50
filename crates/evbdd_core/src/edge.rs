//! Edge/node bit-packing and the canonical node constructor (C4).
//!
//! An [`Edge`] is a bare `u64`: one unused bit, a weight-handle field, and a
//! node-handle field, in the proportions fixed by the active [`EdgeLayout`].
//! A node's two outgoing edges are packed into the node table's 128-bit
//! record (two `u64` words), but only one of the two weight handles is ever
//! stored there — the normalization strategy in force guarantees the other
//! is always derivable (it is the reserved `W_ZERO`/`W_ONE` handle, or, under
//! [`NormStrategy::L2`], a value reconstructible from the stored one).

use crate::arith::{self, ArithConfig};
use crate::cache::OpCache;
use crate::complex::Complex;
use crate::node_table::{NodeId, NodeTable};
use crate::normalize::{self, normalize};
use crate::weight_table::{WeightHandle, WeightTable};
use evbdd_common::{reserved, EdgeLayout, EvbddError, NormStrategy};

/// A packed `(weight handle, node handle)` pair. The unused top bit is
/// always zero; GC's mark bit lives on the *node record*, not the edge.
pub type Edge = u64;

const VAR_SHIFT: u32 = 47;
const NORM_POS_SHIFT: u32 = 46;
const NORM_VAL_SHIFT: u32 = 45;
const VAR_BITS: u32 = 16;

/// Packs and unpacks [`Edge`]s and node-table records under a fixed
/// [`EdgeLayout`].
///
/// Cheap to copy; every call site that needs to interpret raw bits takes a
/// codec by value rather than consulting a global, so the layout choice
/// stays an explicit, testable parameter instead of ambient state.
#[derive(Debug, Clone, Copy)]
pub struct EdgeCodec {
    layout: EdgeLayout,
}

impl EdgeCodec {
    pub fn new(layout: EdgeLayout) -> Self {
        Self { layout }
    }

    pub fn layout(self) -> EdgeLayout {
        self.layout
    }

    fn node_shift(self) -> u32 {
        0
    }

    fn node_mask(self) -> u64 {
        (1u64 << self.layout.node_bits()) - 1
    }

    fn weight_shift(self) -> u32 {
        self.layout.node_bits()
    }

    fn weight_mask_shifted(self) -> u64 {
        ((1u64 << self.layout.weight_bits()) - 1) << self.weight_shift()
    }

    /// Bundles a weight handle and a node handle into one edge.
    pub fn pack(self, weight: WeightHandle, target: NodeId) -> Edge {
        debug_assert!((target as u64) <= self.node_mask(), "node handle overflows edge layout");
        debug_assert!(
            (weight as u64) < (1u64 << self.layout.weight_bits()),
            "weight handle overflows edge layout"
        );
        ((weight as u64) << self.weight_shift()) | (target as u64 & self.node_mask())
    }

    pub fn weight(self, edge: Edge) -> WeightHandle {
        ((edge & self.weight_mask_shifted()) >> self.weight_shift()) as WeightHandle
    }

    pub fn target(self, edge: Edge) -> NodeId {
        (edge & self.node_mask()) as NodeId
    }

    fn ptr_mask(self) -> u64 {
        (1u64 << self.layout.node_bits()) - 1
    }

    /// Packs the low word of a node record: `var | norm_pos | norm_val | low_ptr`.
    pub(crate) fn pack_low(self, var: u16, norm_pos: bool, norm_val: bool, low_ptr: NodeId) -> u64 {
        debug_assert!((var as u32) < (1 << VAR_BITS));
        ((var as u64) << VAR_SHIFT)
            | ((norm_pos as u64) << NORM_POS_SHIFT)
            | ((norm_val as u64) << NORM_VAL_SHIFT)
            | (low_ptr as u64 & self.ptr_mask())
    }

    /// Packs the high word of a node record: `wgt_high | high_ptr`. The mark
    /// bit is always stored clear here; [`NodeTable::force_install`]/`lookup`
    /// own it afterward.
    pub(crate) fn pack_high(self, wgt_high: WeightHandle, high_ptr: NodeId) -> u64 {
        ((wgt_high as u64) << self.weight_shift()) | (high_ptr as u64 & self.ptr_mask())
    }

    /// Exposed for GC's rebuild pass, which relocates handles in an already
    /// normalized record without re-deriving the `norm_pos`/`norm_val` bits.
    pub(crate) fn unpack_low(self, low: u64) -> (u16, bool, bool, NodeId) {
        let var = ((low >> VAR_SHIFT) & ((1 << VAR_BITS) - 1)) as u16;
        let norm_pos = (low >> NORM_POS_SHIFT) & 1 != 0;
        let norm_val = (low >> NORM_VAL_SHIFT) & 1 != 0;
        let ptr = (low & self.ptr_mask()) as NodeId;
        (var, norm_pos, norm_val, ptr)
    }

    pub(crate) fn unpack_high(self, high: u64) -> (WeightHandle, NodeId) {
        let wgt = ((high >> self.weight_shift()) & ((1u64 << self.layout.weight_bits()) - 1))
            as WeightHandle;
        let ptr = (high & self.ptr_mask()) as NodeId;
        (wgt, ptr)
    }

    /// Reconstructs `(var, low_edge, high_edge)` from a node record, given
    /// the normalization strategy that built it.
    pub fn unpack_node(
        self,
        weights: &WeightTable,
        strategy: NormStrategy,
        low: u64,
        high: u64,
    ) -> (u16, Edge, Edge) {
        let (var, norm_pos, norm_val, low_ptr) = self.unpack_low(low);
        let (wgt_high, high_ptr) = self.unpack_high(high);

        if strategy == NormStrategy::L2 {
            let high_val = weights.value(wgt_high);
            let low_val = normalize::low_from_high_l2(high_val);
            let low_handle = weights.lookup(low_val);
            return (
                var,
                self.pack(low_handle, low_ptr),
                self.pack(wgt_high, high_ptr),
            );
        }

        let reserved_handle = if norm_val { reserved::W_ONE } else { reserved::W_ZERO };
        if !norm_pos {
            // Reserved value is on low; wgt_high belongs to high.
            (var, self.pack(reserved_handle, low_ptr), self.pack(wgt_high, high_ptr))
        } else {
            // Reserved value is on high; wgt_high (despite the name) is low's handle.
            (var, self.pack(wgt_high, low_ptr), self.pack(reserved_handle, high_ptr))
        }
    }
}

/// Builds (or reuses) the canonical node for `(var, low, high)` and returns
/// the edge to it with the common factor folded onto the edge weight.
///
/// Mirrors the source's `evbdd_makenode`/`evbddnode_pack`/`_evbdd_makenode`
/// pipeline: absorb zero-weight children into the terminal, short-circuit
/// the trivial reduction rule, normalize, pack, and insert. Returns
/// [`EvbddError::CapacityExceeded`] if the node table has no free slot or the
/// weight table has no slot left to intern a normalized value into; the
/// caller (the engine's GC-aware entry points) is responsible for running
/// GC and retrying once, exactly as the source's auto-GC-on-insert path
/// does.
#[allow(clippy::too_many_arguments)]
pub fn makenode(
    node_table: &NodeTable,
    weight_table: &WeightTable,
    codec: EdgeCodec,
    strategy: NormStrategy,
    var: u16,
    low: Edge,
    high: Edge,
) -> Result<Edge, EvbddError> {
    let low_wgt = codec.weight(low);
    let high_wgt = codec.weight(high);
    let mut low_target = codec.target(low);
    let mut high_target = codec.target(high);

    if low_wgt == reserved::W_ZERO {
        low_target = reserved::TERMINAL;
    }
    if high_wgt == reserved::W_ZERO {
        high_target = reserved::TERMINAL;
    }

    // Reduction rule: a node whose two children are the very same edge
    // contributes nothing and is elided; its incoming edge is just that edge.
    if low_wgt == high_wgt && low_target == high_target {
        return Ok(codec.pack(low_wgt, low_target));
    }

    let low_val = weight_table.value(low_wgt);
    let high_val = weight_table.value(high_wgt);
    let normalized = normalize(strategy, low_val, high_val);

    let (low_word, high_word) = pack_node_record(
        codec,
        weight_table,
        strategy,
        var,
        low_target,
        high_target,
        normalized.low,
        normalized.high,
    )?;

    let (node_id, _) = node_table
        .lookup(low_word, high_word)
        .ok_or(EvbddError::CapacityExceeded { table: "node", capacity: node_table.capacity() })?;

    let common_handle = weight_table.try_lookup(normalized.common)?;
    Ok(codec.pack(common_handle, node_id))
}

#[allow(clippy::too_many_arguments)]
fn pack_node_record(
    codec: EdgeCodec,
    weight_table: &WeightTable,
    strategy: NormStrategy,
    var: u16,
    low_ptr: NodeId,
    high_ptr: NodeId,
    low_val: Complex,
    high_val: Complex,
) -> Result<(u64, u64), EvbddError> {
    if strategy == NormStrategy::L2 {
        let high_handle = weight_table.try_lookup(high_val)?;
        let low_word = codec.pack_low(var, false, false, low_ptr);
        let high_word = codec.pack_high(high_handle, high_ptr);
        return Ok((low_word, high_word));
    }

    let low_is_reserved =
        low_val.exact_eq(Complex::ZERO) || low_val.exact_eq(Complex::ONE);
    debug_assert!(
        low_is_reserved
            || high_val.exact_eq(Complex::ZERO)
            || high_val.exact_eq(Complex::ONE),
        "non-L2 normalization must leave one child at 0 or 1"
    );

    if low_is_reserved {
        let norm_val = low_val.exact_eq(Complex::ONE);
        let high_handle = weight_table.try_lookup(high_val)?;
        let low_word = codec.pack_low(var, false, norm_val, low_ptr);
        let high_word = codec.pack_high(high_handle, high_ptr);
        Ok((low_word, high_word))
    } else {
        let norm_val = high_val.exact_eq(Complex::ONE);
        let low_handle = weight_table.try_lookup(low_val)?;
        let low_word = codec.pack_low(var, true, norm_val, low_ptr);
        let high_word = codec.pack_high(low_handle, high_ptr);
        Ok((low_word, high_word))
    }
}

/// Decomposes `edge` at variable `wanted`, synthesizing a don't-care node
/// for any variable the diagram skips over between `edge`'s own top
/// variable and `wanted`, and folding `edge`'s own weight into both
/// returned children.
///
/// Returns `(topvar, low, high)` where `topvar <= wanted`, and where `low`
/// and `high` already carry `edge`'s root weight multiplied through — the
/// caller never needs to separately track the weight of the edge it just
/// decomposed. When `edge`'s target is `TERMINAL` or its node's variable is
/// skipped past `wanted`, both children are `edge` itself: descending
/// either branch of a don't-care variable reaches the exact same
/// subdiagram.
pub fn get_topvar(
    node_table: &NodeTable,
    weight_table: &WeightTable,
    cache: &OpCache,
    arith: ArithConfig,
    codec: EdgeCodec,
    strategy: NormStrategy,
    edge: Edge,
    wanted: u16,
) -> (u16, Edge, Edge) {
    let target = codec.target(edge);
    if target == reserved::TERMINAL {
        return (wanted, edge, edge);
    }

    let (low, high) = node_table.get(target);
    let (node_var, _, _, _) = codec.unpack_low(low);
    if node_var > wanted {
        return (wanted, edge, edge);
    }

    let (_, low_edge, high_edge) = codec.unpack_node(weight_table, strategy, low, high);
    let w = codec.weight(edge);
    let low_w = arith::wgt_mul(weight_table, cache, arith, w, codec.weight(low_edge));
    let high_w = arith::wgt_mul(weight_table, cache, arith, w, codec.weight(high_edge));
    (
        node_var,
        codec.pack(low_w, codec.target(low_edge)),
        codec.pack(high_w, codec.target(high_edge)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (NodeTable, WeightTable, EdgeCodec) {
        (NodeTable::new(64), WeightTable::new(64, 1e-12), EdgeCodec::new(EdgeLayout::Narrow))
    }

    fn arith_fixtures() -> (OpCache, ArithConfig) {
        (OpCache::new(64), ArithConfig { inverse_caching: false })
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let codec = EdgeCodec::new(EdgeLayout::Narrow);
        let e = codec.pack(7, 123);
        assert_eq!(codec.weight(e), 7);
        assert_eq!(codec.target(e), 123);
    }

    #[test]
    fn makenode_collapses_identical_children_into_their_own_edge() {
        let (nodes, weights, codec) = fixtures();
        let a = codec.pack(reserved::W_ONE, reserved::TERMINAL);
        let result = makenode(&nodes, &weights, codec, NormStrategy::Low, 0, a, a).unwrap();
        assert_eq!(result, a);
    }

    #[test]
    fn makenode_low_strategy_normalizes_low_to_one() {
        let (nodes, weights, codec) = fixtures();
        let two = weights.lookup(Complex::new(2.0, 0.0));
        let four = weights.lookup(Complex::new(4.0, 0.0));
        let low = codec.pack(two, reserved::TERMINAL);
        let high = codec.pack(four, reserved::TERMINAL);
        let edge = makenode(&nodes, &weights, codec, NormStrategy::Low, 0, low, high).unwrap();
        assert!(weights.value(codec.weight(edge)).approx_eq(Complex::new(2.0, 0.0), 1e-9));

        let target = codec.target(edge);
        let (lw, hw) = nodes.get(target);
        let (_, low_e, high_e) = codec.unpack_node(&weights, NormStrategy::Low, lw, hw);
        assert_eq!(weights.value(codec.weight(low_e)), Complex::ONE);
        assert!(weights.value(codec.weight(high_e)).approx_eq(Complex::new(2.0, 0.0), 1e-9));
    }

    #[test]
    fn makenode_zero_weight_child_collapses_target_to_terminal() {
        let (nodes, weights, codec) = fixtures();
        let one_edge = codec.pack(reserved::W_ONE, reserved::TERMINAL);
        let zero_edge = codec.pack(reserved::W_ZERO, 999);
        let edge = makenode(&nodes, &weights, codec, NormStrategy::Low, 0, zero_edge, one_edge).unwrap();
        let target = codec.target(edge);
        let (lw, hw) = nodes.get(target);
        let (_, low_e, high_e) = codec.unpack_node(&weights, NormStrategy::Low, lw, hw);
        assert_eq!(codec.target(low_e), reserved::TERMINAL);
        assert_eq!(weights.value(codec.weight(low_e)), Complex::ZERO);
        let _ = high_e;
    }

    #[test]
    fn get_topvar_synthesizes_identity_for_skipped_variable() {
        let (nodes, weights, codec) = fixtures();
        let (cache, arith) = arith_fixtures();
        let a = codec.pack(reserved::W_ONE, reserved::TERMINAL);
        let (topvar, low, high) =
            get_topvar(&nodes, &weights, &cache, arith, codec, NormStrategy::Low, a, 3);
        assert_eq!(topvar, 3);
        assert_eq!(low, high);
        assert_eq!(codec.target(low), reserved::TERMINAL);
    }

    #[test]
    fn get_topvar_folds_root_weight_into_children() {
        let (nodes, weights, codec) = fixtures();
        let (cache, arith) = arith_fixtures();
        let two = weights.lookup(Complex::new(2.0, 0.0));
        let low = codec.pack(reserved::W_ONE, reserved::TERMINAL);
        let high = codec.pack(two, reserved::TERMINAL);
        let node_edge = makenode(&nodes, &weights, codec, NormStrategy::Low, 0, low, high).unwrap();
        // Scale the whole diagram by 3 before decomposing.
        let three = weights.lookup(Complex::new(3.0, 0.0));
        let scaled = codec.pack(three, codec.target(node_edge));
        let (var, low_e, high_e) =
            get_topvar(&nodes, &weights, &cache, arith, codec, NormStrategy::Low, scaled, 0);
        assert_eq!(var, 0);
        assert!(weights.value(codec.weight(low_e)).approx_eq(Complex::new(3.0, 0.0), 1e-9));
        assert!(weights.value(codec.weight(high_e)).approx_eq(Complex::new(6.0, 0.0), 1e-9));
    }
}
