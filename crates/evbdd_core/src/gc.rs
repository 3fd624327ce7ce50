//! Stop-the-world garbage collection (C7, part two).
//!
//! GC never mutates a record in place: it allocates a fresh, larger weight
//! table and a fresh node table, marks every node reachable from a root,
//! and rebuilds each marked node into the new tables with its weight
//! handles relocated. Unmarked nodes are simply never copied — their
//! handles are never touched again because, by invariant, nothing live
//! still points at them.

use crate::cache::OpCache;
use crate::edge::{Edge, EdgeCodec};
use crate::node_table::{NodeId, NodeTable};
use crate::refs::RefTracker;
use crate::weight_table::WeightTable;
use evbdd_common::{reserved, EvbddError, NormStrategy};
use std::collections::HashMap;

/// Bounds GC is allowed to grow tables to, and the growth factor applied to
/// the weight table on every cycle.
#[derive(Debug, Clone, Copy)]
pub struct GcLimits {
    pub weight_table_growth: f64,
    pub max_weight_table: usize,
    pub node_table_growth: f64,
    pub max_node_table: usize,
}

impl Default for GcLimits {
    fn default() -> Self {
        Self {
            weight_table_growth: 2.0,
            max_weight_table: 1 << 24,
            node_table_growth: 2.0,
            max_node_table: 1 << 24,
        }
    }
}

/// Freshly rebuilt tables plus the edge-rewriting closure the caller uses to
/// bring every root up to date.
pub struct GcResult {
    pub nodes: NodeTable,
    pub weights: WeightTable,
}

fn mark(nodes: &NodeTable, weights: &WeightTable, codec: EdgeCodec, strategy: NormStrategy, id: NodeId) {
    if id == reserved::TERMINAL || id == reserved::NODE_INVALID {
        return;
    }
    if !nodes.mark(id) {
        return; // already visited
    }
    let (low, high) = nodes.get(id);
    let (_, low_edge, high_edge) = codec.unpack_node(weights, strategy, low, high);
    mark(nodes, weights, codec, strategy, codec.target(low_edge));
    mark(nodes, weights, codec, strategy, codec.target(high_edge));
}

#[allow(clippy::too_many_arguments)]
fn rebuild(
    old_nodes: &NodeTable,
    old_weights: &WeightTable,
    new_nodes: &NodeTable,
    new_weights: &WeightTable,
    codec: EdgeCodec,
    memo: &mut HashMap<NodeId, NodeId>,
    old_id: NodeId,
) -> Result<NodeId, EvbddError> {
    if old_id == reserved::TERMINAL {
        return Ok(reserved::TERMINAL);
    }
    if let Some(&new_id) = memo.get(&old_id) {
        return Ok(new_id);
    }

    let (low, high) = old_nodes.get(old_id);
    let (var, norm_pos, norm_val, low_ptr) = codec.unpack_low(low);
    let (wgt_high, high_ptr) = codec.unpack_high(high);

    let new_low_ptr = rebuild(old_nodes, old_weights, new_nodes, new_weights, codec, memo, low_ptr)?;
    let new_high_ptr = rebuild(old_nodes, old_weights, new_nodes, new_weights, codec, memo, high_ptr)?;
    let new_wgt_high = new_weights.relocate(wgt_high, old_weights);

    let new_low_word = codec.pack_low(var, norm_pos, norm_val, new_low_ptr);
    let new_high_word = codec.pack_high(new_wgt_high, new_high_ptr);

    let (new_id, _) = new_nodes
        .lookup(new_low_word, new_high_word)
        .ok_or(EvbddError::CapacityExceeded { table: "node", capacity: new_nodes.capacity() })?;
    memo.insert(old_id, new_id);
    Ok(new_id)
}

/// Runs one full GC cycle and rewrites every root tracked by `refs` in
/// place to point into the freshly built tables.
///
/// The caller (the engine's top-level entry points) is responsible for
/// ensuring no other worker is concurrently pushing/popping a value stack
/// or mutating a protected root — this function performs no synchronization
/// of its own beyond what [`RefTracker`] already provides.
pub fn collect(
    old_nodes: &NodeTable,
    old_weights: &WeightTable,
    codec: EdgeCodec,
    strategy: NormStrategy,
    refs: &RefTracker,
    cache: &OpCache,
    limits: GcLimits,
) -> Result<GcResult, EvbddError> {
    let new_weight_capacity =
        ((old_weights.capacity() as f64 * limits.weight_table_growth) as usize)
            .min(limits.max_weight_table)
            .max(old_weights.capacity());
    let new_weights = WeightTable::new(new_weight_capacity, old_weights.tolerance());

    let new_node_capacity = ((old_nodes.capacity() as f64 * limits.node_table_growth) as usize)
        .min(limits.max_node_table)
        .max(old_nodes.capacity());
    let new_nodes = NodeTable::new(new_node_capacity);

    old_nodes.clear_marks();
    let roots = refs.roots();
    for root in &roots {
        mark(old_nodes, old_weights, codec, strategy, codec.target(*root));
    }

    let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
    for id in old_nodes.marked_ids() {
        rebuild(old_nodes, old_weights, &new_nodes, &new_weights, codec, &mut memo, id)?;
    }

    refs.remap_all(|edge| {
        let old_target = codec.target(edge);
        let old_wgt = codec.weight(edge);
        let new_target = if old_target == reserved::TERMINAL {
            reserved::TERMINAL
        } else {
            *memo.get(&old_target).expect("GC root was not reached by its own mark pass")
        };
        let new_wgt = new_weights.relocate(old_wgt, old_weights);
        codec.pack(new_wgt, new_target)
    });

    cache.invalidate();

    Ok(GcResult { nodes: new_nodes, weights: new_weights })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complex::Complex;
    use crate::edge::makenode;
    use evbdd_common::EdgeLayout;

    #[test]
    fn collect_preserves_a_protected_roots_value() {
        let codec = EdgeCodec::new(EdgeLayout::Narrow);
        let strategy = NormStrategy::Low;
        let nodes = NodeTable::new(16);
        let weights = WeightTable::new(16, 1e-12);
        let cache = OpCache::new(16);
        let refs = RefTracker::new();

        let two = weights.lookup(Complex::new(2.0, 0.0));
        let low = codec.pack(reserved::W_ONE, reserved::TERMINAL);
        let high = codec.pack(two, reserved::TERMINAL);
        let edge = makenode(&nodes, &weights, codec, strategy, 0, low, high).unwrap();

        let root = refs.protect(edge);

        let result = collect(&nodes, &weights, codec, strategy, &refs, &cache, GcLimits::default()).unwrap();

        let new_edge = refs.protected_value(&root);
        let new_target = codec.target(new_edge);
        let (lw, hw) = result.nodes.get(new_target);
        let (_, new_low, new_high) = codec.unpack_node(&result.weights, strategy, lw, hw);
        assert_eq!(result.weights.value(codec.weight(new_low)), Complex::ONE);
        assert!(result.weights.value(codec.weight(new_high)).approx_eq(Complex::new(2.0, 0.0), 1e-9));
    }

    #[test]
    fn collect_clears_the_operation_cache() {
        use crate::cache::CacheKey;
        use evbdd_common::OpTag;

        let codec = EdgeCodec::new(EdgeLayout::Narrow);
        let strategy = NormStrategy::Low;
        let nodes = NodeTable::new(16);
        let weights = WeightTable::new(16, 1e-12);
        let cache = OpCache::new(16);
        let refs = RefTracker::new();

        let key = CacheKey::binary(OpTag::Plus, 1, 2);
        cache.put(key, 5);
        collect(&nodes, &weights, codec, strategy, &refs, &cache, GcLimits::default()).unwrap();
        assert!(cache.get(key).is_none());
    }
}
