//! Recursive parallel diagram algebra (C8).
//!
//! Every function here takes a [`Ctx`] — a cheap, `Copy` bundle of
//! references to the engine's shared tables plus the active normalization
//! strategy and arithmetic config — rather than threading six separate
//! parameters through every call site. `Ctx` carries no state of its own;
//! two calls with the same `Ctx` and the same operand edges are pure and
//! will recompute (or, on a cache hit, recall) the identical result.
//!
//! Node-allocating operations return `Result<Edge, EvbddError>` because
//! [`crate::edge::makenode`] can fail with `CapacityExceeded` when the node
//! table has no free slot; [`crate::Engine`]'s top-level entry points are
//! the ones that catch this, run GC, and retry the whole call once (see
//! the engine module's doc comment for why the retry happens there rather
//! than deep inside this recursion). Read-only walks (`get_value`,
//! `prob_sum`, `inner`, `countnodes`, `equivalent`) never allocate a node
//! and so are infallible.

use crate::arith::{self, ArithConfig};
use crate::cache::{CacheKey, OpCache};
use crate::complex::Complex;
use crate::edge::{get_topvar, makenode, Edge, EdgeCodec};
use crate::node_table::{NodeId, NodeTable};
use crate::parallel;
use crate::refs::RefTracker;
use crate::weight_table::{WeightHandle, WeightTable};
use evbdd_common::{reserved, EvbddError, NormStrategy, OpTag};

/// Everything a diagram-algebra call needs, bundled so call sites don't
/// thread six parameters individually. Cheap to copy: every field is
/// either a shared reference or a small `Copy` value.
#[derive(Clone, Copy)]
pub struct Ctx<'a> {
    pub nodes: &'a NodeTable,
    pub weights: &'a WeightTable,
    pub cache: &'a OpCache,
    pub codec: EdgeCodec,
    pub strategy: NormStrategy,
    pub refs: &'a RefTracker,
    pub pool: &'a rayon::ThreadPool,
    pub arith: ArithConfig,
}

impl<'a> Ctx<'a> {
    fn zero_edge(self) -> Edge {
        self.codec.pack(reserved::W_ZERO, reserved::TERMINAL)
    }

    fn topvar(self, edge: Edge) -> u16 {
        let target = self.codec.target(edge);
        if target == reserved::TERMINAL {
            return u16::MAX;
        }
        let (low, _) = self.nodes.get(target);
        let (var, _, _, _) = self.codec.unpack_low(low);
        var
    }

    fn topvar_at(self, edge: Edge, wanted: u16) -> (u16, Edge, Edge) {
        get_topvar(self.nodes, self.weights, self.cache, self.arith, self.codec, self.strategy, edge, wanted)
    }

    /// Builds (or reuses) the canonical node `(var, low, high)`. Exposed as
    /// `pub` (rather than crate-private) so [`crate::Engine::makenode`] can
    /// delegate to it without duplicating the GC-retry-free single-node
    /// construction path.
    pub fn make(self, var: u16, low: Edge, high: Edge) -> Result<Edge, EvbddError> {
        makenode(self.nodes, self.weights, self.codec, self.strategy, var, low, high)
    }

    fn mul_w(self, a: WeightHandle, b: WeightHandle) -> WeightHandle {
        arith::wgt_mul(self.weights, self.cache, self.arith, a, b)
    }
}

/// Builds the basis-state diagram `|x>` for a fixed classical bit pattern,
/// qubit `0` first.
pub fn make_basis_state(ctx: Ctx, bits: &[bool]) -> Result<Edge, EvbddError> {
    let zero = ctx.zero_edge();
    let mut cur = ctx.codec.pack(reserved::W_ONE, reserved::TERMINAL);
    for (i, &bit) in bits.iter().enumerate().rev() {
        let (low, high) = if bit { (zero, cur) } else { (cur, zero) };
        cur = ctx.make(i as u16, low, high)?;
    }
    Ok(cur)
}

/// Pointwise addition: `eval(plus(a, b)) = eval(a) + eval(b)`.
///
/// Guarantees `plus(a, b) == plus(b, a)` as packed words (testable property
/// §8.5): the base case's `wgt_add` canonically orders its operands, and
/// every recursive step treats `a` and `b` symmetrically, so the identity
/// holds inductively.
pub fn plus(ctx: Ctx, a: Edge, b: Edge) -> Result<Edge, EvbddError> {
    let zero = ctx.zero_edge();
    if a == zero {
        return Ok(b);
    }
    if b == zero {
        return Ok(a);
    }

    let a_target = ctx.codec.target(a);
    let b_target = ctx.codec.target(b);
    if a_target == reserved::TERMINAL && b_target == reserved::TERMINAL {
        let sum = arith::wgt_add(ctx.weights, ctx.cache, ctx.codec.weight(a), ctx.codec.weight(b));
        return Ok(ctx.codec.pack(sum, reserved::TERMINAL));
    }

    let (ca, cb) = if a <= b { (a, b) } else { (b, a) };
    let key = CacheKey::binary(OpTag::Plus, ca, cb);
    if let Some(hit) = ctx.cache.get(key) {
        return Ok(hit);
    }

    let v = ctx.topvar(a).min(ctx.topvar(b));
    let (_, a_low, a_high) = ctx.topvar_at(a, v);
    let (_, b_low, b_high) = ctx.topvar_at(b, v);

    let (low_res, high_res) = parallel::fork_join(
        ctx.pool,
        ctx.refs,
        &[a, b],
        || plus(ctx, a_low, b_low),
        || plus(ctx, a_high, b_high),
    );
    let result = ctx.make(v, low_res?, high_res?)?;
    ctx.cache.put(key, result);
    Ok(result)
}

/// Linear product `matvec(M, v, n)` of an n-qubit column vector by a
/// `2n`-variable matrix (row bit `2k`, column bit `2k + 1` at level `k`).
pub fn matvec(ctx: Ctx, m: Edge, v: Edge, n: u16) -> Result<Edge, EvbddError> {
    matvec_rec(ctx, m, v, 0, n)
}

fn matvec_rec(ctx: Ctx, m: Edge, v: Edge, level: u16, n: u16) -> Result<Edge, EvbddError> {
    if level == n {
        let prod = ctx.mul_w(ctx.codec.weight(m), ctx.codec.weight(v));
        return Ok(ctx.codec.pack(prod, reserved::TERMINAL));
    }

    let op_index = level_pair(level, n);
    let key = CacheKey::ternary(OpTag::MatVec, m, v, op_index);
    if let Some(hit) = ctx.cache.get(key) {
        return Ok(hit);
    }

    let row_var = 2 * level;
    let col_var = row_var + 1;
    let (_, m_row0, m_row1) = ctx.topvar_at(m, row_var);
    let (_, m00, m01) = ctx.topvar_at(m_row0, col_var);
    let (_, m10, m11) = ctx.topvar_at(m_row1, col_var);
    let (_, v0, v1) = ctx.topvar_at(v, level);

    let (out0, out1) = parallel::fork_join(
        ctx.pool,
        ctx.refs,
        &[m, v],
        || -> Result<Edge, EvbddError> {
            let a = matvec_rec(ctx, m00, v0, level + 1, n)?;
            let b = matvec_rec(ctx, m01, v1, level + 1, n)?;
            plus(ctx, a, b)
        },
        || -> Result<Edge, EvbddError> {
            let a = matvec_rec(ctx, m10, v0, level + 1, n)?;
            let b = matvec_rec(ctx, m11, v1, level + 1, n)?;
            plus(ctx, a, b)
        },
    );
    let result = ctx.make(level, out0?, out1?)?;
    ctx.cache.put(key, result);
    Ok(result)
}

/// Matrix-matrix product `matmat(A, B, n)`, a `2n`-variable diagram built
/// with a four-way Strassen-style block split at every level.
pub fn matmat(ctx: Ctx, a: Edge, b: Edge, n: u16) -> Result<Edge, EvbddError> {
    matmat_rec(ctx, a, b, 0, n)
}

fn matmat_rec(ctx: Ctx, a: Edge, b: Edge, level: u16, n: u16) -> Result<Edge, EvbddError> {
    if level == n {
        let prod = ctx.mul_w(ctx.codec.weight(a), ctx.codec.weight(b));
        return Ok(ctx.codec.pack(prod, reserved::TERMINAL));
    }

    let op_index = level_pair(level, n);
    let key = CacheKey::ternary(OpTag::MatMat, a, b, op_index);
    if let Some(hit) = ctx.cache.get(key) {
        return Ok(hit);
    }

    let row_var = 2 * level;
    let col_var = row_var + 1;
    let (_, a_row0, a_row1) = ctx.topvar_at(a, row_var);
    let (_, a00, a01) = ctx.topvar_at(a_row0, col_var);
    let (_, a10, a11) = ctx.topvar_at(a_row1, col_var);
    let (_, b_row0, b_row1) = ctx.topvar_at(b, row_var);
    let (_, b00, b01) = ctx.topvar_at(b_row0, col_var);
    let (_, b10, b11) = ctx.topvar_at(b_row1, col_var);

    let block = |left0: Edge, left1: Edge, right0: Edge, right1: Edge| -> Result<Edge, EvbddError> {
        let p = matmat_rec(ctx, left0, right0, level + 1, n)?;
        let q = matmat_rec(ctx, left1, right1, level + 1, n)?;
        plus(ctx, p, q)
    };

    let ((c00, c01), (c10, c11)) = parallel::fork_join(
        ctx.pool,
        ctx.refs,
        &[a, b],
        || -> Result<(Edge, Edge), EvbddError> {
            Ok((block(a00, a01, b00, b10)?, block(a00, a01, b01, b11)?))
        },
        || -> Result<(Edge, Edge), EvbddError> {
            Ok((block(a10, a11, b00, b10)?, block(a10, a11, b01, b11)?))
        },
    );
    let (c00, c01) = c00?;
    let (c10, c11) = c10?;

    let row0 = ctx.make(col_var, c00, c01)?;
    let row1 = ctx.make(col_var, c10, c11)?;
    let result = ctx.make(row_var, row0, row1)?;
    ctx.cache.put(key, result);
    Ok(result)
}

/// Packs `(level, n)` into one cache-key operand slot.
fn level_pair(level: u16, n: u16) -> u64 {
    ((level as u64) << 32) | (n as u64)
}

fn inner_rec(ctx: Ctx, a: Edge, b: Edge, level: u16, n: u16) -> WeightHandle {
    if level == n {
        let wa = ctx.weights.value(ctx.codec.weight(a));
        let wb = ctx.weights.value(ctx.codec.weight(b));
        return ctx.weights.lookup(wb.conj().mul(wa));
    }
    let key = CacheKey::ternary(OpTag::InnerProduct, a, b, level_pair(level, n));
    if let Some(hit) = ctx.cache.get(key) {
        return hit as WeightHandle;
    }
    let (_, a_low, a_high) = ctx.topvar_at(a, level);
    let (_, b_low, b_high) = ctx.topvar_at(b, level);
    let sum_low = inner_rec(ctx, a_low, b_low, level + 1, n);
    let sum_high = inner_rec(ctx, a_high, b_high, level + 1, n);
    let result = arith::wgt_add(ctx.weights, ctx.cache, sum_low, sum_high);
    ctx.cache.put(key, result as u64);
    result
}

/// Inner product `<b|a> = sum_x conj(b(x)) * a(x)`.
pub fn inner(ctx: Ctx, a: Edge, b: Edge, n: u16) -> Complex {
    ctx.weights.value(inner_rec(ctx, a, b, 0, n))
}

/// Rebuilds `edge`'s subdiagram with every internal node's variable shifted
/// up by `k`, preserving the function it denotes over the shifted variable
/// range. Used by [`tensor`] to make room for the first operand's
/// variables below the second operand's.
pub fn shift(ctx: Ctx, edge: Edge, k: u16) -> Result<Edge, EvbddError> {
    let target = ctx.codec.target(edge);
    if target == reserved::TERMINAL {
        return Ok(edge);
    }

    let structural_key = ctx.codec.pack(reserved::W_ONE, target);
    let key = CacheKey::binary(OpTag::Shift, structural_key, k as u64);
    let shifted_unit = if let Some(hit) = ctx.cache.get(key) {
        hit
    } else {
        let (low, high) = ctx.nodes.get(target);
        let (var, _, _, _) = ctx.codec.unpack_low(low);
        let (_, low_edge, high_edge) = ctx.codec.unpack_node(ctx.weights, ctx.strategy, low, high);
        let new_low = shift(ctx, low_edge, k)?;
        let new_high = shift(ctx, high_edge, k)?;
        let result = ctx.make(var + k, new_low, new_high)?;
        ctx.cache.put(key, result);
        result
    };

    let w = ctx.mul_w(ctx.codec.weight(edge), ctx.codec.weight(shifted_unit));
    Ok(ctx.codec.pack(w, ctx.codec.target(shifted_unit)))
}

/// Substitutes `replacement` for every terminal edge reachable from `a`,
/// folding the leaf weight along the way into `replacement`'s root weight.
pub fn replace_terminal(ctx: Ctx, a: Edge, replacement: Edge) -> Result<Edge, EvbddError> {
    let target = ctx.codec.target(a);
    let w = ctx.codec.weight(a);
    if target == reserved::TERMINAL {
        let combined = ctx.mul_w(w, ctx.codec.weight(replacement));
        return Ok(ctx.codec.pack(combined, ctx.codec.target(replacement)));
    }

    let structural_key = ctx.codec.pack(reserved::W_ONE, target);
    let key = CacheKey::binary(OpTag::ReplaceTerminal, structural_key, replacement);
    let replaced_unit = if let Some(hit) = ctx.cache.get(key) {
        hit
    } else {
        let (low, high) = ctx.nodes.get(target);
        let (var, _, _, _) = ctx.codec.unpack_low(low);
        let (_, low_edge, high_edge) = ctx.codec.unpack_node(ctx.weights, ctx.strategy, low, high);
        let new_low = replace_terminal(ctx, low_edge, replacement)?;
        let new_high = replace_terminal(ctx, high_edge, replacement)?;
        let result = ctx.make(var, new_low, new_high)?;
        ctx.cache.put(key, result);
        result
    };

    let scaled = ctx.mul_w(w, ctx.codec.weight(replaced_unit));
    Ok(ctx.codec.pack(scaled, ctx.codec.target(replaced_unit)))
}

/// Tensor product `a (x) b`: every variable of `b` is shifted past `a`'s
/// `nvars_a` variables, then woven in wherever `a` reaches its terminal.
pub fn tensor(ctx: Ctx, a: Edge, b: Edge, nvars_a: u16) -> Result<Edge, EvbddError> {
    let key = CacheKey::ternary(OpTag::Tensor, a, b, nvars_a as u64);
    if let Some(hit) = ctx.cache.get(key) {
        return Ok(hit);
    }
    let shifted_b = shift(ctx, b, nvars_a)?;
    let result = replace_terminal(ctx, a, shifted_b)?;
    ctx.cache.put(key, result);
    Ok(result)
}

/// Descends `a` along `assignment` (qubit 0 first), multiplying weights
/// through at every step, and returns the resulting amplitude. Don't-care
/// variables (where `a` skips a level) are handled transparently by
/// [`get_topvar`]'s synthetic identity decomposition.
pub fn get_value(ctx: Ctx, a: Edge, assignment: &[bool]) -> Complex {
    let n = assignment.len() as u16;
    let mut cur = a;
    for level in 0..n {
        let (_, low, high) = ctx.topvar_at(cur, level);
        cur = if assignment[level as usize] { high } else { low };
    }
    ctx.weights.value(ctx.codec.weight(cur))
}

/// `sum_x |eval(a)(x)|^2` over the `2^(n - level)` extensions of the path
/// reaching `a` at `level`. The L2 norm is `prob_sum(state, 0, n).sqrt()`;
/// `prob_qubit`/`measure_qubit` use it as the normalizing denominator.
pub fn prob_sum(ctx: Ctx, a: Edge, level: u16, n: u16) -> f64 {
    if level == n {
        return ctx.weights.value(ctx.codec.weight(a)).sqr();
    }
    let key = CacheKey::ternary(OpTag::ProbSum, a, level as u64, n as u64);
    if let Some(hit) = ctx.cache.get(key) {
        return f64::from_bits(hit);
    }
    let (_, low, high) = ctx.topvar_at(a, level);
    let sum = prob_sum(ctx, low, level + 1, n) + prob_sum(ctx, high, level + 1, n);
    ctx.cache.put(key, sum.to_bits());
    sum
}

fn restricted_prob_sum(ctx: Ctx, a: Edge, level: u16, n: u16, qubit: u16, bit: bool) -> f64 {
    let (_, low, high) = ctx.topvar_at(a, level);
    if level == qubit {
        let chosen = if bit { high } else { low };
        return prob_sum(ctx, chosen, level + 1, n);
    }
    restricted_prob_sum(ctx, low, level + 1, n, qubit, bit) + restricted_prob_sum(ctx, high, level + 1, n, qubit, bit)
}

/// Probability that `qubit` measures `0` in the (not necessarily
/// normalized) state `a`.
pub fn prob_qubit(ctx: Ctx, a: Edge, qubit: u16, n: u16) -> f64 {
    let total = prob_sum(ctx, a, 0, n);
    if total == 0.0 {
        return 0.0;
    }
    restricted_prob_sum(ctx, a, 0, n, qubit, false) / total
}

fn project_qubit(ctx: Ctx, a: Edge, level: u16, n: u16, qubit: u16, outcome: bool) -> Result<Edge, EvbddError> {
    if level == n {
        return Ok(a);
    }
    let (_, low, high) = ctx.topvar_at(a, level);
    if level == qubit {
        let zero = ctx.zero_edge();
        let (low, high) = if outcome { (zero, high) } else { (low, zero) };
        return ctx.make(level, low, high);
    }
    let new_low = project_qubit(ctx, low, level + 1, n, qubit, outcome)?;
    let new_high = project_qubit(ctx, high, level + 1, n, qubit, outcome)?;
    ctx.make(level, new_low, new_high)
}

/// Projects `a` onto a single measurement outcome for `qubit` and
/// renormalizes so the result again satisfies the L2 unit-norm invariant.
///
/// When `outcome` is `None`, the outcome is sampled by comparing the
/// caller-supplied `uniform` draw (expected in `[0, 1)`) against
/// `prob_qubit`; the engine performs no hidden randomness of its own.
/// Returns the projected-and-renormalized edge and the outcome that was
/// used.
pub fn measure_qubit(
    ctx: Ctx,
    a: Edge,
    qubit: u16,
    n: u16,
    outcome: Option<bool>,
    uniform: f64,
) -> Result<(Edge, bool), EvbddError> {
    let p_zero = prob_qubit(ctx, a, qubit, n);
    let chosen = outcome.unwrap_or(uniform >= p_zero);
    let prob_chosen = if chosen { 1.0 - p_zero } else { p_zero };

    let projected = project_qubit(ctx, a, 0, n, qubit, chosen)?;
    if prob_chosen <= 0.0 {
        // Degenerate projection onto a zero-probability outcome: the
        // caller asked for an impossible branch explicitly.
        return Ok((projected, chosen));
    }
    let norm = prob_chosen.sqrt();
    let root_w = ctx.weights.value(ctx.codec.weight(projected)).scale(1.0 / norm);
    let scaled = ctx.weights.lookup(root_w);
    Ok((ctx.codec.pack(scaled, ctx.codec.target(projected)), chosen))
}

/// Counts the distinct nodes reachable from `a`, marking then unmarking so
/// the walk never disturbs a concurrently tracked GC mark.
pub fn countnodes(ctx: Ctx, a: Edge) -> usize {
    fn visit(ctx: Ctx, id: NodeId, count: &mut usize) {
        if id == reserved::TERMINAL {
            return;
        }
        if !ctx.nodes.mark(id) {
            return;
        }
        *count += 1;
        let (low, high) = ctx.nodes.get(id);
        let (_, low_edge, high_edge) = ctx.codec.unpack_node(ctx.weights, ctx.strategy, low, high);
        visit(ctx, ctx.codec.target(low_edge), count);
        visit(ctx, ctx.codec.target(high_edge), count);
    }
    fn unvisit(ctx: Ctx, id: NodeId) {
        if id == reserved::TERMINAL || !ctx.nodes.unmark(id) {
            return;
        }
        let (low, high) = ctx.nodes.get(id);
        let (_, low_edge, high_edge) = ctx.codec.unpack_node(ctx.weights, ctx.strategy, low, high);
        unvisit(ctx, ctx.codec.target(low_edge));
        unvisit(ctx, ctx.codec.target(high_edge));
    }

    let root = ctx.codec.target(a);
    let mut count = 0;
    visit(ctx, root, &mut count);
    unvisit(ctx, root);
    count
}

/// Equivalence of two diagrams over `n` variables. `exact` compares the
/// root edges as packed words (the primary, O(1) notion of equality two
/// canonical diagrams ever need); the non-exact enumeration is a debug aid
/// that brute-forces all `2^n` assignments and should not be used for
/// large `n`.
pub fn equivalent(ctx: Ctx, a: Edge, b: Edge, n: u16, exact: bool, verbose: bool) -> bool {
    if exact {
        return a == b;
    }
    let tol = ctx.weights.tolerance();
    let mut all_equal = true;
    for x in 0..(1u64 << n) {
        let assignment: Vec<bool> = (0..n).map(|i| (x >> i) & 1 == 1).collect();
        let va = get_value(ctx, a, &assignment);
        let vb = get_value(ctx, b, &assignment);
        if !va.approx_eq(vb, tol) {
            all_equal = false;
            if verbose {
                eprintln!("equivalent: mismatch at {assignment:?}: {va:?} != {vb:?}");
            } else {
                return false;
            }
        }
    }
    all_equal
}
