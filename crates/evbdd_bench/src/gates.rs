//! Gate registry (C10): the thin, test-only layer that supplies 2×2/4×4
//! complex matrices as EVBDD diagrams.
//!
//! This exists only to drive the engine through realistic circuits and to
//! exercise the `reinit_entries_hook` contract (§4.10, §9 "Global state");
//! it is not part of the library's shipped surface. Every gate matrix is
//! built once, as a diagram rooted at a [`Protected`] handle — GC already
//! keeps a protected root's own edge correct across a collection (via
//! `RefTracker::remap_all`), but the *scalar* constants this module
//! resolves up front (`1/sqrt(2)`, `i`, `e^{i*pi/4}`) are plain
//! `WeightHandle`s with no edge wrapping them, so they are not GC roots and
//! do go stale the moment a collection replaces the weight table.
//! [`GateConstants`] is kept in an `Arc<Mutex<_>>` shared with the
//! `reinit_entries_hook` closure so a fresh collection always leaves it
//! holding handles valid in the *current* table.

use evbdd_core::{reserved, Complex, Edge, Engine, EvbddError, Protected, ReinitHook};
use std::sync::{Arc, Mutex};

/// The handful of non-reserved scalar constants every gate below is built
/// from. Reserved constants (`0`, `1`, `-1`) never need reinit: the weight
/// table installs them at the same fixed index on every GC cycle.
#[derive(Clone, Copy, Default)]
pub struct GateConstants {
    sqrt_half: u32,
    neg_sqrt_half: u32,
    i: u32,
    neg_i: u32,
    phase_t: u32,
}

impl GateConstants {
    fn resolve(engine: &Engine) -> Self {
        let h = std::f64::consts::FRAC_1_SQRT_2;
        Self {
            sqrt_half: engine.lookup_weight(Complex::new(h, 0.0)),
            neg_sqrt_half: engine.lookup_weight(Complex::new(-h, 0.0)),
            i: engine.lookup_weight(Complex::new(0.0, 1.0)),
            neg_i: engine.lookup_weight(Complex::new(0.0, -1.0)),
            phase_t: engine.lookup_weight(Complex::new(h, h)),
        }
    }
}

/// Builds a fresh, `Arc`-shared constants cell and the `reinit_entries_hook`
/// closure that keeps it current. Call this before [`Engine::init`] so the
/// hook can be wired in at construction time; pass the returned cell to
/// [`GateSet::install`] once the engine exists.
pub fn new_constants_cell() -> (Arc<Mutex<GateConstants>>, ReinitHook) {
    let cell = Arc::new(Mutex::new(GateConstants::default()));
    let hook_cell = cell.clone();
    let hook: ReinitHook = Box::new(move |engine: &Engine| {
        *hook_cell.lock().unwrap() = GateConstants::resolve(engine);
    });
    (cell, hook)
}

/// A fixed set of single- and two-qubit gate diagrams, each registered as a
/// persistent GC root for the lifetime of the registry.
pub struct GateSet {
    pub h: Protected,
    pub x: Protected,
    pub y: Protected,
    pub z: Protected,
    pub s: Protected,
    pub t: Protected,
    pub sx: Protected,
    /// CNOT over an adjacent pair of qubits `(control=0, target=1)` in its
    /// own 4-variable space; [`embed_cnot_adjacent`] shifts it onto any
    /// adjacent pair within a larger circuit.
    pub cnot: Protected,
}

fn one_edge(engine: &Engine) -> Edge {
    engine.pack_edge(reserved::W_ONE, reserved::TERMINAL)
}

fn zero_edge(engine: &Engine) -> Edge {
    engine.pack_edge(reserved::W_ZERO, reserved::TERMINAL)
}

fn scaled(engine: &Engine, handle: u32) -> Edge {
    engine.pack_edge(handle, reserved::TERMINAL)
}

fn build_1q(engine: &Engine, m00: Edge, m01: Edge, m10: Edge, m11: Edge) -> Edge {
    // var1 selects the column within a row, var0 selects the row.
    let row0 = engine.makenode(1, m00, m01).unwrap();
    let row1 = engine.makenode(1, m10, m11).unwrap();
    engine.makenode(0, row0, row1).unwrap()
}

fn build_cnot_0_1(engine: &Engine) -> Edge {
    let one = one_edge(engine);
    let zero = zero_edge(engine);

    let id_col0 = engine.makenode(3, one, zero).unwrap();
    let id_col1 = engine.makenode(3, zero, one).unwrap();
    let id_block = engine.makenode(2, id_col0, id_col1).unwrap();

    let swap_col0 = engine.makenode(3, zero, one).unwrap();
    let swap_col1 = engine.makenode(3, one, zero).unwrap();
    let swap_block = engine.makenode(2, swap_col0, swap_col1).unwrap();

    let row0 = engine.makenode(1, id_block, zero).unwrap();
    let row1 = engine.makenode(1, zero, swap_block).unwrap();
    engine.makenode(0, row0, row1).unwrap()
}

impl GateSet {
    /// Resolves `constants` fresh (independent of whatever the hook has
    /// cached) and builds every gate from it.
    pub fn install(engine: &Engine, constants: &Arc<Mutex<GateConstants>>) -> Self {
        let c = GateConstants::resolve(engine);
        *constants.lock().unwrap() = c;

        let one = one_edge(engine);
        let zero = zero_edge(engine);

        let h = build_1q(
            engine,
            scaled(engine, c.sqrt_half),
            scaled(engine, c.sqrt_half),
            scaled(engine, c.sqrt_half),
            scaled(engine, c.neg_sqrt_half),
        );
        let x = build_1q(engine, zero, one, one, zero);
        let y = build_1q(engine, zero, scaled(engine, c.neg_i), scaled(engine, c.i), zero);
        let z = build_1q(engine, one, zero, zero, engine.pack_edge(reserved::W_MINUS_ONE, reserved::TERMINAL));
        let s = build_1q(engine, one, zero, zero, scaled(engine, c.i));
        let t = build_1q(engine, one, zero, zero, scaled(engine, c.phase_t));
        let sx = build_1q(
            engine,
            scaled(engine, c.sqrt_half),
            scaled(engine, c.neg_sqrt_half),
            scaled(engine, c.neg_sqrt_half),
            scaled(engine, c.sqrt_half),
        );
        let cnot = build_cnot_0_1(engine);

        Self {
            h: engine.protect(h),
            x: engine.protect(x),
            y: engine.protect(y),
            z: engine.protect(z),
            s: engine.protect(s),
            t: engine.protect(t),
            sx: engine.protect(sx),
            cnot: engine.protect(cnot),
        }
    }

    pub fn edge(&self, engine: &Engine, name: &str) -> Option<Edge> {
        let handle = match name {
            "H" => &self.h,
            "X" => &self.x,
            "Y" => &self.y,
            "Z" => &self.z,
            "S" => &self.s,
            "T" => &self.t,
            "SX" => &self.sx,
            _ => return None,
        };
        Some(engine.protected_value(handle))
    }
}

/// Builds the identity matrix diagram over `n` qubits, used to pad a
/// single- or two-qubit gate out to the full variable range of a larger
/// circuit before `matvec`.
///
/// Built qubit-by-qubit in increasing order: each new qubit's 2-variable
/// identity block is constructed fresh at local variables `{0, 1}` and
/// `tensor`ed onto the accumulator, which is what shifts it up to its real
/// position — `tensor(a, b, nvars_a)` shifts `b`, never `a`, so the
/// accumulator (already sitting at its final variable offset) must always
/// be the left operand.
pub fn identity_matrix(engine: &Engine, n: u16) -> Result<Edge, EvbddError> {
    let one = one_edge(engine);
    if n == 0 {
        return Ok(one);
    }
    let zero = zero_edge(engine);
    let mut acc: Option<Edge> = None;
    let mut width: u16 = 0;
    for _ in 0..n {
        let col0 = engine.makenode(1, one, zero)?;
        let col1 = engine.makenode(1, zero, one)?;
        let block = engine.makenode(0, col0, col1)?;
        acc = Some(match acc {
            None => block,
            Some(prev) => engine.tensor(prev, block, width)?,
        });
        width += 2;
    }
    Ok(acc.unwrap())
}

/// Embeds a single-qubit gate diagram (2 variables: row 0, col 1) onto
/// `qubit` within an `n`-qubit identity.
pub fn embed_1q(engine: &Engine, gate: Edge, qubit: u16, n: u16) -> Result<Edge, EvbddError> {
    let mid = if qubit == 0 {
        gate
    } else {
        let before = identity_matrix(engine, qubit)?;
        engine.tensor(before, gate, 2 * qubit)?
    };
    if qubit + 1 == n {
        Ok(mid)
    } else {
        let after = identity_matrix(engine, n - qubit - 1)?;
        engine.tensor(mid, after, 2 * (qubit + 1))
    }
}

/// Embeds the adjacent CNOT (control at `control`, target at `control + 1`)
/// onto an `n`-qubit identity.
pub fn embed_cnot_adjacent(engine: &Engine, cnot: Edge, control: u16, n: u16) -> Result<Edge, EvbddError> {
    let mid = if control == 0 {
        cnot
    } else {
        let before = identity_matrix(engine, control)?;
        engine.tensor(before, cnot, 2 * control)?
    };
    if control + 2 == n {
        Ok(mid)
    } else {
        let after = identity_matrix(engine, n - control - 2)?;
        engine.tensor(mid, after, 2 * (control + 2))
    }
}
