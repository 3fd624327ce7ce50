//! Normalization policies (C5).
//!
//! Each strategy takes the two not-yet-canonical child weights of a
//! soon-to-be-built node and rewrites them in place so that one of the
//! canonical constraints of §3 holds, returning the common factor that is
//! pulled out onto the node's incoming edge. All four are total and
//! idempotent: re-normalizing an already-canonical pair is a no-op that
//! returns `W_ONE`.

use crate::complex::Complex;
use evbdd_common::NormStrategy;

/// Result of normalizing a child-weight pair: the two weights as they
/// should be stored on the node, and the common factor to push onto the
/// node's incoming edge.
pub struct Normalized {
    pub low: Complex,
    pub high: Complex,
    pub common: Complex,
}

/// Normalizes `(low, high)` under `strategy`.
///
/// `low`/`high` are the full child weights *after* `a`'s/`b`'s own root
/// weight has already been folded in by the caller (`makenode` receives
/// already-multiplied-through edges); this function only ever divides, it
/// never has to multiply by an outer factor.
pub fn normalize(strategy: NormStrategy, low: Complex, high: Complex) -> Normalized {
    match strategy {
        NormStrategy::Low => normalize_low(low, high),
        NormStrategy::Max => normalize_max(low, high),
        NormStrategy::Min => normalize_min(low, high),
        NormStrategy::L2 => normalize_l2(low, high),
    }
}

fn normalize_low(low: Complex, high: Complex) -> Normalized {
    if low.exact_eq(Complex::ZERO) {
        // Nothing to divide by; the common factor is whatever is on the
        // high edge, and low stays at zero.
        Normalized {
            low: Complex::ZERO,
            high: Complex::ONE,
            common: high,
        }
    } else {
        Normalized {
            low: Complex::ONE,
            high: high.div(low),
            common: low,
        }
    }
}

fn normalize_max(low: Complex, high: Complex) -> Normalized {
    if low.exact_eq(high) {
        return Normalized {
            low: Complex::ONE,
            high: Complex::ONE,
            common: low,
        };
    }
    if Complex::greater_mag(high, low) {
        Normalized {
            low: low.div(high),
            high: Complex::ONE,
            common: high,
        }
    } else {
        Normalized {
            low: Complex::ONE,
            high: high.div(low),
            common: low,
        }
    }
}

/// Deterministic tie-break for the ε-close case: divide by `low`. Without
/// this, floating-point jitter in which of `|low|`/`|high|` compares larger
/// would let the same function build two differently-shaped (but
/// equivalent) nodes, breaking the unique-table's uniqueness invariant
/// (§3 invariant 5). See DESIGN.md for the open question this resolves.
fn normalize_min(low: Complex, high: Complex) -> Normalized {
    if low.exact_eq(Complex::ZERO) {
        return Normalized {
            low: Complex::ZERO,
            high: Complex::ONE,
            common: high,
        };
    }
    if high.exact_eq(Complex::ZERO) {
        return Normalized {
            low: Complex::ONE,
            high: Complex::ZERO,
            common: low,
        };
    }
    let tol = 1e-14;
    let close = (low.abs() - high.abs()).abs() < tol;
    let divide_by_low = close || !Complex::greater_mag(high, low);
    if divide_by_low {
        Normalized {
            low: Complex::ONE,
            high: high.div(low),
            common: low,
        }
    } else {
        Normalized {
            low: low.div(high),
            high: Complex::ONE,
            common: high,
        }
    }
}

fn normalize_l2(low: Complex, high: Complex) -> Normalized {
    let norm = (low.sqr() + high.sqr()).sqrt();
    if norm == 0.0 {
        return Normalized {
            low: Complex::ZERO,
            high: Complex::ZERO,
            common: Complex::ZERO,
        };
    }
    let low_n = low.scale(1.0 / norm);
    let high_n = high.scale(1.0 / norm);

    // Rotate by the inverse phase of `low_n` so it becomes real
    // non-negative; the same rotation is applied to `high_n`, and its
    // inverse is folded into the outgoing common factor.
    let phase_mag = low_n.abs();
    let (low_real, high_rot, phase_inv) = if phase_mag == 0.0 {
        // low is already (numerically) zero; high itself must be real
        // non-negative after the rotation, so rotate by high's own phase.
        let hm = high_n.abs();
        if hm == 0.0 {
            (low_n, high_n, Complex::ONE)
        } else {
            let phase = Complex::new(high_n.re / hm, high_n.im / hm);
            let phase_inv = phase.conj();
            (low_n.mul(phase_inv), high_n.mul(phase_inv), phase)
        }
    } else {
        let phase = Complex::new(low_n.re / phase_mag, low_n.im / phase_mag);
        let phase_inv = phase.conj();
        (low_n.mul(phase_inv), high_n.mul(phase_inv), phase)
    };

    Normalized {
        low: Complex::real(low_real.re.max(0.0).min(1.0)),
        high: high_rot,
        common: Complex::new(norm, 0.0).mul(phase_inv),
    }
}

/// Reconstructs the low child weight under the L2 strategy from the stored
/// high weight, using `|low|^2 + |high|^2 = 1` and `low` real non-negative.
pub fn low_from_high_l2(high: Complex) -> Complex {
    let sq = 1.0 - high.sqr();
    Complex::real(sq.max(0.0).sqrt())
}
