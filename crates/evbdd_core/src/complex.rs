//! Complex-valued edge weight arithmetic.
//!
//! Every amplitude in the engine is a pair of IEEE-754 doubles. This module
//! is the only place that touches the raw `(re, im)` representation;
//! everything above it (the weight table, normalization, the diagram
//! algebra) operates on interned handles instead.

use core::ops::{Add, Div, Mul, Neg, Sub};

/// Default tolerance used to decide when two weights intern to the same
/// handle (see [`crate::weight_table::WeightTable`]).
pub const DEFAULT_TOLERANCE: f64 = 1e-14;

/// An unboxed double-precision complex number.
///
/// Deliberately `Copy` and free of any handle/table knowledge: this is the
/// value the weight table stores and interns, never something the diagram
/// algebra passes around directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const ZERO: Complex = Complex { re: 0.0, im: 0.0 };
    pub const ONE: Complex = Complex { re: 1.0, im: 0.0 };
    pub const MINUS_ONE: Complex = Complex { re: -1.0, im: 0.0 };

    #[inline(always)]
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    #[inline(always)]
    pub const fn real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }

    /// Squared magnitude, cheaper than [`Complex::abs`] when only relative
    /// comparisons are needed.
    #[inline(always)]
    pub fn sqr(self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    /// Magnitude `|z|`, always a non-negative real.
    #[inline(always)]
    pub fn abs(self) -> f64 {
        self.sqr().sqrt()
    }

    #[inline(always)]
    pub fn conj(self) -> Complex {
        Complex::new(self.re, -self.im)
    }

    #[inline(always)]
    pub fn neg(self) -> Complex {
        Complex::new(-self.re, -self.im)
    }

    #[inline(always)]
    pub fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }

    #[inline(always)]
    pub fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }

    #[inline(always)]
    pub fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }

    /// Division by zero is a precondition violation at the caller: the
    /// normalization strategies (§4.5) never invoke this with a zero
    /// divisor, and no other engine code divides weights.
    #[inline(always)]
    pub fn div(self, rhs: Complex) -> Complex {
        let denom = rhs.re * rhs.re + rhs.im * rhs.im;
        debug_assert!(denom != 0.0, "division by zero weight");
        let inv = Complex::new(rhs.re / denom, -rhs.im / denom);
        self.mul(inv)
    }

    /// Scales by a non-negative real factor `1/r`.
    #[inline(always)]
    pub fn scale(self, factor: f64) -> Complex {
        Complex::new(self.re * factor, self.im * factor)
    }

    /// Bitwise equality of the two components — the notion `makenode`'s
    /// reduction rule relies on after both sides have gone through the
    /// same weight-table handle (handles compare equal iff the underlying
    /// bits do).
    #[inline(always)]
    pub fn exact_eq(self, rhs: Complex) -> bool {
        self.re.to_bits() == rhs.re.to_bits() && self.im.to_bits() == rhs.im.to_bits()
    }

    /// Tolerance-equality used by the weight table's interning lookup.
    #[inline(always)]
    pub fn approx_eq(self, rhs: Complex, eps: f64) -> bool {
        (self.re - rhs.re).abs() < eps && (self.im - rhs.im).abs() < eps
    }

    /// True if `|a| > |b|`, comparing squared magnitudes to avoid an extra
    /// `sqrt`.
    #[inline(always)]
    pub fn greater_mag(a: Complex, b: Complex) -> bool {
        a.sqr() > b.sqr()
    }
}

impl Add for Complex {
    type Output = Complex;
    fn add(self, rhs: Complex) -> Complex {
        Complex::add(self, rhs)
    }
}

impl Sub for Complex {
    type Output = Complex;
    fn sub(self, rhs: Complex) -> Complex {
        Complex::sub(self, rhs)
    }
}

impl Mul for Complex {
    type Output = Complex;
    fn mul(self, rhs: Complex) -> Complex {
        Complex::mul(self, rhs)
    }
}

impl Div for Complex {
    type Output = Complex;
    fn div(self, rhs: Complex) -> Complex {
        Complex::div(self, rhs)
    }
}

impl Neg for Complex {
    type Output = Complex;
    fn neg(self) -> Complex {
        Complex::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_roundtrip() {
        let a = Complex::new(0.7071067811865476, 0.0);
        let b = Complex::new(0.0, 1.0);
        let c = a * b;
        let back = c / b;
        assert!(back.approx_eq(a, 1e-12));
    }

    #[test]
    fn abs_of_unit_is_one() {
        let z = Complex::new(0.6, 0.8);
        assert!((z.abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn conj_negates_imaginary_part_only() {
        let z = Complex::new(3.0, -4.0);
        let c = z.conj();
        assert_eq!(c.re, 3.0);
        assert_eq!(c.im, 4.0);
    }

    #[test]
    fn exact_eq_is_bitwise_not_tolerant() {
        let a = Complex::new(1.0, 0.0);
        let b = Complex::new(1.0 + f64::EPSILON, 0.0);
        assert!(!a.exact_eq(b));
        assert!(a.approx_eq(b, 1e-10));
    }
}
