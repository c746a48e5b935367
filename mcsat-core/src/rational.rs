//! Exact rational arithmetic.
//!
//! Bound derivation by Fourier–Motzkin combination is only sound with
//! exact arithmetic, so every arithmetic value in the solver is an
//! arbitrary-precision rational.

use num_bigint::BigInt;
use num_rational::BigRational;

/// Exact rational number used for all arithmetic values.
pub type Rational = BigRational;

/// Rational from an integer.
#[must_use]
pub fn rational(value: i64) -> Rational {
    Rational::from_integer(BigInt::from(value))
}

/// Rational from a numerator/denominator pair. The denominator must be
/// nonzero.
#[must_use]
pub fn ratio(numer: i64, denom: i64) -> Rational {
    Rational::new(BigInt::from(numer), BigInt::from(denom))
}
