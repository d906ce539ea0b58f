//! Fixed-point asset amounts with 8 decimal places.
//!
//! All native asset values (balances, fees, generated gas) are carried as a
//! signed 64-bit count of 10^-8 units, mirroring the precision of the
//! governing and utility tokens.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of raw units per whole token.
const UNIT: i64 = 100_000_000;

/// A signed fixed-point amount with 8 decimal places.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed8(i64);

impl Fixed8 {
    /// The zero amount.
    pub const ZERO: Fixed8 = Fixed8(0);

    /// One whole token.
    pub const ONE: Fixed8 = Fixed8(UNIT);

    /// Creates an amount from a whole number of tokens.
    pub const fn from_int(value: i64) -> Fixed8 {
        Fixed8(value * UNIT)
    }

    /// Creates an amount from raw 10^-8 units.
    pub const fn from_raw(raw: i64) -> Fixed8 {
        Fixed8(raw)
    }

    /// Returns the raw 10^-8 unit count.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Returns the whole-token part, truncating decimals toward zero.
    pub const fn whole(self) -> i64 {
        self.0 / UNIT
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition; `None` on overflow.
    pub fn checked_add(self, other: Fixed8) -> Option<Fixed8> {
        self.0.checked_add(other.0).map(Fixed8)
    }

    /// Checked subtraction; `None` on overflow.
    pub fn checked_sub(self, other: Fixed8) -> Option<Fixed8> {
        self.0.checked_sub(other.0).map(Fixed8)
    }

    /// Checked multiplication by a plain integer; `None` on overflow.
    pub fn checked_mul_int(self, factor: i64) -> Option<Fixed8> {
        self.0.checked_mul(factor).map(Fixed8)
    }
}

impl Add for Fixed8 {
    type Output = Fixed8;
    fn add(self, other: Fixed8) -> Fixed8 {
        Fixed8(self.0 + other.0)
    }
}

impl AddAssign for Fixed8 {
    fn add_assign(&mut self, other: Fixed8) {
        self.0 += other.0;
    }
}

impl Sub for Fixed8 {
    type Output = Fixed8;
    fn sub(self, other: Fixed8) -> Fixed8 {
        Fixed8(self.0 - other.0)
    }
}

impl SubAssign for Fixed8 {
    fn sub_assign(&mut self, other: Fixed8) {
        self.0 -= other.0;
    }
}

impl Neg for Fixed8 {
    type Output = Fixed8;
    fn neg(self) -> Fixed8 {
        Fixed8(-self.0)
    }
}

impl Sum for Fixed8 {
    fn sum<I: Iterator<Item = Fixed8>>(iter: I) -> Fixed8 {
        iter.fold(Fixed8::ZERO, |acc, v| acc + v)
    }
}

impl fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / UNIT as u64;
        let frac = abs % UNIT as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let frac = format!("{:08}", frac);
            write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl Encode for Fixed8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
    }
}

impl Decode for Fixed8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Fixed8(i64::decode(input)?))
    }
}
