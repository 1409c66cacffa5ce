//! Ring positions.
//!
//! Every virtual replica and every located key maps to a [`Token`]: a point on
//! a `u64` circle. Ordering is plain integer ordering; the circle closes by
//! wrapping from `u64::MAX` back to zero.

use std::fmt;

/// Position on the hash ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Token(pub u64);

impl Token {
    /// Minimum token value (start of ring).
    pub const MIN: Token = Token(0);
    /// Maximum token value (end of ring).
    pub const MAX: Token = Token(u64::MAX);

    /// Clockwise distance from `self` to `other` on the ring.
    ///
    /// `a.distance_to(a)` is zero; the distance from a token to one just
    /// before it is almost the whole ring.
    #[inline]
    pub fn distance_to(&self, other: &Self) -> u64 {
        other.0.wrapping_sub(self.0)
    }

    /// Raw value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Token {
    fn from(value: u64) -> Self {
        Token(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
