//! Capability bit sets carried on edges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// A fixed-width set of capability bits, written most significant first,
/// e.g. `"10110"`.
///
/// [`combine`](Permissions::combine) is bitwise OR: associative, commutative,
/// idempotent, with [`NONE`](Permissions::NONE) as identity. Aggregation over
/// any number of paths is therefore order-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions(u8);

impl Permissions {
    /// Number of capability bits.
    pub const WIDTH: usize = 5;

    const MASK: u8 = (1 << Self::WIDTH) - 1;

    pub const NONE: Permissions = Permissions(0);
    pub const ALL: Permissions = Permissions(Self::MASK);

    /// Build from raw bits; bits above [`WIDTH`](Self::WIDTH) are dropped.
    pub fn from_bits(bits: u8) -> Self {
        Permissions(bits & Self::MASK)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn combine(self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$b}", self.0, width = Self::WIDTH)
    }
}

impl FromStr for Permissions {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GraphError::InvalidPermissions { raw: s.to_string() };
        if s.len() != Self::WIDTH {
            return Err(invalid());
        }
        let mut bits = 0u8;
        for c in s.chars() {
            bits <<= 1;
            match c {
                '0' => {}
                '1' => bits |= 1,
                _ => return Err(invalid()),
            }
        }
        Ok(Permissions(bits))
    }
}

impl TryFrom<String> for Permissions {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permissions> for String {
    fn from(p: Permissions) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Permissions {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(p("10110").bits(), 0b10110);
        assert_eq!(p("00001").to_string(), "00001");
        assert_eq!(Permissions::NONE.to_string(), "00000");
        assert_eq!(Permissions::ALL.to_string(), "11111");
    }

    #[test]
    fn malformed_rejected() {
        for raw in ["", "1011", "101101", "10a10"] {
            assert!(raw.parse::<Permissions>().is_err(), "{raw:?}");
        }
    }

    #[test]
    fn combine_is_order_independent() {
        let (a, b, c) = (p("10000"), p("01010"), p("00011"));
        assert_eq!(a.combine(b), b.combine(a));
        assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
        assert_eq!(a.combine(Permissions::NONE), a);
        assert_eq!(a.combine(a), a);
        assert_eq!(a.combine(b).combine(c), p("11011"));
    }

    #[test]
    fn from_bits_masks_high_bits() {
        assert_eq!(Permissions::from_bits(0xFF), Permissions::ALL);
    }
}
