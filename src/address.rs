//! Node addressing
//
// Short (2 byte) addresses are the common case, long (8 byte) addresses
// identify nodes that have not been assigned a short address.

use core::fmt;

pub const SHORT_ADDR_LEN: usize = 2;
pub const LONG_ADDR_LEN: usize = 8;

/// Node address, compared by type first and then by value
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Address {
    Short(u16),
    Long([u8; LONG_ADDR_LEN]),
}

impl Address {
    /// Received by all single-hop neighbours
    pub const BROADCAST: Address = Address::Short(0xffff);
    /// Rewritten by the network stack to the actual root address
    pub const ROOT: Address = Address::Short(0x0000);
    pub const UNSPECIFIED: Address = Address::Short(0x0000);
    pub const BASESTATION: Address = Address::Short(0x0001);

    /// Broadcast addresses are short addresses with the top bit set
    pub fn is_broadcast(&self) -> bool {
        match self {
            Address::Short(s) => s & 0x8000 != 0,
            Address::Long(_) => false,
        }
    }

    /// The zero short address is unspecified
    pub fn is_unspecified(&self) -> bool {
        matches!(self, Address::Short(0))
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Address::Long(_))
    }

    pub fn short(&self) -> Option<u16> {
        match self {
            Address::Short(s) => Some(*s),
            Address::Long(_) => None,
        }
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Address::Short(_) => SHORT_ADDR_LEN,
            Address::Long(_) => LONG_ADDR_LEN,
        }
    }

    /// Return `self` unless unspecified, in which case `other`
    pub fn or(self, other: Address) -> Address {
        if self.is_unspecified() {
            other
        } else {
            self
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::UNSPECIFIED
    }
}

impl From<u16> for Address {
    fn from(a: u16) -> Self {
        Address::Short(a)
    }
}

impl From<[u8; LONG_ADDR_LEN]> for Address {
    fn from(a: [u8; LONG_ADDR_LEN]) -> Self {
        Address::Long(a)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Short(s) => write!(f, "{:04x}", s),
            Address::Long(l) => {
                for (i, b) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classify_short_addresses() {
        let a = Address::from(0x8000);
        assert!(a.is_broadcast());
        assert!(!a.is_unspecified());

        assert!(Address::BROADCAST.is_broadcast());

        let z = Address::from(0);
        assert!(z.is_unspecified());
        assert!(!z.is_broadcast());

        for v in &[0x0001u16, 0x1234, 0x7fff] {
            let a = Address::from(*v);
            assert!(!a.is_broadcast());
            assert!(!a.is_unspecified());
        }
    }

    #[test]
    fn long_addresses_never_special() {
        let zero = Address::Long([0u8; 8]);
        assert!(!zero.is_unspecified());
        assert!(!zero.is_broadcast());

        let ones = Address::Long([0xff; 8]);
        assert!(!ones.is_broadcast());
    }

    #[test]
    fn equality_compares_type_then_value() {
        assert_eq!(Address::from(5), Address::Short(5));
        assert_ne!(Address::from(5), Address::from(6));

        let mut l = [0u8; 8];
        l[7] = 5;
        assert_ne!(Address::Long(l), Address::Short(5));
        assert_eq!(Address::Long(l), Address::from(l));
    }

    #[test]
    fn unspecified_fallback() {
        assert_eq!(Address::UNSPECIFIED.or(Address::from(7)), Address::from(7));
        assert_eq!(Address::from(3).or(Address::from(7)), Address::from(3));
    }
}
