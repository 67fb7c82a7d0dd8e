//! Location identifiers.
//!
//! A location identifier is an opaque byte string of length 2 or
//! more, assigned by the data compiler.  It selects which variant of
//! the records at an owner name a client sees.  Identifiers are
//! compared byte-for-byte; there is no ordering between them.

use std::fmt;

/// Shortest permitted identifier.
pub const LOCATION_ID_MIN_LEN: usize = 2;

/// Longest identifier a frame can carry (the length is stored in one
/// octet).
pub const LOCATION_ID_MAX_LEN: usize = 255;

/// An opaque location identifier.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct LocationId(Vec<u8>);

impl LocationId {
    /// The reserved "no location" identifier, `\x00\x00`.
    pub fn empty() -> Self {
        LocationId(vec![0x00, 0x00])
    }

    /// The reserved per-zone default identifier, `\x00\x01`.
    pub fn zone_default() -> Self {
        LocationId(vec![0x00, 0x01])
    }

    /// The reserved process-wide fallback default, `\x00\x02`.
    pub fn fallback_default() -> Self {
        LocationId(vec![0x00, 0x02])
    }

    /// # Errors
    ///
    /// If the identifier is shorter than 2 or longer than 255 octets.
    pub fn new(octets: &[u8]) -> Result<Self, LocationIdError> {
        if octets.len() < LOCATION_ID_MIN_LEN {
            Err(LocationIdError::TooShort)
        } else if octets.len() > LOCATION_ID_MAX_LEN {
            Err(LocationIdError::TooLong)
        } else {
            Ok(LocationId(octets.to_vec()))
        }
    }

    pub fn octets(&self) -> &[u8] {
        &self.0
    }

    /// Long (3 octets or more) identifiers denote compiled map
    /// buckets.
    pub fn is_map_bucket(&self) -> bool {
        self.0.len() > 2
    }
}

impl fmt::Debug for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocationId(")?;
        for octet in &self.0 {
            write!(f, "{octet:02x}")?;
        }
        write!(f, ")")
    }
}

/// Errors that can arise constructing a `LocationId`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LocationIdError {
    TooShort,
    TooLong,
}

impl fmt::Display for LocationIdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LocationIdError::TooShort => write!(f, "location identifier shorter than 2 octets"),
            LocationIdError::TooLong => write!(f, "location identifier longer than 255 octets"),
        }
    }
}

impl std::error::Error for LocationIdError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_identifiers_are_byte_exact() {
        assert_eq!(&[0x00, 0x00], LocationId::empty().octets());
        assert_eq!(&[0x00, 0x01], LocationId::zone_default().octets());
        assert_eq!(&[0x00, 0x02], LocationId::fallback_default().octets());
    }

    #[test]
    fn length_bounds() {
        assert_eq!(Err(LocationIdError::TooShort), LocationId::new(&[1]));
        assert!(LocationId::new(&[1, 2]).is_ok());
        assert!(LocationId::new(&[1, 2, 3]).unwrap().is_map_bucket());
        assert!(!LocationId::new(&[1, 2]).unwrap().is_map_bucket());
        assert_eq!(
            Err(LocationIdError::TooLong),
            LocationId::new(&[0; 256])
        );
    }
}
