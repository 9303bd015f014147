//! Bluetooth-style UUID identifiers.
//!
//! Thin wrapper around [`uuid::Uuid`] that additionally understands the
//! 16-bit short form used throughout the GATT specification, expanding it
//! into the standard Bluetooth base UUID the way BlueZ reports it over
//! D-Bus. Ordering and equality are simply the wrapped byte value, same as
//! `uuid::Uuid`.

use std::{fmt, str::FromStr};

/// The Bluetooth SIG base UUID: `0000XXXX-0000-1000-8000-00805F9B34FB`.
const BASE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb,
]);

/// A 128-bit UUID, as carried on the `UUID`/`UUIDs` D-Bus properties.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid(uuid::Uuid);

impl Uuid {
    /// Expands a 16-bit short-form UUID into its canonical 128-bit form.
    pub fn from_u16(short: u16) -> Self {
        let mut bytes = *BASE.as_bytes();
        bytes[0] = (short >> 8) as u8;
        bytes[1] = short as u8;
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// The raw 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl FromStr for Uuid {
    type Err = crate::error::Error;

    /// Parses either a canonical dashed 128-bit UUID or a bare 4-hex-digit
    /// short form (`"ffe5"`), expanding the latter per [`Self::from_u16`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() <= 4 && !s.contains('-') {
            let short = u16::from_str_radix(s, 16).map_err(|_| {
                crate::error::Error::new(crate::error::ErrorKind::Internal(
                    crate::error::InternalErrorKind::InvalidUuid(s.to_string()),
                ))
            })?;
            return Ok(Self::from_u16(short));
        }
        uuid::Uuid::parse_str(s).map(Self).map_err(|_| {
            crate::error::Error::new(crate::error::ErrorKind::Internal(
                crate::error::InternalErrorKind::InvalidUuid(s.to_string()),
            ))
        })
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uuid({})", self.0)
    }
}

impl From<uuid::Uuid> for Uuid {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_expands_to_base() {
        let u = Uuid::from_u16(0xffe5);
        assert_eq!(u.to_string(), "0000ffe5-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn parse_then_print_short_form_expands() {
        let u: Uuid = "ffe5".parse().unwrap();
        assert_eq!(u, Uuid::from_u16(0xffe5));
    }

    #[test]
    fn parse_print_roundtrip_128_bit() {
        let s = "0000180f-0000-1000-8000-00805f9b34fb";
        let u: Uuid = s.parse().unwrap();
        assert_eq!(u.to_string(), s);
    }

    #[test]
    fn invalid_uuid_rejected() {
        assert!("not-a-uuid".parse::<Uuid>().is_err());
    }

    #[test]
    fn ordering_is_byte_value() {
        let a = Uuid::from_u16(0x0001);
        let b = Uuid::from_u16(0x0002);
        assert!(a < b);
    }
}
