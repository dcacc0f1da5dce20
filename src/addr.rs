//! Canonical GATT addressing
//!
//! Native stacks expose duplicate service and characteristic UUIDs as plain lists with no
//! stable indexing. The bridge addresses an attribute by its UUID plus the number of prior
//! occurrences of the same UUID within the enclosing scope, in discovery order. [`XAddr`] is
//! that pair; its canonical string form is `<lowercase-uuid>:<index>`.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::btuuid;
use crate::error::ErrorKind;
use crate::{Error, Result};

/// Canonical address of a service or characteristic within its enclosing scope.
///
/// The index disambiguates duplicate UUIDs: the n-th occurrence of a UUID within one
/// discovery snapshot (services within a device, characteristics within a service) has
/// index `n - 1`. Within one scope the `(uuid, index)` pair is unique and stable for the
/// lifetime of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XAddr {
    uuid: Uuid,
    index: u32,
}

impl XAddr {
    /// Creates an address from an already-canonical UUID and a duplicate index.
    pub const fn new(uuid: Uuid, index: u32) -> Self {
        XAddr { uuid, index }
    }

    /// Normalizes a raw address received from the application.
    ///
    /// An address without an explicit `:<index>` gets index `0`, and a 16- or 32-bit
    /// short-form UUID segment is expanded to the 128-bit Bluetooth base form. Every
    /// address must pass through here before any lookup or comparison, so that equality
    /// never depends on short-vs-long UUID spelling or on letter case.
    pub fn ensure(raw: &str) -> Result<Self> {
        if raw.contains(':') {
            raw.parse()
        } else {
            format!("{raw}:0").parse()
        }
    }

    /// The full 128-bit UUID.
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The duplicate index within the enclosing scope.
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for XAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uuid, self.index)
    }
}

impl FromStr for XAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (uuid, index) = s.split_once(':').ok_or_else(|| {
            Error::new(
                ErrorKind::MalformedAddress,
                None,
                format!("missing ':' separator in {s:?}"),
            )
        })?;
        let uuid = btuuid::parse_uuid(uuid)?;
        let index = index.parse::<u32>().map_err(|e| {
            Error::new(
                ErrorKind::MalformedAddress,
                Some(Box::new(e)),
                format!("invalid duplicate index in {s:?}"),
            )
        })?;
        Ok(XAddr { uuid, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btuuid::bluetooth_uuid_from_u16;

    #[test]
    fn display_and_parse_round_trip() {
        let addr = XAddr::new(bluetooth_uuid_from_u16(0x2a37), 2);
        assert_eq!(addr.to_string(), "00002a37-0000-1000-8000-00805f9b34fb:2");
        assert_eq!(addr.to_string().parse::<XAddr>().unwrap(), addr);
    }

    #[test]
    fn ensure_defaults_the_index_and_expands_short_uuids() {
        let addr = XAddr::ensure("180d").unwrap();
        assert_eq!(addr, XAddr::new(bluetooth_uuid_from_u16(0x180d), 0));
        assert_eq!(XAddr::ensure("180D:1").unwrap().index(), 1);
        assert_eq!(
            XAddr::ensure("180d:1").unwrap(),
            XAddr::ensure("0000180d-0000-1000-8000-00805F9B34FB:1").unwrap()
        );
    }

    #[test]
    fn ensure_is_idempotent() {
        for raw in ["180d", "180d:3", "00002a37-0000-1000-8000-00805f9b34fb:1"] {
            let once = XAddr::ensure(raw).unwrap();
            assert_eq!(XAddr::ensure(&once.to_string()).unwrap(), once);
        }
    }

    #[test]
    fn indices_distinguish_duplicates() {
        let uuid = bluetooth_uuid_from_u16(0x2a37);
        assert_ne!(XAddr::new(uuid, 0), XAddr::new(uuid, 1));
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert_eq!(
            "2a37".parse::<XAddr>().unwrap_err().kind(),
            ErrorKind::MalformedAddress
        );
        assert_eq!(
            XAddr::ensure("2a37:-1").unwrap_err().kind(),
            ErrorKind::MalformedAddress
        );
        assert_eq!(
            XAddr::ensure("2a37:x").unwrap_err().kind(),
            ErrorKind::MalformedAddress
        );
    }
}
