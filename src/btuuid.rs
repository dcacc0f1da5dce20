//! `Uuid` helpers for Bluetooth UUIDs

use uuid::Uuid;

use crate::error::ErrorKind;
use crate::{Error, Result};

/// This is the Bluetooth Base UUID. It is used with 16-bit and 32-bit UUIDs
/// [defined](https://www.bluetooth.com/specifications/assigned-numbers/) by the Bluetooth SIG.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Const function to create a 16-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Const function to create a 32-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u32(uuid: u32) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Parses a UUID string as it appears in the bridge protocol.
///
/// A 4-hex-digit or 8-hex-digit token is expanded to the 128-bit Bluetooth base form;
/// anything else must be a full UUID and is parsed verbatim, case-insensitively.
pub fn parse_uuid(s: &str) -> Result<Uuid> {
    match s.len() {
        4 => u16::from_str_radix(s, 16)
            .map(bluetooth_uuid_from_u16)
            .map_err(|e| malformed(s, e)),
        8 => u32::from_str_radix(s, 16)
            .map(bluetooth_uuid_from_u32)
            .map_err(|e| malformed(s, e)),
        _ => Uuid::parse_str(s).map_err(|e| malformed(s, e)),
    }
}

fn malformed(s: &str, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::new(
        ErrorKind::MalformedAddress,
        Some(Box::new(source)),
        format!("invalid UUID {s:?}"),
    )
}
