//! Canonical event vocabulary
//!
//! Every native callback shape maps to exactly one of these types, regardless of which
//! native stack produced it. The bridge delivers them on three streams: availability,
//! scan results, and a per-device multiplexed session stream.

use crate::addr::XAddr;
use crate::DeviceId;

/// Radio availability, as reported on the availability stream.
///
/// Discriminants are the stable wire values carried by the message transport.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AvailabilityState {
    /// The state of the radio is not known.
    Unknown = 0,
    /// The radio is resetting (powering up or down).
    Resetting = 1,
    /// The platform has no usable Bluetooth radio.
    Unsupported = 2,
    /// The application is not authorized to use the radio.
    Unauthorized = 3,
    /// The radio is powered off.
    PoweredOff = 4,
    /// The radio is powered on and usable.
    PoweredOn = 5,
}

impl From<AvailabilityState> for u8 {
    fn from(state: AvailabilityState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for AvailabilityState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AvailabilityState::Unknown),
            1 => Ok(AvailabilityState::Resetting),
            2 => Ok(AvailabilityState::Unsupported),
            3 => Ok(AvailabilityState::Unauthorized),
            4 => Ok(AvailabilityState::PoweredOff),
            5 => Ok(AvailabilityState::PoweredOn),
            _ => Err(value),
        }
    }
}

/// One advertisement received while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// The advertised local name, empty when the peripheral is nameless.
    pub name: String,
    /// Identifier of the advertising peripheral.
    pub device_id: DeviceId,
    /// Company identifier followed by the first manufacturer-specific data record,
    /// empty when the advertisement carries none.
    pub manufacturer_data_head: Vec<u8>,
    /// Received signal strength in dBm.
    pub rssi: i16,
}

/// Connection state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The connection has been established.
    Connected,
    /// The connection has ended; the session no longer exists.
    Disconnected,
}

/// Events delivered on the per-device session stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection state transition, solicited or not.
    Connection {
        /// The session's device identifier.
        device_id: DeviceId,
        /// The new connection state.
        state: ConnectionState,
    },
    /// One service found by service discovery, with its characteristic addresses.
    /// Discovery emits one of these per discovered service.
    ServiceDiscovered {
        /// The session's device identifier.
        device_id: DeviceId,
        /// Canonical address of the service.
        service: XAddr,
        /// Canonical addresses of the service's characteristics, in discovery order.
        characteristics: Vec<XAddr>,
    },
    /// A characteristic value, from a solicited read completion or an unsolicited
    /// notification/indication push.
    CharacteristicValue {
        /// The session's device identifier.
        device_id: DeviceId,
        /// Canonical address of the enclosing service.
        service: XAddr,
        /// Canonical address of the characteristic.
        characteristic: XAddr,
        /// The raw value bytes.
        value: Vec<u8>,
    },
    /// Completion of a write-with-response operation.
    WroteCharacteristicValue {
        /// The session's device identifier.
        device_id: DeviceId,
        /// Canonical address of the enclosing service.
        service: XAddr,
        /// Canonical address of the characteristic.
        characteristic: XAddr,
        /// The bytes the native stack echoed back for the write.
        value: Vec<u8>,
        /// Whether the peripheral acknowledged the write.
        success: bool,
    },
    /// Result of MTU negotiation: the negotiated size, or `-1` on failure.
    MtuConfig {
        /// The session's device identifier.
        device_id: DeviceId,
        /// Negotiated MTU in bytes, `-1` when negotiation failed.
        mtu: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_wire_values_round_trip() {
        for state in [
            AvailabilityState::Unknown,
            AvailabilityState::Resetting,
            AvailabilityState::Unsupported,
            AvailabilityState::Unauthorized,
            AvailabilityState::PoweredOff,
            AvailabilityState::PoweredOn,
        ] {
            assert_eq!(AvailabilityState::try_from(u8::from(state)), Ok(state));
        }
        assert_eq!(AvailabilityState::try_from(6), Err(6));
    }
}
