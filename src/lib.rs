#![warn(missing_docs)]

//! Bluebridge is the platform-independent core of a cross-platform [Bluetooth Low Energy]
//! (BLE) bridge: it lets a high-level application drive BLE peripherals through a single
//! uniform addressing and messaging model while the actual radio work is done by a
//! platform binding (Android's `BluetoothGatt` callbacks, Apple's CoreBluetooth
//! delegates).
//!
//! The hard part is not talking to Bluetooth — it is reconciling the platforms' differing
//! notions of GATT topology into one canonical identifier scheme, and running a correct
//! per-device session state machine on top of event-driven native APIs that offer no
//! ordering or backpressure guarantees of their own. Bluebridge solves both once, so the
//! per-platform bindings stay thin:
//!
//! - **Canonical addressing**: an [`XAddr`] names a service or characteristic by UUID
//!   plus a duplicate index assigned in discovery order, so attributes with duplicated
//!   UUIDs stay addressable. Short-form 16/32-bit UUIDs expand to the Bluetooth base form
//!   before any comparison.
//! - **Device sessions**: one session per connected peripheral, moving through
//!   connect → discover → notify/read/write → disconnect, with solicited and unsolicited
//!   disconnects sharing a single cleanup path.
//! - **One event vocabulary**: both native callback hierarchies are normalized into the
//!   [`SessionEvent`]/[`ScanResult`]/[`AvailabilityState`] stream types.
//!
//! A platform binding implements [`NativeRadio`] and forwards its stack's callbacks into
//! the bridge's [`CallbackSink`]; everything else is portable.
//!
//! [Bluetooth Low Energy]: https://www.bluetooth.com/specifications/specs/
//!
//! # Usage
//!
//! ```rust,no_run
//!# use bluebridge::{Bridge, ConnectionState, DeviceId, NativeRadio, NotifyMode, SessionEvent};
//!# use futures_lite::StreamExt;
//!# async fn drive<R: NativeRadio>(bridge: &Bridge<R>) -> bluebridge::Result<()> {
//!let heart_rate_monitor = DeviceId::new("F7:17:E4:09:C0:C9");
//!let mut events = bridge.session_events();
//!bridge.connect(&heart_rate_monitor).await?;
//!while let Some(event) = events.next().await {
//!    match event {
//!        SessionEvent::Connection { state: ConnectionState::Connected, .. } => {
//!            bridge.discover_services(&heart_rate_monitor).await?;
//!        }
//!        SessionEvent::ServiceDiscovered { service, characteristics, .. } => {
//!            for characteristic in &characteristics {
//!                bridge
//!                    .set_notifiable(
//!                        &heart_rate_monitor,
//!                        &service.to_string(),
//!                        &characteristic.to_string(),
//!                        NotifyMode::Notification,
//!                    )
//!                    .await?;
//!            }
//!        }
//!        SessionEvent::CharacteristicValue { characteristic, value, .. } => {
//!            println!("{characteristic}: {value:?}");
//!        }
//!        _ => {}
//!    }
//!}
//!#
//!#    Ok(())
//!# }
//! ```
//!
//! # Concurrency model
//!
//! All session and registry mutation is serialized: native callbacks are marshaled from
//! whatever thread or queue the native stack uses onto the single task driving
//! [`Bridge::run`], and command handling takes the same registry lock. No bridge
//! operation blocks waiting for the radio — every native call is fire-and-forget, and
//! its outcome re-enters through the callback sink. The only cancellation primitive is
//! `disconnect`: callbacks arriving for a device after its session ended are dropped.
//!
//! # Feature flags
//!
//! The `serde` feature is available to enable serializing/deserializing device
//! identifiers.

pub mod btuuid;
pub mod error;

mod addr;
mod bridge;
mod events;
mod radio;
mod registry;
mod session;
mod topology;

pub use addr::XAddr;
pub use bridge::{Bridge, Command, Reply};
pub use error::Error;
pub use events::{AvailabilityState, ConnectionState, ScanResult, SessionEvent};
pub use radio::{CallbackSink, GattHandle, NativeCallback, NativeRadio, NotifyMode};
pub use topology::{ServiceRecord, Topology};
pub use uuid::Uuid;

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Identifies one physical peripheral.
///
/// Holds whatever the platform addresses devices by — a Bluetooth address in the
/// `AB:CD:EF:01:23:45` format on Android, a peripheral identifier UUID on Apple
/// platforms. The bridge treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier from its platform-native string form.
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    /// The platform-native string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        DeviceId(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId(id.to_string())
    }
}
