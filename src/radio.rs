//! The native radio capability interface
//!
//! Each platform family (Android's `BluetoothGatt`, Apple's CoreBluetooth) speaks its own
//! callback vocabulary. A platform binding implements [`NativeRadio`] for the outbound
//! half and reshapes its stack's delegate/callback objects into [`NativeCallback`] values
//! pushed through a [`CallbackSink`] for the inbound half. The core never sees either
//! native vocabulary directly.

use async_trait::async_trait;
use tracing::trace;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::events::AvailabilityState;
use crate::{DeviceId, Error, Result};

/// Native-stack view of one discovered GATT attribute.
pub trait GattHandle {
    /// The attribute's UUID.
    fn uuid(&self) -> Uuid;

    /// Native instance identity, distinguishing duplicate UUIDs within one scope.
    ///
    /// Android exposes this directly as `instanceId`; bindings to stacks that only offer
    /// object identity assign their own stable number per discovered attribute.
    fn instance_id(&self) -> u32;
}

/// Subscription mode for characteristic value pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyMode {
    /// Unacknowledged value pushes.
    Notification,
    /// Acknowledged value pushes.
    Indication,
    /// Tear the subscription down.
    Disabled,
}

/// The radio operations the core requires of a platform binding.
///
/// Every operation is issue-only: it returns as soon as the native stack has accepted the
/// request, and the outcome arrives later as a [`NativeCallback`]. An error return means
/// the stack refused to queue the operation ([`OperationRejected`][ErrorKind::OperationRejected])
/// or failed it outright ([`NativeFailure`][ErrorKind::NativeFailure]).
#[async_trait]
pub trait NativeRadio: Send + Sync + 'static {
    /// Opaque native connection object. Exclusively owned by one device session and
    /// released when the session reaches its terminal state.
    type Connection: Send + Sync;
    /// Native service handle.
    type Service: GattHandle + Clone + Send + Sync;
    /// Native characteristic handle.
    type Characteristic: GattHandle + Clone + Send + Sync;

    /// Whether the radio is powered on and usable.
    async fn is_available(&self) -> bool;

    /// Starts scanning for advertisements, filtered to `services` unless empty.
    async fn start_scan(&self, services: &[Uuid]) -> Result<()>;

    /// Stops an in-progress scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Issues a native connect and returns the connection handle immediately. The
    /// outcome arrives as [`NativeCallback::Connected`] or [`NativeCallback::ConnectFailed`].
    async fn connect(&self, device: &DeviceId) -> Result<Self::Connection>;

    /// Issues a native disconnect. Completion arrives as [`NativeCallback::Disconnected`].
    async fn disconnect(&self, connection: &Self::Connection) -> Result<()>;

    /// Issues native service discovery. Completion arrives as
    /// [`NativeCallback::ServicesDiscovered`].
    async fn discover_services(&self, connection: &Self::Connection) -> Result<()>;

    /// The current native service list, in discovery order. Empty before discovery has
    /// completed.
    fn services(&self, connection: &Self::Connection) -> Vec<Self::Service>;

    /// The current characteristic list of `service`, in discovery order.
    fn characteristics(&self, connection: &Self::Connection, service: &Self::Service) -> Vec<Self::Characteristic>;

    /// Enables or disables value pushes for `characteristic`.
    async fn set_notify_state(
        &self,
        connection: &Self::Connection,
        characteristic: &Self::Characteristic,
        mode: NotifyMode,
    ) -> Result<()>;

    /// Issues a native read. Completion arrives as [`NativeCallback::CharacteristicValue`].
    async fn read(&self, connection: &Self::Connection, characteristic: &Self::Characteristic) -> Result<()>;

    /// Issues a native write. With `with_response` a completion arrives as
    /// [`NativeCallback::WriteCompleted`]; without, no completion is guaranteed.
    async fn write(
        &self,
        connection: &Self::Connection,
        characteristic: &Self::Characteristic,
        value: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Issues MTU negotiation. Completion arrives as [`NativeCallback::MtuChanged`].
    ///
    /// Stacks without a client-initiated MTU exchange keep this default, which rejects
    /// the command as unimplemented.
    async fn request_mtu(&self, connection: &Self::Connection, mtu: u16) -> Result<()> {
        let _ = (connection, mtu);
        Err(Error::new(
            ErrorKind::NotImplemented,
            None,
            "this radio does not support MTU negotiation".to_string(),
        ))
    }
}

/// Raw callbacks pushed by a platform binding.
///
/// This is the single ingestion vocabulary both native callback hierarchies are reshaped
/// into. Variants the canonical event set has no use for exist so bindings can forward
/// their stacks faithfully; the bridge consumes and drops them.
pub enum NativeCallback<R: NativeRadio> {
    /// The radio's availability changed.
    AvailabilityChanged(AvailabilityState),
    /// An advertisement was received while scanning.
    ScanResult {
        /// Identifier of the advertising peripheral.
        device_id: DeviceId,
        /// Advertised local name, empty when absent.
        name: String,
        /// Company identifier plus first manufacturer data record, empty when absent.
        manufacturer_data_head: Vec<u8>,
        /// Received signal strength in dBm.
        rssi: i16,
    },
    /// A solicited connect completed successfully.
    Connected {
        /// The peripheral's identifier.
        device_id: DeviceId,
    },
    /// A solicited connect failed.
    ConnectFailed {
        /// The peripheral's identifier.
        device_id: DeviceId,
    },
    /// The connection ended, solicited or not.
    Disconnected {
        /// The peripheral's identifier.
        device_id: DeviceId,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// The peripheral's identifier.
        device_id: DeviceId,
        /// Whether the native stack reported discovery success.
        success: bool,
    },
    /// A characteristic value arrived, from a read completion or an unsolicited
    /// notification/indication push.
    CharacteristicValue {
        /// The peripheral's identifier.
        device_id: DeviceId,
        /// Native handle of the characteristic the value belongs to.
        characteristic: R::Characteristic,
        /// The raw value bytes.
        value: Vec<u8>,
    },
    /// A write-with-response completed.
    WriteCompleted {
        /// The peripheral's identifier.
        device_id: DeviceId,
        /// Native handle of the written characteristic.
        characteristic: R::Characteristic,
        /// The bytes the stack echoed back for the write.
        value: Vec<u8>,
        /// Whether the peripheral acknowledged the write.
        success: bool,
    },
    /// MTU negotiation finished; `None` means it failed.
    MtuChanged {
        /// The peripheral's identifier.
        device_id: DeviceId,
        /// The negotiated MTU, absent on failure.
        mtu: Option<u16>,
    },
    /// Batch scan aggregation, delivered by some stacks. Dropped.
    BatchScanResults,
    /// Descriptor discovery progress. Dropped.
    DescriptorsDiscovered {
        /// The peripheral's identifier.
        device_id: DeviceId,
    },
    /// Notification-state-changed acknowledgment. Dropped.
    NotifyStateChanged {
        /// The peripheral's identifier.
        device_id: DeviceId,
        /// Whether the subscription change was applied.
        success: bool,
    },
}

impl<R: NativeRadio> std::fmt::Debug for NativeCallback<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AvailabilityChanged(state) => f.debug_tuple("AvailabilityChanged").field(state).finish(),
            Self::ScanResult { device_id, rssi, .. } => f
                .debug_struct("ScanResult")
                .field("device_id", device_id)
                .field("rssi", rssi)
                .finish(),
            Self::Connected { device_id } => f.debug_struct("Connected").field("device_id", device_id).finish(),
            Self::ConnectFailed { device_id } => f.debug_struct("ConnectFailed").field("device_id", device_id).finish(),
            Self::Disconnected { device_id } => f.debug_struct("Disconnected").field("device_id", device_id).finish(),
            Self::ServicesDiscovered { device_id, success } => f
                .debug_struct("ServicesDiscovered")
                .field("device_id", device_id)
                .field("success", success)
                .finish(),
            Self::CharacteristicValue { device_id, value, .. } => f
                .debug_struct("CharacteristicValue")
                .field("device_id", device_id)
                .field("len", &value.len())
                .finish(),
            Self::WriteCompleted {
                device_id, success, ..
            } => f
                .debug_struct("WriteCompleted")
                .field("device_id", device_id)
                .field("success", success)
                .finish(),
            Self::MtuChanged { device_id, mtu } => f
                .debug_struct("MtuChanged")
                .field("device_id", device_id)
                .field("mtu", mtu)
                .finish(),
            Self::BatchScanResults => write!(f, "BatchScanResults"),
            Self::DescriptorsDiscovered { device_id } => f
                .debug_struct("DescriptorsDiscovered")
                .field("device_id", device_id)
                .finish(),
            Self::NotifyStateChanged { device_id, success } => f
                .debug_struct("NotifyStateChanged")
                .field("device_id", device_id)
                .field("success", success)
                .finish(),
        }
    }
}

/// Handle a platform binding pushes native callbacks into.
///
/// Cloneable and usable from any thread or dispatch queue; pushing never blocks. The
/// bridge drains pushed callbacks on its own task, so native threads return immediately.
pub struct CallbackSink<R: NativeRadio> {
    tx: async_channel::Sender<NativeCallback<R>>,
}

impl<R: NativeRadio> CallbackSink<R> {
    pub(crate) fn new(tx: async_channel::Sender<NativeCallback<R>>) -> Self {
        CallbackSink { tx }
    }

    /// Pushes one native callback. Dropped silently if the bridge is gone.
    pub fn push(&self, callback: NativeCallback<R>) {
        if let Err(err) = self.tx.try_send(callback) {
            trace!("native callback dropped: {:?}", err.into_inner());
        }
    }
}

impl<R: NativeRadio> Clone for CallbackSink<R> {
    fn clone(&self) -> Self {
        CallbackSink { tx: self.tx.clone() }
    }
}
