//! The bridge: command surface, callback pump, and event streams

use async_lock::Mutex;
use futures_core::Stream;
use tracing::{debug, trace};

use crate::addr::XAddr;
use crate::btuuid;
use crate::error::ErrorKind;
use crate::events::{AvailabilityState, ScanResult, SessionEvent};
use crate::radio::{CallbackSink, NativeCallback, NativeRadio, NotifyMode};
use crate::registry::Registry;
use crate::session::Session;
use crate::topology::Topology;
use crate::{DeviceId, Result};

const EVENT_STREAM_CAPACITY: usize = 64;

/// One application command, as carried by a message transport.
///
/// Transports that speak the bridge protocol decode requests into this and pass them to
/// [`Bridge::handle`]. Code living in-process can skip the detour and call the typed
/// methods on [`Bridge`] directly.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Query radio availability.
    IsBluetoothAvailable,
    /// Start scanning, filtered to `service_uuids` unless empty.
    StartScan {
        /// Service UUID filters; short forms allowed.
        service_uuids: Vec<String>,
    },
    /// Stop scanning.
    StopScan,
    /// Open a session to a peripheral.
    Connect {
        /// The peripheral to connect to.
        device_id: DeviceId,
    },
    /// Close a peripheral's session.
    Disconnect {
        /// The peripheral to disconnect from.
        device_id: DeviceId,
    },
    /// Discover the peripheral's GATT tree.
    DiscoverServices {
        /// The peripheral to run discovery on.
        device_id: DeviceId,
    },
    /// Change a characteristic's subscription mode.
    SetNotifiable {
        /// The peripheral the characteristic belongs to.
        device_id: DeviceId,
        /// Canonical service address.
        service: String,
        /// Canonical characteristic address.
        characteristic: String,
        /// The subscription mode to apply.
        mode: NotifyMode,
    },
    /// Read a characteristic value.
    ReadValue {
        /// The peripheral the characteristic belongs to.
        device_id: DeviceId,
        /// Canonical service address.
        service: String,
        /// Canonical characteristic address.
        characteristic: String,
    },
    /// Write a characteristic value.
    WriteValue {
        /// The peripheral the characteristic belongs to.
        device_id: DeviceId,
        /// Canonical service address.
        service: String,
        /// Canonical characteristic address.
        characteristic: String,
        /// The bytes to write.
        value: Vec<u8>,
        /// Whether to request a peripheral acknowledgment.
        with_response: bool,
    },
    /// Negotiate the connection MTU.
    RequestMtu {
        /// The peripheral to negotiate with.
        device_id: DeviceId,
        /// The requested MTU in bytes.
        mtu: u16,
    },
}

/// Reply to a successfully handled [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Plain acknowledgment.
    None,
    /// Boolean answer, for [`Command::IsBluetoothAvailable`].
    Bool(bool),
}

/// The cross-platform bridge core.
///
/// Owns the native radio, the session registry, and the three outbound event streams.
/// Commands may be issued from any task; all session state mutation happens either under
/// the registry lock or on the single task driving [`run`][Bridge::run], so no two
/// callbacks ever touch the same session concurrently and event order within a stream
/// matches the order state changes were applied.
pub struct Bridge<R: NativeRadio> {
    radio: R,
    registry: Mutex<Registry<R>>,
    callbacks: async_channel::Receiver<NativeCallback<R>>,
    sink: CallbackSink<R>,
    availability: EventStream<AvailabilityState>,
    scans: EventStream<ScanResult>,
    sessions: EventStream<SessionEvent>,
}

impl<R: NativeRadio> Bridge<R> {
    /// Creates a bridge over `radio`. Hand [`callback_sink`][Bridge::callback_sink] to
    /// the platform binding and drive [`run`][Bridge::run] on one task.
    pub fn new(radio: R) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Bridge {
            radio,
            registry: Mutex::new(Registry::new()),
            callbacks: rx,
            sink: CallbackSink::new(tx),
            availability: EventStream::new(EVENT_STREAM_CAPACITY),
            scans: EventStream::new(EVENT_STREAM_CAPACITY),
            sessions: EventStream::new(EVENT_STREAM_CAPACITY),
        }
    }

    /// The sink the platform binding pushes native callbacks into.
    pub fn callback_sink(&self) -> CallbackSink<R> {
        self.sink.clone()
    }

    /// Subscribes to radio availability changes.
    pub fn availability_changes(&self) -> impl Stream<Item = AvailabilityState> + Send + Unpin {
        self.availability.subscribe()
    }

    /// Subscribes to scan results.
    pub fn scan_results(&self) -> impl Stream<Item = ScanResult> + Send + Unpin {
        self.scans.subscribe()
    }

    /// Subscribes to the multiplexed per-device session event stream.
    pub fn session_events(&self) -> impl Stream<Item = SessionEvent> + Send + Unpin {
        self.sessions.subscribe()
    }

    /// Drains native callbacks for the life of the bridge. Run it on a dedicated task.
    ///
    /// This task owns all callback-driven state mutation: callbacks are applied strictly
    /// in arrival order, one at a time, so no two ever touch a session concurrently.
    pub async fn run(&self) {
        while let Ok(callback) = self.callbacks.recv().await {
            self.dispatch(callback).await;
        }
    }

    /// Routes one transport-decoded command.
    pub async fn handle(&self, command: Command) -> Result<Reply> {
        match command {
            Command::IsBluetoothAvailable => return Ok(Reply::Bool(self.is_bluetooth_available().await)),
            Command::StartScan { service_uuids } => self.start_scan(&service_uuids).await?,
            Command::StopScan => self.stop_scan().await?,
            Command::Connect { device_id } => self.connect(&device_id).await?,
            Command::Disconnect { device_id } => self.disconnect(&device_id).await?,
            Command::DiscoverServices { device_id } => self.discover_services(&device_id).await?,
            Command::SetNotifiable {
                device_id,
                service,
                characteristic,
                mode,
            } => self.set_notifiable(&device_id, &service, &characteristic, mode).await?,
            Command::ReadValue {
                device_id,
                service,
                characteristic,
            } => self.read_value(&device_id, &service, &characteristic).await?,
            Command::WriteValue {
                device_id,
                service,
                characteristic,
                value,
                with_response,
            } => {
                self.write_value(&device_id, &service, &characteristic, &value, with_response)
                    .await?
            }
            Command::RequestMtu { device_id, mtu } => self.request_mtu(&device_id, mtu).await?,
            // `Command` is non-exhaustive; requests added by newer protocol revisions
            // answer NotImplemented until they are routed here.
            #[allow(unreachable_patterns)]
            _ => return Err(ErrorKind::NotImplemented.into()),
        }
        Ok(Reply::None)
    }

    /// Whether the radio is powered on and usable.
    pub async fn is_bluetooth_available(&self) -> bool {
        self.radio.is_available().await
    }

    /// Starts scanning. `service_uuids` filters advertisements unless empty; short-form
    /// UUIDs are expanded before they reach the radio.
    pub async fn start_scan(&self, service_uuids: &[String]) -> Result<()> {
        let filters = service_uuids
            .iter()
            .map(|s| btuuid::parse_uuid(s))
            .collect::<Result<Vec<_>>>()?;
        self.radio.start_scan(&filters).await
    }

    /// Stops an in-progress scan.
    pub async fn stop_scan(&self) -> Result<()> {
        self.radio.stop_scan().await
    }

    /// Opens a session to `device_id` and issues the native connect.
    ///
    /// A no-op success when a session already exists for the identifier, whatever state
    /// it is in; no second native connect is issued.
    pub async fn connect(&self, device_id: &DeviceId) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if registry.contains(device_id) {
            debug!("connect: session for {device_id} already exists");
            return Ok(());
        }
        let connection = self.radio.connect(device_id).await?;
        registry.insert(device_id.clone(), Session::new(device_id.clone(), connection));
        Ok(())
    }

    /// Issues a native disconnect for `device_id`'s session.
    ///
    /// The session stays registered until the native disconnect callback arrives; that
    /// callback is the single cleanup path shared with unsolicited losses. Disconnecting
    /// an identifier with no session is an [`UnknownDevice`][ErrorKind::UnknownDevice]
    /// error, since the caller may have raced a stack-initiated disconnect.
    pub async fn disconnect(&self, device_id: &DeviceId) -> Result<()> {
        let registry = self.registry.lock().await;
        registry.lookup(device_id)?.disconnect(&self.radio).await
    }

    /// Issues native service discovery for `device_id`'s session.
    pub async fn discover_services(&self, device_id: &DeviceId) -> Result<()> {
        let registry = self.registry.lock().await;
        registry.lookup(device_id)?.discover_services(&self.radio).await
    }

    /// Applies a subscription mode to a characteristic.
    pub async fn set_notifiable(
        &self,
        device_id: &DeviceId,
        service: &str,
        characteristic: &str,
        mode: NotifyMode,
    ) -> Result<()> {
        let (service, characteristic) = ensure_pair(service, characteristic)?;
        let registry = self.registry.lock().await;
        registry
            .lookup(device_id)?
            .set_notifiable(&self.radio, &service, &characteristic, mode)
            .await
    }

    /// Issues a characteristic read. The value arrives as
    /// [`SessionEvent::CharacteristicValue`].
    pub async fn read_value(&self, device_id: &DeviceId, service: &str, characteristic: &str) -> Result<()> {
        let (service, characteristic) = ensure_pair(service, characteristic)?;
        let registry = self.registry.lock().await;
        registry
            .lookup(device_id)?
            .read_value(&self.radio, &service, &characteristic)
            .await
    }

    /// Issues a characteristic write.
    ///
    /// With `with_response`, completion arrives as
    /// [`SessionEvent::WroteCharacteristicValue`]. Without, success of this call is the
    /// only acknowledgment; nothing waits on a completion that may never come.
    pub async fn write_value(
        &self,
        device_id: &DeviceId,
        service: &str,
        characteristic: &str,
        value: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let (service, characteristic) = ensure_pair(service, characteristic)?;
        let registry = self.registry.lock().await;
        registry
            .lookup(device_id)?
            .write_value(&self.radio, &service, &characteristic, value, with_response)
            .await
    }

    /// Issues MTU negotiation. The outcome arrives as [`SessionEvent::MtuConfig`].
    pub async fn request_mtu(&self, device_id: &DeviceId, mtu: u16) -> Result<()> {
        let registry = self.registry.lock().await;
        registry.lookup(device_id)?.request_mtu(&self.radio, mtu).await
    }

    /// The current topology snapshot of `device_id`'s session, absent until discovery
    /// has completed.
    pub async fn topology(&self, device_id: &DeviceId) -> Result<Option<Topology>> {
        let registry = self.registry.lock().await;
        Ok(registry.lookup(device_id)?.topology().cloned())
    }

    /// The negotiated MTU of `device_id`'s session, absent until negotiation has
    /// succeeded. Advisory only; the session does not enforce it.
    pub async fn negotiated_mtu(&self, device_id: &DeviceId) -> Result<Option<u16>> {
        let registry = self.registry.lock().await;
        Ok(registry.lookup(device_id)?.mtu())
    }

    async fn dispatch(&self, callback: NativeCallback<R>) {
        trace!("native callback: {callback:?}");
        match callback {
            NativeCallback::AvailabilityChanged(state) => self.availability.publish(state),
            NativeCallback::ScanResult {
                device_id,
                name,
                manufacturer_data_head,
                rssi,
            } => self.scans.publish(ScanResult {
                name,
                device_id,
                manufacturer_data_head,
                rssi,
            }),
            NativeCallback::Connected { device_id } => {
                let mut registry = self.registry.lock().await;
                match registry.get_mut(&device_id) {
                    Some(session) => {
                        let event = session.on_connected();
                        self.sessions.publish(event);
                    }
                    None => trace!("connect callback for unknown device {device_id} dropped"),
                }
            }
            NativeCallback::ConnectFailed { device_id } | NativeCallback::Disconnected { device_id } => {
                self.teardown(&device_id).await;
            }
            NativeCallback::ServicesDiscovered { device_id, success } => {
                if !success {
                    debug!("service discovery failed on {device_id}");
                    return;
                }
                let mut registry = self.registry.lock().await;
                match registry.get_mut(&device_id) {
                    Some(session) => {
                        for event in session.on_services_discovered(&self.radio) {
                            self.sessions.publish(event);
                        }
                    }
                    None => trace!("discovery callback for unknown device {device_id} dropped"),
                }
            }
            NativeCallback::CharacteristicValue {
                device_id,
                characteristic,
                value,
            } => {
                let registry = self.registry.lock().await;
                match registry.get(&device_id) {
                    Some(session) => {
                        if let Some(event) = session.on_characteristic_value(&self.radio, &characteristic, value) {
                            self.sessions.publish(event);
                        }
                    }
                    None => trace!("value callback for unknown device {device_id} dropped"),
                }
            }
            NativeCallback::WriteCompleted {
                device_id,
                characteristic,
                value,
                success,
            } => {
                let registry = self.registry.lock().await;
                match registry.get(&device_id) {
                    Some(session) => {
                        if let Some(event) =
                            session.on_write_completed(&self.radio, &characteristic, value, success)
                        {
                            self.sessions.publish(event);
                        }
                    }
                    None => trace!("write callback for unknown device {device_id} dropped"),
                }
            }
            NativeCallback::MtuChanged { device_id, mtu } => {
                let mut registry = self.registry.lock().await;
                match registry.get_mut(&device_id) {
                    Some(session) => {
                        let event = session.on_mtu_changed(mtu);
                        self.sessions.publish(event);
                    }
                    None => trace!("MTU callback for unknown device {device_id} dropped"),
                }
            }
            NativeCallback::BatchScanResults
            | NativeCallback::DescriptorsDiscovered { .. }
            | NativeCallback::NotifyStateChanged { .. } => {
                trace!("ignored native callback");
            }
        }
    }

    /// The single cleanup path: removes the session, releases its native connection
    /// handle, and reports the terminal transition. Both solicited disconnects and
    /// unsolicited losses land here; a missing session means a stale callback, dropped
    /// without an event.
    async fn teardown(&self, device_id: &DeviceId) {
        let session = self.registry.lock().await.remove(device_id);
        match session {
            Some(session) => {
                let event = session.disconnected();
                self.sessions.publish(event);
            }
            None => trace!("disconnect callback for unknown device {device_id} dropped"),
        }
    }
}

/// Normalizes both halves of a service/characteristic address pair before any lookup.
fn ensure_pair(service: &str, characteristic: &str) -> Result<(XAddr, XAddr)> {
    Ok((XAddr::ensure(service)?, XAddr::ensure(characteristic)?))
}

/// Broadcast fan-out with explicit subscription: the sender and a kept inactive receiver
/// live on the bridge, so publishing with no subscribers drops the event instead of
/// failing, and late subscribers simply miss earlier events.
struct EventStream<T> {
    sender: async_broadcast::Sender<T>,
    _keep_open: async_broadcast::InactiveReceiver<T>,
}

impl<T: Clone> EventStream<T> {
    fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity);
        sender.set_overflow(true);
        EventStream {
            sender,
            _keep_open: receiver.deactivate(),
        }
    }

    fn subscribe(&self) -> async_broadcast::Receiver<T> {
        self.sender.new_receiver()
    }

    fn publish(&self, event: T) {
        let _ = self.sender.try_broadcast(event);
    }
}
