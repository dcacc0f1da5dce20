//! Per-device connection sessions

use tracing::{debug, warn};

use crate::addr::XAddr;
use crate::error::ErrorKind;
use crate::events::{ConnectionState, SessionEvent};
use crate::radio::{NativeRadio, NotifyMode};
use crate::topology::{self, Topology};
use crate::{DeviceId, Error, Result};

/// Where a session stands in its lifecycle. There is no terminal variant: reaching the
/// terminal state destroys the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    Connected,
    ServicesDiscovered,
}

/// One connected (or connecting) peripheral.
///
/// Owns the opaque native connection handle, the current topology snapshot, and the
/// advisory negotiated MTU. All mutation happens on the bridge's owner task; command
/// paths only issue native operations, and callback paths apply the resulting state
/// changes and produce canonical events.
pub(crate) struct Session<R: NativeRadio> {
    device_id: DeviceId,
    state: SessionState,
    connection: R::Connection,
    topology: Option<Topology>,
    mtu: Option<u16>,
}

impl<R: NativeRadio> Session<R> {
    pub fn new(device_id: DeviceId, connection: R::Connection) -> Self {
        Session {
            device_id,
            state: SessionState::Connecting,
            connection,
            topology: None,
            mtu: None,
        }
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    pub fn mtu(&self) -> Option<u16> {
        self.mtu
    }

    pub async fn disconnect(&self, radio: &R) -> Result<()> {
        radio.disconnect(&self.connection).await
    }

    pub async fn discover_services(&self, radio: &R) -> Result<()> {
        if self.state == SessionState::Connecting {
            return Err(Error::new(
                ErrorKind::OperationRejected,
                None,
                format!("{} is not connected yet", self.device_id),
            ));
        }
        radio.discover_services(&self.connection).await
    }

    pub async fn set_notifiable(
        &self,
        radio: &R,
        service: &XAddr,
        characteristic: &XAddr,
        mode: NotifyMode,
    ) -> Result<()> {
        let characteristic = self.resolve(radio, service, characteristic)?;
        radio.set_notify_state(&self.connection, &characteristic, mode).await
    }

    pub async fn read_value(&self, radio: &R, service: &XAddr, characteristic: &XAddr) -> Result<()> {
        let characteristic = self.resolve(radio, service, characteristic)?;
        radio.read(&self.connection, &characteristic).await
    }

    pub async fn write_value(
        &self,
        radio: &R,
        service: &XAddr,
        characteristic: &XAddr,
        value: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let characteristic = self.resolve(radio, service, characteristic)?;
        radio
            .write(&self.connection, &characteristic, value, with_response)
            .await
    }

    pub async fn request_mtu(&self, radio: &R, mtu: u16) -> Result<()> {
        radio.request_mtu(&self.connection, mtu).await
    }

    /// Resolves a canonical characteristic address against the current native attribute
    /// lists. Re-walks the lists on every call; the indices must reflect the order the
    /// native stack reports *now*, not the order at snapshot time.
    fn resolve(&self, radio: &R, service: &XAddr, characteristic: &XAddr) -> Result<R::Characteristic> {
        let services = radio.services(&self.connection);
        let service_handle = topology::resolve(&services, service)
            .ok_or_else(|| unknown_address("service", service, &self.device_id))?;
        let characteristics = radio.characteristics(&self.connection, service_handle);
        topology::resolve(&characteristics, characteristic)
            .cloned()
            .ok_or_else(|| unknown_address("characteristic", characteristic, &self.device_id))
    }

    pub fn on_connected(&mut self) -> SessionEvent {
        debug!("{} connected", self.device_id);
        self.state = SessionState::Connected;
        SessionEvent::Connection {
            device_id: self.device_id.clone(),
            state: ConnectionState::Connected,
        }
    }

    /// Rebuilds the topology snapshot from the native tree and reports every service.
    /// The previous snapshot is replaced, never merged.
    pub fn on_services_discovered(&mut self, radio: &R) -> Vec<SessionEvent> {
        let tree: Vec<_> = radio
            .services(&self.connection)
            .into_iter()
            .map(|service| {
                let characteristics = radio.characteristics(&self.connection, &service);
                (service, characteristics)
            })
            .collect();
        let snapshot = topology::index_services(&tree);
        self.state = SessionState::ServicesDiscovered;
        let events = snapshot
            .services
            .iter()
            .map(|record| SessionEvent::ServiceDiscovered {
                device_id: self.device_id.clone(),
                service: record.address,
                characteristics: record.characteristics.clone(),
            })
            .collect();
        self.topology = Some(snapshot);
        events
    }

    pub fn on_characteristic_value(
        &self,
        radio: &R,
        characteristic: &R::Characteristic,
        value: Vec<u8>,
    ) -> Option<SessionEvent> {
        let (service, characteristic) = self.reverse(radio, characteristic)?;
        Some(SessionEvent::CharacteristicValue {
            device_id: self.device_id.clone(),
            service,
            characteristic,
            value,
        })
    }

    pub fn on_write_completed(
        &self,
        radio: &R,
        characteristic: &R::Characteristic,
        value: Vec<u8>,
        success: bool,
    ) -> Option<SessionEvent> {
        let (service, characteristic) = self.reverse(radio, characteristic)?;
        Some(SessionEvent::WroteCharacteristicValue {
            device_id: self.device_id.clone(),
            service,
            characteristic,
            value,
            success,
        })
    }

    pub fn on_mtu_changed(&mut self, mtu: Option<u16>) -> SessionEvent {
        if let Some(mtu) = mtu {
            self.mtu = Some(mtu);
        }
        SessionEvent::MtuConfig {
            device_id: self.device_id.clone(),
            mtu: mtu.map_or(-1, i32::from),
        }
    }

    /// The terminal transition: consumes the session, releasing the native connection
    /// handle exactly once. Both user-initiated disconnects and stack-initiated losses
    /// end up here.
    pub fn disconnected(self) -> SessionEvent {
        debug!("{} disconnected", self.device_id);
        SessionEvent::Connection {
            device_id: self.device_id,
            state: ConnectionState::Disconnected,
        }
    }

    /// Translates an inbound native characteristic handle back to canonical addresses.
    fn reverse(&self, radio: &R, needle: &R::Characteristic) -> Option<(XAddr, XAddr)> {
        let services = radio.services(&self.connection);
        let found = topology::reverse_characteristic(
            &services,
            |service| radio.characteristics(&self.connection, service),
            needle,
        );
        if found.is_none() {
            warn!("{}: callback for a characteristic not in the current tree", self.device_id);
        }
        found
    }
}

fn unknown_address(scope: &str, addr: &XAddr, device_id: &DeviceId) -> Error {
    Error::new(
        ErrorKind::UnknownAddress,
        None,
        format!("unknown {scope} {addr} on {device_id}"),
    )
}
