//! Behavioral tests for the bridge core, driven through a scripted mock radio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluebridge::error::ErrorKind;
use bluebridge::{
    btuuid, AvailabilityState, Bridge, CallbackSink, Command, ConnectionState, DeviceId, GattHandle, NativeCallback,
    NativeRadio, NotifyMode, Reply, ScanResult, SessionEvent, Uuid, XAddr,
};
use futures_lite::{Stream, StreamExt};
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
struct MockCharacteristic {
    uuid: Uuid,
    instance: u32,
}

impl GattHandle for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn instance_id(&self) -> u32 {
        self.instance
    }
}

#[derive(Debug, Clone)]
struct MockService {
    uuid: Uuid,
    instance: u32,
    characteristics: Vec<MockCharacteristic>,
}

impl GattHandle for MockService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn instance_id(&self) -> u32 {
        self.instance
    }
}

#[derive(Default)]
struct MockState {
    available: AtomicBool,
    tree: Mutex<Vec<MockService>>,
    issued: Mutex<Vec<String>>,
}

impl MockState {
    fn record(&self, op: String) {
        self.issued.lock().unwrap().push(op);
    }

    fn issued_count(&self, prefix: &str) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    fn issued_contains(&self, needle: &str) -> bool {
        self.issued.lock().unwrap().iter().any(|op| op.contains(needle))
    }
}

/// Records every accepted operation and serves a configurable attribute tree; completions
/// are pushed by the tests through the callback sink, like a real stack's callbacks.
#[derive(Clone, Default)]
struct MockRadio {
    state: Arc<MockState>,
}

struct MockConnection;

#[async_trait]
impl NativeRadio for MockRadio {
    type Connection = MockConnection;
    type Service = MockService;
    type Characteristic = MockCharacteristic;

    async fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Relaxed)
    }

    async fn start_scan(&self, services: &[Uuid]) -> bluebridge::Result<()> {
        self.state.record(format!("start-scan {services:?}"));
        Ok(())
    }

    async fn stop_scan(&self) -> bluebridge::Result<()> {
        self.state.record("stop-scan".to_string());
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> bluebridge::Result<Self::Connection> {
        self.state.record(format!("connect {device}"));
        Ok(MockConnection)
    }

    async fn disconnect(&self, _connection: &Self::Connection) -> bluebridge::Result<()> {
        self.state.record("disconnect".to_string());
        Ok(())
    }

    async fn discover_services(&self, _connection: &Self::Connection) -> bluebridge::Result<()> {
        self.state.record("discover".to_string());
        Ok(())
    }

    fn services(&self, _connection: &Self::Connection) -> Vec<Self::Service> {
        self.state.tree.lock().unwrap().clone()
    }

    fn characteristics(&self, _connection: &Self::Connection, service: &Self::Service) -> Vec<Self::Characteristic> {
        service.characteristics.clone()
    }

    async fn set_notify_state(
        &self,
        _connection: &Self::Connection,
        characteristic: &Self::Characteristic,
        mode: NotifyMode,
    ) -> bluebridge::Result<()> {
        self.state
            .record(format!("notify {mode:?} instance={}", characteristic.instance));
        Ok(())
    }

    async fn read(
        &self,
        _connection: &Self::Connection,
        characteristic: &Self::Characteristic,
    ) -> bluebridge::Result<()> {
        self.state.record(format!("read instance={}", characteristic.instance));
        Ok(())
    }

    async fn write(
        &self,
        _connection: &Self::Connection,
        characteristic: &Self::Characteristic,
        value: &[u8],
        with_response: bool,
    ) -> bluebridge::Result<()> {
        self.state.record(format!(
            "write instance={} value={value:?} with_response={with_response}",
            characteristic.instance
        ));
        Ok(())
    }

    async fn request_mtu(&self, _connection: &Self::Connection, mtu: u16) -> bluebridge::Result<()> {
        self.state.record(format!("request-mtu {mtu}"));
        Ok(())
    }
}

struct Harness {
    bridge: Arc<Bridge<MockRadio>>,
    sink: CallbackSink<MockRadio>,
    state: Arc<MockState>,
}

fn start() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let radio = MockRadio::default();
    let state = radio.state.clone();
    let bridge = Arc::new(Bridge::new(radio));
    let sink = bridge.callback_sink();
    tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.run().await }
    });
    Harness { bridge, sink, state }
}

fn heart_rate_tree() -> Vec<MockService> {
    // one 180D service holding a duplicated 2A37 characteristic
    vec![MockService {
        uuid: btuuid::bluetooth_uuid_from_u16(0x180d),
        instance: 1,
        characteristics: vec![
            MockCharacteristic {
                uuid: btuuid::bluetooth_uuid_from_u16(0x2a37),
                instance: 10,
            },
            MockCharacteristic {
                uuid: btuuid::bluetooth_uuid_from_u16(0x2a37),
                instance: 11,
            },
        ],
    }]
}

fn second_measurement() -> MockCharacteristic {
    MockCharacteristic {
        uuid: btuuid::bluetooth_uuid_from_u16(0x2a37),
        instance: 11,
    }
}

async fn next_event<T>(events: &mut (impl Stream<Item = T> + Unpin)) -> T {
    timeout(Duration::from_secs(1), events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

async fn assert_quiet<T: std::fmt::Debug>(events: &mut (impl Stream<Item = T> + Unpin)) {
    if let Ok(event) = timeout(Duration::from_millis(50), events.next()).await {
        panic!("expected no event, got {event:?}");
    }
}

/// Connects `device` and waits for the connected transition.
async fn connect(harness: &Harness, device: &DeviceId, events: &mut (impl Stream<Item = SessionEvent> + Unpin)) {
    harness.bridge.connect(device).await.unwrap();
    harness.sink.push(NativeCallback::Connected {
        device_id: device.clone(),
    });
    assert_eq!(
        next_event(events).await,
        SessionEvent::Connection {
            device_id: device.clone(),
            state: ConnectionState::Connected,
        }
    );
}

/// Runs discovery and returns the emitted service events.
async fn discover(
    harness: &Harness,
    device: &DeviceId,
    events: &mut (impl Stream<Item = SessionEvent> + Unpin),
) -> SessionEvent {
    harness.bridge.discover_services(device).await.unwrap();
    harness.sink.push(NativeCallback::ServicesDiscovered {
        device_id: device.clone(),
        success: true,
    });
    next_event(events).await
}

#[tokio::test]
async fn availability_and_scan_streams() {
    let harness = start();
    let mut availability = harness.bridge.availability_changes();
    let mut scans = harness.bridge.scan_results();

    assert!(!harness.bridge.is_bluetooth_available().await);
    harness.state.available.store(true, Ordering::Relaxed);
    assert!(harness.bridge.is_bluetooth_available().await);

    harness
        .sink
        .push(NativeCallback::AvailabilityChanged(AvailabilityState::PoweredOn));
    assert_eq!(next_event(&mut availability).await, AvailabilityState::PoweredOn);

    // short-form scan filters expand before reaching the radio
    harness.bridge.start_scan(&["180d".to_string()]).await.unwrap();
    assert!(harness
        .state
        .issued_contains("0000180d-0000-1000-8000-00805f9b34fb"));
    let err = harness.bridge.start_scan(&["nope".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedAddress);

    harness.sink.push(NativeCallback::ScanResult {
        device_id: DeviceId::new("11:22:33:44:55:66"),
        name: "Polar H10".to_string(),
        manufacturer_data_head: vec![0x6b, 0x00, 0x01],
        rssi: -62,
    });
    assert_eq!(
        next_event(&mut scans).await,
        ScanResult {
            name: "Polar H10".to_string(),
            device_id: DeviceId::new("11:22:33:44:55:66"),
            manufacturer_data_head: vec![0x6b, 0x00, 0x01],
            rssi: -62,
        }
    );

    // batch aggregation is consumed without producing anything
    harness.sink.push(NativeCallback::BatchScanResults);
    harness
        .sink
        .push(NativeCallback::AvailabilityChanged(AvailabilityState::PoweredOff));
    assert_eq!(next_event(&mut availability).await, AvailabilityState::PoweredOff);
    assert_quiet(&mut scans).await;

    harness.bridge.stop_scan().await.unwrap();
    assert_eq!(harness.state.issued_count("stop-scan"), 1);
}

#[tokio::test]
async fn connect_is_idempotent_per_device() {
    let harness = start();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    harness.bridge.connect(&device).await.unwrap();
    harness.bridge.connect(&device).await.unwrap();
    assert_eq!(harness.state.issued_count("connect"), 1);

    harness.sink.push(NativeCallback::Connected {
        device_id: device.clone(),
    });
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connection {
            state: ConnectionState::Connected,
            ..
        }
    ));

    // still a no-op success once fully connected
    harness.bridge.connect(&device).await.unwrap();
    assert_eq!(harness.state.issued_count("connect"), 1);
}

#[tokio::test]
async fn discovery_reports_duplicate_characteristics_in_order() {
    let harness = start();
    *harness.state.tree.lock().unwrap() = heart_rate_tree();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    let event = discover(&harness, &device, &mut events).await;
    assert_eq!(
        event,
        SessionEvent::ServiceDiscovered {
            device_id: device.clone(),
            service: XAddr::ensure("180d").unwrap(),
            characteristics: vec![XAddr::ensure("2a37:0").unwrap(), XAddr::ensure("2a37:1").unwrap()],
        }
    );

    let snapshot = harness.bridge.topology(&device).await.unwrap().unwrap();
    assert_eq!(snapshot.services.len(), 1);
    assert_eq!(snapshot.services[0].characteristics.len(), 2);
}

#[tokio::test]
async fn discovery_requires_an_established_connection() {
    let harness = start();
    let device = DeviceId::new("D1");

    harness.bridge.connect(&device).await.unwrap();
    let err = harness.bridge.discover_services(&device).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationRejected);

    let err = harness
        .bridge
        .discover_services(&DeviceId::new("nobody"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownDevice);
}

#[tokio::test]
async fn failed_discovery_is_dropped_silently() {
    let harness = start();
    *harness.state.tree.lock().unwrap() = heart_rate_tree();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    harness.sink.push(NativeCallback::ServicesDiscovered {
        device_id: device.clone(),
        success: false,
    });
    assert_quiet(&mut events).await;
    assert_eq!(harness.bridge.topology(&device).await.unwrap(), None);
}

#[tokio::test]
async fn notifications_route_to_the_addressed_duplicate() {
    let harness = start();
    *harness.state.tree.lock().unwrap() = heart_rate_tree();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    discover(&harness, &device, &mut events).await;

    // subscribing to 2a37:1 must land on the second native instance
    harness
        .bridge
        .set_notifiable(&device, "180d:0", "2a37:1", NotifyMode::Notification)
        .await
        .unwrap();
    assert!(harness.state.issued_contains("notify Notification instance=11"));

    harness.sink.push(NativeCallback::CharacteristicValue {
        device_id: device.clone(),
        characteristic: second_measurement(),
        value: vec![0x16, 0x48],
    });
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::CharacteristicValue {
            device_id: device.clone(),
            service: XAddr::ensure("180d").unwrap(),
            characteristic: XAddr::ensure("2a37:1").unwrap(),
            value: vec![0x16, 0x48],
        }
    );

    let err = harness
        .bridge
        .set_notifiable(&device, "180d", "2a38", NotifyMode::Indication)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownAddress);

    let err = harness
        .bridge
        .set_notifiable(&DeviceId::new("nobody"), "180d", "2a37", NotifyMode::Disabled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownDevice);
}

#[tokio::test]
async fn reads_and_writes_complete_through_events() {
    let harness = start();
    *harness.state.tree.lock().unwrap() = heart_rate_tree();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    discover(&harness, &device, &mut events).await;

    harness.bridge.read_value(&device, "180d", "2a37").await.unwrap();
    assert!(harness.state.issued_contains("read instance=10"));

    harness
        .bridge
        .write_value(&device, "180d", "2a37:1", &[0x01, 0x02], true)
        .await
        .unwrap();
    harness.sink.push(NativeCallback::WriteCompleted {
        device_id: device.clone(),
        characteristic: second_measurement(),
        value: vec![0x01, 0x02],
        success: true,
    });
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::WroteCharacteristicValue {
            device_id: device.clone(),
            service: XAddr::ensure("180d").unwrap(),
            characteristic: XAddr::ensure("2a37:1").unwrap(),
            value: vec![0x01, 0x02],
            success: true,
        }
    );
}

#[tokio::test]
async fn write_without_response_returns_without_a_completion() {
    let harness = start();
    *harness.state.tree.lock().unwrap() = heart_rate_tree();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    discover(&harness, &device, &mut events).await;

    harness
        .bridge
        .write_value(&device, "180d", "2a37", &[0xff], false)
        .await
        .unwrap();
    assert!(harness.state.issued_contains("with_response=false"));
    assert_quiet(&mut events).await;
}

#[tokio::test]
async fn mtu_negotiation_reports_size_or_failure() {
    let harness = start();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    harness.bridge.request_mtu(&device, 200).await.unwrap();
    assert!(harness.state.issued_contains("request-mtu 200"));

    harness.sink.push(NativeCallback::MtuChanged {
        device_id: device.clone(),
        mtu: Some(185),
    });
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::MtuConfig {
            device_id: device.clone(),
            mtu: 185,
        }
    );
    assert_eq!(harness.bridge.negotiated_mtu(&device).await.unwrap(), Some(185));

    harness.sink.push(NativeCallback::MtuChanged {
        device_id: device.clone(),
        mtu: None,
    });
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::MtuConfig {
            device_id: device.clone(),
            mtu: -1,
        }
    );
    // a failed renegotiation leaves the advisory value alone
    assert_eq!(harness.bridge.negotiated_mtu(&device).await.unwrap(), Some(185));
}

#[tokio::test]
async fn disconnect_tears_down_once_and_drops_stale_callbacks() {
    let harness = start();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    harness.bridge.disconnect(&device).await.unwrap();
    assert_eq!(harness.state.issued_count("disconnect"), 1);
    // the session survives until the native disconnect callback lands
    assert!(harness.bridge.topology(&device).await.is_ok());

    harness.sink.push(NativeCallback::Disconnected {
        device_id: device.clone(),
    });
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Connection {
            device_id: device.clone(),
            state: ConnectionState::Disconnected,
        }
    );
    assert_eq!(
        harness.bridge.topology(&device).await.unwrap_err().kind(),
        ErrorKind::UnknownDevice
    );

    // callbacks for the dead session are dropped without events or errors
    harness.sink.push(NativeCallback::MtuChanged {
        device_id: device.clone(),
        mtu: Some(100),
    });
    harness.sink.push(NativeCallback::Disconnected {
        device_id: device.clone(),
    });
    assert_quiet(&mut events).await;

    let err = harness.bridge.disconnect(&device).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownDevice);
}

#[tokio::test]
async fn unsolicited_loss_uses_the_same_cleanup_path() {
    let harness = start();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    connect(&harness, &device, &mut events).await;
    harness.sink.push(NativeCallback::Disconnected {
        device_id: device.clone(),
    });
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Connection {
            device_id: device.clone(),
            state: ConnectionState::Disconnected,
        }
    );
    assert_eq!(
        harness.bridge.topology(&device).await.unwrap_err().kind(),
        ErrorKind::UnknownDevice
    );
    // and the identifier is connectable again
    harness.bridge.connect(&device).await.unwrap();
    assert_eq!(harness.state.issued_count("connect"), 2);
}

#[tokio::test]
async fn failed_connect_destroys_the_session() {
    let harness = start();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    harness.bridge.connect(&device).await.unwrap();
    harness.sink.push(NativeCallback::ConnectFailed {
        device_id: device.clone(),
    });
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Connection {
            device_id: device.clone(),
            state: ConnectionState::Disconnected,
        }
    );
    assert_eq!(
        harness.bridge.topology(&device).await.unwrap_err().kind(),
        ErrorKind::UnknownDevice
    );
}

#[tokio::test]
async fn command_router_covers_the_protocol_surface() {
    let harness = start();
    *harness.state.tree.lock().unwrap() = heart_rate_tree();
    let mut events = harness.bridge.session_events();
    let device = DeviceId::new("D1");

    harness.state.available.store(true, Ordering::Relaxed);
    assert_eq!(
        harness.bridge.handle(Command::IsBluetoothAvailable).await.unwrap(),
        Reply::Bool(true)
    );
    assert_eq!(
        harness
            .bridge
            .handle(Command::Connect {
                device_id: device.clone()
            })
            .await
            .unwrap(),
        Reply::None
    );
    harness.sink.push(NativeCallback::Connected {
        device_id: device.clone(),
    });
    next_event(&mut events).await;

    assert_eq!(
        harness
            .bridge
            .handle(Command::DiscoverServices {
                device_id: device.clone()
            })
            .await
            .unwrap(),
        Reply::None
    );
    assert_eq!(
        harness
            .bridge
            .handle(Command::WriteValue {
                device_id: device.clone(),
                service: "180d".to_string(),
                characteristic: "2a37".to_string(),
                value: vec![1],
                with_response: false,
            })
            .await
            .unwrap(),
        Reply::None
    );
    let err = harness
        .bridge
        .handle(Command::Disconnect {
            device_id: DeviceId::new("nobody"),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownDevice);
}

/// A radio that leaves the default `request_mtu` in place, like a stack with no
/// client-initiated MTU exchange.
struct MinimalRadio;

#[async_trait]
impl NativeRadio for MinimalRadio {
    type Connection = ();
    type Service = MockService;
    type Characteristic = MockCharacteristic;

    async fn is_available(&self) -> bool {
        false
    }

    async fn start_scan(&self, _services: &[Uuid]) -> bluebridge::Result<()> {
        Ok(())
    }

    async fn stop_scan(&self) -> bluebridge::Result<()> {
        Ok(())
    }

    async fn connect(&self, _device: &DeviceId) -> bluebridge::Result<Self::Connection> {
        Ok(())
    }

    async fn disconnect(&self, _connection: &Self::Connection) -> bluebridge::Result<()> {
        Ok(())
    }

    async fn discover_services(&self, _connection: &Self::Connection) -> bluebridge::Result<()> {
        Ok(())
    }

    fn services(&self, _connection: &Self::Connection) -> Vec<Self::Service> {
        Vec::new()
    }

    fn characteristics(&self, _connection: &Self::Connection, _service: &Self::Service) -> Vec<Self::Characteristic> {
        Vec::new()
    }

    async fn set_notify_state(
        &self,
        _connection: &Self::Connection,
        _characteristic: &Self::Characteristic,
        _mode: NotifyMode,
    ) -> bluebridge::Result<()> {
        Ok(())
    }

    async fn read(
        &self,
        _connection: &Self::Connection,
        _characteristic: &Self::Characteristic,
    ) -> bluebridge::Result<()> {
        Ok(())
    }

    async fn write(
        &self,
        _connection: &Self::Connection,
        _characteristic: &Self::Characteristic,
        _value: &[u8],
        _with_response: bool,
    ) -> bluebridge::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn radios_without_mtu_exchange_reject_the_command() {
    let bridge = Bridge::new(MinimalRadio);
    let device = DeviceId::new("D1");
    bridge.connect(&device).await.unwrap();

    let err = bridge.request_mtu(&device, 200).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);

    // nothing discovered yet, so no address can resolve
    let err = bridge
        .read_value(&device, "180d", "2a37")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownAddress);
}
