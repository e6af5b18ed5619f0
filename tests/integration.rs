//! Integration tests for the tkos-ble engine, driven through the public API.

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use tkos_ble::ble::gatt_server::ServiceDef;
use tkos_ble::ble::host::ConnInfo;
use tkos_ble::ble::subscription::Subscription;
use tkos_ble::ble::{
    attr_value, ids, AccessOp, AdvData, AdvEventType, Address, AddressType, AttrHandle,
    ConnHandle, DiscoveredAttribute, GapEvent, GattAccessRequest, GattEvent, HostEvent, ScanReport,
};
use tkos_ble::{
    BleHost, ConnectionManager, Datastore, GpsStatus, HostError, PeerTable, ScanParams, ScanToken,
    SoftAp, TimerId, WifiError,
};

const MAC: Address = Address::new(AddressType::Public, [0x01, 0x02, 0x03, 0x0A, 0x0B, 0x0C]);
const SENSOR: Address = Address::new(AddressType::Random, [0x51, 0x52, 0x53, 0x54, 0x55, 0xD6]);
const CONN: ConnHandle = 3;

#[derive(Debug, PartialEq)]
enum Op {
    Advertise,
    Scan(u32),
    Cancel(u32),
    Connect(Address),
    Discover(ConnHandle),
    Write(AttrHandle, Vec<u8>),
    Read(AttrHandle),
    Notify(AttrHandle, Vec<u8>),
    Register(usize),
}

#[derive(Default)]
struct Radio {
    ops: Vec<Op>,
    tokens: u32,
    linked: bool,
}

impl BleHost for Radio {
    fn set_adv_data(&mut self, _data: &[u8]) -> Result<(), HostError> {
        Ok(())
    }

    fn set_scan_response(&mut self, _data: &[u8]) -> Result<(), HostError> {
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), HostError> {
        self.ops.push(Op::Advertise);
        Ok(())
    }

    fn own_address_type(&mut self) -> Result<AddressType, HostError> {
        Ok(AddressType::Public)
    }

    fn start_scan(&mut self, _params: &ScanParams) -> Result<ScanToken, HostError> {
        self.tokens += 1;
        self.ops.push(Op::Scan(self.tokens));
        Ok(ScanToken(self.tokens))
    }

    fn cancel_scan(&mut self, token: ScanToken) -> Result<(), HostError> {
        self.ops.push(Op::Cancel(token.0));
        Ok(())
    }

    fn connect(&mut self, _own: AddressType, peer: &Address, _timeout_ms: u32) -> Result<(), HostError> {
        self.ops.push(Op::Connect(*peer));
        Ok(())
    }

    fn terminate(&mut self, _conn: ConnHandle, _reason: u8) -> Result<(), HostError> {
        Ok(())
    }

    fn discover_all(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.ops.push(Op::Discover(conn));
        Ok(())
    }

    fn write(&mut self, _conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        self.ops.push(Op::Write(attr, data.to_vec()));
        Ok(())
    }

    fn read(&mut self, _conn: ConnHandle, attr: AttrHandle) -> Result<(), HostError> {
        self.ops.push(Op::Read(attr));
        Ok(())
    }

    fn notify(&mut self, _conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        self.ops.push(Op::Notify(attr, data.to_vec()));
        Ok(())
    }

    fn delete_bond(&mut self, _peer: &Address) -> Result<(), HostError> {
        Ok(())
    }

    fn conn_info(&self, conn: ConnHandle) -> Option<ConnInfo> {
        self.linked.then_some(ConnInfo {
            conn,
            our_id_addr: MAC,
            peer_ota_addr: SENSOR,
            peer_id_addr: SENSOR,
            interval: 40,
            latency: 0,
            supervision_timeout: 400,
            encrypted: false,
            authenticated: false,
            bonded: false,
        })
    }

    fn register_services(&mut self, services: &'static [ServiceDef]) -> Result<(), HostError> {
        self.ops.push(Op::Register(services.len()));
        Ok(())
    }

    fn schedule(&mut self, _timer: TimerId, _delay_ms: u32) {}
}

#[derive(Default)]
struct AccessPoint {
    started: bool,
}

impl SoftAp for AccessPoint {
    fn start_soft_ap(&mut self) -> Result<(), WifiError> {
        self.started = true;
        Ok(())
    }

    fn stop_soft_ap(&mut self) {}
}

type Engine<'d> = ConnectionManager<'d, Radio, PeerTable, AccessPoint, NoopRawMutex>;

fn sensor_report() -> HostEvent {
    let mut data = AdvData::new();
    data.extend_from_slice(&[0x02, 0x01, 0x06, 0x11, 0x07]).unwrap();
    data.extend_from_slice(&ids::SENSOR_DISCOVERY.to_le_bytes()).unwrap();
    HostEvent::Central(GapEvent::ScanReport(ScanReport {
        event_type: AdvEventType::AdvInd,
        addr: SENSOR,
        rssi: -60,
        data,
    }))
}

fn discovered(attribute: DiscoveredAttribute) -> HostEvent {
    HostEvent::Gatt(GattEvent::Discovered { conn: CONN, attribute })
}

fn notification(attr: AttrHandle, data: &[u8]) -> HostEvent {
    HostEvent::Central(GapEvent::NotifyRx {
        conn: CONN,
        attr,
        indication: false,
        data: attr_value(data).unwrap(),
    })
}

/// Boot, find the sensor and subscribe to its RPM and location data.
fn bring_up(engine: &mut Engine<'_>) {
    engine.init().unwrap();
    engine.handle_event(HostEvent::Sync);
    engine.handle_event(sensor_report());
    engine.host_mut().linked = true;
    engine.handle_event(HostEvent::Central(GapEvent::Connect { conn: CONN, status: 0 }));

    let events = [
        DiscoveredAttribute::Service { uuid: ids::ENGINE_RPM, start_handle: 20, end_handle: 23 },
        DiscoveredAttribute::Characteristic {
            service_start: 20,
            uuid: ids::ENGINE_RPM_RPM,
            def_handle: 21,
            val_handle: 22,
            properties: 0x10,
        },
        DiscoveredAttribute::Descriptor { chr_val_handle: 22, uuid: ids::CCCD, handle: 23 },
        DiscoveredAttribute::Service { uuid: ids::LOCATION, start_handle: 40, end_handle: 48 },
        DiscoveredAttribute::Characteristic {
            service_start: 40,
            uuid: ids::LOCATION_GPS_AVAILABLE,
            def_handle: 41,
            val_handle: 42,
            properties: 0x10,
        },
        DiscoveredAttribute::Descriptor { chr_val_handle: 42, uuid: ids::CCCD, handle: 43 },
        DiscoveredAttribute::Characteristic {
            service_start: 40,
            uuid: ids::LOCATION_GPS_TIME,
            def_handle: 47,
            val_handle: 48,
            properties: 0x02,
        },
    ];
    for attribute in events {
        engine.handle_event(discovered(attribute));
    }
    engine.handle_event(HostEvent::Gatt(GattEvent::DiscoveryComplete { conn: CONN, status: 0 }));
}

#[test]
fn boot_to_subscribed_sensor() {
    let store = Datastore::<NoopRawMutex>::new();
    let mut engine = Engine::new(Radio::default(), PeerTable::new(), AccessPoint::default(), &store, MAC);
    bring_up(&mut engine);

    assert_eq!(
        engine.host().ops,
        vec![
            Op::Register(2),
            Op::Advertise,
            Op::Scan(1),
            Op::Cancel(1),
            Op::Connect(SENSOR),
            Op::Discover(CONN),
            Op::Write(23, vec![0x01, 0x00]),
            Op::Write(43, vec![0x01, 0x00]),
        ]
    );
    assert!(store.snapshot().bluetooth_connected);
    assert_eq!(engine.gap().device_name(), "TK-030201");
}

#[test]
fn telemetry_flows_into_the_datastore() {
    let store = Datastore::<NoopRawMutex>::new();
    let mut engine = Engine::new(Radio::default(), PeerTable::new(), AccessPoint::default(), &store, MAC);
    bring_up(&mut engine);
    engine.host_mut().ops.clear();

    engine.handle_event(notification(22, &2450.0f64.to_le_bytes()));
    engine.handle_event(notification(42, &[1]));

    let t = store.snapshot();
    assert_eq!(t.engine.rpm, 2450.0);
    assert!(t.engine.rpm_available);
    assert_eq!(t.gps_status, GpsStatus::Connected);
    assert!(t.location.speed_available);

    // GPS fix triggers one time read.
    assert_eq!(engine.host().ops, vec![Op::Read(48)]);
    let epoch = 1_700_000_000i64;
    engine.handle_event(HostEvent::Gatt(GattEvent::ReadComplete {
        conn: CONN,
        attr: 48,
        status: 0,
        value: Some(attr_value(&epoch.to_le_bytes()).unwrap()),
    }));
    assert_eq!(store.snapshot().wall_clock.map(|c| c.epoch_secs), Some(epoch));
}

#[test]
fn sensor_loss_clears_telemetry_and_rescans() {
    let store = Datastore::<NoopRawMutex>::new();
    let mut engine = Engine::new(Radio::default(), PeerTable::new(), AccessPoint::default(), &store, MAC);
    bring_up(&mut engine);
    engine.handle_event(notification(22, &1200.0f64.to_le_bytes()));
    engine.host_mut().ops.clear();

    engine.host_mut().linked = false;
    engine.handle_event(HostEvent::Central(GapEvent::Disconnect { conn: CONN, reason: 0x08 }));

    let t = store.snapshot();
    assert!(!t.bluetooth_connected);
    assert!(!t.engine.rpm_available);
    assert!(engine.session().is_none());
    assert_eq!(engine.host().ops, vec![Op::Scan(2)]);
}

#[test]
fn ota_enable_write_starts_the_access_point() {
    let store = Datastore::<NoopRawMutex>::new();
    let mut engine = Engine::new(Radio::default(), PeerTable::new(), AccessPoint::default(), &store, MAC);
    engine.init().unwrap();

    engine.handle_event(HostEvent::Access(GattAccessRequest {
        conn: 1,
        characteristic: ids::OTA_ENABLE,
        op: AccessOp::Write,
        data: attr_value(&[1]).unwrap(),
    }));

    assert!(engine.wifi().started);
    assert!(store.ap_enabled());
}

#[test]
fn serial_number_is_served_from_the_mac() {
    let store = Datastore::<NoopRawMutex>::new();
    let mut engine = Engine::new(Radio::default(), PeerTable::new(), AccessPoint::default(), &store, MAC);

    let value = engine
        .handle_access(&GattAccessRequest {
            conn: 1,
            characteristic: ids::DEVICE_INFO_SERIAL_NUMBER,
            op: AccessOp::Read,
            data: Default::default(),
        })
        .unwrap();
    assert_eq!(value.as_slice(), b"0C0B0A030201");
}

#[test]
fn subscriptions_confirm_on_write_completion() {
    let store = Datastore::<NoopRawMutex>::new();
    let mut engine = Engine::new(Radio::default(), PeerTable::new(), AccessPoint::default(), &store, MAC);
    bring_up(&mut engine);

    engine.handle_event(HostEvent::Gatt(GattEvent::WriteComplete { conn: CONN, attr: 23, status: 0 }));
    engine.handle_event(HostEvent::Gatt(GattEvent::WriteComplete { conn: CONN, attr: 43, status: 0x0E }));

    let table = &engine.session().unwrap().table;
    assert_eq!(table.subscription(0), Subscription::Active(23));
    assert_eq!(table.subscription(2), Subscription::Failed { cccd: 43, status: 0x0E });
    assert_eq!(table.subscribed(), 1);
}
