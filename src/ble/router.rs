//! Notification router: sensor notifications into the datastore.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::TIME_SYNC_TIMEZONE;
use crate::datastore::{Datastore, GpsStatus};
use crate::error::AttError;

use super::host::BleHost;
use super::peer::PeerStore;
use super::subscription::{NotificationTable, TelemetryKind};
use super::{decode_exact, ids, AttrHandle, AttrValue, ConnHandle};

/// Engine RPM, `f64` little-endian.
pub fn decode_rpm(data: &[u8]) -> Result<f64, AttError> {
    decode_exact::<8>(data).map(f64::from_le_bytes)
}

/// Engine temperature in °C, `f32` little-endian. NaN means no sensor.
pub fn decode_temperature(data: &[u8]) -> Result<f32, AttError> {
    decode_exact::<4>(data).map(f32::from_le_bytes)
}

/// Ground speed in km/h, `f64` little-endian.
pub fn decode_speed(data: &[u8]) -> Result<f64, AttError> {
    decode_exact::<8>(data).map(f64::from_le_bytes)
}

pub fn decode_gps_available(data: &[u8]) -> Result<bool, AttError> {
    decode_exact::<1>(data).map(|[b]| b != 0)
}

/// GPS time, seconds since the Unix epoch as `i64` little-endian.
pub fn decode_epoch(data: &[u8]) -> Result<i64, AttError> {
    decode_exact::<8>(data).map(i64::from_le_bytes)
}

/// Routes notifications of one sensor link.
#[derive(Debug, Default)]
pub struct NotificationRouter {
    /// Outstanding time-sync read.
    time_read: Option<(ConnHandle, AttrHandle)>,
}

impl NotificationRouter {
    pub const fn new() -> Self {
        Self { time_read: None }
    }

    pub fn time_read_pending(&self) -> bool {
        self.time_read.is_some()
    }

    /// Handle one notification or indication.
    ///
    /// Indications are never routed. Unknown handles and malformed payloads
    /// leave the datastore untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn on_notify<H: BleHost, P: PeerStore, M: RawMutex>(
        &mut self,
        host: &mut H,
        peers: &P,
        table: &NotificationTable,
        store: &Datastore<M>,
        conn: ConnHandle,
        attr: AttrHandle,
        indication: bool,
        data: &[u8],
    ) {
        debug!(
            "received {}; conn={} attr={} len={}",
            if indication { "indication" } else { "notification" },
            conn,
            attr,
            data.len()
        );
        if indication {
            return;
        }
        let Some(entry) = table.lookup(attr) else {
            trace!("no subscription for attr={}", attr);
            return;
        };
        let applied = match entry.kind {
            TelemetryKind::EngineRpm => decode_rpm(data).map(|rpm| {
                debug!("RPM received: {}", rpm);
                store.set_engine_rpm(rpm, rpm > 0.0);
            }),
            TelemetryKind::EngineTemperature => decode_temperature(data).map(|t| {
                debug!("engine temperature received: {}", t);
                store.set_engine_temperature(t, !t.is_nan());
            }),
            TelemetryKind::SpeedKph => decode_speed(data).map(|speed| {
                debug!("speed received: {} km/h", speed);
                store.set_speed(speed, true);
            }),
            TelemetryKind::GpsAvailable => decode_gps_available(data).map(|available| {
                debug!("GPS availability received: {}", available);
                self.on_gps_available(host, peers, store, conn, available);
            }),
        };
        if let Err(e) = applied {
            warn!("dropping notification attr={}: {:?}", attr, e);
        }
    }

    fn on_gps_available<H: BleHost, P: PeerStore, M: RawMutex>(
        &mut self,
        host: &mut H,
        peers: &P,
        store: &Datastore<M>,
        conn: ConnHandle,
        available: bool,
    ) {
        let status = if available {
            GpsStatus::Connected
        } else {
            GpsStatus::Connecting
        };
        let previous = store.replace_gps_status(status);
        // Speed is only meaningful with a fix.
        store.set_speed_available(available);
        if available && previous != GpsStatus::Connected {
            self.request_time(host, peers, conn);
        }
    }

    /// Read the GPS time once per rising edge of GPS availability.
    fn request_time<H: BleHost, P: PeerStore>(&mut self, host: &mut H, peers: &P, conn: ConnHandle) {
        let Some(chr) = peers.find_characteristic(conn, &ids::LOCATION, &ids::LOCATION_GPS_TIME) else {
            warn!("sensor has no GPS time characteristic");
            return;
        };
        match host.read(conn, chr.val_handle) {
            Ok(()) => {
                info!("GPS fix acquired, reading time");
                self.time_read = Some((conn, chr.val_handle));
            }
            Err(e) => warn!("cannot read GPS time; rc={}", e.0),
        }
    }

    /// Completion of a characteristic read. Returns whether it was ours.
    pub fn on_read_complete<M: RawMutex>(
        &mut self,
        store: &Datastore<M>,
        conn: ConnHandle,
        attr: AttrHandle,
        status: u16,
        value: Option<&AttrValue>,
    ) -> bool {
        if self.time_read != Some((conn, attr)) {
            return false;
        }
        self.time_read = None;

        if status != 0 {
            warn!("GPS time read failed; status={}", status);
            return true;
        }
        let Some(value) = value else {
            warn!("GPS time read returned no data");
            return true;
        };
        match decode_epoch(value) {
            Ok(epoch) => {
                info!("setting system time to {} ({})", epoch, TIME_SYNC_TIMEZONE);
                store.set_wall_clock(epoch, TIME_SYNC_TIMEZONE);
            }
            Err(e) => warn!("malformed GPS time: {:?}", e),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::attr_value;
    use crate::ble::mock::{Command, MockHost};
    use crate::ble::peer::PeerTable;
    use crate::ble::subscription::resolve_handles;
    use crate::ble::uuid::Uuid;
    use crate::ble::DiscoveredAttribute;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    const RPM: AttrHandle = 12;
    const TEMP: AttrHandle = 22;
    const GPS: AttrHandle = 32;
    const SPEED: AttrHandle = 35;
    const TIME: AttrHandle = 38;

    struct Fixture {
        host: MockHost,
        peers: PeerTable,
        table: NotificationTable,
        store: Datastore<NoopRawMutex>,
        router: NotificationRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let mut peers = PeerTable::new();
            peers.add(1).unwrap();
            peers.discover_all(1).unwrap();
            let chr = |svc: u16, uuid: Uuid, val: u16| DiscoveredAttribute::Characteristic {
                service_start: svc,
                uuid,
                def_handle: val - 1,
                val_handle: val,
                properties: 0x12,
            };
            for a in [
                DiscoveredAttribute::Service { uuid: ids::ENGINE_RPM, start_handle: 10, end_handle: 13 },
                chr(10, ids::ENGINE_RPM_RPM, RPM),
                DiscoveredAttribute::Service { uuid: ids::ENGINE_TEMPERATURE, start_handle: 20, end_handle: 23 },
                chr(20, ids::ENGINE_TEMPERATURE_ENGINE, TEMP),
                DiscoveredAttribute::Service { uuid: ids::LOCATION, start_handle: 30, end_handle: 40 },
                chr(30, ids::LOCATION_GPS_AVAILABLE, GPS),
                chr(30, ids::LOCATION_SPEED_KPH, SPEED),
                chr(30, ids::LOCATION_GPS_TIME, TIME),
            ] {
                peers.record(1, &a).unwrap();
            }
            peers.finish_discovery(1, true).unwrap();
            let mut table = NotificationTable::new();
            resolve_handles(&peers, 1, &mut table);
            Self {
                host: MockHost::new(),
                peers,
                table,
                store: Datastore::new(),
                router: NotificationRouter::new(),
            }
        }

        fn notify(&mut self, attr: AttrHandle, data: &[u8]) {
            self.router.on_notify(&mut self.host, &self.peers, &self.table, &self.store, 1, attr, false, data);
        }

        fn time_reads(&self) -> usize {
            self.host.count(|c| *c == Command::Read { conn: 1, attr: TIME })
        }
    }

    #[test]
    fn rpm_availability_follows_sign() {
        let mut f = Fixture::new();
        f.notify(RPM, &1500.0f64.to_le_bytes());
        let e = f.store.snapshot().engine;
        assert_eq!(e.rpm, 1500.0);
        assert!(e.rpm_available);

        f.notify(RPM, &0.0f64.to_le_bytes());
        assert!(!f.store.snapshot().engine.rpm_available);
    }

    #[test]
    fn temperature_nan_means_unavailable() {
        let mut f = Fixture::new();
        f.notify(TEMP, &f32::NAN.to_le_bytes());
        assert!(!f.store.snapshot().engine.temp_c_available);

        f.notify(TEMP, &0.0f32.to_le_bytes());
        let e = f.store.snapshot().engine;
        assert!(e.temp_c_available);
        assert_eq!(e.temp_c, 0.0);
    }

    #[test]
    fn speed_is_always_available() {
        let mut f = Fixture::new();
        f.notify(SPEED, &0.0f64.to_le_bytes());
        let l = f.store.snapshot().location;
        assert!(l.speed_available);
        assert_eq!(l.speed, 0.0);
    }

    #[test]
    fn gps_rising_edge_reads_time_once() {
        let mut f = Fixture::new();
        f.notify(GPS, &[1]);
        assert_eq!(f.time_reads(), 1);
        assert_eq!(f.store.gps_status(), GpsStatus::Connected);

        // Steady state.
        f.notify(GPS, &[1]);
        assert_eq!(f.time_reads(), 1);

        // Falling edge.
        f.notify(GPS, &[0]);
        assert_eq!(f.time_reads(), 1);
        assert_eq!(f.store.gps_status(), GpsStatus::Connecting);

        // Rising again from Connecting.
        f.notify(GPS, &[1]);
        assert_eq!(f.time_reads(), 2);
    }

    #[test]
    fn gps_loss_clears_speed_availability() {
        let mut f = Fixture::new();
        f.notify(SPEED, &12.5f64.to_le_bytes());
        f.notify(GPS, &[0]);
        assert!(!f.store.snapshot().location.speed_available);
        assert_eq!(f.time_reads(), 0);
    }

    #[test]
    fn time_read_sets_wall_clock() {
        let mut f = Fixture::new();
        f.notify(GPS, &[1]);
        let value = attr_value(&1_700_000_000i64.to_le_bytes()).unwrap();
        assert!(f.router.on_read_complete(&f.store, 1, TIME, 0, Some(&value)));
        let clock = f.store.snapshot().wall_clock.unwrap();
        assert_eq!(clock.epoch_secs, 1_700_000_000);
        assert_eq!(clock.timezone, TIME_SYNC_TIMEZONE);
        assert!(!f.router.time_read_pending());
    }

    #[test]
    fn failed_time_read_is_not_retried() {
        let mut f = Fixture::new();
        f.notify(GPS, &[1]);
        assert!(f.router.on_read_complete(&f.store, 1, TIME, 0x0E, None));
        assert!(f.store.snapshot().wall_clock.is_none());
        assert_eq!(f.time_reads(), 1);

        // Still fixed: no second attempt.
        f.notify(GPS, &[1]);
        assert_eq!(f.time_reads(), 1);
        assert!(!f.router.time_read_pending());
    }

    #[test]
    fn unrelated_read_completion_is_not_ours() {
        let mut f = Fixture::new();
        assert!(!f.router.on_read_complete(&f.store, 1, TIME, 0, None));
    }

    #[test]
    fn indications_are_dropped() {
        let mut f = Fixture::new();
        let before = f.store.snapshot();
        f.router.on_notify(&mut f.host, &f.peers, &f.table, &f.store, 1, RPM, true, &1500.0f64.to_le_bytes());
        assert_eq!(f.store.snapshot(), before);
    }

    #[test]
    fn unknown_handle_is_a_no_op() {
        let mut f = Fixture::new();
        let before = f.store.snapshot();
        f.notify(999, &1500.0f64.to_le_bytes());
        f.notify(TIME, &[1]);
        assert_eq!(f.store.snapshot(), before);
        assert!(f.host.take().is_empty());
    }

    #[test]
    fn wrong_size_payload_is_not_applied() {
        let mut f = Fixture::new();
        f.notify(RPM, &1500.0f32.to_le_bytes());
        f.notify(GPS, &[1, 0]);
        let t = f.store.snapshot();
        assert!(!t.engine.rpm_available);
        assert_eq!(t.gps_status, GpsStatus::Off);
        assert_eq!(decode_rpm(&[0; 4]), Err(AttError::InvalidAttributeLength));
    }
}
