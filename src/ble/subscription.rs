//! Notification subscriptions on the companion sensor.
//!
//! Once discovery of a sensor link completes, every interesting
//! characteristic gets its CCCD written and its value handle resolved.
//! Missing pieces are logged per entry; the remaining entries go ahead.

use crate::config::{BLE_ERR_REM_USER_CONN_TERM, CCCD_ENABLE_NOTIFICATIONS, CENTRAL_CMD_QUEUE};

use super::host::BleHost;
use super::peer::PeerStore;
use super::uuid::Uuid;
use super::{ids, AttrHandle, ConnHandle};

/// Number of statically configured notifications.
pub const NUM_INTERESTING_NOTIFICATIONS: usize = 4;

// One subscription pass plus the time read must fit the radio's queue.
const _: () = assert!(CENTRAL_CMD_QUEUE >= NUM_INTERESTING_NOTIFICATIONS + 2);

/// Which telemetry field a notification feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryKind {
    EngineRpm,
    EngineTemperature,
    GpsAvailable,
    SpeedKph,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterestingNotification {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub kind: TelemetryKind,
}

/// Subscribed in this order.
pub const INTERESTING_NOTIFICATIONS: [InterestingNotification; NUM_INTERESTING_NOTIFICATIONS] = [
    InterestingNotification {
        service: ids::ENGINE_RPM,
        characteristic: ids::ENGINE_RPM_RPM,
        kind: TelemetryKind::EngineRpm,
    },
    InterestingNotification {
        service: ids::ENGINE_TEMPERATURE,
        characteristic: ids::ENGINE_TEMPERATURE_ENGINE,
        kind: TelemetryKind::EngineTemperature,
    },
    InterestingNotification {
        service: ids::LOCATION,
        characteristic: ids::LOCATION_GPS_AVAILABLE,
        kind: TelemetryKind::GpsAvailable,
    },
    InterestingNotification {
        service: ids::LOCATION,
        characteristic: ids::LOCATION_SPEED_KPH,
        kind: TelemetryKind::SpeedKph,
    },
];

/// Value handle of a subscribed characteristic on the current link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValueHandle {
    #[default]
    Unresolved,
    Resolved(AttrHandle),
}

/// CCCD state of one interesting characteristic on the current link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Subscription {
    #[default]
    Off,
    /// Enable written to this CCCD, completion outstanding.
    Pending(AttrHandle),
    Active(AttrHandle),
    Failed { cccd: AttrHandle, status: u16 },
}

/// What a write completion meant for the subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOutcome {
    Subscribed(usize),
    Rejected(usize),
    /// Not a CCCD write we are waiting on.
    Unrelated,
}

/// Per-connection resolved handles and CCCD states, parallel to
/// [`INTERESTING_NOTIFICATIONS`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationTable {
    handles: [ValueHandle; NUM_INTERESTING_NOTIFICATIONS],
    subscriptions: [Subscription; NUM_INTERESTING_NOTIFICATIONS],
}

impl NotificationTable {
    pub const fn new() -> Self {
        Self {
            handles: [ValueHandle::Unresolved; NUM_INTERESTING_NOTIFICATIONS],
            subscriptions: [Subscription::Off; NUM_INTERESTING_NOTIFICATIONS],
        }
    }

    pub fn subscription(&self, index: usize) -> Subscription {
        self.subscriptions.get(index).copied().unwrap_or_default()
    }

    /// Entries whose CCCD write was confirmed.
    pub fn subscribed(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| matches!(s, Subscription::Active(_)))
            .count()
    }

    fn pending(&mut self, index: usize, cccd: AttrHandle) {
        if let Some(slot) = self.subscriptions.get_mut(index) {
            *slot = Subscription::Pending(cccd);
        }
    }

    fn complete(&mut self, cccd: AttrHandle, status: u16) -> WriteOutcome {
        let Some(i) = self
            .subscriptions
            .iter()
            .position(|s| *s == Subscription::Pending(cccd))
        else {
            return WriteOutcome::Unrelated;
        };
        if status == 0 {
            self.subscriptions[i] = Subscription::Active(cccd);
            WriteOutcome::Subscribed(i)
        } else {
            self.subscriptions[i] = Subscription::Failed { cccd, status };
            WriteOutcome::Rejected(i)
        }
    }

    pub fn handle(&self, index: usize) -> ValueHandle {
        self.handles.get(index).copied().unwrap_or_default()
    }

    /// Entry whose resolved value handle is `attr`.
    pub fn lookup(&self, attr: AttrHandle) -> Option<&'static InterestingNotification> {
        self.handles
            .iter()
            .position(|h| *h == ValueHandle::Resolved(attr))
            .map(|i| &INTERESTING_NOTIFICATIONS[i])
    }

    /// Handles are set once per connection; a second resolve is ignored.
    fn resolve(&mut self, index: usize, handle: AttrHandle) -> bool {
        match self.handles.get_mut(index) {
            Some(slot) if *slot == ValueHandle::Unresolved => {
                *slot = ValueHandle::Resolved(handle);
                true
            }
            _ => false,
        }
    }
}

/// Outcome of one subscription pass. Partial success is normal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscribeReport {
    pub writes_issued: u8,
    pub missing_cccd: u8,
    pub write_errors: u8,
    pub unresolved: u8,
}

/// Resolve value handles from the discovered tree.
///
/// Depends only on what discovery found, not on how the CCCD writes went.
pub fn resolve_handles<P: PeerStore>(peers: &P, conn: ConnHandle, table: &mut NotificationTable) -> u8 {
    let mut unresolved = 0;
    for (i, entry) in INTERESTING_NOTIFICATIONS.iter().enumerate() {
        match peers.find_characteristic(conn, &entry.service, &entry.characteristic) {
            Some(chr) => {
                if table.resolve(i, chr.val_handle) {
                    info!("notification #{} val_handle={}", i, chr.val_handle);
                }
            }
            None => {
                error!("unable to resolve notification #{}: characteristic not found", i);
                unresolved += 1;
            }
        }
    }
    unresolved
}

/// Enable notifications on every interesting characteristic, then
/// resolve their value handles.
///
/// Each issued write leaves its entry pending until
/// [`on_write_complete`] reports the outcome.
pub fn subscribe<H: BleHost, P: PeerStore>(
    host: &mut H,
    peers: &P,
    conn: ConnHandle,
    table: &mut NotificationTable,
) -> SubscribeReport {
    let mut report = SubscribeReport::default();

    for (i, entry) in INTERESTING_NOTIFICATIONS.iter().enumerate() {
        info!("subscribing to interesting characteristic #{}", i);
        let Some(dsc) = peers.find_descriptor(conn, &entry.service, &entry.characteristic, &ids::CCCD) else {
            warn!(
                "peer lacks a CCCD for service {:?} characteristic {:?}",
                entry.service, entry.characteristic
            );
            report.missing_cccd += 1;
            continue;
        };
        match host.write(conn, dsc.handle, &CCCD_ENABLE_NOTIFICATIONS) {
            Ok(()) => {
                table.pending(i, dsc.handle);
                report.writes_issued += 1;
            }
            Err(e) => {
                error!("failed to subscribe to characteristic #{}; rc={}", i, e.0);
                report.write_errors += 1;
            }
        }
    }

    report.unresolved = resolve_handles(peers, conn, table);
    report
}

/// Discovery finished on a sensor link: subscribe, or drop the link.
pub fn on_discovery_complete<H: BleHost, P: PeerStore>(
    host: &mut H,
    peers: &mut P,
    conn: ConnHandle,
    status: u16,
    table: &mut NotificationTable,
) -> Option<SubscribeReport> {
    if peers.finish_discovery(conn, status == 0).is_err() {
        warn!("discovery complete without a discovery outstanding; conn={}", conn);
    }
    if status != 0 {
        error!("service discovery failed; status={} conn={}", status, conn);
        if let Err(e) = host.terminate(conn, BLE_ERR_REM_USER_CONN_TERM) {
            error!("cannot terminate {}: rc={}", conn, e.0);
        }
        return None;
    }
    info!("service discovery complete; conn={}", conn);
    let report = subscribe(host, peers, conn, table);
    info!(
        "subscriptions: {} written, {} without CCCD, {} failed, {} unresolved",
        report.writes_issued, report.missing_cccd, report.write_errors, report.unresolved
    );
    Some(report)
}

/// A client write finished on the sensor link. Only a status-0
/// completion activates the subscription it belongs to.
pub fn on_write_complete(
    table: &mut NotificationTable,
    conn: ConnHandle,
    attr: AttrHandle,
    status: u16,
) -> WriteOutcome {
    let outcome = table.complete(attr, status);
    match outcome {
        WriteOutcome::Subscribed(i) => info!("subscribe complete; #{} conn={} attr={}", i, conn, attr),
        WriteOutcome::Rejected(i) => error!(
            "subscribe failed; #{} status={} conn={} attr={}",
            i, status, conn, attr
        ),
        WriteOutcome::Unrelated => debug!("write complete; status={} conn={} attr={}", status, conn, attr),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::{Command, MockHost};
    use crate::ble::peer::PeerTable;
    use crate::ble::DiscoveredAttribute;

    /// Sensor tree: RPM with CCCD, temperature without CCCD, location with
    /// both characteristics and CCCDs.
    fn sensor_tree(peers: &mut PeerTable, conn: ConnHandle) {
        peers.add(conn).unwrap();
        peers.discover_all(conn).unwrap();
        let attrs = [
            DiscoveredAttribute::Service { uuid: ids::ENGINE_RPM, start_handle: 10, end_handle: 13 },
            DiscoveredAttribute::Characteristic { service_start: 10, uuid: ids::ENGINE_RPM_RPM, def_handle: 11, val_handle: 12, properties: 0x10 },
            DiscoveredAttribute::Descriptor { chr_val_handle: 12, uuid: ids::CCCD, handle: 13 },
            DiscoveredAttribute::Service { uuid: ids::ENGINE_TEMPERATURE, start_handle: 20, end_handle: 22 },
            DiscoveredAttribute::Characteristic { service_start: 20, uuid: ids::ENGINE_TEMPERATURE_ENGINE, def_handle: 21, val_handle: 22, properties: 0x10 },
            DiscoveredAttribute::Service { uuid: ids::LOCATION, start_handle: 30, end_handle: 40 },
            DiscoveredAttribute::Characteristic { service_start: 30, uuid: ids::LOCATION_GPS_AVAILABLE, def_handle: 31, val_handle: 32, properties: 0x10 },
            DiscoveredAttribute::Descriptor { chr_val_handle: 32, uuid: ids::CCCD, handle: 33 },
            DiscoveredAttribute::Characteristic { service_start: 30, uuid: ids::LOCATION_SPEED_KPH, def_handle: 34, val_handle: 35, properties: 0x10 },
            DiscoveredAttribute::Descriptor { chr_val_handle: 35, uuid: ids::CCCD, handle: 36 },
        ];
        for a in &attrs {
            peers.record(conn, a).unwrap();
        }
    }

    #[test]
    fn writes_only_where_cccd_exists() {
        let mut host = MockHost::new();
        let mut peers = PeerTable::new();
        sensor_tree(&mut peers, 1);
        let mut table = NotificationTable::new();

        let report = on_discovery_complete(&mut host, &mut peers, 1, 0, &mut table).unwrap();

        let enable = crate::ble::attr_value(&CCCD_ENABLE_NOTIFICATIONS).unwrap();
        assert_eq!(
            host.take(),
            std::vec![
                Command::Write { conn: 1, attr: 13, data: enable.clone() },
                Command::Write { conn: 1, attr: 33, data: enable.clone() },
                Command::Write { conn: 1, attr: 36, data: enable },
            ]
        );
        assert_eq!(report.writes_issued, 3);
        assert_eq!(report.missing_cccd, 1);
        assert_eq!(report.unresolved, 0);
        assert_eq!(table.subscription(0), Subscription::Pending(13));
        assert_eq!(table.subscription(1), Subscription::Off);
        assert_eq!(table.subscribed(), 0);
    }

    #[test]
    fn only_successful_completions_subscribe() {
        let mut host = MockHost::new();
        let mut peers = PeerTable::new();
        sensor_tree(&mut peers, 1);
        let mut table = NotificationTable::new();
        subscribe(&mut host, &peers, 1, &mut table);

        assert_eq!(on_write_complete(&mut table, 1, 13, 0), WriteOutcome::Subscribed(0));
        assert_eq!(on_write_complete(&mut table, 1, 33, 0x03), WriteOutcome::Rejected(2));
        assert_eq!(on_write_complete(&mut table, 1, 77, 0), WriteOutcome::Unrelated);
        // A repeated completion changes nothing.
        assert_eq!(on_write_complete(&mut table, 1, 13, 0x0E), WriteOutcome::Unrelated);

        assert_eq!(table.subscription(0), Subscription::Active(13));
        assert_eq!(table.subscription(2), Subscription::Failed { cccd: 33, status: 0x03 });
        assert_eq!(table.subscription(3), Subscription::Pending(36));
        assert_eq!(table.subscribed(), 1);
    }

    #[test]
    fn handles_resolve_even_without_cccd_or_write_success() {
        let mut host = MockHost::new();
        host.fail_writes = true;
        let mut peers = PeerTable::new();
        sensor_tree(&mut peers, 1);
        let mut table = NotificationTable::new();

        let report = subscribe(&mut host, &peers, 1, &mut table);
        assert_eq!(report.write_errors, 3);
        assert_eq!(table.subscription(0), Subscription::Off);
        assert_eq!(table.handle(0), ValueHandle::Resolved(12));
        assert_eq!(table.handle(1), ValueHandle::Resolved(22));
        assert_eq!(table.handle(2), ValueHandle::Resolved(32));
        assert_eq!(table.handle(3), ValueHandle::Resolved(35));
    }

    #[test]
    fn resolution_is_a_function_of_the_tree() {
        let mut peers = PeerTable::new();
        sensor_tree(&mut peers, 1);
        let mut a = NotificationTable::new();
        let mut b = NotificationTable::new();
        resolve_handles(&peers, 1, &mut a);
        resolve_handles(&peers, 1, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_characteristic_stays_unresolved() {
        let mut peers = PeerTable::new();
        peers.add(2).unwrap();
        peers.discover_all(2).unwrap();
        peers
            .record(2, &DiscoveredAttribute::Service { uuid: ids::ENGINE_RPM, start_handle: 1, end_handle: 3 })
            .unwrap();
        peers
            .record(2, &DiscoveredAttribute::Characteristic { service_start: 1, uuid: ids::ENGINE_RPM_RPM, def_handle: 2, val_handle: 3, properties: 0x10 })
            .unwrap();
        let mut table = NotificationTable::new();
        assert_eq!(resolve_handles(&peers, 2, &mut table), 3);
        assert_eq!(table.handle(0), ValueHandle::Resolved(3));
        assert_eq!(table.handle(2), ValueHandle::Unresolved);
        assert_eq!(table.lookup(3).unwrap().kind, TelemetryKind::EngineRpm);
    }

    #[test]
    fn handles_are_set_once() {
        let mut table = NotificationTable::new();
        assert!(table.resolve(0, 12));
        assert!(!table.resolve(0, 99));
        assert_eq!(table.handle(0), ValueHandle::Resolved(12));
        assert!(table.lookup(99).is_none());
    }

    #[test]
    fn failed_discovery_terminates_without_writes() {
        let mut host = MockHost::new();
        let mut peers = PeerTable::new();
        sensor_tree(&mut peers, 1);
        let mut table = NotificationTable::new();

        assert!(on_discovery_complete(&mut host, &mut peers, 1, 14, &mut table).is_none());
        assert_eq!(
            host.take(),
            std::vec![Command::Terminate { conn: 1, reason: BLE_ERR_REM_USER_CONN_TERM }]
        );
        assert_eq!(table, NotificationTable::new());
    }
}
