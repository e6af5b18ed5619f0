//! Connection manager: owns every BLE role and dispatches host events.
//!
//! There is exactly one instance, driven by the host task. Events are
//! handled one at a time and to completion, so the roles never observe
//! each other half-way through an update.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::BLE_NAME_PREFIX;
use crate::datastore::Datastore;
use crate::error::{AttError, Error};
use crate::wifi::SoftAp;

use super::gap::{AdvState, EventOutcome, GapController};
use super::gatt_server::GattServer;
use super::host::{BleHost, TimerId};
use super::peer::PeerStore;
use super::router::NotificationRouter;
use super::scanner::{CentralOutcome, CentralScanner};
use super::subscription::{self, NotificationTable};
use super::{Address, AttrHandle, AttrValue, ConnHandle, GapEvent, GattAccessRequest, GattEvent, HostEvent};

/// State of the one companion-sensor link.
#[derive(Debug)]
pub struct SensorSession {
    pub conn: ConnHandle,
    pub table: NotificationTable,
    pub router: NotificationRouter,
}

impl SensorSession {
    fn new(conn: ConnHandle) -> Self {
        Self {
            conn,
            table: NotificationTable::new(),
            router: NotificationRouter::new(),
        }
    }
}

pub struct ConnectionManager<'d, H, P, W, M>
where
    H: BleHost,
    P: PeerStore,
    W: SoftAp,
    M: RawMutex,
{
    host: H,
    peers: P,
    wifi: W,
    store: &'d Datastore<M>,
    gap: GapController,
    gatt: GattServer,
    scanner: CentralScanner,
    session: Option<SensorSession>,
}

impl<'d, H, P, W, M> ConnectionManager<'d, H, P, W, M>
where
    H: BleHost,
    P: PeerStore,
    W: SoftAp,
    M: RawMutex,
{
    pub fn new(host: H, peers: P, wifi: W, store: &'d Datastore<M>, mac: Address) -> Self {
        Self {
            host,
            peers,
            wifi,
            store,
            gap: GapController::new(BLE_NAME_PREFIX, &mac),
            gatt: GattServer::new(mac),
            scanner: CentralScanner::new(),
            session: None,
        }
    }

    /// Register the local GATT table. Must succeed before the host syncs.
    pub fn init(&mut self) -> Result<(), Error> {
        self.gatt.register(&mut self.host)?;
        info!("GATT services registered");
        Ok(())
    }

    pub fn handle_event(&mut self, event: HostEvent) -> EventOutcome {
        match event {
            HostEvent::Sync => self.on_sync(),
            HostEvent::Reset { reason } => self.on_reset(reason),
            HostEvent::Peripheral(ev) => return self.gap.handle_event(&mut self.host, &ev),
            HostEvent::Central(GapEvent::NotifyRx {
                conn,
                attr,
                indication,
                data,
            }) => self.on_notify(conn, attr, indication, &data),
            HostEvent::Central(ev) => return self.on_central(&ev),
            HostEvent::Gatt(ev) => self.on_gatt(ev),
            HostEvent::Access(req) => {
                if let Err(e) = self.handle_access(&req) {
                    warn!("access to {:?} rejected: {:?}", req.characteristic, e);
                }
            }
            HostEvent::TimerExpired(TimerId::AdvertiseRetry) => self.gap.on_retry_timer(&mut self.host),
            HostEvent::TimerExpired(TimerId::ScanRetry) => self.scanner.on_retry_timer(&mut self.host),
        }
        EventOutcome::Done
    }

    fn on_sync(&mut self) {
        match self.host.own_address_type() {
            Ok(kind) => debug!("own address type {:?}", kind),
            Err(e) => {
                error!("error determining address type; rc={}", e.0);
                return;
            }
        }
        self.gap.advertise(&mut self.host);
        self.scanner.scan(&mut self.host);
    }

    fn on_reset(&mut self, reason: i32) {
        error!("resetting state; reason={}", reason);
        if let Some(session) = self.session.take() {
            if self.peers.remove(session.conn).is_err() {
                debug!("no peer for conn={}", session.conn);
            }
        }
        self.store.invalidate_sensor();
        self.gap.reset();
        self.scanner.reset();
    }

    fn on_central(&mut self, ev: &GapEvent) -> EventOutcome {
        match self.scanner.handle_event(&mut self.host, &mut self.peers, ev) {
            CentralOutcome::Nothing => {}
            CentralOutcome::LinkUp(conn) => {
                if let Some(old) = self.session.replace(SensorSession::new(conn)) {
                    warn!("sensor link {} replaced by {}", old.conn, conn);
                }
                self.store.set_bluetooth_connected(true);
            }
            CentralOutcome::LinkRefused(conn) => {
                debug!("no sensor session on {}; link is going down", conn);
            }
            CentralOutcome::LinkDown(conn) => {
                match self.session.take() {
                    Some(s) if s.conn == conn => debug!("sensor session {} closed", conn),
                    other => self.session = other,
                }
                self.store.invalidate_sensor();
            }
            CentralOutcome::Pairing(outcome) => return outcome,
        }
        EventOutcome::Done
    }

    fn on_notify(&mut self, conn: ConnHandle, attr: AttrHandle, indication: bool, data: &[u8]) {
        match self.session.as_mut() {
            Some(s) if s.conn == conn => s.router.on_notify(
                &mut self.host,
                &self.peers,
                &s.table,
                self.store,
                conn,
                attr,
                indication,
                data,
            ),
            _ => debug!("notification outside a sensor session; conn={} attr={}", conn, attr),
        }
    }

    fn on_gatt(&mut self, ev: GattEvent) {
        match ev {
            GattEvent::Discovered { conn, attribute } => {
                if let Err(e) = self.peers.record(conn, &attribute) {
                    warn!("cannot record discovered attribute on {}: {:?}", conn, e);
                }
            }
            GattEvent::DiscoveryComplete { conn, status } => match self.session.as_mut() {
                Some(s) if s.conn == conn => {
                    subscription::on_discovery_complete(&mut self.host, &mut self.peers, conn, status, &mut s.table);
                }
                _ => warn!("discovery complete on unknown link {}", conn),
            },
            GattEvent::WriteComplete { conn, attr, status } => match self.session.as_mut() {
                Some(s) if s.conn == conn => {
                    subscription::on_write_complete(&mut s.table, conn, attr, status);
                }
                _ => debug!("write completion outside a sensor session; conn={} attr={}", conn, attr),
            },
            GattEvent::ReadComplete {
                conn,
                attr,
                status,
                value,
            } => {
                let routed = match self.session.as_mut() {
                    Some(s) if s.conn == conn => {
                        s.router.on_read_complete(self.store, conn, attr, status, value.as_ref())
                    }
                    _ => false,
                };
                if !routed {
                    debug!("unsolicited read completion; conn={} attr={}", conn, attr);
                }
            }
            GattEvent::Registered(reg) => self.gatt.on_registered(&reg),
        }
    }

    /// Serve a read or write of one of our own characteristics.
    pub fn handle_access(&mut self, req: &GattAccessRequest) -> Result<AttrValue, AttError> {
        let mut out = AttrValue::new();
        self.gatt.access(req, self.store, &mut self.wifi, &mut out)?;
        Ok(out)
    }

    /// Record OTA progress and push it to the connected client, if any.
    pub fn notify_ota_progress(&mut self, percent: u8) -> Result<(), Error> {
        self.store.set_ota_progress(percent);
        match self.gap.state() {
            AdvState::Connected(conn) => self.gatt.notify_ota_progress(&mut self.host, conn, self.store),
            _ => {
                debug!("no client for OTA progress");
                Ok(())
            }
        }
    }

    pub fn gap(&self) -> &GapController {
        &self.gap
    }

    pub fn scanner(&self) -> &CentralScanner {
        &self.scanner
    }

    pub fn gatt(&self) -> &GattServer {
        &self.gatt
    }

    pub fn session(&self) -> Option<&SensorSession> {
        self.session.as_ref()
    }

    pub fn peers(&self) -> &P {
        &self.peers
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn wifi(&self) -> &W {
        &self.wifi
    }

    pub fn store(&self) -> &'d Datastore<M> {
        self.store
    }
}
