//! Central role: find the companion sensor and connect to it.
//!
//! The central never stays idle. Scanning resumes after every failed
//! connect, every disconnect and every failed scan start (with backoff).

use crate::config::{BLE_CONNECT_TIMEOUT_MS, BLE_ERR_REM_USER_CONN_TERM};
use crate::error::Error;

use super::adv::{log_adv_fields, AdvertisementRecord};
use super::gap::{forget_bond, EventOutcome};
use super::host::{log_conn_info, Backoff, BleHost, ScanParams, ScanToken, TimerId};
use super::peer::PeerStore;
use super::{ids, AdvEventType, ConnHandle, GapEvent, ScanReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanState {
    Idle,
    Scanning(ScanToken),
    Connecting,
    Connected(ConnHandle),
}

/// Result of handling one central-role event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CentralOutcome {
    Nothing,
    /// A sensor link came up; discovery has been started on it.
    LinkUp(ConnHandle),
    /// A link came up but discovery could not start; it is being terminated.
    LinkRefused(ConnHandle),
    LinkDown(ConnHandle),
    Pairing(EventOutcome),
}

/// Connect only to connectable advertisers listing the sensor discovery
/// UUID among their 128-bit service UUIDs.
pub fn should_connect(report: &ScanReport) -> bool {
    if !matches!(report.event_type, AdvEventType::AdvInd | AdvEventType::DirInd) {
        return false;
    }
    match AdvertisementRecord::parse(&report.data) {
        Ok(rec) => rec.has_uuid128(&ids::SENSOR_DISCOVERY),
        Err(_) => false,
    }
}

pub struct CentralScanner {
    state: ScanState,
    backoff: Backoff,
}

impl Default for CentralScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl CentralScanner {
    pub const fn new() -> Self {
        Self {
            state: ScanState::Idle,
            backoff: Backoff::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Forget everything after a host reset.
    pub fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.backoff.reset();
    }

    /// Start a passive, duplicate-filtered scan that runs until cancelled.
    pub fn scan<H: BleHost>(&mut self, host: &mut H) {
        match host.start_scan(&ScanParams::passive_forever()) {
            Ok(token) => {
                debug!("scanning; token={}", token.0);
                self.state = ScanState::Scanning(token);
                self.backoff.reset();
            }
            Err(e) => {
                error!("error initiating GAP discovery procedure; rc={}", e.0);
                self.state = ScanState::Idle;
                match self.backoff.next_delay() {
                    Some(delay) => host.schedule(TimerId::ScanRetry, delay),
                    None => error!("scan retries exhausted"),
                }
            }
        }
    }

    pub fn on_retry_timer<H: BleHost>(&mut self, host: &mut H) {
        if self.state == ScanState::Idle {
            self.scan(host);
        }
    }

    fn on_report<H: BleHost>(&mut self, host: &mut H, report: &ScanReport) {
        let ScanState::Scanning(token) = self.state else {
            trace!("stale scan report from {:?}", report.addr);
            return;
        };

        if let Ok(rec) = AdvertisementRecord::parse(&report.data) {
            debug!("report from {:?} rssi={}", report.addr, report.rssi);
            log_adv_fields(&rec);
        }
        if !should_connect(report) {
            return;
        }

        // Scanning must be stopped before a connection can be initiated.
        if let Err(e) = host.cancel_scan(token) {
            debug!("failed to cancel scan; rc={}", e.0);
            return;
        }
        self.state = ScanState::Idle;

        if let Err(e) = self.connect(host, report) {
            error!("failed to connect to {:?}: {:?}", report.addr, e);
            self.scan(host);
        }
    }

    fn connect<H: BleHost>(&mut self, host: &mut H, report: &ScanReport) -> Result<(), Error> {
        let own = host.own_address_type()?;
        host.connect(own, &report.addr, BLE_CONNECT_TIMEOUT_MS)?;
        info!("connecting to {:?}", report.addr);
        self.state = ScanState::Connecting;
        Ok(())
    }

    fn on_connected<H: BleHost, P: PeerStore>(
        &mut self,
        host: &mut H,
        peers: &mut P,
        conn: ConnHandle,
    ) -> Result<(), Error> {
        match host.conn_info(conn) {
            Some(info) => log_conn_info(&info),
            None => {
                error!("no descriptor for fresh connection {}", conn);
                debug_assert!(false, "connection descriptor missing right after connect");
            }
        }
        peers.add(conn)?;
        peers.discover_all(conn)?;
        host.discover_all(conn)?;
        Ok(())
    }

    pub fn handle_event<H: BleHost, P: PeerStore>(
        &mut self,
        host: &mut H,
        peers: &mut P,
        event: &GapEvent,
    ) -> CentralOutcome {
        match event {
            GapEvent::ScanReport(report) => self.on_report(host, report),
            GapEvent::Connect { conn, status } => {
                if *status != 0 {
                    error!("connection failed; status={}", status);
                    self.state = ScanState::Idle;
                    self.scan(host);
                    return CentralOutcome::Nothing;
                }
                info!("connection established; conn={}", conn);
                self.state = ScanState::Connected(*conn);
                if let Err(e) = self.on_connected(host, peers, *conn) {
                    error!("cannot start discovery on {}: {:?}", conn, e);
                    if let Err(e) = host.terminate(*conn, BLE_ERR_REM_USER_CONN_TERM) {
                        error!("cannot terminate {}: rc={}", conn, e.0);
                    }
                    return CentralOutcome::LinkRefused(*conn);
                }
                return CentralOutcome::LinkUp(*conn);
            }
            GapEvent::Disconnect { conn, reason } => {
                info!("disconnect; conn={} reason={:#x}", conn, reason);
                if peers.remove(*conn).is_err() {
                    debug!("no peer for conn={}", conn);
                }
                self.state = ScanState::Idle;
                self.scan(host);
                return CentralOutcome::LinkDown(*conn);
            }
            GapEvent::ScanComplete { reason } => {
                info!("discovery complete; reason={}", reason);
                if matches!(self.state, ScanState::Scanning(_)) {
                    self.state = ScanState::Idle;
                    self.scan(host);
                }
            }
            GapEvent::EncryptionChange { conn, status } => {
                info!("encryption change event; status={}", status);
                if let Some(info) = host.conn_info(*conn) {
                    log_conn_info(&info);
                }
            }
            GapEvent::Mtu { conn, channel, mtu } => {
                info!("mtu update event; conn={} cid={} mtu={}", conn, channel, mtu);
            }
            GapEvent::RepeatPairing { conn } => {
                return CentralOutcome::Pairing(forget_bond(host, *conn));
            }
            GapEvent::NotifyRx { conn, attr, .. } => {
                trace!("notification conn={} attr={} left to the router", conn, attr);
            }
            GapEvent::ConnUpdate { .. }
            | GapEvent::AdvertiseComplete { .. }
            | GapEvent::Subscribe { .. } => {
                trace!("central ignores peripheral event");
            }
        }
        CentralOutcome::Nothing
    }
}
