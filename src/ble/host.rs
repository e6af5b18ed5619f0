//! The BLE host collaborator seam.
//!
//! Every call returns immediately. Procedures that complete later
//! (discovery, writes, reads, connects) report back as [`HostEvent`]s.
//!
//! [`HostEvent`]: super::HostEvent

use heapless::Vec;

use crate::config::{BLE_ERR_UNSPECIFIED, BLE_RETRY_BASE_MS, BLE_RETRY_MAX_ATTEMPTS, BLE_RETRY_MAX_MS, MAX_LINKS};
use crate::error::HostError;

use super::gatt_server::ServiceDef;
use super::{Address, AddressType, AttrHandle, ConnHandle};

/// Passive, duplicate-filtered, unbounded scan parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanParams {
    pub passive: bool,
    pub filter_duplicates: bool,
    /// `None` scans until cancelled.
    pub duration_ms: Option<u32>,
}

impl ScanParams {
    pub const fn passive_forever() -> Self {
        Self {
            passive: true,
            filter_duplicates: true,
            duration_ms: None,
        }
    }
}

/// Identifies one scan run. Cancelling requires the token of the
/// run being cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanToken(pub u32);

/// One-shot timers the engine asks the host to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    AdvertiseRetry,
    ScanRetry,
}

/// Connection descriptor, as returned by the host for a live link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnInfo {
    pub conn: ConnHandle,
    pub our_id_addr: Address,
    pub peer_ota_addr: Address,
    pub peer_id_addr: Address,
    pub interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
    pub encrypted: bool,
    pub authenticated: bool,
    pub bonded: bool,
}

/// Operations the engine needs from the BLE host stack.
pub trait BleHost {
    /// Replace the advertising PDU payload.
    fn set_adv_data(&mut self, data: &[u8]) -> Result<(), HostError>;
    /// Replace the scan response payload.
    fn set_scan_response(&mut self, data: &[u8]) -> Result<(), HostError>;
    /// Start undirected connectable advertising with no time limit.
    fn start_advertising(&mut self) -> Result<(), HostError>;

    /// Address type to use for our own side (no privacy).
    fn own_address_type(&mut self) -> Result<AddressType, HostError>;

    fn start_scan(&mut self, params: &ScanParams) -> Result<ScanToken, HostError>;
    fn cancel_scan(&mut self, token: ScanToken) -> Result<(), HostError>;

    fn connect(
        &mut self,
        own: AddressType,
        peer: &Address,
        timeout_ms: u32,
    ) -> Result<(), HostError>;
    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError>;

    /// Discover every service, characteristic and descriptor of `conn`.
    fn discover_all(&mut self, conn: ConnHandle) -> Result<(), HostError>;
    fn write(&mut self, conn: ConnHandle, attr: AttrHandle, data: &[u8])
        -> Result<(), HostError>;
    fn read(&mut self, conn: ConnHandle, attr: AttrHandle) -> Result<(), HostError>;
    fn notify(&mut self, conn: ConnHandle, attr: AttrHandle, data: &[u8])
        -> Result<(), HostError>;

    /// Forget the bond stored for `peer`.
    fn delete_bond(&mut self, peer: &Address) -> Result<(), HostError>;
    fn conn_info(&self, conn: ConnHandle) -> Option<ConnInfo>;

    /// Hand the local GATT table to the host. Called once at boot.
    fn register_services(&mut self, services: &'static [ServiceDef]) -> Result<(), HostError>;

    /// Deliver `HostEvent::TimerExpired(timer)` after `delay_ms`.
    fn schedule(&mut self, timer: TimerId, delay_ms: u32);
}

/// Bounded exponential backoff for restarting advertising / scanning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Backoff {
    attempts: u8,
}

impl Backoff {
    pub const fn new() -> Self {
        Self { attempts: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<u32> {
        if self.attempts >= BLE_RETRY_MAX_ATTEMPTS {
            return None;
        }
        let delay = BLE_RETRY_BASE_MS
            .saturating_mul(1u32 << self.attempts)
            .min(BLE_RETRY_MAX_MS);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }
}

/// Software duplicate filter for hosts whose controller reports every
/// advertisement. An address is marked only once its report has been
/// delivered, so a dropped report does not hide the advertiser.
#[derive(Clone, Debug, Default)]
pub struct DuplicateFilter<const N: usize> {
    seen: Vec<Address, N>,
}

impl<const N: usize> DuplicateFilter<N> {
    pub const fn new() -> Self {
        Self { seen: Vec::new() }
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.seen.contains(addr)
    }

    /// Remember `addr`, evicting the oldest address when full.
    pub fn mark(&mut self, addr: Address) {
        if self.contains(&addr) {
            return;
        }
        if self.seen.is_full() {
            self.seen.remove(0);
        }
        let _ = self.seen.push(addr);
    }
}

/// HCI reasons of the links we terminated ourselves, until their
/// disconnect is reported.
///
/// A link that drops without an entry went down for a reason the radio
/// did not report and is given [`BLE_ERR_UNSPECIFIED`].
#[derive(Clone, Debug, Default)]
pub struct TerminateLog {
    pending: Vec<(ConnHandle, u8), MAX_LINKS>,
}

impl TerminateLog {
    pub const fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn record(&mut self, conn: ConnHandle, reason: u8) {
        if let Some(entry) = self.pending.iter_mut().find(|(c, _)| *c == conn) {
            entry.1 = reason;
            return;
        }
        if self.pending.is_full() {
            self.pending.remove(0);
        }
        let _ = self.pending.push((conn, reason));
    }

    /// Reason to report for the disconnect of `conn`. Clears the entry.
    pub fn take(&mut self, conn: ConnHandle) -> u8 {
        match self.pending.iter().position(|(c, _)| *c == conn) {
            Some(i) => self.pending.swap_remove(i).1,
            None => BLE_ERR_UNSPECIFIED,
        }
    }
}

/// Log a connection descriptor at debug level.
pub(crate) fn log_conn_info(info: &ConnInfo) {
    debug!(
        "handle={} our_id_addr={:?} peer_ota_addr={:?} peer_id_addr={:?}",
        info.conn,
        info.our_id_addr,
        info.peer_ota_addr,
        info.peer_id_addr
    );
    debug!(
        "conn_itvl={} conn_latency={} supervision_timeout={} encrypted={} authenticated={} bonded={}",
        info.interval,
        info.latency,
        info.supervision_timeout,
        info.encrypted,
        info.authenticated,
        info.bonded
    );
}
