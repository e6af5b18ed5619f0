//! GAP controller for the peripheral role.
//!
//! Advertising is self-renewing: every disconnect, failed connect and
//! advertise-complete puts it back on air. A failed start is retried with
//! [`Backoff`] through the host timer.

use core::fmt::Write;

use heapless::String;

use crate::config::BLE_ADV_TX_POWER_DBM;
use crate::error::Error;

use super::adv::{AdvFields, AdvPayload};
use super::host::{log_conn_info, Backoff, BleHost, TimerId};
use super::uuid::Uuid;
use super::{ids, Address, ConnHandle, GapEvent};

/// Service UUIDs put on air.
pub const ADVERTISED_UUIDS_128: &[Uuid] = &[ids::OTA_SERVICE];
pub const ADVERTISED_UUIDS_16: &[Uuid] = &[ids::DEVICE_INFO];

/// What the host should do after an event was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventOutcome {
    Done,
    /// The old bond was dropped; let the pairing procedure run again.
    RetryPairing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvState {
    Idle,
    Advertising,
    Connected(ConnHandle),
}

/// `"<prefix>-XXYYZZ"` from the last three bytes of the MAC address.
pub fn device_name(prefix: &str, mac: &Address) -> String<32> {
    let b = &mac.bytes;
    let mut name = String::new();
    if write!(name, "{}-{:02X}{:02X}{:02X}", prefix, b[2], b[1], b[0]).is_err() {
        warn!("device name truncated");
    }
    name
}

/// A bonded peer is pairing again: drop the old bond and let it.
pub(crate) fn forget_bond<H: BleHost>(host: &mut H, conn: ConnHandle) -> EventOutcome {
    match host.conn_info(conn) {
        Some(info) => {
            if let Err(e) = host.delete_bond(&info.peer_id_addr) {
                warn!("cannot delete bond: rc={}", e.0);
            }
        }
        None => warn!("repeat pairing on unknown connection {}", conn),
    }
    EventOutcome::RetryPairing
}

pub struct GapController {
    name: String<32>,
    payload: Option<AdvPayload>,
    state: AdvState,
    backoff: Backoff,
}

impl GapController {
    pub fn new(prefix: &str, mac: &Address) -> Self {
        let name = device_name(prefix, mac);
        info!("name is \"{}\"", name.as_str());

        let fields = AdvFields {
            name: &name,
            uuids128: ADVERTISED_UUIDS_128,
            uuids16: ADVERTISED_UUIDS_16,
            tx_power: BLE_ADV_TX_POWER_DBM,
        };
        if fields.check().is_err() {
            warn!("advertising more than two 128-bit or one 16-bit service UUID is not supported, extras dropped");
        }
        let payload = match fields.encode() {
            Ok(p) => Some(p),
            Err(e) => {
                error!("cannot encode advertising data: {:?}", e);
                None
            }
        };

        Self {
            name,
            payload,
            state: AdvState::Idle,
            backoff: Backoff::new(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AdvState {
        self.state
    }

    /// Forget everything after a host reset.
    pub fn reset(&mut self) {
        self.state = AdvState::Idle;
        self.backoff.reset();
    }

    /// Set advertising fields and go on air.
    pub fn advertise<H: BleHost>(&mut self, host: &mut H) {
        match self.try_advertise(host) {
            Ok(()) => {
                debug!("advertising as \"{}\"", self.name.as_str());
                self.state = AdvState::Advertising;
                self.backoff.reset();
            }
            Err(e) => {
                error!("cannot start advertising: {:?}", e);
                self.state = AdvState::Idle;
                match self.backoff.next_delay() {
                    Some(delay) => host.schedule(TimerId::AdvertiseRetry, delay),
                    None => error!("advertising retries exhausted"),
                }
            }
        }
    }

    fn try_advertise<H: BleHost>(&self, host: &mut H) -> Result<(), Error> {
        let payload = self.payload.as_ref().ok_or(Error::AdvertisingPayloadTooLong)?;
        host.set_adv_data(&payload.adv_data)?;
        host.set_scan_response(&payload.scan_data)?;
        host.start_advertising()?;
        Ok(())
    }

    /// The advertise retry timer fired.
    pub fn on_retry_timer<H: BleHost>(&mut self, host: &mut H) {
        if self.state == AdvState::Idle {
            self.advertise(host);
        }
    }

    pub fn handle_event<H: BleHost>(&mut self, host: &mut H, event: &GapEvent) -> EventOutcome {
        match *event {
            GapEvent::Connect { conn, status } => {
                if status == 0 {
                    info!("peripheral connection established; conn={}", conn);
                    self.state = AdvState::Connected(conn);
                    match host.conn_info(conn) {
                        Some(info) => log_conn_info(&info),
                        None => {
                            error!("no descriptor for fresh connection {}", conn);
                            debug_assert!(false, "connection descriptor missing right after connect");
                        }
                    }
                } else {
                    warn!("peripheral connection failed; status={}", status);
                    self.state = AdvState::Idle;
                    self.advertise(host);
                }
            }
            GapEvent::Disconnect { conn, reason } => {
                info!("peripheral disconnect; conn={} reason={:#x}", conn, reason);
                self.state = AdvState::Idle;
                self.advertise(host);
            }
            GapEvent::AdvertiseComplete { reason } => {
                info!("advertise complete; reason={}", reason);
                self.advertise(host);
            }
            GapEvent::RepeatPairing { conn } => return forget_bond(host, conn),
            GapEvent::EncryptionChange { conn, status } => {
                info!("encryption change; conn={} status={}", conn, status);
                if let Some(info) = host.conn_info(conn) {
                    log_conn_info(&info);
                }
            }
            GapEvent::ConnUpdate { conn, status } => {
                info!("connection updated; conn={} status={}", conn, status);
                if let Some(info) = host.conn_info(conn) {
                    log_conn_info(&info);
                }
            }
            GapEvent::Mtu { conn, channel, mtu } => {
                info!("mtu update; conn={} cid={} mtu={}", conn, channel, mtu);
            }
            GapEvent::Subscribe {
                conn,
                attr,
                reason,
                prev_notify,
                cur_notify,
                prev_indicate,
                cur_indicate,
            } => {
                info!(
                    "subscribe; conn={} attr={} reason={} prvn={} curn={} previ={} curi={}",
                    conn, attr, reason, prev_notify, cur_notify, prev_indicate, cur_indicate
                );
            }
            GapEvent::ScanReport(_) | GapEvent::ScanComplete { .. } | GapEvent::NotifyRx { .. } => {
                trace!("peripheral ignores central event");
            }
        }
        EventOutcome::Done
    }
}
