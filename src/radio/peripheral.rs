//! Peripheral role: advertising and the local GATT server.

use core::cell::Cell;

use defmt::{debug, info, warn};
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Timer;
use heapless::Vec;
use nrf_softdevice::ble::gatt_server::{self, WriteOp};
use nrf_softdevice::ble::peripheral::{self, ConnectableAdvertisement};
use nrf_softdevice::ble::{Connection, TxPower};
use nrf_softdevice::Softdevice;

use tkos_ble::ble::gatt_server::CharKind;
use tkos_ble::ble::uuid::Uuid;
use tkos_ble::ble::{attr_value, AccessOp, Address, AttrHandle, GapEvent, GattAccessRequest, HostEvent};
use tkos_ble::config::{BLE_RETRY_BASE_MS, GATT_REFRESH_MS};
use tkos_ble::Datastore;

use super::{bond, disconnect_reason, local_value, post, post_now, AdvertiseRequest, PERIPHERAL_CMDS};

const MAX_LOCAL_ATTRS: usize = 16;

struct LocalAttr {
    uuid: Uuid,
    kind: CharKind,
    value_handle: AttrHandle,
    cccd_handle: Option<AttrHandle>,
    /// Last CCCD value written by the client.
    cccd: Cell<u16>,
}

/// Handle map of the registered GATT table.
pub struct LocalServer {
    attrs: Vec<LocalAttr, MAX_LOCAL_ATTRS>,
}

impl LocalServer {
    pub fn new() -> Self {
        Self { attrs: Vec::new() }
    }

    pub fn push(&mut self, uuid: Uuid, kind: CharKind, value_handle: AttrHandle, cccd_handle: Option<AttrHandle>) {
        let attr = LocalAttr {
            uuid,
            kind,
            value_handle,
            cccd_handle,
            cccd: Cell::new(0),
        };
        if self.attrs.push(attr).is_err() {
            warn!("local attribute table full, {:?} not mapped", uuid);
        }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Copy the datastore-backed values into the SoftDevice so plain
    /// reads, which the SoftDevice answers on its own, stay current.
    pub fn refresh(&self, sd: &Softdevice, mac: &Address, store: &Datastore<CriticalSectionRawMutex>) {
        for attr in &self.attrs {
            let Some(value) = local_value(attr.kind, mac, store) else {
                continue;
            };
            if let Err(e) = gatt_server::set_value(sd, attr.value_handle, &value) {
                warn!("set_value {:?} failed: {:?}", attr.uuid, e);
            }
        }
    }

    fn reset_subscriptions(&self) {
        for attr in &self.attrs {
            attr.cccd.set(0);
        }
    }
}

impl gatt_server::Server for LocalServer {
    type Event = HostEvent;

    fn on_write(
        &self,
        conn: &Connection,
        handle: u16,
        _op: WriteOp,
        _offset: usize,
        data: &[u8],
    ) -> Option<HostEvent> {
        let conn = conn.handle()?;
        for attr in &self.attrs {
            if attr.value_handle == handle {
                return Some(HostEvent::Access(GattAccessRequest {
                    conn,
                    characteristic: attr.uuid,
                    op: AccessOp::Write,
                    data: attr_value(data).ok()?,
                }));
            }
            if attr.cccd_handle == Some(handle) {
                let value = match data {
                    [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
                    [lo] => u16::from(*lo),
                    [] => 0,
                };
                let prev = attr.cccd.replace(value);
                return Some(HostEvent::Peripheral(GapEvent::Subscribe {
                    conn,
                    attr: attr.value_handle,
                    reason: 1,
                    prev_notify: prev & 0x01 != 0,
                    cur_notify: value & 0x01 != 0,
                    prev_indicate: prev & 0x02 != 0,
                    cur_indicate: value & 0x02 != 0,
                }));
            }
        }
        debug!("write to unmapped handle {}", handle);
        None
    }
}

/// Advertise on request and serve one client at a time.
#[embassy_executor::task]
pub async fn peripheral_task(
    sd: &'static Softdevice,
    server: &'static LocalServer,
    store: &'static Datastore<CriticalSectionRawMutex>,
    mac: Address,
) -> ! {
    loop {
        let AdvertiseRequest { adv_data, scan_data } = PERIPHERAL_CMDS.receive().await;
        let adv = ConnectableAdvertisement::ScannableUndirected {
            adv_data: &adv_data,
            scan_data: &scan_data,
        };
        let config = peripheral::Config {
            tx_power: TxPower::Plus8dBm,
            ..Default::default()
        };

        let conn = match peripheral::advertise_pairable(sd, adv, &config, bond::bonder()).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("advertising stopped: {:?}", e);
                Timer::after_millis(u64::from(BLE_RETRY_BASE_MS)).await;
                post(HostEvent::Peripheral(GapEvent::AdvertiseComplete { reason: 1 })).await;
                continue;
            }
        };
        let Some(handle) = conn.handle() else {
            continue;
        };
        info!("client connected; conn={}", handle);
        post(HostEvent::Peripheral(GapEvent::Connect { conn: handle, status: 0 })).await;

        let refresh = async {
            loop {
                server.refresh(sd, &mac, store);
                Timer::after_millis(GATT_REFRESH_MS).await;
            }
        };
        let events = gatt_server::run(&conn, server, |event| {
            post_now(event);
        });
        select(events, refresh).await;

        server.reset_subscriptions();
        post(HostEvent::Peripheral(GapEvent::Disconnect {
            conn: handle,
            reason: disconnect_reason(handle),
        }))
        .await;
    }
}
