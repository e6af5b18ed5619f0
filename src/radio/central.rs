//! Central role: scanning, connecting and GATT client procedures on the
//! companion-sensor link.

use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_time::{with_timeout, Duration};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{self, Characteristic, Client, Descriptor, DiscoverError, HvxType};
use nrf_softdevice::ble::{central, Connection};
use nrf_softdevice::{raw, Softdevice};

use tkos_ble::ble::host::DuplicateFilter;
use tkos_ble::ble::peer::ServiceSpan;
use tkos_ble::ble::uuid::Uuid;
use tkos_ble::ble::{
    attr_value, ids, AdvData, AdvEventType, Address, AttrHandle, AttrValue, ConnHandle,
    DiscoveredAttribute, GapEvent, GattEvent, HostEvent, ScanReport,
};
use tkos_ble::config::{
    ATT_VALUE_MAX, BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN, BLE_SLAVE_LATENCY, BLE_SUP_TIMEOUT,
    SCAN_DUPLICATE_FILTER,
};
use tkos_ble::{ScanParams, ScanToken};

use super::{
    bond, disconnect_reason, from_sd_address, post, post_now, to_sd_address, to_sd_uuid, CentralCommand,
    CENTRAL_CMDS, SCAN_CANCEL,
};

/// ATT "unlikely error", reported for any failed client procedure.
const ATT_UNLIKELY: u16 = 0x0E;

/// Characteristics reported back from discovery; anything else is skipped.
const SENSOR_CHARACTERISTICS: [Uuid; 5] = [
    ids::ENGINE_RPM_RPM,
    ids::ENGINE_TEMPERATURE_ENGINE,
    ids::LOCATION_GPS_AVAILABLE,
    ids::LOCATION_SPEED_KPH,
    ids::LOCATION_GPS_TIME,
];

/// A notification as it leaves the SoftDevice callback.
pub struct Hvx {
    handle: AttrHandle,
    indication: bool,
    data: AttrValue,
}

/// Collects the sensor characteristics of the service `SVC`.
///
/// `gatt_client::discover` hands a client characteristics only, so the
/// service range is rebuilt from them.
pub struct ProbeClient<const SVC: u128> {
    span: ServiceSpan,
    characteristics: Vec<(Uuid, AttrHandle, AttrHandle), 4>,
    cccds: Vec<(AttrHandle, AttrHandle), 4>,
}

impl<const SVC: u128> ProbeClient<SVC> {
    fn known(uuid: Option<nrf_softdevice::ble::Uuid>) -> Option<Uuid> {
        let uuid = uuid?;
        SENSOR_CHARACTERISTICS
            .iter()
            .copied()
            .find(|known| to_sd_uuid(known) == uuid)
    }

    /// Report what was found, service first. A service without
    /// characteristics has nothing to subscribe to and is not reported.
    async fn report(&self, conn: ConnHandle) {
        let Some((service_start, end_handle)) = self.span.range() else {
            debug!("service {:?} is empty", Uuid::from_u128(SVC));
            return;
        };
        let discovered = |attribute| HostEvent::Gatt(GattEvent::Discovered { conn, attribute });
        post(discovered(DiscoveredAttribute::Service {
            uuid: Uuid::from_u128(SVC),
            start_handle: service_start,
            end_handle,
        }))
        .await;
        for &(uuid, def_handle, val_handle) in &self.characteristics {
            post(discovered(DiscoveredAttribute::Characteristic {
                service_start,
                uuid,
                def_handle,
                val_handle,
                properties: 0,
            }))
            .await;
        }
        for &(chr_val_handle, handle) in &self.cccds {
            post(discovered(DiscoveredAttribute::Descriptor {
                chr_val_handle,
                uuid: ids::CCCD,
                handle,
            }))
            .await;
        }
    }
}

impl<const SVC: u128> Client for ProbeClient<SVC> {
    type Event = Hvx;

    fn on_hvx(&self, _conn: &Connection, type_: HvxType, handle: u16, data: &[u8]) -> Option<Hvx> {
        Some(Hvx {
            handle,
            indication: matches!(type_, HvxType::Indication),
            data: attr_value(data).ok()?,
        })
    }

    fn uuid() -> nrf_softdevice::ble::Uuid {
        to_sd_uuid(&Uuid::from_u128(SVC))
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self {
            span: ServiceSpan::new(),
            characteristics: Vec::new(),
            cccds: Vec::new(),
        }
    }

    fn discovered_characteristic(&mut self, characteristic: &Characteristic, descriptors: &[Descriptor]) {
        self.span.cover(characteristic.handle_decl);
        self.span.cover(characteristic.handle_value);
        for d in descriptors {
            self.span.cover(d.handle);
        }
        let Some(uuid) = Self::known(characteristic.uuid) else {
            return;
        };
        let _ = self
            .characteristics
            .push((uuid, characteristic.handle_decl, characteristic.handle_value));
        let cccd = to_sd_uuid(&ids::CCCD);
        if let Some(d) = descriptors.iter().find(|d| d.uuid == Some(cccd)) {
            let _ = self.cccds.push((characteristic.handle_value, d.handle));
        }
    }

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }
}

type NotifyClient = ProbeClient<{ ids::ENGINE_RPM.as_u128() }>;

/// Discover one sensor service. A missing service is not an error.
async fn probe<const SVC: u128>(conn: &Connection, handle: ConnHandle) -> Result<(), DiscoverError> {
    match gatt_client::discover::<ProbeClient<SVC>>(conn).await {
        Ok(client) => {
            client.report(handle).await;
            Ok(())
        }
        Err(DiscoverError::ServiceNotFound) => {
            debug!("service {:?} not on peer", Uuid::from_u128(SVC));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Walk the engine and location services. Returns the ATT status.
async fn discover_sensor(conn: &Connection, handle: ConnHandle) -> u16 {
    let result = async {
        probe::<{ ids::ENGINE_RPM.as_u128() }>(conn, handle).await?;
        probe::<{ ids::ENGINE_TEMPERATURE.as_u128() }>(conn, handle).await?;
        probe::<{ ids::LOCATION.as_u128() }>(conn, handle).await
    }
    .await;
    match result {
        Ok(()) => 0,
        Err(e) => {
            warn!("discovery failed: {:?}", e);
            ATT_UNLIKELY
        }
    }
}

fn event_type(report: &raw::ble_gap_evt_adv_report_t) -> AdvEventType {
    let t = &report.type_;
    if t.scan_response() != 0 {
        AdvEventType::ScanRsp
    } else if t.directed() != 0 {
        AdvEventType::DirInd
    } else if t.connectable() != 0 {
        AdvEventType::AdvInd
    } else if t.scannable() != 0 {
        AdvEventType::ScanInd
    } else {
        AdvEventType::NonconnInd
    }
}

async fn wait_cancel(token: ScanToken) {
    while SCAN_CANCEL.wait().await != token {}
}

async fn scan(sd: &Softdevice, token: ScanToken, params: ScanParams) {
    let config = central::ScanConfig {
        active: !params.passive,
        timeout: params.duration_ms.map_or(0, |ms| (ms / 10).min(u32::from(u16::MAX)) as u16),
        ..Default::default()
    };
    let mut seen = DuplicateFilter::<SCAN_DUPLICATE_FILTER>::new();
    debug!("scan {} starting", token.0);

    let run = central::scan(sd, &config, |report| {
        let addr = from_sd_address(nrf_softdevice::ble::Address::from_raw(report.peer_addr));
        if params.filter_duplicates && seen.contains(&addr) {
            return None;
        }
        let data = unsafe { core::slice::from_raw_parts(report.data.p_data, report.data.len as usize) };
        let delivered = post_now(HostEvent::Central(GapEvent::ScanReport(ScanReport {
            event_type: event_type(report),
            addr,
            rssi: report.rssi,
            data: AdvData::from_slice(data).unwrap_or_default(),
        })));
        if delivered && params.filter_duplicates {
            seen.mark(addr);
        }
        None::<()>
    });

    match select(run, wait_cancel(token)).await {
        Either::First(Ok(())) => post(HostEvent::Central(GapEvent::ScanComplete { reason: 0 })).await,
        Either::First(Err(central::ScanError::Timeout)) => {
            post(HostEvent::Central(GapEvent::ScanComplete { reason: 0 })).await
        }
        Either::First(Err(e)) => {
            warn!("scan failed: {:?}", e);
            post(HostEvent::Central(GapEvent::ScanComplete { reason: 1 })).await
        }
        Either::Second(()) => debug!("scan {} cancelled", token.0),
    }
}

async fn connect(sd: &Softdevice, peer: &Address, timeout_ms: u32) -> Option<Connection> {
    let addr = to_sd_address(peer);
    let whitelist = [&addr];
    let conn_cfg = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: BLE_CONN_INTERVAL_MIN,
            max_conn_interval: BLE_CONN_INTERVAL_MAX,
            slave_latency: BLE_SLAVE_LATENCY,
            conn_sup_timeout: BLE_SUP_TIMEOUT,
        },
        ..Default::default()
    };

    let attempt = central::connect_with_security(sd, &conn_cfg, bond::bonder());
    match with_timeout(Duration::from_millis(u64::from(timeout_ms)), attempt).await {
        Ok(Ok(conn)) => Some(conn),
        Ok(Err(e)) => {
            warn!("connect to {:?} failed: {:?}", peer, e);
            None
        }
        Err(_) => {
            warn!("connect to {:?} timed out", peer);
            None
        }
    }
}

/// Serve GATT client commands until the link drops.
async fn serve(conn: &Connection, handle: ConnHandle) -> ! {
    loop {
        match CENTRAL_CMDS.receive().await {
            CentralCommand::DiscoverAll(c) if c == handle => {
                let status = discover_sensor(conn, handle).await;
                post(HostEvent::Gatt(GattEvent::DiscoveryComplete { conn: handle, status })).await;
            }
            CentralCommand::Write { conn: c, attr, data } if c == handle => {
                let status = match gatt_client::write(conn, attr, &data).await {
                    Ok(()) => 0,
                    Err(e) => {
                        warn!("write {} failed: {:?}", attr, e);
                        ATT_UNLIKELY
                    }
                };
                post(HostEvent::Gatt(GattEvent::WriteComplete { conn: handle, attr, status })).await;
            }
            CentralCommand::Read { conn: c, attr } if c == handle => {
                let mut buf = [0u8; ATT_VALUE_MAX];
                let (status, value) = match gatt_client::read(conn, attr, &mut buf).await {
                    Ok(n) => (0, attr_value(&buf[..n]).ok()),
                    Err(e) => {
                        warn!("read {} failed: {:?}", attr, e);
                        (ATT_UNLIKELY, None)
                    }
                };
                post(HostEvent::Gatt(GattEvent::ReadComplete {
                    conn: handle,
                    attr,
                    status,
                    value,
                }))
                .await;
            }
            CentralCommand::Scan { token, .. } => warn!("scan {} refused while linked", token.0),
            CentralCommand::Connect { peer, .. } => {
                warn!("already linked, not connecting to {:?}", peer);
                post(HostEvent::Central(GapEvent::Connect {
                    conn: 0,
                    status: raw::BLE_HCI_CONN_FAILED_TO_BE_ESTABLISHED as u8,
                }))
                .await;
            }
            _ => debug!("command for a closed link dropped"),
        }
    }
}

async fn run_link(conn: Connection) {
    let Some(handle) = conn.handle() else {
        return;
    };
    info!("sensor connected; conn={}", handle);
    post(HostEvent::Central(GapEvent::Connect { conn: handle, status: 0 })).await;

    let client = NotifyClient::new_undiscovered(conn.clone());
    let notifications = gatt_client::run(&conn, &client, |hvx| {
        post_now(HostEvent::Central(GapEvent::NotifyRx {
            conn: handle,
            attr: hvx.handle,
            indication: hvx.indication,
            data: hvx.data,
        }));
    });
    select(notifications, serve(&conn, handle)).await;
    info!("sensor disconnected; conn={}", handle);
    post(HostEvent::Central(GapEvent::Disconnect {
        conn: handle,
        reason: disconnect_reason(handle),
    }))
    .await;
}

#[embassy_executor::task]
pub async fn central_task(sd: &'static Softdevice) -> ! {
    loop {
        match CENTRAL_CMDS.receive().await {
            CentralCommand::Scan { token, params } => scan(sd, token, params).await,
            CentralCommand::Connect { peer, timeout_ms } => match connect(sd, &peer, timeout_ms).await {
                Some(conn) => run_link(conn).await,
                None => {
                    post(HostEvent::Central(GapEvent::Connect {
                        conn: 0,
                        status: raw::BLE_HCI_CONN_FAILED_TO_BE_ESTABLISHED as u8,
                    }))
                    .await
                }
            },
            _ => debug!("no link; command dropped"),
        }
    }
}
