//! SoftDevice adapter: implements [`BleHost`] for the nRF52840.
//!
//! The engine runs on the host task and must never block, so every
//! [`BleHost`] call either completes synchronously against the SoftDevice
//! or is queued to the task owning that role:
//!
//! * advertising          -> [`peripheral::peripheral_task`]
//! * scan / connect / GATT client procedures -> [`central::central_task`]
//! * retry timers         -> [`retry_timer`]
//!
//! Completions come back through [`EVENTS`].

pub mod bond;
pub mod central;
pub mod peripheral;
pub mod softap;

use core::cell::RefCell;

use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute, Metadata, Properties};
use nrf_softdevice::ble::gatt_server::{self, RegisterError};
use nrf_softdevice::ble::{self as sd_ble, Connection, SecurityMode};
use nrf_softdevice::{raw, Softdevice};
use static_cell::StaticCell;

use tkos_ble::ble::gatt_server::{
    read_characteristic, CharKind, ServiceDef, FLAG_NOTIFY, FLAG_READ, FLAG_WRITE,
};
use tkos_ble::ble::host::{ConnInfo, TerminateLog};
use tkos_ble::ble::uuid::Uuid;
use tkos_ble::ble::{
    ids, AdvData, Address, AddressType, AttrHandle, AttrValue, ConnHandle, GattEvent, HostEvent,
    Registration,
};
use tkos_ble::config::{CENTRAL_CMD_QUEUE, HOST_EVENT_QUEUE};
use tkos_ble::{BleHost, Datastore, HostError, ScanParams, ScanToken, TimerId};

use self::peripheral::LocalServer;

/// Events for the host task.
pub static EVENTS: Channel<CriticalSectionRawMutex, HostEvent, HOST_EVENT_QUEUE> = Channel::new();

/// Work for the central task.
pub enum CentralCommand {
    Scan { token: ScanToken, params: ScanParams },
    Connect { peer: Address, timeout_ms: u32 },
    DiscoverAll(ConnHandle),
    Write {
        conn: ConnHandle,
        attr: AttrHandle,
        data: AttrValue,
    },
    Read { conn: ConnHandle, attr: AttrHandle },
}

/// One advertising run for the peripheral task.
pub struct AdvertiseRequest {
    pub adv_data: AdvData,
    pub scan_data: AdvData,
}

pub static CENTRAL_CMDS: Channel<CriticalSectionRawMutex, CentralCommand, CENTRAL_CMD_QUEUE> = Channel::new();
pub static PERIPHERAL_CMDS: Channel<CriticalSectionRawMutex, AdvertiseRequest, 1> = Channel::new();

/// Token of the scan to stop.
pub static SCAN_CANCEL: Signal<CriticalSectionRawMutex, ScanToken> = Signal::new();

static ADV_RETRY: Signal<CriticalSectionRawMutex, u32> = Signal::new();
static SCAN_RETRY: Signal<CriticalSectionRawMutex, u32> = Signal::new();

static TERMINATIONS: Mutex<CriticalSectionRawMutex, RefCell<TerminateLog>> =
    Mutex::new(RefCell::new(TerminateLog::new()));

/// Post from a callback that cannot await. Returns `false` if the event
/// was dropped.
pub fn post_now(event: HostEvent) -> bool {
    if EVENTS.try_send(event).is_err() {
        warn!("host event queue full, event dropped");
        return false;
    }
    true
}

pub async fn post(event: HostEvent) {
    EVENTS.send(event).await;
}

fn busy() -> HostError {
    HostError(raw::NRF_ERROR_BUSY as i32)
}

fn invalid_state() -> HostError {
    HostError(raw::NRF_ERROR_INVALID_STATE as i32)
}

/// HCI reason to report for a link that just went down.
///
/// nrf-softdevice ends `gatt_server::run`/`gatt_client::run` with a bare
/// `DisconnectedError`, so only the reasons we sent ourselves are known.
pub fn disconnect_reason(conn: ConnHandle) -> u8 {
    TERMINATIONS.lock(|log| log.borrow_mut().take(conn))
}

pub fn to_sd_uuid(uuid: &Uuid) -> sd_ble::Uuid {
    match uuid.as_u16() {
        Some(short) => sd_ble::Uuid::new_16(short),
        None => sd_ble::Uuid::new_128(&uuid.to_le_bytes()),
    }
}

pub fn to_sd_address(addr: &Address) -> sd_ble::Address {
    let kind = match addr.kind {
        AddressType::Public => sd_ble::AddressType::Public,
        AddressType::Random => sd_ble::AddressType::RandomStatic,
    };
    sd_ble::Address::new(kind, addr.bytes)
}

pub fn from_sd_address(addr: sd_ble::Address) -> Address {
    let kind = match addr.address_type() {
        sd_ble::AddressType::Public => AddressType::Public,
        _ => AddressType::Random,
    };
    Address::new(kind, addr.bytes())
}

/// Our identity address, as programmed in FICR.
pub fn local_address(sd: &Softdevice) -> Address {
    from_sd_address(sd_ble::get_address(sd))
}

/// Set the GAP Device Name characteristic to the advertised name.
pub fn set_gap_device_name(name: &str) {
    let mut perm: raw::ble_gap_conn_sec_mode_t = unsafe { core::mem::zeroed() };
    perm.set_sm(0);
    perm.set_lv(0);
    let ret = unsafe {
        raw::sd_ble_gap_device_name_set(&perm as *const _, name.as_ptr(), name.len() as u16)
    };
    if ret != raw::NRF_SUCCESS {
        warn!("sd_ble_gap_device_name_set err {}", ret);
    }
}

pub struct RadioHost {
    sd: Option<&'static mut Softdevice>,
    server: Option<&'static LocalServer>,
    store: &'static Datastore<CriticalSectionRawMutex>,
    mac: Address,
    adv_data: AdvData,
    scan_data: AdvData,
    next_token: u32,
}

impl RadioHost {
    pub fn new(
        sd: &'static mut Softdevice,
        store: &'static Datastore<CriticalSectionRawMutex>,
        mac: Address,
    ) -> Self {
        Self {
            sd: Some(sd),
            server: None,
            store,
            mac,
            adv_data: AdvData::new(),
            scan_data: AdvData::new(),
            next_token: 1,
        }
    }

    /// Give up exclusive SoftDevice access once the GATT table is built.
    /// Returns `None` if called twice or before registration.
    pub fn release(&mut self) -> Option<(&'static Softdevice, &'static LocalServer)> {
        let server = self.server?;
        let sd: &'static Softdevice = self.sd.take()?;
        Some((sd, server))
    }

    fn build_service(
        sd: &mut Softdevice,
        svc: &ServiceDef,
        mac: &Address,
        store: &Datastore<CriticalSectionRawMutex>,
        server: &mut LocalServer,
    ) -> Result<(), RegisterError> {
        let mut builder = ServiceBuilder::new(sd, to_sd_uuid(&svc.uuid))?;
        for chr in svc.characteristics {
            let initial = local_value(chr.kind, mac, store).unwrap_or_default();
            let mut props = Properties::new();
            if chr.flags & FLAG_READ != 0 {
                props = props.read();
            }
            if chr.flags & FLAG_WRITE != 0 {
                props = props.write();
            }
            if chr.flags & FLAG_NOTIFY != 0 {
                props = props.notify();
            }
            let attr = Attribute::new(initial.as_slice()).variable_len(chr.max_len);
            let handles = builder
                .add_characteristic(to_sd_uuid(&chr.uuid), attr, Metadata::new(props))?
                .build();

            post_now(HostEvent::Gatt(GattEvent::Registered(Registration::Characteristic {
                uuid: chr.uuid,
                def_handle: handles.value_handle - 1,
                val_handle: handles.value_handle,
            })));
            let cccd = (handles.cccd_handle != 0).then_some(handles.cccd_handle);
            if let Some(handle) = cccd {
                post_now(HostEvent::Gatt(GattEvent::Registered(Registration::Descriptor {
                    uuid: ids::CCCD,
                    handle,
                })));
            }
            server.push(chr.uuid, chr.kind, handles.value_handle, cccd);
        }
        let service = builder.build();
        debug!("service {:?} at {}", svc.uuid, service.handle());
        post_now(HostEvent::Gatt(GattEvent::Registered(Registration::Service {
            uuid: svc.uuid,
            handle: service.handle(),
        })));
        Ok(())
    }
}

impl BleHost for RadioHost {
    fn set_adv_data(&mut self, data: &[u8]) -> Result<(), HostError> {
        self.adv_data = AdvData::from_slice(data).map_err(|_| HostError(raw::NRF_ERROR_INVALID_LENGTH as i32))?;
        Ok(())
    }

    fn set_scan_response(&mut self, data: &[u8]) -> Result<(), HostError> {
        self.scan_data = AdvData::from_slice(data).map_err(|_| HostError(raw::NRF_ERROR_INVALID_LENGTH as i32))?;
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), HostError> {
        PERIPHERAL_CMDS
            .try_send(AdvertiseRequest {
                adv_data: self.adv_data.clone(),
                scan_data: self.scan_data.clone(),
            })
            .map_err(|_| busy())
    }

    fn own_address_type(&mut self) -> Result<AddressType, HostError> {
        Ok(self.mac.kind)
    }

    fn start_scan(&mut self, params: &ScanParams) -> Result<ScanToken, HostError> {
        let token = ScanToken(self.next_token);
        CENTRAL_CMDS
            .try_send(CentralCommand::Scan {
                token,
                params: *params,
            })
            .map_err(|_| busy())?;
        self.next_token = self.next_token.wrapping_add(1);
        Ok(token)
    }

    fn cancel_scan(&mut self, token: ScanToken) -> Result<(), HostError> {
        SCAN_CANCEL.signal(token);
        Ok(())
    }

    fn connect(&mut self, _own: AddressType, peer: &Address, timeout_ms: u32) -> Result<(), HostError> {
        CENTRAL_CMDS
            .try_send(CentralCommand::Connect {
                peer: *peer,
                timeout_ms,
            })
            .map_err(|_| busy())
    }

    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
        debug!("terminating conn={} reason={:#x}", conn, reason);
        // `Connection::disconnect` always sends 0x13; go through the raw call for our reason.
        TERMINATIONS.lock(|log| log.borrow_mut().record(conn, reason));
        let ret = unsafe { raw::sd_ble_gap_disconnect(conn, reason) };
        if ret != raw::NRF_SUCCESS {
            TERMINATIONS.lock(|log| log.borrow_mut().take(conn));
            return Err(HostError(ret as i32));
        }
        Ok(())
    }

    fn discover_all(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        CENTRAL_CMDS
            .try_send(CentralCommand::DiscoverAll(conn))
            .map_err(|_| busy())
    }

    fn write(&mut self, conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        let data = AttrValue::from_slice(data).map_err(|_| HostError(raw::NRF_ERROR_DATA_SIZE as i32))?;
        CENTRAL_CMDS
            .try_send(CentralCommand::Write { conn, attr, data })
            .map_err(|_| busy())
    }

    fn read(&mut self, conn: ConnHandle, attr: AttrHandle) -> Result<(), HostError> {
        CENTRAL_CMDS
            .try_send(CentralCommand::Read { conn, attr })
            .map_err(|_| busy())
    }

    fn notify(&mut self, conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        let link = Connection::from_handle(conn).ok_or_else(invalid_state)?;
        gatt_server::notify_value(&link, attr, data).map_err(|_| invalid_state())
    }

    fn delete_bond(&mut self, peer: &Address) -> Result<(), HostError> {
        if bond::bonder().forget(&to_sd_address(peer)) {
            Ok(())
        } else {
            Err(HostError(raw::NRF_ERROR_NOT_FOUND as i32))
        }
    }

    fn conn_info(&self, conn: ConnHandle) -> Option<ConnInfo> {
        let link = Connection::from_handle(conn)?;
        let params = link.conn_params();
        let peer = link.peer_address();
        let mode = link.security_mode();
        Some(ConnInfo {
            conn,
            our_id_addr: self.mac,
            peer_ota_addr: from_sd_address(peer),
            peer_id_addr: from_sd_address(peer),
            interval: params.max_conn_interval,
            latency: params.slave_latency,
            supervision_timeout: params.conn_sup_timeout,
            encrypted: !matches!(mode, SecurityMode::NoAccess | SecurityMode::Open),
            authenticated: matches!(mode, SecurityMode::Mitm | SecurityMode::LescMitm),
            bonded: bond::bonder().is_bonded(&peer),
        })
    }

    fn register_services(&mut self, services: &'static [ServiceDef]) -> Result<(), HostError> {
        static SERVER: StaticCell<LocalServer> = StaticCell::new();

        let sd = self.sd.as_deref_mut().ok_or_else(invalid_state)?;
        let mut server = LocalServer::new();
        for svc in services {
            Self::build_service(sd, svc, &self.mac, self.store, &mut server).map_err(|e| {
                warn!("service {:?} rejected: {:?}", svc.uuid, e);
                HostError(raw::NRF_ERROR_NO_MEM as i32)
            })?;
        }
        info!("{} local attributes", server.len());
        self.server = Some(SERVER.init(server));
        Ok(())
    }

    fn schedule(&mut self, timer: TimerId, delay_ms: u32) {
        match timer {
            TimerId::AdvertiseRetry => ADV_RETRY.signal(delay_ms),
            TimerId::ScanRetry => SCAN_RETRY.signal(delay_ms),
        }
    }
}

/// One-shot timer service for [`BleHost::schedule`]. A newer request
/// restarts the countdown.
#[embassy_executor::task(pool_size = 2)]
pub async fn retry_timer(timer: TimerId) -> ! {
    let signal = match timer {
        TimerId::AdvertiseRetry => &ADV_RETRY,
        TimerId::ScanRetry => &SCAN_RETRY,
    };
    let mut delay_ms = signal.wait().await;
    loop {
        match select(Timer::after_millis(u64::from(delay_ms)), signal.wait()).await {
            Either::First(()) => {
                post(HostEvent::TimerExpired(timer)).await;
                delay_ms = signal.wait().await;
            }
            Either::Second(restart) => delay_ms = restart,
        }
    }
}

/// Current value of a local characteristic, `None` if it does not fit.
pub(crate) fn local_value(
    kind: CharKind,
    mac: &Address,
    store: &Datastore<CriticalSectionRawMutex>,
) -> Option<AttrValue> {
    let mut out = AttrValue::new();
    read_characteristic(kind, mac, store, &mut out).ok()?;
    Some(out)
}
