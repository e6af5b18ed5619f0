//! tkos-ble firmware entry point (nRF52840 + S140).
//!
//! Task layout:
//!
//! ```text
//!  softdevice_task ── SoftDevice event pump
//!  peripheral_task ── advertising, local GATT server ──┐
//!  central_task    ── scan, connect, GATT client ──────┼── EVENTS ──> host_task (ConnectionManager)
//!  retry_timer x2  ── advertise / scan backoff ────────┘
//!  softap_task     ── OTA access point credentials
//! ```

#![no_std]
#![no_main]

mod radio;

use core::mem;

use defmt::{info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::interrupt::Priority;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use nrf_softdevice::{raw, Softdevice};
use panic_probe as _;

use radio::softap::SoftApRequests;
use radio::RadioHost;
use tkos_ble::ble::gap::EventOutcome;
use tkos_ble::ble::HostEvent;
use tkos_ble::config::MAX_LINKS;
use tkos_ble::{ConnectionManager, Datastore, PeerTable, TimerId};

type Manager = ConnectionManager<'static, RadioHost, PeerTable, SoftApRequests, CriticalSectionRawMutex>;

static DATASTORE: Datastore<CriticalSectionRawMutex> = Datastore::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn host_task(mut manager: Manager) -> ! {
    loop {
        let event = radio::EVENTS.receive().await;
        if manager.handle_event(event) == EventOutcome::RetryPairing {
            info!("stale bond dropped, peer may pair again");
        }
    }
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: MAX_LINKS as u8,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 1,
            central_sec_count: 1,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: core::ptr::null_mut(),
            current_len: 0,
            max_len: 32,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(raw::BLE_GATTS_VLOC_STACK as u8),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("tkos-ble starting");

    // SoftDevice reserves interrupt priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let _p = embassy_nrf::init(config);

    let sd = Softdevice::enable(&softdevice_config());
    let mac = radio::local_address(sd);
    info!("identity address {}", mac.bytes);

    let host = RadioHost::new(sd, &DATASTORE, mac);
    let mut manager: Manager = ConnectionManager::new(host, PeerTable::new(), SoftApRequests, &DATASTORE, mac);
    if let Err(e) = manager.init() {
        defmt::panic!("GATT registration failed: {:?}", e);
    }
    radio::set_gap_device_name(manager.gap().device_name());

    let Some((sd, server)) = manager.host_mut().release() else {
        defmt::panic!("SoftDevice not released after registration");
    };

    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(radio::retry_timer(TimerId::AdvertiseRetry)));
    unwrap!(spawner.spawn(radio::retry_timer(TimerId::ScanRetry)));
    unwrap!(spawner.spawn(radio::peripheral::peripheral_task(sd, server, &DATASTORE, mac)));
    unwrap!(spawner.spawn(radio::central::central_task(sd)));
    unwrap!(spawner.spawn(radio::softap::softap_task(sd, &DATASTORE)));

    // The SoftDevice is up: the host is in sync with the controller.
    if radio::EVENTS.try_send(HostEvent::Sync).is_err() {
        warn!("host event queue full at boot");
    }
    unwrap!(spawner.spawn(host_task(manager)));
}
