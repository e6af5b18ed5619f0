//! OTA access point requests.
//!
//! The nRF52840 has no Wi-Fi radio. Starting the access point generates
//! and publishes its credentials; bringing up the actual AP belongs to
//! the Wi-Fi coprocessor firmware.

use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use nrf_softdevice::Softdevice;

use tkos_ble::wifi::{ota_ssid, SSID_RANDOM_LEN};
use tkos_ble::{Datastore, SoftAp, WifiError};

static REQUESTS: Channel<CriticalSectionRawMutex, (), 1> = Channel::new();

/// [`SoftAp`] that hands start requests to [`softap_task`].
pub struct SoftApRequests;

impl SoftAp for SoftApRequests {
    fn start_soft_ap(&mut self) -> Result<(), WifiError> {
        REQUESTS.try_send(()).map_err(|_| WifiError(-1))
    }

    fn stop_soft_ap(&mut self) {
        warn!("stopping the OTA access point is not supported");
    }
}

#[embassy_executor::task]
pub async fn softap_task(sd: &'static Softdevice, store: &'static Datastore<CriticalSectionRawMutex>) -> ! {
    loop {
        REQUESTS.receive().await;
        let mut random = [0u8; SSID_RANDOM_LEN];
        if let Err(e) = nrf_softdevice::random_bytes(sd, &mut random) {
            warn!("no entropy for SSID: {:?}", e);
            continue;
        }
        let ssid = ota_ssid(&random);
        // Open network: no password is set.
        store.set_wifi_credentials(&ssid, "");
        info!("OTA access point {}", ssid.as_str());
    }
}
