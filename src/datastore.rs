//! Shared telemetry datastore.
//!
//! Written by the BLE host task (notification router, GATT server, Wi-Fi
//! collaborator) and read by the UI refresh task. All access goes through
//! a blocking mutex: writers use the narrow accessors below, readers take
//! a [`Telemetry`] snapshot.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::String;

/// Top-bar GPS indicator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpsStatus {
    #[default]
    Off,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineData {
    pub rpm: f64,
    pub rpm_available: bool,
    pub temp_c: f32,
    pub temp_c_available: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocationData {
    /// Ground speed in km/h.
    pub speed: f64,
    pub speed_available: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WifiSettings {
    pub ap_enable: bool,
    pub ssid: String<32>,
    pub password: String<32>,
}

/// System wall clock as set by GPS time sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WallClock {
    /// Seconds since the Unix epoch, UTC.
    pub epoch_secs: i64,
    /// POSIX TZ string.
    pub timezone: &'static str,
}

/// Everything the dashboard shows that comes from the connectivity engine.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    /// A companion sensor is connected.
    pub bluetooth_connected: bool,
    pub engine: EngineData,
    pub location: LocationData,
    pub gps_status: GpsStatus,
    pub wifi: WifiSettings,
    /// OTA progress in percent.
    pub ota_progress: u8,
    pub wall_clock: Option<WallClock>,
}

impl Telemetry {
    pub const fn new() -> Self {
        Self {
            bluetooth_connected: false,
            engine: EngineData {
                rpm: 0.0,
                rpm_available: false,
                temp_c: 0.0,
                temp_c_available: false,
            },
            location: LocationData {
                speed: 0.0,
                speed_available: false,
            },
            gps_status: GpsStatus::Off,
            wifi: WifiSettings {
                ap_enable: false,
                ssid: String::new(),
                password: String::new(),
            },
            ota_progress: 0,
            wall_clock: None,
        }
    }
}

/// Mutex-guarded [`Telemetry`].
pub struct Datastore<M: RawMutex> {
    inner: Mutex<M, RefCell<Telemetry>>,
}

impl<M: RawMutex> Datastore<M> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Telemetry::new())),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Telemetry) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    fn read<R>(&self, f: impl FnOnce(&Telemetry) -> R) -> R {
        self.inner.lock(|cell| f(&cell.borrow()))
    }

    /// Consistent copy of the whole store.
    pub fn snapshot(&self) -> Telemetry {
        self.read(Telemetry::clone)
    }

    pub fn set_bluetooth_connected(&self, connected: bool) {
        self.update(|t| t.bluetooth_connected = connected);
    }

    pub fn set_engine_rpm(&self, rpm: f64, available: bool) {
        self.update(|t| {
            t.engine.rpm = rpm;
            t.engine.rpm_available = available;
        });
    }

    pub fn set_engine_temperature(&self, temp_c: f32, available: bool) {
        self.update(|t| {
            t.engine.temp_c = temp_c;
            t.engine.temp_c_available = available;
        });
    }

    pub fn set_speed(&self, speed: f64, available: bool) {
        self.update(|t| {
            t.location.speed = speed;
            t.location.speed_available = available;
        });
    }

    pub fn set_speed_available(&self, available: bool) {
        self.update(|t| t.location.speed_available = available);
    }

    pub fn gps_status(&self) -> GpsStatus {
        self.read(|t| t.gps_status)
    }

    /// Store a new GPS status and return the previous one.
    pub fn replace_gps_status(&self, status: GpsStatus) -> GpsStatus {
        self.update(|t| core::mem::replace(&mut t.gps_status, status))
    }

    pub fn set_wall_clock(&self, epoch_secs: i64, timezone: &'static str) {
        self.update(|t| {
            t.wall_clock = Some(WallClock {
                epoch_secs,
                timezone,
            })
        });
    }

    pub fn ap_enabled(&self) -> bool {
        self.read(|t| t.wifi.ap_enable)
    }

    pub fn set_ap_enabled(&self, enabled: bool) {
        self.update(|t| t.wifi.ap_enable = enabled);
    }

    /// Store soft-AP credentials, truncating to the field capacity.
    pub fn set_wifi_credentials(&self, ssid: &str, password: &str) {
        self.update(|t| {
            t.wifi.ssid = truncated(ssid);
            t.wifi.password = truncated(password);
        });
    }

    /// Run `f` with the current SSID and password.
    pub fn with_wifi<R>(&self, f: impl FnOnce(&WifiSettings) -> R) -> R {
        self.read(|t| f(&t.wifi))
    }

    pub fn ota_progress(&self) -> u8 {
        self.read(|t| t.ota_progress)
    }

    pub fn set_ota_progress(&self, percent: u8) {
        self.update(|t| t.ota_progress = percent.min(100));
    }

    /// The companion sensor went away: nothing it reported is current.
    pub fn invalidate_sensor(&self) {
        self.update(|t| {
            t.bluetooth_connected = false;
            t.engine.rpm_available = false;
            t.engine.temp_c_available = false;
            t.location.speed_available = false;
            t.gps_status = GpsStatus::Off;
        });
    }
}

impl<M: RawMutex> Default for Datastore<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
