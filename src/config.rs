//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, capacities and fixed strings live here so they
//! can be tuned in one place.

// BLE - central

/// Outbound connection attempt timeout (ms).
pub const BLE_CONNECT_TIMEOUT_MS: u32 = 30_000;

/// HCI reason used when we tear down a link ourselves
/// ("remote user terminated connection").
pub const BLE_ERR_REM_USER_CONN_TERM: u8 = 0x13;

/// HCI "unspecified error", reported for a disconnect whose cause the
/// radio did not tell us.
pub const BLE_ERR_UNSPECIFIED: u8 = 0x1F;

/// Connection interval range for the sensor link (1.25 ms units).
/// 24 = 30 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// Peripheral latency (connection events the peer may skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// Supervision timeout (10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// CCCD value enabling notifications (no indications).
pub const CCCD_ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

// BLE - retry policy
//
// Advertising and scanning restart after a failed start with a doubling
// delay: 250 ms, 500 ms, ... capped at 8 s, at most 6 attempts.

pub const BLE_RETRY_BASE_MS: u32 = 250;
pub const BLE_RETRY_MAX_MS: u32 = 8_000;
pub const BLE_RETRY_MAX_ATTEMPTS: u8 = 6;

// BLE - peripheral

/// Advertising TX power used when the payload asks for "auto" (dBm).
/// +8 dBm is the S140 maximum on nRF52840.
pub const BLE_ADV_TX_POWER_DBM: i8 = 8;

/// Device name prefix, selected by build feature.
#[cfg(feature = "enginesense")]
pub const BLE_NAME_PREFIX: &str = "TKES";
#[cfg(all(feature = "navis", not(feature = "enginesense")))]
pub const BLE_NAME_PREFIX: &str = "TKN";
#[cfg(not(any(feature = "enginesense", feature = "navis")))]
pub const BLE_NAME_PREFIX: &str = "TK";

// Capacities

/// Largest attribute value we buffer (bytes).
pub const ATT_VALUE_MAX: usize = 64;

/// Maximum simultaneous peers in the peer store.
pub const MAX_PEERS: usize = 2;

/// Simultaneous links: one sensor link, one dashboard client.
pub const MAX_LINKS: usize = 2;

/// Per-peer discovered tree limits.
pub const MAX_PEER_SERVICES: usize = 8;
pub const MAX_PEER_CHARACTERISTICS: usize = 24;
pub const MAX_PEER_DESCRIPTORS: usize = 12;

/// Bonds kept in RAM across both roles; the oldest is evicted when full.
pub const MAX_BONDS: usize = 4;

/// Depth of the host event queue between the radio tasks and the engine.
pub const HOST_EVENT_QUEUE: usize = 32;

/// Depth of the central command queue. Holds every CCCD write of one
/// subscription pass, the time-sync read and one scan or connect request.
pub const CENTRAL_CMD_QUEUE: usize = crate::ble::subscription::NUM_INTERESTING_NOTIFICATIONS + 2;

/// Distinct advertisers remembered by the software duplicate filter.
pub const SCAN_DUPLICATE_FILTER: usize = 16;

/// How often served GATT values are refreshed from the datastore (ms).
pub const GATT_REFRESH_MS: u64 = 1_000;

// Device information service

pub const DEVICE_MANUFACTURER: &str = "OpenAgri";
pub const DEVICE_MODEL: &str = "Commander";
pub const DEVICE_HARDWARE_REVISION: &str = "1.0";
pub const DEVICE_FIRMWARE_REVISION: &str = "S140 7.3.0";
pub const DEVICE_SOFTWARE_REVISION: &str = env!("CARGO_PKG_VERSION");

// OTA

/// Where the soft-AP's HTTP server accepts firmware uploads.
pub const OTA_UPDATE_URL: &str = "http://192.168.1.1/";

// Time sync

/// POSIX TZ applied together with the GPS timestamp.
pub const TIME_SYNC_TIMEZONE: &str = "CET-1CEST,M3.5.0,M10.5.0/3";
