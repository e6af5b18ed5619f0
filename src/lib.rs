//! Dual-role BLE connectivity engine for the tkos vehicle dashboard.
//!
//! The library holds everything that does not touch the radio: GAP and
//! GATT state machines, the companion-sensor subscription logic, the
//! notification router and the shared telemetry datastore. It builds and
//! tests on the host.
//!
//! Usage: `cargo test --lib`
//!
//! The firmware binary (`src/main.rs`, feature `embedded`) implements
//! [`ble::host::BleHost`] on top of the nRF SoftDevice and drives
//! [`ble::manager::ConnectionManager`] from a single task.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod datastore;
pub mod error;
pub mod wifi;

pub use ble::host::{BleHost, Backoff, ScanParams, ScanToken, TimerId};
pub use ble::manager::ConnectionManager;
pub use ble::peer::{PeerStore, PeerTable};
pub use datastore::{Datastore, GpsStatus, Telemetry};
pub use error::{AttError, Error, HostError, PeerError, WifiError};
pub use wifi::SoftAp;
