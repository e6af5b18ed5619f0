//! Bluetooth Low Energy subsystem.
//!
//! The engine runs both GAP roles at once:
//!
//! 1. **GAP controller** (peripheral) - advertises the dashboard and keeps
//!    advertising alive across connects, disconnects and failures.
//! 2. **GATT server** - serves Device Information and OTA control.
//! 3. **Central scanner** - finds the companion sensor by its advertised
//!    service UUID and connects to it.
//! 4. **Subscription manager** - after discovery, enables notifications on
//!    the telemetry characteristics and resolves their value handles.
//! 5. **Notification router** - decodes telemetry into the datastore.
//!
//! All of them are driven from one task by [`manager::ConnectionManager`],
//! which consumes [`HostEvent`]s and issues commands through the
//! [`host::BleHost`] trait.

pub mod adv;
pub mod gap;
pub mod gatt_server;
pub mod host;
pub mod ids;
pub mod manager;
pub mod peer;
pub mod router;
pub mod scanner;
pub mod subscription;
pub mod uuid;

#[cfg(test)]
mod mock;

use core::fmt;

use heapless::Vec;

use crate::config::ATT_VALUE_MAX;
use crate::error::AttError;
use uuid::Uuid;

/// Opaque connection handle assigned by the host.
pub type ConnHandle = u16;

/// Attribute handle on the remote (or local) GATT database.
pub type AttrHandle = u16;

/// Attribute value buffer.
pub type AttrValue = Vec<u8, ATT_VALUE_MAX>;

/// Legacy advertising PDU payload limit.
pub const ADV_DATA_MAX: usize = 31;

/// Raw advertising / scan response payload.
pub type AdvData = Vec<u8, ADV_DATA_MAX>;

/// Address kind as carried on air.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressType {
    Public,
    Random,
}

/// A Bluetooth device address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub kind: AddressType,
    /// Little-endian (on-air) byte order.
    pub bytes: [u8; 6],
}

impl Address {
    pub const fn new(kind: AddressType, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Which GAP role an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Peripheral,
    Central,
}

/// HCI advertising report event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvEventType {
    /// Connectable undirected.
    AdvInd,
    /// Connectable directed.
    DirInd,
    /// Scannable undirected.
    ScanInd,
    /// Non-connectable undirected.
    NonconnInd,
    /// Scan response.
    ScanRsp,
}

impl AdvEventType {
    pub fn from_hci(v: u8) -> Option<Self> {
        match v {
            0 => Some(AdvEventType::AdvInd),
            1 => Some(AdvEventType::DirInd),
            2 => Some(AdvEventType::ScanInd),
            3 => Some(AdvEventType::NonconnInd),
            4 => Some(AdvEventType::ScanRsp),
            _ => None,
        }
    }

    /// Only these two report types announce a connectable advertiser.
    pub fn is_connectable(self) -> bool {
        matches!(self, AdvEventType::AdvInd | AdvEventType::DirInd)
    }
}

/// One advertising report delivered while scanning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanReport {
    pub event_type: AdvEventType,
    pub addr: Address,
    pub rssi: i8,
    pub data: AdvData,
}

/// GAP events, shared by both roles. Each role's handler matches all of
/// them and logs the ones it has no use for.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GapEvent {
    /// A connection was established (`status == 0`) or an attempt failed.
    Connect { conn: ConnHandle, status: u8 },
    Disconnect { conn: ConnHandle, reason: u8 },
    ConnUpdate { conn: ConnHandle, status: u8 },
    AdvertiseComplete { reason: u8 },
    EncryptionChange { conn: ConnHandle, status: u8 },
    Subscribe {
        conn: ConnHandle,
        attr: AttrHandle,
        reason: u8,
        prev_notify: bool,
        cur_notify: bool,
        prev_indicate: bool,
        cur_indicate: bool,
    },
    Mtu { conn: ConnHandle, channel: u16, mtu: u16 },
    /// The peer tries to pair again although a bond exists.
    RepeatPairing { conn: ConnHandle },
    ScanReport(ScanReport),
    ScanComplete { reason: u8 },
    /// Notification or indication received from a peer.
    NotifyRx {
        conn: ConnHandle,
        attr: AttrHandle,
        indication: bool,
        data: AttrValue,
    },
}

/// One node of a peer's discovered GATT tree.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveredAttribute {
    Service {
        uuid: Uuid,
        start_handle: AttrHandle,
        end_handle: AttrHandle,
    },
    Characteristic {
        /// Start handle of the owning service.
        service_start: AttrHandle,
        uuid: Uuid,
        def_handle: AttrHandle,
        val_handle: AttrHandle,
        properties: u8,
    },
    Descriptor {
        /// Value handle of the owning characteristic.
        chr_val_handle: AttrHandle,
        uuid: Uuid,
        handle: AttrHandle,
    },
}

/// What the host registered for the local GATT table.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Registration {
    Service { uuid: Uuid, handle: AttrHandle },
    Characteristic {
        uuid: Uuid,
        def_handle: AttrHandle,
        val_handle: AttrHandle,
    },
    Descriptor { uuid: Uuid, handle: AttrHandle },
}

/// GATT procedure completions and discovery results.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattEvent {
    Discovered {
        conn: ConnHandle,
        attribute: DiscoveredAttribute,
    },
    DiscoveryComplete { conn: ConnHandle, status: u16 },
    WriteComplete {
        conn: ConnHandle,
        attr: AttrHandle,
        status: u16,
    },
    /// `value` is `None` when the host delivered no buffer.
    ReadComplete {
        conn: ConnHandle,
        attr: AttrHandle,
        status: u16,
        value: Option<AttrValue>,
    },
    Registered(Registration),
}

/// Peripheral-side access operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessOp {
    Read,
    Write,
}

/// A read or write against one of our own characteristics.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GattAccessRequest {
    pub conn: ConnHandle,
    pub characteristic: Uuid,
    pub op: AccessOp,
    /// Payload for writes; empty for reads.
    pub data: AttrValue,
}

/// Everything the host task can be woken up with.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostEvent {
    /// Host and controller are in sync; radio may be used.
    Sync,
    /// Host was reset.
    Reset { reason: i32 },
    Peripheral(GapEvent),
    Central(GapEvent),
    Gatt(GattEvent),
    /// A write the host already acknowledged on our behalf.
    Access(GattAccessRequest),
    TimerExpired(host::TimerId),
}

/// Copy an incoming attribute payload into `dst`.
///
/// Lengths outside `min_len..=max_len` are an ATT length error; a
/// destination too small to take the payload is reported as `Unlikely`.
pub fn flatten(
    data: &[u8],
    min_len: usize,
    max_len: usize,
    dst: &mut [u8],
) -> Result<usize, AttError> {
    if data.len() < min_len || data.len() > max_len {
        return Err(AttError::InvalidAttributeLength);
    }
    let dst = dst.get_mut(..data.len()).ok_or(AttError::Unlikely)?;
    dst.copy_from_slice(data);
    Ok(data.len())
}

/// Decode an exactly `N`-byte payload.
pub fn decode_exact<const N: usize>(data: &[u8]) -> Result<[u8; N], AttError> {
    let mut out = [0u8; N];
    flatten(data, N, N, &mut out)?;
    Ok(out)
}

/// Build an [`AttrValue`] from a slice, failing if it does not fit.
pub fn attr_value(data: &[u8]) -> Result<AttrValue, AttError> {
    AttrValue::from_slice(data).map_err(|_| AttError::InsufficientResources)
}
