//! Unified error types for the connectivity engine.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Top-level error type used across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // BLE host
    /// The BLE host returned a non-zero status.
    Host(HostError),

    /// Peer store operation failed.
    Peer(PeerError),

    /// ATT-level failure while serving or decoding an attribute.
    Att(AttError),

    /// The GATT service table was rejected at boot. Fatal.
    GattRegistration,

    // Advertising
    /// More service UUIDs were configured than the payload can carry.
    TooManyServiceUuids,

    /// Encoded advertising data does not fit in a legacy PDU.
    AdvertisingPayloadTooLong,

    /// A scan report could not be parsed.
    AdvParse(AdvParseError),

    // Wi-Fi
    /// The soft-AP collaborator refused to start.
    Wifi(WifiError),
}

/// Raw non-zero return code from the BLE host collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostError(pub i32);

/// ATT protocol errors returned from GATT access and payload decoding.
///
/// Discriminants are the on-air ATT error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AttError {
    /// Buffer length outside the declared min/max.
    InvalidAttributeLength = 0x0D,
    /// Serialization or copy failure, or an unknown characteristic.
    Unlikely = 0x0E,
    /// Response buffer could not take the value.
    InsufficientResources = 0x11,
}

impl AttError {
    /// On-air error code.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Peer store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerError {
    /// No room for another peer / service / characteristic / descriptor.
    NoMemory,
    /// A peer with this connection handle already exists.
    AlreadyExists,
    /// No peer (or parent attribute) for the given handle.
    NotFound,
    /// A discovery is already outstanding for this connection.
    DiscoveryInProgress,
    /// Discovery results arrived while no discovery was outstanding.
    NotDiscovering,
}

/// Raw failure code from the Wi-Fi soft-AP collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WifiError(pub i32);

/// Advertising data parse failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvParseError {
    /// An AD structure runs past the end of the report.
    Truncated,
    /// An AD structure's payload length is invalid for its type.
    BadLength,
    /// More UUIDs than the record can hold.
    TooManyUuids,
}

// Convenience conversions

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        Error::Host(e)
    }
}

impl From<PeerError> for Error {
    fn from(e: PeerError) -> Self {
        Error::Peer(e)
    }
}

impl From<AttError> for Error {
    fn from(e: AttError) -> Self {
        Error::Att(e)
    }
}

impl From<AdvParseError> for Error {
    fn from(e: AdvParseError) -> Self {
        Error::AdvParse(e)
    }
}

impl From<WifiError> for Error {
    fn from(e: WifiError) -> Self {
        Error::Wifi(e)
    }
}
