//! Wi-Fi soft-AP collaborator seam.
//!
//! The soft-AP and the HTTP upload server behind it live outside this
//! crate. The GATT server only asks for the access point to be started
//! when a client flips the OTA enable characteristic.

use heapless::String;

use crate::error::WifiError;

/// Characters used for generated SSIDs.
const SSID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Random part of a generated SSID.
pub const SSID_RANDOM_LEN: usize = 12;

pub trait SoftAp {
    /// Bring the access point up. Credentials are published through the
    /// datastore by the implementation.
    fn start_soft_ap(&mut self) -> Result<(), WifiError>;

    /// Tear the access point down.
    ///
    /// Not supported by the current Wi-Fi stack: implementations log and
    /// return. The access point stays up until reset.
    fn stop_soft_ap(&mut self);
}

/// Build the OTA access point SSID, `"OTA-"` followed by
/// [`SSID_RANDOM_LEN`] alphanumerics picked from `random`.
pub fn ota_ssid(random: &[u8; SSID_RANDOM_LEN]) -> String<32> {
    let mut ssid = String::new();
    let _ = ssid.push_str("OTA-");
    for &r in random {
        let c = SSID_ALPHABET[r as usize % SSID_ALPHABET.len()];
        let _ = ssid.push(c as char);
    }
    ssid
}
