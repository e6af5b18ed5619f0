//! Advertising data: parsing scan reports and encoding our own payload.

use heapless::{String, Vec};

use crate::error::{AdvParseError, Error};

use super::uuid::Uuid;
use super::{AdvData, ADV_DATA_MAX};

// AD structure types (Bluetooth Core Supplement, Part A)
const AD_FLAGS: u8 = 0x01;
const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_UUID32_INCOMPLETE: u8 = 0x04;
const AD_UUID32_COMPLETE: u8 = 0x05;
const AD_UUID128_INCOMPLETE: u8 = 0x06;
const AD_UUID128_COMPLETE: u8 = 0x07;
const AD_NAME_SHORT: u8 = 0x08;
const AD_NAME_COMPLETE: u8 = 0x09;
const AD_TX_POWER: u8 = 0x0A;

/// LE General Discoverable Mode.
pub const FLAG_DISC_GEN: u8 = 0x02;
/// BR/EDR Not Supported.
pub const FLAG_BREDR_UNSUP: u8 = 0x04;

/// Fields of one scan report. Lives only for the connect decision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdvertisementRecord {
    pub flags: Option<u8>,
    pub uuids16: Vec<u16, 8>,
    pub uuids16_complete: bool,
    pub uuids32: Vec<u32, 4>,
    pub uuids32_complete: bool,
    pub uuids128: Vec<Uuid, 2>,
    pub uuids128_complete: bool,
    pub name: Option<String<32>>,
    pub name_complete: bool,
    pub tx_power: Option<i8>,
}

impl AdvertisementRecord {
    /// Parse a raw advertising payload.
    ///
    /// A zero length byte ends the payload (trailing padding). Unknown AD
    /// types are skipped.
    pub fn parse(data: &[u8]) -> Result<Self, AdvParseError> {
        let mut rec = AdvertisementRecord::default();
        let mut i = 0;
        while i < data.len() {
            let len = data[i] as usize;
            if len == 0 {
                break;
            }
            let end = i + 1 + len;
            if end > data.len() {
                return Err(AdvParseError::Truncated);
            }
            let ad_type = data[i + 1];
            let payload = &data[i + 2..end];

            match ad_type {
                AD_FLAGS => rec.flags = Some(single_byte(payload)?),
                AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE => {
                    for chunk in chunks::<2>(payload)? {
                        push_uuid(&mut rec.uuids16, u16::from_le_bytes(chunk))?;
                    }
                    rec.uuids16_complete = ad_type == AD_UUID16_COMPLETE;
                }
                AD_UUID32_INCOMPLETE | AD_UUID32_COMPLETE => {
                    for chunk in chunks::<4>(payload)? {
                        push_uuid(&mut rec.uuids32, u32::from_le_bytes(chunk))?;
                    }
                    rec.uuids32_complete = ad_type == AD_UUID32_COMPLETE;
                }
                AD_UUID128_INCOMPLETE | AD_UUID128_COMPLETE => {
                    for chunk in chunks::<16>(payload)? {
                        push_uuid(&mut rec.uuids128, Uuid::from_le_bytes(chunk))?;
                    }
                    rec.uuids128_complete = ad_type == AD_UUID128_COMPLETE;
                }
                AD_NAME_SHORT | AD_NAME_COMPLETE => {
                    let mut name = String::new();
                    for &b in payload {
                        if name.push(b as char).is_err() {
                            break;
                        }
                    }
                    rec.name = Some(name);
                    rec.name_complete = ad_type == AD_NAME_COMPLETE;
                }
                AD_TX_POWER => rec.tx_power = Some(single_byte(payload)? as i8),
                _ => {}
            }
            i = end;
        }
        Ok(rec)
    }

    pub fn has_uuid128(&self, uuid: &Uuid) -> bool {
        self.uuids128.iter().any(|u| u == uuid)
    }
}

fn single_byte(payload: &[u8]) -> Result<u8, AdvParseError> {
    match payload {
        [b] => Ok(*b),
        _ => Err(AdvParseError::BadLength),
    }
}

fn chunks<const N: usize>(
    payload: &[u8],
) -> Result<impl Iterator<Item = [u8; N]> + '_, AdvParseError> {
    if payload.len() % N != 0 {
        return Err(AdvParseError::BadLength);
    }
    Ok(payload.chunks_exact(N).map(|c| {
        let mut out = [0u8; N];
        out.copy_from_slice(c);
        out
    }))
}

fn push_uuid<T, const N: usize>(list: &mut Vec<T, N>, v: T) -> Result<(), AdvParseError> {
    list.push(v).map_err(|_| AdvParseError::TooManyUuids)
}

/// Dump a parsed report at debug level.
pub fn log_adv_fields(rec: &AdvertisementRecord) {
    if let Some(flags) = rec.flags {
        debug!("    flags={:#x}", flags);
    }
    if let Some(name) = &rec.name {
        debug!("    name({}complete)={}", if rec.name_complete { "" } else { "in" }, name.as_str());
    }
    if let Some(tx) = rec.tx_power {
        debug!("    tx_pwr_lvl={}", tx);
    }
    for u in rec.uuids16.iter() {
        debug!("    uuid16={:#x}", u);
    }
    for u in rec.uuids32.iter() {
        debug!("    uuid32={:#x}", u);
    }
    for u in rec.uuids128.iter() {
        debug!("    uuid128={:?}", u);
    }
}

/// What we put on air as a peripheral.
#[derive(Clone, Copy, Debug)]
pub struct AdvFields<'a> {
    /// Complete device name.
    pub name: &'a str,
    /// At most two are carried: one in the advertising PDU, one in the
    /// scan response.
    pub uuids128: &'a [Uuid],
    /// At most one is carried.
    pub uuids16: &'a [Uuid],
    pub tx_power: i8,
}

/// Encoded advertising PDU and scan response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvPayload {
    pub adv_data: AdvData,
    pub scan_data: AdvData,
}

impl<'a> AdvFields<'a> {
    /// Check the UUID lists against what the payload can carry.
    pub fn check(&self) -> Result<(), Error> {
        if self.uuids128.len() > 2 || self.uuids16.len() > 1 {
            return Err(Error::TooManyServiceUuids);
        }
        Ok(())
    }

    /// Encode into an advertising PDU (flags, first 128-bit UUID, 16-bit
    /// UUID) and a scan response (second 128-bit UUID, name, TX power).
    ///
    /// UUIDs past the supported count are dropped. The name is shortened
    /// when it does not fit the scan response.
    pub fn encode(&self) -> Result<AdvPayload, Error> {
        let mut adv_data = AdvData::new();
        let mut scan_data = AdvData::new();

        push_ad(&mut adv_data, AD_FLAGS, &[FLAG_DISC_GEN | FLAG_BREDR_UNSUP])?;

        if let Some(first) = self.uuids128.first() {
            let ty = if self.uuids128.len() <= 1 {
                AD_UUID128_COMPLETE
            } else {
                AD_UUID128_INCOMPLETE
            };
            push_ad(&mut adv_data, ty, &first.to_le_bytes())?;
        }
        if let Some(u16_uuid) = self.uuids16.first().and_then(Uuid::as_u16) {
            push_ad(&mut adv_data, AD_UUID16_COMPLETE, &u16_uuid.to_le_bytes())?;
        }

        if let Some(second) = self.uuids128.get(1) {
            push_ad(&mut scan_data, AD_UUID128_COMPLETE, &second.to_le_bytes())?;
        }

        // TX power goes last but its room is reserved before the name.
        let room = ADV_DATA_MAX - scan_data.len() - 3;
        let name = self.name.as_bytes();
        if name.len() + 2 <= room {
            push_ad(&mut scan_data, AD_NAME_COMPLETE, name)?;
        } else if room > 2 {
            push_ad(&mut scan_data, AD_NAME_SHORT, &name[..room - 2])?;
        } else {
            return Err(Error::AdvertisingPayloadTooLong);
        }
        push_ad(&mut scan_data, AD_TX_POWER, &[self.tx_power as u8])?;

        Ok(AdvPayload {
            adv_data,
            scan_data,
        })
    }
}

fn push_ad(buf: &mut AdvData, ad_type: u8, payload: &[u8]) -> Result<(), Error> {
    let len = u8::try_from(payload.len() + 1).map_err(|_| Error::AdvertisingPayloadTooLong)?;
    buf.push(len).map_err(|_| Error::AdvertisingPayloadTooLong)?;
    buf.push(ad_type).map_err(|_| Error::AdvertisingPayloadTooLong)?;
    buf.extend_from_slice(payload)
        .map_err(|_| Error::AdvertisingPayloadTooLong)
}
