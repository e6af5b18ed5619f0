//! Local GATT table: Device Information and OTA control.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::String;

use crate::config::{
    DEVICE_FIRMWARE_REVISION, DEVICE_HARDWARE_REVISION, DEVICE_MANUFACTURER, DEVICE_MODEL,
    DEVICE_SOFTWARE_REVISION, OTA_UPDATE_URL,
};
use crate::datastore::Datastore;
use crate::error::{AttError, Error};
use crate::wifi::SoftAp;

use super::host::BleHost;
use super::uuid::Uuid;
use super::{decode_exact, ids, AccessOp, Address, AttrHandle, AttrValue, ConnHandle, GattAccessRequest, Registration};

// ATT characteristic property bits.
pub const FLAG_READ: u8 = 0x02;
pub const FLAG_WRITE: u8 = 0x08;
pub const FLAG_NOTIFY: u8 = 0x10;

/// What a characteristic serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CharKind {
    Manufacturer,
    ModelNumber,
    SerialNumber,
    HardwareRevision,
    FirmwareRevision,
    SoftwareRevision,
    OtaEnable,
    OtaSsid,
    OtaPassword,
    OtaUpdateUrl,
    OtaProgress,
}

impl CharKind {
    pub const fn writable(self) -> bool {
        matches!(self, CharKind::OtaEnable)
    }

    pub const fn notifiable(self) -> bool {
        matches!(self, CharKind::OtaProgress)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CharacteristicDef {
    pub uuid: Uuid,
    pub kind: CharKind,
    pub flags: u8,
    /// Largest value the characteristic can hold.
    pub max_len: u16,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ServiceDef {
    pub uuid: Uuid,
    pub characteristics: &'static [CharacteristicDef],
}

const fn chr(uuid: Uuid, kind: CharKind, flags: u8, max_len: u16) -> CharacteristicDef {
    CharacteristicDef {
        uuid,
        kind,
        flags,
        max_len,
    }
}

/// Services we host as a peripheral.
pub static SERVICES: [ServiceDef; 2] = [
    ServiceDef {
        uuid: ids::DEVICE_INFO,
        characteristics: &[
            chr(ids::DEVICE_INFO_MANUFACTURER, CharKind::Manufacturer, FLAG_READ, 32),
            chr(ids::DEVICE_INFO_MODEL_NUMBER, CharKind::ModelNumber, FLAG_READ, 32),
            chr(ids::DEVICE_INFO_SERIAL_NUMBER, CharKind::SerialNumber, FLAG_READ, 12),
            chr(ids::DEVICE_INFO_HARDWARE_REV, CharKind::HardwareRevision, FLAG_READ, 16),
            chr(ids::DEVICE_INFO_FIRMWARE_REV, CharKind::FirmwareRevision, FLAG_READ, 32),
            chr(ids::DEVICE_INFO_SOFTWARE_REV, CharKind::SoftwareRevision, FLAG_READ, 32),
        ],
    },
    ServiceDef {
        uuid: ids::OTA_SERVICE,
        characteristics: &[
            chr(ids::OTA_ENABLE, CharKind::OtaEnable, FLAG_READ | FLAG_WRITE, 1),
            chr(ids::OTA_SSID, CharKind::OtaSsid, FLAG_READ, 32),
            chr(ids::OTA_PASSWORD, CharKind::OtaPassword, FLAG_READ, 32),
            chr(ids::OTA_UPDATE_URL, CharKind::OtaUpdateUrl, FLAG_READ, 32),
            chr(ids::OTA_PROGRESS, CharKind::OtaProgress, FLAG_READ | FLAG_NOTIFY, 1),
        ],
    },
];

/// Reject tables the host would choke on: duplicate UUIDs, write or
/// notify flags on characteristics that cannot honour them.
pub fn validate(services: &[ServiceDef]) -> Result<(), Error> {
    let all = || services.iter().flat_map(|s| s.characteristics.iter());
    for (i, svc) in services.iter().enumerate() {
        if services[..i].iter().any(|s| s.uuid == svc.uuid) {
            error!("duplicate service {:?}", svc.uuid);
            return Err(Error::GattRegistration);
        }
    }
    for (i, c) in all().enumerate() {
        if all().take(i).any(|other| other.uuid == c.uuid) {
            error!("duplicate characteristic {:?}", c.uuid);
            return Err(Error::GattRegistration);
        }
        if c.flags & FLAG_WRITE != 0 && !c.kind.writable() {
            error!("characteristic {:?} cannot be written", c.uuid);
            return Err(Error::GattRegistration);
        }
        if c.flags & FLAG_NOTIFY != 0 && !c.kind.notifiable() {
            error!("characteristic {:?} cannot notify", c.uuid);
            return Err(Error::GattRegistration);
        }
    }
    Ok(())
}

pub fn find_characteristic(uuid: &Uuid) -> Option<&'static CharacteristicDef> {
    SERVICES
        .iter()
        .flat_map(|s| s.characteristics.iter())
        .find(|c| &c.uuid == uuid)
}

fn append(out: &mut AttrValue, bytes: &[u8]) -> Result<(), AttError> {
    out.extend_from_slice(bytes)
        .map_err(|_| AttError::InsufficientResources)
}

/// 12 upper-case hex digits of the MAC address.
pub fn serial_number(mac: &Address) -> String<12> {
    let mut sn = String::new();
    for b in mac.bytes.iter().rev() {
        let _ = write!(sn, "{:02X}", b);
    }
    sn
}

/// Current value of a characteristic.
///
/// Also used by the radio adapter to refresh the values the host serves
/// on its own.
pub fn read_characteristic<M: RawMutex>(
    kind: CharKind,
    mac: &Address,
    store: &Datastore<M>,
    out: &mut AttrValue,
) -> Result<(), AttError> {
    match kind {
        CharKind::Manufacturer => append(out, DEVICE_MANUFACTURER.as_bytes()),
        CharKind::ModelNumber => append(out, DEVICE_MODEL.as_bytes()),
        CharKind::SerialNumber => append(out, serial_number(mac).as_bytes()),
        CharKind::HardwareRevision => append(out, DEVICE_HARDWARE_REVISION.as_bytes()),
        CharKind::FirmwareRevision => append(out, DEVICE_FIRMWARE_REVISION.as_bytes()),
        CharKind::SoftwareRevision => append(out, DEVICE_SOFTWARE_REVISION.as_bytes()),
        CharKind::OtaEnable => append(out, &[store.ap_enabled() as u8]),
        CharKind::OtaSsid => store.with_wifi(|w| append(out, w.ssid.as_bytes())),
        CharKind::OtaPassword => store.with_wifi(|w| append(out, w.password.as_bytes())),
        CharKind::OtaUpdateUrl => append(out, OTA_UPDATE_URL.as_bytes()),
        CharKind::OtaProgress => append(out, &[store.ota_progress()]),
    }
}

pub struct GattServer {
    mac: Address,
    ota_progress_handle: Option<AttrHandle>,
}

impl GattServer {
    pub fn new(mac: Address) -> Self {
        Self {
            mac,
            ota_progress_handle: None,
        }
    }

    /// Validate the table and hand it to the host. Any failure is fatal.
    pub fn register<H: BleHost>(&mut self, host: &mut H) -> Result<(), Error> {
        validate(&SERVICES)?;
        host.register_services(&SERVICES).map_err(|e| {
            error!("unable to add GATT services: {:?}", e);
            Error::GattRegistration
        })
    }

    pub fn on_registered(&mut self, reg: &Registration) {
        match *reg {
            Registration::Service { uuid, handle } => {
                info!("registered service {:?} with handle={}", uuid, handle);
            }
            Registration::Characteristic {
                uuid,
                def_handle,
                val_handle,
            } => {
                info!(
                    "registering characteristic {:?} with def_handle={} val_handle={}",
                    uuid, def_handle, val_handle
                );
                if uuid == ids::OTA_PROGRESS {
                    self.ota_progress_handle = Some(val_handle);
                }
            }
            Registration::Descriptor { uuid, handle } => {
                info!("registering descriptor {:?} with handle={}", uuid, handle);
            }
        }
    }

    pub fn ota_progress_handle(&self) -> Option<AttrHandle> {
        self.ota_progress_handle
    }

    /// Serve one access request. Reads fill `out`.
    pub fn access<M: RawMutex, W: SoftAp>(
        &mut self,
        req: &GattAccessRequest,
        store: &Datastore<M>,
        wifi: &mut W,
        out: &mut AttrValue,
    ) -> Result<(), AttError> {
        let Some(def) = find_characteristic(&req.characteristic) else {
            warn!("access to unknown characteristic {:?}", req.characteristic);
            return Err(AttError::Unlikely);
        };
        match req.op {
            AccessOp::Read => read_characteristic(def.kind, &self.mac, store, out),
            AccessOp::Write => self.write(def, &req.data, store, wifi),
        }
    }

    fn write<M: RawMutex, W: SoftAp>(
        &mut self,
        def: &CharacteristicDef,
        data: &[u8],
        store: &Datastore<M>,
        wifi: &mut W,
    ) -> Result<(), AttError> {
        match def.kind {
            CharKind::OtaEnable => {
                let [raw] = decode_exact::<1>(data)?;
                let enable = raw != 0;
                if enable == store.ap_enabled() {
                    return Ok(());
                }
                if enable {
                    match wifi.start_soft_ap() {
                        Ok(()) => {
                            info!("OTA access point started");
                            store.set_ap_enabled(true);
                        }
                        Err(e) => error!("cannot start OTA access point: {:?}", e),
                    }
                } else {
                    // Known limitation: the access point stays up.
                    wifi.stop_soft_ap();
                }
                Ok(())
            }
            _ => {
                warn!("write to read-only characteristic {:?}", def.uuid);
                Err(AttError::Unlikely)
            }
        }
    }

    /// Push the current OTA progress to a subscribed client.
    pub fn notify_ota_progress<H: BleHost, M: RawMutex>(
        &self,
        host: &mut H,
        conn: ConnHandle,
        store: &Datastore<M>,
    ) -> Result<(), Error> {
        let handle = self.ota_progress_handle.ok_or(Error::GattRegistration)?;
        host.notify(conn, handle, &[store.ota_progress()])?;
        Ok(())
    }
}
