//! Service and characteristic UUIDs.
//!
//! Shared between the dashboard (this firmware) and the companion sensor.

use super::uuid::Uuid;

/// Client Characteristic Configuration Descriptor.
pub const CCCD: Uuid = Uuid::from_u16(0x2902);

// Device information (SIG-assigned)

pub const DEVICE_INFO: Uuid = Uuid::from_u16(0x180A);
pub const DEVICE_INFO_MANUFACTURER: Uuid = Uuid::from_u16(0x2A29);
pub const DEVICE_INFO_MODEL_NUMBER: Uuid = Uuid::from_u16(0x2A24);
pub const DEVICE_INFO_SERIAL_NUMBER: Uuid = Uuid::from_u16(0x2A25);
pub const DEVICE_INFO_HARDWARE_REV: Uuid = Uuid::from_u16(0x2A27);
pub const DEVICE_INFO_FIRMWARE_REV: Uuid = Uuid::from_u16(0x2A26);
pub const DEVICE_INFO_SOFTWARE_REV: Uuid = Uuid::from_u16(0x2A28);

// Common OTA service
//
// The central also uses OTA_SERVICE as its discovery target: the companion
// sensor advertises the same OTA service. Whether that reuse is intended is
// still open with the sensor firmware owners; keep both in sync until then.

pub const OTA_SERVICE: Uuid = Uuid::from_u128(0xA5B4_1E20_7C3D_4F6A_9E81_2D5C_6B0F_3A00);
pub const OTA_ENABLE: Uuid = Uuid::from_u128(0xA5B4_1E21_7C3D_4F6A_9E81_2D5C_6B0F_3A00);
pub const OTA_SSID: Uuid = Uuid::from_u128(0xA5B4_1E22_7C3D_4F6A_9E81_2D5C_6B0F_3A00);
pub const OTA_PASSWORD: Uuid = Uuid::from_u128(0xA5B4_1E23_7C3D_4F6A_9E81_2D5C_6B0F_3A00);
pub const OTA_UPDATE_URL: Uuid = Uuid::from_u128(0xA5B4_1E24_7C3D_4F6A_9E81_2D5C_6B0F_3A00);
pub const OTA_PROGRESS: Uuid = Uuid::from_u128(0xA5B4_1E25_7C3D_4F6A_9E81_2D5C_6B0F_3A00);

/// Connect filter target for the central role.
pub const SENSOR_DISCOVERY: Uuid = OTA_SERVICE;

// Companion sensor - engine

pub const ENGINE_RPM: Uuid = Uuid::from_u128(0x6BE9_B8B7_BAA5_415D_A763_ABF7_C595_B4F0);
pub const ENGINE_RPM_RPM: Uuid = Uuid::from_u128(0xC189_6265_A505_4E7A_8FF1_0749_71F3_CC7C);

pub const ENGINE_TEMPERATURE: Uuid = Uuid::from_u128(0x5151_CA1F_111F_491A_A476_9831_39F8_2848);
pub const ENGINE_TEMPERATURE_ENGINE: Uuid =
    Uuid::from_u128(0x5151_CA20_111F_491A_A476_9831_39F8_2848);

// Companion sensor - location

pub const LOCATION: Uuid = Uuid::from_u128(0x0D7E_6C10_44B2_4C0B_8D3A_51E6_F2A9_7C40);
pub const LOCATION_GPS_AVAILABLE: Uuid = Uuid::from_u128(0x0D7E_6C11_44B2_4C0B_8D3A_51E6_F2A9_7C40);
pub const LOCATION_SPEED_KPH: Uuid = Uuid::from_u128(0x0D7E_6C12_44B2_4C0B_8D3A_51E6_F2A9_7C40);
pub const LOCATION_GPS_TIME: Uuid = Uuid::from_u128(0x0D7E_6C13_44B2_4C0B_8D3A_51E6_F2A9_7C40);
