//! Paired peripheral records, advertised names and the die's BLE surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::faces::DieType;

/// Pixels GATT service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xa6b90001_7a5a_43f2_a962_350c8edc9b5b);
/// Characteristic the die notifies on
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xa6b90002_7a5a_43f2_a962_350c8edc9b5b);
/// Characteristic the host writes to
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xa6b90003_7a5a_43f2_a962_350c8edc9b5b);

const BLUETOOTH_BASE_PREFIX: &str = "0000";
const BLUETOOTH_BASE_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Expand a 16-bit (4 hex digits) or 32-bit (8 hex digits) UUID into the
/// 128-bit Bluetooth base UUID
pub fn expand_short_uuid(short: &str) -> Option<Uuid> {
    let short = short.trim().trim_start_matches("0x");
    if !short.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let full = match short.len() {
        4 => format!("{}{}{}", BLUETOOTH_BASE_PREFIX, short, BLUETOOTH_BASE_SUFFIX),
        8 => format!("{}{}", short, BLUETOOTH_BASE_SUFFIX),
        _ => return None,
    };
    Uuid::parse_str(&full).ok()
}

/// Stable identifier burned into each die
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PixelId(pub u32);

impl PixelId {
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > 8 {
            return None;
        }
        u32::from_str_radix(s, 16).ok().map(Self)
    }

    /// Name advertised while the die runs its bootloader
    pub fn bootloader_name(&self) -> String {
        format!("PXL{}", self)
    }

    /// Name advertised by the application until the user renames the die
    pub fn default_name(&self) -> String {
        format!("Pixel{}", self)
    }
}

impl std::fmt::Display for PixelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl std::str::FromStr for PixelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u32::from_str_radix(s.trim_start_matches("0x"), 16).map(Self)
    }
}

/// Mode a die was advertising in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvertisedMode {
    Bootloader,
    Application,
}

/// Recover the pixel id and mode from an advertised default name.
/// Renamed dice advertise their user name and yield `None`.
pub fn parse_advertised_name(name: &str) -> Option<(PixelId, AdvertisedMode)> {
    if let Some(hex) = name.strip_prefix("Pixel") {
        return PixelId::from_hex(hex).map(|id| (id, AdvertisedMode::Application));
    }
    if let Some(hex) = name.strip_prefix("PXL") {
        return PixelId::from_hex(hex).map(|id| (id, AdvertisedMode::Bootloader));
    }
    None
}

/// Host-side record of a paired die
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedPeripheral {
    /// Identifier the OS Bluetooth stack knows the die by
    pub system_id: String,
    pub pixel_id: PixelId,
    pub name: String,
    pub die_type: DieType,
    /// Profile last programmed, or to be programmed
    pub profile_uuid: Option<Uuid>,
    /// Hash of the last DataSet the die acknowledged
    pub profile_hash: Option<u32>,
    /// Build timestamp of the firmware the die runs
    pub firmware_timestamp: Option<DateTime<Utc>>,
    pub paired_at: DateTime<Utc>,
}

impl PairedPeripheral {
    pub fn new(system_id: impl Into<String>, pixel_id: PixelId, die_type: DieType) -> Self {
        Self {
            system_id: system_id.into(),
            pixel_id,
            name: pixel_id.default_name(),
            die_type,
            profile_uuid: None,
            profile_hash: None,
            firmware_timestamp: None,
            paired_at: Utc::now(),
        }
    }

    /// No transfer is needed when the die already holds `hash`
    pub fn is_up_to_date(&self, hash: u32) -> bool {
        self.profile_hash == Some(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let id = PixelId(0x00ab_12cd);
        assert_eq!(id.to_string(), "00AB12CD");
        assert_eq!(id.bootloader_name(), "PXL00AB12CD");
        assert_eq!(id.default_name(), "Pixel00AB12CD");
    }

    #[test]
    fn test_parse_advertised_name() {
        assert_eq!(
            parse_advertised_name("PXL00AB12CD"),
            Some((PixelId(0x00ab_12cd), AdvertisedMode::Bootloader))
        );
        assert_eq!(
            parse_advertised_name("Pixel0000BEEF"),
            Some((PixelId(0xbeef), AdvertisedMode::Application))
        );
        assert_eq!(parse_advertised_name("Lucky d20"), None);
        assert_eq!(parse_advertised_name("PXL123456789"), None);
    }

    #[test]
    fn test_expand_short_uuid() {
        assert_eq!(
            expand_short_uuid("180a").unwrap().to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            expand_short_uuid("6e400001").unwrap().to_string(),
            "6e400001-0000-1000-8000-00805f9b34fb"
        );
        assert!(expand_short_uuid("18a").is_none());
        assert!(expand_short_uuid("zz0a").is_none());
    }

    #[test]
    fn test_service_uuids() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "a6b90001-7a5a-43f2-a962-350c8edc9b5b"
        );
        assert_eq!(
            WRITE_CHARACTERISTIC_UUID.to_string(),
            "a6b90003-7a5a-43f2-a962-350c8edc9b5b"
        );
    }

    #[test]
    fn test_up_to_date() {
        let mut p = PairedPeripheral::new("sys-1", PixelId(1), DieType::D20);
        assert!(!p.is_up_to_date(42));
        p.profile_hash = Some(42);
        assert!(p.is_up_to_date(42));
    }
}
