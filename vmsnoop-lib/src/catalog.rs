//! Attribute handle bookkeeping.
//!
//! The catalog maps GATT handles to the UUIDs learned from discovery
//! responses. Known bike characteristics are resolved once, when an entry is
//! created, so later lookups never compare UUID strings.

use num_enum::TryFromPrimitive;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use strum_macros::Display;
use tracing::debug;

use crate::error::SnoopError;

/// 128-bit UUID stored in canonical (big-endian) byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128(pub [u8; 16]);

impl Uuid128 {
    /// Build from the little-endian byte order used on the ATT wire.
    pub fn from_le_slice(bytes: &[u8]) -> Result<Self, SnoopError> {
        let mut uuid: [u8; 16] = bytes
            .try_into()
            .map_err(|_| SnoopError::InvalidUuidLength(bytes.len()))?;
        uuid.reverse();
        Ok(Self(uuid))
    }

    /// First group of the hyphenated form, e.g. `6acc5501`
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..]
        )
    }
}

impl Serialize for Uuid128 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Common tail of every bike characteristic: `6acc55XX-e631-4069-944d-b8ca7598ad50`
const BIKE_UUID_PREFIX: [u8; 3] = [0x6a, 0xcc, 0x55];
const BIKE_UUID_SUFFIX: [u8; 12] = [0xe6, 0x31, 0x40, 0x69, 0x94, 0x4d, 0xb8, 0xca, 0x75, 0x98, 0xad, 0x50];

/// Bike characteristics with a known meaning, keyed by the varying UUID byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum KnownCharacteristic {
    // security service
    Challenge = 0x01,
    KeyIndex = 0x02,
    BackupCode = 0x03,
    BikeMessage = 0x05,

    // defense service
    LockState = 0x21,
    UnlockRequest = 0x22,
    AlarmState = 0x23,
    AlarmMode = 0x24,

    // movement service
    Distance = 0x31,
    Speed = 0x32,
    UnitSystem = 0x33,
    PowerLevel = 0x34,
    SpeedLimit = 0x35,
    EShifterGear = 0x36,
    #[strum(serialize = "E_SHIFTIG_POINTS")]
    #[serde(rename = "E_SHIFTIG_POINTS")]
    EShiftingPoints = 0x37,
    EShifterMode = 0x38,

    // bike info service
    MotorBatteryLevel = 0x41,
    MotorBatteryState = 0x42,
    ModuleBatteryLevel = 0x43,
    ModuleBatteryState = 0x44,
    BikeFirmwareVersion = 0x4a,
    BleChipFirmwareVersion = 0x4b,
    ControllerFirmwareVersion = 0x4c,
    PcbaHardwareVersion = 0x4d,
    GsmFirmwareVersion = 0x4e,
    EShifterFirmwareVersion = 0x4f,
    BatteryFirmwareVersion = 0x50,
    FrameNumber = 0x52,

    // bike state service
    ModuleMode = 0x61,
    ModuleState = 0x62,
    Errors = 0x63,
    WheelSize = 0x64,
    Clock = 0x67,

    // sound service
    PlaySound = 0x71,
    SoundVolume = 0x72,
    BellSound = 0x74,

    // light service
    LightMode = 0x81,
    Sensor = 0x84,
}

/// GATT service a known characteristic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BikeService {
    Security,
    Defense,
    Movement,
    BikeInfo,
    BikeState,
    Sound,
    Light,
}

impl KnownCharacteristic {
    pub fn from_uuid(uuid: &Uuid128) -> Option<Self> {
        let bytes = &uuid.0;
        if bytes[..3] != BIKE_UUID_PREFIX || bytes[4..] != BIKE_UUID_SUFFIX {
            return None;
        }
        Self::try_from_primitive(bytes[3]).ok()
    }

    pub fn uuid(self) -> Uuid128 {
        let mut bytes = [0u8; 16];
        bytes[..3].copy_from_slice(&BIKE_UUID_PREFIX);
        bytes[3] = self as u8;
        bytes[4..].copy_from_slice(&BIKE_UUID_SUFFIX);
        Uuid128(bytes)
    }

    pub fn service(self) -> BikeService {
        match self as u8 >> 4 {
            0x0 => BikeService::Security,
            0x2 => BikeService::Defense,
            0x3 => BikeService::Movement,
            0x4 | 0x5 => BikeService::BikeInfo,
            0x6 => BikeService::BikeState,
            0x7 => BikeService::Sound,
            _ => BikeService::Light,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeEntry {
    pub uuid: Uuid128,
    /// Set when the handle was inferred as a descriptor of the previous
    /// handle; two-byte writes to it are CCC configuration
    pub looks_like_config: bool,
    pub known: Option<KnownCharacteristic>,
}

impl AttributeEntry {
    fn new(uuid: Uuid128, looks_like_config: bool) -> Self {
        Self {
            uuid,
            looks_like_config,
            known: KnownCharacteristic::from_uuid(&uuid),
        }
    }
}

/// A handle as seen by consumers of decoded events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedHandle {
    pub handle: u16,
    pub uuid: Option<Uuid128>,
    pub known: Option<KnownCharacteristic>,
}

impl ResolvedHandle {
    pub fn is(&self, characteristic: KnownCharacteristic) -> bool {
        self.known == Some(characteristic)
    }
}

#[derive(Debug, Default, Clone)]
pub struct AttributeCatalog {
    entries: HashMap<u16, AttributeEntry>,
}

impl AttributeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the UUID of a characteristic value handle.
    pub fn insert(&mut self, handle: u16, uuid: Uuid128) {
        debug!("handle {:#06x} -> {}", handle, uuid);
        self.entries.insert(handle, AttributeEntry::new(uuid, false));
    }

    /// Descriptor handles directly follow their characteristic value handle.
    /// If `handle` is unknown but `handle - 1` is known, copy its UUID and
    /// mark the new entry as configuration. Returns whether an entry was added.
    pub fn infer_from_predecessor(&mut self, handle: u16) -> bool {
        if self.entries.contains_key(&handle) {
            return false;
        }
        let Some(previous) = handle.checked_sub(1).and_then(|h| self.entries.get(&h)) else {
            return false;
        };

        let entry = AttributeEntry::new(previous.uuid, true);
        debug!("handle {:#06x} inferred as configuration of {}", handle, entry.uuid);
        self.entries.insert(handle, entry);
        true
    }

    pub fn get(&self, handle: u16) -> Option<&AttributeEntry> {
        self.entries.get(&handle)
    }

    pub fn resolve(&self, handle: u16) -> ResolvedHandle {
        let entry = self.entries.get(&handle);
        ResolvedHandle {
            handle,
            uuid: entry.map(|e| e.uuid),
            known: entry.and_then(|e| e.known),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in handle order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &AttributeEntry)> {
        let mut handles: Vec<_> = self.entries.keys().copied().collect();
        handles.sort_unstable();
        handles.into_iter().filter_map(|h| self.entries.get(&h).map(|e| (h, e)))
    }
}
