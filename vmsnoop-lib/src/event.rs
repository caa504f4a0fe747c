//! HCI LE meta events: advertising reports name the bikes around, and the
//! enhanced connection complete event tells which ACL handle to follow.

use byteorder::{ByteOrder, LittleEndian};
use num_enum::FromPrimitive;
use regex::bytes::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, trace};

use crate::constants::{AD_TYPE_COMPLETE_NAME, AD_TYPE_SHORT_NAME};
use crate::error::SnoopError;
use crate::output::{Candidate, Decoded, Diagnostic, report};

/// Bike advertising names look like `ES3-...`, `EX1-...`, `EA...`, `EV...`
static BIKE_NAME: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"^E[SXAV][0-9]-"));
const MIN_NAME_LEN: usize = 5;

/// Bluetooth device address in display order (most significant byte first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    /// Addresses travel least significant byte first.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        let mut address: [u8; 6] = bytes.try_into().ok()?;
        address.reverse();
        Some(Self(address))
    }

    /// Parse a user supplied address. Separators (`:`, `-`, spaces) are
    /// ignored and an empty string means no address.
    pub fn parse(input: &str) -> Result<Option<Self>, SnoopError> {
        let cleaned: String = input.chars().filter(|c| !matches!(c, ' ' | '-' | ':')).collect();
        if cleaned.is_empty() {
            return Ok(None);
        }

        let bytes = hex::decode(&cleaned).map_err(|e| SnoopError::InvalidAddress(format!("{}: {}", input, e)))?;
        let address: [u8; 6] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| SnoopError::InvalidAddress(format!("{}: expected 6 bytes, got {}", input, b.len())))?;
        Ok(Some(Self(address)))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Names a device advertised, from scan responses and advertising data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceNames {
    pub short: Option<String>,
    pub full: Option<String>,
}

impl DeviceNames {
    /// Complete name when known, otherwise the shortened one.
    pub fn preferred(&self) -> &str {
        self.full.as_deref().or(self.short.as_deref()).unwrap_or_default()
    }
}

/// How the bike to follow is picked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetPolicy {
    /// Only follow connections to this address
    Address(DeviceAddress),
    /// Follow a connection to the single bike seen advertising
    #[default]
    Discover,
}

/// LE meta event sub-event codes (Vol 4, Part E, 7.7.65)
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum LeSubEvent {
    AdvertisingReport = 0x02,
    ConnectionUpdateComplete = 0x03,
    ReadRemoteFeaturesComplete = 0x04,
    RemoteConnectionParameterRequest = 0x06,
    EnhancedConnectionComplete = 0x0A,
    #[num_enum(catch_all)]
    Other(u8),
}

/// What an advertising event type says about the AD structures that follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdvertisingLayout {
    /// A flags structure precedes the name
    Flags,
    /// The name comes first
    NameFirst,
    /// Never sent by a bike
    Skip,
    Unknown,
}

impl AdvertisingLayout {
    fn of(event_type: u8) -> Self {
        match event_type {
            0x00 | 0x10 | 0x20 | 0x60 => Self::Flags,
            0x04 | 0x13 | 0x14 | 0x24 => Self::NameFirst,
            // scannable and non-connectable advertising
            0x02 | 0x03 | 0x12 | 0x22 | 0x23 => Self::Skip,
            _ => Self::Unknown,
        }
    }
}

// event code, parameter length, sub-event
const SUB_EVENT_OFFSET: usize = 2;
const ADV_EVENT_TYPE_OFFSET: usize = 4;
const ADV_ADDRESS: std::ops::Range<usize> = 6..12;
const ADV_DATA_LEN_OFFSET: usize = 12;
const ADV_DATA_OFFSET: usize = 13;
const CONN_HANDLE: std::ops::Range<usize> = 4..6;
const CONN_PEER_ADDRESS: std::ops::Range<usize> = 8..14;

fn field<'a>(data: &'a [u8], range: std::ops::Range<usize>, seq: u64, what: &str) -> Result<&'a [u8], SnoopError> {
    data.get(range.clone()).ok_or_else(|| {
        SnoopError::malformed(
            seq,
            format!("{} needs bytes {}..{} of a {} byte event", what, range.start, range.end, data.len()),
        )
    })
}

#[derive(Debug, Default)]
pub struct EventParser {
    policy: TargetPolicy,
    devices: BTreeMap<DeviceAddress, DeviceNames>,
}

impl EventParser {
    pub fn new(policy: TargetPolicy) -> Self {
        Self {
            policy,
            devices: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> TargetPolicy {
        self.policy
    }

    pub fn devices(&self) -> &BTreeMap<DeviceAddress, DeviceNames> {
        &self.devices
    }

    pub fn reset(&mut self) {
        self.devices.clear();
    }

    /// Bikes that could be the target, when discovery found more than one.
    pub fn ambiguous_candidates(&self) -> Option<Vec<Candidate>> {
        if self.policy != TargetPolicy::Discover || self.devices.len() < 2 {
            return None;
        }
        Some(
            self.devices
                .iter()
                .map(|(address, names)| Candidate {
                    address: *address,
                    name: names.preferred().to_string(),
                })
                .collect(),
        )
    }

    /// Parse one LE meta event. Returns the connection handle to follow when
    /// the event is an accepted connection complete.
    pub fn parse(&mut self, data: &[u8], seq: u64, out: &mut Vec<Decoded>) -> Result<Option<u16>, SnoopError> {
        let sub_event = field(data, SUB_EVENT_OFFSET..SUB_EVENT_OFFSET + 1, seq, "sub-event")?[0];

        match LeSubEvent::from_primitive(sub_event) {
            LeSubEvent::AdvertisingReport => {
                self.advertising_report(data, seq, out)?;
                Ok(None)
            }
            LeSubEvent::EnhancedConnectionComplete => self.connection_complete(data, seq, out),
            LeSubEvent::ConnectionUpdateComplete
            | LeSubEvent::ReadRemoteFeaturesComplete
            | LeSubEvent::RemoteConnectionParameterRequest => Ok(None),
            LeSubEvent::Other(code) => {
                trace!("#{} ignoring LE sub-event {:#04x}", seq, code);
                Ok(None)
            }
        }
    }

    fn advertising_report(&mut self, data: &[u8], seq: u64, out: &mut Vec<Decoded>) -> Result<(), SnoopError> {
        let header = field(data, 0..ADV_DATA_OFFSET, seq, "advertising report")?;
        let event_type = header[ADV_EVENT_TYPE_OFFSET];
        let data_len = header[ADV_DATA_LEN_OFFSET] as usize;
        if data_len == 0 {
            return Ok(());
        }

        let has_flags = match AdvertisingLayout::of(event_type) {
            AdvertisingLayout::Flags => true,
            AdvertisingLayout::NameFirst => false,
            AdvertisingLayout::Skip => return Ok(()),
            AdvertisingLayout::Unknown => {
                report(out, Diagnostic::UnknownAdvertisingEventType { seq, event_type });
                return Ok(());
            }
        };

        let Some(address) = DeviceAddress::from_wire(&header[ADV_ADDRESS]) else {
            return Ok(());
        };
        let end = (ADV_DATA_OFFSET + data_len).min(data.len());
        let Some((ad_type, name)) = local_name(&data[ADV_DATA_OFFSET..end], has_flags) else {
            debug!("#{} advertising data of {} carries no name", seq, address);
            return Ok(());
        };

        if name.len() < MIN_NAME_LEN || !is_bike_name(name) {
            return Ok(());
        }

        let name = String::from_utf8_lossy(name).into_owned();
        let names = self.devices.entry(address).or_default();
        if ad_type == AD_TYPE_SHORT_NAME {
            names.short = Some(name);
        } else {
            names.full = Some(name);
        }
        debug!("#{} bike {} advertises as {}", seq, address, names.preferred());
        Ok(())
    }

    fn connection_complete(
        &mut self,
        data: &[u8],
        seq: u64,
        out: &mut Vec<Decoded>,
    ) -> Result<Option<u16>, SnoopError> {
        let peer = field(data, CONN_PEER_ADDRESS, seq, "peer address")?;
        let handle = LittleEndian::read_u16(field(data, CONN_HANDLE, seq, "connection handle")?);
        let Some(address) = DeviceAddress::from_wire(peer) else {
            return Ok(None);
        };

        match self.policy {
            TargetPolicy::Address(target) if target != address => {
                debug!("#{} ignoring connection to {}", seq, address);
                return Ok(None);
            }
            TargetPolicy::Address(_) => {}
            TargetPolicy::Discover => {
                if !self.devices.contains_key(&address) {
                    debug!("#{} ignoring connection to {}, not a discovered bike", seq, address);
                    return Ok(None);
                }
                if self.devices.len() > 1 {
                    report(out, Diagnostic::AmbiguousConnection { seq, address });
                    return Ok(None);
                }
            }
        }

        debug!("#{} connected to {} on handle {:#05x}", seq, address, handle);
        Ok(Some(handle))
    }
}

/// Find the local name AD structure, skipping a leading flags structure when
/// the event type carries one.
/// An uncompilable pattern matches nothing.
fn is_bike_name(name: &[u8]) -> bool {
    BIKE_NAME.as_ref().is_ok_and(|pattern| pattern.is_match(name))
}

fn local_name(ad: &[u8], has_flags: bool) -> Option<(u8, &[u8])> {
    let ad = if has_flags {
        let flags_len = *ad.first()? as usize;
        ad.get(flags_len + 1..)?
    } else {
        ad
    };

    let len = *ad.first()? as usize;
    let ad_type = *ad.get(1)?;
    if ad_type != AD_TYPE_SHORT_NAME && ad_type != AD_TYPE_COMPLETE_NAME {
        return None;
    }
    Some((ad_type, ad.get(2..len + 1)?))
}
