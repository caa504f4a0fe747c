use modular_bitfield::prelude::*;
use num_enum::FromPrimitive;
use tracing::trace;

use crate::constants::{ACL_HEADER_SIZE, HCI_LE_META_EVENT};
use crate::error::SnoopError;

/// HCI ACL data header (Vol 4, Part E, 5.4.2), little-endian on the wire.
#[bitfield(bytes = 4)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AclHeader {
    pub handle: B12,
    pub boundary: B2,
    pub broadcast: B2,
    pub length: u16,
}

impl AclHeader {
    pub fn packet_boundary(&self) -> PacketBoundary {
        PacketBoundary::from_primitive(self.boundary())
    }

    pub fn parse(data: &[u8], seq: u64) -> Result<Self, SnoopError> {
        let bytes: [u8; ACL_HEADER_SIZE] = data
            .get(..ACL_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| SnoopError::malformed(seq, format!("ACL header needs 4 bytes, got {}", data.len())))?;
        Ok(AclHeader::from_bytes(bytes))
    }
}

/// Packet boundary flag of an ACL header
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum PacketBoundary {
    /// First non-automatically-flushable packet (host to controller)
    FirstNonFlushable = 0b00,
    Continuation = 0b01,
    /// First automatically-flushable packet
    FirstFlushable = 0b10,
    #[num_enum(catch_all)]
    Other(u8),
}

/// Where a captured HCI packet should go next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Route {
    Event,
    Acl(AclHeader),
    Discard,
}

/// Route one record payload given the tracked connection handle.
pub fn classify(payload: &[u8], tracked: Option<u16>, seq: u64) -> Result<Route, SnoopError> {
    let Some(&first) = payload.first() else {
        return Ok(Route::Discard);
    };

    if first == HCI_LE_META_EVENT {
        return Ok(Route::Event);
    }

    let Some(tracked) = tracked else {
        return Ok(Route::Discard);
    };

    let header = AclHeader::parse(payload, seq)?;
    if header.handle() != tracked {
        trace!("#{} ignoring ACL data for handle {:#05x}", seq, header.handle());
        return Ok(Route::Discard);
    }

    Ok(Route::Acl(header))
}
