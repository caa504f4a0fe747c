//! btsnoop capture container.
//!
//! A capture is a 16-byte preamble followed by records, each made of a
//! 24-byte header and `included_length` bytes of HCI data. All header fields
//! are big-endian.
//!
//! ```text
//! preamble: magic[8] version[4] datalink[4]
//! record:   original_len[4] included_len[4] flags[4] drops[4] timestamp[8] data[included_len]
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use num_enum::FromPrimitive;
use std::fmt;
use zerocopy::byteorder::big_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::*;
use crate::error::SnoopError;

/// Datalink types a btsnoop file may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum Datalink {
    HciUnencapsulated = 1001,
    HciUart = 1002,
    HciBscp = 1003,
    HciSerial = 1004,
    Unassigned = 1005,
    #[num_enum(catch_all)]
    Reserved(u32),
}

impl fmt::Display for Datalink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datalink::HciUnencapsulated => write!(f, "HCI Un-encapsulated"),
            Datalink::HciUart => write!(f, "HCI UART (H4)"),
            Datalink::HciBscp => write!(f, "HCI BSCP"),
            Datalink::HciSerial => write!(f, "HCI Serial (H5)"),
            Datalink::Unassigned => write!(f, "Unassigned"),
            Datalink::Reserved(value) => write!(f, "Reserved / Unassigned ({})", value),
        }
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CaptureHeaderRaw {
    pub magic: [u8; 8],
    pub version: U32,
    pub datalink: U32,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct RecordHeaderRaw {
    pub original_length: U32,
    pub included_length: U32,
    pub flags: U32,
    pub cumulative_drops: U32,
    pub timestamp_us: U64, // since 0000-01-01
}

/// Validated capture preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    pub version: u32,
    pub datalink: Datalink,
}

impl CaptureHeader {
    /// Validate the 16-byte preamble at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, SnoopError> {
        let raw = data
            .get(..CAPTURE_HEADER_SIZE)
            .and_then(|bytes| CaptureHeaderRaw::read_from_bytes(bytes).ok())
            .ok_or(SnoopError::Truncated {
                offset: 0,
                needed: CAPTURE_HEADER_SIZE,
                available: data.len(),
            })?;

        if raw.magic != BTSNOOP_MAGIC {
            return Err(SnoopError::BadMagic);
        }

        let version = raw.version.get();
        if version != BTSNOOP_VERSION {
            return Err(SnoopError::UnsupportedVersion(version));
        }

        let datalink = Datalink::from_primitive(raw.datalink.get());
        if datalink != Datalink::HciUnencapsulated {
            return Err(SnoopError::UnsupportedDatalink(datalink));
        }

        Ok(Self { version, datalink })
    }
}

/// One record of the capture. Lives for a single decode iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    /// Position in the capture, starting at 1
    pub seq: u64,
    pub original_length: u32,
    pub included_length: u32,
    pub flags: u32,
    pub cumulative_drops: u32,
    pub timestamp_us: u64,
    pub data: Bytes,
}

impl PacketRecord {
    /// Record data limited to the original length.
    pub fn payload(&self) -> Bytes {
        let len = self.data.len().min(self.original_length as usize);
        self.data.slice(..len)
    }

    /// Wall-clock time of the record, if it is representable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let micros = i64::try_from(self.timestamp_us).ok()?.checked_sub(BTSNOOP_EPOCH_DELTA_US)?;
        DateTime::from_timestamp_micros(micros)
    }
}

/// Lazy, single-pass iterator over the records of an in-memory capture.
pub struct CaptureReader {
    header: CaptureHeader,
    data: Bytes,
    offset: usize,
    seq: u64,
    failed: bool,
}

impl CaptureReader {
    pub fn new(data: impl Into<Bytes>) -> Result<Self, SnoopError> {
        let data = data.into();
        let header = CaptureHeader::parse(&data)?;
        Ok(Self {
            header,
            data,
            offset: CAPTURE_HEADER_SIZE,
            seq: 0,
            failed: false,
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn read_record(&mut self) -> Result<PacketRecord, SnoopError> {
        if self.remaining() < RECORD_HEADER_SIZE {
            return Err(SnoopError::Truncated {
                offset: self.offset,
                needed: RECORD_HEADER_SIZE,
                available: self.remaining(),
            });
        }

        let header_bytes = &self.data[self.offset..self.offset + RECORD_HEADER_SIZE];
        let raw = RecordHeaderRaw::read_from_bytes(header_bytes).map_err(|_| SnoopError::Truncated {
            offset: self.offset,
            needed: RECORD_HEADER_SIZE,
            available: header_bytes.len(),
        })?;
        self.offset += RECORD_HEADER_SIZE;

        let included = raw.included_length.get() as usize;
        if self.remaining() < included {
            return Err(SnoopError::Truncated {
                offset: self.offset,
                needed: included,
                available: self.remaining(),
            });
        }

        let data = self.data.slice(self.offset..self.offset + included);
        self.offset += included;
        self.seq += 1;

        Ok(PacketRecord {
            seq: self.seq,
            original_length: raw.original_length.get(),
            included_length: raw.included_length.get(),
            flags: raw.flags.get(),
            cumulative_drops: raw.cumulative_drops.get(),
            timestamp_us: raw.timestamp_us.get(),
            data,
        })
    }
}

impl Iterator for CaptureReader {
    type Item = Result<PacketRecord, SnoopError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining() == 0 {
            return None;
        }
        let record = self.read_record();
        self.failed = record.is_err();
        Some(record)
    }
}
