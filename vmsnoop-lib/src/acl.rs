//! Reassembly of fragmented ACL data into complete ATT PDUs.
//!
//! A first fragment (PB flag `00` or `10`) carries the L2CAP header that
//! declares the total PDU length. If the PDU does not fit, the rest arrives
//! in continuation fragments (PB flag `01`) that are appended until the
//! declared length is reached. Only one reassembly is in flight at a time.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::constants::{ACL_HEADER_SIZE, L2CAP_CID_ATT, L2CAP_HEADER_SIZE};
use crate::error::SnoopError;
use crate::hci::{AclHeader, PacketBoundary};

/// Bytes collected so far for a PDU split across fragments
#[derive(Debug, Clone, PartialEq)]
pub struct ReassemblyBuffer {
    pub data: BytesMut,
    pub total_len: usize,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<ReassemblyBuffer>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&ReassemblyBuffer> {
        self.pending.as_ref()
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one ACL record (header included). Returns a complete ATT PDU once
    /// one is available.
    pub fn push(&mut self, header: &AclHeader, packet: &Bytes, seq: u64) -> Result<Option<Bytes>, SnoopError> {
        let size = header.length() as usize;
        let end = ACL_HEADER_SIZE + size;
        if packet.len() < end {
            return Err(SnoopError::malformed(
                seq,
                format!(
                    "ACL length {} exceeds the {} bytes captured",
                    size,
                    packet.len().saturating_sub(ACL_HEADER_SIZE)
                ),
            ));
        }
        let fragment = packet.slice(ACL_HEADER_SIZE..end);

        match header.packet_boundary() {
            PacketBoundary::FirstNonFlushable | PacketBoundary::FirstFlushable => self.first_fragment(fragment, seq),
            PacketBoundary::Continuation => Ok(self.continuation(&fragment, seq)),
            PacketBoundary::Other(flag) => {
                debug!("#{} unsupported packet boundary flag {:#04b}", seq, flag);
                Ok(None)
            }
        }
    }

    fn first_fragment(&mut self, fragment: Bytes, seq: u64) -> Result<Option<Bytes>, SnoopError> {
        if fragment.len() < L2CAP_HEADER_SIZE {
            return Err(SnoopError::malformed(
                seq,
                format!("L2CAP header needs 4 bytes, got {}", fragment.len()),
            ));
        }

        let pdu_len = LittleEndian::read_u16(&fragment[0..2]) as usize;
        let channel = LittleEndian::read_u16(&fragment[2..4]);
        if channel != L2CAP_CID_ATT {
            return Err(SnoopError::ChannelMismatch { seq, channel });
        }

        let body = fragment.slice(L2CAP_HEADER_SIZE..);
        if let Some(dropped) = self.pending.take() {
            debug!(
                "#{} new PDU replaces unfinished reassembly ({} of {} bytes)",
                seq,
                dropped.data.len(),
                dropped.total_len
            );
        }

        if pdu_len > body.len() {
            debug!("#{} PDU of {} bytes starts with {} bytes", seq, pdu_len, body.len());
            self.pending = Some(ReassemblyBuffer {
                data: BytesMut::from(body.as_ref()),
                total_len: pdu_len,
            });
            return Ok(None);
        }

        Ok(Some(body))
    }

    fn continuation(&mut self, fragment: &[u8], seq: u64) -> Option<Bytes> {
        let Some(buffer) = self.pending.as_mut() else {
            debug!("#{} continuation fragment without a pending PDU", seq);
            return None;
        };

        buffer.data.extend_from_slice(fragment);
        if buffer.data.len() < buffer.total_len {
            return None;
        }

        let buffer = self.pending.take()?;
        debug!("#{} reassembled PDU of {} bytes", seq, buffer.data.len());
        Some(buffer.data.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl(handle: u16, boundary: u8, fragment: &[u8]) -> (AclHeader, Bytes) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(handle | (u16::from(boundary) << 12)).to_le_bytes());
        buf.extend_from_slice(&(fragment.len() as u16).to_le_bytes());
        buf.extend_from_slice(fragment);
        let header = AclHeader::parse(&buf, 0).unwrap();
        (header, Bytes::from(buf))
    }

    fn l2cap(pdu_len: u16, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&pdu_len.to_le_bytes());
        buf.extend_from_slice(&L2CAP_CID_ATT.to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_single_fragment() {
        let mut r = Reassembler::new();
        let (h, p) = acl(0x40, 0b10, &l2cap(3, &[0x0a, 0x10, 0x00]));
        assert_eq!(r.push(&h, &p, 1).unwrap().unwrap().as_ref(), &[0x0a, 0x10, 0x00]);
        assert!(r.pending().is_none());
    }

    #[test]
    fn test_non_flushable_start_is_also_a_first_fragment() {
        let mut r = Reassembler::new();
        let (h, p) = acl(0x40, 0b00, &l2cap(3, &[0x0a, 0x10, 0x00]));
        assert!(r.push(&h, &p, 1).unwrap().is_some());
    }

    #[test]
    fn test_fragmented_pdu() {
        let mut r = Reassembler::new();
        let (h, p) = acl(0x40, 0b10, &l2cap(6, &[1, 2, 3]));
        assert!(r.push(&h, &p, 1).unwrap().is_none());
        assert_eq!(r.pending().unwrap().total_len, 6);

        let (h, p) = acl(0x40, 0b01, &[4, 5]);
        assert!(r.push(&h, &p, 2).unwrap().is_none());

        let (h, p) = acl(0x40, 0b01, &[6]);
        assert_eq!(r.push(&h, &p, 3).unwrap().unwrap().as_ref(), &[1, 2, 3, 4, 5, 6]);
        assert!(r.pending().is_none());
    }

    #[test]
    fn test_new_first_fragment_replaces_pending() {
        let mut r = Reassembler::new();
        let (h, p) = acl(0x40, 0b10, &l2cap(10, &[1, 2]));
        r.push(&h, &p, 1).unwrap();

        let (h, p) = acl(0x40, 0b10, &l2cap(4, &[7, 8]));
        r.push(&h, &p, 2).unwrap();
        assert_eq!(r.pending().unwrap().total_len, 4);

        let (h, p) = acl(0x40, 0b01, &[9, 10]);
        assert_eq!(r.push(&h, &p, 3).unwrap().unwrap().as_ref(), &[7, 8, 9, 10]);
    }

    #[test]
    fn test_orphan_continuation_is_dropped() {
        let mut r = Reassembler::new();
        let (h, p) = acl(0x40, 0b01, &[0x0b, 0x01]);
        assert!(r.push(&h, &p, 1).unwrap().is_none());
    }

    #[test]
    fn test_reserved_boundary_ignored() {
        let mut r = Reassembler::new();
        let (h, p) = acl(0x40, 0b11, &l2cap(1, &[0x0b]));
        assert!(r.push(&h, &p, 1).unwrap().is_none());
    }

    #[test]
    fn test_wrong_channel_is_fatal() {
        let mut r = Reassembler::new();
        let mut frag = l2cap(1, &[0x0b]);
        frag[2] = 0x05;
        let (h, p) = acl(0x40, 0b10, &frag);
        assert!(matches!(
            r.push(&h, &p, 9),
            Err(SnoopError::ChannelMismatch { seq: 9, channel: 0x0005 })
        ));
    }

    #[test]
    fn test_declared_length_overrun_is_fatal() {
        let mut r = Reassembler::new();
        let (h, mut p) = acl(0x40, 0b10, &l2cap(1, &[0x0b]));
        p.truncate(p.len() - 2);
        assert!(matches!(r.push(&h, &p, 4), Err(SnoopError::Malformed { seq: 4, .. })));
    }
}
