//! Attribute Protocol decoding.
//!
//! Discovery responses feed the [`AttributeCatalog`]; reads, writes and
//! notifications become [`AttEvent`]s. A read or write request is remembered
//! until its response arrives, so responses can be attributed to a handle.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use num_enum::FromPrimitive;
use serde::Serialize;
use tracing::debug;

use crate::catalog::{AttributeCatalog, KnownCharacteristic, ResolvedHandle, Uuid128};
use crate::cipher::Cipher;
use crate::constants::*;
use crate::error::SnoopError;
use crate::output::{AttEvent, CccConfig, Decoded, Diagnostic, EventKind, Payload, PayloadKind, report};

/// ATT methods this decoder knows about (Vol 3, Part F, 3.4.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize)]
#[repr(u8)]
pub enum AttOpcode {
    ErrorRsp = 0x01,
    ExchangeMtuReq = 0x02,
    ExchangeMtuRsp = 0x03,
    FindInformationReq = 0x04,
    FindInformationRsp = 0x05,
    ReadByTypeReq = 0x08,
    ReadByTypeRsp = 0x09,
    ReadReq = 0x0A,
    ReadRsp = 0x0B,
    ReadByGroupTypeReq = 0x10,
    ReadByGroupTypeRsp = 0x11,
    WriteReq = 0x12,
    WriteRsp = 0x13,
    HandleValueNtf = 0x1B,
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl AttOpcode {
    /// Method of a raw opcode byte, ignoring the command and signature flags.
    pub fn from_byte(op: u8) -> Self {
        Self::from_primitive(op & ATT_METHOD_MASK)
    }
}

fn slice(pdu: &[u8], start: usize, end: usize, seq: u64) -> Result<&[u8], SnoopError> {
    pdu.get(start..end).ok_or_else(|| {
        SnoopError::malformed(seq, format!("ATT PDU of {} bytes, need bytes {}..{}", pdu.len(), start, end))
    })
}

fn read_u16(pdu: &[u8], offset: usize, seq: u64) -> Result<u16, SnoopError> {
    slice(pdu, offset, offset + 2, seq).map(LittleEndian::read_u16)
}

fn byte(pdu: &[u8], offset: usize, seq: u64) -> Result<u8, SnoopError> {
    slice(pdu, offset, offset + 1, seq).map(|b| b[0])
}

/// Where the decoded PDU came from
#[derive(Debug, Clone, Copy)]
pub struct PduContext {
    pub seq: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct AttDecoder {
    catalog: AttributeCatalog,
    pending_request: Option<u16>,
    cipher: Option<Cipher>,
    hide_challenges: bool,
}

impl AttDecoder {
    pub fn new(cipher: Option<Cipher>, hide_challenges: bool) -> Self {
        Self {
            catalog: AttributeCatalog::new(),
            pending_request: None,
            cipher,
            hide_challenges,
        }
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    pub fn pending_request(&self) -> Option<u16> {
        self.pending_request
    }

    pub fn reset(&mut self) {
        self.catalog = AttributeCatalog::new();
        self.pending_request = None;
    }

    /// Decode one complete ATT PDU, appending events and diagnostics to `out`.
    pub fn decode(&mut self, pdu: &[u8], ctx: PduContext, out: &mut Vec<Decoded>) -> Result<(), SnoopError> {
        let seq = ctx.seq;
        let opcode = AttOpcode::from_byte(byte(pdu, 0, seq)?);

        match opcode {
            AttOpcode::ErrorRsp
            | AttOpcode::ExchangeMtuReq
            | AttOpcode::ExchangeMtuRsp
            | AttOpcode::FindInformationReq
            | AttOpcode::ReadByTypeReq
            | AttOpcode::ReadByGroupTypeReq => {}
            AttOpcode::FindInformationRsp => self.find_information_rsp(pdu, seq, out)?,
            AttOpcode::WriteReq => self.write_req(pdu, ctx, out)?,
            AttOpcode::ReadReq => {
                self.pending_request = Some(read_u16(pdu, 1, seq)?);
            }
            AttOpcode::ReadRsp | AttOpcode::WriteRsp => self.response(opcode, pdu, ctx, out),
            AttOpcode::ReadByTypeRsp => self.read_by_type_rsp(pdu, seq, out)?,
            AttOpcode::ReadByGroupTypeRsp => self.read_by_group_type_rsp(pdu, seq, out)?,
            AttOpcode::HandleValueNtf => self.notification(pdu, ctx, out)?,
            AttOpcode::Unknown(op) => {
                report(out, Diagnostic::UnknownOpcode { seq, opcode: op });
            }
        }
        Ok(())
    }

    fn find_information_rsp(&mut self, pdu: &[u8], seq: u64, out: &mut Vec<Decoded>) -> Result<(), SnoopError> {
        let format = byte(pdu, 1, seq)?;
        if format != FIND_INFO_FORMAT_16BIT {
            report(out, Diagnostic::UnknownUuidFormat { seq, format });
            return Ok(());
        }

        let handle = read_u16(pdu, 2, seq)?;
        self.catalog.infer_from_predecessor(handle);
        Ok(())
    }

    fn write_req(&mut self, pdu: &[u8], ctx: PduContext, out: &mut Vec<Decoded>) -> Result<(), SnoopError> {
        let handle = read_u16(pdu, 1, ctx.seq)?;
        self.pending_request = Some(handle);
        let raw = &pdu[3..];

        let mut payload = self.classify(raw, ctx.seq, true, out);
        if payload.kind == PayloadKind::Plain && raw.len() == CCC_VALUE_LEN {
            if let Some(entry) = self.catalog.get(handle).filter(|e| e.looks_like_config) {
                debug!("#{} write to {} looks like a CCC write", ctx.seq, entry.uuid);
                payload.config = Some(CccConfig {
                    notifications: raw[0] & 0x01 == 0x01,
                });
            }
        }

        self.emit(ctx, EventKind::WriteRequest, self.catalog.resolve(handle), payload, out);
        Ok(())
    }

    fn response(&mut self, opcode: AttOpcode, pdu: &[u8], ctx: PduContext, out: &mut Vec<Decoded>) {
        let Some(handle) = self.pending_request else {
            return;
        };

        let raw = &pdu[1..];
        let kind = if opcode == AttOpcode::WriteRsp {
            if raw.is_empty() {
                return;
            }
            EventKind::WriteResponse
        } else {
            EventKind::Read
        };

        self.pending_request = None;
        let resolved = self.catalog.resolve(handle);
        if self.hide_challenges && resolved.is(KnownCharacteristic::Challenge) {
            return;
        }

        let mut payload = self.classify(raw, ctx.seq, false, out);
        let plain_challenge = payload.kind == PayloadKind::Plain && resolved.is(KnownCharacteristic::Challenge);
        if opcode == AttOpcode::ReadRsp && plain_challenge {
            payload.contains_nonce = true;
        }

        self.emit(ctx, kind, resolved, payload, out);
    }

    fn notification(&mut self, pdu: &[u8], ctx: PduContext, out: &mut Vec<Decoded>) -> Result<(), SnoopError> {
        let handle = read_u16(pdu, 1, ctx.seq)?;
        let resolved = self.catalog.resolve(handle);

        let mut payload = self.classify(&pdu[3..], ctx.seq, false, out);
        if payload.kind == PayloadKind::Plain && resolved.is(KnownCharacteristic::Challenge) {
            payload.contains_nonce = true;
        }

        self.emit(ctx, EventKind::Notify, resolved, payload, out);
        Ok(())
    }

    fn read_by_type_rsp(&mut self, pdu: &[u8], seq: u64, out: &mut Vec<Decoded>) -> Result<(), SnoopError> {
        for (length, entry) in entries(pdu, seq)? {
            match length {
                CHARACTERISTIC_DECL_128_LEN => {
                    let value_handle = read_u16(entry, 3, seq)?;
                    let uuid = Uuid128::from_le_slice(slice(entry, 5, 21, seq)?)?;
                    self.catalog.insert(value_handle, uuid);
                }
                GENERIC_ACCESS_ENTRY_LEN => {}
                _ => report(
                    out,
                    Diagnostic::UnknownAttributeLength {
                        seq,
                        opcode: AttOpcode::ReadByTypeRsp,
                        length,
                    },
                ),
            }
        }
        Ok(())
    }

    fn read_by_group_type_rsp(&mut self, pdu: &[u8], seq: u64, out: &mut Vec<Decoded>) -> Result<(), SnoopError> {
        for (length, _entry) in entries(pdu, seq)? {
            if length != SERVICE_GROUP_16_LEN && length != SERVICE_GROUP_128_LEN {
                report(
                    out,
                    Diagnostic::UnknownAttributeLength {
                        seq,
                        opcode: AttOpcode::ReadByGroupTypeRsp,
                        length,
                    },
                );
            }
        }
        Ok(())
    }

    /// Decrypt block-aligned payloads when a key is configured.
    fn classify(&self, raw: &[u8], seq: u64, nonce_when_decrypted: bool, out: &mut Vec<Decoded>) -> Payload {
        if raw.is_empty() || raw.len() % AES_BLOCK_SIZE != 0 {
            return Payload::plain(raw);
        }

        let Some(cipher) = &self.cipher else {
            return Payload {
                kind: PayloadKind::SeemsEncrypted,
                ..Payload::plain(raw)
            };
        };

        match cipher.decrypt(raw) {
            Ok(plaintext) => Payload {
                kind: PayloadKind::Decrypted,
                bytes: plaintext,
                contains_nonce: nonce_when_decrypted,
                config: None,
            },
            Err(e) => {
                report(
                    out,
                    Diagnostic::DecryptionFailed {
                        seq,
                        error: e.to_string(),
                        raw: raw.to_vec(),
                    },
                );
                Payload::plain(raw)
            }
        }
    }

    fn emit(&self, ctx: PduContext, kind: EventKind, handle: ResolvedHandle, payload: Payload, out: &mut Vec<Decoded>) {
        out.push(Decoded::Event(AttEvent {
            seq: ctx.seq,
            timestamp: ctx.timestamp,
            kind,
            handle,
            payload,
        }));
    }
}

/// Split a Read By (Group) Type response into its fixed-length entries.
fn entries(pdu: &[u8], seq: u64) -> Result<Vec<(u8, &[u8])>, SnoopError> {
    let length = byte(pdu, 1, seq)?;
    let data = &pdu[2..];
    if data.is_empty() {
        return Ok(Vec::new());
    }
    // a zero length cannot be walked, report it once
    if length == 0 {
        return Ok(vec![(0, data)]);
    }
    if data.len() % length as usize != 0 {
        return Err(SnoopError::malformed(
            seq,
            format!("{} bytes of attribute data are not a multiple of {}", data.len(), length),
        ));
    }
    Ok(data.chunks(length as usize).map(|entry| (length, entry)).collect())
}
