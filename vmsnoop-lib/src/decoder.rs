//! Per-capture decoding context.
//!
//! All state of a run lives in [`Decoder`]: the tracked connection handle,
//! the attribute catalog, the pending request and the reassembly buffer.
//! Records must be pushed in capture order.

use bytes::Bytes;
use tracing::{debug, info};

use crate::acl::Reassembler;
use crate::att::{AttDecoder, PduContext};
use crate::capture::{CaptureHeader, CaptureReader, PacketRecord};
use crate::config::DecoderConfig;
use crate::error::SnoopError;
use crate::event::EventParser;
use crate::hci::{self, Route};
use crate::output::{DecodeSummary, Decoded, Diagnostic, report};

#[derive(Debug)]
pub struct Decoder {
    events: EventParser,
    connection: Option<u16>,
    reassembler: Reassembler,
    att: AttDecoder,
    records: u64,
    emitted: u64,
    last_drops: u32,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            events: EventParser::new(config.target),
            connection: None,
            reassembler: Reassembler::new(),
            att: AttDecoder::new(config.cipher, config.hide_challenges),
            records: 0,
            emitted: 0,
            last_drops: 0,
        }
    }

    /// Forget everything learned from the previous capture, keeping the
    /// configuration.
    pub fn reset(&mut self) {
        self.events.reset();
        self.connection = None;
        self.reassembler.reset();
        self.att.reset();
        self.records = 0;
        self.emitted = 0;
        self.last_drops = 0;
    }

    pub fn connection_handle(&self) -> Option<u16> {
        self.connection
    }

    pub fn att(&self) -> &AttDecoder {
        &self.att
    }

    pub fn events(&self) -> &EventParser {
        &self.events
    }

    /// Decode one record, returning the events and diagnostics it produced.
    pub fn push_record(&mut self, record: &PacketRecord) -> Result<Vec<Decoded>, SnoopError> {
        let seq = record.seq;
        let mut out = Vec::new();
        self.records += 1;

        if record.cumulative_drops > self.last_drops {
            report(
                &mut out,
                Diagnostic::DroppedPackets {
                    seq,
                    dropped: record.cumulative_drops - self.last_drops,
                },
            );
            self.last_drops = record.cumulative_drops;
        }

        let payload = record.payload();
        match hci::classify(&payload, self.connection, seq)? {
            Route::Event => {
                if let Some(handle) = self.events.parse(&payload, seq, &mut out)? {
                    // handle 0 means no connection
                    let handle = Some(handle).filter(|&h| h != 0);
                    if let Some(h) = handle.filter(|_| self.connection != handle) {
                        info!("#{} following connection handle {:#05x}", seq, h);
                    }
                    self.connection = handle;
                }
            }
            Route::Acl(header) => {
                if let Some(pdu) = self.reassembler.push(&header, &payload, seq)? {
                    let ctx = PduContext {
                        seq,
                        timestamp: record.timestamp(),
                    };
                    self.att.decode(&pdu, ctx, &mut out)?;
                }
            }
            Route::Discard => {}
        }

        self.emitted += out.iter().filter(|d| matches!(d, Decoded::Event(_))).count() as u64;
        Ok(out)
    }

    /// Totals and end-of-run warnings.
    pub fn finish(&self) -> DecodeSummary {
        let mut warnings = Vec::new();
        if self.connection.is_none() {
            warnings.push(Diagnostic::NoConnectionHandle);
        } else if self.att.catalog().is_empty() {
            warnings.push(Diagnostic::NoAttributes);
        }
        if let Some(candidates) = self.events.ambiguous_candidates() {
            warnings.push(Diagnostic::AmbiguousTarget { candidates });
        }
        if let Some(pending) = self.reassembler.pending() {
            warnings.push(Diagnostic::PendingReassembly {
                received: pending.data.len(),
                total: pending.total_len,
            });
        }

        debug!(
            "{} records, {} events, {} attributes",
            self.records,
            self.emitted,
            self.att.catalog().len()
        );

        DecodeSummary {
            records: self.records,
            events: self.emitted,
            connection_handle: self.connection,
            attributes: self.att.catalog().len(),
            devices: self.events.devices().clone(),
            warnings,
        }
    }
}

/// Result of decoding a whole capture at once
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeReport {
    pub header: CaptureHeader,
    pub outputs: Vec<Decoded>,
    pub summary: DecodeSummary,
}

impl DecodeReport {
    pub fn events(&self) -> impl Iterator<Item = &crate::output::AttEvent> {
        self.outputs.iter().filter_map(|d| match d {
            Decoded::Event(event) => Some(event),
            Decoded::Diagnostic(_) => None,
        })
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.outputs.iter().filter_map(|d| match d {
            Decoded::Diagnostic(diagnostic) => Some(diagnostic),
            Decoded::Event(_) => None,
        })
    }
}

/// Decode an in-memory capture in one pass. Stops at the first fatal error.
pub fn decode_capture(data: impl Into<Bytes>, config: DecoderConfig) -> Result<DecodeReport, SnoopError> {
    let reader = CaptureReader::new(data)?;
    let header = *reader.header();
    let mut decoder = Decoder::new(config);

    let mut outputs = Vec::new();
    for record in reader {
        outputs.extend(decoder.push_record(&record?)?);
    }

    Ok(DecodeReport {
        header,
        outputs,
        summary: decoder.finish(),
    })
}
