//! Records produced by the decoder for the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::Display;
use tracing::debug;

use crate::att::AttOpcode;
use crate::catalog::ResolvedHandle;
use crate::event::{DeviceAddress, DeviceNames};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum EventKind {
    #[strum(to_string = "Write req")]
    WriteRequest,
    #[strum(to_string = "Read")]
    Read,
    #[strum(to_string = "Write resp")]
    WriteResponse,
    #[strum(to_string = "Notify")]
    Notify,
}

/// How the payload bytes of an event should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Bytes exactly as captured
    Plain,
    /// Plaintext produced with the configured key
    Decrypted,
    /// Block aligned, but no key was configured
    SeemsEncrypted,
}

/// Client Characteristic Configuration value inferred from a 2-byte write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CccConfig {
    pub notifications: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub kind: PayloadKind,
    #[serde(serialize_with = "hex::serde::serialize")]
    pub bytes: Vec<u8>,
    /// The first two bytes carry the challenge nonce
    pub contains_nonce: bool,
    pub config: Option<CccConfig>,
}

impl Payload {
    pub fn plain(bytes: &[u8]) -> Self {
        Self {
            kind: PayloadKind::Plain,
            bytes: bytes.to_vec(),
            contains_nonce: false,
            config: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttEvent {
    pub seq: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
    pub handle: ResolvedHandle,
    pub payload: Payload,
}

/// A device that could be the target, suggested when discovery is ambiguous
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub address: DeviceAddress,
    pub name: String,
}

/// Non-fatal findings reported next to the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "diagnostic", rename_all = "snake_case")]
pub enum Diagnostic {
    UnknownOpcode {
        seq: u64,
        opcode: u8,
    },
    UnknownUuidFormat {
        seq: u64,
        format: u8,
    },
    UnknownAttributeLength {
        seq: u64,
        opcode: AttOpcode,
        length: u8,
    },
    UnknownAdvertisingEventType {
        seq: u64,
        event_type: u8,
    },
    DecryptionFailed {
        seq: u64,
        error: String,
        #[serde(serialize_with = "hex::serde::serialize")]
        raw: Vec<u8>,
    },
    /// A connection to a discovered device while several were discovered
    AmbiguousConnection {
        seq: u64,
        address: DeviceAddress,
    },
    DroppedPackets {
        seq: u64,
        dropped: u32,
    },
    NoConnectionHandle,
    NoAttributes,
    AmbiguousTarget {
        candidates: Vec<Candidate>,
    },
    PendingReassembly {
        received: usize,
        total: usize,
    },
}

const CAPTURE_HINT: &str = "make sure the capture was started before the phone connected to the bike, \
                            or that bluetooth was disabled when the capture started";

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownOpcode { seq, opcode } => write!(f, "#{} unknown ATT method {:02x}", seq, opcode),
            Diagnostic::UnknownUuidFormat { seq, format } => {
                write!(f, "#{} unknown find information response uuid format {}", seq, format)
            }
            Diagnostic::UnknownAttributeLength { seq, opcode, length } => {
                write!(f, "#{} unknown attribute len {} in {:?}", seq, length, opcode)
            }
            Diagnostic::UnknownAdvertisingEventType { seq, event_type } => {
                write!(f, "#{} unknown advertising event type {:#04x}", seq, event_type)
            }
            Diagnostic::DecryptionFailed { seq, error, raw } => {
                write!(f, "#{} unable to decrypt {}, error: {}", seq, hex::encode(raw), error)
            }
            Diagnostic::AmbiguousConnection { seq, address } => write!(
                f,
                "#{} ignoring connection to {}: several bikes were discovered, pass the bike id",
                seq, address
            ),
            Diagnostic::DroppedPackets { seq, dropped } => {
                write!(f, "#{} the capture dropped {} packets before this record", seq, dropped)
            }
            Diagnostic::NoConnectionHandle => {
                write!(f, "unable to find the connection handle of the bike; {}", CAPTURE_HINT)
            }
            Diagnostic::NoAttributes => write!(f, "unable to find the bike's UUIDs; {}", CAPTURE_HINT),
            Diagnostic::AmbiguousTarget { candidates } => {
                write!(f, "multiple bikes were found in your area, please specify the bike you want to use")?;
                for candidate in candidates {
                    write!(f, "\n  to use {} add this arg: --bike-id {}", candidate.name, candidate.address)?;
                }
                Ok(())
            }
            Diagnostic::PendingReassembly { received, total } => write!(
                f,
                "capture ended in the middle of a fragmented PDU ({} of {} bytes)",
                received, total
            ),
        }
    }
}

/// One item of the decoded stream, in wire order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Decoded {
    Event(AttEvent),
    Diagnostic(Diagnostic),
}

/// Log a diagnostic and append it to the decoded stream.
pub(crate) fn report(out: &mut Vec<Decoded>, diagnostic: Diagnostic) {
    debug!("{}", diagnostic);
    out.push(Decoded::Diagnostic(diagnostic));
}

/// End-of-run totals and state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeSummary {
    pub records: u64,
    pub events: u64,
    pub connection_handle: Option<u16>,
    pub attributes: usize,
    pub devices: BTreeMap<DeviceAddress, DeviceNames>,
    pub warnings: Vec<Diagnostic>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_report_stays_below_default_log_level() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();

        let mut out = Vec::new();
        tracing::subscriber::with_default(subscriber, || {
            report(&mut out, Diagnostic::UnknownOpcode { seq: 3, opcode: 0x1e });
        });

        assert_eq!(out, vec![Decoded::Diagnostic(Diagnostic::UnknownOpcode { seq: 3, opcode: 0x1e })]);
        assert!(buf.0.lock().unwrap().is_empty());
    }
}
