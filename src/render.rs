//! Text rendering of decoded events.

use vmsnoop_lib::catalog::ResolvedHandle;
use vmsnoop_lib::constants::NONCE_SIZE;
use vmsnoop_lib::output::{Payload, PayloadKind};
use vmsnoop_lib::{AttEvent, Diagnostic};

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Only print the first group of each UUID
    pub short_uuids: bool,
    /// Leave the nonce bytes out of nonce-bearing payloads
    pub hide_challenges: bool,
    pub timestamps: bool,
}

/// `#<seq> <kind> <handle> > <len>[<bytes>]<suffixes>`
pub fn event_line(event: &AttEvent, options: &RenderOptions) -> String {
    let mut line = format!("#{}", event.seq);
    if options.timestamps {
        match event.timestamp {
            Some(ts) => line.push_str(&format!(" {}", ts.format("%H:%M:%S%.6f"))),
            None => line.push_str(" -"),
        }
    }
    line.push_str(&format!(
        " {} {} > {}",
        event.kind,
        handle(&event.handle, options.short_uuids),
        payload(&event.payload, options.hide_challenges)
    ));
    line
}

pub fn handle(resolved: &ResolvedHandle, short_uuids: bool) -> String {
    let Some(uuid) = resolved.uuid else {
        return format!("(HANDLE uint16({}))", resolved.handle);
    };

    let mut text = if short_uuids { uuid.short() } else { uuid.to_string() };
    if let Some(known) = resolved.known {
        text.push_str(&format!(" ({})", known));
    }
    text
}

pub fn payload(payload: &Payload, hide_challenges: bool) -> String {
    let mut bytes: Vec<String> = Vec::with_capacity(payload.bytes.len());
    for (i, b) in payload.bytes.iter().enumerate() {
        let is_nonce = payload.contains_nonce && i < NONCE_SIZE;
        if is_nonce && hide_challenges {
            continue;
        }
        bytes.push(hex::encode([*b]));
    }

    let nonce_len = if payload.contains_nonce && !hide_challenges {
        payload.bytes.len().min(NONCE_SIZE)
    } else {
        0
    };
    let text = if nonce_len > 0 {
        let rest = bytes.split_off(nonce_len);
        let nonce = format!("<{}>", bytes.join(" "));
        std::iter::once(nonce).chain(rest).collect::<Vec<_>>().join(" ")
    } else {
        bytes.join(" ")
    };

    let mut line = format!("{}[{}]", payload.bytes.len(), text);
    match payload.kind {
        PayloadKind::Decrypted => line.push_str(" Decrypted"),
        PayloadKind::SeemsEncrypted => line.push_str(" Seems encrypted"),
        PayloadKind::Plain => {}
    }
    if let Some(config) = payload.config {
        line.push_str(&format!(" Probably ATT Config (Notification: {})", config.notifications));
    }
    line
}

pub fn warning_line(diagnostic: &Diagnostic) -> String {
    format!("warning: {}", diagnostic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmsnoop_lib::catalog::KnownCharacteristic;
    use vmsnoop_lib::output::{CccConfig, EventKind};

    fn challenge() -> ResolvedHandle {
        ResolvedHandle {
            handle: 0x10,
            uuid: Some(KnownCharacteristic::Challenge.uuid()),
            known: Some(KnownCharacteristic::Challenge),
        }
    }

    #[test]
    fn test_handle_rendering() {
        assert_eq!(
            handle(&challenge(), false),
            "6acc5501-e631-4069-944d-b8ca7598ad50 (CHALLENGE)"
        );
        assert_eq!(handle(&challenge(), true), "6acc5501 (CHALLENGE)");

        let unknown = ResolvedHandle {
            handle: 42,
            uuid: None,
            known: None,
        };
        assert_eq!(handle(&unknown, false), "(HANDLE uint16(42))");
    }

    #[test]
    fn test_payload_rendering() {
        assert_eq!(payload(&Payload::plain(&[0x01, 0xab]), false), "2[01 ab]");
        assert_eq!(payload(&Payload::plain(&[]), false), "0[]");

        let nonce = Payload {
            kind: PayloadKind::Decrypted,
            bytes: vec![0xaa, 0xbb, 0x01],
            contains_nonce: true,
            config: None,
        };
        assert_eq!(payload(&nonce, false), "3[<aa bb> 01] Decrypted");
        assert_eq!(payload(&nonce, true), "3[01] Decrypted");

        let config = Payload {
            config: Some(CccConfig { notifications: true }),
            ..Payload::plain(&[0x01, 0x00])
        };
        assert_eq!(payload(&config, false), "2[01 00] Probably ATT Config (Notification: true)");

        let encrypted = Payload {
            kind: PayloadKind::SeemsEncrypted,
            ..Payload::plain(&[0u8; 16])
        };
        assert!(payload(&encrypted, false).ends_with("] Seems encrypted"));
    }

    #[test]
    fn test_event_line() {
        let event = AttEvent {
            seq: 7,
            timestamp: None,
            kind: EventKind::WriteRequest,
            handle: challenge(),
            payload: Payload::plain(&[0x01]),
        };
        let options = RenderOptions {
            short_uuids: true,
            ..Default::default()
        };
        assert_eq!(event_line(&event, &options), "#7 Write req 6acc5501 (CHALLENGE) > 1[01]");

        let options = RenderOptions {
            timestamps: true,
            ..options
        };
        assert_eq!(event_line(&event, &options), "#7 - Write req 6acc5501 (CHALLENGE) > 1[01]");
    }

    #[test]
    fn test_warning_line() {
        let line = warning_line(&Diagnostic::UnknownOpcode { seq: 3, opcode: 0x1e });
        assert_eq!(line, "warning: #3 unknown ATT method 1e");
    }
}
