//! Common test utilities: synthetic btsnoop captures and HCI frame builders

// Shared across test files, not every helper is used by every file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use vmsnoop_lib::catalog::KnownCharacteristic;
#[allow(unused_imports)]
pub use vmsnoop_lib::output::{EventKind, PayloadKind};
#[allow(unused_imports)]
pub use vmsnoop_lib::{
    AttEvent, Cipher, DecodeReport, Decoded, DecoderConfig, DeviceAddress, Diagnostic, SnoopError, decode_capture,
};

#[allow(dead_code)]
pub const KEY_HEX: &str = "00112233445566778899aabbccddeeff";

#[allow(dead_code)]
pub const BIKE_HANDLE: u16 = 0x0040;

/// Bike address as it appears on the wire (least significant byte first)
#[allow(dead_code)]
pub const BIKE_WIRE: [u8; 6] = [0x66, 0x55, 0x44, 0x33, 0x22, 0x11];

/// Route decoder logs to the test output, filtered by RUST_LOG
#[allow(dead_code)]
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Builds an in-memory btsnoop capture record by record
#[allow(dead_code)]
pub struct CaptureBuilder {
    buf: Vec<u8>,
    timestamp_us: u64,
    drops: u32,
}

#[allow(dead_code)]
impl CaptureBuilder {
    pub fn new() -> Self {
        Self::with_header(1, 1001)
    }

    pub fn with_header(version: u32, datalink: u32) -> Self {
        let mut buf = b"btsnoop\0".to_vec();
        buf.extend_from_slice(&version.to_be_bytes());
        buf.extend_from_slice(&datalink.to_be_bytes());
        Self {
            buf,
            // 2024-01-01T00:00:00Z in btsnoop time
            timestamp_us: 0x00dc_ddb3_0f2f_8000 + 1_704_067_200_000_000,
            drops: 0,
        }
    }

    pub fn drops(mut self, drops: u32) -> Self {
        self.drops = drops;
        self
    }

    pub fn record(mut self, data: &[u8]) -> Self {
        let len = data.len() as u32;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(&0u32.to_be_bytes());
        self.buf.extend_from_slice(&self.drops.to_be_bytes());
        self.buf.extend_from_slice(&self.timestamp_us.to_be_bytes());
        self.buf.extend_from_slice(data);
        self.timestamp_us += 1_000;
        self
    }

    /// ATT PDU in a single first-flushable fragment on the bike handle
    pub fn att(self, pdu: &[u8]) -> Self {
        let frame = acl(BIKE_HANDLE, 0b10, &l2cap(pdu.len() as u16, pdu));
        self.record(&frame)
    }

    pub fn build(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// ACL data packet with the given packet boundary flag
#[allow(dead_code)]
pub fn acl(handle: u16, boundary: u8, fragment: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(handle | (u16::from(boundary) << 12)).to_le_bytes());
    buf.extend_from_slice(&(fragment.len() as u16).to_le_bytes());
    buf.extend_from_slice(fragment);
    buf
}

/// L2CAP basic frame on the ATT channel
#[allow(dead_code)]
pub fn l2cap(pdu_len: u16, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&pdu_len.to_le_bytes());
    buf.extend_from_slice(&0x0004u16.to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// LE Enhanced Connection Complete
#[allow(dead_code)]
pub fn connection_complete(handle: u16, address: [u8; 6]) -> Vec<u8> {
    let mut data = vec![0x3e, 0x1f, 0x0a, 0x00];
    data.extend_from_slice(&handle.to_le_bytes());
    data.extend_from_slice(&[0x00, 0x00]);
    data.extend_from_slice(&address);
    data.extend_from_slice(&[0u8; 18]);
    data
}

/// LE Advertising Report with a flags structure followed by a complete name
#[allow(dead_code)]
pub fn advertising(address: [u8; 6], name: &str) -> Vec<u8> {
    let mut ad = vec![0x02, 0x01, 0x06, name.len() as u8 + 1, 0x09];
    ad.extend_from_slice(name.as_bytes());

    let mut data = vec![0x3e, 0x00, 0x02, 0x01, 0x00, 0x00];
    data.extend_from_slice(&address);
    data.push(ad.len() as u8);
    data.extend_from_slice(&ad);
    data.push(0xc0);
    data[1] = (data.len() - 2) as u8;
    data
}

/// Read By Type Response with one 128-bit characteristic declaration
#[allow(dead_code)]
pub fn characteristic_declaration(value_handle: u16, uuid_be: [u8; 16]) -> Vec<u8> {
    let mut pdu = vec![0x09, 21];
    pdu.extend_from_slice(&(value_handle - 1).to_le_bytes());
    pdu.push(0x0a);
    pdu.extend_from_slice(&value_handle.to_le_bytes());
    pdu.extend(uuid_be.iter().rev());
    pdu
}

#[allow(dead_code)]
pub fn events(report: &DecodeReport) -> Vec<&AttEvent> {
    report.events().collect()
}
