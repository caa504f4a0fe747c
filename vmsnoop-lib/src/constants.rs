// Wire constants for btsnoop captures and the HCI/L2CAP/ATT subset we decode

/// btsnoop identification pattern ("btsnoop\0")
pub const BTSNOOP_MAGIC: [u8; 8] = *b"btsnoop\0";

/// Only btsnoop version 1 exists
pub const BTSNOOP_VERSION: u32 = 1;

/// Size of the file preamble: magic + version + datalink type (16 bytes)
pub const CAPTURE_HEADER_SIZE: usize = 16;

/// Size of each record header (24 bytes)
pub const RECORD_HEADER_SIZE: usize = 24;

/// Microseconds between 0000-01-01 (btsnoop epoch) and 1970-01-01
pub const BTSNOOP_EPOCH_DELTA_US: i64 = 0x00dc_ddb3_0f2f_8000;

/// First byte of an LE meta event
pub const HCI_LE_META_EVENT: u8 = 0x3E;

/// Size of the ACL data header (handle/flags + length)
pub const ACL_HEADER_SIZE: usize = 4;

/// Size of the L2CAP basic header (length + channel id)
pub const L2CAP_HEADER_SIZE: usize = 4;

/// L2CAP fixed channel for the Attribute Protocol
pub const L2CAP_CID_ATT: u16 = 0x0004;

/// Low 6 bits of the first ATT byte carry the method
pub const ATT_METHOD_MASK: u8 = 0x3F;

/// Find Information Response format: handle + 16-bit UUID pairs
pub const FIND_INFO_FORMAT_16BIT: u8 = 0x01;

/// Read By Type Response entry: handle, properties, value handle, 128-bit UUID
pub const CHARACTERISTIC_DECL_128_LEN: u8 = 21;

/// Read By Type Response entry carrying the generic access device name
pub const GENERIC_ACCESS_ENTRY_LEN: u8 = 18;

/// Read By Group Type Response entry with a 16-bit service UUID
pub const SERVICE_GROUP_16_LEN: u8 = 6;

/// Read By Group Type Response entry with a 128-bit service UUID
pub const SERVICE_GROUP_128_LEN: u8 = 20;

/// Encrypted payloads are a whole number of AES blocks
pub const AES_BLOCK_SIZE: usize = 16;

/// Length of the configured AES-128 key
pub const KEY_SIZE: usize = 16;

/// Number of leading payload bytes that carry the nonce
pub const NONCE_SIZE: usize = 2;

/// Length of a Client Characteristic Configuration write
pub const CCC_VALUE_LEN: usize = 2;

/// AD structure type: shortened local name
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;

/// AD structure type: complete local name
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
