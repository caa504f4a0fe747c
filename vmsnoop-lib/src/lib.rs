pub mod acl;
pub mod att;
pub mod capture;
pub mod catalog;
pub mod cipher;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod event;
pub mod hci;
pub mod output;

// Re-export the decoding entry points for easy access
pub use capture::{CaptureReader, PacketRecord};
pub use cipher::Cipher;
pub use config::DecoderConfig;
pub use decoder::{DecodeReport, Decoder, decode_capture};
pub use error::SnoopError;
pub use event::{DeviceAddress, TargetPolicy};
pub use output::{AttEvent, DecodeSummary, Decoded, Diagnostic};
