use crate::cipher::Cipher;
use crate::error::SnoopError;
use crate::event::{DeviceAddress, TargetPolicy};

/// Everything the decoder needs to know before the first record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    pub target: TargetPolicy,
    pub cipher: Option<Cipher>,
    /// Drop responses from the challenge characteristic
    pub hide_challenges: bool,
}

impl DecoderConfig {
    /// Build from the raw user options. Empty strings count as absent.
    pub fn from_options(bike_id: Option<&str>, key: Option<&str>, hide_challenges: bool) -> Result<Self, SnoopError> {
        let target = match bike_id.map(DeviceAddress::parse).transpose()?.flatten() {
            Some(address) => TargetPolicy::Address(address),
            None => TargetPolicy::Discover,
        };

        let cipher = match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Some(Cipher::from_hex(key)?),
            None => None,
        };

        Ok(Self {
            target,
            cipher,
            hide_challenges,
        })
    }

    pub fn with_target(mut self, address: DeviceAddress) -> Self {
        self.target = TargetPolicy::Address(address);
        self
    }

    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn hide_challenges(mut self, hide: bool) -> Self {
        self.hide_challenges = hide;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::from_options(None, None, false).unwrap();
        assert_eq!(config, DecoderConfig::default());
        assert_eq!(config.target, TargetPolicy::Discover);

        let config = DecoderConfig::from_options(Some(""), Some("  "), true).unwrap();
        assert_eq!(config.target, TargetPolicy::Discover);
        assert!(config.cipher.is_none());
        assert!(config.hide_challenges);
    }

    #[test]
    fn test_target_and_key() {
        let config =
            DecoderConfig::from_options(Some("aa:bb:cc:dd:ee:ff"), Some("00112233445566778899aabbccddeeff"), false)
                .unwrap();
        assert_eq!(
            config.target,
            TargetPolicy::Address(DeviceAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]))
        );
        assert!(config.cipher.is_some());
    }

    #[test]
    fn test_config_errors() {
        let err = DecoderConfig::from_options(None, Some("0011"), false).unwrap_err();
        assert!(matches!(err, SnoopError::InvalidKeyLength(2)));
        assert!(err.is_config());

        let err = DecoderConfig::from_options(None, Some("not hex"), false).unwrap_err();
        assert!(err.is_config());

        let err = DecoderConfig::from_options(Some("aabbcc"), None, false).unwrap_err();
        assert!(matches!(err, SnoopError::InvalidAddress(_)));
    }

    #[test]
    fn test_builders() {
        let address = DeviceAddress([1, 2, 3, 4, 5, 6]);
        let cipher = Cipher::new(&[7u8; 16]).unwrap();
        let config = DecoderConfig::default()
            .with_target(address)
            .with_cipher(cipher.clone())
            .hide_challenges(true);
        assert_eq!(config.target, TargetPolicy::Address(address));
        assert_eq!(config.cipher, Some(cipher));
        assert!(config.hide_challenges);
    }
}
