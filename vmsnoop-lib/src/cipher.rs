//! AES-128-CBC with an all-zero IV, as used by the bike for its
//! application-layer encrypted characteristics.
//!
//! Ciphertext that is not block aligned is zero-padded before decryption and
//! trailing zero bytes are stripped from the plaintext.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use std::fmt;

use crate::constants::{AES_BLOCK_SIZE, KEY_SIZE};
use crate::error::SnoopError;

#[derive(Clone, PartialEq, Eq)]
pub struct Cipher {
    key: [u8; KEY_SIZE],
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Create a cipher from raw key bytes; anything but 16 bytes is rejected.
    pub fn new(key: &[u8]) -> Result<Self, SnoopError> {
        let key: [u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| SnoopError::InvalidKeyLength(key.len()))?;
        Ok(Self { key })
    }

    /// Create a cipher from a 32 character hex string.
    pub fn from_hex(key: &str) -> Result<Self, SnoopError> {
        let bytes = hex::decode(key.trim()).map_err(SnoopError::InvalidKeyHex)?;
        Self::new(&bytes)
    }

    fn aes(&self) -> Result<Aes128, SnoopError> {
        Aes128::new_from_slice(&self.key).map_err(|e| SnoopError::Decrypt(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SnoopError> {
        let aes = self.aes()?;
        let mut buf = pad_to_block(ciphertext);

        let mut chain = [0u8; AES_BLOCK_SIZE];
        for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            let mut next_chain = [0u8; AES_BLOCK_SIZE];
            next_chain.copy_from_slice(chunk);
            aes.decrypt_block(chunk.into());
            xor_in_place(chunk, &chain);
            chain = next_chain;
        }

        let end = buf.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
        buf.truncate(end);
        Ok(buf)
    }

    /// Inverse of [`Cipher::decrypt`] for block-aligned plaintext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SnoopError> {
        let aes = self.aes()?;
        let mut buf = pad_to_block(plaintext);

        let mut chain = [0u8; AES_BLOCK_SIZE];
        for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            xor_in_place(chunk, &chain);
            aes.encrypt_block(chunk.into());
            chain.copy_from_slice(chunk);
        }
        Ok(buf)
    }
}

fn pad_to_block(data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    let misalignment = buf.len() % AES_BLOCK_SIZE;
    if misalignment != 0 {
        buf.resize(buf.len() + AES_BLOCK_SIZE - misalignment, 0);
    }
    buf
}

fn xor_in_place(block: &mut [u8], other: &[u8; AES_BLOCK_SIZE]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}
