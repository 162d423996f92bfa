// MIT License - Copyright (c) 2026 Peter Wright
// Payload cipher

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use tracing::debug;

use crate::constants::{HEADER_LEN, KEY_LEN, KEY_PAD, LENGTH_OFFSET};
use crate::error::{Result, UniiError};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Payload cipher for "basic encryption" sessions.
///
/// AES-128 in counter mode. The key is the shared key padded with spaces to
/// 16 bytes; the initial counter block is the first 12 header bytes followed
/// by four zero bytes, so the per-frame sequence numbers make each keystream
/// unique. Encryption and decryption are the same operation.
///
/// A cipher built without a key passes payloads through unchanged.
#[derive(Clone)]
pub struct UniiCrypt {
    key: Option<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for UniiCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniiCrypt")
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

impl UniiCrypt {
    /// Build a cipher from the configured shared key.
    pub fn new(shared_key: Option<&str>) -> Result<Self> {
        let Some(shared_key) = shared_key else {
            return Ok(Self::cleartext());
        };
        if shared_key.is_empty() || shared_key.len() > KEY_LEN || !shared_key.is_ascii() {
            return Err(UniiError::configuration(format!(
                "shared key must be 1-{} ASCII characters",
                KEY_LEN
            )));
        }
        let mut key = [KEY_PAD; KEY_LEN];
        key[..shared_key.len()].copy_from_slice(shared_key.as_bytes());
        debug!("Cipher initialised for basic encryption");
        Ok(Self { key: Some(key) })
    }

    pub fn cleartext() -> Self {
        Self { key: None }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Initial counter block derived from a frame header.
    pub fn counter_block(header: &[u8; HEADER_LEN]) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..LENGTH_OFFSET].copy_from_slice(&header[..LENGTH_OFFSET]);
        iv
    }

    /// Apply the keystream for `header` to `payload` in place.
    pub fn apply(&self, header: &[u8; HEADER_LEN], payload: &mut [u8]) {
        if let Some(key) = &self.key {
            let iv = Self::counter_block(header);
            let mut cipher = Aes128Ctr::new(&(*key).into(), &iv.into());
            cipher.apply_keystream(payload);
        }
    }

    pub fn encrypt(&self, header: &[u8; HEADER_LEN], payload: &[u8]) -> Vec<u8> {
        let mut out = payload.to_vec();
        self.apply(header, &mut out);
        out
    }

    pub fn decrypt(&self, header: &[u8; HEADER_LEN], payload: &[u8]) -> Vec<u8> {
        self.encrypt(header, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(tx_seq: u32) -> [u8; HEADER_LEN] {
        let mut h = [0u8; HEADER_LEN];
        h[0..2].copy_from_slice(&0xFFFFu16.to_be_bytes());
        h[2..6].copy_from_slice(&tx_seq.to_be_bytes());
        h[10] = 0x05;
        h[11] = 0x02;
        h[12..14].copy_from_slice(&32u16.to_be_bytes());
        h
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypt = UniiCrypt::new(Some("mysharedkey")).unwrap();
        let plain: Vec<u8> = (0u8..=47).collect();
        let h = header(7);
        let enc = crypt.encrypt(&h, &plain);
        assert_ne!(enc, plain);
        assert_eq!(crypt.decrypt(&h, &enc), plain);
    }

    #[test]
    fn test_keystream_depends_on_sequence() {
        let crypt = UniiCrypt::new(Some("mysharedkey")).unwrap();
        let plain = [0u8; 16];
        assert_ne!(crypt.encrypt(&header(1), &plain), crypt.encrypt(&header(2), &plain));
    }

    #[test]
    fn test_length_field_not_part_of_counter() {
        let mut a = header(3);
        let mut b = header(3);
        a[12..14].copy_from_slice(&32u16.to_be_bytes());
        b[12..14].copy_from_slice(&48u16.to_be_bytes());
        assert_eq!(UniiCrypt::counter_block(&a), UniiCrypt::counter_block(&b));
        assert_eq!(&UniiCrypt::counter_block(&a)[12..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_wrong_key_does_not_decrypt() {
        let right = UniiCrypt::new(Some("right")).unwrap();
        let wrong = UniiCrypt::new(Some("wrong")).unwrap();
        let plain = b"section status request".to_vec();
        let h = header(0);
        let enc = right.encrypt(&h, &plain);
        assert_ne!(wrong.decrypt(&h, &enc), plain);
    }

    #[test]
    fn test_short_key_is_space_padded() {
        let padded = UniiCrypt::new(Some("abc")).unwrap();
        let explicit = UniiCrypt::new(Some("abc             ")).unwrap();
        let h = header(9);
        let plain = [0x55u8; 32];
        assert_eq!(padded.encrypt(&h, &plain), explicit.encrypt(&h, &plain));
    }

    #[test]
    fn test_cleartext_passthrough() {
        let crypt = UniiCrypt::new(None).unwrap();
        assert!(!crypt.is_encrypted());
        let plain = vec![1u8, 2, 3];
        assert_eq!(crypt.encrypt(&header(0), &plain), plain);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(UniiCrypt::new(Some("")).is_err());
        assert!(UniiCrypt::new(Some("seventeen-chars!!")).is_err());
    }
}
