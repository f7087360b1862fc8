//! # Carrier codec
//!
//! An optional authenticated-encryption envelope for frames that must
//! travel through a human-visible or display-constrained field: a 3-byte
//! sigil, a 2-digit wrapping sequence number, and `base64url(AES-GCM
//! ciphertext ‖ CRC16-CCITT-FALSE trailer)`.
//!
//! The AES-GCM nonce is the 96-bit zero-padded wrapping sequence number —
//! deterministic, not random. Reusing a sequence number under the same key
//! reuses a nonce, which breaks AES-GCM's confidentiality guarantee, so this
//! codec refuses to encrypt a 101st frame under one key (see
//! [`CarrierCodec::encode`]).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::CarrierError;

/// The fixed sigil prefixing every carrier frame: a 3-byte multi-byte
/// character chosen for display compatibility on human-visible carriers.
pub const SIGIL: &str = "\u{1F6C8}";

/// Maximum plaintext payload bytes per frame (fits the smallest supported
/// carrier alongside the sigil, sequence digits, and base64 inflation).
pub const PAYLOAD_BYTES: usize = 26;

/// AES-256 key size in bytes.
pub const KEY_BYTES: usize = 32;

fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn nonce_from_seq(seq: u8) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[11] = seq;
    nonce
}

/// Stateful encoder/decoder for one carrier key. Tracks the wrapping
/// sequence so it can refuse to reuse a nonce.
pub struct CarrierCodec {
    key: [u8; KEY_BYTES],
    last_tx_seq: Option<u8>,
    last_rx_seq: Option<u8>,
    frames_under_key: u32,
}

impl CarrierCodec {
    pub fn new(key: [u8; KEY_BYTES]) -> Self {
        CarrierCodec {
            key,
            last_tx_seq: None,
            last_rx_seq: None,
            frames_under_key: 0,
        }
    }

    /// Encode `payload` (at most [`PAYLOAD_BYTES`]) into a wire-format
    /// string, advancing the wrapping sequence number.
    pub fn encode(&mut self, payload: &[u8]) -> Result<String, CarrierError> {
        if payload.len() > PAYLOAD_BYTES {
            return Err(CarrierError::PayloadTooLarge);
        }
        if self.frames_under_key >= 100 {
            return Err(CarrierError::KeyExhausted);
        }

        let seq = match self.last_tx_seq {
            Some(s) => (s + 1) % 100,
            None => 0,
        };
        self.last_tx_seq = Some(seq);
        self.frames_under_key += 1;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = nonce_from_seq(seq);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| CarrierError::CryptoFailure)?;

        let mut frame = ciphertext;
        frame.extend_from_slice(&crc16_ccitt_false(payload).to_be_bytes());

        Ok(format!("{SIGIL}{seq:02}{}", URL_SAFE_NO_PAD.encode(frame)))
    }

    /// Decode a wire-format string back into plaintext, rejecting bad
    /// sigils, truncated bodies, CRC mismatches, and exact-duplicate
    /// sequence numbers (a replayed frame).
    pub fn decode(&mut self, raw: &str) -> Result<Option<Vec<u8>>, CarrierError> {
        let rest = raw.strip_prefix(SIGIL).ok_or(CarrierError::MissingSigil)?;
        if rest.len() < 2 {
            return Err(CarrierError::Truncated);
        }
        let (seq_str, body_str) = rest.split_at(2);
        let seq: u8 = seq_str.parse().map_err(|_| CarrierError::Truncated)?;

        let body = URL_SAFE_NO_PAD
            .decode(body_str)
            .map_err(|_| CarrierError::InvalidEncoding)?;
        if body.len() < 2 {
            return Err(CarrierError::Truncated);
        }
        let (ciphertext, crc_bytes) = body.split_at(body.len() - 2);
        let expected_crc = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = nonce_from_seq(seq);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| CarrierError::CryptoFailure)?;

        if crc16_ccitt_false(&plaintext) != expected_crc {
            return Err(CarrierError::CrcMismatch);
        }

        if self.last_rx_seq == Some(seq) {
            return Ok(None);
        }
        self.last_rx_seq = Some(seq);
        Ok(Some(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; KEY_BYTES] {
        [0x42; KEY_BYTES]
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut tx = CarrierCodec::new(key());
        let mut rx = CarrierCodec::new(key());

        let frame = tx.encode(b"hello").unwrap();
        let decoded = rx.decode(&frame).unwrap();
        assert_eq!(decoded, Some(b"hello".to_vec()));
    }

    #[test]
    fn payload_over_limit_is_rejected() {
        let mut tx = CarrierCodec::new(key());
        let too_big = vec![0u8; PAYLOAD_BYTES + 1];
        assert!(matches!(
            tx.encode(&too_big),
            Err(CarrierError::PayloadTooLarge)
        ));
    }

    #[test]
    fn duplicate_sequence_is_rejected_on_decode() {
        let mut tx = CarrierCodec::new(key());
        let mut rx = CarrierCodec::new(key());

        let frame = tx.encode(b"one").unwrap();
        assert_eq!(rx.decode(&frame).unwrap(), Some(b"one".to_vec()));
        assert_eq!(rx.decode(&frame).unwrap(), None);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let mut tx = CarrierCodec::new(key());
        let mut rx = CarrierCodec::new(key());

        let mut frame = tx.encode(b"payload").unwrap();
        // Flip a character well inside the base64 body.
        let mid = frame.len() - 4;
        let mut chars: Vec<char> = frame.chars().collect();
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        frame = chars.into_iter().collect();

        assert!(rx.decode(&frame).is_err());
    }

    #[test]
    fn key_exhaustion_after_100_frames_is_refused() {
        let mut tx = CarrierCodec::new(key());
        for _ in 0..100 {
            tx.encode(b"x").unwrap();
        }
        assert!(matches!(
            tx.encode(b"x"),
            Err(CarrierError::KeyExhausted)
        ));
    }

    #[test]
    fn crc16_matches_known_vector() {
        // "123456789" -> 0x29B1 is the standard CRC-16/CCITT-FALSE check value.
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }
}
