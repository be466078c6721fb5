//! Webhook authentication and payload decryption.
//!
//! The platform signs every delivery with SHA-1 over the sorted tuple
//! `[token, timestamp, nonce, data]` and encrypts the body with AES-256-CBC,
//! using the first 16 bytes of the key as the IV.

use aes::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use base64::{
    alphabet,
    engine::{general_purpose::STANDARD as BASE64, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use sha1::{Digest, Sha1};
use thiserror::Error;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
/// Senders pad to either 16 or 32 byte blocks.
const MAX_PAD: usize = 32;

/// Keys are distributed without trailing `=`; accept both forms.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encoding key must decode to {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("ciphertext is empty")]
    EmptyCiphertext,
    #[error("decrypted payload is empty")]
    EmptyPlaintext,
    #[error("ciphertext length {0} is not a multiple of the block size")]
    BlockAlignment(usize),
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Lowercase hex SHA-1 of the lexicographically sorted, concatenated tuple.
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str, data: &str) -> String {
    let mut parts = [token, timestamp, nonce, data];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Not constant-time.
pub fn verify_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    data: &str,
    signature: &str,
) -> bool {
    compute_signature(token, timestamp, nonce, data) == signature
}

/// Decrypt a base64 AES-256-CBC payload.
///
/// Trailing PKCS7 padding is stripped only when it validates; otherwise the
/// decrypted buffer is returned as-is.
pub fn decrypt(ciphertext: &str, encoding_key: &str) -> Result<String, CryptoError> {
    let key = decode_key(encoding_key)?;

    let mut buffer = BASE64
        .decode(ciphertext.trim())
        .map_err(|e| CryptoError::Base64(e.to_string()))?;
    if buffer.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }
    if buffer.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::BlockAlignment(buffer.len()));
    }

    let total = buffer.len();
    let cipher = Aes256CbcDec::new_from_slices(&key, &key[..IV_LEN])
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    let len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| CryptoError::BlockAlignment(total))?
        .len();
    buffer.truncate(len);

    if buffer.is_empty() {
        return Err(CryptoError::EmptyPlaintext);
    }

    let unpadded = strip_pkcs7(&buffer).len();
    buffer.truncate(unpadded);

    String::from_utf8(buffer).map_err(|_| CryptoError::InvalidUtf8)
}

/// Inverse of [`decrypt`], padding with PKCS7 over 16-byte blocks.
pub fn encrypt(plaintext: &str, encoding_key: &str) -> Result<String, CryptoError> {
    let key = decode_key(encoding_key)?;
    let message = plaintext.as_bytes();

    let padded_len = (message.len() / BLOCK_LEN + 1) * BLOCK_LEN;
    let mut buffer = vec![0u8; padded_len];
    buffer[..message.len()].copy_from_slice(message);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &key[..IV_LEN])
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    let encrypted = cipher
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, message.len())
        .map_err(|_| CryptoError::BlockAlignment(padded_len))?;

    Ok(BASE64.encode(encrypted))
}

/// One-time URL ownership challenge: check the signature over `check_str`,
/// then return its decrypted plaintext.
pub fn verify_webhook_url(
    check_str: &str,
    timestamp: &str,
    nonce: &str,
    signature: &str,
    token: &str,
    encoding_key: &str,
) -> Result<String, CryptoError> {
    if !verify_signature(token, timestamp, nonce, check_str, signature) {
        return Err(CryptoError::SignatureMismatch);
    }
    decrypt(check_str, encoding_key)
}

fn decode_key(encoding_key: &str) -> Result<Vec<u8>, CryptoError> {
    let key = KEY_ENGINE
        .decode(encoding_key.trim())
        .map_err(|e| CryptoError::Base64(e.to_string()))?;
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    Ok(key)
}

fn strip_pkcs7(buffer: &[u8]) -> &[u8] {
    let Some(&last) = buffer.last() else {
        return buffer;
    };
    let pad = last as usize;
    if pad == 0 || pad > MAX_PAD || pad > buffer.len() {
        return buffer;
    }
    let (body, tail) = buffer.split_at(buffer.len() - pad);
    if tail.iter().all(|&b| b == last) {
        body
    } else {
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 32 bytes "0123456789abcdef0123456789abcdef", unpadded base64 (43 chars).
    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY";

    fn raw_encrypt_without_padding(plaintext: &[u8]) -> String {
        let key = decode_key(KEY).unwrap();
        let mut buffer = plaintext.to_vec();
        let cipher = Aes256CbcEnc::new_from_slices(&key, &key[..IV_LEN]).unwrap();
        let encrypted = cipher
            .encrypt_padded_mut::<NoPadding>(&mut buffer, plaintext.len())
            .unwrap();
        BASE64.encode(encrypted)
    }

    #[test]
    fn test_signature_round_trip() {
        let signature = compute_signature("token", "1700000000", "nonce42", "payload");
        assert_eq!(signature.len(), 40);
        assert!(verify_signature(
            "token",
            "1700000000",
            "nonce42",
            "payload",
            &signature
        ));
    }

    #[test]
    fn test_signature_is_order_independent() {
        let a = compute_signature("b", "a", "d", "c");
        let b = compute_signature("a", "b", "c", "d");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_rejects_any_altered_character() {
        let signature = compute_signature("token", "1700000000", "nonce42", "payload");
        for i in 0..signature.len() {
            let mut altered: Vec<char> = signature.chars().collect();
            altered[i] = if altered[i] == '0' { '1' } else { '0' };
            let altered: String = altered.into_iter().collect();
            assert!(
                !verify_signature("token", "1700000000", "nonce42", "payload", &altered),
                "altered position {} still verified",
                i
            );
        }
    }

    #[test]
    fn test_signature_is_case_sensitive() {
        let signature = compute_signature("t", "1", "n", "d").to_uppercase();
        assert!(!verify_signature("t", "1", "n", "d", &signature));
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        for plaintext in ["hi", "exactly sixteen!", r#"{"event":"meeting.started"}"#, "会议纪要"] {
            let ciphertext = encrypt(plaintext, KEY).unwrap();
            assert_eq!(decrypt(&ciphertext, KEY).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_padded_key_form_is_accepted() {
        let padded = format!("{}=", KEY);
        let ciphertext = encrypt("hello", &padded).unwrap();
        assert_eq!(decrypt(&ciphertext, KEY).unwrap(), "hello");
    }

    #[test]
    fn test_unpadded_payload_is_returned_unstripped() {
        // 32 bytes ending in 'e' (0x65) do not form a valid PKCS7 tail.
        let plaintext = "no padding here, just the bytes";
        let plaintext = format!("{}e", plaintext);
        assert_eq!(plaintext.len(), 32);

        let ciphertext = raw_encrypt_without_padding(plaintext.as_bytes());
        assert_eq!(decrypt(&ciphertext, KEY).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_length() {
        let short_key = BASE64.encode([7u8; 16]);
        assert_eq!(
            decrypt("AAAA", &short_key),
            Err(CryptoError::InvalidKeyLength(16))
        );
    }

    #[test]
    fn test_empty_ciphertext() {
        assert_eq!(decrypt("", KEY), Err(CryptoError::EmptyCiphertext));
    }

    #[test]
    fn test_misaligned_ciphertext() {
        let ciphertext = BASE64.encode([1u8; 10]);
        assert_eq!(decrypt(&ciphertext, KEY), Err(CryptoError::BlockAlignment(10)));
    }

    #[test]
    fn test_verify_webhook_url() {
        let check_str = encrypt("challenge-123", KEY).unwrap();
        let signature = compute_signature("tok", "1", "n", &check_str);

        let plaintext = verify_webhook_url(&check_str, "1", "n", &signature, "tok", KEY).unwrap();
        assert_eq!(plaintext, "challenge-123");

        assert_eq!(
            verify_webhook_url(&check_str, "1", "n", &signature, "other", KEY),
            Err(CryptoError::SignatureMismatch)
        );
    }
}
