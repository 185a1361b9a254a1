// Copyright 2021-2026 The Cadre Project Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Field-level credential encryption, password hashing and single-use
//! token generation (`SPEC_FULL.md` §4.10, §9).
//!
//! [`FieldCipher`] is a Fernet-equivalent authenticated-encryption
//! construction (AES-128-CBC + HMAC-SHA256 over a version-tagged token),
//! used to encrypt the `pandas_password` field at rest. [`hash_password`]
//! / [`verify_password`] wrap bcrypt for the optional web-portal login.
//! [`generate_token`] is the shared primitive behind license tokens and
//! instance config-fetch tokens.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 1;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("malformed ciphertext token")]
    MalformedToken,

    #[error("ciphertext authentication failed (wrong key or corrupted data)")]
    InvalidToken,

    #[error("bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// A loaded field-encryption key, split the way Fernet splits its 32-byte
/// key: the first half signs, the second half encrypts.
#[derive(Clone)]
pub struct FieldCipher {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

impl Drop for FieldCipher {
    fn drop(&mut self) {
        self.signing_key.zeroize();
        self.encryption_key.zeroize();
    }
}

impl FieldCipher {
    /// Loads a cipher from a base64-encoded 32-byte key, as configured by
    /// `field_encryption_key` (`SPEC_FULL.md` §6).
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKeyLength(0))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&key[..16]);
        encryption_key.copy_from_slice(&key[16..]);
        Ok(Self {
            signing_key,
            encryption_key,
        })
    }

    /// Generates a fresh random key, base64-encoded, for operators
    /// bootstrapping a new deployment.
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        STANDARD.encode(key)
    }

    /// Encrypts `plaintext` into a version-tagged, base64-encoded token:
    /// `version || iv || ciphertext || hmac`. `None` in, `None` out.
    #[must_use]
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut signed = Vec::with_capacity(1 + IV_LEN + ciphertext.len());
        signed.push(VERSION);
        signed.extend_from_slice(&iv);
        signed.extend_from_slice(&ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.signing_key).expect("hmac accepts any key length");
        mac.update(&signed);
        let tag = mac.finalize().into_bytes();

        signed.extend_from_slice(&tag);
        STANDARD.encode(signed)
    }

    /// Decrypts a token produced by [`Self::encrypt`]. Any failure
    /// (malformed, wrong key, tampered) is reported uniformly; per
    /// `SPEC_FULL.md` §7, callers should log at warn and treat the field
    /// as missing rather than distinguish the failure mode.
    pub fn decrypt(&self, token: &str) -> Result<String, CryptoError> {
        let raw = STANDARD.decode(token.trim()).map_err(|_| CryptoError::MalformedToken)?;
        if raw.len() < 1 + IV_LEN + MAC_LEN {
            return Err(CryptoError::MalformedToken);
        }

        let (signed, tag) = raw.split_at(raw.len() - MAC_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.signing_key).expect("hmac accepts any key length");
        mac.update(signed);
        mac.verify_slice(tag).map_err(|_| CryptoError::InvalidToken)?;

        if signed[0] != VERSION {
            return Err(CryptoError::MalformedToken);
        }

        let iv = &signed[1..1 + IV_LEN];
        let ciphertext = &signed[1 + IV_LEN..];

        let plaintext = Aes128CbcDec::new(&self.encryption_key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::InvalidToken)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidToken)
    }
}

/// Hashes a plaintext password with bcrypt at the given cost factor
/// (`SPEC_FULL.md` §6 default: 12).
pub fn hash_password(plaintext: &str, cost: u32) -> Result<String, CryptoError> {
    Ok(bcrypt::hash(plaintext, cost)?)
}

/// Verifies a plaintext password against a bcrypt hash.
pub fn verify_password(plaintext: &str, hash: &str) -> Result<bool, CryptoError> {
    Ok(bcrypt::verify(plaintext, hash)?)
}

/// Generates an opaque, URL-safe single-use token plus its SHA-256 hex
/// digest for storage. The raw value is returned once and never
/// persisted (`SPEC_FULL.md` §4.10).
#[must_use]
pub fn generate_token() -> (String, String) {
    generate_token_with_len(32)
}

#[must_use]
pub fn generate_token_with_len(num_bytes: usize) -> (String, String) {
    let mut bytes = vec![0u8; num_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = URL_SAFE_NO_PAD.encode(&bytes);
    let hash = hash_token(&raw);
    (raw, hash)
}

/// Hashes a raw token the same way [`generate_token`] does, for looking
/// up a bearer token presented by a caller.
#[must_use]
pub fn hash_token(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> FieldCipher {
        FieldCipher::from_base64(&FieldCipher::generate_key()).unwrap()
    }

    #[test]
    fn round_trips_plaintext() {
        let cipher = test_cipher();
        let token = cipher.encrypt("hunter2");
        assert_eq!(cipher.decrypt(&token).unwrap(), "hunter2");
    }

    #[test]
    fn rejects_tampered_token() {
        let cipher = test_cipher();
        let mut token = cipher.encrypt("hunter2").into_bytes();
        *token.last_mut().unwrap() ^= 0x01;
        let tampered = String::from_utf8(token).unwrap();
        assert!(matches!(cipher.decrypt(&tampered), Err(CryptoError::InvalidToken) | Err(CryptoError::MalformedToken)));
    }

    #[test]
    fn rejects_wrong_key() {
        let cipher_a = test_cipher();
        let cipher_b = test_cipher();
        let token = cipher_a.encrypt("hunter2");
        assert!(cipher_b.decrypt(&token).is_err());
    }

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("correct horse battery staple", 4).unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn token_hash_is_deterministic_and_raw_is_not_stored() {
        let (raw, hash) = generate_token();
        assert_eq!(hash_token(&raw), hash);
        assert_ne!(raw, hash);
    }
}
