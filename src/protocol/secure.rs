//! Compression and password-based encryption for the registry channel
//!
//! Outbound bodies are gzipped and then, when credentials are configured,
//! encrypted. Inbound bodies go through the reverse order.
//!
//! The cipher key and IV come from Argon2 over the password and salt:
//! 48 bytes of output, split into a 256-bit AES key and a 128-bit IV. Each
//! encrypted body carries a random 16-byte mask that is XORed into the IV to
//! form that body's AES-GCM nonce:
//!
//! ```text
//! +----------+----------------------------+
//! | mask(16) | AES-256-GCM ciphertext+tag |
//! +----------+----------------------------+
//! ```

use std::fmt;
use std::io::{Read, Write};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

type Aes256Gcm128 = AesGcm<Aes256, U16>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Gzip `data` at the default compression level
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Reverse [`gzip`]
pub fn ungzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Symmetric cipher keyed from a password and salt
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm128,
    iv: [u8; IV_LEN],
}

impl Cipher {
    /// Derive the key and IV
    ///
    /// The salt must be at least 8 bytes long.
    pub fn new(password: &str, salt: &[u8]) -> Result<Self> {
        let mut material = [0u8; KEY_LEN + IV_LEN];
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut material)
            .map_err(|e| Error::Crypto(format!("key derivation failed: {}", e)))?;

        let cipher = Aes256Gcm128::new_from_slice(&material[..KEY_LEN])
            .map_err(|e| Error::Crypto(format!("invalid key: {}", e)))?;
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&material[KEY_LEN..]);

        Ok(Self { cipher, iv })
    }

    /// Encrypt `plain`
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let mask: [u8; IV_LEN] = rand::random();
        let nonce = self.nonce(&mask);

        let sealed = self
            .cipher
            .encrypt(Nonce::<U16>::from_slice(&nonce), plain)
            .map_err(|_| Error::Crypto("encryption failed".into()))?;

        let mut out = Vec::with_capacity(IV_LEN + sealed.len());
        out.extend_from_slice(&mask);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt a body produced by [`Cipher::encrypt`]
    ///
    /// Fails on a wrong password or salt and on tampered input.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < IV_LEN {
            return Err(Error::Crypto("encrypted body too short".into()));
        }
        let (mask, sealed) = data.split_at(IV_LEN);
        let nonce = self.nonce(mask);

        self.cipher
            .decrypt(Nonce::<U16>::from_slice(&nonce), sealed)
            .map_err(|_| Error::Crypto("decryption failed (wrong password or salt?)".into()))
    }

    /// Encrypt a string into base64 text
    pub fn encrypt_str(&self, plain: &str) -> Result<String> {
        Ok(BASE64.encode(self.encrypt(plain.as_bytes())?))
    }

    /// Reverse [`Cipher::encrypt_str`]
    pub fn decrypt_str(&self, encoded: &str) -> Result<String> {
        let data = BASE64
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("invalid base64: {}", e)))?;
        String::from_utf8(self.decrypt(&data)?)
            .map_err(|e| Error::Crypto(format!("decrypted text is not UTF-8: {}", e)))
    }

    fn nonce(&self, mask: &[u8]) -> [u8; IV_LEN] {
        let mut nonce = self.iv;
        for (n, m) in nonce.iter_mut().zip(mask) {
            *n ^= m;
        }
        nonce
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

/// Body transform applied to every registry service exchange
#[derive(Debug, Clone, Default)]
pub struct SecureTransform {
    cipher: Option<Cipher>,
}

impl SecureTransform {
    /// Compression only
    pub fn plain() -> Self {
        Self { cipher: None }
    }

    /// Compression followed by encryption
    pub fn encrypted(cipher: Cipher) -> Self {
        Self {
            cipher: Some(cipher),
        }
    }

    /// Whether bodies are encrypted
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Turn a UTF-8 body into wire bytes
    pub fn seal(&self, body: &str) -> Result<Vec<u8>> {
        let compressed = gzip(body.as_bytes())?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&compressed),
            None => Ok(compressed),
        }
    }

    /// Turn wire bytes back into a UTF-8 body
    pub fn open(&self, data: &[u8]) -> Result<String> {
        let compressed = match &self.cipher {
            Some(cipher) => cipher.decrypt(data)?,
            None => data.to_vec(),
        };
        let body = ungzip(&compressed)?;
        String::from_utf8(body)
            .map_err(|e| Error::Crypto(format!("registry body is not UTF-8: {}", e)))
    }
}
