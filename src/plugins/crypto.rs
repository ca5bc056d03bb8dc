//! Password-based encryption for backup bundles.
//!
//! Layout of an encrypted blob:
//!
//! ```text
//! "WGE1" | kdf iterations (u32 BE) | salt [16] | nonce [12] | ciphertext + tag
//! ```
//!
//! The key is PBKDF2-HMAC-SHA256 over the passphrase and a fresh salt; the
//! cipher is AES-256-GCM-SIV with a fresh nonce. Everything needed to decrypt
//! except the passphrase travels in the header.

use crate::core::error::WakeguardError;
use crate::core::prompt::Passphrase;
use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const MAGIC: &[u8; 4] = b"WGE1";
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const HEADER_LEN: usize = MAGIC.len() + 4 + SALT_LEN + NONCE_LEN;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Upper bound accepted on decrypt; a forged header must not pin the CPU.
pub const MAX_KDF_ITERATIONS: u32 = 10_000_000;

fn derive_key(
    passphrase: &Passphrase,
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.expose(), salt, iterations, &mut key[..]);
    key
}

fn random_bytes<const N: usize>() -> Result<[u8; N], WakeguardError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf)
        .map_err(|e| WakeguardError::IoError(std::io::Error::other(e.to_string())))?;
    Ok(buf)
}

pub fn encrypt(
    plain: &[u8],
    passphrase: &Passphrase,
    iterations: u32,
) -> Result<Vec<u8>, WakeguardError> {
    if iterations == 0 || iterations > MAX_KDF_ITERATIONS {
        return Err(WakeguardError::Config(format!(
            "kdf_iterations must be between 1 and {}",
            MAX_KDF_ITERATIONS
        )));
    }
    let salt: [u8; SALT_LEN] = random_bytes()?;
    let nonce: [u8; NONCE_LEN] = random_bytes()?;

    let key = derive_key(passphrase, &salt, iterations);
    let cipher = Aes256GcmSiv::new_from_slice(&key[..])
        .map_err(|_| WakeguardError::Config("invalid key length".to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|_| WakeguardError::Config("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&iterations.to_be_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Every failure, from a short header to a failed tag check, maps to
/// `WrongPassphraseOrCorrupt`.
pub fn decrypt(cipher_bytes: &[u8], passphrase: &Passphrase) -> Result<Vec<u8>, WakeguardError> {
    if cipher_bytes.len() < HEADER_LEN + TAG_LEN || &cipher_bytes[..MAGIC.len()] != MAGIC {
        return Err(WakeguardError::WrongPassphraseOrCorrupt);
    }
    let mut offset = MAGIC.len();
    let mut iter_bytes = [0u8; 4];
    iter_bytes.copy_from_slice(&cipher_bytes[offset..offset + 4]);
    let iterations = u32::from_be_bytes(iter_bytes);
    if iterations == 0 || iterations > MAX_KDF_ITERATIONS {
        return Err(WakeguardError::WrongPassphraseOrCorrupt);
    }
    offset += 4;
    let salt = &cipher_bytes[offset..offset + SALT_LEN];
    offset += SALT_LEN;
    let nonce = &cipher_bytes[offset..offset + NONCE_LEN];
    offset += NONCE_LEN;

    let key = derive_key(passphrase, salt, iterations);
    let cipher = Aes256GcmSiv::new_from_slice(&key[..])
        .map_err(|_| WakeguardError::WrongPassphraseOrCorrupt)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), &cipher_bytes[offset..])
        .map_err(|_| WakeguardError::WrongPassphraseOrCorrupt)
}
