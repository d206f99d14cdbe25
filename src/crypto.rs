//! Field encryption used by the portal login API
//!
//! Every field is AES-128 in ECB mode with PKCS#7 padding, hex encoded. The
//! portal decrypts block by block, so the mode must stay ECB.

use crate::error::PortalError;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use sha2::{Digest, Sha256};

/// Shared secret baked into the portal's web client. Also the key for
/// fields that are not tied to a user.
pub const SHARED_KEY: &str = "axaQiQpsdFAacccs";

const BLOCK_SIZE: usize = 16;

/// Per-user key: first 8 bytes of SHA-256(shared secret + username), hex.
pub fn derive_key(username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SHARED_KEY.as_bytes());
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

pub fn encrypt_field(key: &str, plaintext: &str) -> Result<String, PortalError> {
    let cipher =
        Aes128::new_from_slice(key.as_bytes()).map_err(|_| PortalError::InvalidKey(key.len()))?;

    let mut buf = pkcs7_pad(plaintext.as_bytes());
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    Ok(hex::encode(buf))
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    // A full block of padding when the input is already aligned
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}
