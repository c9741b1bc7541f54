//! NIP-04 payload encryption: AES-256-CBC under an ECDH shared key.
//!
//! Payload format: `base64(ciphertext) + "?iv=" + base64(iv)`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nostr_sdk::prelude::*;
use rand_core::{OsRng, RngCore};

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_SEPARATOR: &str = "?iv=";
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// ECDH between `secret` and the counterpart's x-only key taken as the
/// even-parity point; the shared point's x coordinate is the AES key.
pub fn derive_shared_key(
    secret: &SecretKey,
    counterpart: &PublicKey,
) -> Result<[u8; 32], CryptoError> {
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(&counterpart.to_bytes());
    let point = secp256k1::PublicKey::from_slice(&compressed)
        .map_err(|err| CryptoError::InvalidPublicKey(err.to_string()))?;

    let scalar = secp256k1::SecretKey::from_slice(secret.as_secret_bytes())
        .map_err(|_| CryptoError::InvalidSecretKey)?;

    let shared = secp256k1::ecdh::shared_secret_point(&point, &scalar);
    let mut key = [0u8; 32];
    key.copy_from_slice(&shared[..32]);
    Ok(key)
}

/// Encrypts and decrypts NIP-04 payloads, memoizing one shared key per
/// (own public key, counterpart public key). The cache is never evicted.
#[derive(Default)]
pub struct Nip04 {
    cache: Mutex<HashMap<(PublicKey, PublicKey), [u8; 32]>>,
}

impl Nip04 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared_key(&self, keys: &Keys, counterpart: &PublicKey) -> Result<[u8; 32], CryptoError> {
        let id = (keys.public_key(), *counterpart);
        if let Some(key) = self.cache().get(&id) {
            return Ok(*key);
        }
        let key = derive_shared_key(keys.secret_key(), counterpart)?;
        self.cache().insert(id, key);
        Ok(key)
    }

    pub fn encrypt(
        &self,
        keys: &Keys,
        counterpart: &PublicKey,
        plaintext: &str,
    ) -> Result<String, CryptoError> {
        let key = self.shared_key(keys, counterpart)?;
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(format!(
            "{}{}{}",
            STANDARD.encode(ciphertext),
            IV_SEPARATOR,
            STANDARD.encode(iv)
        ))
    }

    pub fn decrypt(
        &self,
        keys: &Keys,
        counterpart: &PublicKey,
        payload: &str,
    ) -> Result<String, CryptoError> {
        let (ciphertext, iv) = payload
            .split_once(IV_SEPARATOR)
            .ok_or(CryptoError::MalformedPayload)?;
        let ciphertext = STANDARD.decode(ciphertext)?;
        let iv = STANDARD.decode(iv)?;
        let iv: [u8; IV_LEN] = iv
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::MalformedPayload);
        }

        let key = self.shared_key(keys, counterpart)?;
        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::Padding)?;
        Ok(String::from_utf8(plaintext)?)
    }

    pub fn cached_keys(&self) -> usize {
        self.cache().len()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<(PublicKey, PublicKey), [u8; 32]>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Nip04 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nip04")
            .field("cached_keys", &self.cached_keys())
            .finish()
    }
}
