//! The encryption and signing boundary.
//!
//! Message bodies, the key store blob and key handoffs are all protected by a passphrase
//! driven symmetric engine. Production setups plug in an OpenPGP implementation through
//! `Engine` and `Signer`; `AeadEngine` is a self-contained engine for everything else.
//! Engine errors are opaque here (`anyhow`), callers map them onto `BadPassphrase` or
//! `BadSecret` without looking inside.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Cipher selects the AEAD used for symmetric encryption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cipher {
    #[default]
    #[serde(rename = "chacha20poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305,
}

impl Cipher {
    fn tag(self) -> u8 {
        match self {
            Cipher::ChaCha20Poly1305 => 1,
            Cipher::XChaCha20Poly1305 => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Cipher::ChaCha20Poly1305),
            2 => Some(Cipher::XChaCha20Poly1305),
            _ => None,
        }
    }

    fn nonce_length(self) -> usize {
        match self {
            Cipher::ChaCha20Poly1305 => 12,
            Cipher::XChaCha20Poly1305 => 24,
        }
    }
}

/// Engine encrypts and decrypts with a passphrase. Output of `encrypt` is ASCII text so it
/// can travel in a posting body.
pub trait Engine {
    fn encrypt(&self, data: &[u8], passphrase: &str, cipher: Cipher) -> anyhow::Result<Vec<u8>>;
    fn decrypt(&self, blob: &[u8], passphrase: &str) -> anyhow::Result<Vec<u8>>;
}

impl<E: Engine + ?Sized> Engine for &E {
    fn encrypt(&self, data: &[u8], passphrase: &str, cipher: Cipher) -> anyhow::Result<Vec<u8>> {
        (**self).encrypt(data, passphrase, cipher)
    }

    fn decrypt(&self, blob: &[u8], passphrase: &str) -> anyhow::Result<Vec<u8>> {
        (**self).decrypt(blob, passphrase)
    }
}

/// Verified is what a signer reports about a good signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Signer identity, usually "Name <email>"
    pub identity: String,
    /// Trust level as reported by the signing engine's web of trust
    pub trust: String,
}

impl Verified {
    /// email extracts the address between angle brackets (lowercased), or the whole
    /// identity when there are none
    pub fn email(&self) -> String {
        let inner = self
            .identity
            .split_once('<')
            .and_then(|(_, rest)| rest.split_once('>'))
            .map(|(address, _)| address)
            .unwrap_or(&self.identity);
        inner.trim().to_lowercase()
    }
}

/// Signer produces and checks clear-signed text
pub trait Signer {
    fn sign(&self, data: &str, passphrase: &str, key_id: &str) -> anyhow::Result<String>;
    /// verify fails for anything that is not a valid signature
    fn verify(&self, signed: &str) -> anyhow::Result<Verified>;
}

/* ------------------------------------------------------------------------- */

// Built-in engine

/// MAGIC starts every binary AeadEngine payload
const MAGIC: &[u8; 4] = b"DHB1";
/// SALT_LENGTH is 16 bytes
const SALT_LENGTH: usize = 16;
/// S2K_COUNT is how many bytes of salt || passphrase are hashed (OpenPGP style iterated S2K)
const S2K_COUNT: usize = 1 << 20;
/// KEY_CONTEXT separates the body key from anything else HKDF could be asked for
const KEY_CONTEXT: &[u8] = b"dhboard aead key";
/// ARMOR_BEGIN and ARMOR_END frame armored payloads
const ARMOR_BEGIN: &str = "-----BEGIN DHBOARD MESSAGE-----";
const ARMOR_END: &str = "-----END DHBOARD MESSAGE-----";
/// ARMOR_LINE_WIDTH is 64 hex characters per line
const ARMOR_LINE_WIDTH: usize = 64;

/// AeadEngine is a passphrase engine built from an iterated, salted SHA-256 S2K, HKDF and
/// ChaCha20-Poly1305.
///
/// Payload: `MAGIC || cipher tag || salt (16) || nonce || ciphertext+tag`, hex armored.
#[derive(Debug, Clone, Copy, Default)]
pub struct AeadEngine;

impl AeadEngine {
    pub fn new() -> Self {
        AeadEngine
    }

    fn derive_key(passphrase: &str, salt: &[u8]) -> anyhow::Result<Zeroizing<[u8; 32]>> {
        let chunk = Zeroizing::new([salt, passphrase.as_bytes()].concat());
        let mut hasher = Sha256::new();
        let mut remaining = S2K_COUNT.max(chunk.len());
        while remaining > 0 {
            let take = remaining.min(chunk.len());
            hasher.update(&chunk[..take]);
            remaining -= take;
        }
        let stretched: Zeroizing<[u8; 32]> = Zeroizing::new(hasher.finalize().into());
        let kdf = Hkdf::<Sha256>::new(Some(salt), stretched.as_slice());
        let mut key = Zeroizing::new([0u8; 32]);
        kdf.expand(KEY_CONTEXT, key.as_mut_slice())?;
        Ok(key)
    }
}

fn random_bytes(length: usize) -> anyhow::Result<Vec<u8>> {
    let mut out = vec![0u8; length];
    OsRng.try_fill_bytes(&mut out)?;
    Ok(out)
}

impl Engine for AeadEngine {
    fn encrypt(&self, data: &[u8], passphrase: &str, cipher: Cipher) -> anyhow::Result<Vec<u8>> {
        let salt = random_bytes(SALT_LENGTH)?;
        let nonce = random_bytes(cipher.nonce_length())?;
        let key = Self::derive_key(passphrase, &salt)?;
        let key = Key::from_slice(key.as_slice());
        let sealed = match cipher {
            Cipher::ChaCha20Poly1305 => {
                ChaCha20Poly1305::new(key).encrypt(Nonce::from_slice(&nonce), data)
            }
            Cipher::XChaCha20Poly1305 => {
                XChaCha20Poly1305::new(key).encrypt(XNonce::from_slice(&nonce), data)
            }
        }
        .map_err(|_| anyhow::anyhow!("aead encryption failed"))?;
        let mut payload = Vec::with_capacity(MAGIC.len() + 1 + salt.len() + nonce.len() + sealed.len());
        payload.extend_from_slice(MAGIC);
        payload.push(cipher.tag());
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(armor(&payload).into_bytes())
    }

    fn decrypt(&self, blob: &[u8], passphrase: &str) -> anyhow::Result<Vec<u8>> {
        let payload = dearmor(blob)?;
        let header = MAGIC.len() + 1;
        if payload.len() < header || &payload[..MAGIC.len()] != MAGIC {
            anyhow::bail!("not an engine payload");
        }
        let cipher = Cipher::from_tag(payload[MAGIC.len()])
            .ok_or_else(|| anyhow::anyhow!("unknown cipher tag {}", payload[MAGIC.len()]))?;
        let nonce_end = header + SALT_LENGTH + cipher.nonce_length();
        if payload.len() < nonce_end {
            anyhow::bail!("truncated payload");
        }
        let salt = &payload[header..header + SALT_LENGTH];
        let nonce = &payload[header + SALT_LENGTH..nonce_end];
        let key = Self::derive_key(passphrase, salt)?;
        let key = Key::from_slice(key.as_slice());
        let opened = match cipher {
            Cipher::ChaCha20Poly1305 => {
                ChaCha20Poly1305::new(key).decrypt(Nonce::from_slice(nonce), &payload[nonce_end..])
            }
            Cipher::XChaCha20Poly1305 => {
                XChaCha20Poly1305::new(key).decrypt(XNonce::from_slice(nonce), &payload[nonce_end..])
            }
        }
        .map_err(|_| anyhow::anyhow!("aead decryption failed"))?;
        Ok(opened)
    }
}

/// armor hex encodes a payload between BEGIN/END lines
pub fn armor(payload: &[u8]) -> String {
    let encoded = hex::encode(payload);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / ARMOR_LINE_WIDTH + 80);
    out.push_str(ARMOR_BEGIN);
    out.push('\n');
    for line in encoded.as_bytes().chunks(ARMOR_LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(ARMOR_END);
    out.push('\n');
    out
}

/// dearmor finds the first armored block in `text` (anything around it is ignored)
pub fn dearmor(text: &[u8]) -> anyhow::Result<Vec<u8>> {
    let text = std::str::from_utf8(text)?;
    let mut lines = text.lines().map(str::trim);
    if !lines.any(|line| line == ARMOR_BEGIN) {
        anyhow::bail!("no armored block");
    }
    let mut encoded = String::new();
    for line in lines {
        if line == ARMOR_END {
            return Ok(hex::decode(encoded)?);
        }
        encoded.push_str(line);
    }
    anyhow::bail!("unterminated armored block")
}

/* ------------------------------------------------------------------------- */

// TESTS
