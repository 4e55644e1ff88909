//! Public key blocks: the text form in which a DH public key is signed and handed to a peer.
//!
//! ```text
//! DH Public Key:
//! 00000000000000000000000000000000034519728374658239
//! 48571029384756102938475610293847561029384756102938
//! ...
//! ```
//!
//! The decimal key is left padded with zeros to whole 50 digit lines. Parsing keeps only
//! lines of exactly 50 digits, which skips whatever the signing engine wraps around them.

use num_bigint::BigUint;

use crate::dh;
use crate::engine::Signer;
use crate::error::Error;
use crate::route::placeholder_peer_key;
use crate::router::KeyRouter;

/// KEY_BLOCK_HEADER opens every key block
pub const KEY_BLOCK_HEADER: &str = "DH Public Key:";
/// KEY_LINE_WIDTH is 50 digits
pub const KEY_LINE_WIDTH: usize = 50;

/// padded_width is the digit count of p - 1 rounded up to whole lines
fn padded_width() -> usize {
    let digits = dh::group().prime().to_str_radix(10).len();
    digits.div_ceil(KEY_LINE_WIDTH) * KEY_LINE_WIDTH
}

/// format_public_key renders a key block for `key`
pub fn format_public_key(key: &BigUint) -> String {
    let digits = key.to_str_radix(10);
    let width = padded_width().max(digits.len().div_ceil(KEY_LINE_WIDTH) * KEY_LINE_WIDTH);
    let padded = format!("{:0>width$}", digits, width = width);
    let mut block = String::with_capacity(padded.len() + padded.len() / KEY_LINE_WIDTH + 32);
    block.push_str(KEY_BLOCK_HEADER);
    block.push('\n');
    for line in padded.as_bytes().chunks(KEY_LINE_WIDTH) {
        block.push_str(&String::from_utf8_lossy(line));
        block.push('\n');
    }
    block.push('\n');
    block
}

/// parse_public_key recovers a key from a (possibly signed) key block
pub fn parse_public_key(text: &str) -> Result<BigUint, Error> {
    let digits: String = text
        .lines()
        .map(str::trim)
        .filter(|line| line.len() == KEY_LINE_WIDTH && line.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Err(Error::MalformedKeyBlock("no key digits found".to_string()));
    }
    significant
        .parse::<BigUint>()
        .map_err(|e| Error::MalformedKeyBlock(e.to_string()))
}

/// export_signed signs the key block for our public key on (from, to) with the `from`
/// identity's signing key
pub fn export_signed<S: Signer>(
    router: &KeyRouter<'_>,
    signer: &S,
    from: &str,
    to: &str,
    signing_passphrase: &str,
) -> Result<String, Error> {
    let route = router.lookup_route(from, to)?;
    sign_key_block(signer, &route.keys.public_key, from, signing_passphrase)
}

pub(crate) fn sign_key_block<S: Signer>(
    signer: &S,
    key: &BigUint,
    key_id: &str,
    signing_passphrase: &str,
) -> Result<String, Error> {
    signer
        .sign(&format_public_key(key), signing_passphrase, key_id)
        .map_err(|e| Error::Signing(e.to_string()))
}

/// Imported describes a verified key block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imported {
    /// the signer's email, lowercased: the `to` side of our route
    pub peer: String,
    pub trust: String,
    pub public_key: BigUint,
}

/// verify_signed checks the signature and extracts the key and the signer
pub fn verify_signed<S: Signer>(signer: &S, signed: &str) -> Result<Imported, Error> {
    let verified = signer.verify(signed).map_err(|e| {
        tracing::debug!(error = %e, "signature verification failed");
        Error::SignatureInvalid
    })?;
    tracing::info!(identity = %verified.identity, trust = %verified.trust, "verified key block signature");
    Ok(Imported {
        peer: verified.email(),
        trust: verified.trust.clone(),
        public_key: parse_public_key(signed)?,
    })
}

/// ImportOutcome tells whether an import updated an existing route or created one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Updated,
    Created,
}

/// import_signed verifies a signed key block and stores the key as the peer key of the
/// (from, signer) route. A missing route is created only when `create_missing` is set.
pub fn import_signed<S: Signer>(
    router: &mut KeyRouter<'_>,
    signer: &S,
    signed: &str,
    from: &str,
    create_missing: bool,
    now: f64,
) -> Result<(Imported, ImportOutcome), Error> {
    let imported = verify_signed(signer, signed)?;
    let from = from.to_lowercase();
    let to = imported.peer.clone();
    if router.lookup_route(&from, &to).is_ok() {
        router.set_peer_public_key(&from, &to, imported.public_key.clone())?;
        return Ok((imported, ImportOutcome::Updated));
    }
    if !create_missing {
        return Err(Error::route_not_found(&from, &to));
    }
    if !dh::validate_peer_public_key(&imported.public_key, router.policy()) {
        return Err(Error::invalid_peer_key(&from, &to));
    }
    router.create_route(&from, &to, placeholder_peer_key(), now)?;
    router.set_peer_public_key(&from, &to, imported.public_key.clone())?;
    Ok((imported, ImportOutcome::Created))
}

/* ------------------------------------------------------------------------- */

// TESTS
