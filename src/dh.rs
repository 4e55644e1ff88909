//! Diffie-Hellman key material for routes.
//!
//! Every participant shares one fixed group: an 8192 bit safe prime generated with
//! `openssl dhparam -5` and the generator 5. We do the modular arithmetic ourselves
//! instead of going through a DH library because route private exponents have to be
//! persisted and reloaded across runs, which TLS-oriented DH implementations refuse.

use std::fmt;
use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::Error;

/// PRIME_HEX is the group modulus, big endian hex
const PRIME_HEX: [&str; 32] = [
    "eb8d2e0bfda29137c04f5a748e88681e87038d2438f1ae9a593f620381e58b47",
    "656bf5386f7880da383788a35d3b4a6991d3634b149b3875e0dccff21250dccc",
    "0bf865a5b262f204b04e38b2385c7f4fb4e2058f73a8f65252e556b667b15704",
    "65b2f6d1beeab215b05cd0e28b9277f3f48c01b1619b30147fcfc87b5b6903e7",
    "0078babb45c2ee6a6bd4099ab87b01ba09a38c36279b46309ef0df5e45e15df9",
    "ba5cb296baa535c60bb0065669fd8078269eb759416d9b27229f9cb6e5f60f7d",
    "8756f6f621ad519745f914e81a7c8d09b3c7a764863dd5d5f2bcab5ef283aa37",
    "81c985d07f2b1aafb2e7747b3217dbbfea2e91484c31a00e22467c0c7f9d40f7",
    "3d392594c516b302aa7c1aa6ca5a0b346cc6bfc1cd201dfe78aabf717f6c69f3",
    "0a896567b07090e352e87fd698128da0594916d27203e22b7bb1f7f860842fd0",
    "aee2e532a077629451ef86163fdf567048266050a473d4db27e85a33bc985b16",
    "569afddaa9a94a5b9155b32b78c84b261ce7acf7d8d0ef23d4e1d028104aff6a",
    "77cab79ecdf7dd19468f67d3cb9b86835cce1a87dbf4b2d3100a9bd7a9e25127",
    "2bf4e2fed2c2f7535e556b8cc1fc6fcfc1a2ca188c02ea9298bb4a7f12afd416",
    "4ad9211f7935f51be3d9d932e835a1fd322e7db75ba587021f8c730d7f021905",
    "e89a0ddb80bf8ea53b8f1603cf08c734aadfe7f9184e0de9e91651c3d88deb68",
    "fd1bc0188e479747caab9a157ef6ec68295a1bfb6391973364987cda6c7817df",
    "ee2ab9d4e0eaefb29154f23eafedcab06d67fbcc5d1788a20315c50f9c6471db",
    "b45419b07ddec0d507c16a0b7e2d79290d3115edcdc2996897015dfa430389a1",
    "d63533e52aa6309c76e7069e0a99af65702036e7829bc8e86ad3e23983debf72",
    "c82d8e3a2e9d767cccfb2abed6b0b0c9f217bb496ea816ea3c32111f60916d91",
    "f8a97cfa38b163ca1261733cd98cb2ff77a7ee9290bda74be8dc206489d06abc",
    "a4e5ae82ae4923fa43b451fa419da06d74f15e4efc4852bf5edf37e581edeaae",
    "fd28a8b3c672bb76068439635adecebaf8311d4018fe8e62892f784d7a447471",
    "78c4cb540c58e5e2a660a3f02c873d12b43f0643d3794d8b310fe9fa6d798e07",
    "24d38c85c9e4d5c8c9ba645f3411dd4645ef1ef1dad9ba60325b12def1bd706d",
    "11386045e450fee2a60c88cf6387dea0521acc4d869fb146a47ef4e34480d30f",
    "84ffa0e0e0a4a4c7f1b0a8e642223e8bec4d1c8effd98ba235dc5c5f7e296ecd",
    "7476595ef17371a1aec3a38c3e7f7e08e7b5e7c927f5843062f753e5ee85f7e6",
    "4164dd0ccb7261d4ca3a35058ca88f87275a292e96100005c025742f85be7a25",
    "98406b9c792f2ba2a496f8074d899821110effb184e3c679330b182a8c14ba16",
    "99f3761168d64e838829c0250c6be87bc8dc2b29954bf6cb450ba7bed793cf97",
];

/// GENERATOR is the group generator
pub const GENERATOR: u32 = 5;
/// MODULUS_BITS is the bit length of the group modulus and of every private exponent
pub const MODULUS_BITS: usize = 8192;
/// KEYGEN_ATTEMPTS bounds the quadratic residue retry loop; each draw passes with probability 1/2
const KEYGEN_ATTEMPTS: usize = 64;
/// SHARED_KEY_HEX_LENGTH is the length of a hex encoded SHA-256 digest
pub const SHARED_KEY_HEX_LENGTH: usize = 64;
/// HSUB_PREFIX_LENGTH is how many hex characters (64 bits) of a shared key feed the hidden subject
pub const HSUB_PREFIX_LENGTH: usize = 16;

/// DhGroup holds the process-wide modulus and generator
pub struct DhGroup {
    prime: BigUint,
    generator: BigUint,
    // (p - 1) / 2, the Legendre symbol exponent for a safe prime
    legendre_exponent: BigUint,
}

impl DhGroup {
    fn load() -> Self {
        let prime = BigUint::parse_bytes(PRIME_HEX.concat().as_bytes(), 16)
            .unwrap_or_else(BigUint::zero);
        let legendre_exponent = (&prime - BigUint::one()) >> 1;
        Self {
            prime,
            generator: BigUint::from(GENERATOR),
            legendre_exponent,
        }
    }

    /// prime is the modulus p
    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    /// generator is g
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// in_range checks 2 < value < p - 1
    pub fn in_range(&self, value: &BigUint) -> bool {
        let two = BigUint::from(2u8);
        *value > two && *value < &self.prime - BigUint::one()
    }

    /// is_quadratic_residue checks value^((p-1)/2) mod p == 1
    pub fn is_quadratic_residue(&self, value: &BigUint) -> bool {
        value.modpow(&self.legendre_exponent, &self.prime).is_one()
    }
}

/// group returns the shared DH group
pub fn group() -> &'static DhGroup {
    static GROUP: OnceLock<DhGroup> = OnceLock::new();
    GROUP.get_or_init(DhGroup::load)
}

/// PeerKeyPolicy decides how strictly a counterparty's public value is checked.
///
/// `QuadraticResidue` adds the Legendre symbol test, which keeps a peer from confining
/// the shared secret to a small subgroup. Not every implementation publishes keys that
/// pass it (OpenSSL style generators with g = 5 produce non-residues half of the time),
/// so `RangeOnly` exists for compatibility. Every key accepted under `RangeOnly` is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKeyPolicy {
    #[default]
    QuadraticResidue,
    RangeOnly,
}

/// KeyPair is one side of a route's key material. The private exponent never leaves the
/// process except inside the encrypted key store.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: BigUint,
    pub public_key: BigUint,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// SharedKey is the hex encoded SHA-256 of a DH shared secret. Both ends hand this exact
/// string to the encryption engine as the passphrase.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey(Zeroizing<String>);

impl SharedKey {
    /// as_str returns the full 64 character key
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// hsub_prefix returns the first 64 bits (16 hex characters) used for hidden subjects
    pub fn hsub_prefix(&self) -> &str {
        &self.0[..HSUB_PREFIX_LENGTH]
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

/// random_exponent draws MODULUS_BITS of randomness from the OS
fn random_exponent() -> Result<BigUint, Error> {
    let mut bytes = Zeroizing::new(vec![0u8; MODULUS_BITS / 8]);
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// generate_keypair draws a fresh private exponent and computes g^x mod p.
///
/// Draws are repeated until the public value is a quadratic residue, so peers enforcing
/// the strict policy accept our keys.
pub fn generate_keypair() -> Result<KeyPair, Error> {
    let group = group();
    for _ in 0..KEYGEN_ATTEMPTS {
        let private_key = random_exponent()?;
        let public_key = group.generator.modpow(&private_key, &group.prime);
        if group.in_range(&public_key) && group.is_quadratic_residue(&public_key) {
            return Ok(KeyPair { private_key, public_key });
        }
    }
    Err(Error::EntropyUnavailable(format!(
        "no usable key after {} draws",
        KEYGEN_ATTEMPTS
    )))
}

/// validate_peer_public_key checks a counterparty public value against the policy
pub fn validate_peer_public_key(value: &BigUint, policy: PeerKeyPolicy) -> bool {
    let group = group();
    if !group.in_range(value) {
        return false;
    }
    match policy {
        PeerKeyPolicy::QuadraticResidue => group.is_quadratic_residue(value),
        PeerKeyPolicy::RangeOnly => {
            tracing::warn!("accepting peer public key without the quadratic residue check");
            true
        }
    }
}

/// derive_shared_secret computes peer_public^my_private mod p. No validation happens here,
/// callers decide whether the peer key has to be checked first.
pub fn derive_shared_secret(my_private: &BigUint, peer_public: &BigUint) -> BigUint {
    peer_public.modpow(my_private, &group().prime)
}

/// derive_symmetric_key hashes the decimal ASCII encoding of the secret (no sign, no
/// leading zeros) with SHA-256 and hex encodes the digest in lowercase
pub fn derive_symmetric_key(secret: &BigUint) -> SharedKey {
    let decimal = Zeroizing::new(secret.to_str_radix(10));
    let digest = Sha256::digest(decimal.as_bytes());
    SharedKey(Zeroizing::new(hex::encode(digest)))
}

impl KeyPair {
    /// generate is a shorthand for `generate_keypair`
    pub fn generate() -> Result<Self, Error> {
        generate_keypair()
    }

    /// shared_key derives the symmetric key shared with the owner of `peer_public`
    pub fn shared_key(&self, peer_public: &BigUint) -> SharedKey {
        derive_symmetric_key(&derive_shared_secret(&self.private_key, peer_public))
    }
}

/* ------------------------------------------------------------------------- */

// TESTS
