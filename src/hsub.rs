//! Hidden subjects ("hsub").
//!
//! A token is `hex(iv || SHA-256(iv || secret_prefix))` cut to 48 hex characters. The iv is
//! random per message and travels in the clear as the first 16 hex characters, so the
//! recipient only needs the secret prefix to recognize a posting. Without the prefix a
//! token is indistinguishable from random hex.

use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::Error;

/// IV_LENGTH is 8 bytes
pub const IV_LENGTH: usize = 8;
/// TOKEN_HEX_LENGTH is the length of tokens we emit (24 bytes)
pub const TOKEN_HEX_LENGTH: usize = 48;
/// MIN_TOKEN_HEX_LENGTH is the shortest token accepted: the iv plus 2 bytes of digest
const MIN_TOKEN_HEX_LENGTH: usize = 20;
/// MAX_TOKEN_HEX_LENGTH is the iv plus a full SHA-256 digest
const MAX_TOKEN_HEX_LENGTH: usize = 2 * (IV_LENGTH + 32);

fn token_bytes(secret_prefix: &str, iv: &[u8], byte_length: usize) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(iv);
    hasher.update(secret_prefix.as_bytes());
    let mut raw = iv.to_vec();
    raw.extend_from_slice(&hasher.finalize());
    raw.truncate(byte_length);
    raw
}

/// compute_token builds a fresh hidden subject for `secret_prefix`
pub fn compute_token(secret_prefix: &str) -> Result<String, Error> {
    let mut iv = [0u8; IV_LENGTH];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;
    Ok(hex::encode(token_bytes(secret_prefix, &iv, TOKEN_HEX_LENGTH / 2)))
}

/// matches checks an observed subject field against `secret_prefix`. Anything that does
/// not parse as a token is simply not a match.
pub fn matches(secret_prefix: &str, observed: &str) -> bool {
    let observed = observed.trim();
    let length = observed.len();
    if length % 2 != 0 || !(MIN_TOKEN_HEX_LENGTH..=MAX_TOKEN_HEX_LENGTH).contains(&length) {
        return false;
    }
    let Ok(raw) = hex::decode(observed) else {
        return false;
    };
    let expected = token_bytes(secret_prefix, &raw[..IV_LENGTH], raw.len());
    bool::from(expected.ct_eq(&raw))
}

/* ------------------------------------------------------------------------- */

// TESTS

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PREFIX: &str = "0123456789abcdef";

    #[test]
    fn known_token() {
        let iv = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let token = hex::encode(token_bytes(PREFIX, &iv, TOKEN_HEX_LENGTH / 2));
        assert_eq!(token, "0001020304050607a6d85311ae29c78aafc1339971c73de2");
        assert!(matches(PREFIX, &token));
    }

    #[test]
    fn nonce_varies_between_tokens() {
        let first = compute_token(PREFIX).unwrap();
        let second = compute_token(PREFIX).unwrap();
        assert_eq!(first.len(), TOKEN_HEX_LENGTH);
        assert_ne!(first, second);
        assert!(matches(PREFIX, &first));
        assert!(matches(PREFIX, &second));
    }

    #[test]
    fn other_lengths_verify() {
        let iv = [9u8; IV_LENGTH];
        let full = hex::encode(token_bytes(PREFIX, &iv, MAX_TOKEN_HEX_LENGTH / 2));
        assert!(matches(PREFIX, &full));
        assert!(matches(PREFIX, &full[..MIN_TOKEN_HEX_LENGTH]));
        assert!(!matches(PREFIX, &full[..MIN_TOKEN_HEX_LENGTH - 2]));
    }

    #[test]
    fn malformed_subjects_do_not_match() {
        assert!(!matches(PREFIX, ""));
        assert!(!matches(PREFIX, "Re: lunch on friday?"));
        assert!(!matches(PREFIX, "zz01020304050607a6d85311ae29c78aafc1339971c73de2"));
        assert!(!matches(PREFIX, "0001020304050607a6d85311ae29c78aafc1339971c73de"));
        assert!(!matches(PREFIX, &"ab".repeat(41)));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let token = compute_token(PREFIX).unwrap();
        assert!(matches(PREFIX, &format!(" {}\r\n", token)));
    }

    proptest! {
        #[test]
        fn token_verifies_only_against_its_prefix(
            prefix in "[0-9a-f]{16}",
            other in "[0-9a-f]{16}",
        ) {
            let token = compute_token(&prefix).unwrap();
            prop_assert!(matches(&prefix, &token));
            if prefix != other {
                prop_assert!(!matches(&other, &token));
            }
        }

        #[test]
        fn arbitrary_subjects_never_panic(subject in ".{0,100}") {
            let _ = matches(PREFIX, &subject);
        }
    }
}
