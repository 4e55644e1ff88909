//! Error taxonomy for the key store, router and retrieval scan.
//!
//! Fatal errors (`BadPassphrase`, `EntropyUnavailable`, `StoreMissing`) abort the
//! operation. `RouteNotFound` and `RouteExists` are reported to the caller, who decides
//! what to do next. Per-posting failures during a scan never surface here; they are
//! collected in the scan report instead.

use thiserror::Error;

/// Errors returned by the public operations of this crate
#[derive(Error, Debug)]
pub enum Error {
    /// The key store could not be decrypted, or decrypted to nothing
    #[error("bad passphrase for key store")]
    BadPassphrase,

    /// No key store exists at the configured path
    #[error("no key store at {0} (initialize it first)")]
    StoreMissing(String),

    /// No route for the requested pair
    #[error("no route for {from} -> {to}")]
    RouteNotFound {
        /// Sending identity
        from: String,
        /// Receiving identity
        to: String,
    },

    /// A route for the pair already exists
    #[error("route {from} -> {to} already exists")]
    RouteExists {
        /// Sending identity
        from: String,
        /// Receiving identity
        to: String,
    },

    /// A peer public key failed the range or quadratic residue check
    #[error("invalid peer public key for {from} -> {to}")]
    InvalidPeerKey {
        /// Sending identity
        from: String,
        /// Receiving identity
        to: String,
    },

    /// The OS randomness source failed
    #[error("secure randomness unavailable: {0}")]
    EntropyUnavailable(String),

    /// Ciphertext could not be decrypted with the derived shared key
    #[error("bad shared secret")]
    BadSecret,

    /// The signing engine rejected a signature
    #[error("signature not valid")]
    SignatureInvalid,

    /// The signing engine could not produce a signature
    #[error("signing failed: {0}")]
    Signing(String),

    /// A DH public key block could not be parsed
    #[error("malformed public key block: {0}")]
    MalformedKeyBlock(String),

    /// The transport failed in a way that prevents scanning
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine failed while encrypting
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Key store contents could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be read or parsed
    #[error("config error: {0}")]
    Config(String),

    /// I/O error (key store file, handoff file, message output)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// route_not_found builds a `RouteNotFound` for the pair
    pub(crate) fn route_not_found(from: &str, to: &str) -> Self {
        Error::RouteNotFound { from: from.to_string(), to: to.to_string() }
    }

    /// route_exists builds a `RouteExists` for the pair
    pub(crate) fn route_exists(from: &str, to: &str) -> Self {
        Error::RouteExists { from: from.to_string(), to: to.to_string() }
    }

    /// invalid_peer_key builds an `InvalidPeerKey` for the pair
    pub(crate) fn invalid_peer_key(from: &str, to: &str) -> Self {
        Error::InvalidPeerKey { from: from.to_string(), to: to.to_string() }
    }

    /// is_fatal reports whether the error must abort the whole operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::BadPassphrase | Error::EntropyUnavailable(_) | Error::StoreMissing(_)
        )
    }
}
