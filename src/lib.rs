//! # dhboard
//!
//! Hidden addressing and key management for talking over a public message board (a Usenet
//! group such as alt.anonymous.messages) without showing anyone reading the board who is
//! talking to whom.
//!
//! Every pair of correspondents shares a route: a Diffie-Hellman keypair on each side over a
//! fixed 8192 bit group, from which both sides derive the same symmetric key. Postings are
//! encrypted with that key and carry a hidden subject ("hsub"): a short token only holders
//! of the key can recognize. Everybody downloads everything; only the recipient finds
//! anything.
//!
//! ### Warnings and Disclaimers
//!
//! - This library has NOT been audited.
//! - Private exponents live in the encrypted key store and in process memory while a
//!   session is open. Shared keys and passphrases are wiped on drop, big integers are not.
//! - Hidden subjects hide the recipient, not the fact that you post. Anonymity of the
//!   sender is the job of the mail2news gateway chain in front of the board.
//! - The board engine shipped here (`AeadEngine`) is a convenience. Interoperating with
//!   OpenPGP users means plugging an OpenPGP engine in through `Engine` and `Signer`.
//!
//! ### Examples / API
//!
//! Alice sets up a key store and a route to Bob, then sends Bob her signed public key block
//! over any channel where a signature means something.
//!
//! ```rust
//! let store = KeyStore::new("keys.db", AeadEngine::new());
//! store.init(&passphrase, SystemClock.now())?;
//! let block = store.transact(&passphrase, |session| {
//!     let mut router = session.router();
//!     router.create_route("alice@example.org", "bob@example.org", placeholder_peer_key(), now)?;
//!     keyblock::export_signed(&router, &signer, "alice@example.org", "bob@example.org", &signing_passphrase)
//! })?;
//! ```
//!
//! When Bob's block arrives she imports it, which sets the peer key of her route.
//!
//! ```rust
//! store.transact(&passphrase, |session| {
//!     keyblock::import_signed(&mut session.router(), &signer, &bobs_block, "alice@example.org", false, now)
//! })?;
//! ```
//!
//! She can now write to Bob. The result is a complete posting for a mail2news gateway.
//!
//! ```rust
//! let key = session.router().shared_key("alice@example.org", "bob@example.org")?;
//! let posting = encode_message(session.engine(), &key, b"Hi Bob", Cipher::default(), Some(&config.envelope()))?;
//! ```
//!
//! Bob finds it by scanning the group with a `Retriever`, which decrypts every posting whose
//! hidden subject matches one of his routes and moves his watermark forward.
//!
//! ```rust
//! let mut retriever = Retriever::new(transport, DirectorySink::new(config.output_path()), SystemClock, &config.news.group);
//! let report = retriever.scan(&mut session.router(), &engine)?;
//! ```
//!
//! ### Under the Hood
//!
//! From time to time either side mutates its route (`handoff::write_mutation`): a fresh
//! keypair replaces the old one and the new public key travels to the peer encrypted under
//! the old shared key. Once the peer takes it in (`handoff::accept_mutation`) the old
//! private exponent is gone on both sides, so old traffic stays unreadable even if the key
//! store leaks later.

pub mod clock;
pub mod config;
pub mod dh;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod hsub;
pub mod keyblock;
pub mod messages;
pub mod retrieval;
pub mod route;
pub mod router;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use dh::{KeyPair, PeerKeyPolicy, SharedKey};
pub use engine::{AeadEngine, Cipher, Engine, Signer, Verified};
pub use error::Error;
pub use messages::{decode_message, encode_message, Envelope, Posting};
pub use retrieval::{DirectorySink, MessageSink, Retriever, ScanReport, Transport, TransportError};
pub use route::{placeholder_peer_key, Route};
pub use router::{KeyRouter, Mutation};
pub use store::{KeyStore, Passphrase, PassphrasePrompt, Session, WorkingStore};
