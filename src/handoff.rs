//! Key handoff: publishing a mutated public key to the peer, and taking one in.
//!
//! The handoff is our signed key block for the new keypair, encrypted under the shared key
//! we are about to retire. Only the peer can read it, and the signature tells them it came
//! from us. When it is wrapped as an anonymous posting the hidden subject is computed from
//! the old key too, so the peer's regular scan picks it up.

use std::path::Path;

use num_bigint::BigUint;

use crate::engine::{Cipher, Engine, Signer};
use crate::error::Error;
use crate::keyblock;
use crate::messages::{decode_message, encode_message, Envelope, Posting};
use crate::router::{KeyRouter, Mutation};
use crate::store::write_atomic;

/// HandoffRequest says which route to mutate and where the handoff goes
#[derive(Debug, Clone)]
pub struct HandoffRequest<'a> {
    pub from: &'a str,
    pub to: &'a str,
    /// unlocks the `from` identity's signing key
    pub signing_passphrase: &'a str,
    pub cipher: Cipher,
    /// wrap the handoff as an anonymous posting
    pub envelope: Option<&'a Envelope>,
    pub path: &'a Path,
}

/// write_mutation mutates the route and writes the handoff file. The new keypair is only
/// committed once the file is on disk; any earlier failure leaves the route untouched.
pub fn write_mutation<E: Engine, S: Signer>(
    router: &mut KeyRouter<'_>,
    engine: &E,
    signer: &S,
    request: &HandoffRequest<'_>,
) -> Result<Mutation, Error> {
    let pending = router.prepare_mutation(request.from, request.to)?;
    let signed = keyblock::sign_key_block(
        signer,
        pending.new_public_key(),
        request.from,
        request.signing_passphrase,
    )?;
    let handoff = encode_message(
        engine,
        pending.old_key(),
        signed.as_bytes(),
        request.cipher,
        request.envelope,
    )?;
    write_atomic(request.path, handoff.as_bytes())?;
    tracing::info!(path = %request.path.display(), "wrote key handoff");
    router.commit_mutation(pending)
}

/// accept_mutation reads a handoff from `peer` and installs the new key as the peer key of
/// our (me, peer) route. The handoff must decrypt under the current shared key and carry
/// the peer's own signature.
pub fn accept_mutation<E: Engine, S: Signer>(
    router: &mut KeyRouter<'_>,
    engine: &E,
    signer: &S,
    handoff: &str,
    me: &str,
    peer: &str,
) -> Result<BigUint, Error> {
    let key = router.shared_key(me, peer)?;
    let posting = Posting::parse(handoff);
    let plaintext = decode_message(engine, &key, posting.body.as_bytes())?;
    let signed = String::from_utf8(plaintext)
        .map_err(|_| Error::MalformedKeyBlock("handoff is not text".to_string()))?;
    let imported = keyblock::verify_signed(signer, &signed)?;
    if imported.peer != peer.to_lowercase() {
        tracing::warn!(expected = %peer, signer = %imported.peer, "handoff signed by someone else");
        return Err(Error::SignatureInvalid);
    }
    router.set_peer_public_key(me, peer, imported.public_key.clone())?;
    Ok(imported.public_key)
}

/* ------------------------------------------------------------------------- */

// TESTS
