//! The key router manages routes inside an open key store: creating them, learning the
//! peer's key, cloning and retargeting, and mutating our key material for forward secrecy.
//!
//! Mutation works like this. Alice mutates her alice -> bob route: she keeps the old
//! shared key around, swaps in a fresh keypair and publishes the new public key encrypted
//! under the old shared key. Once Bob decrypts it and sets it as his peer key, neither side
//! holds the old private exponent any more, so recorded traffic under the old key stays
//! unreadable even if today's key material leaks.

use num_bigint::BigUint;

use crate::dh::{self, KeyPair, PeerKeyPolicy, SharedKey};
use crate::error::Error;
use crate::route::Route;
use crate::store::WorkingStore;

/// Mutation is what the caller needs after a key mutation: the old shared key (to wrap the
/// handoff) and the new public key (the handoff content)
#[derive(Debug, Clone)]
pub struct Mutation {
    pub old_key: SharedKey,
    pub new_public_key: BigUint,
}

/// PendingMutation is a prepared but not yet applied mutation. Nothing in the store
/// changes until it is committed, so a failed handoff leaves the old keys in place.
#[derive(Debug)]
pub struct PendingMutation {
    from: String,
    to: String,
    old_key: SharedKey,
    new_keys: KeyPair,
}

impl PendingMutation {
    pub fn old_key(&self) -> &SharedKey {
        &self.old_key
    }

    pub fn new_public_key(&self) -> &BigUint {
        &self.new_keys.public_key
    }
}

/// RouteKey pairs a route's identities with its derived shared key, for retrieval
#[derive(Debug, Clone)]
pub struct RouteKey {
    pub from: String,
    pub to: String,
    pub key: SharedKey,
}

/// KeyRouter operates on the working store of an open session
pub struct KeyRouter<'a> {
    store: &'a mut WorkingStore,
    policy: PeerKeyPolicy,
}

impl<'a> KeyRouter<'a> {
    pub fn new(store: &'a mut WorkingStore, policy: PeerKeyPolicy) -> Self {
        KeyRouter { store, policy }
    }

    pub fn policy(&self) -> PeerKeyPolicy {
        self.policy
    }

    /// create_route generates a fresh keypair for (from, to). The peer key starts as the
    /// caller's placeholder until the real one is learned.
    pub fn create_route(
        &mut self,
        from: &str,
        to: &str,
        placeholder_peer: BigUint,
        now: f64,
    ) -> Result<Route, Error> {
        if self.store.find(from, to).is_some() {
            return Err(Error::route_exists(from, to));
        }
        let route = Route {
            from: from.to_string(),
            to: to.to_string(),
            keys: dh::generate_keypair()?,
            peer_public_key: placeholder_peer,
            created_at: now,
        };
        self.store.insert(route.clone())?;
        tracing::info!(from, to, total = self.store.routes().len(), "created route");
        Ok(route)
    }

    pub fn lookup_route(&self, from: &str, to: &str) -> Result<&Route, Error> {
        self.store
            .find(from, to)
            .ok_or_else(|| Error::route_not_found(from, to))
    }

    /// list_routes returns every (from, to) pair in store order
    pub fn list_routes(&self) -> Vec<(String, String)> {
        self.store
            .routes()
            .iter()
            .map(|route| (route.from.clone(), route.to.clone()))
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.store.routes().len()
    }

    /// set_peer_public_key replaces the peer key after checking it against the policy. A
    /// missing route is reported, never created.
    pub fn set_peer_public_key(&mut self, from: &str, to: &str, value: BigUint) -> Result<(), Error> {
        if self.store.find(from, to).is_none() {
            return Err(Error::route_not_found(from, to));
        }
        if !dh::validate_peer_public_key(&value, self.policy) {
            return Err(Error::invalid_peer_key(from, to));
        }
        if let Some(route) = self.store.find_mut(from, to) {
            route.peer_public_key = value;
        }
        tracing::info!(from, to, "updated peer public key");
        Ok(())
    }

    /// clone_route copies all key material (and the creation time) to a new pair
    pub fn clone_route(&mut self, from: &str, to: &str, new_from: &str, new_to: &str) -> Result<(), Error> {
        let mut copy = self.lookup_route(from, to)?.clone();
        copy.from = new_from.to_string();
        copy.to = new_to.to_string();
        self.store.insert(copy)?;
        tracing::info!(from, to, new_from, new_to, "cloned route");
        Ok(())
    }

    /// change_to points the (from, old_to) route at a new recipient
    pub fn change_to(&mut self, from: &str, old_to: &str, new_to: &str) -> Result<(), Error> {
        self.retarget(from, old_to, from, new_to)
    }

    /// change_from moves the (old_from, to) route to a new sender identity
    pub fn change_from(&mut self, old_from: &str, new_from: &str, to: &str) -> Result<(), Error> {
        self.retarget(old_from, to, new_from, to)
    }

    fn retarget(&mut self, from: &str, to: &str, new_from: &str, new_to: &str) -> Result<(), Error> {
        self.lookup_route(from, to)?;
        if (from, to) != (new_from, new_to) && self.store.find(new_from, new_to).is_some() {
            return Err(Error::route_exists(new_from, new_to));
        }
        if let Some(route) = self.store.find_mut(from, to) {
            route.from = new_from.to_string();
            route.to = new_to.to_string();
        }
        tracing::info!(from, to, new_from, new_to, "retargeted route");
        Ok(())
    }

    pub fn delete_route(&mut self, from: &str, to: &str) -> Result<Route, Error> {
        let route = self.store.remove(from, to)?;
        tracing::info!(from, to, "deleted route");
        Ok(route)
    }

    /// shared_key derives the route's symmetric key. Fails with `InvalidPeerKey` while the
    /// peer key is a placeholder.
    pub fn shared_key(&self, from: &str, to: &str) -> Result<SharedKey, Error> {
        self.lookup_route(from, to)?.shared_key()
    }

    /// route_keys derives a key for every route with a usable peer key, in store order.
    /// Routes still waiting for their peer key are skipped.
    pub fn route_keys(&self) -> Vec<RouteKey> {
        self.store
            .routes()
            .iter()
            .filter_map(|route| match route.shared_key() {
                Ok(key) => Some(RouteKey {
                    from: route.from.clone(),
                    to: route.to.clone(),
                    key,
                }),
                Err(_) => {
                    tracing::warn!(from = %route.from, to = %route.to, "skipping route without a valid peer key");
                    None
                }
            })
            .collect()
    }

    /// prepare_mutation derives the current shared key and draws a new keypair, without
    /// touching the store
    pub fn prepare_mutation(&self, from: &str, to: &str) -> Result<PendingMutation, Error> {
        let old_key = self.shared_key(from, to)?;
        Ok(PendingMutation {
            from: from.to_string(),
            to: to.to_string(),
            old_key,
            new_keys: dh::generate_keypair()?,
        })
    }

    /// commit_mutation swaps the prepared keypair in. The peer key is left alone.
    pub fn commit_mutation(&mut self, pending: PendingMutation) -> Result<Mutation, Error> {
        let PendingMutation { from, to, old_key, new_keys } = pending;
        let route = self
            .store
            .find_mut(&from, &to)
            .ok_or_else(|| Error::route_not_found(&from, &to))?;
        let new_public_key = new_keys.public_key.clone();
        route.keys = new_keys;
        tracing::info!(from = %from, to = %to, "mutated route key material");
        Ok(Mutation { old_key, new_public_key })
    }

    /// mutate_route replaces our keypair on (from, to) in one step
    pub fn mutate_route(&mut self, from: &str, to: &str) -> Result<Mutation, Error> {
        let pending = self.prepare_mutation(from, to)?;
        self.commit_mutation(pending)
    }

    pub fn watermark(&self) -> f64 {
        self.store.watermark()
    }

    pub fn advance_watermark(&mut self, to: f64) {
        self.store.advance_watermark(to);
        tracing::info!(watermark = to, "advanced retrieval watermark");
    }

    pub fn rollback_watermark(&mut self, days: u32, now: f64) {
        self.store.rollback_watermark(days, now);
        tracing::info!(days, watermark = self.store.watermark(), "rolled back retrieval watermark");
    }
}

/* ------------------------------------------------------------------------- */

// TESTS
