//! A route is one direction of a conversation: our identity, the peer's identity and the
//! DH key material between them.

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};

use crate::dh::{self, KeyPair, SharedKey};
use crate::error::Error;

/// placeholder_peer_key marks a route whose peer public key has not been learned yet. It is
/// out of range on purpose, so no secret can be derived until a real key is set.
pub fn placeholder_peer_key() -> BigUint {
    BigUint::one()
}

/// Route is keyed by the ordered pair (from, to), which is unique within a store.
///
/// - from: our identity on this route
/// - to: the counterparty
/// - keys: our keypair, replaced wholesale on mutation
/// - peer_public_key: the counterparty's public value (or the placeholder)
/// - created_at: UNIX timestamp of creation, kept across clones
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub from: String,
    pub to: String,
    pub keys: KeyPair,
    pub peer_public_key: BigUint,
    pub created_at: f64,
}

impl Route {
    /// is_pair checks whether this route is the (from, to) route
    pub fn is_pair(&self, from: &str, to: &str) -> bool {
        self.from == from && self.to == to
    }

    /// has_peer_key reports whether a usable peer key has been set
    pub fn has_peer_key(&self) -> bool {
        dh::group().in_range(&self.peer_public_key)
    }

    /// shared_key derives the symmetric key for this route. It fails while the peer key is
    /// still a placeholder or otherwise out of range.
    pub fn shared_key(&self) -> Result<SharedKey, Error> {
        if !self.has_peer_key() {
            return Err(Error::invalid_peer_key(&self.from, &self.to));
        }
        Ok(self.keys.shared_key(&self.peer_public_key))
    }
}

/// RouteRow is the persisted shape of a route: big integers as decimal text, the same
/// layout as the `routes` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RouteRow {
    from: String,
    to: String,
    private_key: String,
    public_key: String,
    peer_public_key: String,
    created_at: f64,
}

fn parse_decimal(field: &str, value: &str) -> Result<BigUint, Error> {
    value
        .parse::<BigUint>()
        .map_err(|e| Error::Serialization(format!("{}: {}", field, e)))
}

impl From<&Route> for RouteRow {
    fn from(route: &Route) -> Self {
        RouteRow {
            from: route.from.clone(),
            to: route.to.clone(),
            private_key: route.keys.private_key.to_str_radix(10),
            public_key: route.keys.public_key.to_str_radix(10),
            peer_public_key: route.peer_public_key.to_str_radix(10),
            created_at: route.created_at,
        }
    }
}

impl TryFrom<RouteRow> for Route {
    type Error = Error;

    fn try_from(row: RouteRow) -> Result<Self, Self::Error> {
        Ok(Route {
            keys: KeyPair {
                private_key: parse_decimal("private_key", &row.private_key)?,
                public_key: parse_decimal("public_key", &row.public_key)?,
            },
            peer_public_key: parse_decimal("peer_public_key", &row.peer_public_key)?,
            from: row.from,
            to: row.to,
            created_at: row.created_at,
        })
    }
}

/* ------------------------------------------------------------------------- */

// TESTS
