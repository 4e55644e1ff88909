//! The encrypted key store.
//!
//! On disk the store is a single engine-encrypted blob. Opening it with the passphrase
//! yields a `Session` holding a `WorkingStore`, an in-memory copy of both tables. Every
//! mutation happens on that copy. Closing the session dumps the whole working store,
//! encrypts it again and swaps it into place with a temp file + rename, so the file on disk
//! is always either the old blob or the new one and never plaintext.
//!
//! ```ignore
//! let store = KeyStore::new("keys.db", AeadEngine::new());
//! store.init(&passphrase, SystemClock.now())?;
//! store.transact(&passphrase, |session| {
//!     session.router().create_route("alice@example.org", "bob@example.org", placeholder_peer_key(), now)?;
//!     Ok(())
//! })?;
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::dh::PeerKeyPolicy;
use crate::engine::{Cipher, Engine};
use crate::error::Error;
use crate::route::{Route, RouteRow};
use crate::router::KeyRouter;

/// WATERMARK_ROW_ID is the single row of the retrieval_state table
const WATERMARK_ROW_ID: i64 = 1;
/// SECONDS_PER_DAY is used by watermark rollback
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Passphrase unlocks the key store. The buffer is wiped on drop.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Passphrase(Zeroizing::new(passphrase.into()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// confirm asks for a new passphrase twice and repeats until both entries match
    pub fn confirm<P: PassphrasePrompt + ?Sized>(prompt: &mut P, label: &str) -> Result<Self, Error> {
        loop {
            let first = Zeroizing::new(prompt.read_passphrase(label)?);
            let second = Zeroizing::new(prompt.read_passphrase("Retype: ")?);
            if first == second {
                return Ok(Passphrase::new(first.as_str()));
            }
            prompt.mismatch();
        }
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// PassphrasePrompt is how the store asks the user for a new passphrase
pub trait PassphrasePrompt {
    fn read_passphrase(&mut self, prompt: &str) -> std::io::Result<String>;

    /// mismatch is called when the two entries differ, before asking again
    fn mismatch(&mut self) {
        tracing::warn!("passphrases did not match");
    }
}

/* ------------------------------------------------------------------------- */

// Working store

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RetrievalStateRow {
    id: i64,
    last_watermark: f64,
}

/// Dump is the serialized form of the whole store, one array per table
#[derive(Debug, Serialize, Deserialize)]
struct Dump {
    routes: Vec<RouteRow>,
    retrieval_state: Vec<RetrievalStateRow>,
}

/// WorkingStore is the decrypted, in-memory copy of the tables. Routes keep their
/// insertion order, which is also the order retrieval tries them in.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingStore {
    routes: Vec<Route>,
    watermark: f64,
}

impl WorkingStore {
    /// new creates an empty store whose watermark starts at `watermark`
    pub fn new(watermark: f64) -> Self {
        WorkingStore { routes: Vec::new(), watermark }
    }

    /// load rebuilds a store from a dump. A dump with two routes for the same pair is
    /// rejected.
    pub fn load(dump: &[u8]) -> Result<Self, Error> {
        let dump: Dump = serde_json::from_slice(dump)?;
        let mut store = WorkingStore::new(0.0);
        for row in dump.retrieval_state {
            if row.id == WATERMARK_ROW_ID {
                store.watermark = row.last_watermark;
            }
        }
        for row in dump.routes {
            let route = Route::try_from(row)?;
            if store.find(&route.from, &route.to).is_some() {
                return Err(Error::Serialization(format!(
                    "duplicate route {} -> {}",
                    route.from, route.to
                )));
            }
            store.routes.push(route);
        }
        Ok(store)
    }

    /// dump serializes every table
    pub fn dump(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        let dump = Dump {
            routes: self.routes.iter().map(RouteRow::from).collect(),
            retrieval_state: vec![RetrievalStateRow {
                id: WATERMARK_ROW_ID,
                last_watermark: self.watermark,
            }],
        };
        Ok(Zeroizing::new(serde_json::to_vec(&dump)?))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn find(&self, from: &str, to: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.is_pair(from, to))
    }

    pub fn find_mut(&mut self, from: &str, to: &str) -> Option<&mut Route> {
        self.routes.iter_mut().find(|route| route.is_pair(from, to))
    }

    /// insert appends a route; the pair must not exist yet
    pub fn insert(&mut self, route: Route) -> Result<(), Error> {
        if self.find(&route.from, &route.to).is_some() {
            return Err(Error::route_exists(&route.from, &route.to));
        }
        self.routes.push(route);
        Ok(())
    }

    /// remove deletes the (from, to) route and hands it back
    pub fn remove(&mut self, from: &str, to: &str) -> Result<Route, Error> {
        let index = self
            .routes
            .iter()
            .position(|route| route.is_pair(from, to))
            .ok_or_else(|| Error::route_not_found(from, to))?;
        Ok(self.routes.remove(index))
    }

    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    /// advance_watermark moves the watermark forward; it never moves it back
    pub fn advance_watermark(&mut self, to: f64) {
        if to > self.watermark {
            self.watermark = to;
        }
    }

    /// set_watermark overwrites the watermark (used by init)
    pub fn set_watermark(&mut self, to: f64) {
        self.watermark = to;
    }

    /// rollback_watermark re-opens a scan window of `days` days before `now`
    pub fn rollback_watermark(&mut self, days: u32, now: f64) {
        self.watermark = now - f64::from(days) * SECONDS_PER_DAY;
    }
}

/* ------------------------------------------------------------------------- */

// Encrypted blob

/// KeyStore locates the encrypted blob and knows how to (re)encrypt it
pub struct KeyStore<E: Engine> {
    path: PathBuf,
    engine: E,
    cipher: Cipher,
    policy: PeerKeyPolicy,
}

impl<E: Engine> KeyStore<E> {
    pub fn new(path: impl Into<PathBuf>, engine: E) -> Self {
        KeyStore {
            path: path.into(),
            engine,
            cipher: Cipher::default(),
            policy: PeerKeyPolicy::default(),
        }
    }

    /// from_config takes the store path, cipher and peer key policy from the config
    pub fn from_config(config: &Config, engine: E) -> Self {
        KeyStore {
            path: config.store_path(),
            engine,
            cipher: config.cipher,
            policy: config.peer_key_policy,
        }
    }

    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_policy(mut self, policy: PeerKeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// init creates an empty store with the watermark at `now`. An existing store is
    /// opened instead (so the passphrase must match) and only its watermark is reset.
    pub fn init(&self, passphrase: &Passphrase, now: f64) -> Result<(), Error> {
        if self.exists() {
            tracing::info!(path = %self.path.display(), "key store exists, resetting watermark");
            return self.transact(passphrase, |session| {
                session.working_mut().set_watermark(now);
                Ok(())
            });
        }
        tracing::info!(path = %self.path.display(), "initializing key store");
        let session = Session {
            store: self,
            working: WorkingStore::new(now),
            passphrase: passphrase.clone(),
            closed: false,
        };
        session.close()
    }

    /// init_with_prompt is `init` with the passphrase read from `prompt`. A new store's
    /// passphrase has to be typed twice; an existing store only needs it once. The
    /// passphrase is returned for the rest of the run.
    pub fn init_with_prompt<P: PassphrasePrompt + ?Sized>(
        &self,
        prompt: &mut P,
        now: f64,
    ) -> Result<Passphrase, Error> {
        let passphrase = if self.exists() {
            Passphrase::new(prompt.read_passphrase("Passphrase to decrypt the key store: ")?)
        } else {
            Passphrase::confirm(prompt, "Passphrase to encrypt the key store: ")?
        };
        self.init(&passphrase, now)?;
        Ok(passphrase)
    }

    /// open decrypts the blob into a session. Decryption failure or empty output is
    /// `BadPassphrase`; the caller must not carry on with an empty store.
    pub fn open(&self, passphrase: &Passphrase) -> Result<Session<'_, E>, Error> {
        if !self.exists() {
            return Err(Error::StoreMissing(self.path.display().to_string()));
        }
        let blob = fs::read(&self.path)?;
        let dump = match self.engine.decrypt(&blob, passphrase.as_str()) {
            Ok(dump) if !dump.is_empty() => Zeroizing::new(dump),
            Ok(_) => return Err(Error::BadPassphrase),
            Err(e) => {
                tracing::debug!(error = %e, "key store decryption failed");
                return Err(Error::BadPassphrase);
            }
        };
        let working = WorkingStore::load(&dump)?;
        tracing::debug!(routes = working.routes.len(), "key store opened");
        Ok(Session {
            store: self,
            working,
            passphrase: passphrase.clone(),
            closed: false,
        })
    }

    /// transact opens a session, runs `operation` and closes the session again whether or
    /// not the operation succeeded
    pub fn transact<T, F>(&self, passphrase: &Passphrase, operation: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Session<'_, E>) -> Result<T, Error>,
    {
        let mut session = self.open(passphrase)?;
        let result = operation(&mut session);
        let closed = session.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                tracing::error!(error = %close_error, "failed to re-encrypt key store after a failed operation");
                Err(e)
            }
        }
    }

    fn write_blob(&self, blob: &[u8]) -> Result<(), Error> {
        write_atomic(&self.path, blob)
    }
}

/// write_atomic replaces `path` with `data`: temp file in the same directory, fsync, rename.
/// Readers see either the old contents or the new ones.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), Error> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp = NamedTempFile::new_in(&directory)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Session is an open key store. It owns the working store and the passphrase for the
/// duration of one operation; dropping it without `close` still re-encrypts.
pub struct Session<'a, E: Engine> {
    store: &'a KeyStore<E>,
    working: WorkingStore,
    passphrase: Passphrase,
    closed: bool,
}

impl<'a, E: Engine> Session<'a, E> {
    pub fn working(&self) -> &WorkingStore {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut WorkingStore {
        &mut self.working
    }

    /// router gives the key router over this session, with the store's peer key policy
    pub fn router(&mut self) -> KeyRouter<'_> {
        KeyRouter::new(&mut self.working, self.store.policy)
    }

    pub fn engine(&self) -> &E {
        &self.store.engine
    }

    pub fn cipher(&self) -> Cipher {
        self.store.cipher
    }

    /// change_passphrase asks for a new passphrase (twice); it is used from the next close
    pub fn change_passphrase<P: PassphrasePrompt + ?Sized>(&mut self, prompt: &mut P) -> Result<(), Error> {
        self.passphrase = Passphrase::confirm(prompt, "Passphrase to encrypt the key store: ")?;
        tracing::info!("key store passphrase changed");
        Ok(())
    }

    /// close re-encrypts the whole working store and replaces the blob
    pub fn close(mut self) -> Result<(), Error> {
        self.closed = true;
        self.persist()
    }

    fn persist(&self) -> Result<(), Error> {
        let dump = self.working.dump()?;
        let blob = self
            .store
            .engine
            .encrypt(&dump, self.passphrase.as_str(), self.store.cipher)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        self.store.write_blob(&blob)?;
        tracing::debug!(routes = self.working.routes.len(), "key store closed");
        Ok(())
    }
}

impl<E: Engine> Drop for Session<'_, E> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.persist() {
                tracing::error!(error = %e, "failed to re-encrypt key store on drop");
            }
        }
    }
}

/* ------------------------------------------------------------------------- */

// TESTS

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dh::KeyPair;
    use crate::engine::AeadEngine;
    use num_bigint::BigUint;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<&'static str>, usize);

    impl PassphrasePrompt for Scripted {
        fn read_passphrase(&mut self, _prompt: &str) -> std::io::Result<String> {
            self.0
                .pop_front()
                .map(str::to_string)
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no more input"))
        }

        fn mismatch(&mut self) {
            self.1 += 1;
        }
    }

    fn route(from: &str, to: &str, seed: u32) -> Route {
        Route {
            from: from.to_string(),
            to: to.to_string(),
            keys: KeyPair {
                private_key: BigUint::from(seed),
                public_key: BigUint::from(seed + 1),
            },
            peer_public_key: BigUint::from(seed + 2),
            created_at: f64::from(seed),
        }
    }

    fn sample_store() -> WorkingStore {
        let mut store = WorkingStore::new(1_700_000_000.0);
        store.insert(route("alice", "bob", 10)).unwrap();
        store.insert(route("alice", "carol", 20)).unwrap();
        store
    }

    #[test]
    fn dump_and_load() {
        let store = sample_store();
        let dump = store.dump().unwrap();
        let text = std::str::from_utf8(&dump).unwrap();
        assert!(text.contains("\"retrieval_state\""));
        assert!(text.contains("\"private_key\":\"10\""));
        assert_eq!(WorkingStore::load(&dump).unwrap(), store);
    }

    #[test]
    fn duplicate_pairs_are_refused() {
        let mut store = sample_store();
        assert!(matches!(store.insert(route("alice", "bob", 30)), Err(Error::RouteExists { .. })));
        // same identities, other direction, is a different route
        store.insert(route("bob", "alice", 30)).unwrap();
        assert_eq!(store.routes().len(), 3);
    }

    #[test]
    fn duplicate_rows_in_dump_are_rejected() {
        let dump = br#"{"routes":[
            {"from":"a","to":"b","private_key":"1","public_key":"2","peer_public_key":"3","created_at":0.0},
            {"from":"a","to":"b","private_key":"4","public_key":"5","peer_public_key":"6","created_at":0.0}
        ],"retrieval_state":[]}"#;
        assert!(matches!(WorkingStore::load(dump), Err(Error::Serialization(_))));
    }

    #[test]
    fn watermark_moves_forward_unless_rolled_back() {
        let mut store = WorkingStore::new(100.0);
        store.advance_watermark(50.0);
        assert_eq!(store.watermark(), 100.0);
        store.advance_watermark(200.0);
        assert_eq!(store.watermark(), 200.0);
        store.rollback_watermark(2, 1_000_000.0);
        assert_eq!(store.watermark(), 1_000_000.0 - 2.0 * 86_400.0);
    }

    #[test]
    fn remove_reports_missing_routes() {
        let mut store = sample_store();
        assert_eq!(store.remove("alice", "bob").unwrap().to, "bob");
        assert!(matches!(store.remove("alice", "bob"), Err(Error::RouteNotFound { .. })));
    }

    #[test]
    fn open_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
        let passphrase = Passphrase::new("correct horse");
        keystore.init(&passphrase, 1_700_000_000.0).unwrap();

        keystore
            .transact(&passphrase, |session| {
                for route in sample_store().routes() {
                    session.working_mut().insert(route.clone())?;
                }
                Ok(())
            })
            .unwrap();

        let on_disk = fs::read_to_string(keystore.path()).unwrap();
        assert!(!on_disk.contains("alice"));

        // open + close with no mutation keeps the same rows
        let before = keystore.open(&passphrase).unwrap().working().clone();
        keystore.open(&passphrase).unwrap().close().unwrap();
        let after = keystore.open(&passphrase).unwrap().working().clone();
        assert_eq!(before, after);
        assert_eq!(after, sample_store());
    }

    #[test]
    fn bad_passphrase_and_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
        assert!(matches!(
            keystore.open(&Passphrase::new("x")),
            Err(Error::StoreMissing(_))
        ));
        keystore.init(&Passphrase::new("right"), 0.0).unwrap();
        let err = keystore.open(&Passphrase::new("wrong")).err().unwrap();
        assert!(matches!(err, Error::BadPassphrase));
        assert!(err.is_fatal());
    }

    #[test]
    fn init_on_existing_store_keeps_routes() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
        let passphrase = Passphrase::new("pw");
        keystore.init(&passphrase, 10.0).unwrap();
        keystore
            .transact(&passphrase, |session| session.working_mut().insert(route("a", "b", 1)))
            .unwrap();
        keystore.init(&passphrase, 20.0).unwrap();
        let session = keystore.open(&passphrase).unwrap();
        assert_eq!(session.working().routes().len(), 1);
        assert_eq!(session.working().watermark(), 20.0);
    }

    #[test]
    fn transact_closes_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
        let passphrase = Passphrase::new("pw");
        keystore.init(&passphrase, 0.0).unwrap();
        let result: Result<(), Error> = keystore.transact(&passphrase, |session| {
            session.working_mut().insert(route("a", "b", 1))?;
            session.working_mut().insert(route("a", "b", 2))
        });
        assert!(matches!(result, Err(Error::RouteExists { .. })));
        // the completed insert was persisted, the refused one was not
        let session = keystore.open(&passphrase).unwrap();
        assert_eq!(session.working().routes().len(), 1);
        assert_eq!(session.working().routes()[0].keys.private_key, BigUint::from(1u32));
    }

    #[test]
    fn drop_without_close_still_persists() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
        let passphrase = Passphrase::new("pw");
        keystore.init(&passphrase, 0.0).unwrap();
        {
            let mut session = keystore.open(&passphrase).unwrap();
            session.working_mut().insert(route("a", "b", 1)).unwrap();
        }
        assert_eq!(keystore.open(&passphrase).unwrap().working().routes().len(), 1);
    }

    #[test]
    fn change_passphrase_reprompts_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
        let old = Passphrase::new("old");
        keystore.init(&old, 0.0).unwrap();
        let mut prompt = Scripted(VecDeque::from(vec!["new", "typo", "new", "new"]), 0);
        let mut session = keystore.open(&old).unwrap();
        session.change_passphrase(&mut prompt).unwrap();
        session.close().unwrap();
        assert_eq!(prompt.1, 1);
        assert!(matches!(keystore.open(&old), Err(Error::BadPassphrase)));
        assert!(keystore.open(&Passphrase::new("new")).is_ok());
    }

    #[test]
    fn init_with_prompt_confirms_new_passphrases_only() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
        let mut prompt = Scripted(VecDeque::from(vec!["first", "frist", "first", "first"]), 0);
        let passphrase = keystore.init_with_prompt(&mut prompt, 5.0).unwrap();
        assert_eq!(passphrase.as_str(), "first");
        assert_eq!(prompt.1, 1);
        assert!(prompt.0.is_empty());

        // an existing store asks once and checks it
        let mut prompt = Scripted(VecDeque::from(vec!["first"]), 0);
        keystore.init_with_prompt(&mut prompt, 9.0).unwrap();
        assert_eq!(keystore.open(&passphrase).unwrap().working().watermark(), 9.0);
        let mut prompt = Scripted(VecDeque::from(vec!["wrong"]), 0);
        assert!(matches!(keystore.init_with_prompt(&mut prompt, 9.0), Err(Error::BadPassphrase)));
    }

    #[test]
    fn transact_reports_the_operation_error_when_close_also_fails() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        fs::create_dir(&home).unwrap();
        let keystore = KeyStore::new(home.join("keys.db"), AeadEngine::new());
        let passphrase = Passphrase::new("pw");
        keystore.init(&passphrase, 0.0).unwrap();
        let result: Result<(), Error> = keystore.transact(&passphrase, |_| {
            // pull the directory out from under the session so close cannot write
            fs::remove_dir_all(&home)?;
            Err(Error::route_not_found("a", "b"))
        });
        assert!(matches!(result, Err(Error::RouteNotFound { .. })));
    }

    #[test]
    fn confirm_gives_up_when_input_ends() {
        let mut prompt = Scripted(VecDeque::from(vec!["a", "b"]), 0);
        assert!(matches!(Passphrase::confirm(&mut prompt, "New: "), Err(Error::Io(_))));
    }
}
