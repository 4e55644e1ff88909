use std::collections::HashMap;

use dhboard::hsub;
use dhboard::retrieval::NewsTime;
use dhboard::{
    encode_message, AeadEngine, Cipher, DirectorySink, Envelope, FixedClock, KeyPair, KeyStore, Passphrase,
    PeerKeyPolicy, Posting, Retriever, Transport, TransportError,
};

const ME: &str = "bob@example.org";
const PEER: &str = "alice@example.org";

/// Board hands out a fixed set of raw articles, remembering the last window it was asked for
struct Board {
    ids: Vec<String>,
    articles: HashMap<String, String>,
    asked_since: Vec<NewsTime>,
}

impl Transport for Board {
    fn list_new_ids(&mut self, _group: &str, since: &NewsTime) -> Result<Vec<String>, TransportError> {
        self.asked_since.push(since.clone());
        Ok(self.ids.clone())
    }

    fn fetch(&mut self, message_id: &str) -> Result<Posting, TransportError> {
        self.articles
            .get(message_id)
            .map(|raw| Posting::parse(raw))
            .ok_or(TransportError::NotFound)
    }
}

#[test]
fn one_posting_among_noise_is_found_once() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("messages");
    let engine = AeadEngine::new();
    let passphrase = Passphrase::new("correct horse");
    let store = KeyStore::new(dir.path().join("keys.db"), engine).with_policy(PeerKeyPolicy::QuadraticResidue);
    store.init(&passphrase, 1_000.0).unwrap();

    // Alice only needs her keypair; Bob's side lives in the store
    let alice = KeyPair::generate().unwrap();
    let bob_public = store
        .transact(&passphrase, |session| {
            let mut router = session.router();
            let route = router.create_route(ME, PEER, dhboard::placeholder_peer_key(), 1_000.0)?;
            router.set_peer_public_key(ME, PEER, alice.public_key.clone())?;
            Ok(route.keys.public_key)
        })
        .unwrap();

    let envelope = Envelope {
        gateways: vec!["mail2news@dizum.com".to_string()],
        newsgroup: "alt.anonymous.messages".to_string(),
    };
    let alice_key = alice.shared_key(&bob_public);
    let real = encode_message(&engine, &alice_key, b"the eagle has landed", Cipher::default(), Some(&envelope)).unwrap();

    let mut board = Board { ids: Vec::new(), articles: HashMap::new(), asked_since: Vec::new() };
    for i in 0..100u64 {
        let id = format!("<noise{}@board>", i);
        let subject = hsub::compute_token(&format!("{:016x}", i.wrapping_mul(0x9e37_79b9_7f4a_7c15))).unwrap();
        board.articles.insert(id.clone(), Posting::new(&subject, "noise\n").compose(&envelope));
        board.ids.push(id);
        if i == 41 {
            board.ids.push("<real@board>".to_string());
            board.articles.insert("<real@board>".to_string(), real.clone());
        }
    }

    let mut retriever = Retriever::new(board, DirectorySink::new(&output), FixedClock(3_000.0), "alt.anonymous.messages");
    let report = store
        .transact(&passphrase, |session| retriever.scan(&mut session.router(), &engine))
        .unwrap();
    assert_eq!(report.listed, 101);
    assert_eq!(report.delivered, vec!["<real@board>".to_string()]);
    assert!(report.failures.is_empty());
    assert_eq!(report.window_start, NewsTime::from_timestamp(999.0).unwrap());

    let stored = std::fs::read_to_string(retriever.sink().path_for("<real@board>")).unwrap();
    assert!(stored.starts_with("Route: alice@example.org->bob@example.org\n"));
    assert!(stored.ends_with("the eagle has landed"));

    // the watermark was persisted with the store
    let watermark = store.transact(&passphrase, |session| Ok(session.working().watermark())).unwrap();
    assert_eq!(watermark, 3_000.0);

    // scanning the same postings again rewrites the same file
    let report = store
        .transact(&passphrase, |session| retriever.scan(&mut session.router(), &engine))
        .unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(std::fs::read_dir(&output).unwrap().count(), 1);
    assert_eq!(retriever.transport_mut().asked_since.last(), Some(&NewsTime::from_timestamp(2_999.0).unwrap()));
}

#[test]
fn wrong_passphrase_never_scans() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::new(dir.path().join("keys.db"), AeadEngine::new());
    store.init(&Passphrase::new("right"), 0.0).unwrap();
    let result = store.transact(&Passphrase::new("wrong"), |_| Ok(()));
    assert!(matches!(result, Err(dhboard::Error::BadPassphrase)));
}
