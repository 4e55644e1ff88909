//! Retrieval: scanning the board for postings addressed to us.
//!
//! A scan lists everything posted since the watermark, tries each posting's subject
//! against the hidden subject prefix of every route (first match wins, in store order),
//! decrypts the matches with the route's shared key and hands the plaintext to a sink.
//! Postings that fail to fetch or decrypt are noted in the report and skipped. The
//! watermark only moves once the whole listing has been processed, so an aborted scan is
//! simply repeated next time; sinks overwrite by message id, which makes that harmless.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::engine::Engine;
use crate::error::Error;
use crate::hsub;
use crate::messages::{decode_message, Posting};
use crate::router::KeyRouter;
use crate::store::write_atomic;

/// OUTPUT_NAME_LENGTH is how many hex characters of the message id hash name an output file
const OUTPUT_NAME_LENGTH: usize = 32;

/// NewsTime is a UTC instant in the form NEWNEWS expects: `YYMMDD` and `HHMMSS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsTime {
    pub date: String,
    pub time: String,
}

impl NewsTime {
    /// from_timestamp converts whole UNIX seconds (fractions are dropped)
    pub fn from_timestamp(timestamp: f64) -> Result<Self, Error> {
        let instant: DateTime<Utc> = DateTime::from_timestamp(timestamp.floor() as i64, 0)
            .ok_or_else(|| Error::Transport(format!("timestamp {} out of range", timestamp)))?;
        Ok(NewsTime {
            date: instant.format("%y%m%d").to_string(),
            time: instant.format("%H%M%S").to_string(),
        })
    }
}

/// window_start is where a scan starts listing: one second before the watermark, so
/// postings stamped in the watermark's own second are never lost
pub fn window_start(watermark: f64) -> f64 {
    (watermark.floor() - 1.0).max(0.0)
}

/// TransportError is how a transport reports a failed call
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The article expired or never existed
    #[error("no such article")]
    NotFound,
    /// Network trouble or a server error worth trying again later
    #[error("transient transport failure: {0}")]
    Transient(String),
}

/// Transport lists and fetches postings from the news server
pub trait Transport {
    /// list_new_ids returns the message ids posted to `group` since `since`
    fn list_new_ids(&mut self, group: &str, since: &NewsTime) -> Result<Vec<String>, TransportError>;
    fn fetch(&mut self, message_id: &str) -> Result<Posting, TransportError>;
}

/// Decrypted is a posting that matched one of our routes and decrypted cleanly.
///
/// - sender: the route's `to`, the peer who wrote it
/// - recipient: the route's `from`, us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub plaintext: Vec<u8>,
}

impl Decrypted {
    /// provenance is the header line stored with the plaintext
    pub fn provenance(&self) -> String {
        format!("Route: {}->{}", self.sender, self.recipient)
    }
}

/// MessageSink stores decrypted messages. Delivering the same message id twice must not
/// produce a second copy.
pub trait MessageSink {
    fn deliver(&mut self, message: &Decrypted) -> Result<(), Error>;
}

/// DirectorySink writes one file per message into a directory, named after a hash of
/// the message id
#[derive(Debug, Clone)]
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        DirectorySink { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// path_for gives the output file for a message id
    pub fn path_for(&self, message_id: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(message_id.as_bytes()));
        self.directory.join(format!("{}.txt", &digest[..OUTPUT_NAME_LENGTH]))
    }
}

impl MessageSink for DirectorySink {
    fn deliver(&mut self, message: &Decrypted) -> Result<(), Error> {
        std::fs::create_dir_all(&self.directory)?;
        let mut contents = format!("{}\nMessage-ID: {}\n\n", message.provenance(), message.message_id).into_bytes();
        contents.extend_from_slice(&message.plaintext);
        let path = self.path_for(&message.message_id);
        write_atomic(&path, &contents)?;
        tracing::debug!(path = %path.display(), "stored decrypted message");
        Ok(())
    }
}

/// ScanState is Idle between scans and Scanning during one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// FailureReason says why a listed posting was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    Transient(String),
    /// The subject matched a route but the body did not decrypt with its key
    BadSecret,
}

/// PostingFailure ties a skipped posting to its reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingFailure {
    pub message_id: String,
    pub reason: FailureReason,
}

/// ScanReport summarizes one scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub window_start: NewsTime,
    /// number of message ids the transport listed
    pub listed: usize,
    /// message ids that were decrypted and delivered
    pub delivered: Vec<String>,
    pub failures: Vec<PostingFailure>,
    /// the watermark after the scan
    pub watermark: f64,
}

/// Retriever runs scans against one transport, delivering into one sink
pub struct Retriever<T: Transport, K: MessageSink, C: Clock> {
    transport: T,
    sink: K,
    clock: C,
    group: String,
    state: ScanState,
}

impl<T: Transport, K: MessageSink, C: Clock> Retriever<T, K, C> {
    pub fn new(transport: T, sink: K, clock: C, group: impl Into<String>) -> Self {
        Retriever {
            transport,
            sink,
            clock,
            group: group.into(),
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// scan processes everything posted since the watermark and then advances the
    /// watermark to the time the scan started. Listing failures and sink failures abort
    /// the scan with the watermark unchanged.
    pub fn scan<E: Engine>(&mut self, router: &mut KeyRouter<'_>, engine: &E) -> Result<ScanReport, Error> {
        self.state = ScanState::Scanning;
        let result = self.run(router, engine);
        self.state = ScanState::Idle;
        result
    }

    fn run<E: Engine>(&mut self, router: &mut KeyRouter<'_>, engine: &E) -> Result<ScanReport, Error> {
        let started = self.clock.now();
        let since = NewsTime::from_timestamp(window_start(router.watermark()))?;
        let keys = router.route_keys();
        tracing::debug!(routes = keys.len(), date = %since.date, time = %since.time, "starting scan");

        let ids = self
            .transport
            .list_new_ids(&self.group, &since)
            .map_err(|e| Error::Transport(e.to_string()))?;
        let mut report = ScanReport {
            window_start: since,
            listed: ids.len(),
            delivered: Vec::new(),
            failures: Vec::new(),
            watermark: router.watermark(),
        };

        for message_id in ids {
            let posting = match self.transport.fetch(&message_id) {
                Ok(posting) => posting,
                Err(e) => {
                    tracing::debug!(message_id = %message_id, error = %e, "skipping posting");
                    let reason = match e {
                        TransportError::NotFound => FailureReason::NotFound,
                        TransportError::Transient(detail) => FailureReason::Transient(detail),
                    };
                    report.failures.push(PostingFailure { message_id, reason });
                    continue;
                }
            };
            let Some(route) = keys
                .iter()
                .find(|route| hsub::matches(route.key.hsub_prefix(), &posting.subject))
            else {
                continue;
            };
            tracing::info!(message_id = %message_id, from = %route.from, to = %route.to, "hidden subject matched");
            match decode_message(engine, &route.key, posting.body.as_bytes()) {
                Ok(plaintext) => {
                    self.sink.deliver(&Decrypted {
                        message_id: message_id.clone(),
                        sender: route.to.clone(),
                        recipient: route.from.clone(),
                        plaintext,
                    })?;
                    report.delivered.push(message_id);
                }
                Err(e) => {
                    tracing::warn!(message_id = %message_id, error = %e, "matched posting did not decrypt");
                    report.failures.push(PostingFailure { message_id, reason: FailureReason::BadSecret });
                }
            }
        }

        router.advance_watermark(started);
        report.watermark = router.watermark();
        tracing::info!(
            listed = report.listed,
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "scan finished"
        );
        Ok(report)
    }
}

/* ------------------------------------------------------------------------- */

// TESTS
