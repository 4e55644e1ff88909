//! Postings on the board.
//!
//! A posting we send anonymously is an armored ciphertext behind a small header block: the
//! mail2news gateways to route through, a hidden subject, the newsgroup and
//! `X-No-Archive`. Postings we read back are parsed down to the subject and the body.

use crate::dh::SharedKey;
use crate::engine::{Cipher, Engine};
use crate::error::Error;
use crate::hsub;

/// Envelope carries the headers for anonymous postings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// mail2news gateways, joined into the To header
    pub gateways: Vec<String>,
    pub newsgroup: String,
}

/// Posting wraps up the two parts of an article we care about.
///
/// - subject: the raw Subject header, a hidden subject for postings meant for someone
/// - body: everything after the header block (for us, an armored ciphertext)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub subject: String,
    pub body: String,
}

impl Posting {
    pub fn new(subject: &str, body: &str) -> Posting {
        Posting {
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    /// parse splits a raw article into headers and body. Folded header lines are joined;
    /// text without a header block is all body.
    pub fn parse(raw: &str) -> Posting {
        let raw = raw.replace("\r\n", "\n");
        let Some((head, body)) = raw.split_once("\n\n") else {
            return Posting::new("", &raw);
        };
        let mut subject: Option<String> = None;
        let mut in_subject = false;
        for line in head.lines() {
            if line.starts_with([' ', '\t']) {
                if in_subject {
                    if let Some(current) = subject.as_mut() {
                        current.push(' ');
                        current.push_str(line.trim());
                    }
                }
                continue;
            }
            in_subject = false;
            let Some((name, value)) = line.split_once(':') else {
                // not a header block after all
                return Posting::new("", &raw);
            };
            if subject.is_none() && name.trim().eq_ignore_ascii_case("subject") {
                subject = Some(value.trim().to_string());
                in_subject = true;
            }
        }
        Posting {
            subject: subject.unwrap_or_default(),
            body: body.to_string(),
        }
    }

    /// compose renders the posting with the anonymous posting headers
    pub fn compose(&self, envelope: &Envelope) -> String {
        format!(
            "To: {}\nSubject: {}\nNewsgroups: {}\nX-No-Archive: Yes\n\n{}",
            envelope.gateways.join(","),
            self.subject,
            envelope.newsgroup,
            self.body
        )
    }
}

/// encode_message encrypts `plaintext` under a route's shared key. With an envelope the
/// result is a complete anonymous posting whose subject only the peer can recognize.
pub fn encode_message<E: Engine>(
    engine: &E,
    key: &SharedKey,
    plaintext: &[u8],
    cipher: Cipher,
    envelope: Option<&Envelope>,
) -> Result<String, Error> {
    let sealed = engine
        .encrypt(plaintext, key.as_str(), cipher)
        .map_err(|e| Error::Encryption(e.to_string()))?;
    let body = String::from_utf8(sealed)
        .map_err(|_| Error::Encryption("engine produced non-text output".to_string()))?;
    match envelope {
        Some(envelope) => {
            let subject = hsub::compute_token(key.hsub_prefix())?;
            Ok(Posting { subject, body }.compose(envelope))
        }
        None => Ok(body),
    }
}

/// decode_message decrypts a body with a route's shared key. Engine failures and empty
/// output both mean the key is wrong.
pub fn decode_message<E: Engine>(engine: &E, key: &SharedKey, body: &[u8]) -> Result<Vec<u8>, Error> {
    match engine.decrypt(body, key.as_str()) {
        Ok(plaintext) if !plaintext.is_empty() => Ok(plaintext),
        Ok(_) => Err(Error::BadSecret),
        Err(e) => {
            tracing::debug!(error = %e, "decryption with shared key failed");
            Err(Error::BadSecret)
        }
    }
}

/* ------------------------------------------------------------------------- */

// TESTS

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dh::derive_symmetric_key;
    use crate::engine::AeadEngine;
    use num_bigint::BigUint;

    fn envelope() -> Envelope {
        Envelope {
            gateways: vec!["mail2news@dizum.com".to_string(), "mail2news@m2n.mixmin.net".to_string()],
            newsgroup: "alt.anonymous.messages".to_string(),
        }
    }

    #[test]
    fn compose_then_parse() {
        let posting = Posting::new("0011223344556677aabbccddeeff00112233445566778899", "body text\n");
        let raw = posting.compose(&envelope());
        assert!(raw.starts_with("To: mail2news@dizum.com,mail2news@m2n.mixmin.net\n"));
        assert!(raw.contains("X-No-Archive: Yes\n\n"));
        assert_eq!(Posting::parse(&raw), posting);
    }

    #[test]
    fn parse_handles_case_folding_and_crlf() {
        let raw = "From: nobody\r\nSUBJECT: first part\r\n  second part\r\nPath: x\r\n\r\nhello\r\n";
        let posting = Posting::parse(raw);
        assert_eq!(posting.subject, "first part second part");
        assert_eq!(posting.body, "hello\n");
    }

    #[test]
    fn text_without_headers_is_body() {
        let posting = Posting::parse("just some text\n\nmore text");
        assert_eq!(posting.subject, "");
        assert_eq!(posting.body, "just some text\n\nmore text");
    }

    #[test]
    fn encoded_posting_is_recognized_and_decoded() {
        let engine = AeadEngine::new();
        let key = derive_symmetric_key(&BigUint::from(987654321u64));
        let raw = encode_message(&engine, &key, b"hello bob", Cipher::default(), Some(&envelope())).unwrap();
        let posting = Posting::parse(&raw);
        assert!(hsub::matches(key.hsub_prefix(), &posting.subject));
        assert_eq!(decode_message(&engine, &key, posting.body.as_bytes()).unwrap(), b"hello bob");
    }

    #[test]
    fn wrong_key_is_bad_secret() {
        let engine = AeadEngine::new();
        let key = derive_symmetric_key(&BigUint::from(1111u32));
        let other = derive_symmetric_key(&BigUint::from(2222u32));
        let body = encode_message(&engine, &key, b"hi", Cipher::default(), None).unwrap();
        assert!(matches!(decode_message(&engine, &other, body.as_bytes()), Err(Error::BadSecret)));
    }
}
