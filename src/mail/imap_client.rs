use base64::{Engine as _, engine::general_purpose};
use log::debug;
use native_tls::{TlsConnector, TlsStream};
use std::net::TcpStream;

use crate::domain::message::{Credential, Header, MessageDetail, MessageId};
use crate::error::FetchError;
use crate::mail::decoders::{decode_header_value, html_to_text, normalize_snippet};
use crate::mail::provider::{MessageFetcher, MessageLister};

const SNIPPET_CHARS: usize = 200;

type Session = imap::Session<TlsStream<TcpStream>>;

/// Build canonical auth string as bytes.
fn build_xoauth2_bytes(user: &str, access_token: &str) -> Vec<u8> {
    format!("user={user}\x01auth=Bearer {access_token}\x01\x01").into_bytes()
}

struct OAuth2Authenticator {
    response: Vec<u8>,
}

impl imap::Authenticator for OAuth2Authenticator {
    type Response = Vec<u8>;
    fn process(&self, _challenge: &[u8]) -> Self::Response {
        self.response.clone()
    }
}

fn transient(e: impl std::fmt::Display) -> FetchError {
    FetchError::Transient(e.to_string())
}

/// IMAP adapter. Every call opens its own session, so concurrent fetches
/// share nothing but the server address.
pub struct ImapClient {
    pub server: String,
    pub port: u16,
}

impl ImapClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: 993,
        }
    }

    fn connect_and_auth(&self, credential: &Credential) -> Result<Session, FetchError> {
        let tls = TlsConnector::builder().build().map_err(transient)?;
        let mut client = imap::connect((self.server.as_str(), self.port), self.server.as_str(), &tls)
            .map_err(transient)?;

        let raw_payload = build_xoauth2_bytes(&credential.user, &credential.access_token);

        // Try RAW first
        let auth_raw = OAuth2Authenticator {
            response: raw_payload.clone(),
        };
        match client.authenticate("XOAUTH2", &auth_raw) {
            Ok(session) => return Ok(session),
            Err((e, returned_client)) => {
                debug!("XOAUTH2 raw attempt failed: {e}");
                client = returned_client;
            }
        }

        // Fallback BASE64
        let auth_b64 = OAuth2Authenticator {
            response: general_purpose::STANDARD.encode(&raw_payload).into_bytes(),
        };
        match client.authenticate("XOAUTH2", &auth_b64) {
            Ok(session) => Ok(session),
            Err((e, _)) => Err(FetchError::Unauthorized(format!(
                "XOAUTH2 failed (raw+base64): {e}"
            ))),
        }
    }

    fn open_inbox(&self, credential: &Credential) -> Result<Session, FetchError> {
        let mut session = self.connect_and_auth(credential)?;
        session.select("INBOX").map_err(transient)?;
        Ok(session)
    }
}

impl MessageLister for ImapClient {
    fn list(&self, credential: &Credential, query: &str) -> Result<Vec<MessageId>, FetchError> {
        let mut session = self.open_inbox(credential)?;
        let mut uids: Vec<u32> = session.uid_search(query).map_err(transient)?.into_iter().collect();
        uids.sort_unstable_by(|a, b| b.cmp(a)); // newest first
        if let Err(e) = session.logout() {
            debug!("IMAP logout after search failed: {e}");
        }
        Ok(uids.into_iter().map(|uid| MessageId::new(uid.to_string())).collect())
    }
}

impl MessageFetcher for ImapClient {
    fn fetch(&self, credential: &Credential, id: &MessageId) -> Result<MessageDetail, FetchError> {
        let uid: u32 = id
            .as_str()
            .parse()
            .map_err(|_| FetchError::NotFound(format!("not an IMAP UID: {id}")))?;

        let mut session = self.open_inbox(credential)?;
        let fetches = session
            .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
            .map_err(transient)?;
        let raw = fetches
            .iter()
            .next()
            .and_then(|f| f.body())
            .map(|b| b.to_vec());
        if let Err(e) = session.logout() {
            debug!("IMAP logout after fetching UID {uid} failed: {e}");
        }

        let raw = raw.ok_or_else(|| FetchError::NotFound(format!("UID {uid} has no body")))?;
        parse_rfc822(id, &raw)
    }
}

/// Headers and a body preview out of a raw RFC 822 message.
pub fn parse_rfc822(id: &MessageId, raw: &[u8]) -> Result<MessageDetail, FetchError> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let headers = parsed
        .headers
        .iter()
        .map(|h| {
            let name = h.get_key();
            let value = decode_header_value(&name, h.get_value_raw());
            Header::new(name, value)
        })
        .collect();

    let body = extract_text_part(&parsed).unwrap_or_default();

    Ok(MessageDetail {
        id: id.clone(),
        headers,
        snippet: normalize_snippet(&body, SNIPPET_CHARS),
    })
}

fn extract_text_part(p: &mailparse::ParsedMail) -> Option<String> {
    let mime = p.ctype.mimetype.to_ascii_lowercase();
    if mime == "text/plain" {
        return p.get_body().ok();
    }

    // Walk subparts
    for sp in &p.subparts {
        if let Some(t) = extract_text_part(sp) {
            return Some(t);
        }
    }

    // fallback to text/html if no plain found
    if mime == "text/html"
        && let Ok(html) = p.get_body()
    {
        return Some(html_to_text(&html));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xoauth2_payload_layout() {
        let bytes = build_xoauth2_bytes("me@example.com", "tok");
        assert_eq!(bytes, b"user=me@example.com\x01auth=Bearer tok\x01\x01");
    }

    #[test]
    fn parses_plain_receipt() {
        let raw = b"From: Uber Receipts <uber.us@uber.com>\r\n\
Subject: Your Tuesday evening trip\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
$12.50\r\n\
Thanks for riding, Alex\r\n";
        let detail = parse_rfc822(&MessageId::new("42"), raw).unwrap();
        assert_eq!(detail.id.as_str(), "42");
        assert!(detail
            .headers
            .iter()
            .any(|h| h.name == "From" && h.value.contains("uber.us@uber.com")));
        assert_eq!(detail.snippet, "$12.50 Thanks for riding, Alex");
    }

    #[test]
    fn falls_back_to_html_part() {
        let raw = b"From: uber.us@uber.com\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>$8.05</p><p>Trip&nbsp;receipt</p></body></html>\r\n\
--b1--\r\n";
        let detail = parse_rfc822(&MessageId::new("7"), raw).unwrap();
        assert_eq!(detail.snippet, "$8.05 Trip receipt");
    }
}
