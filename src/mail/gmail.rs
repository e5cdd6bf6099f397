use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::domain::message::{Credential, Header, MessageDetail, MessageId};
use crate::error::FetchError;
use crate::mail::decoders::decode_html_entities;
use crate::mail::provider::{MessageFetcher, MessageLister};

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    id: String,
    #[serde(default)]
    snippet: String,
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<RawHeader>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    name: String,
    value: String,
}

/// Gmail REST adapter. Holds no credential: the bearer token is attached
/// per request, so one client serves any number of users.
#[derive(Clone)]
pub struct GmailClient {
    http: Client,
    base: String,
    user_id: String,
}

impl GmailClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            user_id: "me".to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/gmail/v1/users/{}/messages", self.base, self.user_id)
    }

    fn get(&self, url: &str, credential: &Credential, query: &[(&str, &str)]) -> Result<Response, FetchError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&credential.access_token)
            .query(query)
            .send()
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(classify(status, &body))
    }
}

/// Map a non-success Gmail response onto the provider error classes.
pub fn classify(status: StatusCode, body: &str) -> FetchError {
    let detail = format!("{status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED => FetchError::Unauthorized(detail),
        StatusCode::NOT_FOUND => FetchError::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited(detail),
        StatusCode::FORBIDDEN
            if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") =>
        {
            FetchError::RateLimited(detail)
        }
        StatusCode::FORBIDDEN => FetchError::Unauthorized(detail),
        _ => FetchError::Transient(detail),
    }
}

impl MessageLister for GmailClient {
    fn list(&self, credential: &Credential, query: &str) -> Result<Vec<MessageId>, FetchError> {
        let url = self.messages_url();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("q", query)];
            if let Some(tok) = page_token.as_deref() {
                params.push(("pageToken", tok));
            }
            let page: ListResponse = self
                .get(&url, credential, &params)?
                .json()
                .map_err(|e| FetchError::Malformed(e.to_string()))?;

            debug!("listed page with {} messages", page.messages.len());
            for m in page.messages {
                if seen.insert(m.id.clone()) {
                    out.push(MessageId::new(m.id));
                }
            }

            match page.next_page_token {
                Some(tok) if !tok.is_empty() => page_token = Some(tok),
                _ => break,
            }
        }
        Ok(out)
    }
}

impl MessageFetcher for GmailClient {
    fn fetch(&self, credential: &Credential, id: &MessageId) -> Result<MessageDetail, FetchError> {
        let url = format!("{}/{}", self.messages_url(), id.as_str());
        let params = [
            ("format", "metadata"),
            ("metadataHeaders", "From"),
            ("metadataHeaders", "Subject"),
        ];
        let msg: GetResponse = self
            .get(&url, credential, &params)?
            .json()
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let headers = msg
            .payload
            .map(|p| {
                p.headers
                    .into_iter()
                    .map(|h| Header::new(h.name, h.value))
                    .collect()
            })
            .unwrap_or_default();

        Ok(MessageDetail {
            id: MessageId::new(msg.id),
            headers,
            snippet: decode_html_entities(&msg.snippet),
        })
    }
}
