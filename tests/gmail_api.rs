use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tiny_http::{Request, Response, Server};
use url::Url;

use receipt_tally::mail::gmail::GmailClient;
use receipt_tally::mail::provider::{MessageFetcher, MessageLister};
use receipt_tally::{
    AggregationResult, Aggregator, AggregatorOptions, Credential, FetchError, MessageId,
    SenderFilter,
};

const TOKEN: &str = "ya29.test";

fn authorized(req: &Request) -> bool {
    req.headers()
        .iter()
        .any(|h| h.field.equiv("Authorization") && h.value.as_str() == format!("Bearer {TOKEN}"))
}

fn message_json(id: &str, from: &str, snippet: &str) -> String {
    serde_json::json!({
        "id": id,
        "threadId": id,
        "snippet": snippet,
        "payload": { "headers": [
            { "name": "Subject", "value": "Your trip" },
            { "name": "From", "value": from },
        ]},
    })
    .to_string()
}

fn route(req: &Request) -> (u16, String) {
    if !authorized(req) {
        return (401, r#"{"error":{"code":401,"status":"UNAUTHENTICATED"}}"#.into());
    }
    let url = Url::parse(&format!("http://fake{}", req.url())).unwrap();
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    match url.path() {
        "/gmail/v1/users/me/messages" => match (param("q").as_deref(), param("pageToken").as_deref()) {
            (Some("from:uber.us@uber.com"), None) => (
                200,
                r#"{"messages":[{"id":"a","threadId":"a"},{"id":"gone","threadId":"gone"}],"nextPageToken":"p2","resultSizeEstimate":4}"#.into(),
            ),
            (Some("from:uber.us@uber.com"), Some("p2")) => (
                200,
                r#"{"messages":[{"id":"gone","threadId":"gone"},{"id":"lyft","threadId":"lyft"}],"resultSizeEstimate":4}"#.into(),
            ),
            _ => (200, r#"{"resultSizeEstimate":0}"#.into()),
        },
        path => {
            assert_eq!(param("format").as_deref(), Some("metadata"));
            match path.rsplit('/').next() {
                Some("a") => (
                    200,
                    message_json("a", "Uber Receipts <uber.us@uber.com>", "$12.50 Thanks for riding, Alex&#39;s"),
                ),
                Some("lyft") => (200, message_json("lyft", "Lyft <no-reply@lyftmail.com>", "$8.00 ride")),
                Some("bare") => (200, r#"{"id":"bare","snippet":"$1.00"}"#.into()),
                Some("limited") => (
                    403,
                    r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#.into(),
                ),
                _ => (404, r#"{"error":{"code":404,"status":"NOT_FOUND"}}"#.into()),
            }
        }
    }
}

/// Serve fake Gmail endpoints on an ephemeral port for the rest of the test.
fn fake_gmail() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let (status, body) = route(&request);
            let _ = request.respond(Response::from_string(body).with_status_code(status));
        }
    });
    base
}

fn client(base: &str) -> GmailClient {
    GmailClient::new(base, Duration::from_secs(5)).unwrap()
}

fn credential() -> Credential {
    Credential::new("rider@example.com", TOKEN)
}

#[test]
fn listing_follows_pages_and_drops_duplicates() {
    let base = fake_gmail();
    let ids = client(&base)
        .list(&credential(), "from:uber.us@uber.com")
        .unwrap();
    let ids: Vec<&str> = ids.iter().map(MessageId::as_str).collect();
    assert_eq!(ids, ["a", "gone", "lyft"]);
}

#[test]
fn listing_without_messages_is_empty() {
    let base = fake_gmail();
    let ids = client(&base).list(&credential(), "from:nobody@example.com").unwrap();
    assert!(ids.is_empty());
}

#[test]
fn fetch_decodes_headers_and_snippet() {
    let base = fake_gmail();
    let detail = client(&base)
        .fetch(&credential(), &MessageId::new("a"))
        .unwrap();
    assert_eq!(detail.snippet, "$12.50 Thanks for riding, Alex's");
    assert!(detail
        .headers
        .iter()
        .any(|h| h.name == "From" && h.value.contains("uber.us@uber.com")));
}

#[test]
fn fetch_without_payload_has_no_headers() {
    let base = fake_gmail();
    let detail = client(&base)
        .fetch(&credential(), &MessageId::new("bare"))
        .unwrap();
    assert!(detail.headers.is_empty());
}

#[test]
fn fetch_errors_are_classified() {
    let base = fake_gmail();
    let gmail = client(&base);
    assert!(matches!(
        gmail.fetch(&credential(), &MessageId::new("gone")),
        Err(FetchError::NotFound(_))
    ));
    assert!(matches!(
        gmail.fetch(&credential(), &MessageId::new("limited")),
        Err(FetchError::RateLimited(_))
    ));
    let stale = Credential::new("rider@example.com", "expired");
    assert!(matches!(
        gmail.fetch(&stale, &MessageId::new("a")),
        Err(FetchError::Unauthorized(_))
    ));
}

#[test]
fn unreachable_provider_is_transient() {
    // nothing listens on the discard port
    let gmail = client("http://127.0.0.1:9");
    assert!(matches!(
        gmail.list(&credential(), "q"),
        Err(FetchError::Transient(_))
    ));
}

#[test]
fn end_to_end_total_over_fake_gmail() {
    let base = fake_gmail();
    let aggregator = Aggregator::new(
        Arc::new(client(&base)),
        SenderFilter::new("uber.us@uber.com"),
        AggregatorOptions::default(),
    );
    let result = aggregator
        .aggregate(&credential(), "from:uber.us@uber.com")
        .unwrap();
    match result {
        AggregationResult::Total { amount, stats } => {
            assert_eq!(amount.to_string(), "12.50");
            assert_eq!(stats.candidates, 3);
            assert_eq!(stats.failures, 1);
            assert_eq!(stats.filtered_out, 1);
        }
        other => panic!("expected a total, got {other:?}"),
    }
}
