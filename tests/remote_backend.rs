//! Remote-Object backend over the gist-style document API.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokenstore::crypto::{Crypto, ENCRYPTED_PREFIX};
use tokenstore::errors::BackendError;
use tokenstore::models::{Token, TokenCollection, TokenStatus};
use tokenstore::store::codec;
use tokenstore::store::remote::GistTransport;
use tokenstore::store::{Backend, RemoteObjectBackend};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GIST_ID: &str = "deadbeef";
const FILE: &str = "tokens.json.enc";

fn crypto() -> Arc<Crypto> {
    Arc::new(Crypto::new(Some("remote-test")))
}

fn backend(server: &MockServer, crypto: Arc<Crypto>) -> RemoteObjectBackend {
    let transport =
        GistTransport::new(&server.uri(), "ghp_test", GIST_ID, FILE, Duration::from_secs(5)).unwrap();
    RemoteObjectBackend::new(Box::new(transport), crypto)
}

fn token(id: &str) -> Token {
    Token {
        id: id.into(),
        name: id.into(),
        secret_hash: format!("hash-{}", id),
        permissions: Default::default(),
        status: TokenStatus::Active,
        created_at: Utc::now(),
        expires_at: None,
        auxiliary_data: None,
    }
}

fn gist_path() -> String {
    format!("/gists/{}", GIST_ID)
}

#[tokio::test]
async fn test_missing_gist_loads_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gist_path()))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let loaded = backend(&server, crypto()).load().await.unwrap();
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn test_gist_without_our_file_loads_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(gist_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": GIST_ID,
            "files": { "README.md": { "content": "hello" } }
        })))
        .mount(&server)
        .await;

    assert!(backend(&server, crypto()).load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_save_patches_encrypted_file_and_load_reads_it_back() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(gist_path()))
        .and(header("authorization", "Bearer ghp_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": GIST_ID })))
        .expect(1)
        .mount(&server)
        .await;

    let crypto = crypto();
    let remote = backend(&server, crypto.clone());
    remote
        .save(&TokenCollection::from_tokens(vec![token("t1"), token("t2")]))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let content = body["files"][FILE]["content"].as_str().unwrap().to_string();
    assert!(content.starts_with(ENCRYPTED_PREFIX));
    assert!(!content.contains("hash-t1"));

    // Serve what was written.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path(gist_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": { FILE: { "content": content, "truncated": false } }
        })))
        .mount(&server)
        .await;

    let loaded = remote.load().await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.contains("t1") && loaded.contains("t2"));
}

#[tokio::test]
async fn test_truncated_file_is_fetched_from_raw_url() {
    let server = MockServer::start().await;
    let crypto = crypto();
    let stored = codec::encode(&crypto, &TokenCollection::from_tokens(vec![token("big")])).unwrap();

    Mock::given(method("GET"))
        .and(path(gist_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": {
                FILE: {
                    "content": &stored[..10],
                    "truncated": true,
                    "raw_url": format!("{}/raw/{}/{}", server.uri(), GIST_ID, FILE),
                }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/raw/{}/{}", GIST_ID, FILE)))
        .respond_with(ResponseTemplate::new(200).set_body_string(stored.clone()))
        .mount(&server)
        .await;

    let loaded = backend(&server, crypto).load().await.unwrap();
    assert!(loaded.contains("big"));
}

#[tokio::test]
async fn test_raw_url_on_another_host_gets_no_credentials() {
    let api = MockServer::start().await;
    let cdn = MockServer::start().await;
    let crypto = crypto();
    let stored = codec::encode(&crypto, &TokenCollection::from_tokens(vec![token("big")])).unwrap();

    Mock::given(method("GET"))
        .and(path(gist_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": {
                FILE: {
                    "content": "",
                    "truncated": true,
                    "raw_url": format!("{}/raw/{}", cdn.uri(), FILE),
                }
            }
        })))
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/raw/{}", FILE)))
        .respond_with(ResponseTemplate::new(200).set_body_string(stored))
        .expect(1)
        .mount(&cdn)
        .await;

    let loaded = backend(&api, crypto).load().await.unwrap();
    assert!(loaded.contains("big"));

    let requests = cdn.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_server_error_is_a_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    match backend(&server, crypto()).load().await {
        Err(BackendError::Status { status, body }) => {
            assert_eq!(status, 502);
            assert_eq!(body, "bad gateway");
        }
        other => panic!("expected status error, got {:?}", other.map(|c| c.len())),
    }
}

#[tokio::test]
async fn test_undecryptable_content_loads_empty() {
    let server = MockServer::start().await;
    let written_with_other_key =
        codec::encode(&Crypto::new(Some("someone-else")), &TokenCollection::from_tokens(vec![token("x")]))
            .unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": { FILE: { "content": written_with_other_key } }
        })))
        .mount(&server)
        .await;

    assert!(backend(&server, crypto()).load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_last_writer_wins_on_remote() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let crypto = crypto();
    let a = backend(&server, crypto.clone());
    let b = backend(&server, crypto.clone());
    a.save(&TokenCollection::from_tokens(vec![token("a1"), token("a2")]))
        .await
        .unwrap();
    b.save(&TokenCollection::from_tokens(vec![token("b1")])).await.unwrap();

    // No conditional write: both PATCHes are unconditional full overwrites,
    // so the stored document is whatever arrived last.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for req in &requests {
        assert!(req.headers.get("if-match").is_none());
    }
    let last: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let content = last["files"][FILE]["content"].as_str().unwrap();
    let stored = codec::decode(&crypto, content).unwrap();
    let ids: Vec<_> = stored.tokens.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["b1"]);
}
