//! HTTPS requests against the TLS flavour of the mock server.
//!
//! The server certificate is signed by a root minted per test, so every
//! successful request here goes through a client built from the request's
//! own TLS options.

use std::time::Duration;

use bytes::Bytes;
use client_request::{
    Client, Completion, Error, RequestBody, RequestOptions, TlsOptions, TransportErrorKind,
};
use http::StatusCode;
use mock_server::TlsServer;
use serde_json::json;
use tokio::sync::oneshot;

async fn send(options: RequestOptions) -> Completion {
    let client = Client::new().expect("client");
    let (tx, rx) = oneshot::channel();
    client
        .dispatch(options, move |completion| {
            let _ = tx.send(completion);
        })
        .expect("dispatch");
    rx.await.expect("callback never ran")
}

async fn setup() -> TlsServer {
    mock_server::start_tls().await.expect("tls mock server")
}

fn trusting(server: &TlsServer) -> TlsOptions {
    TlsOptions {
        ca: Some(server.ca_pem.clone()),
        ..TlsOptions::default()
    }
}

fn expect_tls_failure(completion: Completion) {
    let failure = completion.unwrap_err();
    assert!(failure.response.is_none());
    match failure.error {
        Error::Transport { kind, .. } => assert_eq!(kind, TransportErrorKind::Tls),
        other => panic!("expected tls failure, got {other}"),
    }
}

#[tokio::test]
async fn https_basic() {
    let server = setup().await;
    let options = RequestOptions::new(format!("https://{}/", server.addr)).tls(trusting(&server));
    let reply = send(options).await.unwrap();
    assert_eq!(reply.response.status, StatusCode::OK);
    assert_eq!(reply.body.as_bytes().unwrap(), "HELLO THERE");
    assert_eq!(reply.response.url.scheme(), "https");
}

#[tokio::test]
async fn https_with_ca_decodes_json() {
    let server = setup().await;
    let options = RequestOptions::new(format!("https://{}/foo.json", server.addr))
        .json(true)
        .tls(trusting(&server));
    let reply = send(options).await.unwrap();
    assert_eq!(reply.body.as_json(), Some(&json!({ "some": "good json" })));
}

#[tokio::test]
async fn https_bad_json_keeps_the_response() {
    let server = setup().await;
    let options = RequestOptions::new(format!("https://{}/bad.json", server.addr))
        .json(true)
        .tls(trusting(&server));
    let failure = send(options).await.unwrap_err();
    assert!(matches!(failure.error, Error::ResponseParse(_)));
    assert_eq!(failure.response.unwrap().status, StatusCode::OK);
}

#[tokio::test]
async fn https_reject_unauthorized_false() {
    let server = setup().await;
    let options = RequestOptions::new(format!("https://{}/", server.addr)).tls(TlsOptions {
        reject_unauthorized: Some(false),
        ..TlsOptions::default()
    });
    let reply = send(options).await.unwrap();
    assert_eq!(reply.body.as_bytes().unwrap(), "HELLO THERE");
}

#[tokio::test]
async fn https_unknown_root_is_a_tls_failure() {
    let server = setup().await;
    expect_tls_failure(send(RequestOptions::new(format!("https://{}/", server.addr))).await);
}

#[tokio::test]
async fn https_servername_must_match_the_certificate() {
    let server = setup().await;
    let mut tls = trusting(&server);
    tls.servername = Some("notthisserver.com".to_string());
    let options = RequestOptions::new(format!("https://{}/", server.addr)).tls(tls);
    expect_tls_failure(send(options).await);
}

#[tokio::test]
async fn https_servername_is_used_for_verification() {
    let server = setup().await;
    let mut tls = trusting(&server);
    tls.servername = Some(mock_server::SERVER_NAMES[0].to_string());
    let options = RequestOptions::new(format!("https://{}/echo", server.addr))
        .json(true)
        .tls(tls);
    let reply = send(options).await.unwrap();
    let echoed = reply.body.as_json().unwrap();
    assert_eq!(echoed["host"], server.addr.to_string());
}

#[tokio::test]
async fn https_timeout() {
    let server = setup().await;
    let options = RequestOptions::new(format!("https://{}/slow", server.addr))
        .timeout(Duration::from_millis(10))
        .tls(trusting(&server));
    let failure = send(options).await.unwrap_err();
    assert_eq!(failure.error.to_string(), "client request timeout");
    assert_eq!(failure.error.code(), Some("ECONNRESET"));
    assert!(failure.response.is_none());
}

#[tokio::test]
async fn https_post_bodies() {
    let server = setup().await;
    let parts = ["te", "st", " ", "da", "ta"]
        .map(|p| Ok::<_, std::io::Error>(Bytes::from_static(p.as_bytes())));
    let bodies = [
        RequestBody::from("test data"),
        RequestBody::from(Bytes::from_static(b"test data")),
        RequestBody::stream(futures::stream::iter(parts)),
    ];
    for body in bodies {
        let options = RequestOptions::new(format!("https://{}/", server.addr))
            .method("POST")
            .body(body)
            .timeout(Duration::from_secs(5))
            .tls(trusting(&server));
        let reply = send(options).await.unwrap();
        assert_eq!(reply.response.status, StatusCode::CREATED);
        assert_eq!(reply.body.as_bytes().unwrap(), "OK");
    }
}

#[tokio::test]
async fn https_post_object() {
    let server = setup().await;
    let options = RequestOptions::new(format!("https://{}/post.json", server.addr))
        .method("POST")
        .body(json!({ "test": "data" }))
        .json(true)
        .tls(trusting(&server));
    let reply = send(options).await.unwrap();
    assert_eq!(reply.response.status, StatusCode::CREATED);
    assert_eq!(reply.body.as_json(), Some(&json!({ "cool": "beans" })));
}
