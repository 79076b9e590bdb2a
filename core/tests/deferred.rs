//! `Client::request` against the live mock server.

use std::{net::SocketAddr, time::Duration};

use client_request::{Client, Error, RequestOptions, ResponseBody};
use http::StatusCode;
use serde_json::json;

async fn setup() -> (Client, SocketAddr) {
    let addr = mock_server::start().await.expect("mock server");
    (Client::new().expect("client"), addr)
}

#[tokio::test]
async fn resolves_with_reply() {
    let (client, addr) = setup().await;
    let reply = client
        .request(RequestOptions::new(format!("http://{addr}/")))
        .await
        .unwrap();
    assert_eq!(reply.response.status, StatusCode::OK);
    assert_eq!(reply.body.as_bytes().unwrap(), "HELLO THERE");
}

#[tokio::test]
async fn resolves_with_json() {
    let (client, addr) = setup().await;
    let reply = client
        .request(RequestOptions::new(format!("http://{addr}/foo.json")).json(true))
        .await
        .unwrap();
    assert_eq!(reply.body.as_json(), Some(&json!({ "some": "good json" })));
}

#[tokio::test]
async fn created_is_a_success() {
    let (client, addr) = setup().await;
    let reply = client
        .request(
            RequestOptions::new(format!("http://{addr}/post"))
                .method("POST")
                .body("test data"),
        )
        .await
        .unwrap();
    assert_eq!(reply.response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn non_success_status_rejects_with_response_and_body() {
    let (client, addr) = setup().await;
    let err = client
        .request(
            RequestOptions::new(format!("http://{addr}/post"))
                .method("POST")
                .body("test"),
        )
        .await
        .unwrap_err();
    let (response, body) = match err {
        Error::Status { response, body } => (response, body),
        other => panic!("expected status rejection, got {other}"),
    };
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.as_bytes().unwrap(), "NOPE");
}

#[tokio::test]
async fn redirect_rejects_with_empty_body() {
    let (client, addr) = setup().await;
    let err = client
        .request(RequestOptions::new(format!("http://{addr}/redirect.json")).json(true))
        .await
        .unwrap_err();
    let (response, body) = match err {
        Error::Status { response, body } => (response, body),
        other => panic!("expected status rejection, got {other}"),
    };
    assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
    assert!(matches!(*body, ResponseBody::Empty));
}

#[tokio::test]
async fn timeout_rejects() {
    let (client, addr) = setup().await;
    let err = client
        .request(
            RequestOptions::new(format!("http://{addr}/slow")).timeout(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "client request timeout");
}

#[tokio::test]
async fn parse_failure_rejects() {
    let (client, addr) = setup().await;
    let err = client
        .request(RequestOptions::new(format!("http://{addr}/bad.json")).json(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResponseParse(_)));
}

#[tokio::test]
async fn precondition_rejects_without_io() {
    let (client, _addr) = setup().await;
    let err = client
        .request(RequestOptions::new("not a uri"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[tokio::test]
async fn dropping_the_future_aborts() {
    let (client, addr) = setup().await;
    let pending = client.request(RequestOptions::new(format!("http://{addr}/slow")));
    let raced = tokio::time::timeout(Duration::from_millis(5), pending).await;
    assert!(raced.is_err());
    // The request was dispatched and then aborted; the server still replies
    // to nobody, and the client stays usable.
    let reply = client
        .request(RequestOptions::new(format!("http://{addr}/")))
        .await
        .unwrap();
    assert_eq!(reply.body.as_bytes().unwrap(), "HELLO THERE");
}
