//! Fixture HTTP server used by the client-request test suites.
//!
//! Every path is served by one fallback handler that dispatches on method and
//! path substrings, so tests can hit `/foo.json`, `/x/bad.json` or `/slow`
//! without registering routes:
//!
//! | request                      | response                                  |
//! |------------------------------|-------------------------------------------|
//! | `POST *.json`                | 201 `{"cool":"beans"}` for `{"test":"data"}`, 503 otherwise |
//! | `POST *`                     | 201 `OK` for the body `test data`, 503 otherwise |
//! | `GET *redirect.json`         | 301 with `location`, empty body           |
//! | `GET *bad.json`              | 200 with truncated JSON                   |
//! | `GET *.json`                 | 200 `{"some":"good json"}`                |
//! | `GET *slow*`                 | 200 `SLOW REPLY` after [`SLOW_REPLY_DELAY`] |
//! | `GET *echo*`                 | 200 JSON object of the request headers    |
//! | anything else                | 200 `HELLO THERE`                         |
//!
//! With the `tls` feature, [`start_tls`] serves the same routes over HTTPS.

use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use log::debug;
use serde::Deserialize;
use tokio::net::TcpListener;

#[cfg(feature = "tls")]
mod tls;
#[cfg(feature = "tls")]
pub use tls::{start_tls, TlsServer, SERVER_NAMES};

/// How long `/slow` waits before replying.
pub const SLOW_REPLY_DELAY: Duration = Duration::from_millis(50);

/// Body expected by the plain `POST` endpoint.
pub const EXPECTED_POST_BODY: &str = "test data";

#[derive(Deserialize)]
struct PostedJson {
    test: Option<String>,
}

pub fn app() -> Router {
    Router::new().fallback(middleware)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Bind an ephemeral port on localhost and serve [`app`] on the current
/// runtime. Returns the bound address.
pub async fn start() -> Result<SocketAddr, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = run(listener).await {
            log::error!("mock server stopped: {err}");
        }
    });
    debug!("mock server listening on {addr}");
    Ok(addr)
}

async fn middleware(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path();

    if method == Method::POST {
        if path.contains(".json") {
            return json_collect(&body);
        }
        return collect(&body);
    }

    if path.contains("redirect.json") {
        debug!("redirect.json");
        return (
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, "/redirect-fake.json")],
        )
            .into_response();
    }
    if path.contains("bad.json") {
        debug!("bad.json");
        return r#"{"some":"bad json"#.into_response();
    }
    if path.contains(".json") {
        debug!("good .json");
        return r#"{"some":"good json"}"#.into_response();
    }
    if path.contains("slow") {
        debug!("slow -- delaying reply");
        tokio::time::sleep(SLOW_REPLY_DELAY).await;
        return "SLOW REPLY".into_response();
    }
    if path.contains("echo") {
        return echo_headers(&headers);
    }

    debug!("default GET");
    "HELLO THERE".into_response()
}

fn collect(body: &[u8]) -> Response {
    if body == EXPECTED_POST_BODY.as_bytes() {
        debug!("good post data");
        (StatusCode::CREATED, "OK").into_response()
    } else {
        debug!("bad post data");
        (StatusCode::SERVICE_UNAVAILABLE, "NOPE").into_response()
    }
}

fn json_collect(body: &[u8]) -> Response {
    let data: PostedJson = match serde_json::from_slice(body) {
        Ok(data) => data,
        Err(_) => {
            debug!("bad json");
            return (StatusCode::SERVICE_UNAVAILABLE, "NOPE -- bad JSON").into_response();
        }
    };
    if data.test.as_deref() == Some("data") {
        debug!("good json");
        (StatusCode::CREATED, r#"{"cool":"beans"}"#).into_response()
    } else {
        debug!("unexpected content");
        (StatusCode::SERVICE_UNAVAILABLE, "NOPE -- unexpected content").into_response()
    }
}

fn echo_headers(headers: &HeaderMap) -> Response {
    let echoed: BTreeMap<&str, &str> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect();
    match serde_json::to_string(&echoed) {
        Ok(json) => json.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
