//! Opening the transport request.
//!
//! Picks the connection pool (caller agent, one-off TLS client, or the
//! client's default agent), attaches the classified body and sends. Runs
//! inside the lifecycle task, so everything here is cancelled by dropping
//! the future.

use std::{net::SocketAddr, sync::Arc};

use futures::TryStreamExt;
use http::{header::HOST, HeaderMap, HeaderValue};
use log::{debug, warn};
use url::{Host, Url};

use crate::{
    body::Payload,
    error::{Error, TransportErrorKind},
    options::Agent,
    target::{Target, TlsConfig},
    timer::IdleTimer,
};

pub(crate) async fn open(
    id: &str,
    target: Target,
    payload: Payload,
    agent: Option<Agent>,
    default: &Agent,
    idle: Option<Arc<IdleTimer>>,
) -> Result<reqwest::Response, Error> {
    let Target {
        mut url,
        method,
        mut headers,
        tls,
    } = target;

    let client = match (agent, tls) {
        (Some(agent), tls) => {
            if tls.is_some() {
                warn!("[{id}] TLS options ignored: the supplied agent's configuration applies");
            }
            agent.client().clone()
        }
        (None, Some(tls)) => tls_client(id, tls, &mut url, &mut headers).await?,
        (None, None) => default.client().clone(),
    };

    let mut request = client.request(method, url).headers(headers);
    request = match payload {
        Payload::Empty => request,
        Payload::Verbatim(bytes) => request.body(bytes),
        Payload::Stream(stream) => {
            let tracked = stream.inspect_ok(move |_| {
                if let Some(idle) = &idle {
                    idle.touch();
                }
            });
            request.body(reqwest::Body::wrap_stream(tracked))
        }
    };

    request.send().await.map_err(Error::from_reqwest)
}

/// Build a single-use client carrying the request's TLS options.
async fn tls_client(
    id: &str,
    tls: TlsConfig,
    url: &mut Url,
    headers: &mut HeaderMap,
) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(tls.accept_invalid_certs);

    if !tls.roots.is_empty() {
        builder = builder.tls_built_in_root_certs(false);
        for root in tls.roots {
            builder = builder.add_root_certificate(root);
        }
    }
    if let Some(identity) = tls.identity {
        builder = builder.identity(identity);
    }
    if let Some(version) = tls.version {
        builder = builder.min_tls_version(version).max_tls_version(version);
    }
    if let Some(servername) = tls.servername {
        let addrs = lookup(url).await?;
        debug!("[{id}] verifying as {servername} against {addrs:?}");
        let authority = HeaderValue::from_str(&authority(url))
            .map_err(|_| Error::precondition("host does not form a valid header"))?;
        headers.entry(HOST).or_insert(authority);
        builder = builder.resolve_to_addrs(&servername, &addrs);
        url.set_host(Some(&servername))
            .map_err(|err| Error::precondition(format!("bad servername {servername:?}: {err}")))?;
    }

    builder
        .build()
        .map_err(|err| Error::transport(TransportErrorKind::Tls, err))
}

/// Resolve the original host so the servername can be pinned to it.
async fn lookup(url: &Url) -> Result<Vec<SocketAddr>, Error> {
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<SocketAddr> = match url.host() {
        Some(Host::Ipv4(ip)) => vec![SocketAddr::new(ip.into(), port)],
        Some(Host::Ipv6(ip)) => vec![SocketAddr::new(ip.into(), port)],
        Some(Host::Domain(name)) => tokio::net::lookup_host((name, port))
            .await
            .map_err(|err| Error::transport(TransportErrorKind::Dns, err))?
            .collect(),
        None => return Err(Error::precondition("uri has no host")),
    };
    if addrs.is_empty() {
        return Err(Error::transport(
            TransportErrorKind::Dns,
            format!("no addresses for {}", authority(url)),
        ));
    }
    Ok(addrs)
}

/// `host[:port]` as it should appear in the `Host` header.
fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_keeps_explicit_port() {
        let url = Url::parse("https://localhost:8443/x").unwrap();
        assert_eq!(authority(&url), "localhost:8443");
        let url = Url::parse("https://localhost/x").unwrap();
        assert_eq!(authority(&url), "localhost");
    }

    #[tokio::test]
    async fn ip_hosts_resolve_without_dns() {
        let url = Url::parse("https://127.0.0.1:8443/").unwrap();
        let addrs = lookup(&url).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8443".parse().unwrap()]);

        let url = Url::parse("https://[::1]/").unwrap();
        let addrs = lookup(&url).await.unwrap();
        assert_eq!(addrs, vec!["[::1]:443".parse().unwrap()]);
    }

    #[tokio::test]
    async fn servername_rewrites_url_and_keeps_host_header() {
        let mut url = Url::parse("https://127.0.0.1:8443/secure").unwrap();
        let mut headers = HeaderMap::new();
        let tls = TlsConfig {
            roots: Vec::new(),
            identity: None,
            accept_invalid_certs: false,
            version: None,
            servername: Some("server.example".to_string()),
        };
        tls_client("t-1", tls, &mut url, &mut headers).await.unwrap();
        assert_eq!(url.as_str(), "https://server.example:8443/secure");
        assert_eq!(headers[HOST], "127.0.0.1:8443");
    }
}
