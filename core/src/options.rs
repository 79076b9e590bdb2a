//! Declarative request description.
//!
//! # Design
//! `RequestOptions` deserializes from a camelCase JSON option bag (`uri`,
//! `json`, `rejectUnauthorized`, ...), which is how the FFI layer and config
//! files hand requests in. The agent and stream bodies cannot come from JSON
//! and are set through the builder methods.

use std::{collections::BTreeMap, fmt, time::Duration};

use serde::Deserialize;

use crate::{body::RequestBody, error::Error};

/// Everything needed to issue one request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Absolute target URL. Preferred over `url` when both are set.
    pub uri: Option<String>,
    pub url: Option<String>,
    /// Defaults to `GET`.
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// `user:pass`; credentials in the URL take precedence.
    pub auth: Option<String>,
    pub body: Option<RequestBody>,
    /// Decode the response body as JSON.
    pub json: bool,
    /// Milliseconds; `0` disables both timers.
    pub timeout: Option<u64>,
    /// Hand back the raw body stream instead of buffering. Wins over `json`.
    pub stream: bool,
    #[serde(skip)]
    pub agent: Option<Agent>,
    #[serde(flatten)]
    pub tls: TlsOptions,
}

/// TLS passthrough, applied only to `https` targets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsOptions {
    /// PKCS#12 archive. Not supported by the rustls backend.
    pub pfx: Option<Vec<u8>>,
    pub passphrase: Option<String>,
    /// PEM private key for the client identity.
    pub key: Option<String>,
    /// PEM certificate chain for the client identity.
    pub cert: Option<String>,
    /// PEM bundle replacing the built-in roots.
    pub ca: Option<String>,
    pub ciphers: Option<String>,
    pub reject_unauthorized: Option<bool>,
    /// OpenSSL method name, e.g. `TLSv1_2_method`.
    pub secure_protocol: Option<String>,
    /// Name used for SNI and certificate verification.
    pub servername: Option<String>,
}

impl TlsOptions {
    pub fn is_empty(&self) -> bool {
        self.pfx.is_none()
            && self.passphrase.is_none()
            && self.key.is_none()
            && self.cert.is_none()
            && self.ca.is_none()
            && self.ciphers.is_none()
            && self.reject_unauthorized.is_none()
            && self.secure_protocol.is_none()
            && self.servername.is_none()
    }
}

impl RequestOptions {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// Parse a JSON option object.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|err| Error::precondition(format!("malformed request options: {err}")))
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn auth(mut self, credentials: impl Into<String>) -> Self {
        self.auth = Some(credentials.into());
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub(crate) fn target_uri(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }

    pub(crate) fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }
}

/// Reusable transport with its own connection pool.
///
/// A caller-supplied agent is used exactly as configured, including its
/// redirect and TLS settings.
#[derive(Clone)]
pub struct Agent {
    client: reqwest::Client,
}

impl Agent {
    /// A pooled transport that never follows redirects.
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| Error::precondition(format!("cannot build transport: {err}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").finish_non_exhaustive()
    }
}
