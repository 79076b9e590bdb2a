//! Target resolution: URL, method, headers, credentials and TLS material.
//!
//! Everything here runs synchronously inside `Client::dispatch`, so a bad
//! option is reported to the caller before any I/O happens.

use base64::{prelude::BASE64_STANDARD, Engine};
use http::{
    header::{HeaderName, AUTHORIZATION},
    HeaderMap, HeaderValue, Method,
};
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use reqwest::tls::{Certificate, Identity, Version};
use url::Url;

use crate::{
    error::Error,
    options::{RequestOptions, TlsOptions},
};

/// A fully validated request target.
#[derive(Debug)]
pub(crate) struct Target {
    pub(crate) url: Url,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    /// Present only for `https` targets that carry TLS options.
    pub(crate) tls: Option<TlsConfig>,
}

/// Parsed TLS options for a one-off transport.
pub(crate) struct TlsConfig {
    pub(crate) roots: Vec<Certificate>,
    pub(crate) identity: Option<Identity>,
    pub(crate) accept_invalid_certs: bool,
    pub(crate) version: Option<Version>,
    pub(crate) servername: Option<String>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("roots", &self.roots.len())
            .field("identity", &self.identity.is_some())
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("version", &self.version)
            .field("servername", &self.servername)
            .finish()
    }
}

impl Target {
    pub(crate) fn resolve(id: &str, options: &RequestOptions) -> Result<Self, Error> {
        let raw = options
            .target_uri()
            .ok_or_else(|| Error::precondition("one of uri or url is required"))?;
        let mut url =
            Url::parse(raw).map_err(|err| Error::precondition(format!("bad uri {raw:?}: {err}")))?;
        let https = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(Error::precondition(format!("unsupported scheme {other:?}"))),
        };
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::precondition(format!("uri {raw:?} has no host")));
        }

        let method = match options.method.as_deref() {
            None => Method::GET,
            Some(name) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::precondition(format!("bad method {name:?}")))?,
        };

        let mut headers = HeaderMap::with_capacity(options.headers.len() + 1);
        for (name, value) in &options.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::precondition(format!("bad header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::precondition(format!("bad value for header {name:?}")))?;
            headers.insert(header, value);
        }

        let credentials = take_userinfo(&mut url)?.or_else(|| options.auth.clone());
        if let Some(credentials) = credentials {
            headers.insert(AUTHORIZATION, basic_auth(&credentials)?);
        }

        let tls = if !https {
            if !options.tls.is_empty() {
                debug!("[{id}] ignoring TLS options for plain http target");
            }
            None
        } else if options.tls.is_empty() {
            None
        } else {
            Some(TlsConfig::parse(id, &options.tls)?)
        };

        Ok(Self {
            url,
            method,
            headers,
            tls,
        })
    }

    /// Port the transport will connect to, after scheme defaults.
    pub(crate) fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.url.scheme() == "https" { 443 } else { 80 })
    }
}

/// Strip `user:pass@` from the authority and return it decoded.
fn take_userinfo(url: &mut Url) -> Result<Option<String>, Error> {
    if url.username().is_empty() && url.password().is_none() {
        return Ok(None);
    }
    let user = percent_decode_str(url.username()).decode_utf8_lossy().into_owned();
    let pass = url
        .password()
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
        .unwrap_or_default();
    url.set_username("")
        .and_then(|()| url.set_password(None))
        .map_err(|()| Error::precondition("cannot strip credentials from uri"))?;
    Ok(Some(format!("{user}:{pass}")))
}

fn basic_auth(credentials: &str) -> Result<HeaderValue, Error> {
    let encoded = BASE64_STANDARD.encode(credentials);
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|_| Error::precondition("credentials do not form a valid header"))?;
    value.set_sensitive(true);
    Ok(value)
}

impl TlsConfig {
    fn parse(id: &str, tls: &TlsOptions) -> Result<Self, Error> {
        if tls.pfx.is_some() {
            return Err(Error::precondition(
                "pfx client certificates are not supported, pass cert and key as PEM",
            ));
        }
        if tls.passphrase.is_some() {
            warn!("[{id}] ignoring passphrase: encrypted keys are not supported");
        }
        if tls.ciphers.is_some() {
            warn!("[{id}] ignoring ciphers: the TLS backend selects its own suites");
        }

        let roots = match &tls.ca {
            None => Vec::new(),
            Some(pem) => {
                let roots = Certificate::from_pem_bundle(pem.as_bytes())
                    .map_err(|err| Error::precondition(format!("bad ca bundle: {err}")))?;
                if roots.is_empty() {
                    return Err(Error::precondition("ca bundle contains no certificates"));
                }
                roots
            }
        };

        let identity = match (&tls.cert, &tls.key) {
            (None, None) => None,
            (Some(cert), Some(key)) => {
                let mut pem = Vec::with_capacity(cert.len() + key.len() + 1);
                pem.extend_from_slice(cert.as_bytes());
                pem.push(b'\n');
                pem.extend_from_slice(key.as_bytes());
                let identity = Identity::from_pem(&pem)
                    .map_err(|err| Error::precondition(format!("bad client identity: {err}")))?;
                Some(identity)
            }
            _ => return Err(Error::precondition("cert and key must be given together")),
        };

        Ok(Self {
            roots,
            identity,
            accept_invalid_certs: tls.reject_unauthorized == Some(false),
            version: protocol_version(tls.secure_protocol.as_deref())?,
            servername: tls.servername.clone(),
        })
    }
}

/// Map an OpenSSL method name onto a pinned TLS version.
fn protocol_version(name: Option<&str>) -> Result<Option<Version>, Error> {
    match name {
        None | Some("TLS_method" | "SSLv23_method" | "TLS_client_method") => Ok(None),
        Some("TLSv1_2_method" | "TLSv1_2_client_method") => Ok(Some(Version::TLS_1_2)),
        Some("TLSv1_3_method" | "TLSv1_3_client_method") => Ok(Some(Version::TLS_1_3)),
        Some(other) => Err(Error::precondition(format!(
            "unsupported secureProtocol {other:?}"
        ))),
    }
}
