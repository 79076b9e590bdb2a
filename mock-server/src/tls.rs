//! HTTPS flavour of the fixture server.
//!
//! Each call to [`start_tls`] mints a fresh root CA and a server certificate
//! for `localhost` / `127.0.0.1` signed by it, then serves [`app`] over
//! rustls. Tests trust the server by passing [`TlsServer::ca_pem`] as the
//! client's `ca`.

use std::{io, net::SocketAddr, sync::Arc};

use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use log::debug;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use tokio::net::TcpListener;
use tokio_rustls::{
    rustls::{
        self,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
    TlsAcceptor,
};

use crate::app;

/// Names the server certificate is valid for.
pub const SERVER_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// A running HTTPS fixture.
#[derive(Debug, Clone)]
pub struct TlsServer {
    pub addr: SocketAddr,
    /// PEM of the root that signed the server certificate.
    pub ca_pem: String,
}

struct Minted {
    ca_pem: String,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

fn mint() -> Result<Minted, rcgen::Error> {
    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "mock-server test root");
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let ca_key = KeyPair::generate()?;
    let ca = ca_params.self_signed(&ca_key)?;

    let names = SERVER_NAMES.iter().map(|name| name.to_string()).collect::<Vec<_>>();
    let mut leaf_params = CertificateParams::new(names)?;
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, SERVER_NAMES[0]);
    let leaf_key = KeyPair::generate()?;
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key)?;

    Ok(Minted {
        ca_pem: ca.pem(),
        chain: vec![leaf.der().clone()],
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
    })
}

fn server_config(minted: Minted) -> Result<rustls::ServerConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(minted.chain, minted.key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Bind an ephemeral port on localhost and serve [`app`] over TLS on the
/// current runtime.
pub async fn start_tls() -> Result<TlsServer, io::Error> {
    let minted = mint().map_err(io::Error::other)?;
    let ca_pem = minted.ca_pem.clone();
    let config = server_config(minted).map_err(io::Error::other)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve(listener, acceptor));
    debug!("mock tls server listening on {addr}");
    Ok(TlsServer { addr, ca_pem })
}

async fn serve(listener: TcpListener, acceptor: TlsAcceptor) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::error!("mock tls server stopped: {err}");
                return;
            }
        };
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(socket).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!("handshake with {peer} failed: {err}");
                    return;
                }
            };
            let service = TowerToHyperService::new(app());
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("connection with {peer} ended: {err}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_root_is_pem_and_chain_has_the_leaf() {
        let minted = mint().unwrap();
        assert!(minted.ca_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(minted.chain.len(), 1);
        server_config(minted).unwrap();
    }

    #[test]
    fn every_call_mints_a_new_root() {
        assert_ne!(mint().unwrap().ca_pem, mint().unwrap().ca_pem);
    }
}
