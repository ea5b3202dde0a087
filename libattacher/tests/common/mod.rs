//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use libattacher::CsiMessage;
use quinn::crypto::rustls::QuicServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A CSI driver endpoint served over QUIC, answering every request with a
/// handler.  Uses a self-signed certificate for `localhost`.
pub struct TestDriver {
    pub addr: SocketAddr,
    /// PEM file holding the driver's certificate, to be trusted by clients.
    pub ca_file: NamedTempFile,
    endpoint: quinn::Endpoint,
    accept: JoinHandle<()>,
}

impl TestDriver {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(CsiMessage) -> CsiMessage + Send + Sync + 'static,
    {
        Self::start_raw(move |request| {
            serde_json::to_vec(&handler(request)).expect("encode response")
        })
        .await
    }

    /// Like [`TestDriver::start`], but the handler writes the response bytes
    /// itself, so it can send payloads the typed messages cannot express.
    pub async fn start_raw<F>(handler: F) -> Self
    where
        F: Fn(CsiMessage) -> Vec<u8> + Send + Sync + 'static,
    {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
            .expect("generate certificate");
        let cert_der: CertificateDer<'static> = certified.cert.der().clone();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));

        let mut ca_file = NamedTempFile::new().expect("temp file");
        ca_file
            .write_all(certified.cert.pem().as_bytes())
            .expect("write CA");

        let tls = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .expect("server TLS config");
        let quic = QuicServerConfig::try_from(tls).expect("QUIC server config");
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic));
        let endpoint = quinn::Endpoint::server(server_config, ([127, 0, 0, 1], 0).into())
            .expect("bind driver endpoint");
        let addr = endpoint.local_addr().expect("local addr");

        let handler = Arc::new(handler);
        let accept_endpoint = endpoint.clone();
        let accept = tokio::spawn(async move {
            while let Some(incoming) = accept_endpoint.accept().await {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let Ok(conn) = incoming.await else {
                        return;
                    };
                    while let Ok((mut send, mut recv)) = conn.accept_bi().await {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            let buf = recv.read_to_end(1024 * 1024).await.expect("read request");
                            let request: CsiMessage =
                                serde_json::from_slice(&buf).expect("decode request");
                            let payload = handler(request);
                            send.write_all(&payload).await.expect("write response");
                            send.finish().expect("finish stream");
                        });
                    }
                });
            }
        });

        Self {
            addr,
            ca_file,
            endpoint,
            accept,
        }
    }

    pub fn address(&self) -> String {
        format!("quic://{}", self.addr)
    }

    pub fn stop(self) {
        self.endpoint.close(0u32.into(), b"driver shutdown");
        self.accept.abort();
    }
}
