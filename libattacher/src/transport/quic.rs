//! QUIC transport used by the attacher to issue CSI requests to a driver.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::error::CsiError;
use crate::message::CsiMessage;
use crate::status::Status;
use crate::types::*;

use super::{DriverTransport, typed_call};

/// Upper bound on a single response body.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// A [`DriverTransport`] that sends [`CsiMessage`] requests over a single
/// QUIC connection and returns the driver's response.
pub struct QuicTransport {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
}

impl QuicTransport {
    /// Establish a new QUIC connection to the driver at `addr`.
    ///
    /// * `addr` — socket address of the driver endpoint
    /// * `server_name` — TLS SNI name that must match a SAN in the driver's
    ///   certificate
    /// * `tls_config` — client TLS configuration trusting the driver's CA
    ///
    /// The handshake completes before this returns, so an unreachable or
    /// misconfigured endpoint is reported here rather than on first use.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::Transport(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let bind: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(CsiError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?
            .await
            .map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "CSI QUIC connection established");
        Ok(Self {
            endpoint,
            connection,
        })
    }

    /// Address of the driver this transport is connected to.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Each call opens a new bi-directional QUIC stream, writes the
    /// JSON-serialized request, finishes the send side, then reads the
    /// full response and deserializes it.  Stream and connection failures
    /// are reported as `Unavailable`; an undecodable response as `Internal`.
    #[instrument(skip_all, fields(method = msg.method()))]
    async fn request(&self, msg: CsiMessage) -> Result<CsiMessage, Status> {
        let (mut send, mut recv) = self.connection.open_bi().await.map_err(unavailable)?;

        let payload = serde_json::to_vec(&msg)
            .map_err(|e| Status::internal(format!("encode request: {e}")))?;
        send.write_all(&payload).await.map_err(unavailable)?;
        send.finish().map_err(unavailable)?;

        let buf = recv
            .read_to_end(MAX_RESPONSE_BYTES)
            .await
            .map_err(unavailable)?;

        let response: CsiMessage = serde_json::from_slice(&buf)
            .map_err(|e| Status::internal(format!("malformed response: {e}")))?;
        debug!(%response, "CSI response received");
        Ok(response)
    }
}

fn unavailable<E: std::fmt::Display>(e: E) -> Status {
    Status::unavailable(e.to_string())
}

#[async_trait]
impl DriverTransport for QuicTransport {
    async fn get_plugin_info(
        &self,
        req: GetPluginInfoRequest,
    ) -> Result<GetPluginInfoResponse, Status> {
        typed_call!(self, GetPluginInfo(req) => PluginInfo)
    }

    async fn probe(&self, req: ProbeRequest) -> Result<ProbeResponse, Status> {
        typed_call!(self, Probe(req) => ProbeResult)
    }

    async fn controller_get_capabilities(
        &self,
        req: ControllerGetCapabilitiesRequest,
    ) -> Result<ControllerGetCapabilitiesResponse, Status> {
        typed_call!(self, ControllerGetCapabilities(req) => ControllerCapabilities)
    }

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, Status> {
        typed_call!(self, ControllerPublishVolume(req) => VolumePublished)
    }

    async fn controller_unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<ControllerUnpublishVolumeResponse, Status> {
        typed_call!(self, ControllerUnpublishVolume(req) => VolumeUnpublished)
    }

    /// Close the underlying QUIC connection gracefully.
    async fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
        self.endpoint.wait_idle().await;
        debug!("CSI QUIC connection closed");
    }
}
