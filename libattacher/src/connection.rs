//! Connection to a single CSI driver endpoint.
//!
//! [`Connection`] owns one [`DriverTransport`] and exposes the operations the
//! attach/detach controller needs: identity, capability discovery, and
//! ControllerPublish/ControllerUnpublish with final/transient classification
//! of failures.  The controller consumes it through the [`CsiConnection`]
//! trait so it can substitute its own implementation in tests.
//!
//! Every RPC is bounded by the connection timeout, or by the caller's
//! deadline when that is sooner.  An expired bound is reported as a
//! `DeadlineExceeded` status and classified like any other driver status.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::classify::FinalCodes;
use crate::config::{ConnectionConfig, DriverAddress};
use crate::error::{CsiError, VolumeOpError};
use crate::status::Status;
use crate::transport::{DriverTransport, QuicTransport};
use crate::types::*;

/// Operations the attach/detach controller performs against a driver.
#[async_trait]
pub trait CsiConnection: Send + Sync {
    /// Name the driver reports for itself.  Fails if the name is empty.
    async fn get_driver_name(&self, deadline: Option<Instant>) -> Result<String, CsiError>;

    /// Driver liveness.
    async fn probe(&self, deadline: Option<Instant>) -> Result<(), CsiError>;

    /// Whether the driver implements ControllerPublish/ControllerUnpublish.
    async fn supports_controller_publish(
        &self,
        deadline: Option<Instant>,
    ) -> Result<bool, CsiError>;

    /// Attach `volume_id` to `node_id`.
    ///
    /// On success returns the driver's publish info, `None` when it sent
    /// none.  On failure, [`VolumeOpError::detached`] tells whether the
    /// volume can be treated as not attached.
    async fn attach(
        &self,
        deadline: Option<Instant>,
        volume_id: &VolumeId,
        read_only: bool,
        node_id: &str,
        capability: &VolumeCapability,
    ) -> Result<Option<PublishInfo>, VolumeOpError>;

    /// Detach `volume_id` from `node_id`.  `Ok` means detached.
    async fn detach(
        &self,
        deadline: Option<Instant>,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), VolumeOpError>;

    /// Release the transport.  Later operations fail with
    /// [`CsiError::ConnectionClosed`].
    async fn close(&self);
}

/// A session with one driver endpoint.
pub struct Connection<T = QuicTransport> {
    transport: T,
    timeout: Duration,
    final_codes: FinalCodes,
    closed: AtomicBool,
}

impl Connection<QuicTransport> {
    /// Dial the driver described by `config` over QUIC.
    ///
    /// The address, CA bundle, and handshake are all checked here; the
    /// handshake is bounded by the configured timeout.
    pub async fn open(config: &ConnectionConfig) -> Result<Self, CsiError> {
        let tls = config.tls_config()?;
        Self::open_with_tls(config, tls).await
    }

    /// Like [`Connection::open`], with a caller-built TLS configuration.
    pub async fn open_with_tls(
        config: &ConnectionConfig,
        tls: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        config.validate()?;
        let address: DriverAddress = config.address.parse()?;
        let server_name = config.server_name()?;
        let addr = address.resolve().await?;

        let transport =
            tokio::time::timeout(config.timeout(), QuicTransport::connect(addr, &server_name, tls))
                .await
                .map_err(|_| {
                    CsiError::Transport(format!(
                        "connecting to {address} timed out after {}s",
                        config.timeout_secs
                    ))
                })??;

        info!(%address, %addr, timeout_secs = config.timeout_secs, "connected to CSI driver");
        Ok(Self::with_transport(
            transport,
            config.timeout(),
            config.final_codes.clone(),
        ))
    }
}

impl<T: DriverTransport> Connection<T> {
    /// Wrap an already established transport.
    pub fn with_transport(transport: T, timeout: Duration, final_codes: FinalCodes) -> Self {
        Self {
            transport,
            timeout,
            final_codes,
            closed: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn final_codes(&self) -> &FinalCodes {
        &self.final_codes
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run one RPC under the effective time bound.
    async fn call<R, F>(
        &self,
        method: &'static str,
        deadline: Option<Instant>,
        rpc: F,
    ) -> Result<R, CsiError>
    where
        R: std::fmt::Debug,
        F: Future<Output = Result<R, Status>>,
    {
        if self.is_closed() {
            return Err(CsiError::ConnectionClosed);
        }

        let budget = match deadline {
            Some(deadline) => self
                .timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.timeout,
        };

        if budget.is_zero() {
            debug!(method, "deadline already passed, rpc not issued");
            return Err(CsiError::Remote(Status::deadline_exceeded(format!(
                "deadline passed before {method} was issued"
            ))));
        }

        let result = match tokio::time::timeout(budget, rpc).await {
            Ok(result) => result,
            Err(_) => Err(Status::deadline_exceeded(format!(
                "{method} did not complete within {budget:?}"
            ))),
        };
        match &result {
            Ok(response) => debug!(method, ?response, "rpc succeeded"),
            Err(status) => debug!(method, %status, "rpc failed"),
        }
        result.map_err(CsiError::Remote)
    }

    fn volume_op_error(&self, err: CsiError) -> VolumeOpError {
        let class = self.final_codes.classify_error(&err);
        VolumeOpError::new(class, err)
    }
}

#[async_trait]
impl<T: DriverTransport> CsiConnection for Connection<T> {
    #[instrument(skip_all)]
    async fn get_driver_name(&self, deadline: Option<Instant>) -> Result<String, CsiError> {
        let req = GetPluginInfoRequest {
            version: CSI_VERSION,
        };
        let rsp = self
            .call(
                "GetPluginInfo",
                deadline,
                self.transport.get_plugin_info(req),
            )
            .await?;
        if rsp.name.is_empty() {
            return Err(CsiError::EmptyDriverName);
        }
        Ok(rsp.name)
    }

    #[instrument(skip_all)]
    async fn probe(&self, deadline: Option<Instant>) -> Result<(), CsiError> {
        let req = ProbeRequest {
            version: CSI_VERSION,
        };
        self.call("Probe", deadline, self.transport.probe(req))
            .await
            .map(|_| ())
    }

    #[instrument(skip_all)]
    async fn supports_controller_publish(
        &self,
        deadline: Option<Instant>,
    ) -> Result<bool, CsiError> {
        let req = ControllerGetCapabilitiesRequest {
            version: CSI_VERSION,
        };
        let rsp = self
            .call(
                "ControllerGetCapabilities",
                deadline,
                self.transport.controller_get_capabilities(req),
            )
            .await?;

        // Entries without a type are skipped, not treated as errors.
        let supported = rsp.capabilities.iter().any(|cap| {
            matches!(
                cap.kind,
                Some(ControllerCapabilityType::Rpc(ControllerRpc::PublishUnpublishVolume))
            )
        });
        Ok(supported)
    }

    #[instrument(
        skip_all,
        fields(volume_id = %volume_id, node_id = %node_id, read_only = read_only)
    )]
    async fn attach(
        &self,
        deadline: Option<Instant>,
        volume_id: &VolumeId,
        read_only: bool,
        node_id: &str,
        capability: &VolumeCapability,
    ) -> Result<Option<PublishInfo>, VolumeOpError> {
        let req = ControllerPublishVolumeRequest {
            version: CSI_VERSION,
            volume_id: volume_id.clone(),
            node_id: node_id.to_owned(),
            volume_capability: capability.clone(),
            readonly: read_only,
        };
        match self
            .call(
                "ControllerPublishVolume",
                deadline,
                self.transport.controller_publish_volume(req),
            )
            .await
        {
            Ok(rsp) => Ok(rsp.into_publish_info()),
            Err(err) => {
                let err = self.volume_op_error(err);
                warn!(class = %err.class(), error = %err.error(), "attach failed");
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(volume_id = %volume_id, node_id = %node_id))]
    async fn detach(
        &self,
        deadline: Option<Instant>,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), VolumeOpError> {
        let req = ControllerUnpublishVolumeRequest {
            version: CSI_VERSION,
            volume_id: volume_id.clone(),
            node_id: node_id.to_owned(),
        };
        match self
            .call(
                "ControllerUnpublishVolume",
                deadline,
                self.transport.controller_unpublish_volume(req),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = self.volume_op_error(err);
                warn!(class = %err.class(), error = %err.error(), "detach failed");
                Err(err)
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.close().await;
        info!("CSI driver connection closed");
    }
}
