//! Driver transports.
//!
//! [`DriverTransport`] is the seam between the connection logic and the wire:
//! one method per CSI RPC the attacher issues, each returning the typed
//! response or the [`Status`] the call failed with.  Two implementations ship
//! with the crate:
//!
//! * [`QuicTransport`] — [`CsiMessage`](crate::message::CsiMessage) values over
//!   QUIC bi-directional streams using `quinn`.
//! * [`MemoryTransport`] — an in-process driver with scripted responses, for
//!   deterministic tests of code built on top of the connection.

use async_trait::async_trait;

use crate::message::CsiMessage;
use crate::status::Status;
use crate::types::*;

/// Send `$req` through the transport's `request` method and unwrap the
/// `$variant` response.
macro_rules! typed_call {
    ($this:expr, $req:ident($body:expr) => $variant:ident) => {{
        use $crate::message::CsiMessage;
        match $this.request(CsiMessage::$req($body)).await?.into_result()? {
            CsiMessage::$variant(rsp) => Ok(rsp),
            other => Err($crate::transport::unexpected_response(
                stringify!($req),
                &other,
            )),
        }
    }};
}

pub(crate) use typed_call;

pub mod memory;
pub mod quic;

pub use memory::MemoryTransport;
pub use quic::QuicTransport;

/// Request/response calls against one driver endpoint.
///
/// Implementations must be safe to call concurrently; the connection shares
/// one transport between all in-flight operations.
#[async_trait]
pub trait DriverTransport: Send + Sync {
    async fn get_plugin_info(
        &self,
        req: GetPluginInfoRequest,
    ) -> Result<GetPluginInfoResponse, Status>;

    async fn probe(&self, req: ProbeRequest) -> Result<ProbeResponse, Status>;

    async fn controller_get_capabilities(
        &self,
        req: ControllerGetCapabilitiesRequest,
    ) -> Result<ControllerGetCapabilitiesResponse, Status>;

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, Status>;

    async fn controller_unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<ControllerUnpublishVolumeResponse, Status>;

    /// Release the underlying channel.  Called exactly once by the owner.
    async fn close(&self);
}

/// Status for a response envelope that does not answer the request sent.
fn unexpected_response(request: &'static str, response: &CsiMessage) -> Status {
    Status::internal(format!("unexpected response to {request}: {response}"))
}
