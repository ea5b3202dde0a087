//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the envelope for every request and response exchanged
//! between the attacher and a driver endpoint.  Each QUIC bi-stream carries
//! exactly one request followed by one response (or [`CsiMessage::Error`]).

use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::types::*;

/// Top-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    GetPluginInfo(GetPluginInfoRequest),
    Probe(ProbeRequest),
    ControllerGetCapabilities(ControllerGetCapabilitiesRequest),
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),

    // ----- Responses -------------------------------------------------------
    PluginInfo(GetPluginInfoResponse),
    ProbeResult(ProbeResponse),
    ControllerCapabilities(ControllerGetCapabilitiesResponse),
    VolumePublished(ControllerPublishVolumeResponse),
    VolumeUnpublished(ControllerUnpublishVolumeResponse),

    /// The driver failed the request.
    Error(Status),
}

impl CsiMessage {
    /// RPC method name, for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetPluginInfo(_) | Self::PluginInfo(_) => "GetPluginInfo",
            Self::Probe(_) | Self::ProbeResult(_) => "Probe",
            Self::ControllerGetCapabilities(_) | Self::ControllerCapabilities(_) => {
                "ControllerGetCapabilities"
            }
            Self::ControllerPublishVolume(_) | Self::VolumePublished(_) => {
                "ControllerPublishVolume"
            }
            Self::ControllerUnpublishVolume(_) | Self::VolumeUnpublished(_) => {
                "ControllerUnpublishVolume"
            }
            Self::Error(_) => "Error",
        }
    }

    /// Turn a response into `Ok(message)` or the carried status.
    pub fn into_result(self) -> Result<CsiMessage, Status> {
        match self {
            Self::Error(status) => Err(status),
            other => Ok(other),
        }
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GetPluginInfo(_) => f.write_str("GetPluginInfo"),
            Self::Probe(_) => f.write_str("Probe"),
            Self::ControllerGetCapabilities(_) => f.write_str("ControllerGetCapabilities"),
            Self::ControllerPublishVolume(req) => write!(
                f,
                "ControllerPublishVolume(volume={}, node={}, readonly={})",
                req.volume_id, req.node_id, req.readonly
            ),
            Self::ControllerUnpublishVolume(req) => write!(
                f,
                "ControllerUnpublishVolume(volume={}, node={})",
                req.volume_id, req.node_id
            ),
            Self::PluginInfo(info) => write!(f, "PluginInfo(name={:?})", info.name),
            Self::ProbeResult(_) => f.write_str("ProbeResult"),
            Self::ControllerCapabilities(rsp) => {
                write!(f, "ControllerCapabilities(count={})", rsp.capabilities.len())
            }
            Self::VolumePublished(rsp) => write!(
                f,
                "VolumePublished(info_keys={})",
                rsp.publish_volume_info.as_ref().map_or(0, |i| i.len())
            ),
            Self::VolumeUnpublished(_) => f.write_str("VolumeUnpublished"),
            Self::Error(status) => write!(f, "Error({status})"),
        }
    }
}
