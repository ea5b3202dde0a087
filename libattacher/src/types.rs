//! CSI data model used by the attacher: volume capabilities, controller
//! capabilities, and the request/response messages of the Identity and
//! Controller RPCs the attacher issues.
//!
//! All types are [`Serialize`]/[`Deserialize`] so they can be carried over
//! QUIC as JSON.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol version
// ---------------------------------------------------------------------------

/// CSI protocol version sent with every request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// The protocol version this crate speaks.  Passed through, never interpreted.
pub const CSI_VERSION: CsiVersion = CsiVersion {
    major: 0,
    minor: 1,
    patch: 0,
};

impl fmt::Display for CsiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Driver-provided metadata returned by a successful attach, handed verbatim
/// to the node-side mount step.
pub type PublishInfo = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Volume capability
// ---------------------------------------------------------------------------

/// How a volume may be accessed across nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    Unknown,
    /// Can be published once as read/write on a single node.
    SingleNodeWriter,
    /// Can be published once as read-only on a single node.
    SingleNodeReaderOnly,
    /// Can be published as read-only at multiple nodes.
    MultiNodeReaderOnly,
    /// Can be published at multiple nodes; only one may write.
    MultiNodeSingleWriter,
    /// Can be published as read/write at multiple nodes.
    MultiNodeMultiWriter,
}

/// Whether the volume is consumed as a raw block device or a filesystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    Block,
    Mount {
        /// Filesystem type, e.g. `"ext4"`.  Empty means driver default.
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
}

/// Describes how a volume is to be mounted.  Constructed by the caller and
/// passed to the driver unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    pub access_type: AccessType,
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// A filesystem-mount capability with driver-default filesystem.
    pub fn mount(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
            access_mode,
        }
    }

    /// A raw block capability.
    pub fn block(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Block,
            access_mode,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller capabilities
// ---------------------------------------------------------------------------

/// Controller RPCs a driver may advertise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerRpc {
    Unknown,
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
}

/// The kind of a controller capability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapabilityType {
    Rpc(ControllerRpc),
}

/// One entry of a `ControllerGetCapabilities` response.
///
/// `kind` is optional on the wire.  A missing, null, or unrecognized kind
/// (a newer RPC, or a capability family other than `Rpc`) decodes as `None`
/// so one unknown entry cannot fail the whole response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerServiceCapability {
    #[serde(default, deserialize_with = "lenient_kind")]
    pub kind: Option<ControllerCapabilityType>,
}

fn lenient_kind<'de, D>(deserializer: D) -> Result<Option<ControllerCapabilityType>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| serde_json::from_value(value).ok()))
}

impl ControllerServiceCapability {
    pub fn rpc(rpc: ControllerRpc) -> Self {
        Self {
            kind: Some(ControllerCapabilityType::Rpc(rpc)),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity service messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetPluginInfoRequest {
    pub version: CsiVersion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetPluginInfoResponse {
    /// Driver name, e.g. `"csi/example"`.  Required to be non-empty.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vendor_version: String,
    #[serde(default)]
    pub manifest: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeRequest {
    pub version: CsiVersion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeResponse {}

// ---------------------------------------------------------------------------
// Controller service messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerGetCapabilitiesRequest {
    pub version: CsiVersion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerGetCapabilitiesResponse {
    #[serde(default)]
    pub capabilities: Vec<ControllerServiceCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerPublishVolumeRequest {
    pub version: CsiVersion,
    pub volume_id: VolumeId,
    pub node_id: String,
    pub volume_capability: VolumeCapability,
    #[serde(default)]
    pub readonly: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerPublishVolumeResponse {
    /// Absent on the wire is the same as empty.
    #[serde(default)]
    pub publish_volume_info: Option<PublishInfo>,
}

impl ControllerPublishVolumeResponse {
    /// The publish info with "empty" and "absent" collapsed to `None`.
    pub fn into_publish_info(self) -> Option<PublishInfo> {
        self.publish_volume_info.filter(|info| !info.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerUnpublishVolumeRequest {
    pub version: CsiVersion,
    pub volume_id: VolumeId,
    pub node_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerUnpublishVolumeResponse {}
