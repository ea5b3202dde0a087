//! # libattacher — CSI driver connection for the RK8s attach/detach controller
//!
//! `libattacher` is the client side of the [Container Storage Interface][csi]
//! used by the volume attach/detach controller.  It keeps one connection per
//! driver endpoint, discovers the driver's identity and controller
//! capabilities, and performs ControllerPublish (attach) and
//! ControllerUnpublish (detach).
//!
//! The important decision it makes is how to report a failed attach/detach:
//! a **final** failure (see [`classify`]) proves the volume is not attached
//! and may be forgotten; any other failure is **transient** and the caller
//! must retry.  Retry scheduling itself belongs to the caller.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`connection`] | [`Connection`] handle and the [`CsiConnection`] trait. |
//! | [`classify`] | Final/transient classification of status codes. |
//! | [`config`] | [`ConnectionConfig`]: address, timeout, TLS, policy. |
//! | [`error`] | [`CsiError`] and [`VolumeOpError`]. |
//! | [`status`] | [`Status`] / [`Code`] carried by failed RPCs. |
//! | [`types`] | Volume capabilities and CSI request/response messages. |
//! | [`message`] | [`CsiMessage`] wire envelope. |
//! | [`transport`] | [`DriverTransport`] seam: QUIC and in-memory. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod classify;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod status;
pub mod transport;
pub mod types;

pub use classify::{ErrorClass, FinalCodes};
pub use config::ConnectionConfig;
pub use connection::{Connection, CsiConnection};
pub use error::{CsiError, VolumeOpError};
pub use message::CsiMessage;
pub use status::{Code, Status};
pub use transport::{DriverTransport, MemoryTransport, QuicTransport};
pub use types::*;
