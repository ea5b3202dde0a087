//! In-process driver transport.
//!
//! [`MemoryTransport`] answers requests without any network: responses are
//! either scripted up front (consumed in FIFO order) or produced by a handler
//! closure.  Every request is recorded so tests can assert on exactly what the
//! connection sent.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::message::CsiMessage;
use crate::status::Status;
use crate::types::*;

use super::{DriverTransport, typed_call};

type Handler = Box<dyn Fn(&CsiMessage) -> CsiMessage + Send + Sync>;

#[derive(Default)]
struct State {
    responses: VecDeque<CsiMessage>,
    requests: Vec<CsiMessage>,
    close_calls: usize,
}

/// A fake driver endpoint living in the same process.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    handler: Option<Handler>,
    latency: Option<Duration>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request that has no scripted response with `handler`.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CsiMessage) -> CsiMessage + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Delay every response by `latency`, simulating a slow driver.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue the response for the next request.
    pub fn push_response(&self, response: CsiMessage) {
        self.lock().responses.push_back(response);
    }

    /// Queue a failure for the next request.
    pub fn push_error(&self, status: Status) {
        self.push_response(CsiMessage::Error(status));
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<CsiMessage> {
        self.lock().requests.clone()
    }

    /// Number of scripted responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    /// How many times [`DriverTransport::close`] was called.
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn request(&self, msg: CsiMessage) -> Result<CsiMessage, Status> {
        let response = {
            let mut state = self.lock();
            if state.close_calls > 0 {
                return Err(Status::unavailable("transport is closed"));
            }
            state.requests.push(msg.clone());
            state.responses.pop_front()
        };
        let response = match (response, &self.handler) {
            (Some(response), _) => response,
            (None, Some(handler)) => handler(&msg),
            (None, None) => CsiMessage::Error(Status::internal(format!(
                "no response scripted for {}",
                msg.method()
            ))),
        };
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        debug!(request = %msg, %response, "in-memory driver answered");
        Ok(response)
    }
}

#[async_trait]
impl DriverTransport for MemoryTransport {
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

    async fn close(&self) {
        self.lock().close_calls += 1;
    }
}
