//! Scripted transport for driving the dispatcher in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::error::{SyncError, SyncResult};
use super::transport::{OutboundRequest, Transport, TransportResponse};

/// Replays queued responses in order; answers 200 once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<SyncResult<TransportResponse>>>,
    requests: Mutex<Vec<OutboundRequest>>,
    offline: AtomicBool,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(statuses: &[u16]) -> Self {
        let transport = Self::new();
        for status in statuses {
            transport.push_status(*status);
        }
        transport
    }

    /// Every `send` sleeps this long before answering.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_status(&self, status: u16) {
        self.push_response(status, None);
    }

    pub fn push_response(&self, status: u16, body: Option<serde_json::Value>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(TransportResponse::new(status, body)));
    }

    pub fn push_network_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(SyncError::TransientNetwork(message.to_string())));
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest) -> SyncResult<TransportResponse> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TransportResponse::new(200, None)))
    }

    async fn probe(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
