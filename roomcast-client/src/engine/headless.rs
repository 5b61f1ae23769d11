//! Engine without a media stack
//!
//! Loads and reports router capabilities so a session can join, sync and
//! enumerate streams, but refuses to build transports.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::debug;

use super::{EngineTransport, MediaEngine, TransportHooks};
use crate::error::EngineError;
use crate::protocol::{RtpCapabilities, TransportOptions};
use crate::types::Direction;

#[derive(Debug, Default)]
pub struct HeadlessEngine {
    router_capabilities: RwLock<Option<RtpCapabilities>>,
}

impl HeadlessEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities loaded at join time, if any
    #[must_use]
    pub fn router_capabilities(&self) -> Option<RtpCapabilities> {
        self.router_capabilities.read().clone()
    }
}

#[async_trait]
impl MediaEngine for HeadlessEngine {
    fn name(&self) -> &str {
        "headless"
    }

    fn check_supported(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.router_capabilities.read().is_some()
    }

    async fn load(&self, router_capabilities: &RtpCapabilities) -> Result<(), EngineError> {
        let mut slot = self.router_capabilities.write();
        if slot.is_some() {
            return Err(EngineError::AlreadyLoaded);
        }
        debug!("Headless engine loaded router capabilities");
        *slot = Some(router_capabilities.clone());
        Ok(())
    }

    fn rtp_capabilities(&self) -> Result<RtpCapabilities, EngineError> {
        if !self.is_loaded() {
            return Err(EngineError::NotLoaded);
        }
        // Receives nothing.
        Ok(RtpCapabilities(json!({ "codecs": [], "headerExtensions": [] })))
    }

    async fn create_transport(
        &self,
        direction: Direction,
        _options: &TransportOptions,
        _hooks: Arc<dyn TransportHooks>,
    ) -> Result<Box<dyn EngineTransport>, EngineError> {
        Err(EngineError::Unsupported(format!(
            "headless engine cannot carry media ({direction} transport requested)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_once() {
        let engine = HeadlessEngine::new();
        assert!(!engine.is_loaded());
        assert_eq!(engine.rtp_capabilities(), Err(EngineError::NotLoaded));

        let caps = RtpCapabilities(json!({ "codecs": [{ "mimeType": "video/VP8" }] }));
        engine.load(&caps).await.unwrap();
        assert!(engine.is_loaded());
        assert_eq!(engine.router_capabilities(), Some(caps.clone()));

        assert_eq!(engine.load(&caps).await, Err(EngineError::AlreadyLoaded));
    }
}
