//! Media engine facade
//!
//! The engine owns everything below signaling: capability negotiation,
//! ICE/DTLS, and the actual encoded tracks. This crate only drives it through
//! the traits here. An engine calls back into the session through
//! [`TransportHooks`], which it receives when a transport is created; each
//! hook returns the outcome of the signaling round trip instead of taking
//! success/failure callbacks.

mod headless;

pub use headless::HeadlessEngine;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, SignalError};
use crate::protocol::{
    AppData, ConsumerParameters, DtlsParameters, EncodingHint, RtpCapabilities, RtpParameters,
    TransportOptions,
};
use crate::types::{ConnectionState, ConsumerId, Direction, MediaKind, ProducerId, TransportId};

/// Opaque handle to an engine-owned media track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackHandle {
    pub id: String,
    pub kind: MediaKind,
}

impl TrackHandle {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self { id: id.into(), kind }
    }
}

/// Everything the engine needs to start sending one track
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: TrackHandle,
    pub encodings: Vec<EncodingHint>,
    pub app_data: AppData,
    /// Whether the server-side producer should start paused
    pub paused: bool,
}

/// Parameters the engine forwards to [`TransportHooks::on_produce`]
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: AppData,
    pub paused: bool,
}

/// Everything the engine needs to start receiving one track
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub parameters: ConsumerParameters,
    pub app_data: AppData,
}

/// Capability surface of the platform media stack
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Fails with [`EngineError::Unsupported`] when the platform cannot run
    /// the engine at all
    fn check_supported(&self) -> Result<(), EngineError>;

    /// Whether router capabilities have been loaded
    fn is_loaded(&self) -> bool;

    /// Load router capabilities. Loading twice is an error.
    async fn load(&self, router_capabilities: &RtpCapabilities) -> Result<(), EngineError>;

    /// Local receive capabilities, available once loaded
    fn rtp_capabilities(&self) -> Result<RtpCapabilities, EngineError>;

    /// Build a local transport from server parameters
    async fn create_transport(
        &self,
        direction: Direction,
        options: &TransportOptions,
        hooks: Arc<dyn TransportHooks>,
    ) -> Result<Box<dyn EngineTransport>, EngineError>;
}

/// Transition callbacks registered when a transport is created
#[async_trait]
pub trait TransportHooks: Send + Sync {
    /// The transport needs connectivity for the first time. An error is
    /// terminal for the transport.
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), SignalError>;

    /// A new track is about to flow on a send transport. Returns the
    /// server-assigned producer id.
    async fn on_produce(&self, request: ProduceRequest) -> Result<ProducerId, SignalError>;

    /// The transport's connection state changed
    async fn on_connection_state_change(&self, state: ConnectionState);
}

/// Engine-side unidirectional transport
#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn connection_state(&self) -> ConnectionState;

    /// Start sending a track. Drives `on_connect` (first use) and `on_produce`.
    async fn produce(
        &self,
        options: ProduceOptions,
    ) -> Result<Box<dyn EngineProducer>, EngineError>;

    /// Start receiving a track. Drives `on_connect` on first use.
    async fn consume(
        &self,
        options: ConsumeOptions,
    ) -> Result<Box<dyn EngineConsumer>, EngineError>;

    /// Close the transport and every producer/consumer bound to it
    async fn close(&self);
}

/// Engine-side published track
#[async_trait]
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn resume(&self) -> Result<(), EngineError>;

    async fn close(&self);
}

/// Engine-side subscribed track
#[async_trait]
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;

    fn kind(&self) -> MediaKind;

    fn track(&self) -> TrackHandle;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn resume(&self) -> Result<(), EngineError>;

    async fn close(&self);
}
