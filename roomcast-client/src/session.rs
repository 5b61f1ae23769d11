//! Room session lifecycle
//!
//! A [`Session`] is the single owner of everything one client holds in a
//! room: membership phase, negotiated capabilities, both transports, the
//! producer and consumer registries, and the last sync snapshot.
//!
//! ## Phases
//!
//! `Idle → Joining → Joined → Leaving → Idle`
//!
//! Every leave advances the session *epoch*. Long-running operations capture
//! the epoch when they start and may only mutate state while the session is
//! still joined in that epoch, so nothing from an abandoned session leaks
//! into the next one.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::consumer::ConsumerRegistry;
use crate::engine::MediaEngine;
use crate::error::{BestEffort, ClientError, EngineError, Result, SignalError};
use crate::events::{CloseReason, SessionEvent};
use crate::producer::ProducerRegistry;
use crate::protocol::{ActiveSpeaker, Empty, Endpoint, JoinResponse, Peer, RtpCapabilities};
use crate::signaling::SignalingChannel;
use crate::transport::Transport;
use crate::types::{Direction, PeerId};

/// Membership phase of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Joining,
    Joined,
    Leaving,
}

/// Mutable session scalars. Never held across an `.await`.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) phase: SessionPhase,
    pub(crate) epoch: u64,
    pub(crate) capabilities: Option<RtpCapabilities>,
    pub(crate) send_transport: Option<Arc<Transport>>,
    pub(crate) recv_transport: Option<Arc<Transport>>,
    pub(crate) last_sync: HashMap<PeerId, Peer>,
    pub(crate) active_speaker: Option<ActiveSpeaker>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            epoch: 0,
            capabilities: None,
            send_transport: None,
            recv_transport: None,
            last_sync: HashMap::new(),
            active_speaker: None,
        }
    }

    pub(crate) fn is_joined_in(&self, epoch: u64) -> bool {
        self.phase == SessionPhase::Joined && self.epoch == epoch
    }

    pub(crate) const fn transport(&self, direction: Direction) -> Option<&Arc<Transport>> {
        match direction {
            Direction::Send => self.send_transport.as_ref(),
            Direction::Recv => self.recv_transport.as_ref(),
        }
    }

    pub(crate) fn set_transport(&mut self, direction: Direction, transport: Arc<Transport>) {
        match direction {
            Direction::Send => self.send_transport = Some(transport),
            Direction::Recv => self.recv_transport = Some(transport),
        }
    }

    /// Back to initial values, in a new epoch
    fn reset(&mut self) {
        let epoch = self.epoch;
        *self = Self::new();
        self.epoch = epoch;
    }
}

pub(crate) struct SessionInner {
    pub(crate) config: ClientConfig,
    pub(crate) signaling: Arc<SignalingChannel>,
    pub(crate) engine: Arc<dyn MediaEngine>,
    pub(crate) state: RwLock<SessionState>,
    /// Serializes join and leave
    lifecycle: Mutex<()>,
    /// Serializes transport creation per direction
    send_gate: Mutex<()>,
    recv_gate: Mutex<()>,
    pub(crate) producers: ProducerRegistry,
    pub(crate) consumers: ConsumerRegistry,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionInner {
    pub(crate) fn peer_id(&self) -> &PeerId {
        self.signaling.peer_id()
    }

    /// Current epoch, or `NotJoined`
    pub(crate) fn joined_epoch(&self) -> Result<u64> {
        let state = self.state.read();
        if state.phase == SessionPhase::Joined {
            Ok(state.epoch)
        } else {
            Err(ClientError::NotJoined)
        }
    }

    /// Whether the session is still joined in `epoch`
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.state.read().is_joined_in(epoch)
    }

    pub(crate) fn transport_gate(&self, direction: Direction) -> &Mutex<()> {
        match direction {
            Direction::Send => &self.send_gate,
            Direction::Recv => &self.recv_gate,
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Handle to the room session. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", self.inner.peer_id())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an idle session.
    ///
    /// Fails with [`SignalError::InvalidConfig`] when `config` does not pass
    /// [`ClientConfig::validate`], and with [`ClientError::UnsupportedDevice`]
    /// when the engine cannot run on this platform.
    pub fn new(config: ClientConfig, engine: Arc<dyn MediaEngine>) -> Result<Self> {
        if let Err(errors) = config.validate() {
            let message = errors.join("; ");
            warn!(error = %message, "Rejecting invalid client configuration");
            return Err(SignalError::InvalidConfig(message).into());
        }

        if let Err(e) = engine.check_supported() {
            warn!(
                engine = engine.name(),
                error = %e,
                "Media engine not supported on this platform"
            );
            return Err(match e {
                EngineError::Unsupported(reason) => ClientError::UnsupportedDevice(reason),
                other => ClientError::Engine(other),
            });
        }

        let peer_id = config
            .peer_id
            .clone()
            .map_or_else(PeerId::generate, PeerId::from);
        let signaling = Arc::new(SignalingChannel::new(config.clone(), peer_id.clone())?);
        let (events, _) = broadcast::channel(config.sync.event_capacity);

        info!(
            peer_id = %peer_id,
            engine = engine.name(),
            server = %config.signaling.base_url,
            "Session created"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                signaling,
                engine,
                state: RwLock::new(SessionState::new()),
                lifecycle: Mutex::new(()),
                send_gate: Mutex::new(()),
                recv_gate: Mutex::new(()),
                producers: ProducerRegistry::new(),
                consumers: ConsumerRegistry::new(),
                events,
            }),
        })
    }

    pub(crate) const fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        self.inner.peer_id()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.inner.state.read().phase
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.phase() == SessionPhase::Joined
    }

    /// Router capabilities obtained at join time
    #[must_use]
    pub fn capabilities(&self) -> Option<RtpCapabilities> {
        self.inner.state.read().capabilities.clone()
    }

    /// Live transport for `direction`, if one was created this session
    #[must_use]
    pub fn transport(&self, direction: Direction) -> Option<Arc<Transport>> {
        self.inner.state.read().transport(direction).cloned()
    }

    /// Subscribe to session events
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Join the room as a new peer.
    ///
    /// Idempotent: when already joined, returns the held capabilities without
    /// a network call. Concurrent callers are folded into one registration.
    pub async fn join(&self) -> Result<RtpCapabilities> {
        if let Some(capabilities) = self.joined_capabilities() {
            return Ok(capabilities);
        }

        let _lifecycle = self.inner.lifecycle.lock().await;
        if let Some(capabilities) = self.joined_capabilities() {
            debug!("Join folded into the attempt that just completed");
            return Ok(capabilities);
        }

        self.inner.state.write().phase = SessionPhase::Joining;
        info!(peer_id = %self.peer_id(), "Joining room");

        let response: JoinResponse = match self
            .inner
            .signaling
            .request(Endpoint::JoinAsNewPeer, &Empty {})
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Join request failed");
                self.inner.state.write().phase = SessionPhase::Idle;
                return Err(e.into());
            }
        };
        let capabilities = response.router_rtp_capabilities;

        // Engines refuse a second load; a rejoin reuses the first one.
        if !self.inner.engine.is_loaded() {
            if let Err(e) = self.inner.engine.load(&capabilities).await {
                warn!(error = %e, "Failed to load router capabilities");
                self.inner.state.write().phase = SessionPhase::Idle;
                return Err(e.into());
            }
        }

        {
            let mut state = self.inner.state.write();
            state.phase = SessionPhase::Joined;
            state.capabilities = Some(capabilities.clone());
        }

        info!(peer_id = %self.peer_id(), "Joined room");
        self.inner.emit(SessionEvent::Joined {
            peer_id: self.peer_id().clone(),
        });

        Ok(capabilities)
    }

    /// Leave the room and reset the session to its initial state.
    ///
    /// The leave notification is best-effort; local teardown always happens.
    /// Returns [`BestEffort::Skipped`] when not joined.
    pub async fn leave(&self) -> BestEffort {
        let _lifecycle = self.inner.lifecycle.lock().await;

        {
            let mut state = self.inner.state.write();
            if state.phase != SessionPhase::Joined {
                return BestEffort::Skipped;
            }
            state.phase = SessionPhase::Leaving;
            // In-flight operations of this epoch are now stale.
            state.epoch += 1;
        }

        info!(peer_id = %self.peer_id(), "Leaving room");
        let outcome = self.inner.signaling.notify(Endpoint::Leave, &Empty {}).await;

        let (send, recv) = {
            let mut state = self.inner.state.write();
            (state.send_transport.take(), state.recv_transport.take())
        };

        // Closing a transport invalidates everything bound to it.
        join_all(
            [recv, send]
                .into_iter()
                .flatten()
                .map(|transport| async move { transport.close().await }),
        )
        .await;

        for producer in self.inner.producers.drain() {
            producer.mark_closed();
            self.inner.emit(SessionEvent::ProducerClosed {
                media_tag: producer.media_tag().clone(),
                producer_id: producer.id().clone(),
            });
        }
        for consumer in self.inner.consumers.drain() {
            consumer.mark_closed();
            self.inner.emit(SessionEvent::ConsumerClosed {
                peer_id: consumer.peer_id().clone(),
                media_tag: consumer.media_tag().clone(),
                consumer_id: consumer.id().clone(),
                reason: CloseReason::SessionLeft,
            });
        }

        self.inner.state.write().reset();

        info!(peer_id = %self.peer_id(), "Left room");
        self.inner.emit(SessionEvent::Left {
            peer_id: self.peer_id().clone(),
        });

        outcome
    }

    fn joined_capabilities(&self) -> Option<RtpCapabilities> {
        let state = self.inner.state.read();
        if state.phase == SessionPhase::Joined {
            state.capabilities.clone()
        } else {
            None
        }
    }
}
