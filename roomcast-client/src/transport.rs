//! Send/recv transport management
//!
//! At most one transport per direction exists per session. Creation is
//! serialized per direction, and the engine drives negotiation back through
//! [`NegotiationHooks`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::engine::{
    ConsumeOptions, EngineConsumer, EngineProducer, EngineTransport, ProduceOptions,
    ProduceRequest, TransportHooks,
};
use crate::error::{ClientError, EngineError, Result, SignalError};
use crate::events::SessionEvent;
use crate::protocol::{
    ConnectTransportRequest, CreateTransportRequest, CreateTransportResponse, DtlsParameters,
    Endpoint, SendTrackRequest, SendTrackResponse,
};
use crate::session::{Session, SessionInner};
use crate::signaling::SignalingChannel;
use crate::types::{ConnectionState, Direction, ProducerId, TransportId};

/// Unidirectional media path to the SFU
pub struct Transport {
    id: TransportId,
    direction: Direction,
    inner: Box<dyn EngineTransport>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.connection_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Transport {
    fn new(id: TransportId, direction: Direction, inner: Box<dyn EngineTransport>) -> Self {
        Self {
            id,
            direction,
            inner,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &TransportId {
        &self.id
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            self.inner.connection_state()
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) async fn produce(
        &self,
        options: ProduceOptions,
    ) -> std::result::Result<Box<dyn EngineProducer>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        self.inner.produce(options).await
    }

    pub(crate) async fn consume(
        &self,
        options: ConsumeOptions,
    ) -> std::result::Result<Box<dyn EngineConsumer>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        self.inner.consume(options).await
    }

    /// Close the transport. Every producer or consumer bound to it dies with it.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(transport_id = %self.id, direction = %self.direction, "Closing transport");
        self.inner.close().await;
    }

    /// Poll with a fixed delay until the transport reports `connected`.
    ///
    /// Stops early when the transport reaches a terminal state, when
    /// `still_live` turns false, or when `timeout` elapses.
    pub(crate) async fn wait_until_connected(
        &self,
        poll_interval: Duration,
        timeout: Option<Duration>,
        still_live: impl Fn() -> bool,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            if !still_live() || self.is_closed() {
                return Err(ClientError::SessionClosed);
            }

            match self.connection_state() {
                ConnectionState::Connected => return Ok(()),
                state if state.is_terminal() => {
                    return Err(ClientError::TransportFailure {
                        direction: self.direction,
                        state,
                    });
                }
                state => {
                    debug!(
                        transport_id = %self.id,
                        state = %state,
                        "Waiting for transport to connect"
                    );
                }
            }

            let waited = started.elapsed();
            if let Some(limit) = timeout {
                if waited >= limit {
                    warn!(
                        transport_id = %self.id,
                        waited = ?waited,
                        "Transport did not connect in time"
                    );
                    return Err(ClientError::ConnectionTimeout {
                        direction: self.direction,
                        waited,
                    });
                }
            }

            sleep(poll_interval).await;
        }
    }
}

/// Hooks the engine calls while negotiating one transport
struct NegotiationHooks {
    direction: Direction,
    transport_id: TransportId,
    signaling: Arc<SignalingChannel>,
    session: Weak<SessionInner>,
    epoch: u64,
}

#[async_trait]
impl TransportHooks for NegotiationHooks {
    async fn on_connect(
        &self,
        dtls_parameters: DtlsParameters,
    ) -> std::result::Result<(), SignalError> {
        debug!(
            transport_id = %self.transport_id,
            direction = %self.direction,
            "Connecting transport"
        );
        let request = ConnectTransportRequest {
            transport_id: self.transport_id.clone(),
            dtls_parameters,
        };
        self.signaling
            .call(Endpoint::ConnectTransport, &request)
            .await
            .inspect_err(|e| {
                warn!(transport_id = %self.transport_id, error = %e, "connect-transport failed");
            })
    }

    async fn on_produce(
        &self,
        request: ProduceRequest,
    ) -> std::result::Result<ProducerId, SignalError> {
        debug!(
            transport_id = %self.transport_id,
            kind = %request.kind,
            media_tag = %request.app_data.media_tag,
            paused = request.paused,
            "Negotiating new track"
        );
        let body = SendTrackRequest {
            transport_id: self.transport_id.clone(),
            kind: request.kind,
            rtp_parameters: request.rtp_parameters,
            paused: request.paused,
            app_data: request.app_data,
        };
        let response: SendTrackResponse = self
            .signaling
            .request(Endpoint::SendTrack, &body)
            .await
            .inspect_err(|e| {
                warn!(transport_id = %self.transport_id, error = %e, "send-track failed");
            })?;
        Ok(response.id)
    }

    async fn on_connection_state_change(&self, state: ConnectionState) {
        info!(
            transport_id = %self.transport_id,
            direction = %self.direction,
            state = %state,
            "Transport connection state changed"
        );

        let Some(session) = self.session.upgrade() else {
            return;
        };
        session.emit(SessionEvent::TransportStateChanged {
            direction: self.direction,
            state,
        });

        // Transport loss ends the session. Hooks from an earlier session are
        // ignored so they cannot tear down a later one.
        if state.is_terminal() && session.is_current(self.epoch) {
            warn!(
                transport_id = %self.transport_id,
                direction = %self.direction,
                state = %state,
                "Transport lost, leaving room"
            );
            let session = Session::from_inner(session);
            tokio::spawn(async move {
                let _ = session.leave().await;
            });
        }
    }
}

impl Session {
    /// Get the live transport for `direction`, creating it on first use.
    ///
    /// Concurrent callers for the same direction share one `create-transport`
    /// round trip.
    pub async fn create_transport(&self, direction: Direction) -> Result<Arc<Transport>> {
        let epoch = self.inner.joined_epoch()?;
        if let Some(transport) = self.live_transport(direction) {
            return Ok(transport);
        }

        let _gate = self.inner.transport_gate(direction).lock().await;
        if !self.inner.is_current(epoch) {
            return Err(ClientError::SessionClosed);
        }
        if let Some(transport) = self.live_transport(direction) {
            return Ok(transport);
        }

        info!(direction = %direction, "Creating transport");
        let response: CreateTransportResponse = self
            .inner
            .signaling
            .request(Endpoint::CreateTransport, &CreateTransportRequest { direction })
            .await?;
        let options = response.transport_options;

        let hooks = Arc::new(NegotiationHooks {
            direction,
            transport_id: options.id.clone(),
            signaling: Arc::clone(&self.inner.signaling),
            session: Arc::downgrade(&self.inner),
            epoch,
        });
        let engine_transport = self
            .inner
            .engine
            .create_transport(direction, &options, hooks)
            .await?;
        let transport = Arc::new(Transport::new(options.id, direction, engine_transport));

        let stored = {
            let mut state = self.inner.state.write();
            if state.is_joined_in(epoch) {
                state.set_transport(direction, Arc::clone(&transport));
                true
            } else {
                false
            }
        };
        if !stored {
            debug!(direction = %direction, "Session left during transport creation");
            transport.close().await;
            return Err(ClientError::SessionClosed);
        }

        info!(transport_id = %transport.id(), direction = %direction, "Transport created");
        self.inner.emit(SessionEvent::TransportCreated {
            direction,
            transport_id: transport.id().clone(),
        });
        Ok(transport)
    }

    fn live_transport(&self, direction: Direction) -> Option<Arc<Transport>> {
        self.inner
            .state
            .read()
            .transport(direction)
            .filter(|transport| !transport.is_closed())
            .cloned()
    }
}
