//! Remotely subscribed tracks
//!
//! Consumers are keyed by `(peer_id, media_tag)`. A subscribe claims its key
//! before the first network call, so a concurrent subscribe for the same pair
//! is rejected instead of racing it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{ConsumeOptions, EngineConsumer, TrackHandle};
use crate::error::{BestEffort, ClientError, Result};
use crate::events::{CloseReason, SessionEvent};
use crate::protocol::{AppData, ConsumerParameters, ConsumerRequest, Endpoint, RecvTrackRequest};
use crate::registry::Registry;
use crate::session::Session;
use crate::types::{ConsumerId, Direction, MediaKind, MediaTag, PeerId, ProducerId, TrackKey};

pub(crate) type ConsumerRegistry = Registry<TrackKey, Arc<Consumer>>;

/// How a rendering surface should present one track
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderTarget {
    pub kind: MediaKind,
    pub autoplay: bool,
    pub playsinline: bool,
    #[serde(skip)]
    pub source: TrackHandle,
}

impl RenderTarget {
    /// Video plays inline; audio also starts playing on its own.
    #[must_use]
    pub fn for_track(source: TrackHandle) -> Self {
        Self {
            kind: source.kind,
            autoplay: source.kind == MediaKind::Audio,
            playsinline: true,
            source,
        }
    }
}

/// A remote track bound to the recv transport
pub struct Consumer {
    id: ConsumerId,
    peer_id: PeerId,
    media_tag: MediaTag,
    kind: MediaKind,
    producer_id: ProducerId,
    paused: AtomicBool,
    closed: AtomicBool,
    inner: Box<dyn EngineConsumer>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .field("media_tag", &self.media_tag)
            .field("kind", &self.kind)
            .field("paused", &self.is_paused())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Consumer {
    fn new(
        peer_id: PeerId,
        media_tag: MediaTag,
        parameters: &ConsumerParameters,
        inner: Box<dyn EngineConsumer>,
    ) -> Self {
        Self {
            id: parameters.id.clone(),
            peer_id,
            media_tag,
            kind: parameters.kind,
            producer_id: parameters.producer_id.clone(),
            // The server creates consumers paused.
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            inner,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ConsumerId {
        &self.id
    }

    #[must_use]
    pub const fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    #[must_use]
    pub const fn media_tag(&self) -> &MediaTag {
        &self.media_tag
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub const fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    #[must_use]
    pub fn key(&self) -> TrackKey {
        TrackKey::new(self.peer_id.clone(), self.media_tag.clone())
    }

    #[must_use]
    pub fn track(&self) -> TrackHandle {
        self.inner.track()
    }

    #[must_use]
    pub fn render_target(&self) -> RenderTarget {
        RenderTarget::for_track(self.track())
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed without touching the engine; used when the owning
    /// transport was closed.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.close().await;
        }
    }
}

impl Session {
    /// Subscribe to `media_tag` of `peer_id`.
    ///
    /// Media is resumed only after the recv transport reports `connected`.
    /// Fails with [`ClientError::AlreadySubscribed`] when the pair is already
    /// subscribed or a subscribe for it is in flight.
    pub async fn subscribe(&self, peer_id: PeerId, media_tag: MediaTag) -> Result<Arc<Consumer>> {
        let epoch = self.inner.joined_epoch()?;

        let key = TrackKey::new(peer_id.clone(), media_tag.clone());
        let Some(reservation) = self.inner.consumers.reserve(key) else {
            return Err(ClientError::AlreadySubscribed { peer_id, media_tag });
        };

        let transport = self.create_transport(Direction::Recv).await?;
        let rtp_capabilities = self.inner.engine.rtp_capabilities()?;

        info!(peer_id = %peer_id, media_tag = %media_tag, "Subscribing to track");
        let parameters: ConsumerParameters = self
            .inner
            .signaling
            .request(
                Endpoint::RecvTrack,
                &RecvTrackRequest {
                    media_tag: media_tag.clone(),
                    media_peer_id: peer_id.clone(),
                    rtp_capabilities,
                },
            )
            .await?;

        let engine_consumer = match transport
            .consume(ConsumeOptions {
                parameters: parameters.clone(),
                app_data: AppData {
                    peer_id: Some(peer_id.clone()),
                    media_tag: media_tag.clone(),
                },
            })
            .await
        {
            Ok(engine_consumer) => engine_consumer,
            Err(e) => {
                warn!(consumer_id = %parameters.id, error = %e, "Engine refused consumer");
                // The server side already exists.
                if self.inner.is_current(epoch) {
                    let _ = self
                        .inner
                        .signaling
                        .notify(
                            Endpoint::CloseConsumer,
                            &ConsumerRequest {
                                consumer_id: parameters.id,
                            },
                        )
                        .await;
                }
                return Err(e.into());
            }
        };
        let consumer = Arc::new(Consumer::new(peer_id, media_tag, &parameters, engine_consumer));

        let config = &self.inner.config.transport;
        if let Err(e) = transport
            .wait_until_connected(config.poll_interval(), config.connect_timeout(), || {
                self.inner.is_current(epoch)
            })
            .await
        {
            warn!(consumer_id = %consumer.id(), error = %e, "Abandoning subscription");
            self.abandon_consumer(&consumer, epoch).await;
            return Err(e);
        }

        let _ = self.resume_consumer(&consumer).await;

        if !self.inner.is_current(epoch) {
            consumer.close().await;
            return Err(ClientError::SessionClosed);
        }
        if let Err(consumer) = reservation.commit(Arc::clone(&consumer)) {
            consumer.close().await;
            return Err(ClientError::SessionClosed);
        }

        info!(
            peer_id = %consumer.peer_id(),
            media_tag = %consumer.media_tag(),
            consumer_id = %consumer.id(),
            "Subscribed to track"
        );
        self.inner.emit(SessionEvent::ConsumerCreated {
            peer_id: consumer.peer_id().clone(),
            media_tag: consumer.media_tag().clone(),
            consumer_id: consumer.id().clone(),
        });
        Ok(consumer)
    }

    #[must_use]
    pub fn consumer(&self, peer_id: &PeerId, media_tag: &MediaTag) -> Option<Arc<Consumer>> {
        self.inner
            .consumers
            .get(&TrackKey::new(peer_id.clone(), media_tag.clone()))
    }

    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<Consumer>> {
        self.inner.consumers.values()
    }

    /// Pause a subscribed track: tell the server, then pause the engine
    /// consumer. Neither step's failure undoes the other.
    pub async fn pause_consumer(&self, consumer: &Consumer) -> BestEffort {
        if consumer.is_closed() {
            return BestEffort::Skipped;
        }
        debug!(consumer_id = %consumer.id(), "Pausing consumer");
        let server = self
            .inner
            .signaling
            .notify(Endpoint::PauseConsumer, &consumer_request(consumer))
            .await;
        consumer.paused.store(true, Ordering::Release);
        let local = BestEffort::from(consumer.inner.pause().await);
        if let Some(e) = local.error() {
            warn!(consumer_id = %consumer.id(), error = %e, "Engine failed to pause consumer");
        }
        server.and(local)
    }

    /// Resume a subscribed track
    pub async fn resume_consumer(&self, consumer: &Consumer) -> BestEffort {
        if consumer.is_closed() {
            return BestEffort::Skipped;
        }
        debug!(consumer_id = %consumer.id(), "Resuming consumer");
        let server = self
            .inner
            .signaling
            .notify(Endpoint::ResumeConsumer, &consumer_request(consumer))
            .await;
        consumer.paused.store(false, Ordering::Release);
        let local = BestEffort::from(consumer.inner.resume().await);
        if let Some(e) = local.error() {
            warn!(consumer_id = %consumer.id(), error = %e, "Engine failed to resume consumer");
        }
        server.and(local)
    }

    /// Drop the subscription to one track
    pub async fn unsubscribe(&self, peer_id: &PeerId, media_tag: &MediaTag) -> BestEffort {
        let key = TrackKey::new(peer_id.clone(), media_tag.clone());
        match self.inner.consumers.remove(&key) {
            Some(consumer) => self.retire_consumer(&consumer, CloseReason::Unsubscribed).await,
            None => BestEffort::Skipped,
        }
    }

    /// Drop every subscription to tracks of `peer_id`
    pub async fn unsubscribe_all(&self, peer_id: &PeerId) -> BestEffort {
        let removed = self
            .inner
            .consumers
            .remove_where(|key, _| &key.peer_id == peer_id);
        self.retire_consumers(removed, CloseReason::Unsubscribed).await
    }

    pub(crate) async fn retire_consumers(
        &self,
        consumers: Vec<Arc<Consumer>>,
        reason: CloseReason,
    ) -> BestEffort {
        let mut outcome = BestEffort::Skipped;
        for consumer in consumers {
            outcome = outcome.and(self.retire_consumer(&consumer, reason).await);
        }
        outcome
    }

    /// Close an already unregistered consumer and tell the server
    async fn retire_consumer(&self, consumer: &Consumer, reason: CloseReason) -> BestEffort {
        info!(
            peer_id = %consumer.peer_id(),
            media_tag = %consumer.media_tag(),
            consumer_id = %consumer.id(),
            reason = ?reason,
            "Closing consumer"
        );
        consumer.close().await;
        let outcome = self
            .inner
            .signaling
            .notify(Endpoint::CloseConsumer, &consumer_request(consumer))
            .await;

        self.inner.emit(SessionEvent::ConsumerClosed {
            peer_id: consumer.peer_id().clone(),
            media_tag: consumer.media_tag().clone(),
            consumer_id: consumer.id().clone(),
            reason,
        });
        outcome
    }

    async fn abandon_consumer(&self, consumer: &Consumer, epoch: u64) {
        consumer.close().await;
        // After a leave the server already dropped it.
        if self.inner.is_current(epoch) {
            let _ = self
                .inner
                .signaling
                .notify(Endpoint::CloseConsumer, &consumer_request(consumer))
                .await;
        }
    }
}

fn consumer_request(consumer: &Consumer) -> ConsumerRequest {
    ConsumerRequest {
        consumer_id: consumer.id().clone(),
    }
}
