//! Locally published tracks
//!
//! One producer per media tag. Publishing joins the room and creates the send
//! transport if needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{EngineProducer, ProduceOptions, TrackHandle};
use crate::error::{BestEffort, ClientError, Result};
use crate::events::SessionEvent;
use crate::protocol::{camera_simulcast_encodings, AppData, EncodingHint, Endpoint, ProducerRequest};
use crate::registry::Registry;
use crate::session::Session;
use crate::types::{Direction, MediaKind, MediaTag, ProducerId};

pub(crate) type ProducerRegistry = Registry<MediaTag, Arc<Producer>>;

/// A local track bound to the send transport
pub struct Producer {
    id: ProducerId,
    media_tag: MediaTag,
    kind: MediaKind,
    paused: AtomicBool,
    closed: AtomicBool,
    inner: Box<dyn EngineProducer>,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("media_tag", &self.media_tag)
            .field("kind", &self.kind)
            .field("paused", &self.is_paused())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Producer {
    fn new(media_tag: MediaTag, inner: Box<dyn EngineProducer>, paused: bool) -> Self {
        Self {
            id: inner.id(),
            kind: inner.kind(),
            media_tag,
            paused: AtomicBool::new(paused),
            closed: AtomicBool::new(false),
            inner,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ProducerId {
        &self.id
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

/// Options for [`Session::publish`]
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Per-layer encodings; empty sends a single layer
    pub encodings: Vec<EncodingHint>,
    /// Ask the server to create the producer paused
    pub start_paused: bool,
}

/// Local camera tracks to publish together
#[derive(Debug, Clone, Default)]
pub struct CameraStream {
    pub video: Option<TrackHandle>,
    pub audio: Option<TrackHandle>,
}

impl Session {
    /// Publish `track` under `media_tag`, joining and creating the send
    /// transport first when needed.
    pub async fn publish(
        &self,
        track: TrackHandle,
        media_tag: MediaTag,
        options: PublishOptions,
    ) -> Result<Arc<Producer>> {
        self.join().await?;
        let epoch = self.inner.joined_epoch()?;

        let Some(reservation) = self.inner.producers.reserve(media_tag.clone()) else {
            return Err(ClientError::AlreadyPublished { media_tag });
        };

        let transport = self.create_transport(Direction::Send).await?;

        info!(media_tag = %media_tag, track = %track.id, kind = %track.kind, "Publishing track");
        let engine_producer = transport
            .produce(ProduceOptions {
                track,
                encodings: options.encodings,
                app_data: AppData {
                    peer_id: None,
                    media_tag: media_tag.clone(),
                },
                paused: options.start_paused,
            })
            .await?;
        let producer = Arc::new(Producer::new(
            media_tag.clone(),
            engine_producer,
            options.start_paused,
        ));

        if !self.inner.is_current(epoch) {
            producer.close().await;
            return Err(ClientError::SessionClosed);
        }
        if let Err(producer) = reservation.commit(Arc::clone(&producer)) {
            producer.close().await;
            return Err(ClientError::SessionClosed);
        }

        info!(media_tag = %media_tag, producer_id = %producer.id(), "Track published");
        self.inner.emit(SessionEvent::ProducerCreated {
            media_tag,
            producer_id: producer.id().clone(),
        });
        Ok(producer)
    }

    /// Publish camera video (two-layer simulcast) and audio. Absent tracks
    /// are skipped.
    pub async fn publish_camera(&self, camera: CameraStream) -> Result<Vec<Arc<Producer>>> {
        self.join().await?;

        let mut producers = Vec::with_capacity(2);
        if let Some(video) = camera.video {
            let options = PublishOptions {
                encodings: camera_simulcast_encodings(),
                start_paused: false,
            };
            producers.push(self.publish(video, MediaTag::cam_video(), options).await?);
        }
        if let Some(audio) = camera.audio {
            producers.push(
                self.publish(audio, MediaTag::cam_audio(), PublishOptions::default())
                    .await?,
            );
        }
        Ok(producers)
    }

    #[must_use]
    pub fn producer(&self, media_tag: &MediaTag) -> Option<Arc<Producer>> {
        self.inner.producers.get(media_tag)
    }

    #[must_use]
    pub fn producers(&self) -> Vec<Arc<Producer>> {
        self.inner.producers.values()
    }

    /// Pause a published track: tell the server, then pause locally. Neither
    /// step's failure undoes the other.
    pub async fn pause_producer(&self, producer: &Producer) -> BestEffort {
        if producer.is_closed() {
            return BestEffort::Skipped;
        }
        debug!(producer_id = %producer.id(), "Pausing producer");
        let server = self
            .inner
            .signaling
            .notify(Endpoint::PauseProducer, &producer_request(producer))
            .await;
        producer.paused.store(true, Ordering::Release);
        let local = BestEffort::from(producer.inner.pause().await);
        if let Some(e) = local.error() {
            warn!(producer_id = %producer.id(), error = %e, "Engine failed to pause producer");
        }
        server.and(local)
    }

    /// Resume a paused published track
    pub async fn resume_producer(&self, producer: &Producer) -> BestEffort {
        if producer.is_closed() {
            return BestEffort::Skipped;
        }
        debug!(producer_id = %producer.id(), "Resuming producer");
        let server = self
            .inner
            .signaling
            .notify(Endpoint::ResumeProducer, &producer_request(producer))
            .await;
        producer.paused.store(false, Ordering::Release);
        let local = BestEffort::from(producer.inner.resume().await);
        if let Some(e) = local.error() {
            warn!(producer_id = %producer.id(), error = %e, "Engine failed to resume producer");
        }
        server.and(local)
    }

    /// Stop publishing `media_tag` and free the tag for a new publish
    pub async fn unpublish(&self, media_tag: &MediaTag) -> BestEffort {
        let Some(producer) = self.inner.producers.remove(media_tag) else {
            return BestEffort::Skipped;
        };

        info!(media_tag = %media_tag, producer_id = %producer.id(), "Unpublishing track");
        producer.close().await;
        let outcome = self
            .inner
            .signaling
            .notify(Endpoint::CloseProducer, &producer_request(&producer))
            .await;

        self.inner.emit(SessionEvent::ProducerClosed {
            media_tag: media_tag.clone(),
            producer_id: producer.id().clone(),
        });
        outcome
    }
}

fn producer_request(producer: &Producer) -> ProducerRequest {
    ProducerRequest {
        producer_id: producer.id().clone(),
    }
}
