//! Reconciliation against server state
//!
//! The server has no push channel, so the client polls `sync` and diffs the
//! result against the previous snapshot. Consumers whose peer left, or whose
//! track is no longer advertised, are torn down in the same cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::events::{CloseReason, SessionEvent};
use crate::protocol::{ActiveSpeaker, Empty, Endpoint, Peer, SyncResponse, TrackInfo};
use crate::session::Session;
use crate::types::{MediaTag, PeerId, TrackKey};

/// Shortest period the reconciliation loop will run at
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_millis(10);

/// What one reconciliation cycle changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Peers present in the previous snapshot but not in this one
    pub departed: Vec<PeerId>,
    /// Consumers torn down this cycle
    pub retired: Vec<TrackKey>,
    pub active_speaker: Option<ActiveSpeaker>,
}

/// One subscribable remote track
#[derive(Debug, Clone, PartialEq)]
pub struct PeerStream {
    pub peer_id: PeerId,
    pub media_tag: MediaTag,
    pub info: TrackInfo,
}

impl Session {
    /// Run one reconciliation cycle.
    ///
    /// A failed `sync` request changes nothing locally.
    pub async fn sync(&self) -> Result<SyncReport> {
        let epoch = self.inner.joined_epoch()?;

        let response: SyncResponse = self
            .inner
            .signaling
            .request(Endpoint::Sync, &Empty {})
            .await
            .inspect_err(|e| warn!(error = %e, "Sync failed"))?;
        let (peers, active_speaker) = response.into_parts();

        if !self.inner.is_current(epoch) {
            return Err(ClientError::SessionClosed);
        }

        let departed: Vec<PeerId> = self
            .inner
            .state
            .read()
            .last_sync
            .keys()
            .filter(|id| !peers.contains_key(*id))
            .cloned()
            .collect();

        let mut retired = Vec::new();
        for peer_id in &departed {
            info!(peer_id = %peer_id, "Peer has exited");
            self.inner.emit(SessionEvent::PeerDeparted {
                peer_id: peer_id.clone(),
            });
            let removed = self
                .inner
                .consumers
                .remove_where(|key, _| &key.peer_id == peer_id);
            retired.extend(removed.iter().map(|consumer| consumer.key()));
            let _ = self.retire_consumers(removed, CloseReason::PeerDeparted).await;
        }

        let retracted = self
            .inner
            .consumers
            .remove_where(|key, _| !is_advertised(&peers, key));
        for consumer in &retracted {
            info!(
                peer_id = %consumer.peer_id(),
                media_tag = %consumer.media_tag(),
                "Peer stopped transmitting track"
            );
        }
        retired.extend(retracted.iter().map(|consumer| consumer.key()));
        let _ = self.retire_consumers(retracted, CloseReason::TrackRetracted).await;

        let speaker_changed = {
            let mut state = self.inner.state.write();
            if !state.is_joined_in(epoch) {
                return Err(ClientError::SessionClosed);
            }
            state.last_sync = peers;
            let changed = state.active_speaker != active_speaker;
            state.active_speaker.clone_from(&active_speaker);
            changed
        };
        if speaker_changed {
            self.inner.emit(SessionEvent::ActiveSpeakerChanged {
                speaker: active_speaker.clone(),
            });
        }

        debug!(departed = departed.len(), retired = retired.len(), "Sync complete");
        Ok(SyncReport {
            departed,
            retired,
            active_speaker,
        })
    }

    /// Subscribable remote tracks from the latest snapshot, oldest peer first.
    /// The local peer's own tracks are excluded.
    #[must_use]
    pub fn peer_streams(&self) -> Vec<PeerStream> {
        let state = self.inner.state.read();
        let mut peers: Vec<&Peer> = state
            .last_sync
            .values()
            .filter(|peer| &peer.id != self.peer_id())
            .collect();
        peers.sort_by(|a, b| a.join_ts.cmp(&b.join_ts).then_with(|| a.id.cmp(&b.id)));

        peers
            .into_iter()
            .flat_map(|peer| {
                peer.media.iter().map(|(media_tag, info)| PeerStream {
                    peer_id: peer.id.clone(),
                    media_tag: media_tag.clone(),
                    info: info.clone(),
                })
            })
            .collect()
    }

    /// Latest peer snapshot
    #[must_use]
    pub fn snapshot(&self) -> HashMap<PeerId, Peer> {
        self.inner.state.read().last_sync.clone()
    }

    #[must_use]
    pub fn active_speaker(&self) -> Option<ActiveSpeaker> {
        self.inner.state.read().active_speaker.clone()
    }

    /// Start the reconciliation loop at the configured interval
    #[must_use]
    pub fn start_sync(&self) -> SyncHandle {
        self.start_sync_every(self.inner.config.sync.interval())
    }

    /// Start the reconciliation loop at `period`.
    ///
    /// Cycles are skipped while not joined. The loop ends when the handle is
    /// cancelled, stopped or dropped, or when the session itself is dropped.
    /// Periods shorter than [`MIN_SYNC_INTERVAL`] are raised to it.
    #[must_use]
    pub fn start_sync_every(&self, period: Duration) -> SyncHandle {
        if period < MIN_SYNC_INTERVAL {
            warn!(
                requested = ?period,
                minimum = ?MIN_SYNC_INTERVAL,
                "Sync interval too short, raising to the minimum"
            );
        }
        let period = period.max(MIN_SYNC_INTERVAL);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let session = Arc::downgrade(&self.inner);

        info!(interval = ?period, "Starting reconciliation loop");
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!("Reconciliation loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(inner) = session.upgrade() else {
                            break;
                        };
                        let live = Session::from_inner(inner);
                        if !live.is_joined() {
                            continue;
                        }
                        if let Err(e) = live.sync().await {
                            debug!(error = %e, "Reconciliation cycle failed");
                        }
                    }
                }
            }
        });

        SyncHandle {
            cancel,
            task: Some(task),
        }
    }
}

fn is_advertised(peers: &HashMap<PeerId, Peer>, key: &TrackKey) -> bool {
    peers
        .get(&key.peer_id)
        .is_some_and(|peer| peer.media.contains_key(&key.media_tag))
}

/// Handle to a running reconciliation loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct SyncHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Schedule no further cycles. A cycle already running may finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the loop task to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Reconciliation loop task failed");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
