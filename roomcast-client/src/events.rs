//! Session events
//!
//! Broadcast to every subscriber; lagging receivers lose the oldest events.

use serde::Serialize;

use crate::protocol::ActiveSpeaker;
use crate::types::{
    ConnectionState, ConsumerId, Direction, MediaTag, PeerId, ProducerId, TransportId,
};

/// Why a consumer was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The publishing peer is gone from the latest sync
    PeerDeparted,
    /// The peer stopped advertising the track
    TrackRetracted,
    /// The caller unsubscribed
    Unsubscribed,
    /// The session left the room
    SessionLeft,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Joined {
        peer_id: PeerId,
    },
    Left {
        peer_id: PeerId,
    },
    TransportCreated {
        direction: Direction,
        transport_id: TransportId,
    },
    TransportStateChanged {
        direction: Direction,
        state: ConnectionState,
    },
    ProducerCreated {
        media_tag: MediaTag,
        producer_id: ProducerId,
    },
    ProducerClosed {
        media_tag: MediaTag,
        producer_id: ProducerId,
    },
    ConsumerCreated {
        peer_id: PeerId,
        media_tag: MediaTag,
        consumer_id: ConsumerId,
    },
    ConsumerClosed {
        peer_id: PeerId,
        media_tag: MediaTag,
        consumer_id: ConsumerId,
        reason: CloseReason,
    },
    PeerDeparted {
        peer_id: PeerId,
    },
    ActiveSpeakerChanged {
        speaker: Option<ActiveSpeaker>,
    },
}
