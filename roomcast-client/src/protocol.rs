//! Signaling wire format
//!
//! Request and response bodies for every signaling endpoint. RTP and DTLS
//! blobs are opaque to this crate and are carried as raw JSON for the media
//! engine to interpret.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ConsumerId, Direction, MediaKind, MediaTag, PeerId, ProducerId, TransportId};

/// Signaling endpoints, one per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    JoinAsNewPeer,
    Sync,
    CreateTransport,
    ConnectTransport,
    SendTrack,
    RecvTrack,
    PauseConsumer,
    ResumeConsumer,
    CloseConsumer,
    PauseProducer,
    ResumeProducer,
    CloseProducer,
    Leave,
}

impl Endpoint {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::JoinAsNewPeer => "join-as-new-peer",
            Self::Sync => "sync",
            Self::CreateTransport => "create-transport",
            Self::ConnectTransport => "connect-transport",
            Self::SendTrack => "send-track",
            Self::RecvTrack => "recv-track",
            Self::PauseConsumer => "pause-consumer",
            Self::ResumeConsumer => "resume-consumer",
            Self::CloseConsumer => "close-consumer",
            Self::PauseProducer => "pause-producer",
            Self::ResumeProducer => "resume-producer",
            Self::CloseProducer => "close-producer",
            Self::Leave => "leave",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router RTP capabilities asserted by the server at join time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

/// RTP parameters of one producer or consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

/// DTLS parameters exchanged during transport connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

/// Per-layer encoding hint for a published track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EncodingHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
}

/// Two-layer simulcast used for camera video: a quarter-scale low layer and a
/// full-scale high layer.
#[must_use]
pub fn camera_simulcast_encodings() -> Vec<EncodingHint> {
    vec![
        EncodingHint {
            max_bitrate: Some(96_000),
            scale_resolution_down_by: Some(4.0),
        },
        EncodingHint {
            max_bitrate: Some(680_000),
            scale_resolution_down_by: Some(1.0),
        },
    ]
}

/// Application data attached to producers and consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
    pub media_tag: MediaTag,
}

/// Request body for endpoints that carry nothing beyond the peer id
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub router_rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTransportRequest {
    pub direction: Direction,
}

/// Server-side transport parameters used to build the local transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: TransportId,
    #[serde(default)]
    pub ice_parameters: Value,
    #[serde(default)]
    pub ice_candidates: Value,
    #[serde(default)]
    pub dtls_parameters: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportResponse {
    pub transport_options: TransportOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTrackRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    pub app_data: AppData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendTrackResponse {
    pub id: ProducerId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecvTrackRequest {
    pub media_tag: MediaTag,
    pub media_peer_id: PeerId,
    pub rtp_capabilities: RtpCapabilities,
}

/// Server-side consumer parameters returned by `recv-track`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParameters {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub rtp_parameters: RtpParameters,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub consumer_type: Option<String>,
    #[serde(default)]
    pub producer_paused: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRequest {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    pub producer_id: ProducerId,
}

/// Descriptor of one track a peer is offering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encodings: Option<Value>,
}

/// Remote participant as reported by the latest sync
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: PeerId,
    pub join_ts: i64,
    pub last_seen_ts: Option<i64>,
    pub media: BTreeMap<MediaTag, TrackInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerRecord {
    #[serde(default)]
    join_ts: i64,
    #[serde(default)]
    last_seen_ts: Option<i64>,
    #[serde(default)]
    media: BTreeMap<MediaTag, TrackInfo>,
}

/// Server-computed dominant audio source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSpeaker {
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    #[serde(default)]
    pub producer_id: Option<ProducerId>,
    #[serde(default)]
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    #[serde(default)]
    peers: HashMap<PeerId, PeerRecord>,
    #[serde(default)]
    pub active_speaker: Option<ActiveSpeaker>,
}

impl SyncResponse {
    /// Split into the peer snapshot and the active speaker
    #[must_use]
    pub fn into_parts(self) -> (HashMap<PeerId, Peer>, Option<ActiveSpeaker>) {
        let peers = self
            .peers
            .into_iter()
            .map(|(id, record)| {
                let peer = Peer {
                    id: id.clone(),
                    join_ts: record.join_ts,
                    last_seen_ts: record.last_seen_ts,
                    media: record.media,
                };
                (id, peer)
            })
            .collect();
        (peers, self.active_speaker)
    }
}
