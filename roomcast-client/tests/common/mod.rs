//! Shared fixtures: a scriptable media engine and a wiremock signaling server

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use roomcast_client::engine::{
    ConsumeOptions, EngineConsumer, EngineProducer, EngineTransport, MediaEngine, ProduceOptions,
    ProduceRequest, TrackHandle, TransportHooks,
};
use roomcast_client::protocol::{DtlsParameters, RtpCapabilities, RtpParameters, TransportOptions};
use roomcast_client::types::{ConsumerId, ProducerId, TransportId};
use roomcast_client::{ClientConfig, ConnectionState, Direction, EngineError, MediaKind, Session};

// ---------------------------------------------------------------------------
// Fake media engine
// ---------------------------------------------------------------------------

/// Engine whose transports connect on first use (or on command)
#[derive(Default)]
pub struct FakeEngine {
    auto_connect: bool,
    unsupported: bool,
    refuse_consume: Arc<AtomicBool>,
    loads: AtomicUsize,
    loaded: AtomicBool,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeEngine {
    /// Transports reach `connected` right after the connect round trip
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: true,
            ..Self::default()
        })
    }

    /// Transports stay `connecting` until the test calls `set_state`
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            unsupported: true,
            ..Self::default()
        })
    }

    /// Every later `consume` fails as if the codec were unsupported
    pub fn refuse_consumers(&self) {
        self.refuse_consume.store(true, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn transport_count(&self) -> usize {
        self.transports.lock().len()
    }

    /// Most recently created transport for `direction`
    pub fn transport(&self, direction: Direction) -> Option<Arc<FakeTransport>> {
        self.transports
            .lock()
            .iter()
            .rev()
            .find(|transport| transport.direction == direction)
            .cloned()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn check_supported(&self) -> Result<(), EngineError> {
        if self.unsupported {
            Err(EngineError::Unsupported("no media stack".to_string()))
        } else {
            Ok(())
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn load(&self, _router_capabilities: &RtpCapabilities) -> Result<(), EngineError> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyLoaded);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rtp_capabilities(&self) -> Result<RtpCapabilities, EngineError> {
        if !self.is_loaded() {
            return Err(EngineError::NotLoaded);
        }
        Ok(RtpCapabilities(json!({ "codecs": [{ "mimeType": "video/VP8" }] })))
    }

    async fn create_transport(
        &self,
        direction: Direction,
        options: &TransportOptions,
        hooks: Arc<dyn TransportHooks>,
    ) -> Result<Box<dyn EngineTransport>, EngineError> {
        let transport = Arc::new(FakeTransport {
            id: options.id.clone(),
            direction,
            auto_connect: self.auto_connect,
            refuse_consume: Arc::clone(&self.refuse_consume),
            state: Mutex::new(ConnectionState::New),
            hooks,
            connected_once: tokio::sync::Mutex::new(false),
        });
        self.transports.lock().push(Arc::clone(&transport));
        Ok(Box::new(TransportHandle(transport)))
    }
}

pub struct FakeTransport {
    pub id: TransportId,
    pub direction: Direction,
    auto_connect: bool,
    refuse_consume: Arc<AtomicBool>,
    state: Mutex<ConnectionState>,
    hooks: Arc<dyn TransportHooks>,
    connected_once: tokio::sync::Mutex<bool>,
}

impl FakeTransport {
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `state` and fire the state-change hook
    pub async fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        self.hooks.on_connection_state_change(state).await;
    }

    async fn ensure_connected(&self) -> Result<(), EngineError> {
        let mut connected = self.connected_once.lock().await;
        if *connected {
            return Ok(());
        }
        self.hooks
            .on_connect(DtlsParameters(json!({ "role": "client" })))
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        *connected = true;
        drop(connected);

        self.set_state(ConnectionState::Connecting).await;
        if self.auto_connect {
            self.set_state(ConnectionState::Connected).await;
        }
        Ok(())
    }
}

struct TransportHandle(Arc<FakeTransport>);

#[async_trait]
impl EngineTransport for TransportHandle {
    fn id(&self) -> TransportId {
        self.0.id.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        self.0.state()
    }

    async fn produce(
        &self,
        options: ProduceOptions,
    ) -> Result<Box<dyn EngineProducer>, EngineError> {
        self.0.ensure_connected().await?;
        let request = ProduceRequest {
            kind: options.track.kind,
            rtp_parameters: RtpParameters(json!({ "encodings": options.encodings })),
            app_data: options.app_data,
            paused: options.paused,
        };
        let id = self
            .0
            .hooks
            .on_produce(request)
            .await
            .map_err(|e| EngineError::Negotiation(e.to_string()))?;
        Ok(Box::new(FakeProducer {
            id,
            kind: options.track.kind,
            closed: AtomicBool::new(false),
        }))
    }

    async fn consume(
        &self,
        options: ConsumeOptions,
    ) -> Result<Box<dyn EngineConsumer>, EngineError> {
        self.0.ensure_connected().await?;
        if self.0.refuse_consume.load(Ordering::SeqCst) {
            return Err(EngineError::Negotiation("unsupported codec".to_string()));
        }
        let parameters = options.parameters;
        Ok(Box::new(FakeConsumer {
            track: TrackHandle::new(format!("track-{}", parameters.id), parameters.kind),
            id: parameters.id,
            kind: parameters.kind,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        *self.0.state.lock() = ConnectionState::Closed;
    }
}

struct FakeProducer {
    id: ProducerId,
    kind: MediaKind,
    closed: AtomicBool,
}

#[async_trait]
impl EngineProducer for FakeProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn pause(&self) -> Result<(), EngineError> {
        closed_check(&self.closed)
    }

    async fn resume(&self) -> Result<(), EngineError> {
        closed_check(&self.closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeConsumer {
    id: ConsumerId,
    kind: MediaKind,
    track: TrackHandle,
    closed: AtomicBool,
}

#[async_trait]
impl EngineConsumer for FakeConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> TrackHandle {
        self.track.clone()
    }

    async fn pause(&self) -> Result<(), EngineError> {
        closed_check(&self.closed)
    }

    async fn resume(&self) -> Result<(), EngineError> {
        closed_check(&self.closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn closed_check(closed: &AtomicBool) -> Result<(), EngineError> {
    if closed.load(Ordering::SeqCst) {
        Err(EngineError::Closed)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signaling server
// ---------------------------------------------------------------------------

pub fn endpoint(name: &str) -> String {
    format!("/signaling/{name}")
}

pub fn router_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    })
}

pub fn config_for(server: &MockServer, peer_id: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.signaling.base_url = server.uri();
    config.peer_id = Some(peer_id.to_string());
    config.transport.connect_poll_interval_ms = 10;
    config
}

pub fn session_for(server: &MockServer, peer_id: &str, engine: Arc<FakeEngine>) -> Session {
    Session::new(config_for(server, peer_id), engine).unwrap()
}

fn post(name: &str) -> wiremock::MockBuilder {
    Mock::given(method("POST")).and(path(endpoint(name)))
}

fn json_response(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

pub fn join_mock() -> Mock {
    post("join-as-new-peer")
        .respond_with(json_response(json!({ "routerRtpCapabilities": router_capabilities() })))
}

pub fn create_transport_mock(direction: Direction) -> Mock {
    post("create-transport")
        .and(body_partial_json(json!({ "direction": direction.as_str() })))
        .respond_with(json_response(json!({
            "transportOptions": {
                "id": format!("{direction}-transport"),
                "iceParameters": { "usernameFragment": "u", "password": "p" },
                "iceCandidates": [],
                "dtlsParameters": { "role": "auto", "fingerprints": [] }
            }
        })))
}

/// Endpoint that answers `{}`
pub fn ok_mock(name: &str) -> Mock {
    post(name).respond_with(json_response(json!({})))
}

/// Endpoint that answers with an `error` field
pub fn error_mock(name: &str, message: &str) -> Mock {
    post(name).respond_with(json_response(json!({ "error": message })))
}

pub fn send_track_mock(media_tag: &str) -> Mock {
    post("send-track")
        .and(body_partial_json(json!({ "appData": { "mediaTag": media_tag } })))
        .respond_with(json_response(json!({ "id": format!("prod-{media_tag}") })))
}

pub fn consumer_id(peer_id: &str, media_tag: &str) -> String {
    format!("cons-{peer_id}-{media_tag}")
}

pub fn recv_track_mock(peer_id: &str, media_tag: &str, kind: &str) -> Mock {
    post("recv-track")
        .and(body_partial_json(
            json!({ "mediaPeerId": peer_id, "mediaTag": media_tag }),
        ))
        .respond_with(json_response(json!({
            "producerId": format!("prod-{media_tag}"),
            "id": consumer_id(peer_id, media_tag),
            "kind": kind,
            "rtpParameters": { "codecs": [] },
            "type": "simple",
            "producerPaused": false
        })))
}

pub fn sync_mock(body: Value) -> Mock {
    post("sync").respond_with(json_response(body))
}

/// `sync` body from `(peer, join_ts, tags)` triples
pub fn sync_body(peers: &[(&str, i64, Vec<&str>)], active_speaker: Option<&str>) -> Value {
    let peers: serde_json::Map<String, Value> = peers
        .iter()
        .map(|(id, join_ts, tags)| {
            let media: serde_json::Map<String, Value> = tags
                .iter()
                .map(|tag| ((*tag).to_string(), json!({ "paused": false })))
                .collect();
            (
                (*id).to_string(),
                json!({ "joinTs": join_ts, "lastSeenTs": join_ts, "media": media }),
            )
        })
        .collect();
    json!({
        "peers": peers,
        "activeSpeaker": { "peerId": active_speaker, "producerId": null, "volume": null }
    })
}

/// Everything a well-behaved room server answers. Mount test-specific mocks
/// first; earlier mounts take precedence.
pub async fn mount_room(server: &MockServer) {
    join_mock().mount(server).await;
    create_transport_mock(Direction::Send).mount(server).await;
    create_transport_mock(Direction::Recv).mount(server).await;
    for name in [
        "connect-transport",
        "pause-consumer",
        "resume-consumer",
        "close-consumer",
        "pause-producer",
        "resume-producer",
        "close-producer",
        "leave",
    ] {
        ok_mock(name).mount(server).await;
    }
}

/// JSON bodies received by one endpoint, oldest first
pub async fn requests_to(server: &MockServer, name: &str) -> Vec<Value> {
    let wanted = endpoint(name);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == wanted)
        .map(|request| serde_json::from_slice(&request.body).unwrap_or(Value::Null))
        .collect()
}

/// Endpoint names in arrival order
pub async fn request_log(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|request| {
            request
                .url
                .path()
                .trim_start_matches("/signaling/")
                .to_string()
        })
        .collect()
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn video_track() -> TrackHandle {
    TrackHandle::new("camera-video", MediaKind::Video)
}

pub fn audio_track() -> TrackHandle {
    TrackHandle::new("camera-audio", MediaKind::Audio)
}
