//! Roomcast SFU session client
//!
//! Control-plane client for a room brokered by a selective forwarding unit.
//! It joins the room over HTTP signaling, negotiates one send and one recv
//! transport, publishes local tracks, subscribes to remote ones, and polls the
//! server to retire consumers whose source went away.
//!
//! ## Architecture
//!
//! - **`SignalingChannel`**: JSON-over-HTTP request/response to the server
//! - **`MediaEngine`**: capability surface of the platform media stack
//! - **`Session`**: membership lifecycle and owner of all session state
//! - **`Transport`**: one unidirectional media path, created lazily
//! - **`Producer`** / **`Consumer`**: published and subscribed tracks
//! - **`SyncHandle`**: cancellable reconciliation loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roomcast_client::{ClientConfig, HeadlessEngine, Session};
//!
//! let session = Session::new(ClientConfig::load(None)?, Arc::new(HeadlessEngine::new()))?;
//! session.join().await?;
//! session.sync().await?;
//! for stream in session.peer_streams() {
//!     println!("{} {}", stream.peer_id, stream.media_tag);
//! }
//! session.leave().await;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod signaling;
pub mod types;

mod consumer;
mod producer;
mod registry;
mod session;
mod sync;
mod transport;

pub use config::ClientConfig;
pub use consumer::{Consumer, RenderTarget};
pub use engine::{HeadlessEngine, MediaEngine, TrackHandle};
pub use error::{BestEffort, ClientError, EngineError, Result, SignalError};
pub use events::{CloseReason, SessionEvent};
pub use producer::{CameraStream, Producer, PublishOptions};
pub use session::{Session, SessionPhase};
pub use signaling::SignalingChannel;
pub use sync::{PeerStream, SyncHandle, SyncReport, MIN_SYNC_INTERVAL};
pub use transport::Transport;
pub use types::{ConnectionState, Direction, MediaKind, MediaTag, PeerId, TrackKey};
