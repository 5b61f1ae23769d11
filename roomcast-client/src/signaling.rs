//! HTTP signaling channel
//!
//! Every operation is a JSON `POST` to `{base}{prefix}/{endpoint}` whose body
//! is the operation payload with the caller's `peerId` merged in. The server
//! reports failures through an `error` field in an otherwise normal body.

use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{BestEffort, SignalError, MAX_RESPONSE_SIZE};
use crate::protocol::Endpoint;
use crate::types::PeerId;

/// Request/response channel to the session server
#[derive(Debug, Clone)]
pub struct SignalingChannel {
    config: ClientConfig,
    peer_id: PeerId,
    client: Client,
}

impl SignalingChannel {
    /// Build a channel with its own connection pool
    pub fn new(config: ClientConfig, peer_id: PeerId) -> Result<Self, SignalError> {
        let client = Client::builder()
            .connect_timeout(config.signaling.connect_timeout())
            .timeout(config.signaling.request_timeout())
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| SignalError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config,
            peer_id,
            client,
        })
    }

    #[must_use]
    pub const fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Send `payload` to `endpoint` and decode the response body.
    ///
    /// Responses carrying a non-null `error` field become
    /// [`SignalError::Server`].
    pub async fn request<Req, Resp>(
        &self,
        endpoint: Endpoint,
        payload: &Req,
    ) -> Result<Resp, SignalError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = self.merge_peer_id(payload)?;
        let url = self.config.endpoint_url(endpoint.as_str());
        debug!(endpoint = %endpoint, "Signaling request");

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        let value: Value = match json_with_limit(response).await {
            Ok(value) => value,
            Err(SignalError::Parse(_)) if !status.is_success() => {
                return Err(SignalError::Http { status, url });
            }
            Err(e) => return Err(e),
        };

        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            return Err(SignalError::Server {
                endpoint: endpoint.as_str(),
                message: render_error(error),
            });
        }

        if !status.is_success() {
            return Err(SignalError::Http { status, url });
        }

        serde_json::from_value(value).map_err(|e| SignalError::Parse(format!("{endpoint}: {e}")))
    }

    /// Send a request whose response carries nothing but a possible `error`
    pub async fn call<Req>(&self, endpoint: Endpoint, payload: &Req) -> Result<(), SignalError>
    where
        Req: Serialize + ?Sized,
    {
        self.request::<Req, IgnoredAny>(endpoint, payload).await.map(|_| ())
    }

    /// Fire-and-forget notification; failures are logged and handed back as
    /// a [`BestEffort`] so they cannot abort the caller.
    pub async fn notify<Req>(&self, endpoint: Endpoint, payload: &Req) -> BestEffort
    where
        Req: Serialize + ?Sized,
    {
        match self.call(endpoint, payload).await {
            Ok(()) => BestEffort::Done,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Signaling notification failed");
                BestEffort::Failed(e.into())
            }
        }
    }

    fn merge_peer_id<Req: Serialize + ?Sized>(&self, payload: &Req) -> Result<Value, SignalError> {
        let mut body = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(SignalError::Parse(format!(
                    "signaling payload must be a JSON object, got {other}"
                )))
            }
        };
        body.insert(
            "peerId".to_string(),
            Value::String(self.peer_id.as_str().to_string()),
        );
        Ok(Value::Object(body))
    }
}

/// Read a response body with size limit and parse it as JSON.
async fn json_with_limit(response: reqwest::Response) -> Result<Value, SignalError> {
    if let Some(cl) = response.content_length() {
        if cl as usize > MAX_RESPONSE_SIZE {
            return Err(SignalError::ResponseTooLarge { size: cl });
        }
    }
    let bytes = response.bytes().await?;
    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(SignalError::ResponseTooLarge {
            size: bytes.len() as u64,
        });
    }
    serde_json::from_slice(&bytes).map_err(Into::into)
}

fn render_error(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), ToString::to_string),
        other => other.to_string(),
    }
}
