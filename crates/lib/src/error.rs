//! Error taxonomy shared by the router, the reply adapter and the Slack gateway.

use thiserror::Error;

/// Failure posting a message to a channel. Never retried by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostError {
    #[error("rate limited by slack (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("slack api error: {0}")]
    Api(String),
}

impl PostError {
    /// Map a Slack Web API error code (the `error` field of an `ok: false` response).
    pub fn from_slack_code(code: &str) -> Self {
        match code {
            "ratelimited" | "rate_limited" => PostError::RateLimited {
                retry_after_secs: None,
            },
            "not_authed" | "invalid_auth" | "account_inactive" | "token_revoked"
            | "token_expired" | "missing_scope" | "no_permission" => {
                PostError::Unauthorized(code.to_string())
            }
            "channel_not_found" | "not_in_channel" => PostError::ChannelNotFound(code.to_string()),
            other => PostError::Api(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for PostError {
    fn from(err: reqwest::Error) -> Self {
        PostError::NetworkError(err.to_string())
    }
}

/// A session could not be created for a channel; the triggering event is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionCreationError {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("session dependency unavailable: {0}")]
    Unavailable(String),
    #[error("router is shutting down")]
    ShuttingDown,
}

/// Transient Socket Mode failure; the socket loop reconnects with backoff.
#[derive(Debug, Error)]
pub enum GatewayConnectionError {
    #[error("apps.connections.open failed: {0}")]
    Open(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack requested disconnect: {0}")]
    Disconnect(String),
}

/// A pipeline turn failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model backend error: {0}")]
    Backend(String),
    #[error("session closed")]
    Closed,
    #[error("pipeline panicked")]
    Panicked,
}
