//! Slack Web API client: chat.postMessage/update/delete, reactions, auth.test and
//! apps.connections.open.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{GatewayConnectionError, PostError};
use crate::message::{ChatOutbound, MessageRef, OutboundReply, TextFormat};

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Resolve the Web API base URL (SLACK_API_BASE env for tests or proxies).
pub fn slack_api_base() -> String {
    std::env::var("SLACK_API_BASE").unwrap_or_else(|_| SLACK_API_BASE.to_string())
}

/// Identity of the bot token (auth.test).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    pub user_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    channel: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    ok: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct SlackClient {
    base_url: String,
    bot_token: String,
    app_token: Option<String>,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(bot_token: impl Into<String>, app_token: Option<String>) -> Self {
        Self::with_base_url(slack_api_base(), bot_token, app_token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        bot_token: impl Into<String>,
        app_token: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            app_token,
            client: reqwest::Client::new(),
        }
    }

    /// POST a JSON body to a Web API method with the bot token; returns the raw JSON on `ok: true`.
    async fn call(&self, method: &str, body: &serde_json::Value) -> Result<serde_json::Value, PostError> {
        let url = format!("{}/{}", self.base_url, method);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(body)
            .send()
            .await?;

        let status = res.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = res
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            return Err(PostError::RateLimited { retry_after_secs });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PostError::Unauthorized(format!("{} returned {}", method, status)));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(PostError::Api(format!("{} failed: {} {}", method, status, body)));
        }

        let value: serde_json::Value = res.json().await?;
        let envelope: ApiEnvelope = serde_json::from_value(value.clone())
            .map_err(|e| PostError::Api(format!("{}: malformed response: {}", method, e)))?;
        if !envelope.ok {
            let code = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(PostError::from_slack_code(&code));
        }
        Ok(value)
    }

    /// auth.test: resolve the bot's own user id (used to ignore its own messages).
    pub async fn auth_test(&self) -> Result<BotIdentity, PostError> {
        let value = self.call("auth.test", &json!({})).await?;
        serde_json::from_value(value)
            .map_err(|e| PostError::Api(format!("auth.test: malformed response: {}", e)))
    }

    /// apps.connections.open with the app-level token: a fresh Socket Mode WebSocket URL.
    pub async fn open_socket_url(&self) -> Result<String, GatewayConnectionError> {
        let token = self
            .app_token
            .as_deref()
            .ok_or_else(|| GatewayConnectionError::Open("app token not configured".to_string()))?;
        let url = format!("{}/apps.connections.open", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(GatewayConnectionError::Open(format!("http {}", res.status())));
        }
        let data: ConnectionsOpenResponse = res.json().await?;
        if !data.ok {
            return Err(GatewayConnectionError::Open(
                data.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        data.url
            .ok_or_else(|| GatewayConnectionError::Open("missing url in response".to_string()))
    }
}

fn post_message_body(reply: &OutboundReply) -> serde_json::Value {
    let mut body = json!({
        "channel": reply.channel_id,
        "text": reply.text,
        "mrkdwn": reply.format == TextFormat::Mrkdwn,
        "unfurl_links": false,
        "unfurl_media": false,
    });
    if let Some(ts) = &reply.thread_ts {
        body["thread_ts"] = serde_json::Value::String(ts.clone());
    }
    body
}

#[async_trait]
impl ChatOutbound for SlackClient {
    async fn post_message(&self, reply: &OutboundReply) -> Result<MessageRef, PostError> {
        let value = self.call("chat.postMessage", &post_message_body(reply)).await?;
        let posted: PostMessageResponse = serde_json::from_value(value)
            .map_err(|e| PostError::Api(format!("chat.postMessage: malformed response: {}", e)))?;
        log::debug!("posted message {} to {}", posted.ts, posted.channel);
        Ok(MessageRef {
            channel_id: posted.channel,
            ts: posted.ts,
        })
    }

    async fn update_message(&self, message: &MessageRef, text: &str) -> Result<(), PostError> {
        let body = json!({ "channel": message.channel_id, "ts": message.ts, "text": text });
        self.call("chat.update", &body).await.map(|_| ())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), PostError> {
        let body = json!({ "channel": message.channel_id, "ts": message.ts });
        match self.call("chat.delete", &body).await {
            Ok(_) => Ok(()),
            Err(PostError::Api(code)) if code == "message_not_found" => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn add_reaction(&self, message: &MessageRef, name: &str) -> Result<(), PostError> {
        let body = json!({ "channel": message.channel_id, "timestamp": message.ts, "name": name });
        match self.call("reactions.add", &body).await {
            Ok(_) => Ok(()),
            Err(PostError::Api(code)) if code == "already_reacted" => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_reaction(&self, message: &MessageRef, name: &str) -> Result<(), PostError> {
        let body = json!({ "channel": message.channel_id, "timestamp": message.ts, "name": name });
        match self.call("reactions.remove", &body).await {
            Ok(_) => Ok(()),
            Err(PostError::Api(code)) if code == "no_reaction" => Ok(()),
            Err(e) => Err(e),
        }
    }
}
