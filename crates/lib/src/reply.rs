//! Reply tool: lets the agent post into the channel (and thread) of the turn it is running,
//! independently of the turn's final response.
//!
//! Thin pass-through to the outbound client: no retries, no buffering.

use async_trait::async_trait;
use std::sync::Arc;

use crate::agent::ToolExecutor;
use crate::error::PostError;
use crate::llm::{ToolDefinition, ToolFunctionDefinition};
use crate::message::{ChatOutbound, MessageRef, OutboundReply};
use crate::status::StatusIndicator;

pub const SLACK_REPLY_TOOL: &str = "slack_reply";

const PREVIEW_CHARS: usize = 80;

/// Reply adapter bound to one turn's channel and thread.
#[derive(Clone)]
pub struct ReplyTool {
    outbound: Arc<dyn ChatOutbound>,
    channel_id: String,
    thread_ts: Option<String>,
    status: Option<Arc<StatusIndicator>>,
}

impl ReplyTool {
    pub fn new(
        outbound: Arc<dyn ChatOutbound>,
        channel_id: impl Into<String>,
        thread_ts: Option<String>,
    ) -> Self {
        Self {
            outbound,
            channel_id: channel_id.into(),
            thread_ts,
            status: None,
        }
    }

    /// Attach the turn's status indicator so the pipeline can report tool activity.
    pub fn with_status(mut self, status: Arc<StatusIndicator>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status(&self) -> Option<&StatusIndicator> {
        self.status.as_deref()
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn thread_ts(&self) -> Option<&str> {
        self.thread_ts.as_deref()
    }

    /// Post a reply immediately. Blank text is rejected before reaching Slack.
    pub async fn post(&self, reply: OutboundReply) -> Result<MessageRef, PostError> {
        if reply.text.trim().is_empty() {
            return Err(PostError::EmptyMessage);
        }
        self.outbound.post_message(&reply).await
    }

    /// Post `text` to the bound channel and thread.
    pub async fn say(&self, text: &str) -> Result<MessageRef, PostError> {
        let reply =
            OutboundReply::new(self.channel_id.as_str(), text).in_thread(self.thread_ts.clone());
        self.post(reply).await
    }

    /// Function definition advertised to the model.
    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            typ: "function".to_string(),
            function: ToolFunctionDefinition {
                name: SLACK_REPLY_TOOL.to_string(),
                description: Some(
                    "Post a message to the Slack thread where this conversation started. \
                     Use it for intermediate updates or formatted content you want to send \
                     before your final response; the final response is posted automatically. \
                     Supports Slack mrkdwn: *bold*, _italic_, `code`, ```code block```."
                        .to_string(),
                ),
                parameters: serde_json::json!({
                    "type": "object",
                    "required": ["message"],
                    "properties": {
                        "message": {
                            "type": "string",
                            "description": "The message text. Supports Slack mrkdwn formatting."
                        }
                    }
                }),
            },
        }
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

#[async_trait]
impl ToolExecutor for ReplyTool {
    async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String, String> {
        if name != SLACK_REPLY_TOOL {
            return Err(format!("unknown tool: {}", name));
        }
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        match self.say(message).await {
            Ok(_) => Ok(format!("Posted to Slack: {}", preview(message))),
            Err(e) => {
                if e != PostError::EmptyMessage {
                    log::error!("slack_reply failed in {}: {}", self.channel_id, e);
                }
                Err(e.to_string())
            }
        }
    }
}
