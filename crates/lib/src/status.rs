//! Transient status message shown in the reply thread while a turn runs.
//!
//! Posted as "Thinking..." when the turn starts, edited while tools run, deleted when the turn
//! ends. Every Slack call here is best-effort.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::TurnObserver;
use crate::message::{ChatOutbound, MessageRef, OutboundReply};

pub const THINKING_TEXT: &str = ":thought_balloon: Thinking...";
pub const PROCESSING_TEXT: &str = ":thought_balloon: Processing...";

pub fn tool_status_text(tool: &str) -> String {
    format!(":gear: Using `{}`...", tool)
}

pub struct StatusIndicator {
    outbound: Arc<dyn ChatOutbound>,
    channel_id: String,
    thread_ts: Option<String>,
    message: Mutex<Option<MessageRef>>,
}

impl StatusIndicator {
    pub fn new(
        outbound: Arc<dyn ChatOutbound>,
        channel_id: impl Into<String>,
        thread_ts: Option<String>,
    ) -> Self {
        Self {
            outbound,
            channel_id: channel_id.into(),
            thread_ts,
            message: Mutex::new(None),
        }
    }

    /// Post the initial indicator. A second call while one is shown does nothing.
    pub async fn start(&self) {
        let mut message = self.message.lock().await;
        if message.is_some() {
            return;
        }
        let reply = OutboundReply::new(self.channel_id.as_str(), THINKING_TEXT)
            .in_thread(self.thread_ts.clone());
        match self.outbound.post_message(&reply).await {
            Ok(posted) => *message = Some(posted),
            Err(e) => log::debug!("could not post status message in {}: {}", self.channel_id, e),
        }
    }

    async fn set(&self, text: &str) {
        let message = self.message.lock().await;
        let Some(posted) = message.as_ref() else {
            return;
        };
        if let Err(e) = self.outbound.update_message(posted, text).await {
            log::debug!("could not update status message in {}: {}", self.channel_id, e);
        }
    }

    /// Delete the indicator, if one was posted.
    pub async fn finish(&self) {
        let Some(posted) = self.message.lock().await.take() else {
            return;
        };
        if let Err(e) = self.outbound.delete_message(&posted).await {
            log::debug!("could not delete status message in {}: {}", self.channel_id, e);
        }
    }
}

#[async_trait]
impl TurnObserver for StatusIndicator {
    async fn tool_started(&self, name: &str) {
        self.set(&tool_status_text(name)).await;
    }

    async fn tool_finished(&self, _name: &str) {
        self.set(PROCESSING_TEXT).await;
    }
}
