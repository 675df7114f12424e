//! Normalized chat messages flowing through the bridge, and the outbound client seam.

use async_trait::async_trait;

use crate::error::PostError;

/// Whether an inbound event was a plain channel message or an explicit @mention of the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Message,
    Mention,
}

/// A message or mention received from Slack, normalized for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub channel_id: String,
    pub sender_id: String,
    pub text: String,
    pub kind: EventKind,
    /// Slack message timestamp (`ts`); also the message id within the channel.
    pub ts: String,
    /// Parent thread timestamp when the message was posted inside a thread.
    pub thread_ts: Option<String>,
}

impl InboundEvent {
    /// Thread to answer in: the existing thread, or a new one under this message.
    pub fn reply_thread(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// Reference to the triggering message (for reactions).
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id.clone(),
            ts: self.ts.clone(),
        }
    }
}

/// How Slack should render a message body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextFormat {
    /// Slack mrkdwn (`*bold*`, `_italic_`, code fences).
    #[default]
    Mrkdwn,
    Plain,
}

/// A message to post into a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub channel_id: String,
    pub text: String,
    pub format: TextFormat,
    pub thread_ts: Option<String>,
}

impl OutboundReply {
    pub fn new(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            text: text.into(),
            format: TextFormat::default(),
            thread_ts: None,
        }
    }

    pub fn in_thread(mut self, thread_ts: Option<String>) -> Self {
        self.thread_ts = thread_ts;
        self
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }
}

/// Reference to a posted message, usable for later edits or reactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: String,
    pub ts: String,
}

/// Outbound side of the chat gateway (Slack Web API in production).
#[async_trait]
pub trait ChatOutbound: Send + Sync {
    /// Post a message; visible in the channel as soon as this returns Ok.
    async fn post_message(&self, reply: &OutboundReply) -> Result<MessageRef, PostError>;

    /// Replace the text of a message the bot posted.
    async fn update_message(&self, message: &MessageRef, text: &str) -> Result<(), PostError>;

    /// Delete a message the bot posted.
    async fn delete_message(&self, message: &MessageRef) -> Result<(), PostError>;

    /// Add an emoji reaction (name without colons) to a message.
    async fn add_reaction(&self, message: &MessageRef, name: &str) -> Result<(), PostError>;

    /// Remove an emoji reaction previously added by the bot.
    async fn remove_reaction(&self, message: &MessageRef, name: &str) -> Result<(), PostError>;
}
