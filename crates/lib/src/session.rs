//! Channel sessions and the pipeline seam.
//!
//! A `ChannelSession` is the live conversation for one Slack channel. Its `pipeline` is the
//! execution context that turns a message into a response; `AgentPipeline` is the shipped one
//! (an agent loop over Ollama with the `slack_reply` tool).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::{self, ToolExecutor, TurnObserver};
use crate::bundle::{Bundle, DEFAULT_PROVIDER};
use crate::config::Config;
use crate::error::{PipelineError, SessionCreationError};
use crate::llm::{ChatMessage, LlmBackend, OllamaClient};
use crate::message::InboundEvent;
use crate::reply::{ReplyTool, SLACK_REPLY_TOOL};

/// Stable session identifier (`slack-<channel id>`).
pub type SessionId = String;

const DEFAULT_MODEL_FALLBACK: &str = "llama3.2:latest";

pub fn session_id_for(channel_id: &str) -> SessionId {
    format!("slack-{}", channel_id)
}

/// One conversation turn handed to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub channel_id: String,
    pub sender_id: String,
    pub text: String,
}

impl Turn {
    pub fn from_event(event: &InboundEvent) -> Self {
        Self {
            channel_id: event.channel_id.clone(),
            sender_id: event.sender_id.clone(),
            text: event.text.clone(),
        }
    }

    /// Text given to the model: the sender's mention followed by the message.
    pub fn prompt(&self) -> String {
        format!("<@{}>: {}", self.sender_id, self.text.trim())
    }
}

/// Execution context behind a channel session.
#[async_trait]
pub trait SessionPipeline: Send + Sync {
    /// Run one turn. Intermediate messages go through `reply`; the returned text is the
    /// terminal response (may be empty).
    async fn execute(&self, turn: &Turn, reply: &ReplyTool) -> Result<String, PipelineError>;

    /// Release resources. Called once, on router shutdown.
    async fn close(&self) {}
}

/// Creates the pipeline for a channel's first event.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(
        &self,
        channel_id: &str,
    ) -> Result<Arc<dyn SessionPipeline>, SessionCreationError>;
}

/// The live session for one channel. Owned by the router.
pub struct ChannelSession {
    pub channel_id: String,
    pub session_id: SessionId,
    pub pipeline: Arc<dyn SessionPipeline>,
    pub created_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
    closed: AtomicBool,
}

impl ChannelSession {
    pub fn new(channel_id: impl Into<String>, pipeline: Arc<dyn SessionPipeline>) -> Self {
        let channel_id = channel_id.into();
        let now = Utc::now();
        Self {
            session_id: session_id_for(&channel_id),
            channel_id,
            pipeline,
            created_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            closed: AtomicBool::new(false),
        }
    }

    /// Close the pipeline. Only the first call reaches it.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline.close().await;
        log::debug!("closed session {}", self.session_id);
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::SeqCst))
            .unwrap_or(self.created_at)
    }
}

/// Agent loop pipeline: keeps the channel's chat history and runs `agent::run_turn` per turn.
pub struct AgentPipeline {
    session_id: SessionId,
    backend: Arc<dyn LlmBackend>,
    model: String,
    reply_tool_enabled: bool,
    max_tool_iterations: usize,
    history: Mutex<Vec<ChatMessage>>,
    closed: AtomicBool,
}

impl AgentPipeline {
    pub fn new(
        session_id: SessionId,
        backend: Arc<dyn LlmBackend>,
        model: String,
        bundle: &Bundle,
    ) -> Self {
        let mut history = Vec::new();
        if !bundle.instructions.trim().is_empty() {
            history.push(ChatMessage::system(bundle.instructions.trim()));
        }
        Self {
            session_id,
            backend,
            model,
            reply_tool_enabled: bundle.tool_enabled(SLACK_REPLY_TOOL),
            max_tool_iterations: bundle.max_tool_iterations,
            history: Mutex::new(history),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}

#[async_trait]
impl SessionPipeline for AgentPipeline {
    async fn execute(&self, turn: &Turn, reply: &ReplyTool) -> Result<String, PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::Closed);
        }
        let (tools, executor) = if self.reply_tool_enabled {
            (
                Some(vec![ReplyTool::definition()]),
                Some(reply as &dyn ToolExecutor),
            )
        } else {
            (None, None)
        };
        let mut history = self.history.lock().await;
        log::debug!(
            "{}: running turn with model {} ({} messages in history)",
            self.session_id,
            self.model,
            history.len()
        );
        let result = agent::run_turn(
            &mut history,
            &turn.prompt(),
            self.backend.as_ref(),
            &self.model,
            tools,
            executor,
            reply.status().map(|s| s as &dyn TurnObserver),
            self.max_tool_iterations,
        )
        .await
        .map_err(|e| PipelineError::Backend(e.to_string()))?;
        Ok(result.content)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut history = self.history.lock().await;
        log::debug!("{}: closing ({} messages dropped)", self.session_id, history.len());
        history.clear();
    }
}

/// Builds an `AgentPipeline` per channel from the bundle.
pub struct AgentSessionFactory {
    backend: Arc<dyn LlmBackend>,
    bundle: Arc<Bundle>,
    model: String,
}

impl AgentSessionFactory {
    pub fn new(backend: Arc<dyn LlmBackend>, bundle: Arc<Bundle>, model: String) -> Self {
        Self {
            backend,
            bundle,
            model,
        }
    }

    /// Ollama backend from config; model from the bundle, then config, then a fallback.
    pub fn from_config(config: &Config, bundle: Bundle) -> Self {
        let model = resolve_model(bundle.model.as_deref(), config.agents.model.as_deref());
        let backend = Arc::new(OllamaClient::new(config.agents.ollama_base_url.clone()));
        Self::new(backend, Arc::new(bundle), model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn resolve_model(bundle_model: Option<&str>, config_model: Option<&str>) -> String {
    bundle_model
        .or(config_model)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_FALLBACK.to_string())
}

#[async_trait]
impl SessionFactory for AgentSessionFactory {
    async fn create(
        &self,
        channel_id: &str,
    ) -> Result<Arc<dyn SessionPipeline>, SessionCreationError> {
        if self.bundle.provider != DEFAULT_PROVIDER {
            return Err(SessionCreationError::UnsupportedProvider(
                self.bundle.provider.clone(),
            ));
        }
        let session_id = session_id_for(channel_id);
        log::info!("creating session {} (bundle {})", session_id, self.bundle.name);
        Ok(Arc::new(AgentPipeline::new(
            session_id,
            self.backend.clone(),
            self.model.clone(),
            &self.bundle,
        )))
    }
}
