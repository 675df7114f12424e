//! Channel session router: channel id -> live `ChannelSession`, one worker task per session.
//!
//! Inbound: `route` resolves (or lazily creates) the channel's session and queues the event on
//! that session's worker. Each worker handles its queue strictly in order, so turns within a
//! channel never overlap or reorder; different channels run concurrently.
//!
//! Creation is serialized per channel through a `OnceCell` slot; the table lock is only held to
//! find or insert the slot, never across session creation.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{PipelineError, SessionCreationError};
use crate::message::{ChatOutbound, InboundEvent};
use crate::reply::ReplyTool;
use crate::session::{ChannelSession, SessionFactory, Turn};
use crate::status::StatusIndicator;

const ERROR_NOTICE_MAX_CHARS: usize = 200;

/// Router behaviour knobs (allow-list, reply placement, queueing, shutdown grace).
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// When set, events from any other channel are ignored.
    pub allowed_channels: Option<HashSet<String>>,
    pub thread_replies: bool,
    /// Reaction shown on the triggering message while its turn runs.
    pub working_reaction: Option<String>,
    /// Post a transient "Thinking..." message that tracks tool activity during a turn.
    pub status_messages: bool,
    /// Pending events per session; further events for that channel are dropped.
    pub queue_depth: usize,
    pub shutdown_grace: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            allowed_channels: None,
            thread_replies: true,
            working_reaction: None,
            status_messages: false,
            queue_depth: 32,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

struct SessionSlot {
    session: Arc<ChannelSession>,
    tx: mpsc::Sender<InboundEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

type SlotCell = Arc<OnceCell<SessionSlot>>;

/// Snapshot of a live session for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub channel_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

pub struct ChannelRouter {
    factory: Arc<dyn SessionFactory>,
    outbound: Arc<dyn ChatOutbound>,
    options: RouterOptions,
    /// Only the router inserts or removes entries (`route`, `evict`, `shutdown`).
    sessions: Mutex<HashMap<String, SlotCell>>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl ChannelRouter {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        outbound: Arc<dyn ChatOutbound>,
        options: RouterOptions,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            factory,
            outbound,
            options,
            sessions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn is_allowed(&self, channel_id: &str) -> bool {
        match &self.options.allowed_channels {
            Some(allowed) => allowed.contains(channel_id),
            None => true,
        }
    }

    /// Dispatch an event to its channel's session, creating the session on first use.
    /// Never waits on a session's progress: a full queue drops the event. Errors are logged,
    /// never returned, so a failure in one channel cannot affect others.
    pub async fn route(&self, event: InboundEvent) {
        if !self.is_allowed(&event.channel_id) {
            log::debug!("ignoring event from channel {} (not allowed)", event.channel_id);
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("router closed, dropping event for {}", event.channel_id);
            return;
        }

        let channel_id = event.channel_id.clone();
        let mut event = event;
        // A second pass only happens when the first slot's worker turned out to be dead.
        for _ in 0..2 {
            let cell = {
                let mut sessions = self.sessions.lock().await;
                sessions
                    .entry(channel_id.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            };

            let mut created = false;
            let init = cell.get_or_try_init(|| {
                created = true;
                self.create_slot(&channel_id)
            });
            let slot = match init.await {
                Ok(slot) => slot,
                Err(SessionCreationError::ShuttingDown) => {
                    log::debug!("router closed, dropping event {} for {}", event.ts, channel_id);
                    return;
                }
                Err(e) => {
                    log::error!(
                        "session creation failed for channel {}, dropping event {}: {}",
                        channel_id,
                        event.ts,
                        e
                    );
                    return;
                }
            };

            if created && self.closed.load(Ordering::SeqCst) {
                // Shutdown may have drained the table before this slot existed. The worker
                // stops on its own; nobody else will close the pipeline.
                slot.session.close().await;
                return;
            }

            slot.session.touch();
            match slot.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(dropped)) => {
                    log::warn!(
                        "session queue for {} is full ({} pending), dropping event {}",
                        channel_id,
                        self.options.queue_depth,
                        dropped.ts
                    );
                    return;
                }
                Err(TrySendError::Closed(returned)) => {
                    log::warn!(
                        "session worker for {} is gone, replacing session {}",
                        channel_id,
                        slot.session.session_id
                    );
                    self.evict(&channel_id, &cell).await;
                    slot.session.close().await;
                    event = returned;
                }
            }
        }
        log::error!("could not start a worker for {}, event {} dropped", channel_id, event.ts);
    }

    /// Remove `cell` from the table if it is still the entry for `channel_id`.
    async fn evict(&self, channel_id: &str, cell: &SlotCell) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(channel_id)
            .is_some_and(|current| Arc::ptr_eq(current, cell))
        {
            sessions.remove(channel_id);
        }
    }

    async fn create_slot(&self, channel_id: &str) -> Result<SessionSlot, SessionCreationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionCreationError::ShuttingDown);
        }
        let pipeline = self.factory.create(channel_id).await?;
        if self.closed.load(Ordering::SeqCst) {
            pipeline.close().await;
            return Err(SessionCreationError::ShuttingDown);
        }
        let session = Arc::new(ChannelSession::new(channel_id, pipeline));
        let (tx, rx) = mpsc::channel(self.options.queue_depth.max(1));
        let worker = tokio::spawn(run_session_worker(
            session.clone(),
            rx,
            self.shutdown_tx.subscribe(),
            self.outbound.clone(),
            self.options.clone(),
        ));
        log::info!("session {} started for channel {}", session.session_id, channel_id);
        Ok(SessionSlot {
            session,
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|c| c.initialized()).count()
    }

    pub async fn session(&self, channel_id: &str) -> Option<SessionInfo> {
        let cell = self.sessions.lock().await.get(channel_id).cloned()?;
        let slot = cell.get()?;
        Some(SessionInfo {
            channel_id: slot.session.channel_id.clone(),
            session_id: slot.session.session_id.clone(),
            created_at: slot.session.created_at,
            last_activity: slot.session.last_activity(),
        })
    }

    /// Stop accepting events, let in-flight turns finish within the grace period, abandon the
    /// rest, then close every session's pipeline. Queued events that have not started are dropped.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let cells: Vec<SlotCell> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, c)| c).collect()
        };
        log::info!("shutting down {} session(s)", cells.len());

        let deadline = tokio::time::Instant::now() + self.options.shutdown_grace;
        for cell in &cells {
            let Some(slot) = cell.get() else { continue };
            let Some(mut worker) = slot.worker.lock().await.take() else {
                continue;
            };
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                log::warn!(
                    "session {} did not finish within grace period, abandoning turn",
                    slot.session.session_id
                );
                worker.abort();
            }
        }
        for cell in &cells {
            if let Some(slot) = cell.get() {
                slot.session.close().await;
            }
        }
        log::info!("router shutdown complete");
    }
}

async fn run_session_worker(
    session: Arc<ChannelSession>,
    mut rx: mpsc::Receiver<InboundEvent>,
    mut shutdown: watch::Receiver<bool>,
    outbound: Arc<dyn ChatOutbound>,
    options: RouterOptions,
) {
    loop {
        // A worker spawned after shutdown was signalled never sees `changed()` fire.
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = rx.recv() => match event {
                Some(event) => process_turn(&session, event, &outbound, &options).await,
                None => break,
            },
        }
    }
    log::debug!("session worker for {} stopped", session.channel_id);
}

/// Text posted to the channel when a turn fails: the first line of the error, truncated.
fn error_notice(err: &PipelineError) -> String {
    let full = err.to_string();
    let first = full.lines().next().unwrap_or("").trim();
    let mut summary: String = first.chars().take(ERROR_NOTICE_MAX_CHARS).collect();
    if summary.len() < full.trim().len() {
        summary.push_str("...");
    }
    format!(":warning: An error occurred: {}", summary)
}

/// One turn: working reaction and status message on, run the pipeline, post the final
/// response (or an error notice), status message and reaction off. Slack failures here are
/// logged and swallowed. A panicking pipeline fails the turn, not the worker.
async fn process_turn(
    session: &ChannelSession,
    event: InboundEvent,
    outbound: &Arc<dyn ChatOutbound>,
    options: &RouterOptions,
) {
    let thread_ts = if options.thread_replies {
        Some(event.reply_thread().to_string())
    } else {
        None
    };
    let trigger = event.message_ref();
    let reaction = options.working_reaction.as_deref().filter(|r| !r.is_empty());

    if let Some(name) = reaction {
        if let Err(e) = outbound.add_reaction(&trigger, name).await {
            log::debug!("could not add working reaction in {}: {}", session.channel_id, e);
        }
    }

    let mut reply = ReplyTool::new(outbound.clone(), session.channel_id.as_str(), thread_ts.clone());
    let status = if options.status_messages {
        let status = Arc::new(StatusIndicator::new(
            outbound.clone(),
            session.channel_id.as_str(),
            thread_ts,
        ));
        status.start().await;
        reply = reply.with_status(status.clone());
        Some(status)
    } else {
        None
    };

    let turn = Turn::from_event(&event);
    let outcome = AssertUnwindSafe(session.pipeline.execute(&turn, &reply))
        .catch_unwind()
        .await
        .unwrap_or(Err(PipelineError::Panicked));
    match outcome {
        Ok(response) => {
            if !response.trim().is_empty() {
                if let Err(e) = reply.say(&response).await {
                    log::warn!("posting response to {} failed: {}", session.channel_id, e);
                }
            }
        }
        Err(e) => {
            log::error!(
                "turn from {} in {} failed: {}",
                event.sender_id,
                session.channel_id,
                e
            );
            if let Err(e) = reply.say(&error_notice(&e)).await {
                log::debug!("posting error notice to {} failed: {}", session.channel_id, e);
            }
        }
    }

    if let Some(status) = status {
        status.finish().await;
    }
    if let Some(name) = reaction {
        if let Err(e) = outbound.remove_reaction(&trigger, name).await {
            log::debug!("could not remove working reaction in {}: {}", session.channel_id, e);
        }
    }
    session.touch();
}
