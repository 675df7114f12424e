//! The `start` daemon: Socket Mode in, channel router in the middle, Web API out.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::bundle;
use crate::config::{self, Config};
use crate::message::InboundEvent;
use crate::routing::{ChannelRouter, RouterOptions};
use crate::session::AgentSessionFactory;
use crate::slack::{SlackClient, SocketModeGateway};

const INBOUND_QUEUE_DEPTH: usize = 256;

/// Flags from `slackline start` that override config.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub channel: Option<String>,
    pub bundle: Option<PathBuf>,
}

/// Router options from config plus the resolved allow-list.
pub fn router_options(config: &Config, allowed_channels: Option<Vec<String>>) -> RouterOptions {
    let reaction = config.slack.working_reaction.trim();
    RouterOptions {
        allowed_channels: allowed_channels.map(|c| c.into_iter().collect::<HashSet<_>>()),
        thread_replies: config.slack.thread_replies,
        working_reaction: (!reaction.is_empty()).then(|| reaction.to_string()),
        status_messages: config.slack.status_messages,
        queue_depth: config.daemon.session_queue_depth,
        shutdown_grace: config.daemon.shutdown_grace(),
    }
}

/// Run until SIGINT/SIGTERM: connect Socket Mode, route every event to its channel session,
/// then drain the router.
pub async fn run_daemon(config: Config, config_path: PathBuf, opts: StartOptions) -> Result<()> {
    let bot_token = config::resolve_bot_token(&config).context(
        "slack bot token not configured (set SLACK_BOT_TOKEN or slack.botToken in config)",
    )?;
    let app_token = config::resolve_app_token(&config).context(
        "slack app token not configured (set SLACK_APP_TOKEN or slack.appToken in config)",
    )?;

    let bundle_path = config::resolve_bundle_path(&config, &config_path, opts.bundle.as_deref());
    if !bundle_path.exists() {
        anyhow::bail!(
            "bundle not found: {} (run `slackline init` or pass --bundle)",
            bundle_path.display()
        );
    }
    let bundle = bundle::load_bundle(&bundle_path)?;
    log::info!("loaded bundle {} from {}", bundle.name, bundle_path.display());

    let client = SlackClient::new(bot_token, Some(app_token));
    let bot_user_id = match client.auth_test().await {
        Ok(identity) => {
            log::info!(
                "authenticated as {} ({})",
                identity.user.as_deref().unwrap_or("bot"),
                identity.user_id
            );
            Some(identity.user_id)
        }
        Err(e) => {
            log::warn!("auth.test failed, own messages cannot be filtered by user id: {}", e);
            None
        }
    };

    let factory = AgentSessionFactory::from_config(&config, bundle);
    log::info!("agent model: {}", factory.model());
    let allowed = config::resolve_allowed_channels(&config, opts.channel.as_deref());
    match &allowed {
        Some(list) => log::info!("listening in channel(s): {}", list.join(", ")),
        None => log::info!("listening in all channels the bot is a member of"),
    }
    let router = ChannelRouter::new(
        Arc::new(factory),
        Arc::new(client.clone()),
        router_options(&config, allowed),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    let gateway = Arc::new(SocketModeGateway::new(client, bot_user_id));
    let socket_task = gateway.start(inbound_tx, shutdown_rx);

    dispatch_events(&router, inbound_rx, shutdown_signal()).await;

    shutdown_tx.send_replace(true);
    router.shutdown().await;
    if let Err(e) = socket_task.await {
        log::warn!("socket mode task ended abnormally: {}", e);
    }
    log::info!("daemon stopped");
    Ok(())
}

/// Feed inbound events to the router one at a time, in arrival order, until `shutdown`
/// resolves or the inbound side closes. Routing only waits on session creation, and even that
/// is abandoned when `shutdown` resolves.
pub async fn dispatch_events<F>(
    router: &ChannelRouter,
    mut inbound_rx: mpsc::Receiver<InboundEvent>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                log::info!("shutdown requested");
                break;
            }
            event = inbound_rx.recv() => match event {
                Some(event) => tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        log::info!("shutdown requested while routing");
                        break;
                    }
                    _ = router.route(event) => {}
                },
                None => {
                    log::warn!("inbound event stream closed");
                    break;
                }
            },
        }
    }
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
