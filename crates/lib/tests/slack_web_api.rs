//! Integration test: a local axum server stands in for the Slack Web API. Exercises the
//! `SlackClient` error mapping and a full routed turn (reaction, status message, threaded reply,
//! reaction off).
//! Does not require Slack or Ollama. Server tasks are left running when the tests end.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use slackline::error::{PipelineError, PostError, SessionCreationError};
use slackline::message::{ChatOutbound, EventKind, InboundEvent, MessageRef, OutboundReply};
use slackline::reply::ReplyTool;
use slackline::routing::{ChannelRouter, RouterOptions};
use slackline::session::{SessionFactory, SessionPipeline, Turn};
use slackline::slack::SlackClient;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BOT_TOKEN: &str = "xoxb-test";
const APP_TOKEN: &str = "xapp-test";

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

async fn slack_method(
    State(calls): State<Calls>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    calls.lock().unwrap().push((method.clone(), body.clone()));

    if method == "apps.connections.open" {
        if auth != format!("Bearer {}", APP_TOKEN) {
            return Json(json!({ "ok": false, "error": "invalid_auth" })).into_response();
        }
        return Json(json!({ "ok": true, "url": "wss://socket.invalid/link" })).into_response();
    }
    if auth != format!("Bearer {}", BOT_TOKEN) {
        return Json(json!({ "ok": false, "error": "invalid_auth" })).into_response();
    }

    match method.as_str() {
        "auth.test" => Json(json!({
            "ok": true, "user_id": "UBOT", "user": "slackline", "team": "T1"
        }))
        .into_response(),
        "chat.postMessage" => {
            let channel = body["channel"].as_str().unwrap_or("").to_string();
            match channel.as_str() {
                "C404" => Json(json!({ "ok": false, "error": "channel_not_found" })).into_response(),
                "CSLOW" => (StatusCode::TOO_MANY_REQUESTS, [("Retry-After", "7")], "").into_response(),
                "CDENY" => StatusCode::FORBIDDEN.into_response(),
                _ => {
                    let n = calls.lock().unwrap().len();
                    Json(json!({
                        "ok": true,
                        "channel": channel,
                        "ts": format!("1700000100.{:06}", n),
                    }))
                    .into_response()
                }
            }
        }
        "chat.update" => {
            Json(json!({ "ok": true, "channel": body["channel"], "ts": body["ts"] })).into_response()
        }
        "chat.delete" => match body["ts"].as_str() {
            Some("0.0") => Json(json!({ "ok": false, "error": "message_not_found" })).into_response(),
            _ => Json(json!({ "ok": true })).into_response(),
        },
        "reactions.add" => Json(json!({ "ok": true })).into_response(),
        "reactions.remove" => Json(json!({ "ok": false, "error": "no_reaction" })).into_response(),
        _ => Json(json!({ "ok": false, "error": "unknown_method" })).into_response(),
    }
}

async fn spawn_mock_slack() -> (String, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/:method", post(slack_method))
        .with_state(calls.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), calls)
}

fn client(base: &str) -> SlackClient {
    SlackClient::with_base_url(base, BOT_TOKEN, Some(APP_TOKEN.to_string()))
}

#[tokio::test]
async fn auth_test_and_socket_url() {
    let (base, _) = spawn_mock_slack().await;
    let c = client(&base);
    let me = c.auth_test().await.unwrap();
    assert_eq!(me.user_id, "UBOT");
    assert_eq!(me.team.as_deref(), Some("T1"));
    assert_eq!(c.open_socket_url().await.unwrap(), "wss://socket.invalid/link");

    let wrong = SlackClient::with_base_url(&base, "xoxb-wrong", Some("xapp-wrong".into()));
    assert_eq!(
        wrong.auth_test().await.unwrap_err(),
        PostError::Unauthorized("invalid_auth".into())
    );
    assert!(wrong.open_socket_url().await.is_err());
}

#[tokio::test]
async fn post_message_maps_slack_failures() {
    let (base, calls) = spawn_mock_slack().await;
    let c = client(&base);

    let posted = c
        .post_message(&OutboundReply::new("C1", "hello").in_thread(Some("1.5".into())))
        .await
        .unwrap();
    assert_eq!(posted.channel_id, "C1");
    {
        let calls = calls.lock().unwrap();
        let (method, body) = calls.last().unwrap();
        assert_eq!(method, "chat.postMessage");
        assert_eq!(body["thread_ts"], "1.5");
        assert_eq!(body["unfurl_links"], false);
    }

    assert_eq!(
        c.post_message(&OutboundReply::new("C404", "x")).await.unwrap_err(),
        PostError::ChannelNotFound("channel_not_found".into())
    );
    assert_eq!(
        c.post_message(&OutboundReply::new("CSLOW", "x")).await.unwrap_err(),
        PostError::RateLimited {
            retry_after_secs: Some(7)
        }
    );
    assert!(matches!(
        c.post_message(&OutboundReply::new("CDENY", "x")).await.unwrap_err(),
        PostError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn post_message_unreachable_host_is_network_error() {
    let c = SlackClient::with_base_url("http://127.0.0.1:9", BOT_TOKEN, None);
    assert!(matches!(
        c.post_message(&OutboundReply::new("C1", "x")).await.unwrap_err(),
        PostError::NetworkError(_)
    ));
}

#[tokio::test]
async fn missing_reaction_on_remove_is_not_an_error() {
    let (base, _) = spawn_mock_slack().await;
    let c = client(&base);
    let msg = MessageRef {
        channel_id: "C1".into(),
        ts: "1.0".into(),
    };
    c.add_reaction(&msg, "eyes").await.unwrap();
    c.remove_reaction(&msg, "eyes").await.unwrap();
}

#[tokio::test]
async fn update_and_delete_message() {
    let (base, calls) = spawn_mock_slack().await;
    let c = client(&base);
    let msg = c.post_message(&OutboundReply::new("C1", "draft")).await.unwrap();
    c.update_message(&msg, "final").await.unwrap();
    c.delete_message(&msg).await.unwrap();
    // Already gone counts as deleted.
    let gone = MessageRef {
        channel_id: "C1".into(),
        ts: "0.0".into(),
    };
    c.delete_message(&gone).await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls[1].0, "chat.update");
    assert_eq!(calls[1].1["ts"], msg.ts.as_str());
    assert_eq!(calls[1].1["text"], "final");
    assert_eq!(calls[2].0, "chat.delete");
    assert_eq!(calls[2].1["channel"], "C1");
}

struct Shout;

#[async_trait]
impl SessionPipeline for Shout {
    async fn execute(&self, turn: &Turn, reply: &ReplyTool) -> Result<String, PipelineError> {
        reply
            .say("on it")
            .await
            .map_err(|e| PipelineError::Backend(e.to_string()))?;
        Ok(turn.prompt().to_uppercase())
    }
}

struct ShoutFactory;

#[async_trait]
impl SessionFactory for ShoutFactory {
    async fn create(
        &self,
        _channel_id: &str,
    ) -> Result<Arc<dyn SessionPipeline>, SessionCreationError> {
        Ok(Arc::new(Shout))
    }
}

#[tokio::test]
async fn routed_turn_reacts_and_replies_in_thread() {
    let (base, calls) = spawn_mock_slack().await;
    let options = RouterOptions {
        working_reaction: Some("hourglass_flowing_sand".into()),
        ..RouterOptions::default()
    };
    let router = ChannelRouter::new(Arc::new(ShoutFactory), Arc::new(client(&base)), options);

    router
        .route(InboundEvent {
            channel_id: "C1".into(),
            sender_id: "U7".into(),
            text: "deploy please".into(),
            kind: EventKind::Mention,
            ts: "1700000000.000001".into(),
            thread_ts: None,
        })
        .await;

    let mut methods = Vec::new();
    for _ in 0..100 {
        methods = calls
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect::<Vec<_>>();
        if methods.len() >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(
        methods,
        vec!["reactions.add", "chat.postMessage", "chat.postMessage", "reactions.remove"]
    );

    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].1["timestamp"], "1700000000.000001");
    assert_eq!(calls[1].1["text"], "on it");
    assert_eq!(calls[2].1["text"], "<@U7>: DEPLOY PLEASE");
    assert_eq!(calls[2].1["thread_ts"], "1700000000.000001");
    drop(calls);
    router.shutdown().await;
}

#[tokio::test]
async fn status_message_wraps_a_routed_turn() {
    let (base, calls) = spawn_mock_slack().await;
    let options = RouterOptions {
        status_messages: true,
        ..RouterOptions::default()
    };
    let router = ChannelRouter::new(Arc::new(ShoutFactory), Arc::new(client(&base)), options);
    router
        .route(InboundEvent {
            channel_id: "C1".into(),
            sender_id: "U7".into(),
            text: "status?".into(),
            kind: EventKind::Mention,
            ts: "1700000000.000002".into(),
            thread_ts: None,
        })
        .await;

    let mut methods = Vec::new();
    for _ in 0..100 {
        methods = calls
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect::<Vec<_>>();
        if methods.len() >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(
        methods,
        vec!["chat.postMessage", "chat.postMessage", "chat.postMessage", "chat.delete"]
    );
    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].1["text"], ":thought_balloon: Thinking...");
    assert_eq!(calls[0].1["thread_ts"], "1700000000.000002");
    assert_eq!(calls[3].1["ts"], "1700000100.000001");
    drop(calls);
    router.shutdown().await;
}

#[tokio::test]
async fn init_seeds_a_loadable_bundle() {
    let dir = std::env::temp_dir().join(format!("slackline-init-test-{}", uuid::Uuid::new_v4()));
    let config_path = dir.join("config.json");
    slackline::init::init_config_dir(&config_path).unwrap();

    let (config, path) = slackline::config::load_config(Some(config_path.clone())).unwrap();
    assert_eq!(path, config_path);
    let bundle_path = slackline::config::resolve_bundle_path(&config, &path, None);
    assert_eq!(bundle_path, dir.join("bundle.md"));
    let bundle = slackline::bundle::load_bundle(&bundle_path).unwrap();
    assert_eq!(bundle.provider, "ollama");
    let _ = std::fs::remove_dir_all(&dir);
}
