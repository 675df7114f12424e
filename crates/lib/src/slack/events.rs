//! Socket Mode frames and Events API payloads, normalized into `InboundEvent`s.

use serde::Deserialize;

use crate::message::{EventKind, InboundEvent};

/// A Socket Mode frame. `hello` and `disconnect` carry no envelope id.
#[derive(Debug, Deserialize)]
pub struct SocketEnvelope {
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Set on `disconnect` frames (e.g. "refresh_requested", "link_disabled").
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(default)]
    event: Option<SlackEvent>,
}

/// The inner `event` of an Events API callback (only the fields the bridge uses).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

/// What the socket loop should do with a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect(String),
    Event(InboundEvent),
    Ignored,
}

/// Ack frame for an envelope; must be sent promptly or Slack redelivers.
pub fn ack_frame(envelope_id: &str) -> String {
    serde_json::json!({ "envelope_id": envelope_id }).to_string()
}

/// Parse a text frame. Returns the envelope id to acknowledge (if any) and the decoded frame.
pub fn parse_frame(
    text: &str,
    bot_user_id: Option<&str>,
) -> Result<(Option<String>, SocketFrame), serde_json::Error> {
    let envelope: SocketEnvelope = serde_json::from_str(text)?;
    let frame = match envelope.kind.as_str() {
        "hello" => SocketFrame::Hello,
        "disconnect" => SocketFrame::Disconnect(
            envelope.reason.clone().unwrap_or_else(|| "unspecified".to_string()),
        ),
        "events_api" => envelope
            .payload
            .clone()
            .and_then(|p| serde_json::from_value::<EventCallback>(p).ok())
            .and_then(|cb| cb.event)
            .and_then(|ev| normalize(&ev, bot_user_id))
            .map(SocketFrame::Event)
            .unwrap_or(SocketFrame::Ignored),
        other => {
            log::debug!("ignoring socket mode envelope type {}", other);
            SocketFrame::Ignored
        }
    };
    Ok((envelope.envelope_id, frame))
}

fn mention_token(bot_user_id: &str) -> String {
    format!("<@{}>", bot_user_id)
}

/// Remove the bot's own mention from the text and trim.
pub fn strip_bot_mention(text: &str, bot_user_id: Option<&str>) -> String {
    let stripped = match bot_user_id {
        Some(id) => text.replace(&mention_token(id), ""),
        None => text.to_string(),
    };
    stripped.trim().to_string()
}

/// Turn a Slack event into an `InboundEvent`, or `None` when the bridge must not answer it:
/// bot messages, message subtypes (edits, joins, file shares), the bot's own messages, blank
/// text, and plain messages that mention the bot (the paired `app_mention` event covers those).
pub fn normalize(event: &SlackEvent, bot_user_id: Option<&str>) -> Option<InboundEvent> {
    let kind = match event.kind.as_str() {
        "message" => EventKind::Message,
        "app_mention" => EventKind::Mention,
        _ => return None,
    };
    if event.bot_id.is_some() {
        return None;
    }
    if kind == EventKind::Message && event.subtype.is_some() {
        return None;
    }
    let user = event.user.as_deref()?;
    if bot_user_id == Some(user) {
        return None;
    }
    let raw = event.text.as_deref().unwrap_or("");
    if kind == EventKind::Message {
        if let Some(id) = bot_user_id {
            if raw.contains(&mention_token(id)) {
                return None;
            }
        }
    }
    let text = strip_bot_mention(raw, bot_user_id);
    if text.is_empty() {
        return None;
    }
    Some(InboundEvent {
        channel_id: event.channel.clone()?,
        sender_id: user.to_string(),
        text,
        kind,
        ts: event.ts.clone()?,
        thread_ts: event.thread_ts.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_api(event: serde_json::Value) -> String {
        serde_json::json!({
            "envelope_id": "env-1",
            "type": "events_api",
            "accepts_response_payload": false,
            "payload": { "type": "event_callback", "event": event }
        })
        .to_string()
    }

    #[test]
    fn channel_message_is_normalized() {
        let frame = events_api(serde_json::json!({
            "type": "message", "channel": "C1", "user": "U1",
            "text": "hello", "ts": "1700000000.000100"
        }));
        let (id, frame) = parse_frame(&frame, Some("UBOT")).unwrap();
        assert_eq!(id.as_deref(), Some("env-1"));
        let SocketFrame::Event(ev) = frame else {
            panic!("expected event, got {:?}", frame);
        };
        assert_eq!(ev.channel_id, "C1");
        assert_eq!(ev.sender_id, "U1");
        assert_eq!(ev.kind, EventKind::Message);
        assert_eq!(ev.thread_ts, None);
    }

    #[test]
    fn mention_strips_bot_token_and_keeps_thread() {
        let frame = events_api(serde_json::json!({
            "type": "app_mention", "channel": "C1", "user": "U1",
            "text": "<@UBOT>  what's up?", "ts": "2.0", "thread_ts": "1.0"
        }));
        let (_, frame) = parse_frame(&frame, Some("UBOT")).unwrap();
        let SocketFrame::Event(ev) = frame else {
            panic!("expected event");
        };
        assert_eq!(ev.kind, EventKind::Mention);
        assert_eq!(ev.text, "what's up?");
        assert_eq!(ev.reply_thread(), "1.0");
    }

    #[test]
    fn loop_and_noise_filters() {
        let base = SlackEvent {
            kind: "message".into(),
            channel: Some("C1".into()),
            user: Some("U1".into()),
            text: Some("hi".into()),
            ts: Some("1.0".into()),
            ..SlackEvent::default()
        };
        assert!(normalize(&base, Some("UBOT")).is_some());

        let bot = SlackEvent { bot_id: Some("B1".into()), ..base.clone() };
        assert!(normalize(&bot, Some("UBOT")).is_none());

        let edit = SlackEvent { subtype: Some("message_changed".into()), ..base.clone() };
        assert!(normalize(&edit, Some("UBOT")).is_none());

        let own = SlackEvent { user: Some("UBOT".into()), ..base.clone() };
        assert!(normalize(&own, Some("UBOT")).is_none());

        let blank = SlackEvent { text: Some("  ".into()), ..base.clone() };
        assert!(normalize(&blank, Some("UBOT")).is_none());

        let mentions_bot = SlackEvent { text: Some("<@UBOT> hi".into()), ..base.clone() };
        assert!(normalize(&mentions_bot, Some("UBOT")).is_none());

        let only_mention = SlackEvent {
            kind: "app_mention".into(),
            text: Some("<@UBOT>".into()),
            ..base.clone()
        };
        assert!(normalize(&only_mention, Some("UBOT")).is_none());

        let reaction = SlackEvent { kind: "reaction_added".into(), ..base };
        assert!(normalize(&reaction, Some("UBOT")).is_none());
    }

    #[test]
    fn hello_and_disconnect_frames() {
        let (id, f) = parse_frame(r#"{"type":"hello","num_connections":1}"#, None).unwrap();
        assert_eq!(id, None);
        assert_eq!(f, SocketFrame::Hello);
        let (_, f) =
            parse_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#, None).unwrap();
        assert_eq!(f, SocketFrame::Disconnect("refresh_requested".into()));
    }

    #[test]
    fn unknown_envelope_is_acked_but_ignored() {
        let (id, f) =
            parse_frame(r#"{"envelope_id":"e9","type":"slash_commands","payload":{}}"#, None)
                .unwrap();
        assert_eq!(id.as_deref(), Some("e9"));
        assert_eq!(f, SocketFrame::Ignored);
    }

    #[test]
    fn ack_frame_shape() {
        let v: serde_json::Value = serde_json::from_str(&ack_frame("env-7")).unwrap();
        assert_eq!(v, serde_json::json!({ "envelope_id": "env-7" }));
    }

    #[test]
    fn garbage_frame_is_an_error() {
        assert!(parse_frame("not json", None).is_err());
    }
}
