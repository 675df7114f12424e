//! Slack adapter: Web API client (outbound) and Socket Mode listener (inbound).

mod api;
mod events;
mod socket;

pub use api::{slack_api_base, BotIdentity, SlackClient};
pub use events::{ack_frame, normalize, parse_frame, strip_bot_mention, SlackEvent, SocketFrame};
pub use socket::{Backoff, SocketModeGateway};
