//! Slackline core library: Slack Socket Mode adapter, per-channel session routing,
//! the agent-facing reply tool and the Ollama-backed agent pipeline.

pub mod agent;
pub mod bundle;
pub mod config;
pub mod daemon;
pub mod error;
pub mod init;
pub mod llm;
pub mod message;
pub mod reply;
pub mod routing;
pub mod session;
pub mod slack;
pub mod status;
