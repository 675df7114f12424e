//! Bundle loader: a `bundle.md` with YAML frontmatter (provider, model, tools) and a markdown
//! body that becomes the agent's instructions.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_PROVIDER: &str = "ollama";
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 5;

/// A loaded bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub name: String,
    pub provider: String,
    /// Model override; falls back to `agents.model` in config.
    pub model: Option<String>,
    pub max_tool_iterations: usize,
    /// Agent-facing tools to enable (e.g. `slack_reply`).
    pub tools: Vec<String>,
    /// Markdown body with frontmatter removed.
    pub instructions: String,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            model: None,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            tools: vec![crate::reply::SLACK_REPLY_TOOL.to_string()],
            instructions: String::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleFrontmatter {
    name: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    max_tool_iterations: Option<usize>,
    tools: Option<Vec<String>>,
}

impl Bundle {
    pub fn tool_enabled(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

/// Read and parse a bundle file.
pub fn load_bundle(path: &Path) -> Result<Bundle> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading bundle from {}", path.display()))?;
    parse_bundle(&content).with_context(|| format!("parsing bundle {}", path.display()))
}

/// Parse bundle content. Content without a frontmatter block is all instructions.
pub fn parse_bundle(content: &str) -> Result<Bundle> {
    let mut bundle = Bundle::default();
    let (yaml, body) = split_frontmatter(content);
    if let Some(yaml) = yaml {
        let fm: BundleFrontmatter = if yaml.trim().is_empty() {
            BundleFrontmatter::default()
        } else {
            serde_yaml::from_str(yaml).context("invalid bundle frontmatter")?
        };
        if let Some(n) = fm.name.filter(|n| !n.trim().is_empty()) {
            bundle.name = n.trim().to_string();
        }
        if let Some(p) = fm.provider.filter(|p| !p.trim().is_empty()) {
            bundle.provider = p.trim().to_lowercase();
        }
        bundle.model = fm
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if let Some(n) = fm.max_tool_iterations {
            bundle.max_tool_iterations = n.max(1);
        }
        if let Some(tools) = fm.tools {
            bundle.tools = tools;
        }
    }
    bundle.instructions = body.trim().to_string();
    Ok(bundle)
}

/// Split `---\n<yaml>\n---\n<body>`; returns (None, content) when there is no frontmatter.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return (None, content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let yaml = &rest[..end];
            let after = &rest[end + 4..];
            let body = after.split_once('\n').map(|(_, b)| b).unwrap_or("");
            (Some(yaml), body)
        }
        None => (None, content),
    }
}
