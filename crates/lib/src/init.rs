//! Initialize the configuration directory: create ~/.slackline, a default config and bundle.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static DEFAULT_BUNDLE: &str = include_str!("../config/bundle.md");

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Seeds `bundle.md` next to the config from the default template if missing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let bundle_path = config_dir.join("bundle.md");
    if !bundle_path.exists() {
        std::fs::write(&bundle_path, DEFAULT_BUNDLE)
            .with_context(|| format!("writing default bundle to {}", bundle_path.display()))?;
        log::info!("wrote default bundle to {}", bundle_path.display());
    } else {
        log::debug!("bundle already exists at {}, skipping", bundle_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("slackline-init-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn default_bundle_parses() {
        let bundle = crate::bundle::parse_bundle(DEFAULT_BUNDLE).unwrap();
        assert_eq!(bundle.provider, "ollama");
        assert!(bundle.tool_enabled(crate::reply::SLACK_REPLY_TOOL));
        assert!(!bundle.instructions.is_empty());
    }

    #[test]
    fn creates_config_and_bundle() {
        let dir = temp_dir("fresh");
        let config_path = dir.join("config.json");
        let out = init_config_dir(&config_path).unwrap();
        assert_eq!(out, dir);
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "{}");
        assert!(dir.join("bundle.md").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn keeps_existing_files() {
        let dir = temp_dir("existing");
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.json");
        std::fs::write(&config_path, r#"{"slack":{}}"#).unwrap();
        std::fs::write(dir.join("bundle.md"), "custom").unwrap();
        init_config_dir(&config_path).unwrap();
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), r#"{"slack":{}}"#);
        assert_eq!(std::fs::read_to_string(dir.join("bundle.md")).unwrap(), "custom");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
