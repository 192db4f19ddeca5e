use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration for the foundry server.
///
/// Values come from `foundry.toml` when present, overridden by environment
/// variables, overridden again by CLI flags (applied by the caller).
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which per-project workspaces are created.
    pub workspace_root: PathBuf,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Program name of the code-generation agent CLI.
    pub agent_cmd: String,
    /// Optional override for the deploy CLI invocation (program + args).
    pub deploy_cmd: Option<Vec<String>>,
    /// Port the HTTP server binds to.
    pub port: u16,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    workspace_root: Option<PathBuf>,
    db_path: Option<PathBuf>,
    agent_cmd: Option<String>,
    deploy_cmd: Option<Vec<String>>,
    port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from(".foundry/workspaces"),
            db_path: PathBuf::from(".foundry/foundry.db"),
            agent_cmd: "claude".to_string(),
            deploy_cmd: None,
            port: 3030,
        }
    }
}

impl Config {
    /// Load configuration, layering `foundry.toml` (if it exists in
    /// `dir`) and environment variables over the defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut config = Config::default();

        let path = dir.join("foundry.toml");
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file: ConfigFile = toml::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            if let Some(root) = file.workspace_root {
                config.workspace_root = root;
            }
            if let Some(db) = file.db_path {
                config.db_path = db;
            }
            if let Some(cmd) = file.agent_cmd {
                config.agent_cmd = cmd;
            }
            if let Some(cmd) = file.deploy_cmd {
                config.deploy_cmd = Some(cmd);
            }
            if let Some(port) = file.port {
                config.port = port;
            }
        }

        if let Ok(cmd) = std::env::var("FOUNDRY_AGENT_CMD") {
            config.agent_cmd = cmd;
        }
        if let Ok(cmd) = std::env::var("FOUNDRY_DEPLOY_CMD") {
            let parts: Vec<String> = cmd.split_whitespace().map(String::from).collect();
            if !parts.is_empty() {
                config.deploy_cmd = Some(parts);
            }
        }
        if let Ok(root) = std::env::var("FOUNDRY_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }

        Ok(config)
    }
}
