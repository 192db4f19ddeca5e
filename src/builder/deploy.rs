use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::models::DeployTarget;
use crate::errors::BuildError;

#[derive(Debug, Clone, PartialEq)]
pub struct DeployOutcome {
    pub url: String,
    pub production_url: Option<String>,
}

/// Abstraction over the deployment provider for testability.
/// Real implementation: `CliDeployer`. Tests script outcomes directly.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        workspace: &Path,
        target: DeployTarget,
    ) -> Result<DeployOutcome, BuildError>;
}

/// Publishes a workspace through the provider's CLI and reports the URL.
/// Invoked only from the `deploying` phase.
pub struct CliDeployer {
    /// Full argv override (program + args); when unset, a per-target
    /// default invocation is used.
    command_override: Option<Vec<String>>,
}

impl CliDeployer {
    pub fn new(command_override: Option<Vec<String>>) -> Self {
        Self { command_override }
    }

    fn argv_for(&self, target: DeployTarget) -> Result<Vec<String>, BuildError> {
        if let Some(argv) = &self.command_override {
            return Ok(argv.clone());
        }
        let argv: &[&str] = match target {
            DeployTarget::Vercel => &["vercel", "deploy", "--prod", "--yes"],
            DeployTarget::Netlify => &["netlify", "deploy", "--prod"],
            DeployTarget::Fly => &["fly", "deploy", "--now"],
            DeployTarget::Localhost => {
                return Err(BuildError::Deploy(
                    "localhost target does not use the deploy adapter".to_string(),
                ));
            }
        };
        Ok(argv.iter().map(|s| s.to_string()).collect())
    }

    /// Extract deployment URLs from CLI output: the first `https://` token
    /// is the deploy URL, the last distinct one the production URL.
    pub(crate) fn extract_urls(stdout: &str) -> Option<(String, Option<String>)> {
        let urls: Vec<&str> = stdout
            .split_whitespace()
            .filter(|token| token.starts_with("https://"))
            .map(|token| token.trim_end_matches(['.', ',', ')', ']']))
            .collect();
        let first = urls.first()?.to_string();
        let last = urls.last().map(|s| s.to_string()).filter(|s| *s != first);
        Some((first, last))
    }
}

#[async_trait]
impl Deployer for CliDeployer {
    async fn deploy(
        &self,
        workspace: &Path,
        target: DeployTarget,
    ) -> Result<DeployOutcome, BuildError> {
        let argv = self.argv_for(target)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BuildError::Deploy("Empty deploy command".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .current_dir(workspace)
            .output()
            .await
            .map_err(|e| BuildError::Deploy(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::Deploy(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (url, production_url) = Self::extract_urls(&stdout).ok_or_else(|| {
            BuildError::Deploy(format!("No deployment URL in {} output", program))
        })?;

        Ok(DeployOutcome {
            url,
            production_url,
        })
    }
}
