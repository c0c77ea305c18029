//! Definition Loader
//!
//! Loads artifact definitions from local TOML or JSON files.

use super::types::ArtifactDefinition;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// Reads definitions from disk
#[derive(Debug, Clone, Default)]
pub struct DefinitionLoader;

impl DefinitionLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a definition file. The extension picks the format; anything
    /// else tries TOML first, then JSON.
    pub async fn load_from_file(&self, path: &Path) -> Result<ArtifactDefinition> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read definition file {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let definition = self.parse(&content, extension)?;

        debug!(path = %path.display(), id = %definition.id, "Loaded definition");
        Ok(definition)
    }

    /// Parse definition text in the format named by `extension`
    pub fn parse(&self, content: &str, extension: &str) -> Result<ArtifactDefinition> {
        match extension {
            "toml" => toml::from_str(content).context("Failed to parse TOML"),
            "json" => serde_json::from_str(content).context("Failed to parse JSON"),
            _ => toml::from_str(content)
                .or_else(|_| serde_json::from_str(content))
                .context("Failed to parse definition file"),
        }
    }
}
