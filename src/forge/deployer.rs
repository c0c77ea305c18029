//! Forge: generator, pipeline and store wired together
//!
//! A definition is rendered, evaluated, and persisted only when the pipeline
//! accepts it. The same path promotes crystallized patterns into skills.

use super::generator::{ArtifactGenerator, RenderError};
use super::store::{ArtifactStore, StoreError};
use super::types::{ArtifactDefinition, ArtifactKind};
use super::validator::{PipelineOutcome, ValidationPipeline};
use crate::autonomous::{CrystallizeError, Crystallizer, LearningEntry};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Forge errors
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type ForgeResult<T> = Result<T, ForgeError>;

/// Result of one submission
#[derive(Debug, Clone)]
pub struct Deployment {
    pub outcome: PipelineOutcome,
    /// Stored source location, when accepted
    pub location: Option<PathBuf>,
}

impl Deployment {
    pub fn accepted(&self) -> bool {
        self.outcome.accepted()
    }
}

/// Render → validate → store
pub struct Forge {
    generator: ArtifactGenerator,
    pipeline: ValidationPipeline,
    store: Arc<ArtifactStore>,
    work_dir: PathBuf,
}

impl Forge {
    pub fn new(pipeline: ValidationPipeline, store: Arc<ArtifactStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            generator: ArtifactGenerator::new(),
            pipeline,
            store,
            work_dir: work_dir.into(),
        }
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Render a definition and submit the result
    pub async fn submit(&self, definition: &ArtifactDefinition) -> ForgeResult<Deployment> {
        if let Err(e) = definition.validate() {
            info!(id = %definition.id, "Definition rejected: {}", e);
            return Ok(Deployment {
                outcome: PipelineOutcome::structurally_invalid(e.to_string()),
                location: None,
            });
        }

        let source = self.generator.render(definition)?;
        self.submit_source(definition, &source).await
    }

    /// Submit hand-written source for a definition. The store is touched
    /// only on acceptance.
    pub async fn submit_source(&self, definition: &ArtifactDefinition, source: &str) -> ForgeResult<Deployment> {
        let outcome = self
            .pipeline
            .evaluate_definition(definition, source, &self.work_dir)
            .await;

        if !outcome.accepted() {
            return Ok(Deployment {
                outcome,
                location: None,
            });
        }

        let location = self.store.upsert(definition, source).await?;
        info!(
            id = %definition.id,
            kind = %definition.kind,
            warnings = outcome.verdict.warnings().len(),
            flags = outcome.verdict.security_flags().len(),
            "Artifact deployed"
        );

        Ok(Deployment {
            outcome,
            location: Some(location),
        })
    }
}

#[async_trait]
impl Crystallizer for Forge {
    async fn crystallize(&self, pattern: &LearningEntry) -> Result<String, CrystallizeError> {
        let definition = pattern_skill(pattern)
            .ok_or_else(|| CrystallizeError::Failed(format!("entry {} is not a pattern", pattern.id)))?;

        let deployment = self
            .submit(&definition)
            .await
            .map_err(|e| CrystallizeError::Failed(e.to_string()))?;

        if deployment.accepted() {
            Ok(definition.id)
        } else {
            let reasons = deployment.outcome.verdict.errors().join("; ");
            warn!(pattern = %pattern.id, "Crystallized skill rejected: {}", reasons);
            Err(CrystallizeError::Rejected(reasons))
        }
    }
}

/// Skill definition capturing a resolved pattern
pub fn pattern_skill(pattern: &LearningEntry) -> Option<ArtifactDefinition> {
    let error = pattern.error()?;
    let resolution = pattern.resolution()?;

    let short: String = pattern
        .id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    let id = format!("pattern-{}", short);

    let subject = pattern.subject.as_deref().unwrap_or("an artifact");
    let headline = first_line(error, 80);

    let mut instructions = format!(
        "When {} fails with:\n\n    {}\n\nApply this resolution:\n\n{}\n",
        subject,
        error.trim().replace('\n', "\n    "),
        resolution.trim()
    );
    if let Some(context) = &pattern.context {
        instructions.push_str(&format!("\nObserved context: {}\n", context.trim()));
    }

    let definition = ArtifactDefinition::new(
        &id,
        ArtifactKind::Skill,
        &format!("Resolution for {}", headline),
        &format!("Resolution learned from {} uses: {}", pattern.use_count(), headline),
    )
    .with_instructions(&instructions);

    Some(definition)
}

fn first_line(text: &str, max: usize) -> String {
    let line = text.trim().lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomous::{LearningConfig, LearningEngine};
    use tempfile::TempDir;

    async fn forge(dir: &TempDir) -> Forge {
        let store = ArtifactStore::open(dir.path().join("data")).await.unwrap();
        Forge::new(ValidationPipeline::default(), Arc::new(store), dir.path().join("work"))
    }

    #[tokio::test]
    async fn test_submit_skill_is_stored() {
        let dir = TempDir::new().unwrap();
        let forge = forge(&dir).await;

        let def = ArtifactDefinition::new("notes", ArtifactKind::Skill, "Notes", "Take notes")
            .with_instructions("Write everything down.");
        let deployment = forge.submit(&def).await.unwrap();

        assert!(deployment.accepted(), "{}", deployment.outcome.verdict.format());
        assert_eq!(deployment.location, Some(dir.path().join("data/artifacts/notes.md")));
        assert!(forge.store().get("notes").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejected_submission_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let forge = forge(&dir).await;

        let def = ArtifactDefinition::new("bad", ArtifactKind::Extension, "Bad", "Bad");
        let deployment = forge.submit_source(&def, "require(child_process)").await.unwrap();

        assert!(!deployment.accepted());
        assert!(deployment.location.is_none());
        assert!(forge.store().list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_definition_is_not_rendered() {
        let dir = TempDir::new().unwrap();
        let forge = forge(&dir).await;

        let def = ArtifactDefinition::new("s", ArtifactKind::Skill, "S", "No instructions");
        let deployment = forge.submit(&def).await.unwrap();
        assert!(!deployment.accepted());
        assert!(deployment.outcome.verdict.errors()[0].contains("instructions"));
    }

    #[tokio::test]
    async fn test_pattern_skill_crystallizes() {
        let dir = TempDir::new().unwrap();
        let forge = forge(&dir).await;
        let engine = LearningEngine::open(dir.path().join("learnings.json"), LearningConfig::default())
            .await
            .unwrap();

        let id = engine
            .record_failure("weather", "ENOENT: no such file 'cache.json'", Some("first run"))
            .await
            .unwrap();
        engine.record_resolution(&id, "Create the cache directory first.").await.unwrap();
        let pattern = engine.get(&id).await.unwrap();

        let skill = pattern_skill(&pattern).unwrap();
        assert!(skill.id.starts_with("pattern-"));
        assert_eq!(skill.id.len(), "pattern-".len() + 8);
        assert!(skill.validate().is_ok());

        let artifact_id = forge.crystallize(&pattern).await.unwrap();
        assert_eq!(artifact_id, skill.id);
        let source = forge.store().source(&artifact_id).await.unwrap().unwrap();
        assert!(source.contains("Create the cache directory first."));
        assert!(source.contains("When weather fails with:"));
    }

    #[test]
    fn test_first_line_truncates() {
        assert_eq!(first_line("short\nsecond", 80), "short");
        assert_eq!(first_line("abcdef", 3), "abc...");
    }
}
