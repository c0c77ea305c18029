//! Capability Forge
//!
//! Generation and validation of capability artifacts for autonomous agents.
//!
//! # Features
//!
//! - **Generator**: named-slot templates render definitions into ES modules or skills
//! - **Security Scanner**: block/flag regex policy with an optional TOML rule table
//! - **Sandbox**: one isolated, time-boxed `node` run against a mocked host API
//! - **Validation Pipeline**: syntax → security → structure → sandbox, one verdict
//! - **Artifact Store**: JSON manifest with atomic writes and crash reconciliation
//! - **Learning Engine**: failure → pattern → crystallization lifecycle
//!
//! # Architecture
//!
//! ```text
//! Definition ──► Forge ──► Generator ──► Pipeline ──► Artifact Store
//!                  ▲                                        ▲
//!                  │ Crystallizer                           │
//!                  │                                        │
//!   LearningEngine ◄── LearningMaintenance (auto-link, crystallize, prune)
//! ```

pub mod autonomous;
pub mod config;
pub mod forge;

pub use autonomous::{LearningConfig, LearningEngine, LearningEntry, LearningMaintenance};
pub use config::Config;
pub use forge::{
    ArtifactDefinition, ArtifactKind, ArtifactStore, Forge, PipelineOutcome, SandboxRunner,
    SecurityScanner, ValidationPipeline, ValidationVerdict,
};
