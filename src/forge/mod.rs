//! Capability Forge
//!
//! Generates capability artifacts and decides whether they may be deployed.
//!
//! # Architecture
//!
//! ```text
//! ArtifactDefinition ──► Generator ──► source text
//!                                          │
//!                                          ▼
//!                               Validation Pipeline
//!                    syntax → security scan → structure → sandbox
//!                                          │
//!                             accepted ────┴──── rejected
//!                                 │                  │
//!                                 ▼                  ▼
//!                          Artifact Store      PipelineOutcome
//! ```
//!
//! # Definition Format
//!
//! ```toml
//! id = "weather"
//! kind = "tool"
//! name = "Weather"
//! description = "Current weather for a city"
//!
//! [[tools]]
//! name = "get_weather"
//! description = "Look up the weather"
//! body = "return { city: params.city };"
//!
//! [tools.parameters.city]
//! type = "string"
//! description = "City name"
//! required = true
//! ```
//!
//! # Security
//!
//! Candidates are scanned against a block/flag rule table before they run,
//! then executed once in a child process with:
//! - A scrubbed environment (allowlisted variables only)
//! - A throwaway working directory removed on every exit path
//! - A hard timeout ending in SIGTERM, then SIGKILL
//! - A mocked registration API with no real side effects

pub mod deployer;
pub mod generator;
pub mod loader;
pub mod sandbox;
pub mod scanner;
pub mod store;
pub mod syntax;
pub mod types;
pub mod validator;

pub use deployer::{pattern_skill, Deployment, Forge, ForgeError, ForgeResult};
pub use generator::{ArtifactGenerator, RenderError, Template};
pub use loader::DefinitionLoader;
pub use sandbox::{SandboxConfig, SandboxResult, SandboxRunner, SANDBOX_SENTINEL};
pub use scanner::{PolicyFile, RuleSpec, ScanError, ScanReport, SecurityPolicy, SecurityScanner};
pub use store::{ArtifactStore, ManifestRecord, ReconcileReport, StoreError, StoreResult};
pub use syntax::{FrontMatter, SyntaxIssue};
pub use types::{
    ArtifactDefinition, ArtifactKind, DefinitionError, HookSpec, ParameterSpec, ParameterType, ToolSpec,
};
pub use validator::{PipelineOutcome, Submission, SubmissionState, ValidationPipeline, ValidationVerdict};
