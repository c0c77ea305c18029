//! Validation Pipeline
//!
//! Decides whether a candidate artifact may be deployed:
//!
//! ```text
//! source ──► syntax ──► security scan ──► structure ──► sandbox ──► verdict
//!              │              │                │            │
//!           error          block → error    warning      failure → error
//!                          flag  → flag
//! ```
//!
//! Findings accumulate instead of short-circuiting: a syntax error still lets
//! the scan run so the caller sees every reason at once. The sandbox is the
//! only stage that is skipped, and only when earlier stages produced errors.

use super::sandbox::{SandboxResult, SandboxRunner};
use super::scanner::{ScanReport, SecurityScanner};
use super::syntax;
use super::types::{ArtifactDefinition, ArtifactKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

static ENTRY_POINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"export\s+default\b|export\s+(async\s+)?function\s*\*?\s*(register|activate)\b|export\s*\{[^}]*\b(register|activate)\b",
    )
    .unwrap()
});

static ANY_REGISTRATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.\s*(registerTool|registerCommand|registerHook|on)\s*\(").unwrap()
});

static TOOL_REGISTRATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\s*registerTool\s*\(").unwrap());

static HOOK_REGISTRATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\s*(on|registerHook)\s*\(").unwrap());

static TOOL_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(execute|handler)\s*(\(|:)").unwrap());

/// Outcome of the static stages. `valid` is derived from `errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    security_flags: Vec<String>,
}

impl Default for ValidationVerdict {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationVerdict {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            security_flags: Vec::new(),
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Blocking findings
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Non-blocking advisories
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Non-blocking findings that need review
    pub fn security_flags(&self) -> &[String] {
        &self.security_flags
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.valid = false;
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn push_security_flag(&mut self, flag: impl Into<String>) {
        self.security_flags.push(flag.into());
    }

    /// Format for display
    pub fn format(&self) -> String {
        let mut s = String::new();

        if self.valid {
            s.push_str("✓ Valid\n");
        } else {
            s.push_str("✗ Rejected:\n");
            for error in &self.errors {
                s.push_str(&format!("  - {}\n", error));
            }
        }
        if !self.warnings.is_empty() {
            s.push_str("⚠ Warnings:\n");
            for warning in &self.warnings {
                s.push_str(&format!("  - {}\n", warning));
            }
        }
        if !self.security_flags.is_empty() {
            s.push_str("! Needs review:\n");
            for flag in &self.security_flags {
                s.push_str(&format!("  - {}\n", flag));
            }
        }

        s
    }
}

/// Per-submission states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Pending,
    SyntaxFailed,
    SecurityBlocked,
    StructurallyInvalid,
    SandboxTesting,
    SandboxFailed,
    SandboxPassed,
    Accepted,
    Rejected,
}

impl SubmissionState {
    /// Legal edges of the submission state machine
    pub fn can_transition_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Pending, SyntaxFailed | SecurityBlocked | StructurallyInvalid | SandboxTesting)
                // non-executable kinds have nothing to run
                | (Pending, Accepted)
                | (SyntaxFailed | SecurityBlocked | StructurallyInvalid, Rejected)
                | (SandboxTesting, SandboxFailed | SandboxPassed)
                | (SandboxFailed, Rejected)
                | (SandboxPassed, Accepted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::Accepted | SubmissionState::Rejected)
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::SyntaxFailed => "syntax_failed",
            Self::SecurityBlocked => "security_blocked",
            Self::StructurallyInvalid => "structurally_invalid",
            Self::SandboxTesting => "sandbox_testing",
            Self::SandboxFailed => "sandbox_failed",
            Self::SandboxPassed => "sandbox_passed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// State history of one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    trace: Vec<SubmissionState>,
}

impl Default for Submission {
    fn default() -> Self {
        Self::new()
    }
}

impl Submission {
    pub fn new() -> Self {
        Self {
            trace: vec![SubmissionState::Pending],
        }
    }

    pub fn current(&self) -> SubmissionState {
        self.trace
            .last()
            .copied()
            .unwrap_or(SubmissionState::Pending)
    }

    pub fn trace(&self) -> &[SubmissionState] {
        &self.trace
    }

    /// Advance along a legal edge
    pub fn advance(&mut self, next: SubmissionState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal submission transition {} -> {}",
            self.current(),
            next
        );
        self.trace.push(next);
    }

    /// Record the failing stage and close the submission
    pub fn reject(&mut self, stage: SubmissionState) {
        self.advance(stage);
        self.advance(SubmissionState::Rejected);
    }

    pub fn is_accepted(&self) -> bool {
        self.current() == SubmissionState::Accepted
    }

    /// The stage that caused a rejection
    pub fn failed_stage(&self) -> Option<SubmissionState> {
        if self.current() != SubmissionState::Rejected {
            return None;
        }
        self.trace.iter().rev().nth(1).copied()
    }
}

/// Combined verdict and sandbox outcome for one submission
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub submission: Submission,
    pub verdict: ValidationVerdict,
    /// Present when the sandbox ran
    pub sandbox: Option<SandboxResult>,
}

impl PipelineOutcome {
    pub fn accepted(&self) -> bool {
        self.submission.is_accepted()
    }

    pub fn state(&self) -> SubmissionState {
        self.submission.current()
    }

    /// Rejection before any stage ran, e.g. a malformed definition
    pub fn structurally_invalid(error: impl Into<String>) -> Self {
        let mut verdict = ValidationVerdict::new();
        verdict.push_error(format!("structure: {}", error.into()));
        let mut submission = Submission::new();
        submission.reject(SubmissionState::StructurallyInvalid);
        Self {
            submission,
            verdict,
            sandbox: None,
        }
    }
}

/// Static stages plus the stage that failed first, if any
struct StaticReport {
    verdict: ValidationVerdict,
    failed: Option<SubmissionState>,
}

/// Orchestrates scanner and sandbox into one verdict
#[derive(Debug, Clone, Default)]
pub struct ValidationPipeline {
    scanner: SecurityScanner,
    sandbox: SandboxRunner,
}

impl ValidationPipeline {
    pub fn new(scanner: SecurityScanner, sandbox: SandboxRunner) -> Self {
        Self { scanner, sandbox }
    }

    pub fn scanner(&self) -> &SecurityScanner {
        &self.scanner
    }

    pub fn sandbox(&self) -> &SandboxRunner {
        &self.sandbox
    }

    /// Run the static stages: syntax, security, structure
    pub fn validate(&self, source: &str, kind: ArtifactKind) -> ValidationVerdict {
        self.validate_static(source, kind).verdict
    }

    /// Execute the candidate's registration in the sandbox
    pub async fn sandbox_test(&self, source: &str, work_dir: &Path) -> SandboxResult {
        self.sandbox.run(source, work_dir).await
    }

    /// Full pipeline for raw source
    pub async fn evaluate(&self, source: &str, kind: ArtifactKind, work_dir: &Path) -> PipelineOutcome {
        let StaticReport { mut verdict, failed } = self.validate_static(source, kind);
        let mut submission = Submission::new();

        if let Some(stage) = failed {
            submission.reject(stage);
            info!(%kind, state = %stage, errors = verdict.errors().len(), "Submission rejected");
            return PipelineOutcome {
                submission,
                verdict,
                sandbox: None,
            };
        }

        if !kind.is_code() {
            submission.advance(SubmissionState::Accepted);
            info!(%kind, "Submission accepted without execution");
            return PipelineOutcome {
                submission,
                verdict,
                sandbox: None,
            };
        }

        submission.advance(SubmissionState::SandboxTesting);
        let result = self.sandbox_test(source, work_dir).await;

        if result.success {
            submission.advance(SubmissionState::SandboxPassed);
            submission.advance(SubmissionState::Accepted);
            info!(%kind, duration_ms = result.duration_ms, "Submission accepted");
        } else {
            let diagnostic = result
                .error
                .clone()
                .unwrap_or_else(|| "sandbox run failed".to_string());
            verdict.push_error(format!("sandbox: {}", diagnostic));
            submission.reject(SubmissionState::SandboxFailed);
            info!(%kind, error = %diagnostic, "Submission rejected by sandbox");
        }

        PipelineOutcome {
            submission,
            verdict,
            sandbox: Some(result),
        }
    }

    /// Full pipeline for a definition and its rendered source
    pub async fn evaluate_definition(
        &self,
        definition: &ArtifactDefinition,
        source: &str,
        work_dir: &Path,
    ) -> PipelineOutcome {
        if let Err(e) = definition.validate() {
            info!(id = %definition.id, "Definition rejected: {}", e);
            return PipelineOutcome::structurally_invalid(e.to_string());
        }
        self.evaluate(source, definition.kind, work_dir).await
    }

    fn validate_static(&self, source: &str, kind: ArtifactKind) -> StaticReport {
        let mut verdict = ValidationVerdict::new();
        let mut failed = None;

        // 1. Syntax
        let parsed = if kind.is_code() {
            syntax::check_module(source).map(|_| None)
        } else {
            syntax::parse_front_matter(source).map(Some)
        };
        let front_matter = match parsed {
            Ok(fm) => fm,
            Err(issue) => {
                verdict.push_error(format!("syntax error: {}", issue));
                failed = Some(SubmissionState::SyntaxFailed);
                None
            }
        };

        // 2. Security
        let ScanReport { blocked, flagged } = self.scanner.scan(source);
        if !blocked.is_empty() {
            failed.get_or_insert(SubmissionState::SecurityBlocked);
        }
        for reason in blocked {
            verdict.push_error(format!("security: {}", reason));
        }
        for reason in flagged {
            verdict.push_security_flag(reason);
        }

        // 3. Structure
        if kind.is_code() {
            structural_warnings(source, kind, &mut verdict);
        } else if let Some(fm) = front_matter {
            if fm.body.trim().is_empty() {
                verdict.push_warning("skill has no instructions after the front matter");
            }
        }

        debug!(
            %kind,
            errors = verdict.errors().len(),
            warnings = verdict.warnings().len(),
            flags = verdict.security_flags().len(),
            "Static validation finished"
        );
        StaticReport { verdict, failed }
    }
}

fn structural_warnings(source: &str, kind: ArtifactKind, verdict: &mut ValidationVerdict) {
    if !ENTRY_POINT.is_match(source) {
        verdict.push_warning("no registration entry point (export default, register or activate)");
    }
    if !ANY_REGISTRATION.is_match(source) {
        verdict.push_warning("no capability is registered");
    }

    let tools = TOOL_REGISTRATION.find_iter(source).count();
    match kind {
        ArtifactKind::Tool if tools == 0 => verdict.push_warning("tool artifact registers no tool"),
        ArtifactKind::Hook if !HOOK_REGISTRATION.is_match(source) => {
            verdict.push_warning("hook artifact subscribes no event")
        }
        _ => {}
    }

    let handlers = TOOL_HANDLER.find_iter(source).count();
    if handlers < tools {
        verdict.push_warning(format!(
            "{} tool registration(s) but {} execute handler(s)",
            tools, handlers
        ));
    }
}
