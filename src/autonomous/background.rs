//! Learning Maintenance
//!
//! Runs periodic tasks over the learning collection:
//! - Auto-link (attach canned resolutions to well-known failures)
//! - Crystallization (promote heavily reused patterns to artifacts)
//! - Pruning (drop entries nobody referenced within the retention window)

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::learner::{LearningEngine, LearningEntry, LearningError, LearningResult};

/// Failure signatures (regular expressions, case-insensitive) with a canned
/// resolution
pub const KNOWN_RESOLUTIONS: &[(&str, &str)] = &[
    (
        r"\bENOENT\b",
        "A file or directory is missing. Check the path and create parent directories before writing.",
    ),
    (
        r"\bEACCES\b",
        "Permission denied. Write inside the artifact's working directory or adjust file permissions.",
    ),
    (
        r"\bECONNREFUSED\b",
        "The target service is not listening. Verify host and port and that the service is running.",
    ),
    (
        r"\bETIMEDOUT\b",
        "The remote end did not answer in time. Add a timeout with retry and backoff.",
    ),
    (
        r"\bCannot find module\b",
        "A dependency is not installed or the import path is wrong. Use built-in modules or fix the specifier.",
    ),
    (
        r"\bis not a function\b",
        "A value was called that is not callable. Check the export name and the object shape before calling.",
    ),
    (
        r"\bUnexpected token\b",
        "The input could not be parsed. Validate JSON or source text before parsing it.",
    ),
    (
        r"\b(HTTP|status|code)\s*:?\s*429\b|\b429\s+Too Many Requests\b|\brate[- ]?limit",
        "Rate limited. Back off exponentially and honor any Retry-After header.",
    ),
];

static SIGNATURES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    KNOWN_RESOLUTIONS
        .iter()
        .map(|(signature, resolution)| {
            let regex = RegexBuilder::new(signature)
                .case_insensitive(true)
                .build()
                .expect("built-in failure signatures compile");
            (regex, *resolution)
        })
        .collect()
});

/// Canned resolution for an error, if it carries a known signature
pub fn known_resolution(error: &str) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(signature, _)| signature.is_match(error))
        .map(|(_, resolution)| *resolution)
}

/// Crystallization failure
#[derive(Error, Debug)]
pub enum CrystallizeError {
    #[error("Artifact rejected: {0}")]
    Rejected(String),
    #[error("Crystallization failed: {0}")]
    Failed(String),
}

/// Target that turns a pattern into a permanent artifact
#[async_trait]
pub trait Crystallizer: Send + Sync {
    /// Promote `pattern`. Returns the id of the stored artifact.
    async fn crystallize(&self, pattern: &LearningEntry) -> Result<String, CrystallizeError>;
}

/// Configuration for maintenance
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between auto-link runs
    pub auto_link_interval: Duration,
    /// Interval between crystallization runs
    pub crystallize_interval: Duration,
    /// Interval between prune runs
    pub prune_interval: Duration,
    /// How often `run_continuous` checks for due tasks
    pub tick: Duration,
    /// Enable maintenance
    pub enabled: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            auto_link_interval: Duration::from_secs(60),     // 1 minute
            crystallize_interval: Duration::from_secs(300),  // 5 minutes
            prune_interval: Duration::from_secs(3600),       // 1 hour
            tick: Duration::from_secs(30),
            enabled: true,
        }
    }
}

/// Maintenance task types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceTask {
    AutoLink,
    Crystallize,
    Prune,
}

impl MaintenanceTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceTask::AutoLink => "auto_link",
            MaintenanceTask::Crystallize => "crystallize",
            MaintenanceTask::Prune => "prune",
        }
    }
}

/// Statistics for maintenance
#[derive(Debug, Default)]
pub struct MaintenanceStats {
    pub auto_link_runs: AtomicU64,
    pub failures_linked: AtomicU64,
    pub crystallize_runs: AtomicU64,
    pub patterns_crystallized: AtomicU64,
    pub crystallize_failures: AtomicU64,
    pub prune_runs: AtomicU64,
    pub entries_pruned: AtomicU64,
}

/// Periodic maintenance over a learning engine
pub struct LearningMaintenance {
    config: MaintenanceConfig,
    engine: Arc<LearningEngine>,
    crystallizer: Arc<dyn Crystallizer>,
    stats: Arc<MaintenanceStats>,
    running: AtomicBool,
    /// Last run timestamps for each task
    last_runs: Arc<RwLock<HashMap<MaintenanceTask, i64>>>,
}

impl LearningMaintenance {
    /// Create with default config
    pub fn new(engine: Arc<LearningEngine>, crystallizer: Arc<dyn Crystallizer>) -> Self {
        Self::with_config(MaintenanceConfig::default(), engine, crystallizer)
    }

    /// Create with custom config
    pub fn with_config(
        config: MaintenanceConfig,
        engine: Arc<LearningEngine>,
        crystallizer: Arc<dyn Crystallizer>,
    ) -> Self {
        Self {
            config,
            engine,
            crystallizer,
            stats: Arc::new(MaintenanceStats::default()),
            running: AtomicBool::new(false),
            last_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check if a pass is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run every task that is due. A pass already in progress makes this a
    /// no-op, so a pattern is never handed to the crystallizer twice.
    pub async fn run_once(&self) -> LearningResult<Vec<(MaintenanceTask, usize)>> {
        if !self.config.enabled {
            return Ok(vec![]);
        }
        if !self.try_begin() {
            debug!("Maintenance pass already running");
            return Ok(vec![]);
        }

        let result = self.run_due().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn run_due(&self) -> LearningResult<Vec<(MaintenanceTask, usize)>> {
        let now = chrono::Utc::now().timestamp();
        let mut results = Vec::new();
        let mut last_runs = self.last_runs.write().await;

        // Auto-link first so fresh patterns are visible to crystallization
        let schedule = [
            (MaintenanceTask::AutoLink, self.config.auto_link_interval),
            (MaintenanceTask::Crystallize, self.config.crystallize_interval),
            (MaintenanceTask::Prune, self.config.prune_interval),
        ];

        for (task, every) in schedule {
            let last = last_runs.get(&task).copied().unwrap_or(0);
            if now - last >= every.as_secs() as i64 {
                let count = self.execute(task).await?;
                results.push((task, count));
                last_runs.insert(task, now);
            }
        }

        Ok(results)
    }

    /// Run one task regardless of schedule. Shares the pass guard with
    /// [`run_once`](Self::run_once): while another pass runs this does
    /// nothing and returns 0.
    pub async fn run_task(&self, task: MaintenanceTask) -> LearningResult<usize> {
        if !self.try_begin() {
            debug!(task = task.as_str(), "Maintenance pass already running");
            return Ok(0);
        }

        let result = self.execute(task).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn execute(&self, task: MaintenanceTask) -> LearningResult<usize> {
        let count = match task {
            MaintenanceTask::AutoLink => {
                let count = self.run_auto_link().await?;
                self.stats.auto_link_runs.fetch_add(1, Ordering::Relaxed);
                self.stats.failures_linked.fetch_add(count as u64, Ordering::Relaxed);
                count
            }
            MaintenanceTask::Crystallize => {
                let count = self.run_crystallize().await?;
                self.stats.crystallize_runs.fetch_add(1, Ordering::Relaxed);
                self.stats.patterns_crystallized.fetch_add(count as u64, Ordering::Relaxed);
                count
            }
            MaintenanceTask::Prune => {
                let count = self.engine.prune(chrono::Utc::now()).await?;
                self.stats.prune_runs.fetch_add(1, Ordering::Relaxed);
                self.stats.entries_pruned.fetch_add(count as u64, Ordering::Relaxed);
                count
            }
        };
        debug!(task = task.as_str(), count, "Maintenance task finished");
        Ok(count)
    }

    /// Start continuous maintenance loop
    pub async fn run_continuous(self: Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Learning maintenance disabled");
            return;
        }

        info!("Starting learning maintenance");
        let mut interval = interval(self.config.tick);

        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!("Maintenance task error: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Learning maintenance shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_auto_link(&self) -> LearningResult<usize> {
        let mut linked = 0;
        for failure in self.engine.open_failures().await {
            let Some(resolution) = failure.error().and_then(known_resolution) else {
                continue;
            };
            // Resolved or pruned since the snapshot: leave it be
            if self.engine.link_open_failure(&failure.id, resolution).await? {
                linked += 1;
            }
        }

        if linked > 0 {
            info!("Auto-linked {} failures to known resolutions", linked);
        }
        Ok(linked)
    }

    async fn run_crystallize(&self) -> LearningResult<usize> {
        let mut promoted = 0;
        for pattern in self.engine.due_for_crystallization().await {
            match self.crystallizer.crystallize(&pattern).await {
                Ok(artifact_id) => {
                    self.engine.mark_crystallized(&pattern.id, &artifact_id).await?;
                    promoted += 1;
                }
                Err(CrystallizeError::Rejected(reason)) => {
                    warn!(pattern = %pattern.id, "Crystallized artifact rejected: {}", reason);
                    self.stats.crystallize_failures.fetch_add(1, Ordering::Relaxed);
                    match self.engine.mark_rejected(&pattern.id, &reason).await {
                        Ok(()) | Err(LearningError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => {
                    // Left as is; the next run retries
                    warn!(pattern = %pattern.id, "Crystallization failed: {}", e);
                    self.stats.crystallize_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if promoted > 0 {
            info!("Crystallized {} patterns", promoted);
        }
        Ok(promoted)
    }

    /// Get current statistics
    pub fn stats(&self) -> &MaintenanceStats {
        &self.stats
    }
}
