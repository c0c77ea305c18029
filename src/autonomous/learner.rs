//! Learning Engine
//!
//! Turns runtime outcomes of deployed artifacts into reusable knowledge:
//!
//! - Failures are recorded per subject, at most one open at a time
//! - Attaching a resolution upgrades a failure to a pattern, in place
//! - Successes resolve the open failure and reinforce existing patterns
//! - Heavily reused patterns become crystallization candidates
//!
//! Every mutation is applied to a staged copy, persisted to `learnings.json`
//! and only then swapped in, all under the write guard. A failed write leaves
//! both the file and the in-memory collection as they were.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::forge::store::write_atomic;

/// Learning errors
#[derive(Error, Debug)]
pub enum LearningError {
    #[error("Learning entry not found: {0}")]
    NotFound(String),
    #[error("Cannot {action} a {from} entry ({id})")]
    InvalidTransition {
        id: String,
        from: EntryType,
        action: &'static str,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type LearningResult<T> = Result<T, LearningError>;

/// Configuration for the learning engine
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Uses before a pattern is a crystallization candidate
    pub pattern_threshold: u64,
    /// Uses before a pattern is promoted to an artifact
    pub crystallize_threshold: u64,
    /// Days without reference before an entry may be pruned
    pub retention_days: i64,
    /// Success entries kept, oldest evicted first
    pub max_successes: usize,
    /// Cap on `find_relevant` results
    pub max_relevant: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: 3,
            crystallize_threshold: 5,
            retention_days: 30,
            max_successes: 100,
            max_relevant: 10,
        }
    }
}

impl LearningConfig {
    pub fn retention(&self) -> Duration {
        Duration::days(self.retention_days)
    }
}

/// Entry discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Failure,
    Success,
    Pattern,
    Insight,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Failure => "failure",
            EntryType::Success => "success",
            EntryType::Pattern => "pattern",
            EntryType::Insight => "insight",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    Failure {
        error: String,
        /// Cleared when superseded by a different error
        #[serde(default = "default_true")]
        open: bool,
        #[serde(default = "default_one")]
        occurrences: u32,
    },
    Pattern {
        error: String,
        resolution: String,
        #[serde(default)]
        use_count: u64,
        last_used: DateTime<Utc>,
        /// Id of the artifact this pattern was promoted into
        #[serde(default)]
        crystallized_as: Option<String>,
        /// `use_count` when the last promotion attempt was rejected
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejected_at: Option<u64>,
    },
    Success,
    Insight {
        text: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

/// One learned item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl LearningEntry {
    fn new(subject: Option<&str>, context: Option<&str>, kind: EntryKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject: subject.map(str::to_string),
            context: context.map(str::to_string),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::Failure { .. } => EntryType::Failure,
            EntryKind::Pattern { .. } => EntryType::Pattern,
            EntryKind::Success => EntryType::Success,
            EntryKind::Insight { .. } => EntryType::Insight,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Failure { error, .. } | EntryKind::Pattern { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn resolution(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Pattern { resolution, .. } => Some(resolution),
            _ => None,
        }
    }

    pub fn use_count(&self) -> u64 {
        match self.kind {
            EntryKind::Pattern { use_count, .. } => use_count,
            _ => 0,
        }
    }

    pub fn crystallized_as(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Pattern { crystallized_as, .. } => crystallized_as.as_deref(),
            _ => None,
        }
    }

    pub fn is_open_failure(&self) -> bool {
        matches!(self.kind, EntryKind::Failure { open: true, .. })
    }

    /// A rejected promotion is not retried until the pattern is used again
    /// or its resolution changes.
    pub fn crystallization_blocked(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::Pattern { use_count, rejected_at: Some(at), .. } if at >= use_count
        )
    }

    fn is_subject(&self, subject: &str) -> bool {
        self.subject.as_deref() == Some(subject)
    }

    /// When the entry was last referenced
    pub fn last_reference(&self) -> DateTime<Utc> {
        match self.kind {
            EntryKind::Pattern { last_used, .. } => last_used.max(self.timestamp),
            _ => self.timestamp,
        }
    }

    /// Attach a resolution. A failure becomes a pattern; a pattern only has
    /// its resolution text replaced. Returns true on the upgrade.
    pub fn resolve(&mut self, text: &str) -> LearningResult<bool> {
        let error = match &mut self.kind {
            EntryKind::Failure { error, .. } => std::mem::take(error),
            EntryKind::Pattern { resolution, rejected_at, .. } => {
                *resolution = text.to_string();
                *rejected_at = None;
                return Ok(false);
            }
            _ => return Err(self.invalid("resolve")),
        };

        self.kind = EntryKind::Pattern {
            error,
            resolution: text.to_string(),
            use_count: 0,
            last_used: Utc::now(),
            crystallized_as: None,
            rejected_at: None,
        };
        Ok(true)
    }

    fn reinforce(&mut self, now: DateTime<Utc>) {
        if let EntryKind::Pattern { use_count, last_used, .. } = &mut self.kind {
            *use_count += 1;
            *last_used = now;
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if let EntryKind::Pattern { last_used, .. } = &mut self.kind {
            *last_used = now;
        }
    }

    fn close(&mut self) {
        if let EntryKind::Failure { open, .. } = &mut self.kind {
            *open = false;
        }
    }

    fn crystallize(&mut self, artifact_id: &str) -> LearningResult<()> {
        match &mut self.kind {
            EntryKind::Pattern { crystallized_as: slot @ None, .. } => {
                *slot = Some(artifact_id.to_string());
                Ok(())
            }
            _ => Err(self.invalid("crystallize")),
        }
    }

    fn reject_crystallization(&mut self) -> LearningResult<()> {
        match &mut self.kind {
            EntryKind::Pattern {
                use_count,
                rejected_at,
                crystallized_as: None,
                ..
            } => {
                *rejected_at = Some(*use_count);
                Ok(())
            }
            _ => Err(self.invalid("reject")),
        }
    }

    fn invalid(&self, action: &'static str) -> LearningError {
        LearningError::InvalidTransition {
            id: self.id.clone(),
            from: self.entry_type(),
            action,
        }
    }
}

/// Snapshot of the learning collection
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LearningStats {
    pub failures: usize,
    pub open_failures: usize,
    pub patterns: usize,
    pub successes: usize,
    pub insights: usize,
    pub candidates: usize,
    pub crystallized: usize,
}

/// Persistent learning collection
pub struct LearningEngine {
    config: LearningConfig,
    path: PathBuf,
    entries: RwLock<Vec<LearningEntry>>,
}

impl LearningEngine {
    /// Open the collection stored at `path`
    pub async fn open(path: impl Into<PathBuf>, config: LearningConfig) -> LearningResult<Self> {
        let path = path.into();
        let entries = load_entries(&path).await?;
        info!(path = %path.display(), entries = entries.len(), "Learning engine opened");

        Ok(Self {
            config,
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the collection from disk
    pub async fn reload(&self) -> LearningResult<usize> {
        let fresh = load_entries(&self.path).await?;
        let mut entries = self.entries.write().await;
        *entries = fresh;
        Ok(entries.len())
    }

    /// Record a failed invocation. The same open error for the subject is
    /// refreshed; a different one supersedes it.
    pub async fn record_failure(
        &self,
        subject: &str,
        error: &str,
        context: Option<&str>,
    ) -> LearningResult<String> {
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();
        let now = Utc::now();

        let open = most_recent_open_failure(&entries, subject);
        if let Some(idx) = open {
            let entry = &mut entries[idx];
            if entry.error() == Some(error) {
                entry.timestamp = now;
                if let Some(ctx) = context {
                    entry.context = Some(ctx.to_string());
                }
                if let EntryKind::Failure { occurrences, .. } = &mut entry.kind {
                    *occurrences += 1;
                }
                let id = entry.id.clone();
                self.commit(&mut guard, entries).await?;
                debug!(subject, id = %id, "Refreshed open failure");
                return Ok(id);
            }
        }

        for entry in entries.iter_mut().filter(|e| e.is_open_failure() && e.is_subject(subject)) {
            entry.close();
        }

        let entry = LearningEntry::new(
            Some(subject),
            context,
            EntryKind::Failure {
                error: error.to_string(),
                open: true,
                occurrences: 1,
            },
        );
        let id = entry.id.clone();
        entries.push(entry);
        self.commit(&mut guard, entries).await?;

        info!(subject, id = %id, superseded = open.is_some(), "Recorded failure");
        Ok(id)
    }

    /// Attach a resolution to a failure or pattern
    pub async fn record_resolution(&self, id: &str, resolution: &str) -> LearningResult<()> {
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LearningError::NotFound(id.to_string()))?;

        let upgraded = entry.resolve(resolution)?;
        self.commit(&mut guard, entries).await?;

        if upgraded {
            info!(id, "Failure resolved into pattern");
        } else {
            debug!(id, "Pattern resolution updated");
        }
        Ok(())
    }

    /// Resolve `id` only while it is still an open failure. Anything else,
    /// including an entry that no longer exists, is left alone and yields
    /// false.
    pub async fn link_open_failure(&self, id: &str, resolution: &str) -> LearningResult<bool> {
        let mut guard = self.entries.write().await;
        if !guard.iter().any(|e| e.id == id && e.is_open_failure()) {
            return Ok(false);
        }

        let mut entries = guard.clone();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.resolve(resolution)?;
        }
        self.commit(&mut guard, entries).await?;

        info!(id, "Open failure linked to known resolution");
        Ok(true)
    }

    /// Record a successful invocation. Returns the success entry id.
    pub async fn record_success(&self, subject: &str, context: &str) -> LearningResult<String> {
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();
        let now = Utc::now();

        let resolved = most_recent_open_failure(&entries, subject);
        if let Some(idx) = resolved {
            entries[idx].resolve(context)?;
            info!(subject, id = %entries[idx].id, "Success resolved open failure");
        }

        for (idx, entry) in entries.iter_mut().enumerate() {
            if !entry.is_subject(subject) || Some(idx) == resolved {
                continue;
            }
            match entry.entry_type() {
                EntryType::Pattern => entry.reinforce(now),
                // Older open failures lose to the one just resolved
                EntryType::Failure => entry.close(),
                _ => {}
            }
        }

        let entry = LearningEntry::new(Some(subject), Some(context), EntryKind::Success);
        let id = entry.id.clone();
        entries.push(entry);
        evict_successes(&mut entries, self.config.max_successes);

        self.commit(&mut guard, entries).await?;
        Ok(id)
    }

    /// Record a free-form insight
    pub async fn record_insight(&self, text: &str, context: Option<&str>) -> LearningResult<String> {
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();
        let entry = LearningEntry::new(
            None,
            context,
            EntryKind::Insight {
                text: text.to_string(),
            },
        );
        let id = entry.id.clone();
        entries.push(entry);
        self.commit(&mut guard, entries).await?;

        debug!(id = %id, "Recorded insight");
        Ok(id)
    }

    /// Patterns and insights matching the filters, most recent first.
    /// Returned patterns count as referenced.
    pub async fn find_relevant(
        &self,
        subject: Option<&str>,
        error_substring: Option<&str>,
    ) -> LearningResult<Vec<LearningEntry>> {
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();
        let needle = error_substring.map(str::to_lowercase);

        let mut matches: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.entry_type(), EntryType::Pattern | EntryType::Insight))
            .filter(|(_, e)| subject.map_or(true, |s| e.is_subject(s)))
            .filter(|(_, e)| {
                needle.as_deref().map_or(true, |n| {
                    let haystack = match &e.kind {
                        EntryKind::Insight { text } => text.as_str(),
                        _ => e.error().unwrap_or(""),
                    };
                    haystack.to_lowercase().contains(n)
                })
            })
            .map(|(idx, _)| idx)
            .collect();

        matches.sort_by(|a, b| entries[*b].timestamp.cmp(&entries[*a].timestamp));
        matches.truncate(self.config.max_relevant);

        let now = Utc::now();
        let mut result = Vec::with_capacity(matches.len());
        for idx in matches {
            entries[idx].touch(now);
            result.push(entries[idx].clone());
        }

        if result.iter().any(|e| e.entry_type() == EntryType::Pattern) {
            self.commit(&mut guard, entries).await?;
        }
        Ok(result)
    }

    pub async fn get(&self, id: &str) -> Option<LearningEntry> {
        self.entries.read().await.iter().find(|e| e.id == id).cloned()
    }

    pub async fn get_patterns(&self) -> Vec<LearningEntry> {
        self.of_type(EntryType::Pattern).await
    }

    pub async fn get_insights(&self) -> Vec<LearningEntry> {
        self.of_type(EntryType::Insight).await
    }

    pub async fn open_failures(&self) -> Vec<LearningEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.is_open_failure())
            .cloned()
            .collect()
    }

    /// Uncrystallized patterns at or above the candidate threshold
    pub async fn crystallization_candidates(&self) -> Vec<LearningEntry> {
        self.uncrystallized_at(self.config.pattern_threshold).await
    }

    /// Uncrystallized patterns at or above the promotion threshold, minus
    /// those whose last rejected attempt has not seen a new use since
    pub async fn due_for_crystallization(&self) -> Vec<LearningEntry> {
        let mut due = self.uncrystallized_at(self.config.crystallize_threshold).await;
        due.retain(|e| !e.crystallization_blocked());
        due
    }

    /// Record that promoting `id` was rejected at its current use count
    pub async fn mark_rejected(&self, id: &str, reason: &str) -> LearningResult<()> {
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LearningError::NotFound(id.to_string()))?;

        entry.reject_crystallization()?;
        let at = entry.use_count();
        self.commit(&mut guard, entries).await?;

        info!(id, use_count = at, reason, "Crystallization rejected; waiting for another use");
        Ok(())
    }

    /// Record that a pattern produced `artifact_id`. Fails if it already did.
    pub async fn mark_crystallized(&self, id: &str, artifact_id: &str) -> LearningResult<()> {
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LearningError::NotFound(id.to_string()))?;

        entry.crystallize(artifact_id)?;
        self.commit(&mut guard, entries).await?;

        info!(id, artifact = artifact_id, "Pattern crystallized");
        Ok(())
    }

    /// Drop entries not referenced within the retention window.
    /// Crystallized patterns are kept. Returns the removed count.
    pub async fn prune(&self, now: DateTime<Utc>) -> LearningResult<usize> {
        let cutoff = now - self.config.retention();
        let mut guard = self.entries.write().await;
        let mut entries = guard.clone();

        let before = entries.len();
        entries.retain(|e| e.crystallized_as().is_some() || e.last_reference() >= cutoff);
        let removed = before - entries.len();

        if removed > 0 {
            self.commit(&mut guard, entries).await?;
            info!(removed, "Pruned stale learning entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> LearningStats {
        let entries = self.entries.read().await;
        let mut stats = LearningStats::default();

        for entry in entries.iter() {
            match entry.entry_type() {
                EntryType::Failure => {
                    stats.failures += 1;
                    if entry.is_open_failure() {
                        stats.open_failures += 1;
                    }
                }
                EntryType::Pattern => {
                    stats.patterns += 1;
                    if entry.crystallized_as().is_some() {
                        stats.crystallized += 1;
                    } else if entry.use_count() >= self.config.pattern_threshold {
                        stats.candidates += 1;
                    }
                }
                EntryType::Success => stats.successes += 1,
                EntryType::Insight => stats.insights += 1,
            }
        }
        stats
    }

    async fn of_type(&self, entry_type: EntryType) -> Vec<LearningEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.entry_type() == entry_type)
            .cloned()
            .collect()
    }

    async fn uncrystallized_at(&self, threshold: u64) -> Vec<LearningEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| {
                e.entry_type() == EntryType::Pattern
                    && e.crystallized_as().is_none()
                    && e.use_count() >= threshold
            })
            .cloned()
            .collect()
    }

    /// Persist `staged`, then make it the live collection
    async fn commit(
        &self,
        live: &mut Vec<LearningEntry>,
        staged: Vec<LearningEntry>,
    ) -> LearningResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(&staged)?;
        write_atomic(&self.path, &data).await?;
        *live = staged;
        Ok(())
    }
}

fn most_recent_open_failure(entries: &[LearningEntry], subject: &str) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_open_failure() && e.is_subject(subject))
        .max_by_key(|(_, e)| e.timestamp)
        .map(|(idx, _)| idx)
}

/// Keep the newest `max` success entries
fn evict_successes(entries: &mut Vec<LearningEntry>, max: usize) {
    let successes = entries
        .iter()
        .filter(|e| e.entry_type() == EntryType::Success)
        .count();
    let mut excess = successes.saturating_sub(max);
    if excess == 0 {
        return;
    }

    entries.retain(|e| {
        if excess > 0 && e.entry_type() == EntryType::Success {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

async fn load_entries(path: &Path) -> LearningResult<Vec<LearningEntry>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str(&content) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            warn!(path = %path.display(), "Malformed learning file treated as empty: {}", e);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn engine(dir: &TempDir) -> LearningEngine {
        LearningEngine::open(dir.path().join("learnings.json"), LearningConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = LearningConfig::default();
        assert_eq!(config.pattern_threshold, 3);
        assert_eq!(config.crystallize_threshold, 5);
        assert_eq!(config.max_successes, 100);
        assert_eq!(config.retention(), Duration::days(30));
    }

    #[test]
    fn test_entry_serialization_is_tagged() {
        let entry = LearningEntry::new(
            Some("weather"),
            None,
            EntryKind::Failure {
                error: "ENOENT".to_string(),
                open: true,
                occurrences: 1,
            },
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "failure");
        assert_eq!(json["error"], "ENOENT");
        assert_eq!(json["subject"], "weather");

        let back: LearningEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_resolve_transitions() {
        let mut failure = LearningEntry::new(
            None,
            None,
            EntryKind::Failure {
                error: "boom".to_string(),
                open: true,
                occurrences: 1,
            },
        );
        assert!(failure.resolve("fix").unwrap());
        assert_eq!(failure.entry_type(), EntryType::Pattern);
        assert_eq!(failure.error(), Some("boom"));
        assert!(!failure.resolve("better fix").unwrap());
        assert_eq!(failure.resolution(), Some("better fix"));

        let mut success = LearningEntry::new(None, None, EntryKind::Success);
        assert!(matches!(
            success.resolve("x"),
            Err(LearningError::InvalidTransition { from: EntryType::Success, .. })
        ));
    }

    #[tokio::test]
    async fn test_same_error_refreshes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let a = engine.record_failure("tool", "ENOENT", None).await.unwrap();
        let b = engine.record_failure("tool", "ENOENT", Some("again")).await.unwrap();
        assert_eq!(a, b);

        let entry = engine.get(&a).await.unwrap();
        assert!(matches!(entry.kind, EntryKind::Failure { occurrences: 2, open: true, .. }));
        assert_eq!(entry.context.as_deref(), Some("again"));
    }

    #[tokio::test]
    async fn test_different_error_supersedes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let first = engine.record_failure("tool", "ENOENT", None).await.unwrap();
        let second = engine.record_failure("tool", "EACCES", None).await.unwrap();
        assert_ne!(first, second);

        let open = engine.open_failures().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second);
        assert_eq!(engine.get(&first).await.unwrap().entry_type(), EntryType::Failure);
    }

    #[tokio::test]
    async fn test_resolution_of_missing_entry() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        assert!(matches!(
            engine.record_resolution("nope", "x").await,
            Err(LearningError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("learnings.json");
        let engine = LearningEngine::open(&path, LearningConfig::default()).await.unwrap();

        engine.record_insight("cache the schema", None).await.unwrap();

        let other = LearningEngine::open(&path, LearningConfig::default()).await.unwrap();
        assert_eq!(other.get_insights().await.len(), 1);

        other.record_insight("second", None).await.unwrap();
        assert_eq!(engine.reload().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("state");
        let engine = LearningEngine::open(parent.join("learnings.json"), LearningConfig::default())
            .await
            .unwrap();
        let id = engine.record_failure("tool", "ENOENT", None).await.unwrap();

        // Parent directory replaced by a plain file: every write now fails
        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, "not a directory").unwrap();

        assert!(engine.record_insight("lost", None).await.is_err());
        assert!(engine.record_resolution(&id, "fix").await.is_err());
        assert!(engine.record_success("tool", "ok").await.is_err());
        assert!(engine.record_failure("tool", "EACCES", None).await.is_err());

        assert!(engine.get_insights().await.is_empty());
        let open = engine.open_failures().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);
        assert_eq!(open[0].error(), Some("ENOENT"));
        assert_eq!(engine.stats().await.successes, 0);
    }

    #[tokio::test]
    async fn test_link_open_failure_skips_resolved_and_missing() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let id = engine.record_failure("fs", "ENOENT", None).await.unwrap();
        engine.record_success("fs", "created the directory").await.unwrap();

        assert!(!engine.link_open_failure(&id, "canned").await.unwrap());
        assert_eq!(
            engine.get(&id).await.unwrap().resolution(),
            Some("created the directory")
        );
        assert!(!engine.link_open_failure("missing", "canned").await.unwrap());

        let open = engine.record_failure("fs", "EACCES", None).await.unwrap();
        assert!(engine.link_open_failure(&open, "canned").await.unwrap());
        assert_eq!(engine.get(&open).await.unwrap().resolution(), Some("canned"));
    }

    #[tokio::test]
    async fn test_rejected_pattern_waits_for_new_use() {
        let dir = TempDir::new().unwrap();
        let config = LearningConfig {
            pattern_threshold: 1,
            crystallize_threshold: 1,
            ..Default::default()
        };
        let engine = LearningEngine::open(dir.path().join("learnings.json"), config)
            .await
            .unwrap();

        let id = engine.record_failure("t", "boom", None).await.unwrap();
        engine.record_resolution(&id, "fix").await.unwrap();
        engine.record_success("t", "ok").await.unwrap();
        assert_eq!(engine.due_for_crystallization().await.len(), 1);

        engine.mark_rejected(&id, "blocked").await.unwrap();
        assert!(engine.get(&id).await.unwrap().crystallization_blocked());
        assert!(engine.due_for_crystallization().await.is_empty());
        assert_eq!(engine.crystallization_candidates().await.len(), 1);

        // Another use makes it eligible again
        engine.record_success("t", "ok again").await.unwrap();
        assert_eq!(engine.due_for_crystallization().await.len(), 1);

        // So does a new resolution
        engine.mark_rejected(&id, "blocked").await.unwrap();
        engine.record_resolution(&id, "better fix").await.unwrap();
        assert_eq!(engine.due_for_crystallization().await.len(), 1);

        let success = engine.record_success("u", "ok").await.unwrap();
        assert!(matches!(
            engine.mark_rejected(&success, "x").await,
            Err(LearningError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("learnings.json");
        tokio::fs::write(&path, "[{\"broken\":").await.unwrap();

        let engine = LearningEngine::open(&path, LearningConfig::default()).await.unwrap();
        assert_eq!(engine.stats().await, LearningStats::default());
    }
}
