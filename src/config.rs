//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::autonomous::{LearningConfig, MaintenanceConfig};
use crate::forge::{SandboxConfig, SecurityPolicy};

/// Forge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the manifest, stored artifacts and learnings
    pub data_dir: PathBuf,

    /// Parent of per-run sandbox directories
    pub work_dir: PathBuf,

    /// Interpreter used by the sandbox
    pub node_bin: PathBuf,

    /// Extra interpreter arguments (whitespace separated in the environment)
    pub node_args: Vec<String>,

    /// Sandbox timeout in seconds
    pub sandbox_timeout_secs: u64,

    /// Confine the sandbox with node's permission model
    pub sandbox_permissions: bool,

    /// Optional TOML security policy
    pub policy_file: Option<PathBuf>,

    /// Uses before a pattern is a crystallization candidate
    pub pattern_threshold: u64,

    /// Uses before a pattern is crystallized
    pub crystallize_threshold: u64,

    /// Days before unreferenced learnings are pruned
    pub retention_days: i64,

    /// Success entries kept
    pub max_successes: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("CAPFORGE_DATA_DIR")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("capforge")
            });

        let work_dir = std::env::var("CAPFORGE_WORK_DIR")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|_| std::env::temp_dir().join("capforge"));

        let node_bin = std::env::var("CAPFORGE_NODE_BIN")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|_| PathBuf::from("node"));

        let node_args = std::env::var("CAPFORGE_NODE_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let sandbox_timeout_secs = env_parse("CAPFORGE_SANDBOX_TIMEOUT", 15);
        let sandbox_permissions = env_parse("CAPFORGE_SANDBOX_PERMISSIONS", true);

        let policy_file = std::env::var("CAPFORGE_POLICY_FILE")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(|p| expand_path(&p));

        let pattern_threshold = env_parse("CAPFORGE_PATTERN_THRESHOLD", 3);
        let crystallize_threshold = env_parse("CAPFORGE_CRYSTALLIZE_THRESHOLD", 5);
        let retention_days = env_parse("CAPFORGE_RETENTION_DAYS", 30);
        let max_successes = env_parse("CAPFORGE_MAX_SUCCESSES", 100);

        if crystallize_threshold < pattern_threshold {
            anyhow::bail!(
                "CAPFORGE_CRYSTALLIZE_THRESHOLD ({}) is below CAPFORGE_PATTERN_THRESHOLD ({})",
                crystallize_threshold,
                pattern_threshold
            );
        }

        Ok(Self {
            data_dir,
            work_dir,
            node_bin,
            node_args,
            sandbox_timeout_secs,
            sandbox_permissions,
            policy_file,
            pattern_threshold,
            crystallize_threshold,
            retention_days,
            max_successes,
        })
    }

    /// Path of the learning collection
    pub fn learnings_path(&self) -> PathBuf {
        self.data_dir.join("learnings.json")
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            node_bin: self.node_bin.clone(),
            node_args: self.node_args.clone(),
            timeout_secs: self.sandbox_timeout_secs,
            permission_model: self.sandbox_permissions,
            ..Default::default()
        }
    }

    pub fn learning_config(&self) -> LearningConfig {
        LearningConfig {
            pattern_threshold: self.pattern_threshold,
            crystallize_threshold: self.crystallize_threshold,
            retention_days: self.retention_days,
            max_successes: self.max_successes,
            ..Default::default()
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig::default()
    }

    /// Built-in policy, or the configured file layered on top of it
    pub fn security_policy(&self) -> Result<SecurityPolicy> {
        match &self.policy_file {
            Some(path) => SecurityPolicy::load(path)
                .with_context(|| format!("Failed to load security policy {}", path.display())),
            None => Ok(SecurityPolicy::default()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
