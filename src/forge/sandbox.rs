//! Artifact Sandbox
//!
//! Executes a candidate module in a separate, time-boxed `node` process
//! against a mock registration handle:
//! - Throwaway working directory per run, removed on every exit path
//! - Node's permission model confined to that directory (no child processes,
//!   no filesystem access outside it)
//! - Network modules and `fetch` stubbed inside the harness
//! - Environment sanitization (allowlisted variables only)
//! - Hard wall-clock timeout with SIGTERM then SIGKILL escalation
//! - Output limits
//!
//! # Success condition
//!
//! Each run draws a random nonce and hands it to the harness over stdin
//! before the artifact is imported. The harness prints [`SANDBOX_SENTINEL`]
//! followed by that nonce only after the entry point returned and every
//! registration carried a handler. The run passes only when the child exits
//! with code 0 *and* the nonced marker was observed, so an artifact printing
//! the bare sentinel itself proves nothing. A single run is authoritative;
//! there is no retry.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Printed by the harness on success, followed by the run's nonce
pub const SANDBOX_SENTINEL: &str = "__CAPFORGE_SANDBOX_OK__";

/// Prefixes the harness's single-line error report
const ERROR_PREFIX: &str = "__CAPFORGE_SANDBOX_ERROR__";

const ARTIFACT_FILE: &str = "artifact.mjs";
const HARNESS_FILE: &str = "harness.mjs";

/// Mock host: records registrations, enforces handlers, no real side effects.
const HARNESS_SOURCE: &str = r#"import { syncBuiltinESMExports } from "node:module";
import dgram from "node:dgram";
import http from "node:http";
import http2 from "node:http2";
import https from "node:https";
import net from "node:net";
import tls from "node:tls";

const SENTINEL = "__CAPFORGE_SANDBOX_OK__";
const ERROR_PREFIX = "__CAPFORGE_SANDBOX_ERROR__";

// Holds the event loop open so a registration that never settles runs into
// the parent's timeout instead of exiting early.
const keepAlive = setInterval(() => {}, 1 << 30);

function denied(what) {
  return () => {
    throw new Error(`network access is disabled in the sandbox (${what})`);
  };
}

globalThis.fetch = async () => denied("fetch")();
net.connect = net.createConnection = denied("net.connect");
net.Socket.prototype.connect = denied("socket.connect");
net.Server.prototype.listen = denied("server.listen");
tls.connect = denied("tls.connect");
for (const mod of [http, https]) {
  mod.request = denied("http.request");
  mod.get = denied("http.get");
}
http2.connect = denied("http2.connect");
dgram.createSocket = denied("dgram.createSocket");
// Named ESM imports of the builtins see the stubs too
syncBuiltinESMExports();

// The parent writes the nonce and closes stdin; it is consumed before the
// artifact loads, so only this module ever holds it.
async function readNonce() {
  let data = "";
  process.stdin.setEncoding("utf8");
  for await (const chunk of process.stdin) {
    data += chunk;
  }
  return data.trim();
}

const nonce = await readNonce();
const writeOut = process.stdout.write.bind(process.stdout);
const exit = process.exit.bind(process);

const problems = [];
const registered = { tools: [], commands: [], hooks: [] };

function requireHandler(kind, name, handler) {
  if (typeof handler !== "function") {
    problems.push(`missing handler for ${kind} '${name}'`);
  }
}

const api = Object.freeze({
  registerTool(def) {
    if (!def || typeof def !== "object") {
      problems.push("registerTool called without a definition");
      return;
    }
    const name = typeof def.name === "string" && def.name.length > 0 ? def.name : "<unnamed>";
    if (name === "<unnamed>") {
      problems.push("tool registered without a name");
    }
    requireHandler("tool", name, def.execute ?? def.handler);
    registered.tools.push(name);
  },
  registerCommand(name, def) {
    requireHandler("command", String(name), def && (def.handler ?? def.execute));
    registered.commands.push(String(name));
  },
  on(event, handler) {
    requireHandler("hook", String(event), handler);
    registered.hooks.push(String(event));
  },
  registerHook(event, handler) {
    api.on(event, handler);
  },
  log() {},
});

async function main() {
  const mod = await import("./artifact.mjs");
  const entry = [mod.default, mod.register, mod.activate].find((f) => typeof f === "function");
  if (!entry) {
    throw new Error("no registration entry point exported");
  }
  await entry(api);
  if (problems.length > 0) {
    throw new Error(problems.join("; "));
  }
}

main().then(
  () => {
    clearInterval(keepAlive);
    writeOut(SENTINEL + " " + nonce + "\n", () => exit(0));
  },
  (err) => {
    clearInterval(keepAlive);
    const message = err && err.message ? err.message : String(err);
    process.stderr.write(ERROR_PREFIX + " " + message.replace(/\s+/g, " ") + "\n", () => exit(1));
  },
);
"#;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used to run the harness
    pub node_bin: PathBuf,
    /// Extra interpreter arguments, appended after the isolation flags
    pub node_args: Vec<String>,
    /// Run under node's permission model with filesystem access limited to
    /// the run directory. Refuses to run on interpreters without it.
    #[serde(default = "default_true")]
    pub permission_model: bool,
    /// Maximum execution time in seconds
    pub timeout_secs: u64,
    /// Wait between SIGTERM and SIGKILL
    pub kill_grace_ms: u64,
    /// Maximum bytes kept per output stream
    pub max_output_bytes: usize,
    /// Environment variables to pass through
    pub allowed_env_vars: HashSet<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            node_bin: PathBuf::from("node"),
            node_args: Vec::new(),
            permission_model: true,
            timeout_secs: 15,
            kill_grace_ms: 500,
            max_output_bytes: 64 * 1024,
            allowed_env_vars: default_allowed_env_vars(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

/// Default allowed environment variables
fn default_allowed_env_vars() -> HashSet<String> {
    ["PATH", "HOME", "LANG", "TZ"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Sandbox execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    /// Best available diagnostic on failure
    pub error: Option<String>,
    pub timed_out: bool,
    /// Exit code (None if killed or never started)
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl SandboxResult {
    fn passed(exit_code: Option<i32>, started: Instant) -> Self {
        Self {
            success: true,
            error: None,
            timed_out: false,
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(error: String, exit_code: Option<i32>, started: Instant) -> Self {
        Self {
            success: false,
            error: Some(error),
            timed_out: false,
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn timeout(timeout: Duration, started: Instant) -> Self {
        Self {
            success: false,
            error: Some(format!("timed out after {}s", timeout.as_secs_f64())),
            timed_out: true,
            exit_code: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Captured output of one stream
#[derive(Debug, Default)]
struct CapturedOutput {
    text: String,
    truncated: bool,
}

/// Permission-model flag for a `node --version` string, `None` before Node 20
pub(crate) fn permission_flag_for(version: &str) -> Option<&'static str> {
    let mut parts = version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| part.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);

    match (major, minor) {
        (0..=19, _) => None,
        (20 | 21, _) => Some("--experimental-permission"),
        (22, m) if m < 13 => Some("--experimental-permission"),
        (23, m) if m < 5 => Some("--experimental-permission"),
        _ => Some("--permission"),
    }
}

/// Runs candidate artifacts in an isolated child process
#[derive(Debug, Clone, Default)]
pub struct SandboxRunner {
    config: SandboxConfig,
    /// Permission flag for `node_bin`, detected on first use; spawn errors are not cached
    permission_flag: OnceCell<Option<&'static str>>,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            permission_flag: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `source` under the mock host inside a fresh directory below
    /// `work_dir`. Never returns an error: every failure is a result.
    pub async fn run(&self, source: &str, work_dir: &Path) -> SandboxResult {
        let started = Instant::now();

        if let Err(e) = tokio::fs::create_dir_all(work_dir).await {
            return SandboxResult::failed(
                format!("cannot create work directory {}: {}", work_dir.display(), e),
                None,
                started,
            );
        }

        // The guard owns the directory; dropping it removes everything the
        // run materialized, whichever branch below returns.
        let scratch = match tempfile::Builder::new()
            .prefix("capforge-sandbox-")
            .tempdir_in(work_dir)
        {
            Ok(dir) => dir,
            Err(e) => {
                return SandboxResult::failed(
                    format!("cannot create sandbox directory: {}", e),
                    None,
                    started,
                )
            }
        };

        let result = self.execute_in(scratch.path(), source, started).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(dir = %scratch_path.display(), "Failed to remove sandbox directory: {}", e);
        }

        if result.success {
            info!(duration_ms = result.duration_ms, "Sandbox run passed");
        } else {
            info!(
                duration_ms = result.duration_ms,
                timed_out = result.timed_out,
                error = result.error.as_deref().unwrap_or(""),
                "Sandbox run failed"
            );
        }
        result
    }

    /// Isolation arguments for a run rooted at `dir`
    async fn isolation_args(&self, dir: &Path) -> Result<Vec<String>, String> {
        if !self.config.permission_model {
            return Ok(Vec::new());
        }

        let node_bin = &self.config.node_bin;
        let flag = self
            .permission_flag
            .get_or_try_init(|| async {
                let output = Command::new(node_bin)
                    .arg("--version")
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .map_err(|e| format!("failed to spawn {}: {}", node_bin.display(), e))?;
                let version = String::from_utf8_lossy(&output.stdout);
                debug!(version = %version.trim(), "Detected sandbox interpreter");
                Ok::<_, String>(permission_flag_for(&version))
            })
            .await?;

        let Some(flag) = flag else {
            return Err(format!(
                "{} has no permission model; Node.js 20 or newer is required to isolate artifacts",
                node_bin.display()
            ));
        };

        // The permission model wants absolute, symlink-free paths
        let root = tokio::fs::canonicalize(dir)
            .await
            .unwrap_or_else(|_| dir.to_path_buf());
        Ok(vec![
            flag.to_string(),
            format!("--allow-fs-read={}", root.display()),
            format!("--allow-fs-write={}", root.display()),
        ])
    }

    async fn execute_in(&self, dir: &Path, source: &str, started: Instant) -> SandboxResult {
        if let Err(e) = materialize(dir, source).await {
            return SandboxResult::failed(format!("cannot write sandbox files: {}", e), None, started);
        }

        let isolation = match self.isolation_args(dir).await {
            Ok(args) => args,
            Err(e) => return SandboxResult::failed(e, None, started),
        };
        let nonce = uuid::Uuid::new_v4().simple().to_string();

        let mut cmd = Command::new(&self.config.node_bin);
        cmd.args(&isolation)
            .args(&self.config.node_args)
            .arg(HARNESS_FILE)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .kill_on_drop(true);

        for var in &self.config.allowed_env_vars {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return SandboxResult::failed(
                    format!(
                        "failed to spawn {}: {}",
                        self.config.node_bin.display(),
                        e
                    ),
                    None,
                    started,
                )
            }
        };
        debug!(pid = ?child.id(), dir = %dir.display(), "Sandbox process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits before reading fails on its own below
            if let Err(e) = stdin.write_all(format!("{}\n", nonce).as_bytes()).await {
                debug!("Sandbox process did not take the nonce: {}", e);
            }
        }

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                terminate(&mut child, Duration::ZERO).await;
                return SandboxResult::failed(
                    "sandbox process has no output pipes".to_string(),
                    None,
                    started,
                );
            }
        };

        let timeout = self.config.timeout();
        let max = self.config.max_output_bytes;
        let outcome = tokio::time::timeout(timeout, async {
            let (out, err) = tokio::join!(read_capped(stdout, max), read_capped(stderr, max));
            let status = child.wait().await;
            (out, err, status)
        })
        .await;

        match outcome {
            Ok((out, err, Ok(status))) => evaluate(status, &out, &err, &nonce, started),
            Ok((_, _, Err(e))) => {
                SandboxResult::failed(format!("failed to wait for sandbox process: {}", e), None, started)
            }
            Err(_) => {
                warn!("Sandbox run timed out after {}s", self.config.timeout_secs);
                terminate(&mut child, Duration::from_millis(self.config.kill_grace_ms)).await;
                SandboxResult::timeout(timeout, started)
            }
        }
    }
}

async fn materialize(dir: &Path, source: &str) -> std::io::Result<()> {
    tokio::fs::write(dir.join(ARTIFACT_FILE), source).await?;
    tokio::fs::write(dir.join(HARNESS_FILE), HARNESS_SOURCE).await?;
    Ok(())
}

/// Read a stream to EOF, keeping at most `max` bytes. The rest is drained so
/// the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> CapturedOutput {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = max.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(_) => break,
        }
    }

    CapturedOutput {
        text: String::from_utf8_lossy(&kept).to_string(),
        truncated,
    }
}

fn evaluate(
    status: ExitStatus,
    stdout: &CapturedOutput,
    stderr: &CapturedOutput,
    nonce: &str,
    started: Instant,
) -> SandboxResult {
    let marker = format!("{} {}", SANDBOX_SENTINEL, nonce);
    let marker_seen = stdout.text.lines().any(|line| line.trim() == marker);
    let code = status.code();

    if status.success() && marker_seen {
        return SandboxResult::passed(code, started);
    }

    let diagnostic = if let Some(reported) = harness_error(&stderr.text) {
        reported
    } else if !status.success() {
        let tail = stderr_tail(&stderr.text, stderr.truncated);
        match code {
            Some(c) if tail.is_empty() => format!("exited with code {}", c),
            Some(c) => format!("exited with code {}: {}", c, tail),
            None if tail.is_empty() => "terminated by signal".to_string(),
            None => format!("terminated by signal: {}", tail),
        }
    } else {
        "exited without the success marker".to_string()
    };

    SandboxResult::failed(diagnostic, code, started)
}

/// The harness's own error line, if it printed one
fn harness_error(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(ERROR_PREFIX))
        .map(|msg| msg.trim().to_string())
        .filter(|msg| !msg.is_empty())
}

fn stderr_tail(stderr: &str, truncated: bool) -> String {
    const MAX_LINES: usize = 5;
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(MAX_LINES);
    let mut tail = lines[start..].join(" | ");
    if truncated {
        tail.push_str(" (output truncated)");
    }
    tail
}

/// Stop the child: graceful signal first, forceful kill after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: signalling a pid we spawned and have not yet reaped.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                debug!(?status, "Sandbox process exited after SIGTERM");
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!("Failed to kill sandbox process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn node_available() -> bool {
        std::process::Command::new("node")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn test_harness_error_extraction() {
        let stderr = "(node:1) ExperimentalWarning: x\n__CAPFORGE_SANDBOX_ERROR__ missing handler for tool 'a'\n";
        assert_eq!(harness_error(stderr).as_deref(), Some("missing handler for tool 'a'"));
        assert_eq!(harness_error("plain failure"), None);
    }

    #[test]
    fn test_stderr_tail_limits_lines() {
        let stderr = (0..10).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        assert_eq!(stderr_tail(&stderr, false), "line 5 | line 6 | line 7 | line 8 | line 9");
        assert!(stderr_tail("x", true).ends_with("(output truncated)"));
    }

    #[test]
    fn test_permission_flag_by_version() {
        assert_eq!(permission_flag_for("v18.19.0"), None);
        assert_eq!(permission_flag_for("v20.11.1\n"), Some("--experimental-permission"));
        assert_eq!(permission_flag_for("v22.12.0"), Some("--experimental-permission"));
        assert_eq!(permission_flag_for("v22.13.0"), Some("--permission"));
        assert_eq!(permission_flag_for("v23.4.0"), Some("--experimental-permission"));
        assert_eq!(permission_flag_for("v24.1.0"), Some("--permission"));
        assert_eq!(permission_flag_for("garbage"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_marker_requires_run_nonce() {
        use std::os::unix::process::ExitStatusExt;

        let ok = ExitStatus::from_raw(0);
        let stderr = CapturedOutput::default();
        let bare = CapturedOutput {
            text: format!("{}\n", SANDBOX_SENTINEL),
            truncated: false,
        };
        let foreign = CapturedOutput {
            text: format!("{} 0000\n", SANDBOX_SENTINEL),
            truncated: false,
        };
        let nonced = CapturedOutput {
            text: format!("noise\n{} 4f2a\n", SANDBOX_SENTINEL),
            truncated: false,
        };

        for stdout in [&bare, &foreign] {
            let result = evaluate(ok, stdout, &stderr, "4f2a", Instant::now());
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some("exited without the success marker"));
        }
        assert!(evaluate(ok, &nonced, &stderr, "4f2a", Instant::now()).success);
    }

    #[tokio::test]
    async fn test_read_capped_truncates_and_drains() {
        let data = vec![b'a'; 20_000];
        let out = read_capped(&data[..], 100).await;
        assert_eq!(out.text.len(), 100);
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn test_spawn_failure_cleans_up() {
        let work = TempDir::new().unwrap();
        let runner = SandboxRunner::new(SandboxConfig {
            node_bin: PathBuf::from("/nonexistent/capforge-node"),
            ..Default::default()
        });

        let result = runner.run("export default () => {}", work.path()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("failed to spawn"));
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_valid_extension_passes() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let source = r#"
            export default function register(api) {
              api.registerTool({ name: "echo", parameters: {}, async execute(p) { return p; } });
              api.on("session_start", async () => {});
            }
        "#;

        let result = SandboxRunner::default().run(source, work.path()).await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.exit_code, Some(0));
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_missing_handler_fails() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let source = r#"export default (api) => { api.registerTool({ name: "broken" }); };"#;

        let result = SandboxRunner::default().run(source, work.path()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("missing handler for tool 'broken'"));
    }

    #[tokio::test]
    async fn test_throwing_entry_point_fails() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let source = r#"export function activate() { throw new Error("boom"); }"#;

        let result = SandboxRunner::default().run(source, work.path()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_exit_without_marker_fails() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let source = "process.exit(0);\nexport default () => {};";

        let result = SandboxRunner::default().run(source, work.path()).await;

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.error.as_deref(), Some("exited without the success marker"));
    }

    #[tokio::test]
    async fn test_printed_sentinel_does_not_pass() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let source = r#"
process.stdout.write("__CAPFORGE_SANDBOX_OK__\n", () => process.exit(0));
export default (api) => { api.registerTool({ name: "nohandler" }); };
"#;

        let result = SandboxRunner::default().run(source, work.path()).await;

        assert!(!result.success, "{:?}", result);
    }

    #[tokio::test]
    async fn test_filesystem_outside_run_dir_is_denied() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("keep.txt");
        std::fs::write(&victim, "precious").unwrap();

        let source = format!(
            r#"import {{ rmSync }} from "node:fs";
export default function register(api) {{
  rmSync({});
  api.registerTool({{ name: "cleanup", async execute() {{ return 1; }} }});
}}
"#,
            serde_json::to_string(&victim.to_string_lossy()).unwrap()
        );

        let result = SandboxRunner::default().run(&source, work.path()).await;

        assert!(!result.success, "{:?}", result);
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "precious");
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_network_modules_are_stubbed() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let source = r#"import { request } from "node:http";
export default function register(api) {
  request("http://127.0.0.1:9/");
}
"#;

        let result = SandboxRunner::default().run(source, work.path()).await;

        assert!(!result.success);
        assert!(
            result.error.as_deref().unwrap_or("").contains("network access is disabled"),
            "{:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_sigterm_ignoring_child_is_killed() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let runner = SandboxRunner::new(SandboxConfig {
            timeout_secs: 1,
            kill_grace_ms: 300,
            ..Default::default()
        });
        let source = r#"process.on("SIGTERM", () => {});
export default async function register() { await new Promise(() => {}); }
"#;

        let started = Instant::now();
        let result = runner.run(source, work.path()).await;

        assert!(result.timed_out, "{:?}", result);
        assert!(!result.success);
        assert!(started.elapsed() < Duration::from_millis(1000 + 300 + 2000));
        assert!(dir_is_empty(work.path()));
    }

    #[tokio::test]
    async fn test_hanging_registration_times_out() {
        if !node_available() {
            return;
        }
        let work = TempDir::new().unwrap();
        let runner = SandboxRunner::new(SandboxConfig {
            timeout_secs: 1,
            kill_grace_ms: 200,
            ..Default::default()
        });
        let source = "export default async function () { await new Promise(() => {}); }";

        let started = Instant::now();
        let result = runner.run(source, work.path()).await;

        assert!(!result.success);
        assert!(result.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(dir_is_empty(work.path()));
    }
}
