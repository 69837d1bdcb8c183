// src/runtime/process_manager.rs
//! Process manager for spawning and signalling agent worker processes
//!
//! Workers run as detached OS processes. Their command line carries the
//! agent name as a standalone argument, which is how a pid is matched back
//! to its agent, and how a worker whose heartbeat key went missing is found
//! again by scanning the process table.

use crate::utils::config::WorkerConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Placeholder replaced by the agent name in worker arguments
pub const AGENT_PLACEHOLDER: &str = "{agent}";

/// How to launch a worker process
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Executable name or path; empty means the current executable
    pub program: String,

    /// Arguments, may contain `{agent}`
    pub args: Vec<String>,

    /// Extra environment variables
    pub env_vars: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Arguments for a specific agent
    pub fn args_for(&self, agent: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(AGENT_PLACEHOLDER, agent))
            .collect()
    }
}

impl From<&WorkerConfig> for WorkerCommand {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            env_vars: vec![],
        }
    }
}

/// Process manager for agent workers
pub struct ProcessManager {
    command: WorkerCommand,

    /// Resolved executable (cached)
    executable: Mutex<Option<PathBuf>>,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            executable: Mutex::new(None),
        }
    }

    /// Resolve the worker executable
    fn find_executable(&self) -> Result<PathBuf> {
        // Check cache first
        if let Some(path) = self.executable.lock().as_ref() {
            return Ok(path.clone());
        }

        let path = if self.command.program.is_empty() {
            std::env::current_exe().map_err(|e| {
                EngineError::ProcessSpawnFailed(format!("Cannot locate current executable: {}", e))
            })?
        } else {
            let program = PathBuf::from(&self.command.program);
            if program.is_absolute() {
                program
            } else {
                which::which(&self.command.program).map_err(|e| {
                    EngineError::ProcessSpawnFailed(format!(
                        "Executable '{}' not found in PATH: {}",
                        self.command.program, e
                    ))
                })?
            }
        };

        info!("Worker executable resolved to {:?}", path);
        *self.executable.lock() = Some(path.clone());
        Ok(path)
    }

    /// Spawn a detached worker bound to `agent`; returns its pid
    pub async fn spawn_worker(&self, agent: &str) -> Result<u32> {
        let executable = self.find_executable()?;
        let args = self.command.args_for(agent);

        debug!("Spawning worker for {}: {:?} {:?}", agent, executable, args);

        let mut command = Command::new(executable);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);

        for (key, value) in &self.command.env_vars {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|e| {
            EngineError::ProcessSpawnFailed(format!("Failed to spawn worker for {}: {}", agent, e))
        })?;

        let pid = child.id().ok_or_else(|| {
            EngineError::ProcessSpawnFailed(format!("Worker for {} exited immediately", agent))
        })?;

        // tokio reaps the child in the background once the handle is dropped
        drop(child);

        info!("Worker for {} spawned with PID {}", agent, pid);
        Ok(pid)
    }

    /// Terminate a process: SIGTERM, then SIGKILL after `grace`
    ///
    /// A process that is already gone is not an error.
    pub async fn kill(&self, pid: u32, grace: Duration) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let target = Pid::from_raw(pid as i32);

        debug!("Sending SIGTERM to PID {}", pid);
        match kill(target, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                debug!("PID {} already exited", pid);
                return Ok(());
            }
            Err(e) => {
                return Err(EngineError::RuntimeError(format!(
                    "Failed to send SIGTERM to {}: {}",
                    pid, e
                )))
            }
        }

        // Poll until the process is gone or the grace period runs out
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if !self.is_running(pid) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if self.is_running(pid) {
            warn!("PID {} ignored SIGTERM, sending SIGKILL", pid);
            match kill(target, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    return Err(EngineError::RuntimeError(format!(
                        "Failed to send SIGKILL to {}: {}",
                        pid, e
                    )))
                }
            }
        }

        Ok(())
    }

    /// Check if a process is running (zombies count as exited)
    pub fn is_running(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if pid == 0 || kill(Pid::from_raw(pid as i32), None).is_err() {
            return false;
        }
        !is_zombie(pid)
    }

    /// Check that `pid` is alive and its command line names `agent`
    pub fn matches_worker(&self, pid: u32, agent: &str) -> bool {
        self.is_running(pid) && cmdline_names_agent(pid, agent)
    }

    /// Scan the process table for a live worker launched for `agent`
    ///
    /// Matches processes whose arguments contain this manager's worker
    /// arguments for the agent, in order. The calling process is skipped.
    pub fn find_worker(&self, agent: &str) -> Option<u32> {
        let args = self.command.args_for(agent);
        if args.is_empty() {
            return None;
        }

        let own = std::process::id();
        let found = running_pids()
            .into_iter()
            .filter(|pid| *pid != own)
            .find(|pid| cmdline_contains(*pid, &args) && self.is_running(*pid));

        if let Some(pid) = found {
            debug!("Found worker for {} by scan: PID {}", agent, pid);
        }
        found
    }
}

#[cfg(target_os = "linux")]
fn running_pids() -> Vec<u32> {
    match std::fs::read_dir("/proc") {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
            .collect(),
        Err(e) => {
            warn!("Cannot list processes: {}", e);
            Vec::new()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn running_pids() -> Vec<u32> {
    Vec::new()
}

#[cfg(target_os = "linux")]
fn cmdline_contains(pid: u32, args: &[String]) -> bool {
    let raw = match std::fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    // argv[0] is the program, which may be a resolved path
    let argv: Vec<&[u8]> = raw.split(|b| *b == 0).skip(1).collect();
    argv.windows(args.len())
        .any(|window| window.iter().zip(args).all(|(have, want)| *have == want.as_bytes()))
}

#[cfg(not(target_os = "linux"))]
fn cmdline_contains(_pid: u32, _args: &[String]) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // third field of /proc/<pid>/stat, after the parenthesised command name
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(|s| s == "Z"))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn cmdline_names_agent(pid: u32, agent: &str) -> bool {
    match std::fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(raw) => raw
            .split(|b| *b == 0)
            .any(|arg| arg == agent.as_bytes()),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn cmdline_names_agent(_pid: u32, _agent: &str) -> bool {
    // no portable command line access; liveness only
    true
}
