//! Process runner implementation
//!
//! Executes one untrusted program in its own process group. Every exit path
//! (normal exit, crash, timeout, error while waiting) ends with the whole
//! group being SIGKILLed and the direct child reaped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::libc::rlim_t;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};

/// How long pipe readers may keep going after the child has been reaped
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runner that executes a program as an isolated, killable process group
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a program to completion or until the wall-clock bound elapses
    pub async fn execute(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin_content: Option<&[u8]>,
    ) -> Result<RunOutcome> {
        debug!(
            "Running {:?} (timeout={:?}, memory_mb={:?}, hardened={})",
            cmd.to_vec(),
            limits.timeout,
            limits.memory_mb,
            limits.hardened
        );

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        if let Some(dir) = &cmd.work_dir {
            command.current_dir(dir);
        }
        if limits.hardened {
            command.env_clear();
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let ceilings = ResourceCeilings::from_limits(limits);
        if ceilings.is_active() {
            // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
            unsafe {
                command.pre_exec(move || ceilings.apply());
            }
        }

        let start = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd.program))?;
        let pid = child
            .id()
            .context("Spawned child has no pid")?;
        // Kills the group if this future is dropped before teardown.
        let mut group = GroupGuard::new(pid);

        let stdin_task = {
            let input = stdin_content.map(|s| s.to_vec()).unwrap_or_default();
            let stdin = child.stdin.take();
            tokio::spawn(async move {
                if let Some(mut stdin) = stdin {
                    // The child may exit without reading; a broken pipe is not our error.
                    let _ = stdin.write_all(&input).await;
                    let _ = stdin.shutdown().await;
                }
            })
        };
        let stdout_task = spawn_reader(child.stdout.take(), limits.stdout_cap());
        let stderr_task = spawn_reader(child.stderr.take(), limits.max_output_bytes);

        let waited = tokio::time::timeout(limits.timeout, child.wait()).await;
        let wall_time = start.elapsed();

        // Nothing started by this call may outlive it.
        group.kill();

        let status = match waited {
            Ok(Ok(exit)) => exit_to_status(exit),
            Ok(Err(e)) => {
                let _ = child.kill().await;
                stdin_task.abort();
                stdout_task.abort();
                stderr_task.abort();
                return Err(e).context("Failed to wait for child process");
            }
            Err(_) => {
                let _ = child.kill().await;
                child
                    .wait()
                    .await
                    .context("Failed to reap timed out child process")?;
                debug!("Process group {} killed after {:?}", pid, limits.timeout);
                RunStatus::TimedOut
            }
        };

        stdin_task.abort();
        let stdout = drain(stdout_task, pid).await;
        let stderr = drain(stderr_task, pid).await;

        Ok(RunOutcome {
            status,
            wall_time,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            pid,
        })
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&[u8]>,
    ) -> Result<RunOutcome> {
        self.execute(cmd, limits, stdin).await
    }
}

/// rlimits applied in the child between fork and exec
#[derive(Debug, Clone, Copy)]
struct ResourceCeilings {
    address_space: Option<rlim_t>,
    cpu_secs: Option<rlim_t>,
    forbid_files: bool,
}

impl ResourceCeilings {
    fn from_limits(limits: &RunLimits) -> Self {
        let address_space = limits
            .memory_mb
            .map(|mb| (mb * 1024 * 1024) as rlim_t);
        if !limits.hardened {
            return Self {
                address_space,
                cpu_secs: None,
                forbid_files: false,
            };
        }
        Self {
            address_space,
            cpu_secs: Some((limits.timeout.as_secs() + 1) as rlim_t),
            forbid_files: true,
        }
    }

    fn is_active(&self) -> bool {
        self.address_space.is_some() || self.cpu_secs.is_some() || self.forbid_files
    }

    fn apply(&self) -> std::io::Result<()> {
        if let Some(bytes) = self.address_space {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(secs) = self.cpu_secs {
            setrlimit(Resource::RLIMIT_CPU, secs, secs)?;
        }
        if self.forbid_files {
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            setrlimit(Resource::RLIMIT_FSIZE, 0, 0)?;
        }
        Ok(())
    }
}

fn spawn_reader<R>(reader: Option<R>, limit: usize) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match reader {
            Some(reader) => read_capped(reader, limit).await,
            None => Vec::new(),
        }
    })
}

/// Read until EOF, keeping at most `limit` bytes and discarding the rest
/// so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    buf
}

/// Owns the process group of one execution and SIGKILLs it on drop
struct GroupGuard {
    pid: u32,
    killed: bool,
}

impl GroupGuard {
    fn new(pid: u32) -> Self {
        Self { pid, killed: false }
    }

    fn kill(&mut self) {
        kill_group(self.pid);
        self.killed = true;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if !self.killed {
            debug!("Execution of process group {} cancelled, killing it", self.pid);
            kill_group(self.pid);
        }
    }
}

async fn drain(task: JoinHandle<Vec<u8>>, pid: u32) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            // A process outside the group still holds the pipe open.
            warn!("Pipe of process {} still open after teardown, abandoning read", pid);
            abort.abort();
            Vec::new()
        }
    }
}

fn kill_group(pid: u32) {
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

fn exit_to_status(status: ExitStatus) -> RunStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => RunStatus::Exited(code),
        (None, Some(sig)) => RunStatus::Signaled(sig),
        (None, None) => RunStatus::Exited(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").with_args(["-c", script])
    }

    fn limits(timeout_ms: u64) -> RunLimits {
        RunLimits::new(Duration::from_millis(timeout_ms))
    }

    /// Count non-zombie processes whose process group is `pgid`
    #[cfg(target_os = "linux")]
    fn live_group_members(pgid: u32) -> usize {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
            .filter(|stat| {
                // Fields after the command name: state ppid pgrp ...
                let Some(rest) = stat.rsplit_once(')').map(|(_, r)| r) else {
                    return false;
                };
                let fields: Vec<&str> = rest.split_whitespace().collect();
                fields.len() > 2
                    && fields[0] != "Z"
                    && fields[0] != "X"
                    && fields[2] == pgid.to_string()
            })
            .count()
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let outcome = ProcessRunner::new()
            .execute(&sh("cat"), &limits(5000), Some(b"hello"))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Exited(0));
        assert_eq!(outcome.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let outcome = ProcessRunner::new()
            .execute(&sh("echo oops >&2; exit 3"), &limits(5000), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Exited(3));
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_signal_is_reported() {
        let outcome = ProcessRunner::new()
            .execute(&sh("kill -9 $$"), &limits(5000), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Signaled(9));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let mut l = limits(5000);
        l.max_output_bytes = 1000;
        let outcome = ProcessRunner::new()
            .execute(&sh("yes | head -c 100000"), &l, None)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.stdout.len(), 1000);
    }

    #[tokio::test]
    async fn test_unread_stdin_does_not_block() {
        let input = vec![b'1'; 4 * 1024 * 1024];
        let outcome = ProcessRunner::new()
            .execute(&sh("exit 0"), &limits(5000), Some(&input))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Exited(0));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let cmd = CommandSpec::new("/nonexistent/definitely-not-here");
        let result = ProcessRunner::new().execute(&cmd, &limits(1000), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hardened_env_is_cleared() {
        std::env::set_var("SORTBOT_RUNNER_TEST_SECRET", "leak");
        let cmd = sh("echo \"[$SORTBOT_RUNNER_TEST_SECRET][$MARKER]\"").with_env("MARKER", "set");
        let outcome = ProcessRunner::new()
            .execute(&cmd, &limits(5000).hardened(true), None)
            .await
            .unwrap();
        assert_eq!(outcome.stdout.trim(), "[][set]");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_whole_process_group() {
        let outcome = ProcessRunner::new()
            .execute(&sh("sleep 30 & sleep 30 & wait"), &limits(300), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert!(outcome.wall_time >= Duration::from_millis(300));
        assert!(outcome.wall_time < Duration::from_secs(10));

        let mut remaining = live_group_members(outcome.pid);
        for _ in 0..50 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = live_group_members(outcome.pid);
        }
        assert_eq!(remaining, 0, "process group {} leaked", outcome.pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_background_children_are_killed_after_normal_exit() {
        let outcome = ProcessRunner::new()
            .execute(&sh("sleep 30 >/dev/null 2>&1 & echo done"), &limits(5000), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Exited(0));
        assert_eq!(outcome.stdout.trim(), "done");

        let mut remaining = live_group_members(outcome.pid);
        for _ in 0..50 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = live_group_members(outcome.pid);
        }
        assert_eq!(remaining, 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancelled_execution_kills_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pgid");
        let script = format!("echo $$ > {}; sleep 30 & sleep 30 & wait", pid_file.display());
        let runner = ProcessRunner::new();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(300),
            runner.execute(&sh(&script), &limits(10_000), None),
        )
        .await;
        assert!(cancelled.is_err());

        let pgid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut remaining = live_group_members(pgid);
        for _ in 0..50 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = live_group_members(pgid);
        }
        assert_eq!(remaining, 0, "process group {} leaked", pgid);
    }
}
