//! Process spawning, signaling and state types.
//!
//! This module defines the handle and exit types shared by supervisors and ad-hoc
//! commands, plus the `Launcher`/`ManagedChild` seam that the supervisor drives.
//! `ShellLauncher` is the real implementation: every command runs through the
//! platform shell, in its own process group on Unix.

use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use tokio::process::{Child, Command};

/// The live OS process owned by a supervisor. Replaced on every restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Process id reported at spawn time.
    pub pid: u32,
    /// When the process was spawned.
    pub spawned_at: Instant,
    /// Exit code once the process has exited.
    pub exit_code: Option<i32>,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            spawned_at: Instant::now(),
            exit_code: None,
        }
    }
}

/// Lifecycle state of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No process running and no restart pending.
    Idle,
    /// A restart timer is armed.
    ScheduledRestart,
    /// The child process is running.
    Running,
    /// The child process is being terminated.
    Stopping,
    /// Spawning failed; the supervisor takes no further action.
    Dead,
}

impl SupervisorState {
    pub fn label(self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::ScheduledRestart => "restart scheduled",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Dead => "dead",
        }
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, absent when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    /// A clean exit is code 0 or no code at all (signal termination).
    pub fn is_clean(&self) -> bool {
        matches!(self.code, None | Some(0))
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running child that a supervisor can signal and wait on.
pub trait ManagedChild: Send + 'static {
    /// Process id, if one was obtained.
    fn id(&self) -> Option<u32>;
    /// Sends the graceful termination signal.
    fn terminate(&mut self) -> io::Result<()>;
    /// Sends the forceful kill signal.
    fn kill(&mut self) -> io::Result<()>;
    /// Liveness probe.
    fn is_alive(&mut self) -> bool;
    /// OS-level last-resort termination (`kill -9` / `taskkill /F`).
    fn force_kill(&mut self) -> impl Future<Output = io::Result<()>> + Send;
    /// Resolves once the process has exited.
    fn wait(&mut self) -> impl Future<Output = io::Result<ExitOutcome>> + Send;
}

/// Spawns supervised processes.
pub trait Launcher: Send + Sync + 'static {
    type Child: ManagedChild;

    /// Spawns `command` in `cwd` with inherited stdout/stderr.
    fn launch(&self, command: &str, cwd: &Path) -> io::Result<Self::Child>;

    /// Runs `command` to completion and returns its captured stdout.
    fn run_captured(
        &self,
        command: &str,
        cwd: &Path,
    ) -> impl Future<Output = io::Result<String>> + Send;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellLauncher;

impl Launcher for ShellLauncher {
    type Child = ShellChild;

    fn launch(&self, command: &str, cwd: &Path) -> io::Result<ShellChild> {
        let mut cmd = shell_command(command, cwd);
        detach_group(&mut cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "spawned process has no pid"))?;
        Ok(ShellChild { child, pid })
    }

    async fn run_captured(&self, command: &str, cwd: &Path) -> io::Result<String> {
        let mut cmd = shell_command(command, cwd);
        cmd.stdin(Stdio::null());
        let output = cmd.output().await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A supervised process spawned by [`ShellLauncher`].
#[derive(Debug)]
pub struct ShellChild {
    child: Child,
    pid: u32,
}

impl ManagedChild for ShellChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            send_signal(self.pid, libc::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            send_signal(self.pid, libc::SIGKILL)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn is_alive(&mut self) -> bool {
        let leader_running = matches!(self.child.try_wait(), Ok(None));
        leader_running || group_alive(self.pid)
    }

    async fn force_kill(&mut self) -> io::Result<()> {
        force_terminate(self.pid).await
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(status.into())
    }
}

/// Builds a command that runs `command` through the platform shell in `cwd`.
pub fn shell_command(command: &str, cwd: &Path) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };
    cmd.current_dir(cwd);
    cmd
}

/// Puts the spawned process into its own process group so the whole tree can be
/// signaled at once.
pub fn detach_group(command: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            let _ = libc::setpgid(0, 0);
            Ok(())
        });
    }
}

/// Last-resort termination of `pid` and everything it spawned.
pub async fn force_terminate(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    let status = {
        let _ = send_signal(pid, libc::SIGKILL);
        Command::new("kill")
            .arg("-9")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?
    };
    #[cfg(not(unix))]
    let status = Command::new("taskkill")
        .args(["/F", "/T", "/PID"])
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() || !process_alive(pid) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("forced termination exited with {}", status),
        ))
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = pid as i32;
    let group = unsafe { libc::kill(-pid, signal) };
    let leader = unsafe { libc::kill(pid, signal) };
    if group == 0 || leader == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    unsafe { libc::kill(-(pid as i32), 0) == 0 }
}

#[cfg(not(unix))]
fn group_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exit_covers_zero_and_signals() {
        assert!(ExitOutcome { code: Some(0) }.is_clean());
        assert!(ExitOutcome { code: None }.is_clean());
        assert!(!ExitOutcome { code: Some(3) }.is_clean());
    }

    #[test]
    fn handle_starts_without_exit_code() {
        let handle = ProcessHandle::new(42);
        assert_eq!(handle.pid, 42);
        assert_eq!(handle.exit_code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_launcher_captures_stdout() {
        let dir = std::env::temp_dir();
        let out = ShellLauncher
            .run_captured("echo restarting", &dir)
            .await
            .unwrap();
        assert_eq!(out.trim(), "restarting");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_child_reports_exit_code() {
        let dir = std::env::temp_dir();
        let mut child = ShellLauncher.launch("exit 3", &dir).unwrap();
        assert!(child.id().is_some());
        let outcome = child.wait().await.unwrap();
        assert_eq!(outcome.code, Some(3));
        assert!(!outcome.is_clean());
    }
}
