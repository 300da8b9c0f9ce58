//! Process supervision.
//!
//! Each supervisor runs as its own task and exclusively owns one child process,
//! its restart timer and its state. Callers talk to it through a cloneable
//! `SupervisorHandle`; commands are handled one at a time, so a stop always
//! completes (escalation included) before the next start of the same child.
//! The latest status is published on a watch channel so readers never wait
//! on a busy supervisor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::config::SupervisedProcessConfig;
use crate::events::Event;
use crate::output::{report_tagged, Tone};
use crate::process::{ExitOutcome, Launcher, ManagedChild, ProcessHandle, SupervisorState};

/// Fixed debounce added to every restart request.
pub const BASE_DEBOUNCE: Duration = Duration::from_millis(250);
/// Wait after the terminate signal before probing.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(100);
/// Wait after the kill signal before the forced fallback.
pub const KILL_GRACE: Duration = Duration::from_millis(2000);
/// Extra wait before startup commands run.
pub const STARTUP_DELAY: Duration = Duration::from_millis(500);
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// A single pending, cancellable restart. Arming replaces any earlier deadline.
#[derive(Debug, Default)]
pub struct RestartTimer {
    deadline: Option<Instant>,
}

impl RestartTimer {
    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Snapshot returned by the `status` command.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub index: usize,
    pub state: SupervisorState,
    pub process: Option<ProcessHandle>,
    pub restarts: u32,
    pub last_exit: Option<i32>,
}

enum SupervisorCommand {
    RequestRestart,
    Stop { done: oneshot::Sender<()> },
}

/// Cloneable address of a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    index: usize,
    tx: mpsc::UnboundedSender<SupervisorCommand>,
    status: watch::Receiver<SupervisorStatus>,
}

impl std::fmt::Debug for SupervisorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorCommand::RequestRestart => f.write_str("RequestRestart"),
            SupervisorCommand::Stop { .. } => f.write_str("Stop"),
        }
    }
}

impl SupervisorHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Arms (or re-arms) the restart timer. Safe to call from any thread.
    pub fn request_restart(&self) {
        if self.tx.send(SupervisorCommand::RequestRestart).is_err() {
            tracing::debug!(index = self.index, "restart requested after supervisor ended");
        }
    }

    /// Stops the child with full escalation and cancels any pending restart.
    /// Resolves once the stop has completed.
    pub async fn stop(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(SupervisorCommand::Stop { done }).is_ok() {
            let _ = wait.await;
        }
    }

    /// Last status published by the supervisor.
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }
}

/// Starts a supervisor task for `config`. The supervisor begins `Idle`.
pub fn spawn_supervisor<L: Launcher>(
    index: usize,
    tag: Option<usize>,
    config: Arc<SupervisedProcessConfig>,
    launcher: Arc<L>,
) -> SupervisorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status) = watch::channel(SupervisorStatus {
        index,
        state: SupervisorState::Idle,
        process: None,
        restarts: 0,
        last_exit: None,
    });
    let supervisor = Supervisor {
        index,
        tag,
        config,
        launcher,
        state: SupervisorState::Idle,
        child: None,
        handle: None,
        timer: RestartTimer::default(),
        restarts: 0,
        last_exit: None,
        status_tx,
    };
    tokio::spawn(supervisor.run(rx));
    SupervisorHandle { index, tx, status }
}

struct Supervisor<L: Launcher> {
    index: usize,
    tag: Option<usize>,
    config: Arc<SupervisedProcessConfig>,
    launcher: Arc<L>,
    state: SupervisorState,
    child: Option<L::Child>,
    handle: Option<ProcessHandle>,
    timer: RestartTimer,
    restarts: u32,
    last_exit: Option<i32>,
    status_tx: watch::Sender<SupervisorStatus>,
}

impl<L: Launcher> Supervisor<L> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SupervisorCommand>) {
        loop {
            let deadline = self.timer.deadline();
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    self.timer.cancel();
                    self.restart().await;
                }
                outcome = wait_for_exit(&mut self.child) => self.on_exit(outcome),
            }
            self.publish();
        }
        if self.child.is_some() {
            self.stop_child().await;
        }
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::RequestRestart => self.request_restart(),
            SupervisorCommand::Stop { done } => {
                self.timer.cancel();
                if self.child.is_some() {
                    self.stop_child().await;
                }
                if self.state != SupervisorState::Dead {
                    self.set_state(SupervisorState::Idle);
                }
                let _ = done.send(());
            }
        }
    }

    fn request_restart(&mut self) {
        if self.state == SupervisorState::Dead {
            report_tagged(
                Tone::Error,
                self.tag,
                "Process failed to start earlier;",
                "ignoring restart request.",
            );
            return;
        }
        self.timer
            .arm(BASE_DEBOUNCE + Duration::from_millis(self.config.delay_ms));
        self.set_state(SupervisorState::ScheduledRestart);
        tracing::debug!(index = self.index, "restart timer armed");
    }

    async fn restart(&mut self) {
        if self.child.is_some() {
            self.stop_child().await;
        }
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
        if let Some(restart_cmd) = &self.config.restart_cmd {
            match self.launcher.run_captured(restart_cmd, &self.config.cwd).await {
                Ok(stdout) => {
                    let stdout = stdout.trim();
                    if !stdout.is_empty() {
                        report_tagged(Tone::Notice, self.tag, "", stdout);
                    }
                }
                Err(err) => report_tagged(
                    Tone::Error,
                    self.tag,
                    "Restart command failed:",
                    &err.to_string(),
                ),
            }
        }

        let command = self.config.command_line();
        report_tagged(Tone::Notice, self.tag, "Restarting...", "");
        report_tagged(Tone::Notice, self.tag, "Running command:", &command);

        let launched = self.launcher.launch(&command, &self.config.cwd);
        match launched {
            Ok(child) => match child.id() {
                Some(pid) => {
                    self.handle = Some(ProcessHandle::new(pid));
                    self.child = Some(child);
                    self.restarts += 1;
                    self.set_state(SupervisorState::Running);
                    tracing::debug!(index = self.index, pid, "process started");
                }
                None => self.mark_dead("no process id obtained"),
            },
            Err(err) => self.mark_dead(&err.to_string()),
        }
    }

    fn mark_dead(&mut self, reason: &str) {
        self.timer.cancel();
        self.set_state(SupervisorState::Dead);
        report_tagged(Tone::Error, self.tag, "Failed to start process:", reason);
    }

    fn on_exit(&mut self, outcome: std::io::Result<ExitOutcome>) {
        let outcome = outcome.unwrap_or_else(|err| {
            tracing::warn!(index = self.index, error = %err, "failed to wait on process");
            ExitOutcome { code: None }
        });
        self.child = None;
        if let Some(handle) = self.handle.as_mut() {
            handle.exit_code = outcome.code;
        }
        self.last_exit = outcome.code;
        if outcome.is_clean() {
            report_tagged(Tone::Info, self.tag, "Clean exit.", "");
        } else {
            let message = format!(
                "Process crashed with exit code {}.",
                outcome.code.unwrap_or_default()
            );
            report_tagged(Tone::Error, self.tag, &message, "");
        }
        self.set_state(if self.timer.is_armed() {
            SupervisorState::ScheduledRestart
        } else {
            SupervisorState::Idle
        });
    }

    async fn stop_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.set_state(SupervisorState::Stopping);
        let outcome = escalate_stop(&mut child, self.tag).await;
        if let Some(handle) = self.handle.as_mut() {
            handle.exit_code = outcome.and_then(|outcome| outcome.code);
        }
        report_tagged(Tone::Info, self.tag, "Process stopped.", "");
        self.set_state(SupervisorState::Idle);
    }

    fn set_state(&mut self, state: SupervisorState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(SupervisorStatus {
            index: self.index,
            state: self.state,
            process: self.handle.clone(),
            restarts: self.restarts,
            last_exit: self.last_exit,
        });
    }
}

/// Terminates `child`: terminate signal, then kill if still alive after
/// [`TERMINATE_GRACE`], then the OS-level fallback if still alive after
/// [`KILL_GRACE`]. Signaling errors are reported and never propagate.
/// Returns the exit outcome if the child could be reaped.
pub async fn escalate_stop<C: ManagedChild>(
    child: &mut C,
    tag: Option<usize>,
) -> Option<ExitOutcome> {
    let pid = child
        .id()
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "?".to_string());
    report_tagged(Tone::Notice, tag, "Stopping process", &format!("{}...", pid));

    if let Err(err) = child.terminate() {
        report_tagged(
            Tone::Error,
            tag,
            "Failed to terminate process",
            &format!("{}: {}", pid, err),
        );
    }
    tokio::time::sleep(TERMINATE_GRACE).await;

    if child.is_alive() {
        report_tagged(
            Tone::Error,
            tag,
            "Process",
            &format!("{} still alive, killing forcefully.", pid),
        );
        if let Err(err) = child.kill() {
            report_tagged(
                Tone::Error,
                tag,
                "Failed to kill process",
                &format!("{}: {}", pid, err),
            );
        }
        tokio::time::sleep(KILL_GRACE).await;

        if child.is_alive() {
            report_tagged(
                Tone::Error,
                tag,
                "Process",
                &format!("{} refuses to die, forcing termination.", pid),
            );
            match child.force_kill().await {
                Ok(()) => report_tagged(
                    Tone::Info,
                    tag,
                    "",
                    &format!("Process {} terminated forcefully.", pid),
                ),
                Err(err) => report_tagged(
                    Tone::Error,
                    tag,
                    "",
                    &format!("Forced termination failed on {}: {}", pid, err),
                ),
            }
        }
    }

    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(err)) => {
            tracing::warn!(pid = %pid, error = %err, "failed to reap stopped process");
            None
        }
        Err(_) => {
            tracing::warn!(pid = %pid, "stopped process was not reaped in time");
            None
        }
    }
}

/// Routes the configured startup commands, then the `server` line, after the
/// initial startup delay.
pub fn spawn_startup_commands(
    index: usize,
    config: Arc<SupervisedProcessConfig>,
    tx: mpsc::Sender<Event>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(config.delay_ms) + STARTUP_DELAY).await;
        for line in startup_lines(&config) {
            if tx.send(Event::Line { text: line, origin: index }).await.is_err() {
                break;
            }
        }
    });
}

fn startup_lines(config: &SupervisedProcessConfig) -> Vec<String> {
    let mut lines = config.startup_cmd.clone();
    if let Some(port) = config.server_port {
        lines.push(format!("server {}", port));
    }
    lines
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn wait_for_exit<C: ManagedChild>(
    child: &mut Option<C>,
) -> impl Future<Output = std::io::Result<ExitOutcome>> + Send + '_ {
    async move {
        match child {
            Some(child) => child.wait().await,
            None => std::future::pending().await,
        }
    }
}
