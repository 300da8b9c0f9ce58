//! Ad-hoc commands: one-off shell invocations started from the command line.
//!
//! Every interactive `$` command, event shortcut, trusted-shell command,
//! startup command and the `server` pseudo-command goes through
//! [`run_command`]. Running commands are tracked by their literal text so they
//! can be listed, stopped and force-killed on shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::events::Event;
use crate::output::{report, report_stream, report_tagged, StreamKind, Tone};
use crate::process;

/// Tracker key prefix of the `server` pseudo-command.
pub const SERVER_KEY_PREFIX: &str = "server ";

/// A tracked ad-hoc process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHocHandle {
    /// Distinguishes invocations that share the same key.
    pub token: u64,
    pub pid: u32,
    pub spawned_at: Instant,
}

/// Running ad-hoc commands keyed by their trimmed literal text.
///
/// Two concurrent invocations of the same text share one key: only the most
/// recent handle is kept, and the earlier process is no longer reachable from
/// `stop` or shutdown.
#[derive(Debug, Default)]
pub struct AdHocCommandTracker {
    entries: HashMap<String, AdHocHandle>,
    next_token: u64,
}

impl AdHocCommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the token for the next tracked invocation.
    pub fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Tracks `handle` under `key`, returning the handle it displaced.
    pub fn insert(&mut self, key: impl Into<String>, handle: AdHocHandle) -> Option<AdHocHandle> {
        self.entries.insert(key.into(), handle)
    }

    pub fn get(&self, key: &str) -> Option<&AdHocHandle> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AdHocHandle> {
        self.entries.remove(key)
    }

    /// Removes `key` only while it still refers to the invocation `token`.
    pub fn remove_if_current(&mut self, key: &str, token: u64) -> Option<AdHocHandle> {
        match self.entries.get(key) {
            Some(handle) if handle.token == token => self.entries.remove(key),
            _ => None,
        }
    }

    /// First tracked entry whose key starts with `prefix`.
    pub fn find_prefixed(&self, prefix: &str) -> Option<(&str, &AdHocHandle)> {
        self.entries
            .iter()
            .find(|(key, _)| key.starts_with(prefix))
            .map(|(key, handle)| (key.as_str(), handle))
    }

    /// Tracked entries ordered by spawn time.
    pub fn entries(&self) -> Vec<(&str, &AdHocHandle)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(key, handle)| (key.as_str(), handle))
            .collect();
        entries.sort_by_key(|(_, handle)| handle.token);
        entries
    }

    pub fn drain(&mut self) -> Vec<(String, AdHocHandle)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How an ad-hoc command's output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Inherit the terminal's stdout/stderr.
    Quiet,
    /// Capture output and report each line.
    Pretty,
}

/// A request to run one ad-hoc command.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Tracker key; the trimmed command text unless the caller overrides it.
    pub key: String,
    pub command: String,
    pub cwd: PathBuf,
    pub mode: OutputMode,
    /// Instance tag shown on reported lines.
    pub tag: Option<usize>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>, mode: OutputMode) -> Self {
        let command = command.into();
        Self {
            key: command.trim().to_string(),
            command,
            cwd: cwd.into(),
            mode,
            tag: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_tag(mut self, tag: Option<usize>) -> Self {
        self.tag = tag;
        self
    }
}

/// Spawns `request` as a shell command and tracks it until it exits. The exit
/// is delivered back to the main loop as [`Event::CommandExited`].
pub fn run_command(
    request: CommandRequest,
    tracker: &mut AdHocCommandTracker,
    tx: &mpsc::Sender<Event>,
) -> Result<()> {
    report(Tone::Command, format!("Running command: {}", request.command));

    let mut command = process::shell_command(&request.command, &request.cwd);
    process::detach_group(&mut command);
    command.stdin(Stdio::null());
    match request.mode {
        OutputMode::Quiet => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        OutputMode::Pretty => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", request.command))?;
    let pid = child
        .id()
        .with_context(|| format!("no process id for {}", request.command))?;

    let token = tracker.next_token();
    let displaced = tracker.insert(
        request.key.clone(),
        AdHocHandle {
            token,
            pid,
            spawned_at: Instant::now(),
        },
    );
    if let Some(previous) = displaced {
        tracing::debug!(key = %request.key, previous = previous.pid, "tracked command replaced");
    }

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_stream(StreamKind::Stdout, request.tag, stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_stream(StreamKind::Stderr, request.tag, stderr));
    }

    let tx = tx.clone();
    let key = request.key;
    let tag = request.tag;
    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "failed to wait on command");
                None
            }
        };
        let _ = tx
            .send(Event::CommandExited {
                key,
                token,
                tag,
                code,
            })
            .await;
    });
    Ok(())
}

/// Reports an ad-hoc exit and stops tracking the invocation.
pub fn on_command_exited(
    tracker: &mut AdHocCommandTracker,
    key: &str,
    token: u64,
    tag: Option<usize>,
    code: Option<i32>,
) {
    match code {
        None | Some(0) => report_tagged(Tone::Stdout, tag, "", "Custom command exited cleanly."),
        Some(code) => report_tagged(
            Tone::Stderr,
            tag,
            "",
            &format!("Custom command crashed with exit code {}.", code),
        ),
    }
    tracker.remove_if_current(key, token);
}

/// Force-terminates a tracked command, reporting failures.
pub async fn force_kill(key: &str, handle: &AdHocHandle) {
    if let Err(err) = process::force_terminate(handle.pid).await {
        report(
            Tone::Error,
            format!("Failed to kill {} ({}): {}", key, handle.pid, err),
        );
    }
}

async fn read_stream<R>(stream: StreamKind, tag: Option<usize>, reader: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        report_stream(stream, tag, &line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(tracker: &mut AdHocCommandTracker, pid: u32) -> AdHocHandle {
        AdHocHandle {
            token: tracker.next_token(),
            pid,
            spawned_at: Instant::now(),
        }
    }

    #[test]
    fn identical_commands_collide_on_one_key() {
        let mut tracker = AdHocCommandTracker::new();
        let first = handle(&mut tracker, 10);
        let second = handle(&mut tracker, 11);
        assert_eq!(tracker.insert("npm run watch", first.clone()), None);
        assert_eq!(tracker.insert("npm run watch", second), Some(first));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get("npm run watch").map(|h| h.pid), Some(11));
    }

    #[test]
    fn stale_exit_does_not_untrack_newer_invocation() {
        let mut tracker = AdHocCommandTracker::new();
        let first = handle(&mut tracker, 10);
        let second = handle(&mut tracker, 11);
        let (first_token, second_token) = (first.token, second.token);
        tracker.insert("make", first);
        tracker.insert("make", second);
        assert_eq!(tracker.remove_if_current("make", first_token), None);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.remove_if_current("make", second_token).is_some());
        assert!(tracker.is_empty());
    }

    #[test]
    fn find_prefixed_locates_server() {
        let mut tracker = AdHocCommandTracker::new();
        let h = handle(&mut tracker, 20);
        tracker.insert("server 8080", h);
        let (key, found) = tracker.find_prefixed(SERVER_KEY_PREFIX).unwrap();
        assert_eq!(key, "server 8080");
        assert_eq!(found.pid, 20);
        assert!(tracker.find_prefixed("npm").is_none());
    }

    #[test]
    fn entries_are_listed_in_spawn_order() {
        let mut tracker = AdHocCommandTracker::new();
        for (key, pid) in [("b", 1), ("a", 2), ("c", 3)] {
            let h = handle(&mut tracker, pid);
            tracker.insert(key, h);
        }
        let keys: Vec<&str> = tracker.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn request_key_is_trimmed_text() {
        let request = CommandRequest::new("  npm test ", "/srv", OutputMode::Pretty);
        assert_eq!(request.key, "npm test");
        let server = CommandRequest::new("npx serve -l 80", "/srv", OutputMode::Quiet)
            .with_key("server 80");
        assert_eq!(server.key, "server 80");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn finished_command_reports_exit_and_untracks() {
        let mut tracker = AdHocCommandTracker::new();
        let (tx, mut rx) = mpsc::channel(8);
        let request = CommandRequest::new("exit 4", std::env::temp_dir(), OutputMode::Pretty);
        run_command(request, &mut tracker, &tx).unwrap();
        assert_eq!(tracker.len(), 1);
        match rx.recv().await.unwrap() {
            Event::CommandExited {
                key, token, code, ..
            } => {
                assert_eq!(key, "exit 4");
                assert_eq!(code, Some(4));
                on_command_exited(&mut tracker, &key, token, None, code);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(tracker.is_empty());
    }
}
