//! Interactive command routing.
//!
//! Each input line is parsed into a [`RoutedLine`] (target instance, quiet
//! flag, text), planned into a list of [`Action`]s, and executed against the
//! registry, the ad-hoc command tracker and the history file. Several
//! categories can fire for one line: an event named `rs` both runs its command
//! and restarts the instance.

use std::io::stdout;
use std::time::Instant;

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use tokio::sync::mpsc;

use crate::adhoc::{
    self, AdHocCommandTracker, AdHocHandle, CommandRequest, OutputMode, SERVER_KEY_PREFIX,
};
use crate::config::SupervisedProcessConfig;
use crate::events::Event;
use crate::history::HistoryFile;
use crate::output::{print_json, report, report_item, report_tagged, Tone};
use crate::registry::SupervisorRegistry;

/// Commands accepted without the `$` prefix.
pub const DEFAULT_TRUSTED_SHELLS: [&str; 14] = [
    "yarn",
    "npm",
    "pnpm",
    "node",
    "bun",
    "tsc",
    "bumr",
    "git",
    "docker",
    "docker-compose",
    "python",
    "pip",
    "cargo",
    "go",
];

/// An input line split into its target instance, quiet flag and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedLine {
    pub index: usize,
    pub quiet: bool,
    pub text: String,
}

/// Parses the optional leading instance index and `!` quiet marker.
/// Returns `None` for lines with nothing left to route.
pub fn route(line: &str, default_index: usize) -> Option<RoutedLine> {
    let line = line.trim();
    let (index, rest) = match line.split_once(char::is_whitespace) {
        Some((first, rest)) => match first.parse::<usize>() {
            Ok(index) => (index, rest.trim_start()),
            Err(_) => (default_index, line),
        },
        None => (default_index, line),
    };
    let (quiet, text) = match rest.strip_prefix('!') {
        Some(stripped) => (true, stripped.trim_start()),
        None => (false, rest),
    };
    if text.is_empty() {
        return None;
    }
    Some(RoutedLine {
        index,
        quiet,
        text: text.to_string(),
    })
}

/// Built-in `server` sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    /// Start serving; `None` uses the configured port.
    Start(Option<u16>),
    Stop,
    Open,
    Invalid,
}

/// Exact-match system commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    Restart,
    Stop,
    Status,
    Quit,
    Help,
    Config,
    Clear,
    UniqueHistory,
    ShowEvents,
    Server(ServerCommand),
}

impl SystemCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let command = match text {
            "rs" => SystemCommand::Restart,
            "stop" => SystemCommand::Stop,
            "status" => SystemCommand::Status,
            "quit" | "exit" => SystemCommand::Quit,
            "help" => SystemCommand::Help,
            "config" => SystemCommand::Config,
            "cls" => SystemCommand::Clear,
            "unique-history" => SystemCommand::UniqueHistory,
            "show-cmd" => SystemCommand::ShowEvents,
            "server" => SystemCommand::Server(ServerCommand::Start(None)),
            _ => {
                let argument = text.strip_prefix(SERVER_KEY_PREFIX)?.trim();
                SystemCommand::Server(match argument {
                    "stop" => ServerCommand::Stop,
                    "open" => ServerCommand::Open,
                    port => match port.parse::<u16>() {
                        Ok(port) if port > 0 => ServerCommand::Start(Some(port)),
                        _ => ServerCommand::Invalid,
                    },
                })
            }
        };
        Some(command)
    }
}

/// One thing to do in response to a routed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A configured event shortcut.
    RunEvent { command: String, quiet: bool },
    /// A `$` shell command; recorded in history unless quiet.
    Shell { command: String, quiet: bool },
    /// A trusted-shell command, run with inherited output and recorded.
    Trusted { command: String },
    System(SystemCommand),
}

/// Plans every action `line` triggers on the instance configured by `config`.
pub fn plan_actions(line: &RoutedLine, config: &SupervisedProcessConfig) -> Vec<Action> {
    let mut actions = Vec::new();
    let text = line.text.as_str();

    if let Some(command) = config.events.get(text) {
        actions.push(Action::RunEvent {
            command: command.clone(),
            quiet: line.quiet,
        });
    }

    if let Some(rest) = text.strip_prefix('$') {
        let (quiet, command) = match rest.strip_prefix('!') {
            Some(stripped) => (true, stripped),
            None => (line.quiet, rest),
        };
        let command = command.trim();
        if !command.is_empty() {
            actions.push(Action::Shell {
                command: command.to_string(),
                quiet,
            });
        }
    } else if is_trusted(text, config) {
        actions.push(Action::Trusted {
            command: text.to_string(),
        });
    }

    if let Some(command) = SystemCommand::parse(text) {
        actions.push(Action::System(command));
    }
    actions
}

fn is_trusted(text: &str, config: &SupervisedProcessConfig) -> bool {
    let Some(first) = text.split_whitespace().next() else {
        return false;
    };
    let first = first.to_lowercase();
    DEFAULT_TRUSTED_SHELLS.iter().any(|shell| *shell == first)
        || config
            .trusted_shells
            .iter()
            .any(|shell| shell.to_lowercase() == first)
}

/// What a `server` command resolves to against the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPlan {
    Start { port: u16 },
    AlreadyRunning { key: String },
    Stop { key: String },
    Open { port: u16 },
    NotRunning,
    NoPort,
    Invalid,
}

pub fn plan_server(
    command: ServerCommand,
    configured_port: Option<u16>,
    tracker: &AdHocCommandTracker,
) -> ServerPlan {
    let running = tracker
        .find_prefixed(SERVER_KEY_PREFIX)
        .map(|(key, _)| key.to_string());
    match command {
        ServerCommand::Start(port) => match (running, port.or(configured_port)) {
            (Some(key), _) => ServerPlan::AlreadyRunning { key },
            (None, Some(port)) => ServerPlan::Start { port },
            (None, None) => ServerPlan::NoPort,
        },
        ServerCommand::Stop => match running {
            Some(key) => ServerPlan::Stop { key },
            None => ServerPlan::NotRunning,
        },
        ServerCommand::Open => match running.as_deref().and_then(server_port) {
            Some(port) => ServerPlan::Open { port },
            None => ServerPlan::NotRunning,
        },
        ServerCommand::Invalid => ServerPlan::Invalid,
    }
}

/// Removes the tracked server, if any.
pub fn take_server(tracker: &mut AdHocCommandTracker) -> Option<(String, AdHocHandle)> {
    let key = tracker.find_prefixed(SERVER_KEY_PREFIX)?.0.to_string();
    let handle = tracker.remove(&key)?;
    Some((key, handle))
}

fn server_port(key: &str) -> Option<u16> {
    key.strip_prefix(SERVER_KEY_PREFIX)?.trim().parse().ok()
}

fn open_command(url: &str) -> String {
    if cfg!(windows) {
        format!("start \"\" {}", url)
    } else if cfg!(target_os = "macos") {
        format!("open {}", url)
    } else {
        format!("xdg-open {}", url)
    }
}

/// Whether the main loop keeps running after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Executes routed lines. Lives on the main task together with the tracker.
pub struct CommandRouter {
    history: HistoryFile,
    tx: mpsc::Sender<Event>,
}

impl CommandRouter {
    pub fn new(history: HistoryFile, tx: mpsc::Sender<Event>) -> Self {
        Self { history, tx }
    }

    pub async fn handle_line(
        &mut self,
        line: &str,
        default_index: usize,
        registry: &SupervisorRegistry,
        tracker: &mut AdHocCommandTracker,
    ) -> Flow {
        let Some(routed) = route(line, default_index) else {
            return Flow::Continue;
        };
        let Some(entry) = registry.get(routed.index) else {
            report(
                Tone::Error,
                format!(
                    "No instance {}; valid indices are 0 to {}.",
                    routed.index,
                    registry.len().saturating_sub(1)
                ),
            );
            return Flow::Continue;
        };
        let config = entry.config.clone();
        let tag = registry.tag(routed.index);

        let mut flow = Flow::Continue;
        for action in plan_actions(&routed, &config) {
            match self
                .execute(action, &routed, &config, tag, registry, tracker)
                .await
            {
                Ok(Flow::Quit) => flow = Flow::Quit,
                Ok(Flow::Continue) => {}
                Err(err) => report_tagged(Tone::Error, tag, "", &format!("{:#}", err)),
            }
        }
        flow
    }

    async fn execute(
        &mut self,
        action: Action,
        routed: &RoutedLine,
        config: &SupervisedProcessConfig,
        tag: Option<usize>,
        registry: &SupervisorRegistry,
        tracker: &mut AdHocCommandTracker,
    ) -> Result<Flow> {
        match action {
            Action::RunEvent { command, quiet } => {
                let request = CommandRequest::new(command, &config.cwd, output_mode(quiet));
                adhoc::run_command(request.with_tag(tag), tracker, &self.tx)?;
            }
            Action::Shell { command, quiet } => {
                let request = CommandRequest::new(command, &config.cwd, output_mode(quiet));
                adhoc::run_command(request.with_tag(tag), tracker, &self.tx)?;
                if !quiet {
                    self.record(&routed.text);
                }
            }
            Action::Trusted { command } => {
                let request = CommandRequest::new(command, &config.cwd, OutputMode::Quiet);
                adhoc::run_command(request.with_tag(tag), tracker, &self.tx)?;
                self.record(&routed.text);
            }
            Action::System(command) => {
                return self
                    .system(command, routed.index, config, tag, registry, tracker)
                    .await;
            }
        }
        Ok(Flow::Continue)
    }

    async fn system(
        &mut self,
        command: SystemCommand,
        index: usize,
        config: &SupervisedProcessConfig,
        tag: Option<usize>,
        registry: &SupervisorRegistry,
        tracker: &mut AdHocCommandTracker,
    ) -> Result<Flow> {
        let entry = registry.get(index);
        match command {
            SystemCommand::Restart => {
                if let Some(entry) = entry {
                    entry.handle.request_restart();
                }
            }
            SystemCommand::Stop => {
                if let Some(entry) = entry {
                    let handle = entry.handle.clone();
                    tokio::spawn(async move { handle.stop().await });
                }
            }
            SystemCommand::Status => print_status(registry, tracker),
            SystemCommand::Quit => return Ok(Flow::Quit),
            SystemCommand::Help => print_help(config),
            SystemCommand::Config => print_json(config)?,
            SystemCommand::Clear => execute!(stdout(), Clear(ClearType::All), MoveTo(0, 0))?,
            SystemCommand::UniqueHistory => {
                let removed = self.history.unique()?;
                report(
                    Tone::Info,
                    format!("Removed {} duplicate history entries.", removed),
                );
            }
            SystemCommand::ShowEvents => print_events(config),
            SystemCommand::Server(command) => {
                self.server(command, config, tag, tracker).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn server(
        &mut self,
        command: ServerCommand,
        config: &SupervisedProcessConfig,
        tag: Option<usize>,
        tracker: &mut AdHocCommandTracker,
    ) -> Result<()> {
        match plan_server(command, config.server_port, tracker) {
            ServerPlan::Start { port } => {
                let request = CommandRequest::new(
                    config.server_command(port),
                    &config.cwd,
                    OutputMode::Pretty,
                )
                .with_key(format!("{}{}", SERVER_KEY_PREFIX, port))
                .with_tag(tag);
                adhoc::run_command(request, tracker, &self.tx)?;
            }
            ServerPlan::AlreadyRunning { key } => {
                report_tagged(Tone::Notice, tag, "", &format!("{} already running.", key));
            }
            ServerPlan::Stop { .. } => {
                if let Some((key, handle)) = take_server(tracker) {
                    adhoc::force_kill(&key, &handle).await;
                    report_tagged(Tone::Info, tag, "", &format!("{} stopped.", key));
                }
            }
            ServerPlan::Open { port } => {
                let url = format!("http://localhost:{}", port);
                let request =
                    CommandRequest::new(open_command(&url), &config.cwd, OutputMode::Quiet)
                        .with_tag(tag);
                adhoc::run_command(request, tracker, &self.tx)?;
            }
            ServerPlan::NotRunning => {
                report_tagged(Tone::Notice, tag, "", "Server not running.");
            }
            ServerPlan::NoPort => {
                report_tagged(
                    Tone::Error,
                    tag,
                    "",
                    "No server port configured; use `server <port>`.",
                );
            }
            ServerPlan::Invalid => {
                report_tagged(
                    Tone::Error,
                    tag,
                    "",
                    "Usage: server [<port>|stop|open]",
                );
            }
        }
        Ok(())
    }

    fn record(&self, entry: &str) {
        if let Err(err) = self.history.append(entry) {
            tracing::warn!(error = %err, "failed to update history");
        }
    }
}

fn output_mode(quiet: bool) -> OutputMode {
    if quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Pretty
    }
}

fn print_status(registry: &SupervisorRegistry, tracker: &AdHocCommandTracker) {
    report(Tone::Info, "Instances:");
    for entry in registry.iter() {
        let status = entry.handle.status();
        let mut line = format!("[{}] {}", status.index, status.state.label());
        if let Some(process) = &status.process {
            if process.exit_code.is_none() {
                line.push_str(&format!(
                    ", pid {}, up {}",
                    process.pid,
                    age(process.spawned_at)
                ));
            }
        }
        line.push_str(&format!(", {} starts", status.restarts));
        if let Some(code) = status.last_exit {
            line.push_str(&format!(", last exit {}", code));
        }
        line.push_str(&format!(" ({})", entry.config.command_line()));
        report_item(Tone::Info, line);
    }

    if tracker.is_empty() {
        return;
    }
    report(Tone::Info, "Commands:");
    for (key, handle) in tracker.entries() {
        report_item(
            Tone::Info,
            format!("{} (pid {}, {})", key, handle.pid, age(handle.spawned_at)),
        );
    }
}

fn age(since: Instant) -> String {
    let secs = since.elapsed().as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn print_events(config: &SupervisedProcessConfig) {
    if config.events.is_empty() {
        report(Tone::Notice, "No events configured.");
        return;
    }
    report(Tone::Info, "Events:");
    for (name, command) in &config.events {
        report_item(Tone::Info, format!("{} -> {}", name, command));
    }
}

fn print_help(config: &SupervisedProcessConfig) {
    const COMMANDS: [(&str, &str); 13] = [
        ("rs", "restart the process"),
        ("stop", "stop the process without restarting"),
        ("status", "show instances and running commands"),
        ("quit, exit", "stop everything and exit"),
        ("config", "print the active configuration"),
        ("cls", "clear the terminal"),
        ("unique-history", "remove duplicate history entries"),
        ("show-cmd", "list configured events"),
        ("server [<port>]", "serve the working directory"),
        ("server stop", "stop the server"),
        ("server open", "open the server in a browser"),
        ("$<command>", "run a shell command; $!<command> runs it quietly"),
        ("<N> <line>", "send the line to instance N"),
    ];
    report(Tone::Info, "Commands:");
    for (command, description) in COMMANDS {
        report_item(Tone::Info, format!("{:<18}{}", command, description));
    }
    let mut trusted: Vec<String> = DEFAULT_TRUSTED_SHELLS
        .iter()
        .map(|shell| shell.to_string())
        .collect();
    trusted.extend(config.trusted_shells.iter().cloned());
    report(Tone::Info, "Trusted shells:");
    report_item(Tone::Info, trusted.join(", "));
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::FileConfig;
    use crate::process::fake::{FakeLauncher, Script};

    fn config() -> SupervisedProcessConfig {
        FileConfig {
            cmd: Some("node".into()),
            trusted_shells: Some(vec!["Make".into()]),
            events: Some(
                [
                    ("b".to_string(), "npm run build".to_string()),
                    ("rs".to_string(), "echo restarting".to_string()),
                ]
                .into_iter()
                .collect(),
            ),
            ..FileConfig::default()
        }
        .finish(Path::new("/srv/app"))
        .unwrap()
    }

    fn routed(line: &str) -> RoutedLine {
        route(line, 0).unwrap()
    }

    #[test]
    fn leading_index_selects_instance() {
        assert_eq!(
            route("2 rs", 0),
            Some(RoutedLine {
                index: 2,
                quiet: false,
                text: "rs".into()
            })
        );
        assert_eq!(route("rs", 3).unwrap().index, 3);
    }

    #[test]
    fn non_numeric_first_token_uses_default() {
        let line = route("npm run dev", 0).unwrap();
        assert_eq!(line.index, 0);
        assert_eq!(line.text, "npm run dev");
        assert_eq!(route("-1 rs", 0).unwrap().text, "-1 rs");
    }

    #[test]
    fn bang_marks_quiet() {
        let line = route("1 !$ls", 0).unwrap();
        assert_eq!(line.index, 1);
        assert!(line.quiet);
        assert_eq!(line.text, "$ls");
        assert_eq!(route("   ", 0), None);
        assert_eq!(route("!", 0), None);
    }

    #[test]
    fn events_match_exactly() {
        assert_eq!(
            plan_actions(&routed("b"), &config()),
            vec![Action::RunEvent {
                command: "npm run build".into(),
                quiet: false
            }]
        );
        assert!(plan_actions(&routed("b2"), &config()).is_empty());
    }

    #[test]
    fn event_and_system_command_both_fire() {
        let actions = plan_actions(&routed("rs"), &config());
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1], Action::System(SystemCommand::Restart));
    }

    #[test]
    fn dollar_commands_run_in_shell() {
        assert_eq!(
            plan_actions(&routed("$ls -la"), &config()),
            vec![Action::Shell {
                command: "ls -la".into(),
                quiet: false
            }]
        );
        assert_eq!(
            plan_actions(&routed("$!ls"), &config()),
            vec![Action::Shell {
                command: "ls".into(),
                quiet: true
            }]
        );
        assert!(plan_actions(&routed("$"), &config()).is_empty());
    }

    #[test]
    fn trusted_shells_are_case_insensitive_and_merged() {
        assert_eq!(
            plan_actions(&routed("GIT status"), &config()),
            vec![Action::Trusted {
                command: "GIT status".into()
            }]
        );
        assert_eq!(
            plan_actions(&routed("make build"), &config()),
            vec![Action::Trusted {
                command: "make build".into()
            }]
        );
        assert!(plan_actions(&routed("rm -rf dist"), &config()).is_empty());
    }

    #[test]
    fn system_commands_parse() {
        assert_eq!(SystemCommand::parse("exit"), Some(SystemCommand::Quit));
        assert_eq!(SystemCommand::parse("show-cmd"), Some(SystemCommand::ShowEvents));
        assert_eq!(
            SystemCommand::parse("server 8080"),
            Some(SystemCommand::Server(ServerCommand::Start(Some(8080))))
        );
        assert_eq!(
            SystemCommand::parse("server"),
            Some(SystemCommand::Server(ServerCommand::Start(None)))
        );
        assert_eq!(
            SystemCommand::parse("server abc"),
            Some(SystemCommand::Server(ServerCommand::Invalid))
        );
        assert_eq!(SystemCommand::parse("rs now"), None);
    }

    fn track_server(tracker: &mut AdHocCommandTracker, port: u16) {
        let handle = AdHocHandle {
            token: tracker.next_token(),
            pid: 4242,
            spawned_at: Instant::now(),
        };
        tracker.insert(format!("server {}", port), handle);
    }

    #[test]
    fn server_start_is_idempotent() {
        let mut tracker = AdHocCommandTracker::new();
        assert_eq!(
            plan_server(ServerCommand::Start(None), Some(3000), &tracker),
            ServerPlan::Start { port: 3000 }
        );
        assert_eq!(
            plan_server(ServerCommand::Start(None), None, &tracker),
            ServerPlan::NoPort
        );
        track_server(&mut tracker, 3000);
        assert_eq!(
            plan_server(ServerCommand::Start(Some(4000)), None, &tracker),
            ServerPlan::AlreadyRunning {
                key: "server 3000".into()
            }
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn server_stop_twice_stops_once() {
        let mut tracker = AdHocCommandTracker::new();
        assert_eq!(
            plan_server(ServerCommand::Stop, None, &tracker),
            ServerPlan::NotRunning
        );
        track_server(&mut tracker, 8080);
        assert_eq!(
            plan_server(ServerCommand::Stop, None, &tracker),
            ServerPlan::Stop {
                key: "server 8080".into()
            }
        );
        assert!(take_server(&mut tracker).is_some());
        assert_eq!(
            plan_server(ServerCommand::Stop, None, &tracker),
            ServerPlan::NotRunning
        );
        assert!(take_server(&mut tracker).is_none());
    }

    #[test]
    fn server_open_uses_running_port() {
        let mut tracker = AdHocCommandTracker::new();
        assert_eq!(
            plan_server(ServerCommand::Open, Some(80), &tracker),
            ServerPlan::NotRunning
        );
        track_server(&mut tracker, 5173);
        assert_eq!(
            plan_server(ServerCommand::Open, None, &tracker),
            ServerPlan::Open { port: 5173 }
        );
    }

    fn instance(cmd: &str, dir: &str) -> SupervisedProcessConfig {
        FileConfig {
            cmd: Some(cmd.into()),
            ..FileConfig::default()
        }
        .finish(Path::new(dir))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn indexed_restart_touches_only_that_instance() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(Script::obedient());
        let shared = Arc::new(launcher.clone());
        let mut registry = SupervisorRegistry::new(true);
        registry.add_supervisor(instance("api", "/a"), shared.clone());
        registry.add_supervisor(instance("web", "/b"), shared);

        let (tx, _rx) = mpsc::channel(8);
        let mut router = CommandRouter::new(HistoryFile::new(dir.path().join("h"), 10), tx);
        let mut tracker = AdHocCommandTracker::new();
        let flow = router
            .handle_line("1 rs", 0, &registry, &mut tracker)
            .await;
        assert_eq!(flow, Flow::Continue);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let launches = launcher.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, "web");
        assert_eq!(launches[0].1, Path::new("/b"));
    }

    #[tokio::test(start_paused = true)]
    async fn quit_ends_the_loop_and_bad_index_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(Script::obedient()));
        let mut registry = SupervisorRegistry::new(false);
        registry.add_supervisor(instance("api", "/a"), launcher);

        let (tx, _rx) = mpsc::channel(8);
        let mut router = CommandRouter::new(HistoryFile::new(dir.path().join("h"), 10), tx);
        let mut tracker = AdHocCommandTracker::new();
        assert_eq!(
            router.handle_line("5 rs", 0, &registry, &mut tracker).await,
            Flow::Continue
        );
        assert_eq!(
            router.handle_line("quit", 0, &registry, &mut tracker).await,
            Flow::Quit
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_commands_are_recorded_unless_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(Script::obedient()));
        let mut registry = SupervisorRegistry::new(false);
        registry.add_supervisor(
            instance("api", dir.path().to_str().unwrap()),
            launcher,
        );

        let history = HistoryFile::new(dir.path().join(".suglite_history"), 10);
        let (tx, mut rx) = mpsc::channel(8);
        let mut router = CommandRouter::new(history.clone(), tx);
        let mut tracker = AdHocCommandTracker::new();
        router
            .handle_line("$true", 0, &registry, &mut tracker)
            .await;
        router
            .handle_line("$!true", 0, &registry, &mut tracker)
            .await;
        assert_eq!(history.read().unwrap(), vec!["$true"]);

        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                Event::CommandExited { code, .. } => assert_eq!(code, Some(0)),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
