//! Suglite: a development-time process supervisor.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads configuration, starts one supervisor per instance and runs the main
//! event loop that routes interactive commands.

mod adhoc;
mod config;
mod events;
mod history;
mod output;
mod process;
mod registry;
mod router;
mod run_once;
mod runner;
mod shutdown;
mod watch;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::adhoc::AdHocCommandTracker;
use crate::config::{FileConfig, LoadOptions, SupervisedProcessConfig};
use crate::events::Event;
use crate::history::HistoryFile;
use crate::output::{report, Tone};
use crate::process::ShellLauncher;
use crate::registry::SupervisorRegistry;
use crate::router::{CommandRouter, Flow};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "suglite",
    version,
    about = "Restart a command when files change, with an interactive command line",
    styles = help_styles(),
    color = clap::ColorChoice::Always,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Configuration file (defaults to suglite.json5 or suglite.json).
    #[arg(short = 'f', long = "config")]
    config: Option<PathBuf>,
    /// Command to run.
    #[arg(short, long)]
    cmd: Option<String>,
    /// Path or glob to watch (repeatable).
    #[arg(short, long)]
    watch: Vec<String>,
    /// Path or glob to ignore (repeatable).
    #[arg(short, long)]
    ignore: Vec<String>,
    /// Extra restart delay (ms).
    #[arg(short, long)]
    delay: Option<u64>,
    /// Command to run before every restart.
    #[arg(long)]
    restart_cmd: Option<String>,
    /// Number of history entries to keep (0 disables history).
    #[arg(long)]
    history: Option<usize>,
    /// Port served after startup.
    #[arg(long)]
    server: Option<u16>,
    /// Override any configuration key (KEY=VALUE, repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    sets: Vec<String>,
    /// Also run every instance listed in suglite.multi.json5.
    #[arg(long)]
    multi: bool,
    /// Run the command once and exit; SEGMENTS keeps the first N `&&` parts.
    #[arg(long, value_name = "SEGMENTS", num_args = 0..=1, default_missing_value = "all")]
    run: Option<String>,
    /// Skip the global configuration file.
    #[arg(long)]
    no_global: bool,
    /// Arguments appended to the command (after `--`).
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a template configuration file.
    Init {
        /// Write the global configuration instead of ./suglite.json5.
        #[arg(long)]
        global: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    if let Some(Commands::Init { global }) = &cli.command {
        return init(*global, &cwd);
    }

    let loaded = match config::load_primary(&load_options(&cli, &cwd)) {
        Ok(loaded) => loaded,
        Err(err) => fail(err),
    };
    if let Some(path) = &loaded.global {
        report(Tone::Config, format!("Global config: {}", path.display()));
    }
    if let Some(path) = &loaded.local {
        report(Tone::Config, format!("Local config: {}", path.display()));
    }
    let primary = loaded.config;

    if let Some(segments) = &cli.run {
        let command = run_once::truncate_segments(&primary.command_line(), Some(segments));
        let code = run_once::run(&command, &primary.cwd).await?;
        std::process::exit(code);
    }

    let instances = if cli.multi {
        match load_instances(&cwd) {
            Ok(instances) => instances,
            Err(err) => fail(err),
        }
    } else {
        Vec::new()
    };

    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let launcher = Arc::new(ShellLauncher);
    let mut registry = SupervisorRegistry::new(cli.multi);

    let history = HistoryFile::new(cwd.join(config::HISTORY_FILE), primary.history_size);
    if let Err(err) = history.ensure_exists() {
        tracing::warn!(error = %err, "failed to create history file");
    }

    for config in std::iter::once(primary).chain(instances) {
        let handle = registry.add_process(config, launcher.clone());
        handle.request_restart();
        if let Some(entry) = registry.get(handle.index()) {
            runner::spawn_startup_commands(entry.index, entry.config.clone(), tx.clone());
        }
    }

    spawn_stdin_listener(tx.clone());
    shutdown::spawn_signal_listener(tx.clone());

    let mut router = CommandRouter::new(history, tx);
    let mut tracker = AdHocCommandTracker::new();

    while let Some(event) = rx.recv().await {
        match event {
            Event::Line { text, origin } => {
                let flow = router
                    .handle_line(&text, origin, &registry, &mut tracker)
                    .await;
                if flow == Flow::Quit {
                    break;
                }
            }
            Event::InputClosed => tracing::debug!("interactive input closed"),
            Event::CommandExited {
                key,
                token,
                tag,
                code,
            } => adhoc::on_command_exited(&mut tracker, &key, token, tag, code),
            Event::Shutdown { signal } => {
                report(Tone::Notice, format!("Received {}.", signal.label()));
                break;
            }
        }
    }

    shutdown::shutdown(&registry, &mut tracker).await;
    std::process::exit(0);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SUGLITE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn init(global: bool, cwd: &Path) -> Result<()> {
    let path = if global {
        config::global_config_dir()
            .ok_or_else(|| anyhow!("cannot determine the global configuration directory"))?
            .join("config.json5")
    } else {
        cwd.join(config::INSTANCE_CONFIG)
    };
    config::write_template(&path)?;
    report(Tone::Info, format!("Created {}", path.display()));
    Ok(())
}

fn load_options(cli: &Cli, cwd: &Path) -> LoadOptions {
    let overrides = FileConfig {
        cmd: cli.cmd.clone(),
        watch: (!cli.watch.is_empty()).then(|| cli.watch.clone()),
        ignore: (!cli.ignore.is_empty()).then(|| cli.ignore.clone()),
        delay: cli.delay,
        restart_cmd: cli.restart_cmd.clone(),
        history: cli.history,
        server: cli.server,
        ..FileConfig::default()
    };
    LoadOptions {
        cwd: cwd.to_path_buf(),
        file: cli.config.clone(),
        global_dir: if cli.no_global {
            None
        } else {
            config::global_config_dir()
        },
        overrides,
        sets: cli.sets.clone(),
        extra_args: cli.args.clone(),
    }
}

/// Resolves the multi-instance manifest. A missing manifest leaves only the
/// primary instance running.
fn load_instances(cwd: &Path) -> Result<Vec<SupervisedProcessConfig>> {
    let manifest = cwd.join(config::MULTI_MANIFEST);
    if !manifest.exists() {
        report(
            Tone::Notice,
            format!(
                "{} not found, running the primary instance only.",
                config::MULTI_MANIFEST
            ),
        );
        return Ok(Vec::new());
    }
    let instances = config::load_manifest(&manifest, cwd)?;
    report(
        Tone::Config,
        format!("Loaded {} instances from {}", instances.len(), manifest.display()),
    );
    Ok(instances)
}

fn fail(err: anyhow::Error) -> ! {
    report(Tone::Error, format!("{:#}", err));
    std::process::exit(1);
}

fn spawn_stdin_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(text) = line else {
                break;
            };
            if tx.blocking_send(Event::Line { text, origin: 0 }).is_err() {
                return;
            }
        }
        let _ = tx.blocking_send(Event::InputClosed);
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_collects_layers() {
        let cli = Cli::try_parse_from([
            "suglite", "-c", "node", "-w", "src", "-w", "lib", "-d", "200", "--set",
            "server=8080", "--no-global", "--", "app.js", "--port", "3000",
        ])
        .unwrap();
        let options = load_options(&cli, Path::new("/srv/app"));
        assert_eq!(options.overrides.cmd.as_deref(), Some("node"));
        assert_eq!(
            options.overrides.watch,
            Some(vec!["src".to_string(), "lib".to_string()])
        );
        assert_eq!(options.overrides.delay, Some(200));
        assert_eq!(options.overrides.ignore, None);
        assert_eq!(options.sets, vec!["server=8080"]);
        assert_eq!(options.extra_args, vec!["app.js", "--port", "3000"]);
        assert!(options.global_dir.is_none());
    }

    #[test]
    fn run_flag_takes_optional_segments() {
        let bare = Cli::try_parse_from(["suglite", "--run"]).unwrap();
        assert_eq!(bare.run.as_deref(), Some("all"));
        let counted = Cli::try_parse_from(["suglite", "--run", "2"]).unwrap();
        assert_eq!(counted.run.as_deref(), Some("2"));
        let absent = Cli::try_parse_from(["suglite"]).unwrap();
        assert!(absent.run.is_none());
    }

    #[test]
    fn init_subcommand_parses() {
        let cli = Cli::try_parse_from(["suglite", "init", "--global"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Init { global: true })));
    }

    #[test]
    fn missing_manifest_means_single_instance() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_instances(dir.path()).unwrap().is_empty());
    }
}
