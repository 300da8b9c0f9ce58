//! One-shot run mode: run the assembled command once and exit with its code.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};

use crate::output::{report, Tone};
use crate::process;

/// Keeps the first `segments` `&&`-joined parts of `command`. An absent,
/// non-numeric or zero count keeps the whole command.
pub fn truncate_segments(command: &str, segments: Option<&str>) -> String {
    let count = segments
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|count| *count > 0);
    match count {
        Some(count) => command
            .split("&&")
            .take(count)
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(" && "),
        None => command.trim().to_string(),
    }
}

/// Runs `command` with inherited I/O and returns the exit code to use,
/// 0 when the child was ended by a signal.
pub async fn run(command: &str, cwd: &Path) -> Result<i32> {
    report(Tone::Command, format!("$ {}", command));
    let status = process::shell_command(command, cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("failed to run {}", command))?;
    Ok(status.code().unwrap_or(0))
}
