//! Console reporting for supervisor and command activity.
//!
//! Every user-facing line is prefixed with `[suglite]`, colored by its tone and,
//! in multi-instance mode, tagged with the index of the instance it came from.
//! Internal diagnostics go through `tracing` instead.

use crossterm::style::{Color, Stylize};

const PREFIX: &str = "[suglite]";

/// Indicates the source stream of a captured output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

impl StreamKind {
    fn label(self) -> &'static str {
        match self {
            StreamKind::Stdout => "[stdout]",
            StreamKind::Stderr => "[stderr]",
        }
    }

    fn tone(self) -> Tone {
        match self {
            StreamKind::Stdout => Tone::Stdout,
            StreamKind::Stderr => Tone::Stderr,
        }
    }
}

/// Color family of a reported line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Successful or informational outcome.
    Info,
    /// Lifecycle transitions (restarting, stopping).
    Notice,
    /// Failures and refusals.
    Error,
    /// Echo of a command about to run.
    Command,
    /// Captured standard output, and clean ad-hoc exits.
    Stdout,
    /// Captured standard error, and crashed ad-hoc exits.
    Stderr,
    /// Configuration sources.
    Config,
}

impl Tone {
    fn color(self) -> Color {
        match self {
            Tone::Info => Color::Green,
            Tone::Notice => Color::Yellow,
            Tone::Error => Color::Red,
            Tone::Command => Color::Blue,
            Tone::Stdout | Tone::Config => Color::Cyan,
            Tone::Stderr => Color::Magenta,
        }
    }
}

/// Builds the uncolored text of a report line.
pub fn format_message(tag: Option<usize>, prefix: &str, message: &str) -> String {
    let mut line = String::from(PREFIX);
    if let Some(index) = tag {
        line.push_str(&format!(" [{}]", index));
    }
    for part in [prefix, message] {
        if !part.is_empty() {
            line.push(' ');
            line.push_str(part);
        }
    }
    line
}

/// Prints an untagged line.
pub fn report(tone: Tone, message: impl AsRef<str>) {
    report_tagged(tone, None, "", message.as_ref());
}

/// Prints a line with an optional instance tag and a leading prefix word.
pub fn report_tagged(tone: Tone, tag: Option<usize>, prefix: &str, message: &str) {
    let line = format_message(tag, prefix, message);
    println!("{}", line.with(tone.color()));
}

/// Prints an indented detail line, used for listings under a heading.
pub fn report_item(tone: Tone, item: impl AsRef<str>) {
    println!("{}  {}", PREFIX.with(tone.color()), item.as_ref());
}

/// Prints one line captured from an ad-hoc command in pretty mode.
pub fn report_stream(stream: StreamKind, tag: Option<usize>, line: &str) {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return;
    }
    report_tagged(stream.tone(), tag, stream.label(), trimmed);
}

/// Pretty-prints a serializable value as JSON, used by the `config` command.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let pretty = serde_json::to_string_pretty(value)?;
    println!("{}", pretty);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_message_has_plain_prefix() {
        assert_eq!(
            format_message(None, "Restarting...", ""),
            "[suglite] Restarting..."
        );
    }

    #[test]
    fn tagged_message_carries_instance_index() {
        assert_eq!(
            format_message(Some(2), "Running command:", "npm start"),
            "[suglite] [2] Running command: npm start"
        );
    }

    #[test]
    fn stream_labels_differ() {
        assert_eq!(StreamKind::Stdout.label(), "[stdout]");
        assert_eq!(StreamKind::Stderr.label(), "[stderr]");
        assert_ne!(StreamKind::Stdout.tone(), StreamKind::Stderr.tone());
    }
}
