//! File watching for supervisors.
//!
//! Each supervisor gets a background thread that subscribes to change
//! notifications under its working directory and forwards every relevant
//! add/change/remove event as a restart request. Debouncing is left entirely
//! to the supervisor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::{SupervisedProcessConfig, HISTORY_FILE};
use crate::runner::SupervisorHandle;

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// Spawns the watcher thread for one supervisor.
pub fn spawn_watcher(handle: SupervisorHandle, config: Arc<SupervisedProcessConfig>) {
    std::thread::spawn(move || {
        if let Err(err) = watch_process(&handle, &config) {
            tracing::warn!(index = handle.index(), error = %err, "file watcher failed");
        }
    });
}

fn watch_process(handle: &SupervisorHandle, config: &SupervisedProcessConfig) -> Result<()> {
    let base = &config.cwd;
    let targets = WatchSet::new(base, &config.watch_paths)?;
    let matcher = IgnoreMatcher::new(base, &config.ignore_paths, config.watch_gitignore)?;

    let (raw_tx, raw_rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.send(res);
        },
        notify::Config::default(),
    )
    .context("failed to create watcher")?;

    let mut watched = Vec::new();
    for root in &targets.roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => watched.push(root),
            Err(err) => tracing::warn!(
                index = handle.index(),
                path = %root.display(),
                error = %err,
                "skipping watch path"
            ),
        }
    }
    if watched.is_empty() {
        bail!("none of the watch paths could be watched");
    }
    tracing::debug!(index = handle.index(), paths = ?watched, "watching");

    for res in raw_rx {
        match res {
            Ok(event) if is_relevant(&event, &targets, &matcher) => handle.request_restart(),
            Ok(_) => {}
            Err(err) => tracing::warn!(index = handle.index(), error = %err, "watch error"),
        }
    }

    Ok(())
}

/// Directories to subscribe to, plus the patterns events under them must
/// match. A glob entry is watched from its literal leading directory.
struct WatchSet {
    base: PathBuf,
    roots: Vec<PathBuf>,
    filter: Option<GlobSet>,
}

impl WatchSet {
    fn new(base: &Path, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self {
                base: base.to_path_buf(),
                roots: vec![base.to_path_buf()],
                filter: None,
            });
        }
        let mut roots = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let root = literal_root(base, pattern);
            if !roots.contains(&root) {
                roots.push(root);
            }
            for expanded in expand_pattern(pattern) {
                builder.add(
                    Glob::new(&expanded)
                        .with_context(|| format!("invalid watch pattern {}", pattern))?,
                );
            }
        }
        Ok(Self {
            base: base.to_path_buf(),
            roots,
            filter: Some(builder.build()?),
        })
    }

    fn covers(&self, path: &Path) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        filter.is_match(path)
            || path
                .strip_prefix(&self.base)
                .is_ok_and(|relative| filter.is_match(relative))
    }
}

/// Leading components of `pattern` that contain no glob syntax, resolved
/// against `base`.
fn literal_root(base: &Path, pattern: &str) -> PathBuf {
    let literal: PathBuf = Path::new(pattern)
        .components()
        .take_while(|component| {
            !component
                .as_os_str()
                .to_string_lossy()
                .contains(GLOB_CHARS)
        })
        .collect();
    if literal.is_absolute() {
        literal
    } else {
        base.join(literal)
    }
}

fn is_relevant(event: &NotifyEvent, targets: &WatchSet, matcher: &IgnoreMatcher) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    if !kind_matches {
        return false;
    }
    event.paths.is_empty()
        || event
            .paths
            .iter()
            .any(|path| targets.covers(path) && !matcher.is_ignored(path))
}

struct IgnoreMatcher {
    // Combines explicit ignore globs with optional gitignore rules.
    base: PathBuf,
    globset: GlobSet,
    gitignore: Option<Gitignore>,
}

impl IgnoreMatcher {
    fn new(base: &Path, patterns: &[String], use_gitignore: bool) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(&format!("**/{}", HISTORY_FILE))?);
        for pattern in patterns {
            for expanded in expand_pattern(pattern) {
                builder.add(
                    Glob::new(&expanded)
                        .with_context(|| format!("invalid ignore pattern {}", pattern))?,
                );
            }
        }
        let globset = builder.build()?;

        let gitignore = if use_gitignore {
            Some(build_gitignore(base)?)
        } else {
            None
        };

        Ok(Self {
            base: base.to_path_buf(),
            globset,
            gitignore,
        })
    }

    fn is_ignored(&self, path: &Path) -> bool {
        if self.globset.is_match(path) {
            return true;
        }
        if let Ok(relative) = path.strip_prefix(&self.base) {
            if self.globset.is_match(relative) {
                return true;
            }
        }
        if let Some(gitignore) = &self.gitignore {
            if path.starts_with(&self.base) {
                let is_dir = path.is_dir();
                if gitignore.matched_path_or_any_parents(path, is_dir).is_ignore() {
                    return true;
                }
            }
        }
        false
    }
}

fn expand_pattern(pattern: &str) -> Vec<String> {
    let trimmed = pattern.trim_start_matches("./").trim_end_matches('/');
    if pattern.contains(GLOB_CHARS) {
        vec![trimmed.to_string()]
    } else {
        vec![trimmed.to_string(), format!("{}/**", trimmed)]
    }
}

fn build_gitignore(base: &Path) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(base);
    for ancestor in base.ancestors() {
        let path = ancestor.join(".gitignore");
        if path.exists() {
            builder.add(path);
        }
        let exclude = ancestor.join(".git").join("info").join("exclude");
        if exclude.exists() {
            builder.add(exclude);
        }
    }
    Ok(builder.build()?)
}
