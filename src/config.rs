//! Configuration management for suglite.
//!
//! Configuration files are JSON or JSON5. A `FileConfig` is one partial layer;
//! layers are merged (defaults, global file, local file, CLI flags, `--set`
//! overrides) and then finished into an immutable `SupervisedProcessConfig`.
//! Multi-instance manifests resolve each entry to its own finished config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Local configuration file names, in lookup order.
pub const LOCAL_CONFIG_FILES: [&str; 2] = ["suglite.json5", "suglite.json"];
/// Manifest listing the instances of multi-instance mode.
pub const MULTI_MANIFEST: &str = "suglite.multi.json5";
/// Configuration file looked up inside a directory manifest entry.
pub const INSTANCE_CONFIG: &str = "suglite.json5";
/// Interactive command history, relative to the launch directory.
pub const HISTORY_FILE: &str = ".suglite_history";

const DEFAULT_HISTORY: usize = 100;
const DEFAULT_SERVER_CMD: &str = "npx --yes serve -l {port}";
const GLOBAL_CONFIG_FILES: [&str; 2] = ["config.json5", "config.json"];

/// One partial configuration layer, as written in a file or given on the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Command to supervise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Arguments appended to `cmd`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Paths or globs whose changes trigger a restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<Vec<String>>,
    /// Paths or globs excluded from watching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    /// Command run before every restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_cmd: Option<String>,
    /// Named shortcuts: trigger text to shell command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<BTreeMap<String, String>>,
    /// Number of history entries kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<usize>,
    /// Extra restart delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Extra commands that run without the `$` prefix.
    #[serde(alias = "trustedShells", skip_serializing_if = "Option::is_none")]
    pub trusted_shells: Option<Vec<String>>,
    /// Lines routed once after the first start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_cmd: Option<Vec<String>>,
    /// Port served by the `server` pseudo-command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<u16>,
    /// Template for the `server` pseudo-command; `{port}` is substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_cmd: Option<String>,
    /// Skip changes to paths ignored by `.gitignore`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gitignore: Option<bool>,
    /// Working directory, relative to the directory the config applies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl FileConfig {
    /// Template written by `suglite init`.
    pub fn template() -> Self {
        Self {
            cmd: Some(String::new()),
            args: Some(Vec::new()),
            watch: Some(Vec::new()),
            ignore: Some(Vec::new()),
            restart_cmd: Some(String::new()),
            events: Some(BTreeMap::new()),
            history: Some(DEFAULT_HISTORY),
            delay: Some(0),
            ..Self::default()
        }
    }

    /// Reads a JSON or JSON5 layer from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        json5::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Overlays `other` on top of `self`. Maps merge key-wise; everything else
    /// is replaced when `other` sets it.
    pub fn merge(mut self, other: FileConfig) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            cmd,
            args,
            watch,
            ignore,
            restart_cmd,
            history,
            delay,
            trusted_shells,
            startup_cmd,
            server,
            server_cmd,
            gitignore,
            cwd
        );
        if let Some(events) = other.events {
            self.events.get_or_insert_with(BTreeMap::new).extend(events);
        }
        self
    }

    /// Applies a `KEY=VALUE` override.
    pub fn apply_override(self, assignment: &str) -> Result<Self> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid override {}, expected KEY=VALUE", assignment))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid override {}, empty key", assignment);
        }
        let mut value = serde_json::to_value(&self)?;
        if let Some(map) = value.as_object_mut() {
            map.insert(key.to_string(), parse_value(raw.trim()));
        }
        serde_json::from_value(value).with_context(|| format!("invalid value for {}", key))
    }

    /// Finishes the layer into a supervisor configuration rooted at `base`.
    pub fn finish(self, base: &Path) -> Result<SupervisedProcessConfig> {
        let cmd = self
            .cmd
            .filter(|cmd| !cmd.trim().is_empty())
            .ok_or_else(|| anyhow!("no `cmd` found in config or package.json"))?;
        let cwd = match self.cwd {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => base.join(dir),
            None => base.to_path_buf(),
        };
        Ok(SupervisedProcessConfig {
            cmd,
            args: self.args.unwrap_or_default(),
            watch_paths: self.watch.unwrap_or_default(),
            ignore_paths: self.ignore.unwrap_or_default(),
            restart_cmd: self.restart_cmd.filter(|cmd| !cmd.trim().is_empty()),
            delay_ms: self.delay.unwrap_or(0),
            cwd,
            events: self.events.unwrap_or_default(),
            trusted_shells: self.trusted_shells.unwrap_or_default(),
            history_size: self.history.unwrap_or(DEFAULT_HISTORY),
            startup_cmd: self.startup_cmd.unwrap_or_default(),
            server_port: self.server.filter(|port| *port > 0),
            server_cmd: self
                .server_cmd
                .unwrap_or_else(|| DEFAULT_SERVER_CMD.to_string()),
            watch_gitignore: self.gitignore.unwrap_or(false),
        })
    }
}

/// Immutable configuration of one supervised instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisedProcessConfig {
    pub cmd: String,
    pub args: Vec<String>,
    pub watch_paths: Vec<String>,
    pub ignore_paths: Vec<String>,
    pub restart_cmd: Option<String>,
    pub delay_ms: u64,
    pub cwd: PathBuf,
    pub events: BTreeMap<String, String>,
    pub trusted_shells: Vec<String>,
    pub history_size: usize,
    pub startup_cmd: Vec<String>,
    pub server_port: Option<u16>,
    pub server_cmd: String,
    pub watch_gitignore: bool,
}

impl SupervisedProcessConfig {
    /// The full shell command line: `cmd` followed by the quoted `args`.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.cmd.clone()
        } else {
            format!("{} {}", self.cmd, shell_words::join(&self.args))
        }
    }

    /// The `server` pseudo-command's shell command for `port`.
    pub fn server_command(&self, port: u16) -> String {
        self.server_cmd.replace("{port}", &port.to_string())
    }
}

/// Inputs for loading the primary configuration.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Launch directory.
    pub cwd: PathBuf,
    /// Explicit local config file.
    pub file: Option<PathBuf>,
    /// Global config directory; `None` skips the global layer.
    pub global_dir: Option<PathBuf>,
    /// Layer built from CLI flags.
    pub overrides: FileConfig,
    /// `KEY=VALUE` assignments.
    pub sets: Vec<String>,
    /// Arguments given after `--`.
    pub extra_args: Vec<String>,
}

/// The primary configuration plus the files it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SupervisedProcessConfig,
    pub global: Option<PathBuf>,
    pub local: Option<PathBuf>,
}

/// Loads the primary instance's configuration from all layers.
pub fn load_primary(options: &LoadOptions) -> Result<LoadedConfig> {
    let mut layer = FileConfig::default();

    let global = options.global_dir.as_deref().and_then(find_global_config);
    if let Some(path) = &global {
        layer = layer.merge(FileConfig::from_path(path)?);
    }

    let local = match &options.file {
        Some(file) => {
            let path = options.cwd.join(file);
            if !path.exists() {
                bail!("config file {} not found", path.display());
            }
            Some(path)
        }
        None => LOCAL_CONFIG_FILES
            .iter()
            .map(|name| options.cwd.join(name))
            .find(|path| path.exists()),
    };
    if let Some(path) = &local {
        layer = layer.merge(FileConfig::from_path(path)?);
    }

    layer = layer.merge(options.overrides.clone());
    for assignment in &options.sets {
        layer = layer.apply_override(assignment)?;
    }
    if !options.extra_args.is_empty() {
        layer
            .args
            .get_or_insert_with(Vec::new)
            .extend(options.extra_args.iter().cloned());
    }
    if layer.cmd.as_deref().map_or(true, |cmd| cmd.trim().is_empty()) {
        if let Some(main) = package_main(&options.cwd) {
            layer.cmd = Some("node".to_string());
            layer.args = Some(vec![main]);
        }
    }

    let config = layer.finish(&options.cwd)?;
    Ok(LoadedConfig {
        config,
        global,
        local,
    })
}

/// Directory holding the global configuration.
pub fn global_config_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        return std::env::var("APPDATA")
            .ok()
            .map(|dir| PathBuf::from(dir).join("suglite"));
    }
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(dir).join("suglite"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config").join("suglite"))
}

fn find_global_config(dir: &Path) -> Option<PathBuf> {
    GLOBAL_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Writes the template configuration to `path`, refusing to overwrite.
pub fn write_template(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("configuration already exists at {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(&FileConfig::template())?;
    std::fs::write(path, body + "\n")
        .with_context(|| format!("failed to write {}", path.display()))
}

fn package_main(dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value.get("main")?.as_str().map(str::to_string)
}

/// Interprets a CLI override value: JSON for objects and arrays, then numbers,
/// then booleans, else a plain string.
pub fn parse_value(raw: &str) -> serde_json::Value {
    let looks_structured = (raw.starts_with('{') && raw.ends_with('}'))
        || (raw.starts_with('[') && raw.ends_with(']'));
    if looks_structured {
        if let Ok(value) = json5::from_str::<serde_json::Value>(raw) {
            return value;
        }
    }
    if let Ok(number) = raw.parse::<u64>() {
        return number.into();
    }
    if let Ok(number) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(number) {
            return serde_json::Value::Number(number);
        }
    }
    match raw {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        _ => serde_json::Value::String(raw.to_string()),
    }
}

/// One entry of the multi-instance manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    /// Path to a config file, or to a directory when it ends with a separator.
    Path(String),
    /// Configuration written inline.
    Inline(FileConfig),
}

/// Resolves a manifest entry to its configuration layer and working directory.
pub fn resolve_entry(entry: ManifestEntry, base: &Path) -> Result<(FileConfig, PathBuf)> {
    match entry {
        ManifestEntry::Inline(layer) => Ok((layer, base.to_path_buf())),
        ManifestEntry::Path(raw) => {
            let (file, cwd) = if raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR) {
                let dir = base.join(&raw);
                (dir.join(INSTANCE_CONFIG), dir)
            } else {
                let file = base.join(&raw);
                let dir = file
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| base.to_path_buf());
                (file, dir)
            };
            if !file.exists() {
                bail!("File {} not found", file.display());
            }
            Ok((FileConfig::from_path(&file)?, cwd))
        }
    }
}

/// Loads the multi-instance manifest and finishes every entry.
pub fn load_manifest(path: &Path, base: &Path) -> Result<Vec<SupervisedProcessConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let entries: Vec<ManifestEntry> = json5::from_str(&raw)
        .with_context(|| format!("failed to parse manifest {}", path.display()))?;
    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            let (layer, cwd) = resolve_entry(entry, base)?;
            layer
                .finish(&cwd)
                .with_context(|| format!("manifest entry {} is incomplete", position + 1))
        })
        .collect()
}
