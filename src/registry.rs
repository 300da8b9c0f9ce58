//! Ordered registry of supervised instances.

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::SupervisedProcessConfig;
use crate::process::Launcher;
use crate::runner::{spawn_supervisor, SupervisorHandle};
use crate::watch::spawn_watcher;

/// One instance: its configuration and the handle of its supervisor.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub index: usize,
    pub config: Arc<SupervisedProcessConfig>,
    pub handle: SupervisorHandle,
}

/// Append-only list of instances. Index 0 is the primary instance; indices are
/// dense and never reused.
#[derive(Debug, Default)]
pub struct SupervisorRegistry {
    entries: Vec<RegistryEntry>,
    multi: bool,
}

impl SupervisorRegistry {
    pub fn new(multi: bool) -> Self {
        Self {
            entries: Vec::new(),
            multi,
        }
    }

    /// Tag shown on lines reported for instance `index`.
    pub fn tag(&self, index: usize) -> Option<usize> {
        self.multi.then_some(index)
    }

    /// Starts a supervisor and its file watcher for `config` under the next
    /// free index.
    pub fn add_process<L: Launcher>(
        &mut self,
        config: SupervisedProcessConfig,
        launcher: Arc<L>,
    ) -> SupervisorHandle {
        let handle = self.add_supervisor(config, launcher);
        if let Some(entry) = self.entries.last() {
            spawn_watcher(entry.handle.clone(), entry.config.clone());
        }
        handle
    }

    /// Starts a supervisor without a file watcher.
    pub fn add_supervisor<L: Launcher>(
        &mut self,
        config: SupervisedProcessConfig,
        launcher: Arc<L>,
    ) -> SupervisorHandle {
        let index = self.entries.len();
        let config = Arc::new(config);
        let handle = spawn_supervisor(index, self.tag(index), config.clone(), launcher);
        tracing::debug!(index, cmd = %config.command_line(), "instance registered");
        self.entries.push(RegistryEntry {
            index,
            config,
            handle: handle.clone(),
        });
        handle
    }

    pub fn get(&self, index: usize) -> Option<&RegistryEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    /// Stops every supervisor concurrently and waits for all escalations to
    /// finish.
    pub async fn stop_all(&self) {
        let mut stops = JoinSet::new();
        for entry in &self.entries {
            let handle = entry.handle.clone();
            stops.spawn(async move { handle.stop().await });
        }
        while let Some(result) = stops.join_next().await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "supervisor stop task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::config::FileConfig;
    use crate::process::fake::{FakeLauncher, Script};
    use crate::process::SupervisorState;

    fn config(cmd: &str, dir: &str) -> SupervisedProcessConfig {
        FileConfig {
            cmd: Some(cmd.into()),
            ..FileConfig::default()
        }
        .finish(Path::new(dir))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn indices_are_dense_and_ordered() {
        let launcher = Arc::new(FakeLauncher::new(Script::obedient()));
        let mut registry = SupervisorRegistry::new(true);
        for dir in ["/a", "/b", "/c"] {
            registry.add_supervisor(config("run", dir), launcher.clone());
        }
        let indices: Vec<usize> = registry.iter().map(|entry| entry.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(registry.get(1).unwrap().config.cwd, Path::new("/b"));
        assert_eq!(registry.get(2).unwrap().handle.index(), 2);
        assert!(registry.get(3).is_none());
    }

    #[test]
    fn tags_only_in_multi_mode() {
        assert_eq!(SupervisorRegistry::new(false).tag(0), None);
        assert_eq!(SupervisorRegistry::new(true).tag(3), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_stops_every_running_instance() {
        let launcher = FakeLauncher::new(Script::obedient());
        let shared = Arc::new(launcher.clone());
        let mut registry = SupervisorRegistry::new(true);
        registry.add_supervisor(config("api", "/a"), shared.clone());
        registry.add_supervisor(config("web", "/b"), shared);
        for entry in registry.iter() {
            entry.handle.request_restart();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(launcher.launches().len(), 2);

        registry.stop_all().await;
        for entry in registry.iter() {
            let status = entry.handle.status();
            assert_eq!(status.state, SupervisorState::Idle);
        }
    }
}
