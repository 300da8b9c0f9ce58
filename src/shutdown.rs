//! Signal handling and shutdown.

use tokio::sync::mpsc;

use crate::adhoc::{self, AdHocCommandTracker};
use crate::events::{Event, ShutdownSignal};
use crate::output::{report, Tone};
use crate::registry::SupervisorRegistry;

/// Forwards the first interrupt or termination signal to the main loop.
pub fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(Event::Shutdown { signal: ShutdownSignal::Interrupt }).await;
                }
                _ = sigterm.recv() => {
                    let _ = tx.send(Event::Shutdown { signal: ShutdownSignal::Terminate }).await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx
                .send(Event::Shutdown {
                    signal: ShutdownSignal::Interrupt,
                })
                .await;
        }
    });
}

/// Full shutdown: stops every supervisor with escalation, then force-kills
/// every tracked ad-hoc command. The caller exits afterwards.
pub async fn shutdown(registry: &SupervisorRegistry, tracker: &mut AdHocCommandTracker) {
    report(Tone::Notice, "Shutting down...");
    registry.stop_all().await;
    for (key, handle) in tracker.drain() {
        tracing::debug!(key = %key, pid = handle.pid, "force-killing tracked command");
        adhoc::force_kill(&key, &handle).await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::FileConfig;
    use crate::process::fake::{FakeLauncher, Script};
    use crate::process::SupervisorState;

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_supervisors_and_empties_tracker() {
        let launcher = FakeLauncher::new(Script::obedient());
        let mut registry = SupervisorRegistry::new(false);
        let config = FileConfig {
            cmd: Some("node".into()),
            ..FileConfig::default()
        }
        .finish(Path::new("/srv"))
        .unwrap();
        let handle = registry.add_supervisor(config, Arc::new(launcher.clone()));
        handle.request_restart();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.status().state, SupervisorState::Running);

        let mut tracker = AdHocCommandTracker::new();
        shutdown(&registry, &mut tracker).await;
        assert_eq!(handle.status().state, SupervisorState::Idle);
        assert!(tracker.is_empty());
        assert_eq!(launcher.launches().len(), 1);
    }
}
