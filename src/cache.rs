//! Read-optimized copy of a proxy's effective values.
//!
//! Views that redraw often read `current()` instead of resolving every field
//! each frame. The snapshot may lag behind live settings by one interval.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::effective::{lock, EffectiveSettings, ResolvedSettings};

pub struct SettingsCache {
    settings: EffectiveSettings,
    snapshot: Arc<Mutex<ResolvedSettings>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SettingsCache {
    /// Snapshot now, then refresh every `interval` until `token` is cancelled
    /// or the cache is dropped. Must be called inside a tokio runtime.
    pub fn spawn(settings: EffectiveSettings, interval: Duration, token: CancellationToken) -> Self {
        let snapshot = Arc::new(Mutex::new(settings.resolve()));

        let task = {
            let settings = settings.clone();
            let snapshot = snapshot.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let resolved = settings.resolve();
                            *lock(&snapshot) = resolved;
                        }
                    }
                }
                debug_eprintln!("[cache] refresher stopped");
            })
        };

        SettingsCache {
            settings,
            snapshot,
            token,
            task: Some(task),
        }
    }

    /// `spawn` with the refresh interval from `[cache]` in the config.
    pub fn from_config(settings: EffectiveSettings, config: &Config, token: CancellationToken) -> Self {
        Self::spawn(settings, config.cache_refresh_interval(), token)
    }

    pub fn current(&self) -> ResolvedSettings {
        lock(&self.snapshot).clone()
    }

    pub fn refresh_now(&self) -> ResolvedSettings {
        let resolved = self.settings.resolve();
        *lock(&self.snapshot) = resolved.clone();
        resolved
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SettingsCache {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
