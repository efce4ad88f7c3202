//! Loading a directory of scripted avatars and driving them frame by frame.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use marionette_exchange::{CallbackItem, StandardEvents};
use marionette_runtime::AvatarRegistry;
use marionette_script::{ScriptHost, ScriptedAvatar};
use marionette_types::AvatarError;
use tokio::runtime::Handle;
use tokio::time;

use crate::summary::{AvatarSummary, RunSummary};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct Driver {
    registry: AvatarRegistry<String, ScriptedAvatar>,
    host: ScriptHost,
    events: StandardEvents,
}

impl Driver {
    pub fn new(runtime: Handle, host: ScriptHost, events: StandardEvents) -> Self {
        let registry = AvatarRegistry::new(runtime, Arc::clone(host.reporter()));
        Self {
            registry,
            host,
            events,
        }
    }

    /// Start creating one avatar per `*.rhai` file in `dir`, keyed by stem.
    ///
    /// Returns how many creations were launched. Unreadable files are
    /// logged and skipped.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read avatar directory {}", dir.display()))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "rhai"))
            .collect();
        paths.sort();

        let mut launched = 0;
        for path in paths {
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                tracing::warn!(path = %path.display(), "Skipping avatar with non-UTF-8 name");
                continue;
            };
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Skipping unreadable avatar");
                    continue;
                }
            };
            self.load(name.to_string(), source);
            launched += 1;
        }
        Ok(launched)
    }

    /// Start creating the avatar `name` from `source`.
    pub fn load(&self, name: String, source: String) {
        tracing::info!(avatar = %name, "Loading avatar");
        let host = self.host.clone();
        let key = name.clone();
        self.registry
            .load(key, move || ScriptedAvatar::create(name, &source, &host));
    }

    /// Poll until nothing is in progress, or give up after `timeout` and
    /// abandon whatever is still being created.
    pub async fn settle(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            self.registry.poll();
            if self.registry.in_progress_len() == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    pending = self.registry.in_progress_len(),
                    "Avatar creation did not settle in time"
                );
                self.registry.cancel_all_in_progress();
                break;
            }
            time::sleep(POLL_INTERVAL).await;
        }
        self.registry.loaded_len()
    }

    /// One frame: tick, then render, delivering the matching events and any
    /// invocations queued by other avatars.
    pub fn frame(&self, delta: f32) {
        let events = self.events;
        self.registry.for_each(|name, avatar| {
            let handle = avatar.handle();
            let caller = handle.as_ref();

            avatar.tick()?;
            avatar
                .deliver(caller, events.client_tick, &[])
                .map_err(AvatarError::from)?;

            avatar.render(delta)?;
            avatar
                .deliver(caller, events.client_render, &[CallbackItem::F32(delta)])
                .map_err(AvatarError::from)?;

            let drained = avatar.drain_queued(caller);
            if drained > 0 {
                tracing::trace!(avatar = %name, drained, "Delivered queued invocations");
            }
            Ok(())
        });
    }

    /// Drive `frames` frames, timing each one for the render delta.
    pub fn run(&self, frames: u64) {
        let mut last = Instant::now();
        for _ in 0..frames {
            let now = Instant::now();
            let delta = now.duration_since(last).as_secs_f32();
            last = now;
            self.frame(delta);
        }
    }

    #[must_use]
    pub fn summary(&self, ticks: u64) -> RunSummary {
        let categories = self.host.watchdog().categories();
        let mut avatars = Vec::new();
        self.registry.for_each(|name, avatar| {
            let error = avatar.failure().map(ToString::to_string);
            let mut summary = AvatarSummary::new(name.clone(), error);
            for (id, _) in categories.iter() {
                if let Some(average) = avatar.profiling().running_average(id) {
                    summary.record(categories.full_name(id), average);
                }
            }
            avatars.push(summary);
            Ok(())
        });
        RunSummary::new(ticks, avatars)
    }

    /// Destroy every avatar.
    pub fn shutdown(&self) {
        self.registry.clear();
    }
}
