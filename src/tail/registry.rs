// SPDX-License-Identifier: Apache-2.0

//! Durable mirror of the in-memory states.
//!
//! A single task owns the registry file. Workers and scanners push
//! `Vec<State>` batches into an unbounded channel; the task folds them into
//! its own store and snapshots to disk, either after every batch
//! (`flush_timeout == 0`) or at most once per flush window.
//!
//! The snapshot protocol is write-temp-then-rename: serialize everything to
//! `<path>.new`, fsync, rename over the live file, fsync the directory. At
//! any kill point the on-disk file is either the old snapshot or the new
//! one, never a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::tail::error::{Result, TailError};
use crate::tail::state::{State, StateStore, TTL_UNCLAIMED};

/// Hook invoked after a successful flush with the number of state updates
/// durably recorded since the previous one.
pub trait PublishedHook: Send {
    fn published(&self, n: usize) -> bool;
}

/// Cheap handle for pushing state updates to the registry task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: flume::Sender<Vec<State>>,
}

impl RegistryHandle {
    /// Queue a batch of state updates. Errors are deliberately swallowed:
    /// during shutdown the registry task may already be gone, and the final
    /// snapshot was taken on its way out.
    pub fn update(&self, states: Vec<State>) {
        if self.tx.send(states).is_err() {
            debug!("registry channel closed, dropping state update");
        }
    }
}

impl RegistryHandle {
    /// Handle wired to nothing; every update is dropped. Unit tests that
    /// exercise workers without a registry task use this.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = flume::unbounded();
        Self { tx }
    }
}

pub struct Registry {
    path: PathBuf,
    flush_timeout: Duration,
    states: Arc<StateStore>,
    rx: flume::Receiver<Vec<State>>,
    hook: Option<Box<dyn PublishedHook>>,
    buffered_updates: usize,
}

impl Registry {
    /// Open (or create) the registry file and hand back the update channel.
    pub fn new(
        path: impl Into<PathBuf>,
        flush_timeout: Duration,
        hook: Option<Box<dyn PublishedHook>>,
    ) -> Result<(Self, RegistryHandle)> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (tx, rx) = flume::unbounded();
        let registry = Self {
            path,
            flush_timeout,
            states: Arc::new(StateStore::new()),
            rx,
            hook,
            buffered_updates: 0,
        };
        registry.init()?;

        Ok((registry, RegistryHandle { tx }))
    }

    fn init(&self) -> Result<()> {
        match fs::symlink_metadata(&self.path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no registry file found, creating a new one");
                self.write_snapshot()
            }
            Err(e) => Err(e.into()),
            Ok(meta) if !meta.is_file() => Err(TailError::Registry(format!(
                "registry path must be a regular file: {}",
                self.path.display()
            ))),
            Ok(_) => {
                info!(path = %self.path.display(), "registry file set");
                Ok(())
            }
        }
    }

    /// Decode the snapshot into the store. Loaded states are marked finished
    /// (no worker owns them yet) and get the unclaimed TTL so entries no
    /// input claims will age out once TTL policy applies.
    pub fn load(&self) -> Result<usize> {
        let file = File::open(&self.path)?;
        let mut states: Vec<State> = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| TailError::Registry(format!("error decoding states: {}", e)))?;

        for state in &mut states {
            state.finished = true;
            state.ttl = TTL_UNCLAIMED;
        }

        let count = states.len();
        self.states.set_states(states);
        info!(count, "states loaded from registry");
        Ok(count)
    }

    /// Shared view of the registry's state set; scanners claim their files
    /// from this at startup.
    pub fn states(&self) -> Arc<StateStore> {
        Arc::clone(&self.states)
    }

    /// Consume update batches until cancelled, snapshotting per the flush
    /// policy, then take a final snapshot on the way out.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("starting registry");
        let rx = self.rx.clone();

        // Far-future deadline stands in for "timer not armed".
        let mut flush_deadline = Instant::now();
        let mut armed = false;

        loop {
            select! {
                _ = cancel.cancelled() => {
                    info!("ending registry");
                    break;
                }
                _ = tokio::time::sleep_until(flush_deadline), if armed => {
                    armed = false;
                    self.flush();
                }
                batch = rx.recv_async() => {
                    match batch {
                        Ok(states) => {
                            self.on_updates(states);
                            if self.flush_timeout.is_zero() {
                                self.flush();
                            } else if !armed {
                                flush_deadline = Instant::now() + self.flush_timeout;
                                armed = true;
                            }
                        }
                        Err(_) => break, // all senders gone
                    }
                }
            }
        }

        // Drain anything still queued so the final snapshot is complete.
        while let Ok(states) = rx.try_recv() {
            self.on_updates(states);
        }
        self.flush();
    }

    fn on_updates(&mut self, states: Vec<State>) {
        debug!(count = states.len(), "processing state updates");
        self.buffered_updates += states.len();

        for state in states {
            self.states.update(state);
        }

        let before = self.states.count();
        let cleaned = self.states.cleanup();
        debug!(before, after = before - cleaned, "registry states cleaned up");
    }

    fn flush(&mut self) {
        if let Err(e) = self.write_snapshot() {
            error!(error = %e, "writing of registry returned error, continuing");
        }

        if let Some(hook) = &self.hook {
            hook.published(self.buffered_updates);
        }
        self.buffered_updates = 0;
    }

    fn write_snapshot(&self) -> Result<()> {
        debug!(path = %self.path.display(), "write registry file");

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".new");
        let tmp = PathBuf::from(tmp);

        let states = self.states.get_states();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &states)?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| TailError::Registry(format!("flushing snapshot failed: {}", e)))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;

        // Persist the rename itself.
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                File::open(dir)?.sync_all()?;
            }
        }

        debug!(count = states.len(), "registry file updated");
        Ok(())
    }
}
