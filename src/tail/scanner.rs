// SPDX-License-Identifier: Apache-2.0

//! Per-input scanner: walks the configured globs on every tick, diffs the
//! observations against the shared state store and starts or retires
//! workers accordingly.

use std::collections::HashSet;
use std::convert::Infallible;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sinks::Publisher;
use crate::tail::config::{InputConfig, ScanOrder, ScanSort, LOG_TYPE};
use crate::tail::error::TailError;
use crate::tail::executor::Executor;
use crate::tail::file_id::FileId;
use crate::tail::registry::RegistryHandle;
use crate::tail::state::{State, StateStore, TTL_EXPIRED, TTL_INFINITE};
use crate::tail::worker::Worker;

pub struct Scanner {
    config: Arc<InputConfig>,
    patterns: Vec<String>,
    states: Arc<StateStore>,
    executor: Executor,
    registry: RegistryHandle,
    publisher: Arc<dyn Publisher>,
    cancel: CancellationToken,
    first_scan: bool,
}

impl Scanner {
    pub fn new(
        config: InputConfig,
        states: Arc<StateStore>,
        registry: RegistryHandle,
        publisher: Arc<dyn Publisher>,
        cancel: CancellationToken,
    ) -> Result<Self, TailError> {
        config.validate()?;
        if config.input_type != LOG_TYPE {
            return Err(TailError::Config(format!(
                "no collector for input type: {}",
                config.input_type
            )));
        }

        let patterns = config.resolve_paths()?;
        debug!(?patterns, "file configs resolved");

        Ok(Self {
            config: Arc::new(config),
            patterns,
            states,
            executor: Executor::new(),
            registry,
            publisher,
            cancel,
            first_scan: true,
        })
    }

    /// Claim previously persisted states that belong to this input. Every
    /// claimed state gets a fresh infinite TTL; an unfinished one means
    /// another instance still owns the file and is a hard error.
    pub fn load_states(&self, loaded: Vec<State>) -> Result<(), TailError> {
        let mut claimed = 0;
        for mut state in loaded {
            if !self.matches_file(&state.source) {
                continue;
            }
            if !state.finished {
                return Err(TailError::Config(format!(
                    "can only start an input when all related states are finished: {}",
                    state.source
                )));
            }
            state.ttl = TTL_INFINITE;
            self.update_state(state);
            claimed += 1;
        }
        debug!(claimed, "input loaded with previous states");
        Ok(())
    }

    /// One discovery pass. Invoked by the runner at `scan.frequency`.
    pub async fn scan(&mut self) {
        debug!("start next scan");

        // tail.files is a first-scan-only latch: pretend everything
        // already on disk is too old, so new files get a synthetic state
        // at their current end.
        let ignore_older = if self.first_scan && self.config.tail.files {
            Duration::from_nanos(1)
        } else {
            self.config.ignore.older
        };
        self.first_scan = false;

        let files = self.sort_files(self.get_files());

        for (path, info) in files {
            if self.cancel.is_cancelled() {
                info!("scan aborted because input stopped");
                return;
            }

            let new_state = match self.file_state(&path, &info) {
                Ok(state) => state,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "skipping file");
                    continue;
                }
            };

            let prev = self.states.find_previous(&new_state);

            if is_older_than(&info, ignore_older) {
                self.handle_ignore_older(prev, new_state, &info);
                continue;
            }

            match prev {
                None => {
                    debug!(source = %new_state.source, "start worker for new file");
                    if let Err(e) = self.start_worker(new_state, 0) {
                        warn!(error = %e, "worker could not be started on new file");
                    }
                }
                Some(prev) => self.rescan(new_state, prev, &info),
            }
        }

        if !self.config.state.clean.inactive.is_zero() || self.config.state.clean.removed {
            let before = self.states.count();
            let cleaned = self.states.cleanup();
            debug!(before, after = before - cleaned, "input states cleaned up");
        }

        if self.config.state.clean.removed {
            self.clean_removed();
        }
    }

    /// Stop all workers and wait for them to drain their final state.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.executor.wait().await;
    }

    /// Shared store backing this input; tests and the supervisor peek here.
    pub fn states(&self) -> Arc<StateStore> {
        Arc::clone(&self.states)
    }

    fn get_files(&self) -> Vec<(PathBuf, Metadata)> {
        let mut files: Vec<(PathBuf, Metadata)> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for pattern in &self.patterns {
            let matches = match glob::glob(pattern) {
                Ok(matches) => matches,
                Err(e) => {
                    error!(pattern = %pattern, error = %e, "glob failed");
                    continue;
                }
            };

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        debug!(error = %e, "unreadable glob match");
                        continue;
                    }
                };

                if seen.contains(&path) {
                    continue;
                }
                if self.is_file_excluded(&path) {
                    debug!(path = %path.display(), "exclude file");
                    continue;
                }

                let link_info = match fs::symlink_metadata(&path) {
                    Ok(info) => info,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "lstat failed");
                        continue;
                    }
                };
                if link_info.is_dir() {
                    debug!(path = %path.display(), "skipping directory");
                    continue;
                }
                if link_info.file_type().is_symlink() && !self.config.symlinks {
                    debug!(path = %path.display(), "skipping symlink");
                    continue;
                }

                let info = match fs::metadata(&path) {
                    Ok(info) => info,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "stat failed");
                        continue;
                    }
                };
                if info.is_dir() {
                    continue;
                }

                // With symlinks enabled the same file can appear under two
                // names; keep the first.
                if self.config.symlinks {
                    let id = FileId::from_metadata(&info);
                    if files
                        .iter()
                        .any(|(_, existing)| FileId::from_metadata(existing) == id)
                    {
                        info!(path = %path.display(), "same file found as symlink and original, skipping");
                        continue;
                    }
                }

                seen.insert(path.clone());
                files.push((path, info));
            }
        }

        files
    }

    fn sort_files(&self, mut files: Vec<(PathBuf, Metadata)>) -> Vec<(PathBuf, Metadata)> {
        match self.config.scan.sort {
            ScanSort::None => {}
            ScanSort::Modtime => {
                files.sort_by_key(|(_, info)| {
                    info.modified().unwrap_or(SystemTime::UNIX_EPOCH)
                });
            }
            ScanSort::Filename => {
                files.sort_by(|(a, _), (b, _)| a.file_name().cmp(&b.file_name()));
            }
        }
        if self.config.scan.sort != ScanSort::None && self.config.scan.order == ScanOrder::Desc {
            files.reverse();
        }
        files
    }

    fn file_state(&self, path: &Path, info: &Metadata) -> Result<State, TailError> {
        let absolute = std::path::absolute(path)?;
        Ok(State::new(
            FileId::from_metadata(info),
            absolute.to_string_lossy().into_owned(),
            self.config.input_type.clone(),
        ))
    }

    fn rescan(&mut self, new_state: State, prev: State, info: &Metadata) {
        debug!(source = %new_state.source, offset = prev.offset, "update existing file for harvesting");

        if prev.finished && info.len() > prev.offset {
            debug!(
                source = %new_state.source,
                offset = prev.offset,
                size = info.len(),
                "resuming harvesting of file"
            );
            if let Err(e) = self.start_worker(new_state, prev.offset) {
                warn!(error = %e, "worker could not be started on existing file");
            }
            return;
        }

        if prev.finished && info.len() < prev.offset {
            debug!(
                source = %new_state.source,
                size = info.len(),
                "old file was truncated, starting from the beginning"
            );
            if let Err(e) = self.start_worker(new_state, 0) {
                warn!(error = %e, "worker could not be started on truncated file");
            }
            return;
        }

        if !prev.source.is_empty() && prev.source != new_state.source {
            debug!(
                old = %prev.source,
                new = %new_state.source,
                offset = prev.offset,
                "file rename was detected"
            );
            if prev.finished {
                let mut renamed = prev.clone();
                renamed.source = new_state.source.clone();
                self.update_state(renamed);
            } else {
                debug!("file rename detected but worker not finished yet");
            }
        }

        if !prev.finished {
            debug!(source = %new_state.source, "worker for file is still running");
        } else {
            debug!(source = %new_state.source, "file didn't change");
        }
    }

    fn handle_ignore_older(&mut self, prev: Option<State>, new_state: State, info: &Metadata) {
        debug!(source = %new_state.source, "ignore file because ignore.older reached");

        if let Some(prev) = prev {
            if !prev.finished {
                info!(
                    source = %new_state.source,
                    "file is falling under ignore.older before harvesting finished, adjust close.* settings"
                );
            }
            return;
        }

        if self.is_clean_inactive(info) {
            debug!("not writing state for ignore.older, clean.inactive already reached");
            return;
        }

        // Remember the file at its current end so future scans don't
        // re-read content that was deliberately skipped.
        let mut state = new_state;
        state.offset = info.len();
        state.finished = true;
        self.update_state(state);
    }

    fn clean_removed(&self) {
        for state in self.states.get_states() {
            match fs::metadata(&state.source) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(source = %state.source, "remove state, file removed");
                    self.remove_state(state);
                }
                Err(e) => {
                    error!(source = %state.source, error = %e, "state for file was not removed");
                }
                Ok(info) => {
                    if FileId::from_metadata(&info) != state.file_id {
                        debug!(source = %state.source, "remove state, file removed or renamed");
                        self.remove_state(state);
                    }
                }
            }
        }
    }

    fn remove_state(&self, mut state: State) {
        if !state.finished {
            debug!(source = %state.source, "state not removed, worker not finished");
            return;
        }
        state.ttl = TTL_EXPIRED;
        self.update_state(state);
    }

    fn start_worker(&mut self, mut state: State, offset: u64) -> Result<(), TailError> {
        if self.config.scanner.limit > 0
            && self.executor.len() as u64 >= self.config.scanner.limit
        {
            return Err(TailError::ScannerLimit);
        }

        state.finished = false;
        state.offset = offset;
        if !self.config.state.clean.inactive.is_zero() {
            state.ttl = self.config.state.clean.inactive.as_nanos() as i64;
        }

        let cancel = self.cancel.child_token();
        let (done_tx, done_rx) = flume::bounded::<Infallible>(0);

        let mut worker = Worker::new(
            Arc::clone(&self.config),
            state,
            Arc::clone(&self.states),
            self.registry.clone(),
            Arc::clone(&self.publisher),
            cancel.clone(),
        );
        worker
            .setup(done_rx)
            .map_err(|e| TailError::Setup(format!("error setting up worker: {}", e)))?;

        // Watchdog: bridges cancellation into the worker's done channel and
        // enforces close.timeout when configured.
        let close_timeout = self.config.close.timeout;
        tokio::spawn(async move {
            if close_timeout.is_zero() {
                cancel.cancelled().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(close_timeout) => {
                        info!("closing worker because close.timeout was reached");
                        cancel.cancel();
                    }
                }
            }
            drop(done_tx);
        });

        worker.send_state_update();
        self.executor.spawn(move || worker.run());
        Ok(())
    }

    fn update_state(&self, mut state: State) {
        if !self.config.state.clean.inactive.is_zero() && state.ttl != TTL_EXPIRED {
            state.ttl = self.config.state.clean.inactive.as_nanos() as i64;
        }
        self.states.update(state.clone());
        self.registry.update(vec![state]);
    }

    fn matches_file(&self, source: &str) -> bool {
        let path = Path::new(source);
        if self.is_file_excluded(path) {
            return false;
        }
        self.patterns.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches_path(path))
                .unwrap_or(false)
        })
    }

    fn is_file_excluded(&self, path: &Path) -> bool {
        !self.config.exclude.files.is_empty()
            && self
                .config
                .exclude
                .files
                .matches_any(&path.to_string_lossy())
    }

    fn is_clean_inactive(&self, info: &Metadata) -> bool {
        is_older_than(info, self.config.state.clean.inactive)
    }
}

fn is_older_than(info: &Metadata, age: Duration) -> bool {
    if age.is_zero() {
        return false;
    }
    match info.modified().and_then(|m| {
        m.elapsed()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }) {
        Ok(elapsed) => elapsed > age,
        Err(_) => false,
    }
}
