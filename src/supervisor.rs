// SPDX-License-Identifier: Apache-2.0

//! Owns the set of running inputs and reconciles it against config
//! snapshots: inputs are keyed by a structural hash of their raw config, so
//! an edited input is simply an old runner stopped and a new one started.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config_feed::{config_hash, ConfigFeed};
use crate::sinks::Sink;
use crate::tail::config::InputConfig;
use crate::tail::error::TailError;
use crate::tail::registry::RegistryHandle;
use crate::tail::scanner::Scanner;
use crate::tail::state::StateStore;

pub struct Supervisor {
    runners: HashMap<u64, Runner>,
    registry: RegistryHandle,
    registry_states: Arc<StateStore>,
    sink: Arc<dyn Sink>,
}

impl Supervisor {
    pub fn new(
        registry: RegistryHandle,
        registry_states: Arc<StateStore>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            runners: HashMap::new(),
            registry,
            registry_states,
            sink,
        }
    }

    /// Consume config snapshots until cancelled, then stop everything.
    pub async fn run(mut self, mut feed: ConfigFeed, cancel: CancellationToken) {
        loop {
            select! {
                _ = cancel.cancelled() => break,
                snapshot = feed.recv() => {
                    match snapshot {
                        Some(configs) => self.apply(configs).await,
                        None => break, // feed closed
                    }
                }
            }
        }
        self.stop_all().await;
    }

    /// Reconcile the running set against one snapshot.
    pub async fn apply(&mut self, configs: Vec<Value>) {
        let mut incoming: Vec<(u64, Value)> = Vec::new();
        for raw in configs {
            let enabled = raw
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if !enabled {
                continue;
            }
            incoming.push((config_hash(&raw), raw));
        }

        let incoming_ids: HashSet<u64> = incoming.iter().map(|(id, _)| *id).collect();
        let stop_ids: Vec<u64> = self
            .runners
            .keys()
            .filter(|id| !incoming_ids.contains(id))
            .copied()
            .collect();

        let start_list: Vec<(u64, Value)> = incoming
            .into_iter()
            .filter(|(id, _)| !self.runners.contains_key(id))
            .collect();

        if !start_list.is_empty() {
            info!(count = start_list.len(), "starting runners");
        }
        for (id, raw) in start_list {
            match Runner::start(
                id,
                &raw,
                self.registry.clone(),
                Arc::clone(&self.registry_states),
                Arc::clone(&self.sink),
            ) {
                Ok(runner) => {
                    debug!(id, "new runner started");
                    self.runners.insert(id, runner);
                }
                Err(e) => error!(id, error = %e, "unable to create runner"),
            }
        }

        if !stop_ids.is_empty() {
            info!(count = stop_ids.len(), "stopping runners");
            let stopping: Vec<Runner> = stop_ids
                .iter()
                .filter_map(|id| self.runners.remove(id))
                .collect();
            futures::future::join_all(stopping.into_iter().map(Runner::stop)).await;
        }
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    async fn stop_all(&mut self) {
        let stopping: Vec<Runner> = self.runners.drain().map(|(_, runner)| runner).collect();
        if stopping.is_empty() {
            return;
        }
        info!(count = stopping.len(), "stopping all runners");
        futures::future::join_all(stopping.into_iter().map(Runner::stop)).await;
    }
}

/// One started input: a scan loop plus the cancellation that tears it down.
/// The supervisor only ever calls `start` and `stop`, keeping it agnostic
/// of what the input actually does.
struct Runner {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Runner {
    fn start(
        id: u64,
        raw: &Value,
        registry: RegistryHandle,
        registry_states: Arc<StateStore>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, TailError> {
        let config: InputConfig = serde_json::from_value(raw.clone())
            .map_err(|e| TailError::Config(format!("unpacking input config failed: {}", e)))?;
        config.validate()?;

        info!(id, input_type = %config.input_type, "starting runner");

        let frequency = config.scan.frequency;
        let publisher = sink.group(&config.name);
        let cancel = CancellationToken::new();

        let scanner = Scanner::new(
            config,
            Arc::new(StateStore::new()),
            registry,
            publisher,
            cancel.clone(),
        )?;
        scanner.load_states(registry_states.get_states())?;

        let handle = tokio::spawn(scan_loop(scanner, frequency, cancel.clone()));

        Ok(Self { id, cancel, handle })
    }

    async fn stop(self) {
        info!(id = self.id, "stopping runner");
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(id = self.id, error = %e, "runner task failed");
        }
    }
}

async fn scan_loop(mut scanner: Scanner, frequency: Duration, cancel: CancellationToken) {
    scanner.scan().await;

    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(frequency) => {
                debug!("run scan tick");
                scanner.scan().await;
            }
        }
    }

    scanner.stop().await;
}
