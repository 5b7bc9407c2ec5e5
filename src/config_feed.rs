// SPDX-License-Identifier: Apache-2.0

//! Delivery channel for input-configuration snapshots.
//!
//! Each snapshot is the complete set of inputs as opaque JSON maps. The
//! supervisor hashes every map structurally and diffs against the running
//! set, so whoever produces snapshots (the startup file load, a control
//! plane, a test) never needs to know what changed.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender, SendError};
use crate::tail::error::TailError;

pub const DEFAULT_FEED_CAPACITY: usize = 1;

pub struct ConfigFeed {
    rx: BoundedReceiver<Vec<Value>>,
}

#[derive(Clone)]
pub struct ConfigFeedHandle {
    tx: BoundedSender<Vec<Value>>,
}

pub fn config_channel(capacity: usize) -> (ConfigFeedHandle, ConfigFeed) {
    let (tx, rx) = bounded_channel::bounded(capacity);
    (ConfigFeedHandle { tx }, ConfigFeed { rx })
}

impl ConfigFeed {
    /// Next snapshot; None once every handle is gone.
    pub async fn recv(&mut self) -> Option<Vec<Value>> {
        self.rx.next().await
    }
}

impl ConfigFeedHandle {
    pub async fn push(&self, configs: Vec<Value>) -> Result<(), SendError> {
        self.tx.send(configs).await
    }

    pub fn push_blocking(&self, configs: Vec<Value>) -> Result<(), SendError> {
        self.tx.send_blocking(configs)
    }
}

#[derive(Debug, Deserialize)]
struct InputsFile {
    #[serde(default)]
    inputs: Vec<serde_yaml::Value>,
}

/// Load the initial snapshot from a YAML file of the form
/// `inputs: [ {...}, {...} ]`.
pub fn load_inputs_file(path: impl AsRef<Path>) -> Result<Vec<Value>, TailError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let file: InputsFile = serde_yaml::from_str(&contents)
        .map_err(|e| TailError::Config(format!("parsing inputs file failed: {}", e)))?;

    file.inputs
        .into_iter()
        .map(|input| {
            serde_json::to_value(input)
                .map_err(|e| TailError::Config(format!("invalid input config: {}", e)))
        })
        .collect()
}

/// Structural identity of an input config. serde_json object maps are
/// key-ordered, so the serialized form is canonical regardless of how the
/// map was written or produced.
pub fn config_hash(config: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.to_string().hash(&mut hasher);
    hasher.finish()
}
