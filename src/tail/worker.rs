// SPDX-License-Identifier: Apache-2.0

//! Per-file worker: owns one open file and its reader stack for the whole
//! read lifetime, emits events and advances the shared state.
//!
//! The loop is strictly publish-then-advance: a state update is only
//! recorded after the sink accepted the event, so a restart resumes from
//! the last offset whose events were actually handed downstream.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::Event;
use crate::sinks::Publisher;
use crate::tail::config::InputConfig;
use crate::tail::error::{ReadError, TailError};
use crate::tail::file_id::FileId;
use crate::tail::log_file::{DoneSignal, LogFile};
use crate::tail::reader::{self, Reader};
use crate::tail::registry::RegistryHandle;
use crate::tail::state::{State, StateStore};

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

pub struct Worker {
    config: Arc<InputConfig>,
    state: State,
    states: Arc<StateStore>,
    registry: RegistryHandle,
    publisher: Arc<dyn Publisher>,
    cancel: CancellationToken,
    reader: Option<Box<dyn Reader>>,
}

impl Worker {
    pub fn new(
        config: Arc<InputConfig>,
        state: State,
        states: Arc<StateStore>,
        registry: RegistryHandle,
        publisher: Arc<dyn Publisher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            states,
            registry,
            publisher,
            cancel,
            reader: None,
        }
    }

    /// Open and validate the file, seek to the stored offset and build the
    /// reader stack. A failure here is retryable: the scanner will see the
    /// file again on its next walk.
    pub fn setup(&mut self, done: DoneSignal) -> Result<(), TailError> {
        let path = PathBuf::from(&self.state.source);
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|e| TailError::Setup(format!("failed opening {}: {}", path.display(), e)))?;

        let info = file.metadata().map_err(|e| {
            TailError::Setup(format!("failed getting stats for {}: {}", path.display(), e))
        })?;
        if !info.is_file() {
            return Err(TailError::Setup(format!(
                "tried to open non regular file: {}",
                path.display()
            )));
        }
        if FileId::from_metadata(&info) != self.state.file_id {
            return Err(TailError::Setup(
                "file info is not identical with opened file, retrying file later again"
                    .to_string(),
            ));
        }

        let offset = if self.state.offset > 0 {
            debug!(source = %self.state.source, offset = self.state.offset, "resuming at previous offset");
            file.seek(SeekFrom::Start(self.state.offset))?
        } else {
            file.seek(SeekFrom::Current(0))?
        };
        self.state.offset = offset;

        let log = LogFile::new(file, path, offset, Arc::clone(&self.config), done);
        self.reader = Some(reader::stack(log, &self.config)?);
        Ok(())
    }

    /// Record the current state in the shared store and queue it for the
    /// registry flush.
    pub fn send_state_update(&self) {
        debug!(source = %self.state.source, offset = self.state.offset, "update state");
        self.states.update(self.state.clone());
        self.registry.update(vec![self.state.clone()]);
    }

    /// The blocking read loop. Runs until a close condition, a publish
    /// failure or cancellation.
    pub fn run(mut self) {
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => {
                error!(source = %self.state.source, "worker started without setup");
                return;
            }
        };

        info!(source = %self.state.source, "worker started for file");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut message = match reader.next() {
                Ok(message) => message,
                Err(e) => {
                    self.on_close(e);
                    break;
                }
            };

            if self.state.offset == 0 {
                if let Some(stripped) = message.content.strip_prefix(UTF8_BOM) {
                    message.content = stripped.to_vec();
                }
            }

            let mut state = self.state.clone();
            state.offset += message.bytes as u64;

            let text = String::from_utf8_lossy(&message.content).into_owned();
            if !message.is_empty() && self.should_export_line(&text) {
                let mut event = Event::new(&self.config.name, message.timestamp);
                event.fields = event_fields(&state, message.fields, text);

                if let Err(e) = self.publisher.publish(event) {
                    // Do not advance: the next worker re-reads from the
                    // last recorded offset.
                    warn!(source = %self.state.source, error = %e, "publishing failed, stopping worker");
                    break;
                }
            }

            self.state = state;
            self.send_state_update();
        }

        self.cleanup();
    }

    fn on_close(&mut self, err: ReadError) {
        let source = self.state.source.clone();
        match err {
            ReadError::Truncated => {
                info!(source = %source, "file was truncated, begin reading file from offset 0");
                self.state.offset = 0;
            }
            ReadError::Removed => {
                info!(source = %source, "file was removed, closing because close.removed is enabled");
            }
            ReadError::Renamed => {
                info!(source = %source, "file was renamed, closing because close.renamed is enabled");
            }
            ReadError::Closed => {
                info!(source = %source, "reader was closed, closing");
            }
            ReadError::Eof => {
                info!(source = %source, "end of file reached, closing because close.eof is enabled");
            }
            ReadError::Inactive => {
                info!(
                    source = %source,
                    inactive = ?self.config.close.inactive,
                    "file is inactive, closing because close.inactive was reached"
                );
            }
            e => {
                error!(source = %source, error = %e, "read line error");
            }
        }
    }

    fn should_export_line(&self, line: &str) -> bool {
        if !self.config.include.lines.is_empty()
            && !self.config.include.lines.matches_any(line)
        {
            debug!("drop line, it does not match any of the include patterns");
            return false;
        }
        if self.config.exclude.lines.matches_any(line) {
            debug!("drop line, it matches one of the exclude patterns");
            return false;
        }
        true
    }

    fn cleanup(&mut self) {
        self.state.finished = true;

        debug!(source = %self.state.source, "stopping worker for file");
        self.send_state_update();
        debug!(source = %self.state.source, "worker cleanup finished");
        // The open file goes down with the reader stack.
    }
}

fn event_fields(state: &State, message_fields: Map<String, Value>, text: String) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("source".to_string(), Value::String(state.source.clone()));
    fields.insert("offset".to_string(), Value::from(state.offset));
    for (key, value) in message_fields {
        fields.insert(key, value);
    }
    fields.insert("message".to_string(), Value::String(text));
    fields
}
