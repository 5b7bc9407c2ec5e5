// SPDX-License-Identifier: Apache-2.0

//! In-memory sink that records every published event. Used by the
//! integration tests and as a wiring check when no real sink is configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::sinks::{Publisher, Result, Sink, SinkError};

#[derive(Default)]
struct Inner {
    events: Mutex<Vec<Event>>,
    closed: AtomicBool,
    fail_publish: AtomicBool,
}

/// Captures events into a shared vector.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When set, every publish fails with an IO error. Lets tests exercise
    /// the worker's no-state-advance-on-publish-failure path.
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }
}

impl Publisher for MemorySink {
    fn publish(&self, event: Event) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(SinkError::Io(std::io::Error::other("publish refused")));
        }
        self.inner
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

impl Sink for MemorySink {
    fn publish(&self, event: Event) -> Result<()> {
        Publisher::publish(self, event)
    }

    fn group(&self, _name: &str) -> Arc<dyn Publisher> {
        Arc::new(self.clone())
    }

    fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
