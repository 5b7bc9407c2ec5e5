// SPDX-License-Identifier: Apache-2.0

//! Console sink: events are serialized as JSON lines on stdout.
//!
//! Workers publish into a bounded channel from their blocking threads; a
//! single async drain task owns stdout and writes one line per event. This
//! keeps the per-group back-pressure bounded without any locking around the
//! output stream.

use std::io::Write;
use std::sync::Arc;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender};
use crate::event::Event;
use crate::sinks::{Publisher, Result, Sink, SinkError};

pub const DEFAULT_QUEUE_SIZE: usize = 1024;

pub struct ConsoleSink {
    tx: BoundedSender<Event>,
    cancel: CancellationToken,
}

/// Drain half of the console sink; run this on the runtime.
pub struct ConsoleWriter {
    rx: BoundedReceiver<Event>,
}

/// Create the sink plus its writer task.
pub fn console_sink(queue_size: usize) -> (ConsoleSink, ConsoleWriter) {
    let (tx, rx) = bounded_channel::bounded(queue_size);
    let sink = ConsoleSink {
        tx,
        cancel: CancellationToken::new(),
    };
    (sink, ConsoleWriter { rx })
}

impl Sink for ConsoleSink {
    fn publish(&self, event: Event) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SinkError::Closed);
        }
        self.tx
            .send_blocking(event)
            .map_err(|_| SinkError::Closed)
    }

    fn group(&self, _name: &str) -> Arc<dyn Publisher> {
        // Console does not partition; every group shares the stream.
        Arc::new(ConsolePublisher {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        })
    }

    fn close(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

struct ConsolePublisher {
    tx: BoundedSender<Event>,
    cancel: CancellationToken,
}

impl Publisher for ConsolePublisher {
    fn publish(&self, event: Event) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SinkError::Closed);
        }
        self.tx
            .send_blocking(event)
            .map_err(|_| SinkError::Closed)
    }
}

impl ConsoleWriter {
    pub async fn run(mut self, cancel: CancellationToken) {
        let stdout = std::io::stdout();
        loop {
            select! {
                _ = cancel.cancelled() => break,
                event = self.rx.next() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = write_line(&stdout, &event) {
                                warn!(error = %e, "failed to write event to stdout");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Drain whatever is already queued before exiting.
        while let Some(event) = self.rx.try_recv() {
            if let Err(e) = write_line(&stdout, &event) {
                warn!(error = %e, "failed to write event to stdout");
            }
        }
        debug!("exiting console writer");
    }
}

fn write_line(stdout: &std::io::Stdout, event: &Event) -> std::io::Result<()> {
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, event)?;
    out.write_all(b"\n")
}
