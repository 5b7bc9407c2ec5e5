// SPDX-License-Identifier: Apache-2.0

//! Downstream sinks. The core engine only ever talks to the [`Sink`] and
//! [`Publisher`] contracts; everything behind them (serialization, batching,
//! transport) is the sink's own business.

pub mod console;
pub mod memory;

use std::sync::Arc;

use thiserror::Error;

use crate::event::Event;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// Handle used by a worker to publish events for one named group (topic).
///
/// Publish is called from blocking worker threads, so implementations must
/// not assume an async context; a bounded channel `send_blocking` into an
/// async drain is the expected shape.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: Event) -> Result<()>;
}

/// A sink accepts events and optionally partitions them by group name.
pub trait Sink: Send + Sync {
    /// Publish a single event on the sink's default path.
    fn publish(&self, event: Event) -> Result<()>;

    /// Bind a publisher for a named group. Sinks that do not partition
    /// return a handle to the same underlying stream.
    fn group(&self, name: &str) -> Arc<dyn Publisher>;

    /// Flush and shut down. Publishing after close returns `SinkError::Closed`.
    fn close(&self) -> Result<()>;
}
