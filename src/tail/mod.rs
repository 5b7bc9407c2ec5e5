// SPDX-License-Identifier: Apache-2.0

//! The file-tailing engine: discovery, per-file workers, the composable
//! reader stack and the durable registry of read positions.
//!
//! Ownership is strictly layered. A [`scanner::Scanner`] walks the
//! configured globs on a fixed cadence and decides which files need a
//! worker; each [`worker::Worker`] owns one open file for its whole read
//! lifetime and is the only task advancing that file's offset; the shared
//! [`state::StateStore`] is the meeting point between the two, and the
//! [`registry::Registry`] task mirrors it to disk asynchronously.

pub mod config;
pub mod error;
pub mod executor;
pub mod file_id;
pub mod glob;
pub mod log_file;
pub mod reader;
pub mod registry;
pub mod scanner;
pub mod state;
pub mod worker;

pub use config::InputConfig;
pub use error::{ReadError, TailError};
pub use file_id::FileId;
pub use registry::{Registry, RegistryHandle};
pub use scanner::Scanner;
pub use state::{State, StateStore};
