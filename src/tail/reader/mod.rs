// SPDX-License-Identifier: Apache-2.0

//! Composable message transforms between the raw file bytes and the worker.
//!
//! Every transform owns its upstream and exposes the same single-method
//! contract, so the stack is assembled by nesting:
//! line splitter -> optional JSON decoder -> newline stripper -> optional
//! multiline assembler (with a timeout pumper) -> length limiter.

pub mod json;
pub mod limit;
pub mod line;
pub mod multiline;
pub mod strip;
pub mod timeout;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::tail::config::InputConfig;
use crate::tail::error::{ReadError, TailError};
use crate::tail::log_file::LogFile;

/// One unit of content moving up the stack.
#[derive(Debug, Clone)]
pub struct Message {
    /// When the content was read.
    pub timestamp: DateTime<Utc>,
    pub content: Vec<u8>,
    /// Total bytes consumed from the file to produce this message,
    /// including line terminators. Drives the offset bookkeeping, so
    /// transforms may shrink `content` but never touch `bytes`.
    pub bytes: usize,
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            content: Vec::new(),
            bytes: 0,
            fields: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0 || (self.content.is_empty() && self.fields.is_empty())
    }

    /// Shallow merge; later keys overwrite.
    pub fn add_fields(&mut self, fields: Map<String, Value>) {
        for (key, value) in fields {
            self.fields.insert(key, value);
        }
    }
}

/// The transform contract. An `Err` always carries no content; a worker
/// treats it as the file's close cause.
pub trait Reader: Send {
    fn next(&mut self) -> Result<Message, ReadError>;
}

/// Blocking byte producer underneath the line splitter.
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError>;
}

/// Assemble the configured stack on top of an open file.
pub fn stack(source: LogFile, config: &InputConfig) -> Result<Box<dyn Reader>, TailError> {
    let mut reader: Box<dyn Reader> =
        Box::new(line::LineReader::new(source, config.scanner.buffer));

    if let Some(json) = &config.json {
        reader = Box::new(json::JsonReader::new(reader, json.clone()));
    }

    reader = Box::new(strip::StripNewline::new(reader));

    if let Some(multiline) = &config.multiline {
        if !multiline.timeout.is_zero() {
            reader = Box::new(timeout::TimeoutReader::new(reader, multiline.timeout)?);
        }
        reader = Box::new(multiline::Multiline::new(
            reader,
            b"\n".to_vec(),
            config.max.bytes,
            multiline.clone(),
        ));
    }

    Ok(Box::new(limit::LimitReader::new(reader, config.max.bytes)))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Scripted reader used by the transform unit tests.
    pub struct MockReader {
        items: std::collections::VecDeque<Result<Message, ReadError>>,
    }

    impl MockReader {
        pub fn new(items: Vec<Result<Message, ReadError>>) -> Self {
            Self {
                items: items.into(),
            }
        }

        /// One message per line; `bytes` counts a newline terminator the
        /// way the stripper leaves it.
        pub fn lines(lines: &[&str]) -> Self {
            Self::new(lines.iter().map(|l| Ok(line(l))).collect())
        }
    }

    impl Reader for MockReader {
        fn next(&mut self) -> Result<Message, ReadError> {
            self.items.pop_front().unwrap_or(Err(ReadError::Eof))
        }
    }

    pub fn line(content: &str) -> Message {
        Message {
            timestamp: chrono::Utc::now(),
            content: content.as_bytes().to_vec(),
            bytes: content.len() + 1,
            fields: Map::new(),
        }
    }
}
