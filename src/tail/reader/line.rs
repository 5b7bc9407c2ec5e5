// SPDX-License-Identifier: Apache-2.0

//! Splits the raw byte stream into newline-terminated messages.

use chrono::Utc;
use serde_json::Map;

use crate::tail::error::ReadError;
use crate::tail::reader::{ByteSource, Message, Reader};

pub struct LineReader<S> {
    source: S,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    /// How far `pending` has already been searched for a newline.
    scanned: usize,
}

impl<S: ByteSource> LineReader<S> {
    pub fn new(source: S, buffer_size: usize) -> Self {
        Self {
            source,
            chunk: vec![0u8; buffer_size.max(1)],
            pending: Vec::new(),
            scanned: 0,
        }
    }
}

impl<S: ByteSource> Reader for LineReader<S> {
    /// Emit the next full line including its terminator; `bytes` is the
    /// complete line length. A partial line at the buffer tail stays
    /// pending until its newline arrives, so offsets only ever advance in
    /// whole lines.
    fn next(&mut self) -> Result<Message, ReadError> {
        loop {
            if let Some(pos) = self.pending[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
            {
                let end = self.scanned + pos + 1;
                let line: Vec<u8> = self.pending.drain(..end).collect();
                self.scanned = 0;
                return Ok(Message {
                    timestamp: Utc::now(),
                    bytes: line.len(),
                    content: line,
                    fields: Map::new(),
                });
            }

            self.scanned = self.pending.len();
            let n = self.source.read(&mut self.chunk)?;
            self.pending.extend_from_slice(&self.chunk[..n]);
        }
    }
}
