// SPDX-License-Identifier: Apache-2.0

//! Multiline assembler: folds physical lines into logical events.
//!
//! Three phases. `First` pulls until a non-empty line seeds the
//! accumulator; `Next` grows it while the predicate holds, emitting on a
//! predicate break, a flush-pattern hit, an upstream flush timeout or an
//! upstream error; `Failed` replays the error stashed when an accumulated
//! event had to be emitted first.
//!
//! Appending honors `max_bytes` and `max_lines`: past either bound the
//! content is dropped silently but `last` and the byte counter still
//! advance, so the predicate and offset bookkeeping keep working.

use regex::Regex;
use tracing::debug;

use crate::tail::config::{MatchMode, MultilineConfig};
use crate::tail::error::ReadError;
use crate::tail::reader::{Message, Reader};

enum Phase {
    First,
    Next,
    Failed,
}

type Predicate = Box<dyn Fn(&[u8], &[u8]) -> bool + Send>;

pub struct Multiline {
    reader: Box<dyn Reader>,
    pred: Predicate,
    flush_pattern: Option<Regex>,
    max_bytes: usize,
    max_lines: usize,
    separator: Vec<u8>,
    last: Vec<u8>,
    num_lines: usize,
    stashed: Option<ReadError>,
    phase: Phase,
    acc: Message,
}

impl Multiline {
    pub fn new(
        reader: Box<dyn Reader>,
        separator: Vec<u8>,
        max_bytes: usize,
        config: MultilineConfig,
    ) -> Self {
        let pattern = config.pattern.clone();
        let base: Predicate = match config.match_mode {
            MatchMode::After => Box::new(move |_last, current| matches_bytes(&pattern, current)),
            MatchMode::Before => Box::new(move |last, _current| matches_bytes(&pattern, last)),
        };
        let pred: Predicate = if config.negate {
            Box::new(move |last, current| !base(last, current))
        } else {
            base
        };

        Self {
            reader,
            pred,
            flush_pattern: config.flush_pattern,
            max_bytes,
            max_lines: config.max_lines,
            separator,
            last: Vec::new(),
            num_lines: 0,
            stashed: None,
            phase: Phase::First,
            acc: Message::empty(),
        }
    }

    fn read_first(&mut self) -> Result<Message, ReadError> {
        loop {
            match self.reader.next() {
                Err(ReadError::FlushTimeout) => continue,
                Err(e) => return Err(e),
                Ok(message) => {
                    if message.bytes == 0 {
                        continue;
                    }
                    self.clear();
                    self.load(message);
                    self.phase = Phase::Next;
                    return self.read_next();
                }
            }
        }
    }

    fn read_next(&mut self) -> Result<Message, ReadError> {
        loop {
            match self.reader.next() {
                Err(ReadError::FlushTimeout) => {
                    if self.num_lines == 0 {
                        continue;
                    }
                    debug!("multiline event flushed because timeout reached");
                    let message = self.finalize();
                    self.phase = Phase::First;
                    return Ok(message);
                }
                Err(e) => {
                    if self.num_lines == 0 {
                        return Err(e);
                    }
                    // Emit what we have; the error goes out on the next call.
                    let message = self.finalize();
                    self.stashed = Some(e);
                    self.phase = Phase::Failed;
                    return Ok(message);
                }
                Ok(message) => {
                    if let Some(flush) = &self.flush_pattern {
                        if matches_bytes(flush, &message.content) {
                            self.add_line(&message);
                            let finished = self.finalize();
                            self.phase = Phase::First;
                            return Ok(finished);
                        }
                    }

                    if self.acc.bytes > 0 && !(self.pred)(&self.last, &message.content) {
                        let finished = self.finalize();
                        self.load(message);
                        return Ok(finished);
                    }

                    self.add_line(&message);
                }
            }
        }
    }

    fn read_failed(&mut self) -> Result<Message, ReadError> {
        self.phase = Phase::First;
        match self.stashed.take() {
            Some(e) => Err(e),
            None => self.read_first(),
        }
    }

    /// Seed a fresh accumulator from `message`.
    fn load(&mut self, message: Message) {
        let timestamp = message.timestamp;
        self.add_line(&message);
        self.acc.timestamp = timestamp;
    }

    fn clear(&mut self) {
        self.acc = Message::empty();
        self.last.clear();
        self.num_lines = 0;
        self.stashed = None;
    }

    fn finalize(&mut self) -> Message {
        let message = std::mem::replace(&mut self.acc, Message::empty());
        self.last.clear();
        self.num_lines = 0;
        self.stashed = None;
        message
    }

    fn add_line(&mut self, message: &Message) {
        if message.bytes == 0 {
            return;
        }

        let mut size = self.acc.content.len();
        let add_separator = size > 0 && !self.separator.is_empty();
        if add_separator {
            size += self.separator.len();
        }

        let space = self.max_bytes as i64 - size as i64;
        let within_bytes = self.max_bytes == 0 || space > 0;
        let within_lines = self.max_lines == 0 || self.num_lines < self.max_lines;

        if within_bytes && within_lines {
            let take = if space < 0 || space as usize > message.content.len() {
                message.content.len()
            } else {
                space as usize
            };
            if add_separator {
                self.acc.content.extend_from_slice(&self.separator);
            }
            self.acc.content.extend_from_slice(&message.content[..take]);
            self.num_lines += 1;
        }

        self.last.clear();
        self.last.extend_from_slice(&message.content);
        self.acc.bytes += message.bytes;
        self.acc.add_fields(message.fields.clone());
    }
}

impl Reader for Multiline {
    fn next(&mut self) -> Result<Message, ReadError> {
        match self.phase {
            Phase::First => self.read_first(),
            Phase::Next => self.read_next(),
            Phase::Failed => self.read_failed(),
        }
    }
}

fn matches_bytes(pattern: &Regex, content: &[u8]) -> bool {
    pattern.is_match(&String::from_utf8_lossy(content))
}
