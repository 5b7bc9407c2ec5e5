// SPDX-License-Identifier: Apache-2.0

//! Removes the trailing `\r?\n` from message content. `bytes` stays intact
//! so offsets still account for the terminator.

use crate::tail::error::ReadError;
use crate::tail::reader::{Message, Reader};

pub struct StripNewline {
    reader: Box<dyn Reader>,
}

impl StripNewline {
    pub fn new(reader: Box<dyn Reader>) -> Self {
        Self { reader }
    }
}

impl Reader for StripNewline {
    fn next(&mut self) -> Result<Message, ReadError> {
        let mut message = self.reader.next()?;
        let len = message.content.len();
        message.content.truncate(len - line_ending_chars(&message.content));
        Ok(message)
    }
}

fn line_ending_chars(content: &[u8]) -> usize {
    if !content.ends_with(b"\n") {
        return 0;
    }
    if content.len() > 1 && content[content.len() - 2] == b'\r' {
        return 2;
    }
    1
}
