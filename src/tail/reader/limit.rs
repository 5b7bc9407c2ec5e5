// SPDX-License-Identifier: Apache-2.0

//! Caps message content at `max_bytes`. The message is kept (and its byte
//! count untouched), only the content is cut.

use crate::tail::error::ReadError;
use crate::tail::reader::{Message, Reader};

pub struct LimitReader {
    reader: Box<dyn Reader>,
    max_bytes: usize,
}

impl LimitReader {
    pub fn new(reader: Box<dyn Reader>, max_bytes: usize) -> Self {
        Self { reader, max_bytes }
    }
}

impl Reader for LimitReader {
    fn next(&mut self) -> Result<Message, ReadError> {
        let mut message = self.reader.next()?;
        if message.content.len() > self.max_bytes {
            message.content.truncate(self.max_bytes);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::reader::testutil::{line, MockReader};

    #[test]
    fn test_truncates_long_content() {
        let reader = MockReader::new(vec![Ok(line("0123456789"))]);
        let mut limit = LimitReader::new(Box::new(reader), 4);

        let m = limit.next().unwrap();
        assert_eq!(m.content, b"0123");
        // bytes still reflect what was consumed from the file
        assert_eq!(m.bytes, 11);
    }

    #[test]
    fn test_short_content_untouched() {
        let reader = MockReader::new(vec![Ok(line("ok"))]);
        let mut limit = LimitReader::new(Box::new(reader), 100);
        assert_eq!(limit.next().unwrap().content, b"ok");
    }
}
