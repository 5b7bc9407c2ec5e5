// SPDX-License-Identifier: Apache-2.0

//! Makes a blocking upstream reader interruptible.
//!
//! A pumper thread forwards `(message, error)` pairs into a one-slot
//! channel; `next` races that channel against the timeout and returns the
//! `FlushTimeout` sentinel when the upstream stays quiet, which the
//! multiline assembler uses to flush a pending event.

use std::time::Duration;

use crate::tail::error::{ReadError, TailError};
use crate::tail::reader::{Message, Reader};

pub struct TimeoutReader {
    rx: flume::Receiver<Result<Message, ReadError>>,
    timeout: Duration,
}

impl TimeoutReader {
    pub fn new(reader: Box<dyn Reader>, timeout: Duration) -> Result<Self, TailError> {
        let (tx, rx) = flume::bounded(1);

        std::thread::Builder::new()
            .name("taild-timeout-pumper".to_string())
            .spawn(move || {
                let mut reader = reader;
                loop {
                    let item = reader.next();
                    if tx.send(item).is_err() {
                        // Consumer is gone; the worker has exited.
                        break;
                    }
                }
            })
            .map_err(|e| TailError::Setup(format!("spawning timeout pumper failed: {}", e)))?;

        Ok(Self { rx, timeout })
    }
}

impl Reader for TimeoutReader {
    fn next(&mut self) -> Result<Message, ReadError> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(item) => item,
            Err(flume::RecvTimeoutError::Timeout) => Err(ReadError::FlushTimeout),
            Err(flume::RecvTimeoutError::Disconnected) => Err(ReadError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::reader::testutil::line;

    /// Reader that blocks for a fixed delay before each message.
    struct SlowReader {
        delay: Duration,
        remaining: usize,
    }

    impl Reader for SlowReader {
        fn next(&mut self) -> Result<Message, ReadError> {
            std::thread::sleep(self.delay);
            if self.remaining == 0 {
                return Err(ReadError::Eof);
            }
            self.remaining -= 1;
            Ok(line("tick"))
        }
    }

    #[test]
    fn test_passes_messages_through() {
        let upstream = Box::new(SlowReader {
            delay: Duration::from_millis(1),
            remaining: 2,
        });
        let mut reader = TimeoutReader::new(upstream, Duration::from_secs(5)).unwrap();

        assert_eq!(reader.next().unwrap().content, b"tick");
        assert_eq!(reader.next().unwrap().content, b"tick");
        assert!(matches!(reader.next(), Err(ReadError::Eof)));
    }

    #[test]
    fn test_timeout_sentinel_on_quiet_upstream() {
        let upstream = Box::new(SlowReader {
            delay: Duration::from_millis(200),
            remaining: 1,
        });
        let mut reader = TimeoutReader::new(upstream, Duration::from_millis(20)).unwrap();

        // Upstream hasn't produced anything yet.
        assert!(matches!(reader.next(), Err(ReadError::FlushTimeout)));
        // Eventually the message still arrives.
        let mut got = None;
        for _ in 0..50 {
            match reader.next() {
                Ok(m) => {
                    got = Some(m);
                    break;
                }
                Err(ReadError::FlushTimeout) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(got.unwrap().content, b"tick");
    }
}
