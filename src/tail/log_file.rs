// SPDX-License-Identifier: Apache-2.0

//! The open-file byte source underneath the reader stack.
//!
//! `read` only ever returns bytes or a close condition: on EOF it runs the
//! error-check pipeline and, when nothing says to stop, sleeps with
//! exponential backoff and tries again. The backoff sleep is interruptible
//! through the worker's done channel, so cancellation surfaces as
//! `ReadError::Closed` within one backoff period.

use std::convert::Infallible;
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::tail::config::InputConfig;
use crate::tail::error::ReadError;
use crate::tail::file_id::{is_same_file, FileId};
use crate::tail::reader::ByteSource;

/// Receiver half of a worker's done channel. The channel never carries a
/// value; cancellation is signalled by dropping the sender.
pub type DoneSignal = flume::Receiver<Infallible>;

pub struct LogFile {
    file: File,
    path: PathBuf,
    offset: u64,
    config: Arc<InputConfig>,
    last_read: Instant,
    backoff: Duration,
    done: DoneSignal,
}

impl LogFile {
    pub fn new(file: File, path: PathBuf, offset: u64, config: Arc<InputConfig>, done: DoneSignal) -> Self {
        let backoff = config.backoff.min;
        Self {
            file,
            path,
            offset,
            config,
            last_read: Instant::now(),
            backoff,
            done,
        }
    }

    /// Byte offset the next read will start at.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn closed(&self) -> bool {
        matches!(self.done.try_recv(), Err(flume::TryRecvError::Disconnected))
    }

    /// Decide what an EOF means right now; first match wins.
    fn error_checks(&mut self) -> Result<(), ReadError> {
        if self.config.close.eof {
            return Err(ReadError::Eof);
        }

        let info = match self.file.metadata() {
            Ok(info) => info,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "unexpected error stating open file");
                return Err(e.into());
            }
        };

        if info.len() < self.offset {
            debug!(
                path = %self.path.display(),
                offset = self.offset,
                size = info.len(),
                "file was truncated, offset is past the end"
            );
            return Err(ReadError::Truncated);
        }

        if !self.config.close.inactive.is_zero()
            && self.last_read.elapsed() > self.config.close.inactive
        {
            return Err(ReadError::Inactive);
        }

        if self.config.close.renamed && !is_same_file(&self.path, FileId::from_metadata(&info)) {
            return Err(ReadError::Renamed);
        }

        if self.config.close.removed && fs::metadata(&self.path).is_err() {
            return Err(ReadError::Removed);
        }

        Ok(())
    }

    /// Sleep for the current backoff, bail out early if cancelled, then
    /// grow the backoff towards the configured max.
    fn wait(&mut self) -> Result<(), ReadError> {
        match self.done.recv_timeout(self.backoff) {
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => return Err(ReadError::Closed),
            Ok(never) => match never {},
        }

        if self.backoff < self.config.backoff.max {
            self.backoff = (self.backoff * self.config.backoff.factor).min(self.config.backoff.max);
        }
        Ok(())
    }
}

impl ByteSource for LogFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        loop {
            if self.closed() {
                return Err(ReadError::Closed);
            }

            match self.file.read(buf) {
                Ok(n) if n > 0 => {
                    self.offset += n as u64;
                    self.last_read = Instant::now();
                    self.backoff = self.config.backoff.min;
                    return Ok(n);
                }
                Ok(_) => {
                    self.error_checks()?;
                    debug!(path = %self.path.display(), "end of file reached, backing off");
                    self.wait()?;
                }
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, "unexpected state reading file");
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_config(mutate: impl FnOnce(&mut InputConfig)) -> Arc<InputConfig> {
        let mut config = InputConfig {
            paths: vec!["/t/*".to_string()],
            ..Default::default()
        };
        config.backoff.min = Duration::from_millis(5);
        config.backoff.max = Duration::from_millis(20);
        mutate(&mut config);
        Arc::new(config)
    }

    fn open(
        dir: &tempfile::TempDir,
        name: &str,
        content: &[u8],
        config: Arc<InputConfig>,
    ) -> (LogFile, flume::Sender<Infallible>) {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        let file = File::open(&path).unwrap();
        let (tx, rx) = flume::bounded::<Infallible>(0);
        (LogFile::new(file, path, 0, config, rx), tx)
    }

    #[test]
    fn test_read_advances_offset() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(|c| c.close.eof = true);
        let (mut log, _tx) = open(&dir, "a.log", b"hello\nworld\n", config);

        let mut buf = [0u8; 64];
        let n = log.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello\nworld\n");
        assert_eq!(log.offset(), 12);

        // close_eof surfaces the next EOF instead of backing off
        assert!(matches!(log.read(&mut buf), Err(ReadError::Eof)));
    }

    #[test]
    fn test_truncate_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(|_| {});
        let (mut log, _tx) = open(&dir, "a.log", b"0123456789\n", config);

        let mut buf = [0u8; 64];
        log.read(&mut buf).unwrap();
        assert_eq!(log.offset(), 11);

        let f = fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("a.log"))
            .unwrap();
        f.set_len(0).unwrap();

        assert!(matches!(log.read(&mut buf), Err(ReadError::Truncated)));
    }

    #[test]
    fn test_removed_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(|_| {});
        let (mut log, _tx) = open(&dir, "a.log", b"x\n", config);

        let mut buf = [0u8; 16];
        log.read(&mut buf).unwrap();

        fs::remove_file(dir.path().join("a.log")).unwrap();
        assert!(matches!(log.read(&mut buf), Err(ReadError::Removed)));
    }

    #[test]
    fn test_renamed_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(|c| {
            c.close.renamed = true;
            c.close.removed = false;
        });
        let (mut log, _tx) = open(&dir, "a.log", b"x\n", config);

        let mut buf = [0u8; 16];
        log.read(&mut buf).unwrap();

        fs::rename(dir.path().join("a.log"), dir.path().join("a.log.1")).unwrap();
        assert!(matches!(log.read(&mut buf), Err(ReadError::Renamed)));
    }

    #[test]
    fn test_inactive_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(|c| c.close.inactive = Duration::from_millis(10));
        let (mut log, _tx) = open(&dir, "a.log", b"x\n", config);

        let mut buf = [0u8; 16];
        log.read(&mut buf).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(log.read(&mut buf), Err(ReadError::Inactive)));
    }

    #[test]
    fn test_cancellation_interrupts_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(|c| {
            // Long backoff: only cancellation can end the wait quickly.
            c.backoff.min = Duration::from_secs(30);
            c.backoff.max = Duration::from_secs(30);
        });
        let (mut log, tx) = open(&dir, "a.log", b"", config);

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(tx);
        });

        let start = Instant::now();
        let mut buf = [0u8; 16];
        assert!(matches!(log.read(&mut buf), Err(ReadError::Closed)));
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn test_append_is_picked_up_after_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(|_| {});
        let (mut log, _tx) = open(&dir, "a.log", b"one\n", config);

        let mut buf = [0u8; 64];
        let n = log.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one\n");

        let path = dir.path().join("a.log");
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
            f.write_all(b"two\n").unwrap();
        });

        let n = log.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"two\n");
        assert_eq!(log.offset(), 8);
        writer.join().unwrap();
    }
}
