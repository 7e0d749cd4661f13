//! A bounded single-producer/single-consumer FIFO (§4.4).
//!
//! `pipe(out_pid, in_pid)` wires one process's stdout to another's stdin
//! through one of these. The writer side can be closed independently of the
//! buffer draining — once closed, readers drain whatever remains and then
//! see end-of-stream rather than blocking forever.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

struct Inner {
    buffer: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
}

/// A bounded byte pipe. Blocking reads and writes release the lock while
/// waiting — callers that must stay inside the scheduler's cooperative
/// model wrap these calls between [`crate::scheduler::Scheduler::suspend`]
/// and [`crate::scheduler::Scheduler::resume`].
pub struct Pipe {
    inner: Mutex<Inner>,
    cv: Condvar,
    capacity: usize,
}

impl Pipe {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Pipe {
            inner: Mutex::new(Inner { buffer: VecDeque::new(), writer_closed: false, reader_closed: false }),
            cv: Condvar::new(),
            capacity,
        })
    }

    /// Block until at least one byte fits, then write as much of `data` as
    /// fits in one go (a short write, not a partial-then-retry loop).
    /// Returns `None` if the reader has vanished — either already gone when
    /// `write` is called, or it disappears while this call is blocked
    /// waiting for buffer space — which the stream router surfaces as
    /// `broken-pipe` (§4.3, §4.4).
    pub fn write(&self, data: &[u8]) -> Option<usize> {
        if data.is_empty() {
            return Some(0);
        }
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.reader_closed {
                return None;
            }
            let space = self.capacity.saturating_sub(inner.buffer.len());
            if space > 0 {
                let n = data.len().min(space);
                inner.buffer.extend(data[..n].iter().copied());
                self.cv.notify_all();
                return Some(n);
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    pub fn close_writer(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.writer_closed = true;
        self.cv.notify_all();
    }

    pub fn is_writer_closed(&self) -> bool {
        self.inner.lock().unwrap().writer_closed
    }

    /// The reader has gone away: any writer currently blocked in [`Pipe::write`]
    /// wakes and observes `broken-pipe` instead of hanging forever.
    pub fn close_reader(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.reader_closed = true;
        self.cv.notify_all();
    }

    pub fn is_reader_closed(&self) -> bool {
        self.inner.lock().unwrap().reader_closed
    }

    /// Block until at least one byte is available or the writer has
    /// closed, then drain up to `max_len` bytes. An empty result means
    /// end-of-stream (writer closed, buffer drained).
    pub fn read(&self, max_len: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if !inner.buffer.is_empty() {
                let n = max_len.min(inner.buffer.len());
                let data: Vec<u8> = inner.buffer.drain(..n).collect();
                self.cv.notify_all();
                return data;
            }
            if inner.writer_closed {
                return Vec::new();
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    /// Block until a full line (or end-of-stream) is available.
    pub fn read_line(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(pos) = inner.buffer.iter().position(|&b| b == b'\n') {
                let data: Vec<u8> = inner.buffer.drain(..=pos).collect();
                self.cv.notify_all();
                return data;
            }
            if inner.writer_closed {
                let data: Vec<u8> = inner.buffer.drain(..).collect();
                return data;
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    /// Block until the writer closes and the buffer is fully drained.
    pub fn read_all(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.writer_closed {
                let data: Vec<u8> = inner.buffer.drain(..).collect();
                return data;
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_then_read_roundtrips() {
        let pipe = Pipe::new(16);
        pipe.write(b"hi");
        assert_eq!(pipe.read(2), b"hi".to_vec());
    }

    #[test]
    fn read_blocks_until_writer_closes_then_eof() {
        let pipe = Pipe::new(16);
        let reader = pipe.clone();
        let handle = thread::spawn(move || reader.read(8));
        thread::sleep(Duration::from_millis(20));
        pipe.close_writer();
        assert_eq!(handle.join().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn read_line_waits_for_newline() {
        let pipe = Pipe::new(64);
        pipe.write(b"partial");
        let reader = pipe.clone();
        let handle = thread::spawn(move || reader.read_line());
        thread::sleep(Duration::from_millis(20));
        pipe.write(b" line\nmore");
        assert_eq!(handle.join().unwrap(), b"partial line\n".to_vec());
    }

    #[test]
    fn write_blocks_when_full_until_drained() {
        let pipe = Pipe::new(4);
        pipe.write(b"abcd");
        let writer = pipe.clone();
        let handle = thread::spawn(move || writer.write(b"ef"));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pipe.read(4), b"abcd".to_vec());
        assert_eq!(handle.join().unwrap(), Some(2));
    }

    #[test]
    fn write_fails_once_reader_has_gone() {
        let pipe = Pipe::new(16);
        pipe.close_reader();
        assert_eq!(pipe.write(b"hi"), None);
    }

    #[test]
    fn write_blocked_on_full_buffer_wakes_to_broken_pipe_when_reader_closes() {
        let pipe = Pipe::new(4);
        pipe.write(b"abcd");
        let writer = pipe.clone();
        let handle = thread::spawn(move || writer.write(b"ef"));
        thread::sleep(Duration::from_millis(20));
        pipe.close_reader();
        assert_eq!(handle.join().unwrap(), None);
    }
}
