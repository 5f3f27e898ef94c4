//! Runtime log sink.
//!
//! The runtime owns no console. Every diagnostic line lands in a fixed
//! ring buffer the embedder can drain, and is mirrored to an optional
//! console sink registered through [`crate::host`]. Formatting goes
//! through a static line-buffer pool so logging works before (and
//! without) the runtime heap.

use core::fmt::{self, Write};
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use spin::Mutex;

use crate::config::LOG_RINGBUF_SIZE;
use crate::host;

// Two line buffers: one for normal logging, one so a log line emitted
// while formatting another (e.g. from a dispatch inside a sink) cannot
// corrupt the first.
static mut LINE_BUFFER_POOL: [[u8; 256]; 2] = [[0; 256]; 2];
static LINE_BUFFER_IN_USE: AtomicBool = AtomicBool::new(false);

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info.priority());
static LOG_SEQ: AtomicU32 = AtomicU32::new(0);

static RINGBUF: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Panic,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Panic => "PANIC",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    pub const fn priority(self) -> u8 {
        match self {
            LogLevel::Panic => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Trace => 5,
        }
    }

    fn from_priority(value: u8) -> Self {
        match value {
            0 => LogLevel::Panic,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

pub fn set_max_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn max_level() -> LogLevel {
    LogLevel::from_priority(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Format and emit one log line. Called through the `k*!` macros.
pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level.priority() > LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let seq = LOG_SEQ.fetch_add(1, Ordering::Relaxed);

    let mut line = LineBuffer::new();
    let ok = write!(
        line,
        "[{seq:>5}] [{level:<5}] {args}\n",
        level = level.as_str()
    )
    .is_ok();
    if !ok {
        // Line did not fit; ship what we have with a truncation mark.
        line.force_truncation_mark();
    }

    host::console_write(line.as_str());

    let mut ringbuf = RINGBUF.lock();
    ringbuf.write_bytes(line.as_bytes());
}

/// Copy out the whole ring buffer. Bytes past the write position wrap
/// around to the oldest data once the buffer has filled.
pub fn read_ringbuffer() -> [u8; LOG_RINGBUF_SIZE] {
    let ringbuf = RINGBUF.lock();
    ringbuf.buf
}

pub fn ringbuffer_write_pos() -> usize {
    let ringbuf = RINGBUF.lock();
    ringbuf.write_pos
}

struct LineBuffer {
    buf: &'static mut [u8; 256],
    len: usize,
    from_pool: bool,
}

impl LineBuffer {
    fn new() -> Self {
        let (index, from_pool) = if LINE_BUFFER_IN_USE
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            (0, true)
        } else {
            // Nested logging: use the spare buffer without claiming it.
            (1, false)
        };
        // SAFETY: buffer 0 is exclusively ours while the flag is held;
        // buffer 1 serves only the (rare, single-level) nested case.
        let buf_ptr = unsafe { addr_of_mut!(LINE_BUFFER_POOL[index]) };
        Self {
            buf: unsafe { &mut *buf_ptr },
            len: 0,
            from_pool,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn as_str(&self) -> &str {
        // Writes go through fmt::Write, so the content is valid UTF-8.
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    fn force_truncation_mark(&mut self) {
        let tail = b"...\n";
        let start = self.buf.len() - tail.len();
        self.buf[start..].copy_from_slice(tail);
        self.len = self.buf.len();
    }
}

impl Drop for LineBuffer {
    fn drop(&mut self) {
        if self.from_pool {
            LINE_BUFFER_IN_USE.store(false, Ordering::Release);
        }
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.len + bytes.len() > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

struct RingBuffer {
    buf: [u8; LOG_RINGBUF_SIZE],
    write_pos: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; LOG_RINGBUF_SIZE],
            write_pos: 0,
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.buf[self.write_pos] = byte;
            self.write_pos += 1;
            if self.write_pos >= LOG_RINGBUF_SIZE {
                self.write_pos = 0;
            }
        }
    }
}
