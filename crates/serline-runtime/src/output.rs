#![forbid(unsafe_code)]

//! Buffered output towards a raw channel.
//!
//! The [`OutputChannel`] owns the [`RawChannel`] and is the only path by which
//! bytes reach it. Text goes through [`write_line`](OutputChannel::write_line)
//! and [`write_raw`](OutputChannel::write_raw), which translate `"\n"` into
//! `"\n\r"` because a bare channel has no terminal driver to do it. Escape
//! sequences and editing output go through [`io::Write`] untouched.
//!
//! Every write is flushed immediately unless the channel is held. Holding
//! collects the output of a whole token batch into one channel write.
//!
//! ```
//! use serline_core::channel::MemoryChannel;
//! use serline_runtime::output::OutputChannel;
//!
//! let mut out = OutputChannel::new(MemoryChannel::new());
//! out.write_line("a\nb").unwrap();
//! assert_eq!(out.channel().output(), b"a\n\rb\n\r");
//! ```

use std::io::{self, Write};

use serline_core::channel::RawChannel;
use tracing::trace;

/// Where [`OutputChannel::flush_to`] sends pending bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushTarget {
    /// Write pending bytes to the channel.
    #[default]
    Channel,
    /// Hand pending bytes back to the caller instead of writing them.
    Return,
}

/// Line-ending normalizing, holdable output buffer.
#[derive(Debug)]
pub struct OutputChannel<C> {
    channel: C,
    pending: Vec<u8>,
    held: bool,
    bytes_flushed: u64,
}

impl<C: RawChannel> OutputChannel<C> {
    /// Wrap a channel.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            pending: Vec::new(),
            held: false,
            bytes_flushed: 0,
        }
    }

    /// Append `text` followed by a newline.
    pub fn write_line(&mut self, text: &str) -> io::Result<()> {
        push_normalized(&mut self.pending, text);
        push_normalized(&mut self.pending, "\n");
        self.auto_flush()
    }

    /// Append `text` with no terminator.
    pub fn write_raw(&mut self, text: &str) -> io::Result<()> {
        push_normalized(&mut self.pending, text);
        self.auto_flush()
    }

    /// Stop flushing after each write.
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Resume flushing after each write, flushing what was collected.
    pub fn release(&mut self) -> io::Result<()> {
        self.held = false;
        self.flush_to(FlushTarget::Channel).map(drop)
    }

    /// Whether output is currently held.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.held
    }

    /// Bytes not yet flushed.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Total bytes written to the channel so far.
    #[must_use]
    pub const fn bytes_flushed(&self) -> u64 {
        self.bytes_flushed
    }

    /// Flush pending bytes.
    ///
    /// With [`FlushTarget::Return`] the bytes are removed from the buffer and
    /// returned instead of written. Flushing an empty buffer is a no-op.
    /// If the channel write fails the bytes stay pending.
    pub fn flush_to(&mut self, target: FlushTarget) -> io::Result<Option<Vec<u8>>> {
        let bytes = std::mem::take(&mut self.pending);
        match target {
            FlushTarget::Return => Ok(Some(bytes)),
            FlushTarget::Channel => {
                if !bytes.is_empty() {
                    trace!(len = bytes.len(), "flush output");
                    if let Err(err) = self.channel.write(&bytes) {
                        self.pending = bytes;
                        return Err(err);
                    }
                    self.bytes_flushed = self.bytes_flushed.saturating_add(bytes.len() as u64);
                }
                Ok(None)
            }
        }
    }

    /// Drop pending bytes and ask the channel to drop untransmitted ones.
    pub fn discard(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.channel.reset_output_buffer()
    }

    /// The wrapped channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The wrapped channel, mutably. Writing through it bypasses the buffer.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Unwrap the channel, dropping unflushed bytes.
    pub fn into_inner(self) -> C {
        self.channel
    }

    fn auto_flush(&mut self) -> io::Result<()> {
        if self.held {
            return Ok(());
        }
        self.flush_to(FlushTarget::Channel).map(drop)
    }
}

impl<C: RawChannel> Write for OutputChannel<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.auto_flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_to(FlushTarget::Channel).map(drop)
    }
}

fn push_normalized(buf: &mut Vec<u8>, text: &str) {
    for part in text.split_inclusive('\n') {
        buf.extend_from_slice(part.as_bytes());
        if part.ends_with('\n') {
            buf.push(b'\r');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serline_core::channel::MemoryChannel;

    fn out() -> OutputChannel<MemoryChannel> {
        OutputChannel::new(MemoryChannel::new())
    }

    #[test]
    fn newlines_are_normalized() {
        let mut out = out();
        out.write_raw("one\ntwo\n\nthree").unwrap();
        assert_eq!(out.channel().output(), b"one\n\rtwo\n\r\n\rthree");
    }

    #[test]
    fn write_line_appends_terminator() {
        let mut out = out();
        out.write_line("hi").unwrap();
        out.write_line("").unwrap();
        assert_eq!(out.channel().output(), b"hi\n\r\n\r");
    }

    #[test]
    fn io_write_is_untouched() {
        let mut out = out();
        out.write_all(b"\x1b[2K\n").unwrap();
        assert_eq!(out.channel().output(), b"\x1b[2K\n");
    }

    #[test]
    fn auto_flush_writes_each_call() {
        let mut out = out();
        out.write_raw("a").unwrap();
        out.write_raw("b").unwrap();
        assert_eq!(out.channel().write_calls(), 2);
        assert!(out.pending().is_empty());
    }

    #[test]
    fn hold_collects_into_one_write() {
        let mut out = out();
        out.hold();
        out.write_raw("a").unwrap();
        write!(out, "\x1b[{}D", 3).unwrap();
        out.write_raw("b").unwrap();
        assert_eq!(out.channel().write_calls(), 0);
        out.release().unwrap();
        assert_eq!(out.channel().write_calls(), 1);
        assert_eq!(out.channel().output(), b"a\x1b[3Db");
        assert_eq!(out.bytes_flushed(), 6);
    }

    #[test]
    fn flush_to_return_hands_back_bytes() {
        let mut out = out();
        out.hold();
        out.write_raw("x\n").unwrap();
        let bytes = out.flush_to(FlushTarget::Return).unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"x\n\r"[..]));
        assert!(out.channel().output().is_empty());
        assert!(out.pending().is_empty());
    }

    #[test]
    fn empty_flush_does_not_write() {
        let mut out = out();
        out.flush().unwrap();
        assert_eq!(out.channel().write_calls(), 0);
    }

    /// Accepts writes only while `up` is set.
    #[derive(Default)]
    struct FlakyChannel {
        up: bool,
        written: Vec<u8>,
    }

    impl RawChannel for FlakyChannel {
        fn bytes_available(&mut self) -> io::Result<usize> {
            Ok(0)
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            if !self.up {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "line down"));
            }
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn reset_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_flush_keeps_bytes() {
        let mut out = OutputChannel::new(FlakyChannel::default());
        out.hold();
        out.write_raw("keep").unwrap();
        let err = out.release().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(out.pending(), b"keep");
        assert_eq!(out.bytes_flushed(), 0);

        out.channel_mut().up = true;
        out.flush().unwrap();
        assert_eq!(out.channel().written, b"keep");
        assert!(out.pending().is_empty());
    }

    #[test]
    fn discard_drops_pending() {
        let mut out = out();
        out.hold();
        out.write_raw("lost").unwrap();
        out.discard().unwrap();
        out.release().unwrap();
        assert!(out.channel().output().is_empty());
    }
}
