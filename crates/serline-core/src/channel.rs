#![forbid(unsafe_code)]

//! Raw byte channel abstraction.
//!
//! A [`RawChannel`] is the transport the editor runs over: a serial port, a
//! pseudo-terminal, a USB CDC console. There is no terminal driver in between,
//! so everything the editor shows is written as bytes and everything the user
//! types (and every reply to a query) arrives as bytes on the same channel.
//!
//! Optional features of a transport are declared once through
//! [`ChannelCapabilities`] rather than queried at every use.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bitflags::bitflags;

use crate::geometry::TermSize;

/// The cursor position request, used by [`MemoryChannel`] to trigger replies.
const CURSOR_REPORT_REQUEST: &[u8] = b"\x1b[6n";

bitflags! {
    /// Optional transport features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelCapabilities: u8 {
        /// [`RawChannel::connected`] reports real liveness.
        const LIVENESS = 1 << 0;
        /// [`RawChannel::size`] reports geometry without escape queries.
        const SIZE = 1 << 1;
    }
}

/// A bidirectional raw byte transport.
pub trait RawChannel {
    /// Features this transport supports. Read once by the editor.
    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::empty()
    }

    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes. May block if nothing is available.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Whether the far end is attached. Only meaningful with
    /// [`ChannelCapabilities::LIVENESS`].
    fn connected(&self) -> bool {
        true
    }

    /// Terminal size as known by the transport. Only meaningful with
    /// [`ChannelCapabilities::SIZE`].
    fn size(&mut self) -> Option<TermSize> {
        None
    }

    /// Discard bytes received but not yet read.
    fn reset_input_buffer(&mut self) -> io::Result<()>;

    /// Discard bytes written but not yet transmitted.
    fn reset_output_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Wait briefly so that a burst of queued bytes can fully arrive.
    ///
    /// Simulated transports override this to return immediately.
    fn settle(&mut self, window: Duration) {
        std::thread::sleep(window);
    }

    /// Read everything currently available without blocking.
    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let n = self.bytes_available()?;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let got = self.read(&mut buf[filled..])?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

impl<C: RawChannel + ?Sized> RawChannel for &mut C {
    fn capabilities(&self) -> ChannelCapabilities {
        (**self).capabilities()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn size(&mut self) -> Option<TermSize> {
        (**self).size()
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        (**self).reset_input_buffer()
    }

    fn reset_output_buffer(&mut self) -> io::Result<()> {
        (**self).reset_output_buffer()
    }

    fn settle(&mut self, window: Duration) {
        (**self).settle(window);
    }
}

/// Scripted in-memory channel.
///
/// Input is a byte queue fed by the test; output is captured. Replies to
/// cursor position requests can be queued up front and are released into the
/// input queue each time `ESC [ 6 n` is written.
///
/// ```
/// use serline_core::channel::{MemoryChannel, RawChannel};
///
/// let mut chan = MemoryChannel::new().with_cursor_reply(b"\x1b[3;9R");
/// chan.write(b"\x1b[6n").unwrap();
/// assert_eq!(chan.read_available().unwrap(), b"\x1b[3;9R");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    input: VecDeque<u8>,
    output: Vec<u8>,
    write_calls: usize,
    replies: VecDeque<Vec<u8>>,
    capabilities: ChannelCapabilities,
    connected: bool,
    disconnect_when_drained: bool,
    size: Option<TermSize>,
}

impl MemoryChannel {
    /// Create an empty, connected channel with no capabilities.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    /// Queue input bytes (builder).
    #[must_use]
    pub fn with_input(mut self, bytes: &[u8]) -> Self {
        self.push_input(bytes);
        self
    }

    /// Queue a reply released by the next cursor position request (builder).
    #[must_use]
    pub fn with_cursor_reply(mut self, reply: &[u8]) -> Self {
        self.replies.push_back(reply.to_vec());
        self
    }

    /// Declare capabilities (builder).
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ChannelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Report a transport-level size; implies [`ChannelCapabilities::SIZE`] (builder).
    #[must_use]
    pub fn with_size(mut self, size: TermSize) -> Self {
        self.size = Some(size);
        self.capabilities |= ChannelCapabilities::SIZE;
        self
    }

    /// Report disconnection once all input has been read; implies
    /// [`ChannelCapabilities::LIVENESS`] (builder).
    #[must_use]
    pub fn disconnect_when_drained(mut self) -> Self {
        self.disconnect_when_drained = true;
        self.capabilities |= ChannelCapabilities::LIVENESS;
        self
    }

    /// Queue more input bytes.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Set liveness directly.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Everything written so far.
    #[must_use]
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Take and clear the captured output.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Number of `write` calls received.
    #[must_use]
    pub const fn write_calls(&self) -> usize {
        self.write_calls
    }

    /// Bytes still waiting to be read.
    #[must_use]
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    /// Replies still waiting for a request.
    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

impl RawChannel for MemoryChannel {
    fn capabilities(&self) -> ChannelCapabilities {
        self.capabilities
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        if self.disconnect_when_drained && self.input.is_empty() {
            self.connected = false;
        }
        Ok(self.input.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_calls += 1;
        self.output.extend_from_slice(bytes);
        let requests = bytes
            .windows(CURSOR_REPORT_REQUEST.len())
            .filter(|w| *w == CURSOR_REPORT_REQUEST)
            .count();
        for _ in 0..requests {
            if let Some(reply) = self.replies.pop_front() {
                self.input.extend(reply);
            }
        }
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn size(&mut self) -> Option<TermSize> {
        self.size
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.input.clear();
        Ok(())
    }

    fn settle(&mut self, _window: Duration) {}
}
