//! Request/response AT command transport.
//!
//! The one logical channel to the modem: a command goes down the serial
//! line and bytes accumulate until a terminator, a caller-supplied marker,
//! or the deadline. Strict single-outstanding-command discipline; the
//! response buffer is reused across commands. No semantic parsing happens
//! here beyond line classification — callers judge the content.

pub mod response;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::Clock;
use crate::LinkError;
use response::Reply;

/// Upper bound on accumulated response bytes for one command. A reply
/// longer than this means the stream is garbage.
pub const RESPONSE_CAPACITY: usize = 4096;

/// Pause between polls of a quiet port.
const POLL_DELAY: Duration = Duration::from_millis(10);

pub struct AtTransport<P, C> {
    port: P,
    clock: C,
    response: String,
}

impl<P: Read + Write, C: Clock> AtTransport<P, C> {
    pub fn new(port: P, clock: C) -> Self {
        Self {
            port,
            clock,
            response: String::with_capacity(RESPONSE_CAPACITY),
        }
    }

    /// Send a command and wait for an `OK`/`ERROR` terminator at the tail
    /// of the response, or for the deadline. The accumulated text is
    /// returned either way; callers judge its content.
    pub fn command(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Reply, LinkError> {
        self.submit(command)?;
        self.collect(timeout, terminated)
    }

    /// Send a command and additionally stop as soon as `marker` shows up
    /// anywhere in the response. The `>` payload prompt never comes with a
    /// terminator, so a plain [`Self::command`] would sit out its whole
    /// deadline waiting for one.
    pub fn command_until(
        &mut self,
        command: &str,
        marker: &str,
        timeout: Duration,
    ) -> Result<Reply, LinkError> {
        self.submit(command)?;
        self.collect(timeout, |text| text.contains(marker) || terminated(text))
    }

    /// Wait for `marker` in unsolicited inbound bytes without sending
    /// anything.
    pub fn wait_for(
        &mut self,
        marker: &str,
        timeout: Duration,
    ) -> Result<Reply, LinkError> {
        self.response.clear();
        self.collect(timeout, |text| text.contains(marker))
    }

    /// Wait for a terminator without sending anything (frame
    /// acknowledgment after a raw write).
    pub fn await_terminator(
        &mut self,
        timeout: Duration,
    ) -> Result<Reply, LinkError> {
        self.response.clear();
        self.collect(timeout, terminated)
    }

    /// Push raw bytes down the serial line (payload after the send
    /// prompt).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        trace!(len = bytes.len(), "writing raw payload");
        self.port.write_all(bytes)?;
        Ok(())
    }

    /// Drain whatever the modem has pushed since the last read. Returns
    /// immediately; an idle line yields an empty string.
    pub fn read_available(&mut self) -> Result<String, LinkError> {
        let mut drained = String::new();
        let mut buf = [0u8; 256];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if drained.len() + n > RESPONSE_CAPACITY {
                        return Err(LinkError::ResponseOverflow);
                    }
                    drained.push_str(&String::from_utf8_lossy(&buf[..n]));
                }
                Err(e) if idle_read(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(drained)
    }

    fn submit(&mut self, command: &str) -> Result<(), LinkError> {
        debug!(%command, "sending AT command");
        self.response.clear();
        let line = format!("{command}\r\n");
        self.port.write_all(line.as_bytes())?;
        Ok(())
    }

    fn collect(
        &mut self,
        timeout: Duration,
        done: impl Fn(&str) -> bool,
    ) -> Result<Reply, LinkError> {
        let deadline = self.clock.now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if self.response.len() + n > RESPONSE_CAPACITY {
                        return Err(LinkError::ResponseOverflow);
                    }
                    self.response.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if done(&self.response) {
                        break;
                    }
                    // Keep reading while bytes are flowing.
                    continue;
                }
                Err(e) if idle_read(&e) => {}
                Err(e) => return Err(e.into()),
            }
            if self.clock.now() >= deadline {
                break;
            }
            self.clock.sleep(POLL_DELAY);
        }
        trace!(response = %self.response.escape_debug(), "reply collected");
        Ok(Reply::new(self.response.clone()))
    }
}

fn terminated(text: &str) -> bool {
    text.ends_with("OK\r\n") || text.ends_with("ERROR\r\n")
}

fn idle_read(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}
