//! Shared test doubles: a scripted serial port, a deterministic clock and
//! a recording reset hook.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use uplinkd::clock::Clock;
use uplinkd::supervisor::{LinkSupervisor, Reset};
use uplinkd::ws::Endpoint;

pub const HOST: &str = "203.0.113.7";
pub const PORT: u16 = 8765;

/// One step of a conversation script: once `expect` has been seen in the
/// bytes written since the previous match, `reply` is queued for reading.
/// An empty `expect` matches the next write of any content (raw frame
/// bytes are masked and therefore unpredictable).
pub struct Step {
    pub expect: &'static str,
    pub reply: String,
}

pub fn step(expect: &'static str, reply: impl Into<String>) -> Step {
    Step {
        expect,
        reply: reply.into(),
    }
}

#[derive(Default)]
struct PortState {
    script: VecDeque<Step>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    written: Vec<u8>,
}

/// In-order scripted serial port. Reads yield one byte at a time, like a
/// slow UART, so terminator detection is exercised byte by byte.
#[derive(Clone, Default)]
pub struct ScriptedPort(Rc<RefCell<PortState>>);

impl ScriptedPort {
    pub fn new(steps: Vec<Step>) -> Self {
        let port = Self::default();
        port.0.borrow_mut().script = steps.into();
        port
    }

    /// Everything written so far, lossily decoded.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow().written).into_owned()
    }

    /// Drain the write log, so assertions can scope to "since here".
    pub fn take_written(&self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.0.borrow_mut().written))
            .into_owned()
    }

    pub fn script_exhausted(&self) -> bool {
        self.0.borrow().script.is_empty()
    }

    /// Queue unsolicited inbound bytes, as if the modem pushed them.
    pub fn inject(&self, text: &str) {
        self.0.borrow_mut().rx.extend(text.as_bytes());
    }

    fn advance(&self) {
        let mut state = self.0.borrow_mut();
        loop {
            let Some(head) = state.script.front() else {
                break;
            };
            let matched = if head.expect.is_empty() {
                !state.pending.is_empty()
            } else {
                String::from_utf8_lossy(&state.pending).contains(head.expect)
            };
            if !matched {
                break;
            }
            let head = state.script.pop_front().unwrap();
            state.pending.clear();
            state.rx.extend(head.reply.as_bytes());
        }
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.0.borrow_mut().rx.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
        }
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        {
            let mut state = self.0.borrow_mut();
            state.written.extend_from_slice(buf);
            state.pending.extend_from_slice(buf);
        }
        self.advance();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Deterministic clock: sleeps advance time instead of blocking.
#[derive(Clone)]
pub struct TestClock {
    base: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Counts reset requests instead of exiting.
#[derive(Clone, Default)]
pub struct RecordingReset(Rc<Cell<u32>>);

impl RecordingReset {
    pub fn count(&self) -> u32 {
        self.0.get()
    }
}

impl Reset for RecordingReset {
    fn hard_reset(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint {
        host: HOST.into(),
        port: PORT,
    }
}

pub type TestSupervisor = LinkSupervisor<ScriptedPort, TestClock, RecordingReset>;

pub fn supervisor(
    steps: Vec<Step>,
) -> (TestSupervisor, ScriptedPort, TestClock, RecordingReset) {
    let port = ScriptedPort::new(steps);
    let clock = TestClock::new();
    let reset = RecordingReset::default();
    let link =
        LinkSupervisor::new(port.clone(), clock.clone(), reset.clone(), endpoint());
    (link, port, clock, reset)
}

// Canned healthy conversations.

pub fn probe_steps() -> Vec<Step> {
    vec![
        step("AT", "\r\nOK\r\n"),
        step("AT+CGMM", "AT+CGMM\r\nA7670E\r\n\r\nOK\r\n"),
        step("AT+CGMR", "AT+CGMR\r\nA011B04\r\n\r\nOK\r\n"),
        step("AT+CGSN", "AT+CGSN\r\n861234567890123\r\n\r\nOK\r\n"),
    ]
}

pub fn sim_steps() -> Vec<Step> {
    vec![
        step("AT+CPIN?", "\r\n+CPIN: READY\r\n\r\nOK\r\n"),
        step("AT+CSQ", "\r\n+CSQ: 21,0\r\n\r\nOK\r\n"),
        step("AT+CREG?", "\r\n+CREG: 0,1\r\n\r\nOK\r\n"),
    ]
}

pub fn bring_up_steps() -> Vec<Step> {
    vec![
        // Nothing open yet; the cleanup shrugs the errors off.
        step("AT+CIPCLOSE=0", "\r\nERROR\r\n"),
        step("AT+NETCLOSE", "\r\nERROR\r\n"),
        step("AT+CGACT?", "\r\n+CGACT: 1,1\r\n\r\nOK\r\n"),
        step("AT+NETOPEN", "\r\nOK\r\n"),
        step("AT+NETOPEN?", "\r\n+NETOPEN: 1\r\n\r\nOK\r\n"),
        step("AT+IPADDR", "\r\n+IPADDR: 10.44.2.7\r\n\r\nOK\r\n"),
    ]
}

pub fn handshake_steps() -> Vec<Step> {
    vec![
        step(
            "AT+CIPOPEN=0,\"TCP\",\"203.0.113.7\",8765",
            "\r\nOK\r\n+CIPOPEN: 0,0\r\n",
        ),
        step("AT+CIPSEND=0,", "\r\n> "),
        step(
            "GET / HTTP/1.1",
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n",
        ),
    ]
}

pub fn healthy_predicate_steps() -> Vec<Step> {
    vec![
        step("AT", "\r\nOK\r\n"),
        step("AT+CREG?", "\r\n+CREG: 0,1\r\n\r\nOK\r\n"),
        step("AT+CGACT?", "\r\n+CGACT: 1,1\r\n\r\nOK\r\n"),
        step("AT+NETOPEN?", "\r\n+NETOPEN: 1\r\n\r\nOK\r\n"),
    ]
}

pub fn frame_ack_steps() -> Vec<Step> {
    vec![step("AT+CIPSEND=0,", "\r\n> "), step("", "\r\nOK\r\n")]
}

pub fn frame_fail_steps() -> Vec<Step> {
    vec![step("AT+CIPSEND=0,", "\r\n> "), step("", "\r\nERROR\r\n")]
}

pub fn boot_steps() -> Vec<Step> {
    [probe_steps(), sim_steps(), bring_up_steps(), handshake_steps()]
        .into_iter()
        .flatten()
        .collect()
}
