//! Liveness tracking and the reconnection ladder.
//!
//! Recovery escalates through tiers: re-handshake over a network that
//! still checks out, full teardown and rebuild, and finally the hardware
//! reset. The consecutive-error counter only ever moves up, or back to
//! zero on a complete success.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uplink_wire::{self as wire, Opcode};

use crate::clock::Clock;
use crate::modem::Modem;
use crate::publisher;
use crate::ws::{self, Endpoint};
use crate::{
    LinkError, INTER_CHUNK_DELAY, LIVENESS_TIMEOUT, MAX_INIT_ATTEMPTS,
    MAX_RETRIES, PING_INTERVAL, RECONNECT_DELAY,
};

/// Idle pause between control-loop iterations.
const LOOP_TICK: Duration = Duration::from_millis(10);

/// What a recorded failure asks the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Try to reconnect: soft first, then the full rebuild.
    Recover,
    /// The ladder is exhausted; reset the hardware.
    Reset,
}

/// Consecutive-error counter and liveness timestamp.
///
/// Pure state: transitions are driven by the supervisor, and the rules
/// are small enough to pin down in unit tests.
#[derive(Debug, Clone)]
pub struct EscalationState {
    error_count: u32,
    last_exchange: Instant,
}

impl EscalationState {
    pub fn new(now: Instant) -> Self {
        Self {
            error_count: 0,
            last_exchange: now,
        }
    }

    /// Count a failure. At [`MAX_RETRIES`] consecutive failures the
    /// answer becomes [`Escalation::Reset`] and the counter pins at the
    /// maximum.
    pub fn record_failure(&mut self) -> Escalation {
        self.error_count = (self.error_count + 1).min(MAX_RETRIES);
        if self.error_count >= MAX_RETRIES {
            Escalation::Reset
        } else {
            Escalation::Recover
        }
    }

    /// A fully successful operation clears the counter and refreshes the
    /// liveness window.
    pub fn record_success(&mut self, now: Instant) {
        self.error_count = 0;
        self.last_exchange = now;
    }

    /// Data moved without constituting a full success (inbound bytes).
    pub fn mark_exchange(&mut self, now: Instant) {
        self.last_exchange = now;
    }

    /// Pin the counter at the maximum (a failed hard reconnect).
    pub fn force_max(&mut self) {
        self.error_count = MAX_RETRIES;
    }

    pub fn liveness_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_exchange) >= LIVENESS_TIMEOUT
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

/// Last resort once the escalation ladder is exhausted.
pub trait Reset {
    fn hard_reset(&mut self);
}

/// Production reset: exit so the service manager power-cycles the modem
/// and restarts the daemon from a clean boot.
#[derive(Debug, Default)]
pub struct ServiceExit;

impl Reset for ServiceExit {
    fn hard_reset(&mut self) {
        error!("escalation exhausted, exiting for a supervised restart");
        std::process::exit(1);
    }
}

/// Cadence bookkeeping for the control loop.
#[derive(Debug)]
pub struct LoopTimers {
    pub last_message: Instant,
    pub last_ping: Instant,
}

impl LoopTimers {
    pub fn new(now: Instant) -> Self {
        Self {
            last_message: now,
            last_ping: now,
        }
    }
}

pub struct LinkSupervisor<P, C, R> {
    modem: Modem<P, C>,
    clock: C,
    reset: R,
    endpoint: Endpoint,
    state: EscalationState,
    established: bool,
}

impl<P: Read + Write, C: Clock, R: Reset> LinkSupervisor<P, C, R> {
    pub fn new(port: P, clock: C, reset: R, endpoint: Endpoint) -> Self {
        let state = EscalationState::new(clock.now());
        Self {
            modem: Modem::new(port, clock.clone()),
            clock,
            reset,
            endpoint,
            state,
            established: false,
        }
    }

    pub fn established(&self) -> bool {
        self.established
    }

    pub fn error_count(&self) -> u32 {
        self.state.error_count()
    }

    /// Full cold start: identify the module, check the SIM, bring the
    /// network up and connect. Exhausting the attempts resets the
    /// hardware.
    pub fn boot(&mut self) -> Result<(), LinkError> {
        for attempt in 1..=MAX_INIT_ATTEMPTS {
            info!(attempt, max = MAX_INIT_ATTEMPTS, "initializing uplink");
            match self.cold_start() {
                Ok(()) => return Ok(()),
                Err(error) => warn!(%error, "initialization attempt failed"),
            }
            self.clock.sleep(RECONNECT_DELAY);
        }
        error!("initialization failed after maximum attempts");
        self.state.force_max();
        self.reset.hard_reset();
        Err(LinkError::ResetRequested)
    }

    fn cold_start(&mut self) -> Result<(), LinkError> {
        self.modem.probe()?;
        self.modem.check_sim()?;
        self.modem.bring_up()?;
        self.establish()
    }

    /// Handshake and mark the session live.
    fn establish(&mut self) -> Result<(), LinkError> {
        self.established = false;
        ws::establish(&mut self.modem, &self.endpoint)?;
        self.established = true;
        self.state.record_success(self.clock.now());
        Ok(())
    }

    /// Send one frame. A transport failure invalidates the session and
    /// routes into the escalation ladder before the failure is returned;
    /// an oversized payload is refused without touching the modem.
    pub fn send_frame(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        if !self.established {
            return Err(LinkError::NotEstablished);
        }
        let frame = wire::encode(opcode, payload, rand::random())?;
        match self.modem.send_payload(&frame) {
            Ok(()) => {
                self.state.record_success(self.clock.now());
                Ok(())
            }
            Err(error) => {
                warn!(%error, "frame send failed");
                self.established = false;
                self.handle_failure()?;
                Err(LinkError::FrameNotAcked)
            }
        }
    }

    /// Send a text message, splitting it across frames when it exceeds a
    /// single frame's chunk budget. Aborts on the first failed chunk; the
    /// peer sees a truncated sequence, never a reordered one.
    pub fn send_text(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if bytes.len() <= wire::CHUNK_SIZE {
            return self.send_frame(Opcode::Text, bytes);
        }
        let mut parts = wire::chunks(bytes).peekable();
        while let Some((opcode, slice)) = parts.next() {
            self.send_frame(opcode, slice)?;
            if parts.peek().is_some() {
                self.clock.sleep(INTER_CHUNK_DELAY);
            }
        }
        Ok(())
    }

    /// Publish a single named value.
    pub fn publish(&mut self, name: &str, value: f64) -> Result<(), LinkError> {
        let json = publisher::point(name, value)?;
        self.send_frame(Opcode::Text, json.as_bytes())
    }

    /// Publish a batch of up to [`crate::MAX_BATCH_POINTS`] named values.
    pub fn publish_batch(
        &mut self,
        points: &[(String, f64)],
    ) -> Result<(), LinkError> {
        let json = publisher::batch(points)?;
        debug!(points = points.len(), bytes = json.len(), "publishing batch");
        self.send_text(json.as_bytes())
    }

    fn send_ping(&mut self) -> Result<(), LinkError> {
        self.send_frame(Opcode::Ping, b"ping")
    }

    fn send_pong(&mut self) -> Result<(), LinkError> {
        self.send_frame(Opcode::Pong, b"pong")
    }

    /// Route a failure through the ladder: count it, reconnect, and reset
    /// once the ladder is exhausted or the rebuild itself fails.
    fn handle_failure(&mut self) -> Result<(), LinkError> {
        match self.state.record_failure() {
            Escalation::Reset => {
                error!(
                    errors = self.state.error_count(),
                    "error limit reached, resetting"
                );
                self.reset.hard_reset();
                Err(LinkError::ResetRequested)
            }
            Escalation::Recover => {
                warn!(
                    errors = self.state.error_count(),
                    max = MAX_RETRIES,
                    "connection error"
                );
                if self.reconnect() {
                    Ok(())
                } else {
                    self.state.force_max();
                    error!("reconnection failed, resetting");
                    self.reset.hard_reset();
                    Err(LinkError::ResetRequested)
                }
            }
        }
    }

    /// Tier 1: if the network still checks out, only the websocket needs
    /// re-establishing. Tier 2: tear everything down and rebuild, up to
    /// [`MAX_INIT_ATTEMPTS`] times.
    fn reconnect(&mut self) -> bool {
        info!("checking connection health");
        match self.modem.verify_link() {
            Ok(()) => {
                info!("network healthy, re-establishing websocket");
                if self.establish().is_ok() {
                    return true;
                }
            }
            Err(error) => info!(%error, "network unhealthy"),
        }

        info!("falling back to a full network rebuild");
        self.modem.teardown();
        self.clock.sleep(RECONNECT_DELAY);
        for attempt in 1..=MAX_INIT_ATTEMPTS {
            info!(attempt, max = MAX_INIT_ATTEMPTS, "reconnection attempt");
            if self.modem.bring_up().is_ok() && self.establish().is_ok() {
                info!("reconnection successful");
                return true;
            }
            self.clock.sleep(RECONNECT_DELAY);
        }
        warn!("reconnection failed");
        false
    }

    /// One control-loop iteration: liveness first, then inbound traffic,
    /// then the periodic publishes.
    pub fn service<F>(
        &mut self,
        timers: &mut LoopTimers,
        message_interval: Duration,
        sample: &mut F,
    ) -> Result<(), LinkError>
    where
        F: FnMut() -> Vec<(String, f64)>,
    {
        if self.state.liveness_expired(self.clock.now()) {
            warn!(window = ?LIVENESS_TIMEOUT, "no data exchanged within the liveness window");
            self.established = false;
            self.handle_failure()?;
            self.state.mark_exchange(self.clock.now());
            return Ok(());
        }

        self.pump_inbound()?;

        if self.clock.now().duration_since(timers.last_message) >= message_interval
        {
            let batch = sample();
            if let Err(error) = self.publish_batch(&batch) {
                if matches!(error, LinkError::ResetRequested) {
                    return Err(error);
                }
                warn!(%error, "batch publish failed");
            }
            timers.last_message = self.clock.now();
        }

        if self.clock.now().duration_since(timers.last_ping) >= PING_INTERVAL {
            if let Err(error) = self.send_ping() {
                if matches!(error, LinkError::ResetRequested) {
                    return Err(error);
                }
                warn!(%error, "keepalive ping failed");
            }
            timers.last_ping = self.clock.now();
        }

        Ok(())
    }

    /// Handle unsolicited inbound bytes: socket-close or error reports
    /// escalate, pings get answered, any traffic at all refreshes the
    /// liveness window.
    fn pump_inbound(&mut self) -> Result<(), LinkError> {
        let inbound = match self.modem.drain() {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "inbound drain failed");
                self.established = false;
                return self.handle_failure();
            }
        };
        if inbound.is_empty() {
            return Ok(());
        }
        debug!(bytes = inbound.len(), "inbound traffic");
        self.state.mark_exchange(self.clock.now());

        if inbound.contains("+IPCLOSE") || inbound.contains("ERROR") {
            warn!("peer closed the socket or the modem reported an error");
            self.established = false;
            return self.handle_failure();
        }
        if inbound.contains("ping") {
            if let Err(error) = self.send_pong() {
                if matches!(error, LinkError::ResetRequested) {
                    return Err(error);
                }
                warn!(%error, "pong reply failed");
            }
        }
        Ok(())
    }

    /// Run the control loop until a reset is requested.
    pub fn run<F>(
        &mut self,
        message_interval: Duration,
        mut sample: F,
    ) -> Result<(), LinkError>
    where
        F: FnMut() -> Vec<(String, f64)>,
    {
        let mut timers = LoopTimers::new(self.clock.now());
        loop {
            self.service(&mut timers, message_interval, &mut sample)?;
            self.clock.sleep(LOOP_TICK);
        }
    }
}
