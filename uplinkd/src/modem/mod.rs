//! SIMCom network control over the AT transport.
//!
//! Network state is never cached here: the modem can lose the carrier at
//! any moment, so every predicate re-queries it.

use std::io::{Read, Write};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::at::response::{AtLine, Reply};
use crate::at::AtTransport;
use crate::clock::Clock;
use crate::{
    LinkError, COMMAND_TIMEOUT, CONNECT_CONFIRM_TIMEOUT, FRAME_ACK_TIMEOUT,
    NET_COMMAND_TIMEOUT, SEND_PROMPT_TIMEOUT,
};

/// Attempts for the responsiveness probe, PDP activation and stack open.
const SETUP_ATTEMPTS: u32 = 3;
/// Pause between those attempts.
const SETUP_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Socket and stack close commands get one generous second each.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Modem<P, C> {
    at: AtTransport<P, C>,
    clock: C,
}

impl<P: Read + Write, C: Clock> Modem<P, C> {
    pub fn new(port: P, clock: C) -> Self {
        Self {
            at: AtTransport::new(port, clock.clone()),
            clock,
        }
    }

    /// Probe the module and log its identity. A module that never answers
    /// `AT` is unusable.
    pub fn probe(&mut self) -> Result<(), LinkError> {
        for attempt in 1..=SETUP_ATTEMPTS {
            if self.at.command("AT", COMMAND_TIMEOUT)?.is_ok() {
                let model = self.at.command("AT+CGMM", COMMAND_TIMEOUT)?;
                let firmware = self.at.command("AT+CGMR", COMMAND_TIMEOUT)?;
                let imei = self.at.command("AT+CGSN", COMMAND_TIMEOUT)?;
                info!(
                    model = %first_payload(&model),
                    firmware = %first_payload(&firmware),
                    imei = %first_payload(&imei),
                    "modem identified"
                );
                return Ok(());
            }
            debug!(attempt, "module not answering");
            if attempt < SETUP_ATTEMPTS {
                self.clock.sleep(SETUP_RETRY_DELAY);
            }
        }
        warn!("module not responding");
        Err(LinkError::CommandTimeout {
            command: "AT".into(),
        })
    }

    /// SIM present and network registration in place.
    pub fn check_sim(&mut self) -> Result<(), LinkError> {
        let pin = self.at.command("AT+CPIN?", COMMAND_TIMEOUT)?;
        if !pin.has_status("CPIN", "READY") {
            return Err(LinkError::NetworkUnready("SIM not ready"));
        }
        let signal = self.at.command("AT+CSQ", COMMAND_TIMEOUT)?;
        debug!(csq = %signal.value_of("CSQ").unwrap_or_default(), "signal quality");
        if !self.registered()? {
            return Err(LinkError::NetworkUnready("not registered on the network"));
        }
        Ok(())
    }

    fn registered(&mut self) -> Result<bool, LinkError> {
        let reg = self.at.command("AT+CREG?", COMMAND_TIMEOUT)?;
        // 0,1 home network, 0,5 roaming.
        Ok(reg.has_status("CREG", "0,1") || reg.has_status("CREG", "0,5"))
    }

    /// Tear down any socket and the network stack. Failures are ignored;
    /// this must work on a modem in any state.
    pub fn teardown(&mut self) {
        let _ = self.at.command("AT+CIPCLOSE=0", CLOSE_TIMEOUT);
        let _ = self.at.command("AT+NETCLOSE", CLOSE_TIMEOUT);
    }

    /// Bring the packet-data side up: active PDP context, open network
    /// stack, assigned IP. Hard failure once the bounded retries are
    /// spent; escalation is the caller's business.
    pub fn bring_up(&mut self) -> Result<(), LinkError> {
        info!("bringing up the network");
        self.teardown();
        self.clock.sleep(SETUP_RETRY_DELAY);

        let pdp = self.at.command("AT+CGACT?", COMMAND_TIMEOUT)?;
        if !pdp.has_status("CGACT", "1,1") {
            self.activate_pdp()?;
        }

        for attempt in 1..=SETUP_ATTEMPTS {
            let _ = self.at.command("AT+NETOPEN", NET_COMMAND_TIMEOUT)?;
            let status = self.at.command("AT+NETOPEN?", COMMAND_TIMEOUT)?;
            if status.has_status("NETOPEN", "1") {
                let ip = self.at.command("AT+IPADDR", COMMAND_TIMEOUT)?;
                if let Some(address) = ip.value_of("IPADDR") {
                    info!(attempt, %address, "network stack open");
                    return Ok(());
                }
            }
            if attempt < SETUP_ATTEMPTS {
                self.clock.sleep(SETUP_RETRY_DELAY);
            }
        }
        warn!("network stack failed to open");
        Err(LinkError::NetworkUnready("network stack failed to open"))
    }

    fn activate_pdp(&mut self) -> Result<(), LinkError> {
        for attempt in 1..=SETUP_ATTEMPTS {
            if self
                .at
                .command("AT+CGACT=1,1", NET_COMMAND_TIMEOUT)?
                .is_ok()
            {
                info!(attempt, "PDP context activated");
                return Ok(());
            }
            if attempt < SETUP_ATTEMPTS {
                self.clock.sleep(SETUP_RETRY_DELAY);
            }
        }
        warn!("PDP context activation failed");
        Err(LinkError::NetworkUnready("PDP context activation failed"))
    }

    /// The four health predicates checked before a soft reconnect, in
    /// cheapest-first order. Nothing is torn down on the way.
    pub fn verify_link(&mut self) -> Result<(), LinkError> {
        if !self.at.command("AT", COMMAND_TIMEOUT)?.is_ok() {
            return Err(LinkError::NetworkUnready("module not responding"));
        }
        if !self.registered()? {
            return Err(LinkError::NetworkUnready("not registered on the network"));
        }
        if !self
            .at
            .command("AT+CGACT?", COMMAND_TIMEOUT)?
            .has_status("CGACT", "1,1")
        {
            return Err(LinkError::NetworkUnready("PDP context inactive"));
        }
        if !self
            .at
            .command("AT+NETOPEN?", COMMAND_TIMEOUT)?
            .has_status("NETOPEN", "1")
        {
            return Err(LinkError::NetworkUnready("network stack closed"));
        }
        Ok(())
    }

    /// Open TCP socket 0 to the endpoint and wait for the modem's
    /// asynchronous connect confirmation.
    pub fn open_tcp(&mut self, host: &str, port: u16) -> Result<(), LinkError> {
        let command = format!("AT+CIPOPEN=0,\"TCP\",\"{host}\",{port}");
        let reply = self.at.command(&command, NET_COMMAND_TIMEOUT)?;
        reply.require_ok(&command)?;
        // The OK only acknowledges the request; connect completion arrives
        // as a separate +CIPOPEN report, sometimes racing ahead of the OK.
        if !reply.contains("+CIPOPEN: 0,0") {
            let confirm =
                self.at.wait_for("+CIPOPEN: 0,0", CONNECT_CONFIRM_TIMEOUT)?;
            if !confirm.contains("+CIPOPEN: 0,0") {
                return Err(LinkError::NetworkUnready("TCP connect not confirmed"));
            }
        }
        debug!(host, port, "TCP socket open");
        Ok(())
    }

    /// Push `data` through socket 0: announce the length, wait for the
    /// payload prompt, write the raw bytes, wait for the modem's verdict.
    pub fn send_payload(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let command = format!("AT+CIPSEND=0,{}", data.len());
        let prompt = self.at.command_until(&command, ">", SEND_PROMPT_TIMEOUT)?;
        if !prompt.has_prompt() {
            warn!(%command, "no payload prompt");
            return Err(LinkError::FrameNotAcked);
        }
        self.at.write_raw(data)?;
        if self.at.await_terminator(FRAME_ACK_TIMEOUT)?.is_ok() {
            Ok(())
        } else {
            Err(LinkError::FrameNotAcked)
        }
    }

    /// Like [`Self::send_payload`], but the reply window is scanned for
    /// `marker` instead of an OK — the HTTP upgrade answer has no AT
    /// framing around it.
    pub fn send_expecting(
        &mut self,
        data: &[u8],
        marker: &str,
        window: Duration,
    ) -> Result<bool, LinkError> {
        let command = format!("AT+CIPSEND=0,{}", data.len());
        let prompt = self.at.command_until(&command, ">", SEND_PROMPT_TIMEOUT)?;
        if !prompt.has_prompt() {
            warn!(%command, "no payload prompt");
            return Err(LinkError::FrameNotAcked);
        }
        self.at.write_raw(data)?;
        Ok(self.at.wait_for(marker, window)?.contains(marker))
    }

    /// Drain unsolicited modem output.
    pub fn drain(&mut self) -> Result<String, LinkError> {
        self.at.read_available()
    }
}

/// First line of a reply that is neither an echo nor a status or
/// terminator — where identity queries put their answer.
fn first_payload(reply: &Reply) -> String {
    reply
        .lines()
        .find_map(|line| match line {
            AtLine::Unrecognized(text) if !text.starts_with("AT") => Some(text),
            _ => None,
        })
        .unwrap_or_default()
}
