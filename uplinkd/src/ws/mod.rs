//! WebSocket session establishment over an open modem.

use std::io::{Read, Write};

use tracing::{info, warn};
use uplink_wire as wire;

use crate::clock::Clock;
use crate::modem::Modem;
use crate::{LinkError, HANDSHAKE_REPLY_TIMEOUT};

/// The WebSocket endpoint the uplink talks to.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Run the full connection establishment: TCP socket, Upgrade request,
/// `101` confirmation. No retries here — recovery policy lives with the
/// supervisor.
pub fn establish<P: Read + Write, C: Clock>(
    modem: &mut Modem<P, C>,
    endpoint: &Endpoint,
) -> Result<(), LinkError> {
    modem.open_tcp(&endpoint.host, endpoint.port)?;
    let request =
        wire::upgrade_request(&endpoint.host, endpoint.port, wire::STATIC_KEY);
    let accepted = modem.send_expecting(
        request.as_bytes(),
        wire::SWITCHING_PROTOCOLS,
        HANDSHAKE_REPLY_TIMEOUT,
    )?;
    if !accepted {
        warn!("server did not switch protocols");
        return Err(LinkError::HandshakeRejected);
    }
    info!(host = %endpoint.host, port = endpoint.port, "websocket established");
    Ok(())
}
