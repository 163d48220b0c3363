//! Cellular WebSocket telemetry uplink.
//!
//! Keeps a WebSocket session alive across a SIMCom-dialect modem that only
//! exposes a line-oriented AT command port, and publishes batched telemetry
//! over that session. The modem offers no socket abstraction, so the TCP
//! connect, the HTTP upgrade and every frame all travel through the same
//! single-outstanding-command AT transport; recovery from any failure runs
//! through the supervisor's escalation ladder, ending in a hardware reset.

use std::time::Duration;

use thiserror::Error;

pub mod at;
pub mod clock;
pub mod modem;
pub mod publisher;
pub mod supervisor;
pub mod ws;

/// Default wait for an AT command's terminator.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);
/// Wait for PDP activation, network open and TCP connect commands.
pub const NET_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait for the asynchronous socket-open report after `AT+CIPOPEN`.
pub const CONNECT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);
/// Wait for the `>` payload prompt after `AT+CIPSEND`.
pub const SEND_PROMPT_TIMEOUT: Duration = Duration::from_millis(1500);
/// Window scanned for the server's handshake reply.
pub const HANDSHAKE_REPLY_TIMEOUT: Duration = Duration::from_millis(500);
/// Wait for the modem to acknowledge a transmitted frame.
pub const FRAME_ACK_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(500);
/// Pause between chunks of a split message.
pub const INTER_CHUNK_DELAY: Duration = Duration::from_millis(50);
/// No successful exchange for this long counts as a connection failure.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);
/// Keepalive ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(15);
/// Consecutive errors tolerated before the hardware reset fires.
pub const MAX_RETRIES: u32 = 5;
/// Full bring-up + handshake cycles per hard reconnect, and at boot.
pub const MAX_INIT_ATTEMPTS: u32 = 3;
/// Upper bound on points in one batch publish.
pub const MAX_BATCH_POINTS: usize = 50;

/// Failure classes of the uplink. All of them funnel into the supervisor's
/// escalation ladder; none carry recovery semantics of their own.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("serial transport: {0}")]
    Io(#[from] std::io::Error),
    #[error("modem response overflowed the receive buffer")]
    ResponseOverflow,
    #[error("no reply to {command:?} before the deadline")]
    CommandTimeout { command: String },
    #[error("modem rejected {command:?}")]
    ModemRejected { command: String },
    #[error("network not ready: {0}")]
    NetworkUnready(&'static str),
    #[error("server did not accept the websocket upgrade")]
    HandshakeRejected,
    #[error("frame transmission not acknowledged")]
    FrameNotAcked,
    #[error(transparent)]
    Frame(#[from] uplink_wire::FrameError),
    #[error("payload serialization: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("websocket session not established")]
    NotEstablished,
    #[error("batch of {0} points exceeds the {MAX_BATCH_POINTS} point limit")]
    BatchTooLarge(usize),
    #[error("hardware reset requested")]
    ResetRequested,
}
