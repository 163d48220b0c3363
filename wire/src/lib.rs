//! Client-side WebSocket wire format for the cellular uplink.
//!
//! Only the pieces the send path needs: masked client frames with 7-bit
//! and 16-bit length encoding, chunk splitting for large messages, and the
//! HTTP Upgrade request. Inbound traffic is handled as raw marker scanning
//! by the daemon, so there is no frame decoder here.

mod frame;
mod handshake;

pub use frame::{
    apply_mask, chunks, encode, FrameError, Opcode, CHUNK_SIZE, MAX_PAYLOAD,
};
pub use handshake::{upgrade_request, STATIC_KEY, SWITCHING_PROTOCOLS};
