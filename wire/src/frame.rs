use thiserror::Error;

/// Hard ceiling for a single frame's payload. Larger logical messages must
/// be split with [`chunks`] before framing.
pub const MAX_PAYLOAD: usize = 2048;

/// Slice size used when splitting a large message across frames. Sized to
/// what the modem moves through one `AT+CIPSEND` without choking.
pub const CHUNK_SIZE: usize = 1024;

const FIN: u8 = 0x80;
const MASKED: u8 = 0x80;

/// Frame types the uplink emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Ping = 0x9,
    Pong = 0xA,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD} byte frame limit")]
    PayloadTooLarge(usize),
}

/// XOR `data` in place with the 4-byte mask key. Applying the same key
/// twice restores the original bytes.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode one masked client frame.
///
/// Payloads up to 125 bytes use the short length form; longer ones carry
/// the 16-bit extended length. The mask key is supplied by the caller so
/// the output is deterministic under test.
pub fn encode(
    opcode: Opcode,
    payload: &[u8],
    key: [u8; 4],
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.push(FIN | opcode as u8);
    if payload.len() <= 125 {
        frame.push(MASKED | payload.len() as u8);
    } else {
        frame.push(MASKED | 126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    frame.extend_from_slice(&key);

    let body = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(&mut frame[body..], key);
    Ok(frame)
}

/// Split a message into frame-sized slices paired with their opcodes.
///
/// The bridge reassembles split messages by opcode alone: every slice but
/// the last is marked continuation, and only the last carries the text
/// opcode. The FIN bit is set on every slice by [`encode`].
pub fn chunks(message: &[u8]) -> impl Iterator<Item = (Opcode, &[u8])> {
    let count = message.chunks(CHUNK_SIZE).count();
    message
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(move |(i, slice)| {
            let opcode = if i + 1 == count {
                Opcode::Text
            } else {
                Opcode::Continuation
            };
            (opcode, slice)
        })
}
