//! Length-prefixed packet framing.
//!
//! Every packet on the wire is a 4-byte little-endian payload length followed
//! by the payload bytes; the prefix counts only the payload. Framing is
//! payload-agnostic, and reassembly is incremental so it tolerates arbitrary
//! TCP segmentation: a single read may deliver less than one packet or
//! several packets concatenated.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Size of the wire header: the 4-byte length prefix.
pub const HEADER_LEN: usize = 4;

/// Payloads below this size are framed into a single write buffer; larger
/// payloads have their header written separately to avoid the copy.
pub(crate) const INLINE_FRAME_LIMIT: usize = 1020;

/// Encode `payload` into its on-wire form.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Incremental receive-side packet reassembler.
///
/// Bytes are appended as they come off the socket; complete packets are taken
/// out once the declared length is fully buffered. A declared length of zero
/// doubles as the "not yet decoded" sentinel and is re-derived from the first
/// four buffered bytes whenever at least a header is present, which is
/// harmless for genuinely empty packets since re-deriving yields zero again.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buf: BytesMut,
    declared: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the wire and refresh the cached length.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.update_declared(false);
    }

    /// True once a complete packet is buffered.
    pub fn has_packet(&self) -> bool {
        self.buf.len() >= self.declared + HEADER_LEN
    }

    /// Take the next complete packet out of the accumulator.
    ///
    /// Fails with [`TransportError::NoPacket`] when no complete packet is
    /// buffered; the accumulator is left untouched in that case.
    pub fn take_packet(&mut self) -> Result<Bytes> {
        if !self.has_packet() {
            return Err(TransportError::NoPacket);
        }
        self.buf.advance(HEADER_LEN);
        let packet = self.buf.split_to(self.declared).freeze();
        self.update_declared(true);
        Ok(packet)
    }

    /// Take the next packet if one is complete.
    pub fn pop_packet(&mut self) -> Option<Bytes> {
        if self.has_packet() {
            self.take_packet().ok()
        } else {
            None
        }
    }

    fn update_declared(&mut self, force: bool) {
        if force || self.declared == 0 {
            self.declared = 0;
            if self.buf.len() >= HEADER_LEN {
                self.declared =
                    u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                        as usize;
            }
        }
    }
}
