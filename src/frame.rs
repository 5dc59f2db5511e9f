//! Binary frame codec for the local-socket transport
//!
//! Wire format (little-endian):
//!
//! ```text
//! offset 0: i32  opcode   (0=HANDSHAKE, 1=FRAME, 2=CLOSE, 3=PING, 4=PONG)
//! offset 4: i32  length   (byte length of payload)
//! offset 8: ...  payload  (UTF-8 JSON document, length bytes)
//! ```
//!
//! The decoder is an accumulator buffer with an iterative drain loop: a
//! single socket read may carry zero, one, or many frames, and a frame may
//! span many reads.

use bytes::{Buf, BytesMut};
use serde_json::Value;

use crate::error::{Result, RpcError};

/// Byte length of the opcode + length header
const HEADER_LEN: usize = 8;

/// Upper bound on a declared payload length; larger frames are rejected
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl OpCode {
    fn from_wire(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(OpCode::Handshake),
            1 => Ok(OpCode::Frame),
            2 => Ok(OpCode::Close),
            3 => Ok(OpCode::Ping),
            4 => Ok(OpCode::Pong),
            other => Err(RpcError::Decode {
                message: format!("unknown opcode {other}"),
            }),
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub op: OpCode,
    pub payload: Value,
}

/// Encode a single frame: 8-byte header followed by the JSON payload
pub fn encode(op: OpCode, payload: &Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(payload)?;
    let mut packet = Vec::with_capacity(HEADER_LEN + body.len());
    packet.extend_from_slice(&(op as i32).to_le_bytes());
    packet.extend_from_slice(&(body.len() as i32).to_le_bytes());
    packet.extend_from_slice(&body);
    Ok(packet)
}

/// Incremental frame decoder
///
/// Feed bytes into [`FrameDecoder::buffer_mut`] (or [`FrameDecoder::extend`])
/// and drain complete frames with [`FrameDecoder::next_frame`] until it
/// returns `None`. Partial headers and payloads are buffered across reads;
/// no bytes are dropped between frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// Parsed header of the frame currently being accumulated
    header: Option<(OpCode, usize)>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator the transport reads socket bytes into
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Append raw bytes to the accumulator
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if one is fully buffered
    ///
    /// A payload that fails to parse as JSON once its full declared length
    /// has arrived is a hard decode error.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.header.is_none() {
            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }
            let mut header = &self.buf[..HEADER_LEN];
            let op = OpCode::from_wire(header.get_i32_le())?;
            let declared = header.get_i32_le();
            if declared < 0 || declared as usize > MAX_PAYLOAD_LEN {
                return Err(RpcError::Decode {
                    message: format!("declared payload length {declared} out of range"),
                });
            }
            self.buf.advance(HEADER_LEN);
            self.header = Some((op, declared as usize));
        }

        let (op, len) = match self.header {
            Some(header) => header,
            None => return Ok(None),
        };
        if self.buf.len() < len {
            // wait for the rest of the payload
            return Ok(None);
        }

        let raw = self.buf.split_to(len);
        self.header = None;
        let payload: Value = serde_json::from_slice(&raw).map_err(|err| RpcError::Decode {
            message: format!("invalid payload JSON: {err}"),
        })?;
        Ok(Some(Frame { op, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn round_trip_all_opcodes() {
        let payload = json!({"cmd": "DISPATCH", "evt": "READY", "data": {"v": 1}});
        for op in [
            OpCode::Handshake,
            OpCode::Frame,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            let encoded = encode(op, &payload).unwrap();
            let mut decoder = FrameDecoder::new();
            decoder.extend(&encoded);
            let frame = decoder.next_frame().unwrap().unwrap();
            assert_eq!(frame.op, op);
            assert_eq!(frame.payload, payload);
            assert!(decoder.next_frame().unwrap().is_none());
        }
    }

    #[test]
    fn fragmentation_is_invariant() {
        let mut stream = Vec::new();
        let payloads = [
            json!({"n": 1}),
            json!({"n": 2, "text": "hello world"}),
            json!({"n": 3, "nested": {"deep": [1, 2, 3]}}),
        ];
        for payload in &payloads {
            stream.extend_from_slice(&encode(OpCode::Frame, payload).unwrap());
        }

        // whole stream at once
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let all_at_once = drain(&mut decoder);

        // one byte at a time
        let mut decoder = FrameDecoder::new();
        let mut byte_by_byte = Vec::new();
        for byte in &stream {
            decoder.extend(std::slice::from_ref(byte));
            byte_by_byte.extend(drain(&mut decoder));
        }

        assert_eq!(all_at_once.len(), 3);
        assert_eq!(all_at_once, byte_by_byte);
        for (frame, payload) in all_at_once.iter().zip(&payloads) {
            assert_eq!(&frame.payload, payload);
        }
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut stream = encode(OpCode::Ping, &json!("a")).unwrap();
        stream.extend_from_slice(&encode(OpCode::Frame, &json!({"b": 2})).unwrap());
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].op, OpCode::Ping);
        assert_eq!(frames[1].op, OpCode::Frame);
    }

    #[test]
    fn header_split_across_reads() {
        let encoded = encode(OpCode::Frame, &json!({"k": "v"})).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded[..5]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&encoded[5..]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload, json!({"k": "v"}));
    }

    #[test]
    fn invalid_json_after_full_length_is_an_error() {
        let body = b"not json";
        let mut stream = Vec::new();
        stream.extend_from_slice(&1i32.to_le_bytes());
        stream.extend_from_slice(&(body.len() as i32).to_le_bytes());
        stream.extend_from_slice(body);
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let err = decoder.next_frame().unwrap_err();
        assert!(matches!(err, RpcError::Decode { .. }));
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&9i32.to_le_bytes());
        stream.extend_from_slice(&2i32.to_le_bytes());
        stream.extend_from_slice(b"{}");
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        assert!(matches!(
            decoder.next_frame(),
            Err(RpcError::Decode { .. })
        ));
    }

    #[test]
    fn oversized_declared_length_is_an_error() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&1i32.to_le_bytes());
        stream.extend_from_slice(&i32::MAX.to_le_bytes());
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        assert!(matches!(
            decoder.next_frame(),
            Err(RpcError::Decode { .. })
        ));
    }

    #[test]
    fn incomplete_payload_waits_for_more_data() {
        let encoded = encode(OpCode::Frame, &json!({"key": "a longer value"})).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded[..encoded.len() - 1]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&encoded[encoded.len() - 1..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }
}
