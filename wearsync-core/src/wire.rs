//! Transport framing: `[u32 LE length][bincode Frame]`, one frame per transport message.
//! Bincode runs with fixed-width integers and rejects trailing bytes inside a frame.

use bincode::Options;

use crate::protocol::Frame;

/// Size of every length prefix on the wire (frames and payload segments).
pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode a frame with its length prefix. A `Message` that would not fit is reported
/// with its path so the caller can tell which exchange overflowed.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameEncodeError> {
    let len = codec().serialized_size(frame)?;
    if len > u64::from(MAX_FRAME_LEN) {
        return Err(match frame {
            Frame::Message { path, body } => FrameEncodeError::BodyTooLarge {
                path: path.clone(),
                len: body.len(),
            },
            Frame::Hello { .. } => FrameEncodeError::TooLarge { len },
        });
    }
    let mut out = Vec::with_capacity(LEN_SIZE + len as usize);
    out.extend_from_slice(&(len as u32).to_le_bytes());
    codec().serialize_into(&mut out, frame)?;
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("message body on {path} is {len} bytes, too large for one frame")]
    BodyTooLarge { path: String, len: usize },
    #[error("frame of {len} bytes exceeds the frame limit")]
    TooLarge { len: u64 },
}

/// Read the length prefix at the front of `bytes`, if complete.
pub fn frame_len(bytes: &[u8]) -> Result<usize, FrameDecodeError> {
    let Some(prefix) = bytes.get(..LEN_SIZE) else {
        return Err(FrameDecodeError::NeedMore);
    };
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Decode the bytes that follow a length prefix. They must hold exactly one frame.
pub fn decode_frame_body(body: &[u8]) -> Result<Frame, FrameDecodeError> {
    Ok(codec().deserialize(body)?)
}

/// Decode one frame from the front of a buffer. Returns the frame and the bytes consumed,
/// or `NeedMore` until the whole frame has arrived.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameDecodeError> {
    let len = frame_len(bytes)?;
    let Some(body) = bytes.get(LEN_SIZE..LEN_SIZE + len) else {
        return Err(FrameDecodeError::NeedMore);
    };
    Ok((decode_frame_body(body)?, LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
