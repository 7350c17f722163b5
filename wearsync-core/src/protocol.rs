//! Wire contract shared by phone and watch: message path, request sentinel, transport frames.

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Current transport protocol version. Sent in the Hello handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Path every exchange message travels on. Must match byte-for-byte on both peers.
pub const MESSAGE_PATH: &str = "/wearable/data/sunshine/1726356709";

/// Request body the watch sends when it wants today's forecast.
pub const READY_REQUEST: &[u8] = b"ready";

/// True if `body` is exactly the ready sentinel.
pub fn is_ready_request(body: &[u8]) -> bool {
    body == READY_REQUEST
}

/// Transport-level frames. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame on every connection, in both directions.
    Hello {
        protocol_version: u8,
        peer_id: PeerId,
    },
    /// A message on a logical path.
    Message { path: String, body: Vec<u8> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_must_match_exactly() {
        assert!(is_ready_request(b"ready"));
        assert!(!is_ready_request(b"ready\n"));
        assert!(!is_ready_request(b"READY"));
        assert!(!is_ready_request(b""));
    }
}
