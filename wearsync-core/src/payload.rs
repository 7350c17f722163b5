//! Payload codec: the forecast response body.
//!
//! Container is exactly three segments, each `[u32 LE length][bytes]`:
//! image, min temperature (UTF-8), max temperature (UTF-8).

use crate::forecast::ForecastSnapshot;
use crate::wire::LEN_SIZE;

/// Number of segments in every payload.
pub const SEGMENT_COUNT: usize = 3;

/// Largest segment either side will put on or accept from the wire.
pub const MAX_SEGMENT_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// The three raw segments of a forecast payload, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePayload {
    pub image: Vec<u8>,
    pub min_temp: Vec<u8>,
    pub max_temp: Vec<u8>,
}

impl WirePayload {
    /// Serialize into the length-prefixed container. Fails if any segment is larger than
    /// `decode` would accept.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let segments = [
            ("image", &self.image),
            ("min_temp", &self.min_temp),
            ("max_temp", &self.max_temp),
        ];
        let mut total = 0;
        for (field, segment) in segments {
            if segment.len() > MAX_SEGMENT_LEN as usize {
                return Err(EncodeError::SegmentTooLarge {
                    field,
                    len: segment.len(),
                });
            }
            total += LEN_SIZE + segment.len();
        }
        let mut out = Vec::with_capacity(total);
        for (_, segment) in segments {
            out.extend_from_slice(&(segment.len() as u32).to_le_bytes());
            out.extend_from_slice(segment);
        }
        Ok(out)
    }
}

/// Split a snapshot into its wire segments.
pub fn encode(snapshot: &ForecastSnapshot) -> WirePayload {
    WirePayload {
        image: snapshot.icon().to_vec(),
        min_temp: snapshot.min_temp().as_bytes().to_vec(),
        max_temp: snapshot.max_temp().as_bytes().to_vec(),
    }
}

/// Parse a container of exactly three segments.
pub fn decode(bytes: &[u8]) -> Result<WirePayload, DecodeError> {
    let mut rest = bytes;
    let mut segments: Vec<Vec<u8>> = Vec::with_capacity(SEGMENT_COUNT);
    for _ in 0..SEGMENT_COUNT {
        if rest.len() < LEN_SIZE {
            return Err(DecodeError::Truncated);
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        if len > MAX_SEGMENT_LEN {
            return Err(DecodeError::MalformedContainer);
        }
        let len = len as usize;
        rest = &rest[LEN_SIZE..];
        if rest.len() < len {
            return Err(DecodeError::Truncated);
        }
        segments.push(rest[..len].to_vec());
        rest = &rest[len..];
    }
    if !rest.is_empty() {
        return Err(DecodeError::MalformedContainer);
    }
    let max_temp = segments.pop().unwrap_or_default();
    let min_temp = segments.pop().unwrap_or_default();
    let image = segments.pop().unwrap_or_default();
    Ok(WirePayload {
        image,
        min_temp,
        max_temp,
    })
}

/// Error building a forecast payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{field} is {len} bytes, over the segment limit")]
    SegmentTooLarge { field: &'static str, len: usize },
}

/// Error decoding a forecast payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not a container of exactly 3 segments")]
    MalformedContainer,
    #[error("payload truncated")]
    Truncated,
    #[error("{field} is not valid UTF-8")]
    InvalidText { field: &'static str },
}

impl TryFrom<WirePayload> for ForecastSnapshot {
    type Error = DecodeError;

    fn try_from(payload: WirePayload) -> Result<Self, Self::Error> {
        let min_temp = String::from_utf8(payload.min_temp)
            .map_err(|_| DecodeError::InvalidText { field: "min_temp" })?;
        let max_temp = String::from_utf8(payload.max_temp)
            .map_err(|_| DecodeError::InvalidText { field: "max_temp" })?;
        Ok(ForecastSnapshot::new(payload.image, min_temp, max_temp))
    }
}

/// Decode a response body straight into a snapshot.
pub fn decode_snapshot(bytes: &[u8]) -> Result<ForecastSnapshot, DecodeError> {
    ForecastSnapshot::try_from(decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ForecastSnapshot {
        ForecastSnapshot::new(b"PNGDATA".to_vec(), "-2", "5")
    }

    #[test]
    fn snapshot_survives_the_wire() {
        let snap = ForecastSnapshot::new(vec![0x89, b'P', b'N', b'G', 0, 0xff], "−3°", "12 °C");
        let bytes = encode(&snap).to_bytes().unwrap();
        assert_eq!(decode_snapshot(&bytes).unwrap(), snap);
    }

    #[test]
    fn layout_is_three_length_prefixed_segments() {
        let bytes = encode(&sample()).to_bytes().unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&7u32.to_le_bytes());
        expected.extend_from_slice(b"PNGDATA");
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"-2");
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(b"5");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn empty_temperatures_are_valid() {
        let snap = ForecastSnapshot::new(b"img".to_vec(), "", "");
        let payload = decode(&encode(&snap).to_bytes().unwrap()).unwrap();
        assert!(payload.min_temp.is_empty());
        assert!(payload.max_temp.is_empty());
        assert_eq!(ForecastSnapshot::try_from(payload).unwrap(), snap);
    }

    #[test]
    fn encoding_twice_decodes_equal() {
        let snap = sample();
        let a = decode_snapshot(&encode(&snap).to_bytes().unwrap()).unwrap();
        let b = decode_snapshot(&encode(&snap).to_bytes().unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn every_truncation_is_rejected() {
        let bytes = encode(&sample()).to_bytes().unwrap();
        for cut in 0..bytes.len() {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, DecodeError::Truncated | DecodeError::MalformedContainer),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn length_prefix_past_end_is_truncated() {
        let mut bytes = encode(&sample()).to_bytes().unwrap();
        bytes[0..4].copy_from_slice(&1000u32.to_le_bytes());
        assert_eq!(decode(&bytes), Err(DecodeError::Truncated));
    }

    #[test]
    fn trailing_segment_is_malformed() {
        let mut bytes = encode(&sample()).to_bytes().unwrap();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(decode(&bytes), Err(DecodeError::MalformedContainer));
    }

    #[test]
    fn oversized_segment_is_malformed() {
        let bytes = (MAX_SEGMENT_LEN + 1).to_le_bytes();
        assert_eq!(decode(&bytes), Err(DecodeError::MalformedContainer));
    }

    #[test]
    fn largest_segment_round_trips() {
        let snap = ForecastSnapshot::new(vec![7; MAX_SEGMENT_LEN as usize], "-2", "5");
        let bytes = encode(&snap).to_bytes().unwrap();
        assert_eq!(decode_snapshot(&bytes).unwrap(), snap);
    }

    #[test]
    fn segment_over_limit_is_not_encoded() {
        let len = MAX_SEGMENT_LEN as usize + 1;
        let snap = ForecastSnapshot::new(vec![7; len], "-2", "5");
        assert_eq!(
            encode(&snap).to_bytes(),
            Err(EncodeError::SegmentTooLarge { field: "image", len })
        );

        let payload = WirePayload {
            image: Vec::new(),
            min_temp: Vec::new(),
            max_temp: vec![b'9'; len],
        };
        assert!(matches!(
            payload.to_bytes(),
            Err(EncodeError::SegmentTooLarge { field: "max_temp", .. })
        ));
    }

    #[test]
    fn ready_sentinel_is_not_a_payload() {
        assert!(decode(crate::protocol::READY_REQUEST).is_err());
    }

    #[test]
    fn invalid_utf8_temperature() {
        let payload = WirePayload {
            image: b"img".to_vec(),
            min_temp: vec![0xff, 0xfe],
            max_temp: b"5".to_vec(),
        };
        let err = decode_snapshot(&payload.to_bytes().unwrap()).unwrap_err();
        assert_eq!(err, DecodeError::InvalidText { field: "min_temp" });
    }
}
