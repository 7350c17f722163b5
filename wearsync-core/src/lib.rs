//! Forecast sync protocol between a phone (source) and a watch face (sink).
//! Host-driven: no I/O; host passes transport events and performs the returned actions.

pub mod exchange;
pub mod ffi;
pub mod forecast;
pub mod identity;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod wire;

pub use exchange::{
    JobOutcome, JobResult, OutboundAction, ResponseJob, ResponseTarget, SinkEvent, SinkExchange,
    SinkState, SourceAction, SourceExchange, SourceState,
};
pub use forecast::{
    art_for_condition, format_temperature, ForecastRecord, ForecastSnapshot, ProviderError,
    SnapshotProvider, TemperatureUnit, WeatherArt,
};
pub use identity::PeerId;
pub use payload::{decode, decode_snapshot, encode, DecodeError, EncodeError, WirePayload};
pub use protocol::{Frame, MESSAGE_PATH, PROTOCOL_VERSION, READY_REQUEST};
pub use session::{PeerSessionManager, SessionAction, SessionState};
pub use wire::{
    decode_frame, decode_frame_body, encode_frame, FrameDecodeError, FrameEncodeError,
};
