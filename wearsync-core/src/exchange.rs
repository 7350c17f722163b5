//! Exchange protocol: the phone (source) and watch (sink) state machines.
//! Host-driven: no I/O; host passes events and performs the returned actions.

use tracing::{debug, info, warn};

use crate::forecast::{ForecastSnapshot, SnapshotProvider};
use crate::identity::PeerId;
use crate::payload::{self, DecodeError};
use crate::protocol::{self, MESSAGE_PATH, READY_REQUEST};

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    SendMessage {
        peer: PeerId,
        path: &'static str,
        body: Vec<u8>,
    },
}

fn ready_fan_out(peers: &[PeerId]) -> Vec<OutboundAction> {
    peers
        .iter()
        .map(|peer| OutboundAction::SendMessage {
            peer: peer.clone(),
            path: MESSAGE_PATH,
            body: READY_REQUEST.to_vec(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    AwaitingRequest,
    Responding,
}

/// Who receives the forecast once it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseTarget {
    /// Only the peer that sent the ready request.
    #[default]
    Requester,
    /// Every peer connected when the response is ready.
    AllConnected,
}

/// What the host should do with an inbound message on the source side.
#[derive(Debug)]
pub enum SourceAction {
    /// Run the job on a worker context, then pass its result to `on_job_finished`.
    Respond(ResponseJob),
    /// Recognized path but nothing to do.
    Ignored,
    /// Not ours; hand to the host's default handler.
    Unhandled,
}

/// Fetch-and-encode work for one ready request. May block; run it off the event path.
#[derive(Debug)]
pub struct ResponseJob {
    requester: PeerId,
}

impl ResponseJob {
    pub fn requester(&self) -> &PeerId {
        &self.requester
    }

    /// Query the provider once and encode the result.
    pub fn run<P: SnapshotProvider + ?Sized>(self, provider: &P) -> JobResult {
        let outcome = match provider.current_snapshot() {
            Ok(Some(snapshot)) => match payload::encode(&snapshot).to_bytes() {
                Ok(body) => JobOutcome::Encoded(body),
                Err(e) => JobOutcome::Failed(e.to_string()),
            },
            Ok(None) => JobOutcome::NoData,
            Err(e) => JobOutcome::Failed(e.to_string()),
        };
        JobResult {
            requester: self.requester,
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct JobResult {
    pub requester: PeerId,
    pub outcome: JobOutcome,
}

#[derive(Debug)]
pub enum JobOutcome {
    /// Encoded response body, handed over once and never mutated.
    Encoded(Vec<u8>),
    /// No forecast for today. No response is sent.
    NoData,
    Failed(String),
}

/// Phone side: answers ready requests with today's forecast.
#[derive(Debug)]
pub struct SourceExchange {
    state: SourceState,
    in_flight: usize,
    target: ResponseTarget,
}

impl SourceExchange {
    pub fn new() -> Self {
        Self::with_target(ResponseTarget::default())
    }

    pub fn with_target(target: ResponseTarget) -> Self {
        Self {
            state: SourceState::Idle,
            in_flight: 0,
            target,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn on_link_connected(&mut self) {
        if self.state == SourceState::Idle {
            self.state = if self.in_flight > 0 {
                SourceState::Responding
            } else {
                SourceState::AwaitingRequest
            };
        }
    }

    /// In-flight jobs are not cancelled; their sends are attempted and may fail.
    pub fn on_link_lost(&mut self) {
        self.state = SourceState::Idle;
    }

    pub fn on_message(
        &mut self,
        peer: &PeerId,
        path: &str,
        body: &[u8],
        peer_connected: bool,
    ) -> SourceAction {
        if path != MESSAGE_PATH {
            return SourceAction::Unhandled;
        }
        if !protocol::is_ready_request(body) {
            debug!(%peer, len = body.len(), "ignoring non-ready message");
            return SourceAction::Ignored;
        }
        if !peer_connected {
            debug!(%peer, "ignoring ready request from peer that is not connected");
            return SourceAction::Ignored;
        }
        self.in_flight += 1;
        self.state = SourceState::Responding;
        debug!(%peer, "ready request received");
        SourceAction::Respond(ResponseJob {
            requester: peer.clone(),
        })
    }

    /// `connected` is the connected-peer snapshot at completion time, used for `AllConnected`.
    pub fn on_job_finished(
        &mut self,
        result: JobResult,
        connected: &[PeerId],
    ) -> Vec<OutboundAction> {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 && self.state == SourceState::Responding {
            self.state = SourceState::AwaitingRequest;
        }
        let body = match result.outcome {
            JobOutcome::Encoded(body) => body,
            JobOutcome::NoData => {
                debug!(requester = %result.requester, "no forecast for today, not responding");
                return Vec::new();
            }
            JobOutcome::Failed(e) => {
                warn!(requester = %result.requester, error = %e, "building forecast response failed");
                return Vec::new();
            }
        };
        let recipients: Vec<PeerId> = match self.target {
            ResponseTarget::Requester => vec![result.requester],
            ResponseTarget::AllConnected => connected.to_vec(),
        };
        let mut actions = Vec::with_capacity(recipients.len());
        let mut body = Some(body);
        for (i, peer) in recipients.iter().enumerate() {
            let bytes = if i + 1 == recipients.len() {
                body.take().unwrap_or_default()
            } else {
                body.clone().unwrap_or_default()
            };
            actions.push(OutboundAction::SendMessage {
                peer: peer.clone(),
                path: MESSAGE_PATH,
                body: bytes,
            });
        }
        actions
    }
}

impl Default for SourceExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    AwaitingResponse,
}

/// Outcome of an inbound message on the sink side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// A new snapshot was stored; the rendering layer should redraw.
    Redraw,
    /// Payload on our path failed to decode and was dropped.
    Discarded(DecodeError),
    /// Not on our path.
    Ignored,
}

/// Watch side: asks for the forecast and keeps the latest one for rendering.
#[derive(Debug)]
pub struct SinkExchange {
    state: SinkState,
    /// Pending until the first link connection of this instance.
    first_connection: bool,
    latest: Option<ForecastSnapshot>,
}

impl SinkExchange {
    pub fn new() -> Self {
        Self {
            state: SinkState::Idle,
            first_connection: true,
            latest: None,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn latest(&self) -> Option<&ForecastSnapshot> {
        self.latest.as_ref()
    }

    /// Consume the one-shot. True only the first time for this instance.
    pub fn ready_request_due(&mut self) -> bool {
        std::mem::replace(&mut self.first_connection, false)
    }

    /// Link came up. Requests the forecast from `peers` on the first connection only.
    pub fn on_link_connected(&mut self, peers: &[PeerId]) -> Vec<OutboundAction> {
        if !self.ready_request_due() {
            return Vec::new();
        }
        self.request_from(peers)
    }

    /// A peer joined. Requests the forecast from every connected peer.
    pub fn on_peer_joined(&mut self, peers: &[PeerId]) -> Vec<OutboundAction> {
        self.request_from(peers)
    }

    pub fn on_message(&mut self, path: &str, body: &[u8]) -> SinkEvent {
        if path != MESSAGE_PATH {
            return SinkEvent::Ignored;
        }
        match payload::decode_snapshot(body) {
            Ok(snapshot) => {
                info!(
                    min = snapshot.min_temp(),
                    max = snapshot.max_temp(),
                    icon_bytes = snapshot.icon().len(),
                    "forecast received"
                );
                self.latest = Some(snapshot);
                self.state = SinkState::Idle;
                SinkEvent::Redraw
            }
            Err(e) => {
                warn!(error = %e, len = body.len(), "discarding undecodable forecast payload");
                SinkEvent::Discarded(e)
            }
        }
    }

    fn request_from(&mut self, peers: &[PeerId]) -> Vec<OutboundAction> {
        if !peers.is_empty() {
            self.state = SinkState::AwaitingResponse;
        }
        ready_fan_out(peers)
    }
}

impl Default for SinkExchange {
    fn default() -> Self {
        Self::new()
    }
}
