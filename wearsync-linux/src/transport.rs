//! Local transport: TCP server (incoming), TCP client (outbound to configured peers),
//! Hello handshake, then length-prefixed bincode frames.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use wearsync_core::wire::{frame_len, LEN_SIZE};
use wearsync_core::{
    decode_frame_body, encode_frame, Frame, FrameDecodeError, FrameEncodeError, PeerId,
    PROTOCOL_VERSION,
};

/// Callback surface of the transport, delivered in order on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    ConnectionSuspended { cause: i32 },
    ConnectionFailed { reason: String },
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message {
        peer: PeerId,
        path: String,
        body: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    PeerUnreachable(PeerId),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the protocol needs from a connection-oriented peer transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queue `body` for `peer` on `path`. Fails if the peer has no live connection.
    async fn send(&self, peer: &PeerId, path: &str, body: Vec<u8>) -> Result<(), TransportError>;

    /// Peers with a live connection right now.
    async fn connected_peers(&self) -> Result<Vec<PeerId>, TransportError>;

    /// Start forwarding peer and message events.
    fn register_listeners(&self);

    /// Stop forwarding peer and message events.
    fn unregister_listeners(&self);
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(2);
/// Floor for the re-dial interval.
pub const MIN_REDIAL: Duration = Duration::from_millis(50);

/// Accept-loop error streak. The first failure suspends the link, the next accepted
/// connection reconnects it.
#[derive(Debug, Default)]
struct AcceptHealth {
    backoff: Option<Duration>,
}

impl AcceptHealth {
    fn failed(&mut self, e: &std::io::Error) -> (Option<TransportEvent>, Duration) {
        match self.backoff {
            Some(prev) => {
                let next = (prev * 2).min(ACCEPT_BACKOFF_MAX);
                self.backoff = Some(next);
                (None, next)
            }
            None => {
                self.backoff = Some(ACCEPT_BACKOFF_MIN);
                let event = TransportEvent::ConnectionSuspended {
                    cause: e.raw_os_error().unwrap_or(0),
                };
                (Some(event), ACCEPT_BACKOFF_MIN)
            }
        }
    }

    fn accepted(&mut self) -> Option<TransportEvent> {
        self.backoff.take().map(|_| TransportEvent::Connected)
    }
}

struct PeerLink {
    conn_id: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

pub struct TcpTransport {
    local: PeerId,
    peers: Mutex<HashMap<PeerId, PeerLink>>,
    listening: AtomicBool,
    next_conn: AtomicU64,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TcpTransport {
    pub fn new(local: PeerId, events: mpsc::UnboundedSender<TransportEvent>) -> Arc<Self> {
        Arc::new(Self {
            local,
            peers: Mutex::new(HashMap::new()),
            listening: AtomicBool::new(false),
            next_conn: AtomicU64::new(0),
            events,
        })
    }

    /// Bind `bind`, accept incoming peers and keep dialing each of `dial` every `redial`.
    /// Emits `Connected` once listening, `ConnectionFailed` if the bind fails.
    pub async fn start(
        self: &Arc<Self>,
        bind: SocketAddr,
        dial: Vec<String>,
        redial: Duration,
    ) -> Result<SocketAddr, TransportError> {
        let listener = match TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                let _ = self.events.send(TransportEvent::ConnectionFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        info!(%addr, node = %self.local, "transport listening");
        tokio::spawn(self.clone().accept_loop(listener));
        for target in dial {
            tokio::spawn(self.clone().dial_loop(target, redial));
        }
        let _ = self.events.send(TransportEvent::Connected);
        Ok(addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut health = AcceptHealth::default();
        loop {
            match listener.accept().await {
                Ok((mut stream, addr)) => {
                    if let Some(event) = health.accepted() {
                        info!("accepting again, transport resumed");
                        let _ = self.events.send(event);
                    }
                    let this = self.clone();
                    tokio::spawn(async move {
                        match this.handshake(&mut stream).await {
                            Ok(peer) => this.run_connection(stream, peer).await,
                            Err(e) => warn!(%addr, error = %e, "rejected incoming connection"),
                        }
                    });
                }
                Err(e) => {
                    let (event, pause) = health.failed(&e);
                    warn!(error = %e, retry_in = ?pause, "accept failed");
                    if let Some(event) = event {
                        let _ = self.events.send(event);
                    }
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    async fn dial_loop(self: Arc<Self>, target: String, redial: Duration) {
        let redial = redial.max(MIN_REDIAL);
        loop {
            match TcpStream::connect(target.as_str()).await {
                Ok(mut stream) => match self.handshake(&mut stream).await {
                    Ok(peer) => self.clone().run_connection(stream, peer).await,
                    Err(e) => warn!(%target, error = %e, "handshake with peer failed"),
                },
                Err(e) => debug!(%target, error = %e, "dial failed"),
            }
            tokio::time::sleep(redial).await;
        }
    }

    /// Both sides send Hello, then read the other's.
    async fn handshake(&self, stream: &mut TcpStream) -> Result<PeerId, TransportError> {
        let hello = encode_frame(&Frame::Hello {
            protocol_version: PROTOCOL_VERSION,
            peer_id: self.local.clone(),
        })?;
        stream.write_all(&hello).await?;
        stream.flush().await?;
        match read_frame(stream).await? {
            Frame::Hello {
                protocol_version,
                peer_id,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(TransportError::Handshake(format!(
                        "unsupported protocol version {protocol_version}"
                    )));
                }
                if peer_id == self.local {
                    return Err(TransportError::Handshake("connected to self".into()));
                }
                Ok(peer_id)
            }
            Frame::Message { .. } => Err(TransportError::Handshake(
                "expected hello, got message".into(),
            )),
        }
    }

    async fn run_connection(self: Arc<Self>, stream: TcpStream, peer: PeerId) {
        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let replaced = self
            .peers
            .lock()
            .await
            .insert(peer.clone(), PeerLink { conn_id, tx })
            .is_some();
        info!(%peer, replaced, "peer connected");
        if !replaced {
            self.emit(TransportEvent::PeerJoined(peer.clone()));
        }

        let (mut reader, mut writer) = stream.into_split();
        let writer_task = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
                    break;
                }
            }
        });
        loop {
            match read_frame(&mut reader).await {
                Ok(Frame::Message { path, body }) => self.emit(TransportEvent::Message {
                    peer: peer.clone(),
                    path,
                    body,
                }),
                Ok(Frame::Hello { .. }) => debug!(%peer, "ignoring repeated hello"),
                Err(e) => {
                    debug!(%peer, error = %e, "connection closed");
                    break;
                }
            }
        }
        writer_task.abort();

        let mut peers = self.peers.lock().await;
        if peers.get(&peer).map(|l| l.conn_id) == Some(conn_id) {
            peers.remove(&peer);
            drop(peers);
            info!(%peer, "peer disconnected");
            self.emit(TransportEvent::PeerLeft(peer));
        }
    }

    fn emit(&self, event: TransportEvent) {
        let gated = matches!(
            event,
            TransportEvent::PeerJoined(_) | TransportEvent::PeerLeft(_) | TransportEvent::Message { .. }
        );
        if gated && !self.listening.load(Ordering::SeqCst) {
            debug!(?event, "listeners not registered, dropping event");
            return;
        }
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer: &PeerId, path: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let frame = encode_frame(&Frame::Message {
            path: path.to_string(),
            body,
        })?;
        let peers = self.peers.lock().await;
        let link = peers
            .get(peer)
            .ok_or_else(|| TransportError::PeerUnreachable(peer.clone()))?;
        link.tx
            .send(frame)
            .map_err(|_| TransportError::PeerUnreachable(peer.clone()))
    }

    async fn connected_peers(&self) -> Result<Vec<PeerId>, TransportError> {
        let mut out: Vec<PeerId> = self.peers.lock().await.keys().cloned().collect();
        out.sort();
        Ok(out)
    }

    fn register_listeners(&self) {
        self.listening.store(true, Ordering::SeqCst);
    }

    fn unregister_listeners(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, TransportError> {
    let mut prefix = [0u8; LEN_SIZE];
    reader.read_exact(&mut prefix).await?;
    let mut body = vec![0u8; frame_len(&prefix)?];
    reader.read_exact(&mut body).await?;
    Ok(decode_frame_body(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wearsync_core::{MESSAGE_PATH, READY_REQUEST};

    const WAIT: Duration = Duration::from_secs(5);

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn dial_handshake_and_message() {
        let (phone_tx, mut phone_rx) = mpsc::unbounded_channel();
        let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
        let phone = TcpTransport::new(PeerId::from("phone"), phone_tx);
        let watch = TcpTransport::new(PeerId::from("watch"), watch_tx);
        phone.register_listeners();
        watch.register_listeners();

        let addr = phone.start(loopback(), Vec::new(), WAIT).await.unwrap();
        assert_eq!(next_event(&mut phone_rx).await, TransportEvent::Connected);
        watch
            .start(loopback(), vec![addr.to_string()], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(next_event(&mut watch_rx).await, TransportEvent::Connected);
        assert_eq!(
            next_event(&mut watch_rx).await,
            TransportEvent::PeerJoined(PeerId::from("phone"))
        );
        assert_eq!(
            next_event(&mut phone_rx).await,
            TransportEvent::PeerJoined(PeerId::from("watch"))
        );
        assert_eq!(
            watch.connected_peers().await.unwrap(),
            vec![PeerId::from("phone")]
        );

        watch
            .send(&PeerId::from("phone"), MESSAGE_PATH, READY_REQUEST.to_vec())
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut phone_rx).await,
            TransportEvent::Message {
                peer: PeerId::from("watch"),
                path: MESSAGE_PATH.to_string(),
                body: READY_REQUEST.to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let t = TcpTransport::new(PeerId::from("phone"), tx);
        let err = t
            .send(&PeerId::from("nobody"), MESSAGE_PATH, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerUnreachable(p) if p.as_str() == "nobody"));
    }

    #[tokio::test]
    async fn events_gated_on_listeners() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let t = TcpTransport::new(PeerId::from("phone"), tx);
        t.emit(TransportEvent::PeerJoined(PeerId::from("watch")));
        assert!(rx.try_recv().is_err());

        t.register_listeners();
        t.emit(TransportEvent::PeerJoined(PeerId::from("watch")));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::PeerJoined(PeerId::from("watch"))
        );

        t.unregister_listeners();
        t.emit(TransportEvent::PeerLeft(PeerId::from("watch")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bind_failure_reports_connection_failed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = TcpTransport::new(PeerId::from("a"), tx.clone());
        let addr = first.start(loopback(), Vec::new(), WAIT).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

        let second = TcpTransport::new(PeerId::from("b"), tx);
        assert!(second.start(addr, Vec::new(), WAIT).await.is_err());
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::ConnectionFailed { .. }
        ));
    }

    #[tokio::test]
    async fn handshake_rejects_self() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let t = TcpTransport::new(PeerId::from("phone"), tx);
        t.register_listeners();
        let addr = t.start(loopback(), Vec::new(), WAIT).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            t.handshake(&mut stream).await,
            Err(TransportError::Handshake(_))
        ));
        assert!(t.connected_peers().await.unwrap().is_empty());
    }

    #[test]
    fn accept_errors_suspend_once_and_resume_on_accept() {
        let err = std::io::Error::from_raw_os_error(24);
        let mut health = AcceptHealth::default();
        assert_eq!(health.accepted(), None);

        let (event, pause) = health.failed(&err);
        assert_eq!(event, Some(TransportEvent::ConnectionSuspended { cause: 24 }));
        assert_eq!(pause, ACCEPT_BACKOFF_MIN);
        let mut last = pause;
        for _ in 0..10 {
            let (event, pause) = health.failed(&err);
            assert_eq!(event, None);
            assert!(pause >= last && pause <= ACCEPT_BACKOFF_MAX);
            last = pause;
        }
        assert_eq!(last, ACCEPT_BACKOFF_MAX);

        assert_eq!(health.accepted(), Some(TransportEvent::Connected));
        assert_eq!(health.accepted(), None);
        let (event, pause) = health.failed(&err);
        assert!(matches!(event, Some(TransportEvent::ConnectionSuspended { .. })));
        assert_eq!(pause, ACCEPT_BACKOFF_MIN);
    }

    /// Handshake by hand as `id`, returning the open stream.
    async fn raw_peer(addr: SocketAddr, id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let hello = encode_frame(&Frame::Hello {
            protocol_version: PROTOCOL_VERSION,
            peer_id: PeerId::from(id),
        })
        .unwrap();
        stream.write_all(&hello).await.unwrap();
        assert!(matches!(
            read_frame(&mut stream).await.unwrap(),
            Frame::Hello { .. }
        ));
        stream
    }

    async fn listening_phone() -> (
        Arc<TcpTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
        SocketAddr,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let phone = TcpTransport::new(PeerId::from("phone"), tx);
        phone.register_listeners();
        let addr = phone.start(loopback(), Vec::new(), WAIT).await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);
        (phone, rx, addr)
    }

    #[tokio::test]
    async fn closed_connection_leaves_and_becomes_unreachable() {
        let (phone, mut rx, addr) = listening_phone().await;
        let watch = PeerId::from("watch");
        let stream = raw_peer(addr, "watch").await;
        assert_eq!(next_event(&mut rx).await, TransportEvent::PeerJoined(watch.clone()));

        drop(stream);
        assert_eq!(next_event(&mut rx).await, TransportEvent::PeerLeft(watch.clone()));
        assert!(phone.connected_peers().await.unwrap().is_empty());
        let err = phone
            .send(&watch, MESSAGE_PATH, READY_REQUEST.to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerUnreachable(p) if p == watch));
    }

    #[tokio::test]
    async fn replaced_connection_keeps_the_peer() {
        let (phone, mut rx, addr) = listening_phone().await;
        let watch = PeerId::from("watch");
        let old = raw_peer(addr, "watch").await;
        assert_eq!(next_event(&mut rx).await, TransportEvent::PeerJoined(watch.clone()));
        let old_conn = phone.peers.lock().await.get(&watch).map(|l| l.conn_id);

        let mut new = raw_peer(addr, "watch").await;
        let deadline = tokio::time::Instant::now() + WAIT;
        while phone.peers.lock().await.get(&watch).map(|l| l.conn_id) == old_conn {
            assert!(tokio::time::Instant::now() < deadline, "replacement never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(old);
        let quiet = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(quiet.is_err(), "unexpected event {quiet:?}");
        assert_eq!(phone.connected_peers().await.unwrap(), vec![watch.clone()]);

        phone
            .send(&watch, MESSAGE_PATH, READY_REQUEST.to_vec())
            .await
            .unwrap();
        assert_eq!(
            tokio::time::timeout(WAIT, read_frame(&mut new))
                .await
                .unwrap()
                .unwrap(),
            Frame::Message {
                path: MESSAGE_PATH.to_string(),
                body: READY_REQUEST.to_vec(),
            }
        );

        drop(new);
        assert_eq!(next_event(&mut rx).await, TransportEvent::PeerLeft(watch));
    }
}
