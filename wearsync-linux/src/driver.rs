//! Protocol driver: one task owning the session manager and this node's exchange.
//! Transport events and finished response jobs are handled in arrival order.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use wearsync_core::{
    ForecastSnapshot, JobOutcome, JobResult, OutboundAction, PeerSessionManager, ResponseTarget,
    SessionAction, SinkEvent, SinkExchange, SnapshotProvider, SourceAction, SourceExchange,
};

use crate::transport::{Transport, TransportEvent};

enum RoleState {
    Source {
        exchange: SourceExchange,
        provider: Arc<dyn SnapshotProvider>,
    },
    Sink(SinkExchange),
}

enum Step {
    Event(Option<TransportEvent>),
    Job(Option<JobResult>),
    Shutdown,
}

pub struct Driver<T: Transport + ?Sized> {
    transport: Arc<T>,
    session: PeerSessionManager,
    role: RoleState,
    jobs_tx: mpsc::UnboundedSender<JobResult>,
    jobs_rx: mpsc::UnboundedReceiver<JobResult>,
    snapshot_tx: watch::Sender<Option<ForecastSnapshot>>,
}

impl<T: Transport + ?Sized> Driver<T> {
    /// Phone side: answers ready requests from `provider`.
    pub fn source(
        transport: Arc<T>,
        provider: Arc<dyn SnapshotProvider>,
        target: ResponseTarget,
    ) -> Self {
        Self::with_role(
            transport,
            RoleState::Source {
                exchange: SourceExchange::with_target(target),
                provider,
            },
        )
    }

    /// Watch side: requests the forecast and publishes it on `subscribe()`.
    pub fn sink(transport: Arc<T>) -> Self {
        Self::with_role(transport, RoleState::Sink(SinkExchange::new()))
    }

    fn with_role(transport: Arc<T>, role: RoleState) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            transport,
            session: PeerSessionManager::new(),
            role,
            jobs_tx,
            jobs_rx,
            snapshot_tx,
        }
    }

    /// Latest forecast received by the sink. Stays `None` on the source.
    pub fn subscribe(&self) -> watch::Receiver<Option<ForecastSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Run until the event channel closes or `shutdown` resolves.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        self.session.on_connect_requested();
        tokio::pin!(shutdown);
        loop {
            let step = tokio::select! {
                ev = events.recv() => Step::Event(ev),
                job = self.jobs_rx.recv() => Step::Job(job),
                _ = &mut shutdown => Step::Shutdown,
            };
            match step {
                Step::Event(Some(ev)) => self.handle_event(ev).await,
                Step::Job(Some(job)) => self.handle_job(job).await,
                Step::Event(None) | Step::Job(None) | Step::Shutdown => break,
            }
        }
        info!("driver stopping");
        let actions = self.session.on_disconnect_requested();
        self.apply_session(actions);
        if let RoleState::Source { exchange, .. } = &mut self.role {
            exchange.on_link_lost();
        }
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                // Listeners go up before the peer query so no join falls between the two.
                let actions = self.session.on_connected(Vec::new());
                self.apply_session(actions);
                match self.transport.connected_peers().await {
                    Ok(peers) => {
                        for peer in peers {
                            self.session.on_peer_joined(peer);
                        }
                    }
                    Err(e) => warn!(error = %e, "listing connected peers failed"),
                }
                let connected = self.session.list_connected_peers();
                let out = match &mut self.role {
                    RoleState::Source { exchange, .. } => {
                        exchange.on_link_connected();
                        Vec::new()
                    }
                    RoleState::Sink(sink) => sink.on_link_connected(&connected),
                };
                self.dispatch(out).await;
            }
            TransportEvent::ConnectionSuspended { cause } => {
                let actions = self.session.on_connection_suspended(cause);
                self.apply_session(actions);
                self.link_lost();
            }
            TransportEvent::ConnectionFailed { reason } => {
                let actions = self.session.on_connection_failed(&reason);
                self.apply_session(actions);
                self.link_lost();
            }
            TransportEvent::PeerJoined(peer) => {
                self.session.on_peer_joined(peer);
                if let RoleState::Sink(sink) = &mut self.role {
                    let connected = self.session.list_connected_peers();
                    let out = sink.on_peer_joined(&connected);
                    self.dispatch(out).await;
                }
            }
            TransportEvent::PeerLeft(peer) => self.session.on_peer_left(&peer),
            TransportEvent::Message { peer, path, body } => match &mut self.role {
                RoleState::Source { exchange, provider } => {
                    let connected = self.session.is_peer_connected(&peer);
                    match exchange.on_message(&peer, &path, &body, connected) {
                        SourceAction::Respond(job) => {
                            let provider = provider.clone();
                            let requester = job.requester().clone();
                            let tx = self.jobs_tx.clone();
                            tokio::spawn(async move {
                                let result = tokio::task::spawn_blocking(move || {
                                    job.run(provider.as_ref())
                                })
                                .await
                                .unwrap_or_else(|e| JobResult {
                                    requester,
                                    outcome: JobOutcome::Failed(e.to_string()),
                                });
                                let _ = tx.send(result);
                            });
                        }
                        SourceAction::Ignored => {}
                        SourceAction::Unhandled => unhandled(&peer, &path),
                    }
                }
                RoleState::Sink(sink) => match sink.on_message(&path, &body) {
                    SinkEvent::Redraw => {
                        self.snapshot_tx.send_replace(sink.latest().cloned());
                    }
                    SinkEvent::Discarded(_) => {}
                    SinkEvent::Ignored => unhandled(&peer, &path),
                },
            },
        }
    }

    pub async fn handle_job(&mut self, result: JobResult) {
        let connected = self.session.list_connected_peers();
        let out = match &mut self.role {
            RoleState::Source { exchange, .. } => exchange.on_job_finished(result, &connected),
            RoleState::Sink(_) => {
                debug!("sink received a job result, dropping");
                Vec::new()
            }
        };
        self.dispatch(out).await;
    }

    fn link_lost(&mut self) {
        if let RoleState::Source { exchange, .. } = &mut self.role {
            exchange.on_link_lost();
        }
    }

    fn apply_session(&self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::RegisterListeners => self.transport.register_listeners(),
                SessionAction::UnregisterListeners => self.transport.unregister_listeners(),
            }
        }
    }

    async fn dispatch(&self, actions: Vec<OutboundAction>) {
        for action in actions {
            let OutboundAction::SendMessage { peer, path, body } = action;
            let len = body.len();
            match self.transport.send(&peer, path, body).await {
                Ok(()) => debug!(%peer, len, "message sent"),
                Err(e) => warn!(%peer, error = %e, "send failed"),
            }
        }
    }
}

/// Messages on paths this node does not own.
fn unhandled(peer: &wearsync_core::PeerId, path: &str) {
    trace!(%peer, path, "unhandled message");
}
