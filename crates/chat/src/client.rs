use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use perch_core::domain::event::{ChatEvent, ChatEventKind};
use perch_core::domain::message::MessageKind;

use crate::router::{EventHandler, EventRouter, RouteReport};
use crate::transport::{ChatTransport, OutboundMessage, ReconnectPolicy, TransportError};

/// What the bot needs from a chat connection.
#[async_trait]
pub trait Client: Send + Sync {
    async fn start(&self) -> Result<(), TransportError>;
    async fn stop(&self) -> Result<(), TransportError>;
    async fn send(&self, kind: MessageKind, target: &str, content: &str) -> Result<(), TransportError>;
    fn subscribe(&self, kind: ChatEventKind, handler: Arc<dyn EventHandler>);
}

enum SessionEnd {
    Closed,
    Stopped,
}

/// How the event pump ended: `Ok` for a closed stream or a requested stop.
type PumpOutcome = Result<(), TransportError>;

/// A [`Client`] that pumps events from a [`ChatTransport`] into an
/// [`EventRouter`], reconnecting with backoff when the transport fails.
pub struct TransportClient {
    transport: Arc<dyn ChatTransport>,
    router: Arc<EventRouter>,
    policy: ReconnectPolicy,
    shutdown: watch::Sender<bool>,
    finished: Arc<watch::Sender<Option<PumpOutcome>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TransportClient {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        router: Arc<EventRouter>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (finished, _) = watch::channel(None);
        Self { transport, router, policy, shutdown, finished: Arc::new(finished), pump: Mutex::new(None) }
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Waits until the event pump of the current run ends and reports why.
    ///
    /// A closed stream or [`Client::stop`] yields `Ok`; exhausted reconnects
    /// or a panicked pump yield the error. Dropping this future leaves the
    /// pump untouched, so it can race a shutdown signal.
    pub async fn closed(&self) -> Result<(), TransportError> {
        let mut finished = self.finished.subscribe();
        let outcome = match finished.wait_for(Option::is_some).await {
            Ok(state) => state.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Ok(()))
    }
}

async fn run_session(
    transport: &Arc<dyn ChatTransport>,
    router: &EventRouter,
    shutdown: &mut watch::Receiver<bool>,
    delivered: &mut bool,
) -> Result<SessionEnd, TransportError> {
    transport.connect().await?;
    info!(event_name = "chat.transport.connected", "chat transport connected");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(SessionEnd::Stopped),
            next = transport.next_event() => match next? {
                Some(event) => {
                    *delivered = true;
                    router.route(event).await;
                }
                None => return Ok(SessionEnd::Closed),
            },
        }
    }
}

async fn pump(
    transport: Arc<dyn ChatTransport>,
    router: Arc<EventRouter>,
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> PumpOutcome {
    let mut attempt = 0;
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let mut delivered = false;
        match run_session(&transport, &router, &mut shutdown, &mut delivered).await {
            Ok(SessionEnd::Closed) => {
                info!(event_name = "chat.transport.closed", "chat transport stream closed");
                return Ok(());
            }
            Ok(SessionEnd::Stopped) => return Ok(()),
            Err(error) => {
                if delivered {
                    attempt = 0;
                }
                warn!(
                    event_name = "chat.transport.failed",
                    attempt,
                    max_retries = policy.max_retries,
                    error = %error,
                    "chat transport failed"
                );
                router.route(ChatEvent::Error { message: error.to_string(), network: true }).await;

                if attempt >= policy.max_retries {
                    warn!(
                        event_name = "chat.transport.retries_exhausted",
                        max_retries = policy.max_retries,
                        "chat transport retries exhausted"
                    );
                    return Err(TransportError::RetriesExhausted {
                        retries: policy.max_retries,
                        last: error.to_string(),
                    });
                }

                let delay = policy.backoff(attempt);
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Ok(()),
                }
            }
        }
    }
}

/// Runs the pump and publishes its outcome, including a panic, to `finished`.
async fn supervise(worker: JoinHandle<PumpOutcome>, finished: Arc<watch::Sender<Option<PumpOutcome>>>) {
    let outcome = match worker.await {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(event_name = "chat.client.pump_failed", error = %error, "event pump ended abnormally");
            Err(TransportError::PumpFailed(error.to_string()))
        }
    };
    finished.send_replace(Some(outcome));
}

#[async_trait]
impl Client for TransportClient {
    async fn start(&self) -> Result<(), TransportError> {
        let mut pump_slot = self.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if pump_slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(TransportError::State("already started"));
        }

        self.shutdown.send_replace(false);
        self.finished.send_replace(None);
        let worker = tokio::spawn(pump(
            Arc::clone(&self.transport),
            Arc::clone(&self.router),
            self.policy.clone(),
            self.shutdown.subscribe(),
        ));
        *pump_slot = Some(tokio::spawn(supervise(worker, Arc::clone(&self.finished))));
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.shutdown.send_replace(true);
        let handle = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(event_name = "chat.client.pump_failed", error = %error, "event pump supervisor failed");
            }
        }
        self.transport.disconnect().await?;
        info!(event_name = "chat.client.stopped", "chat client stopped");
        Ok(())
    }

    async fn send(&self, kind: MessageKind, target: &str, content: &str) -> Result<(), TransportError> {
        self.transport.send(&OutboundMessage::new(kind, target, content)).await
    }

    fn subscribe(&self, kind: ChatEventKind, handler: Arc<dyn EventHandler>) {
        self.router.subscribe(kind, handler);
    }
}

/// In-process [`Client`] for tests: events are injected with
/// [`FakeClient::emit`] and sends are captured instead of delivered.
pub struct FakeClient {
    router: Arc<EventRouter>,
    sent: Mutex<Vec<OutboundMessage>>,
    running: Mutex<bool>,
    fail_sends: Mutex<bool>,
}

impl FakeClient {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self {
            router,
            sent: Mutex::new(Vec::new()),
            running: Mutex::new(false),
            fail_sends: Mutex::new(false),
        }
    }

    pub async fn emit(&self, event: ChatEvent) -> RouteReport {
        self.router.route(event).await
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }
}

#[async_trait]
impl Client for FakeClient {
    async fn start(&self) -> Result<(), TransportError> {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = false;
        Ok(())
    }

    async fn send(&self, kind: MessageKind, target: &str, content: &str) -> Result<(), TransportError> {
        if *self.fail_sends.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(TransportError::Send("fake client configured to fail".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OutboundMessage::new(kind, target, content));
        Ok(())
    }

    fn subscribe(&self, kind: ChatEventKind, handler: Arc<dyn EventHandler>) {
        self.router.subscribe(kind, handler);
    }
}
