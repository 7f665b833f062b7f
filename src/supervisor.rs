//! Connection lifecycle supervisor.
//!
//! Owns the two long-lived network channels (bus, event stream), sequences
//! startup — including the one-time self-registration handshake — and drives
//! coordinated shutdown. The lifecycle is a straight-line state machine:
//!
//! `Init → ConnectingBus → Registering → ConnectingEvents → Running →
//! ShuttingDown → Stopped`
//!
//! `Stopped` is terminal; restarting requires a new supervisor instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::bus::{self, BusError};
use crate::config::Config;
use crate::feishu::client::PlatformApi;
use crate::feishu::event::MessageEvent;
use crate::feishu::stream::{self, StreamError};
use crate::gate::ChatGate;
use crate::inbound::InboundNormalizer;
use crate::message::Message;
use crate::outbound::OutboundDispatcher;

/// How many bus-readiness polls the registration handshake attempts before
/// giving up.
const REGISTRATION_POLL_ATTEMPTS: u32 = 10;

/// Delay between bus-readiness polls.
const REGISTRATION_POLL_DELAY: Duration = Duration::from_millis(500);

/// How long teardown waits for a channel task before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle states of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Nothing started yet.
    Init,
    /// Opening the outbound channel to the message bus.
    ConnectingBus,
    /// Performing the one-time self-registration handshake.
    Registering,
    /// Opening the inbound event channel.
    ConnectingEvents,
    /// Steady state: both channels active.
    Running,
    /// Cooperative cancellation of both channels in progress.
    ShuttingDown,
    /// Terminal. Not re-enterable.
    Stopped,
}

impl SupervisorState {
    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Whether the lifecycle permits moving from this state to `next`.
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::ConnectingBus)
                | (Self::ConnectingBus, Self::Registering)
                | (Self::ConnectingBus, Self::ShuttingDown)
                | (Self::Registering, Self::ConnectingEvents)
                | (Self::Registering, Self::ShuttingDown)
                | (Self::ConnectingEvents, Self::Running)
                | (Self::ConnectingEvents, Self::ShuttingDown)
                | (Self::Running, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stopped)
        )
    }
}

/// Why the self-registration handshake failed. Always non-fatal.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The bus did not become ready within the bounded wait.
    #[error("bus not ready after {REGISTRATION_POLL_ATTEMPTS} polls")]
    Timeout,

    /// The adapter's own identity could not be fetched.
    #[error("identity fetch failed: {0}")]
    Identity(String),

    /// The announcement could not be pushed onto the bus.
    #[error("registration push failed")]
    Send,
}

/// Why the running message loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// The shutdown signal was observed.
    Shutdown,
    /// The bus channel terminated.
    BusClosed,
    /// The event-stream channel terminated.
    EventsClosed,
}

/// Handle for triggering supervisor shutdown from outside (signal handler).
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Broadcast the shutdown condition. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Supervisor for the bus and event-stream channels.
pub struct ConnectionSupervisor {
    config: Config,
    http: reqwest::Client,
    api: Arc<dyn PlatformApi>,
    normalizer: Arc<InboundNormalizer>,
    dispatcher: Arc<OutboundDispatcher>,
    gate: Arc<ChatGate>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    state: SupervisorState,
}

impl ConnectionSupervisor {
    /// Build a supervisor over the given platform API.
    pub fn new(config: Config, http: reqwest::Client, api: Arc<dyn PlatformApi>) -> Self {
        let normalizer = Arc::new(InboundNormalizer::new(
            &config.bus.platform,
            Arc::clone(&api),
        ));
        let dispatcher = Arc::new(OutboundDispatcher::new(Arc::clone(&api)));
        let gate = Arc::new(ChatGate::new(config.chat.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            http,
            api,
            normalizer,
            dispatcher,
            gate,
            shutdown_tx: Arc::new(shutdown_tx),
            state: SupervisorState::Init,
        }
    }

    /// Handle for triggering shutdown from a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Move to the next lifecycle state, logging the edge.
    fn transition(&mut self, next: SupervisorState) {
        if !self.state.can_transition(next) {
            warn!(from = ?self.state, to = ?next, "unexpected lifecycle transition");
        }
        info!(from = ?self.state, to = ?next, "supervisor state");
        self.state = next;
    }

    /// Run the full lifecycle to completion.
    ///
    /// Returns once the supervisor reaches `Stopped`. A clean shutdown (signal
    /// or channel closure after startup) is `Ok`; a startup failure is `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error when either channel cannot be established.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.transition(SupervisorState::ConnectingBus);
        let url = bus::bus_url(&self.config.bus.host, self.config.bus.port);
        let bus_channel = match bus::connect(&url, self.shutdown_tx.subscribe()).await {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "bus connection failed");
                self.transition(SupervisorState::ShuttingDown);
                self.transition(SupervisorState::Stopped);
                return Err(e.into());
            }
        };
        let bus_outbound = bus_channel.outbound;
        let bus_replies = bus_channel.replies;
        let bus_ready = bus_channel.ready;
        let bus_task = bus_channel.task;

        self.transition(SupervisorState::Registering);
        if let Err(e) = self.register_self(&bus_outbound, bus_ready).await {
            // The adapter works without self-identification; it just cannot
            // recognize itself in mentions.
            warn!(error = %e, "self-registration failed, continuing without it");
        }

        self.transition(SupervisorState::ConnectingEvents);
        let event_channel = match stream::connect(
            &self.http,
            &self.config.feishu.api_base,
            &self.config.feishu.app_id,
            &self.config.feishu.app_secret,
            self.shutdown_tx.subscribe(),
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "event stream connection failed");
                self.transition(SupervisorState::ShuttingDown);
                self.teardown(Some(bus_task), None).await;
                self.transition(SupervisorState::Stopped);
                return Err(e.into());
            }
        };

        self.transition(SupervisorState::Running);
        let exit = run_message_loop(
            Arc::clone(&self.normalizer),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.gate),
            bus_outbound,
            bus_replies,
            event_channel.events,
            self.shutdown_tx.subscribe(),
        )
        .await;
        info!(reason = ?exit, "message loop exited");

        self.transition(SupervisorState::ShuttingDown);
        self.teardown(Some(bus_task), Some(event_channel.task)).await;
        self.transition(SupervisorState::Stopped);
        Ok(())
    }

    /// One-time self-registration handshake: wait for the bus to stabilize,
    /// fetch the adapter's own identity, and push a synthetic announcement.
    async fn register_self(
        &self,
        bus_outbound: &mpsc::Sender<Message>,
        ready: watch::Receiver<bool>,
    ) -> Result<(), RegistrationError> {
        let mut stable = false;
        for _ in 0..REGISTRATION_POLL_ATTEMPTS {
            if *ready.borrow() {
                stable = true;
                break;
            }
            tokio::time::sleep(REGISTRATION_POLL_DELAY).await;
        }
        if !stable {
            return Err(RegistrationError::Timeout);
        }

        let bot = self
            .api
            .bot_identity()
            .await
            .map_err(|e| RegistrationError::Identity(e.to_string()))?;
        info!(open_id = %bot.open_id, name = %bot.app_name, "bot identity fetched");

        let announcement =
            Message::registration(&self.config.bus.platform, &bot.open_id, &bot.app_name);
        bus_outbound
            .send(announcement)
            .await
            .map_err(|_| RegistrationError::Send)?;
        info!("bot registered to the bus");
        Ok(())
    }

    /// Broadcast shutdown and collect both channel tasks.
    ///
    /// The bus task is awaited within a grace period; the event stream has no
    /// forced-close primitive, so its task is abandoned once the grace period
    /// passes and the connection is reclaimed with the process.
    async fn teardown(
        &self,
        bus_task: Option<tokio::task::JoinHandle<Result<(), BusError>>>,
        stream_task: Option<tokio::task::JoinHandle<Result<(), StreamError>>>,
    ) {
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = bus_task {
            let abort = task.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(Ok(()))) => debug!("bus channel closed cleanly"),
                Ok(Ok(Err(e))) => warn!(error = %e, "bus channel closed with error"),
                Ok(Err(e)) => warn!(error = %e, "bus task panicked or was cancelled"),
                Err(_) => {
                    warn!("bus task did not stop within grace period, abandoning");
                    abort.abort();
                }
            }
        }

        if let Some(task) = stream_task {
            let abort = task.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(Ok(()))) => debug!("event stream closed cleanly"),
                Ok(Ok(Err(e))) => warn!(error = %e, "event stream closed with error"),
                Ok(Err(e)) => warn!(error = %e, "event stream task panicked or was cancelled"),
                Err(_) => {
                    debug!("event stream left for passive reclamation");
                    abort.abort();
                }
            }
        }
    }
}

/// Steady-state message loop: gate → normalize → bus, and replies → dispatch.
///
/// Normalization and dispatch are spawned per message so a slow asset
/// download or REST call never stalls event ingestion. Exits on the shutdown
/// signal or when either channel closes; no new event is normalized after the
/// signal is observed.
async fn run_message_loop(
    normalizer: Arc<InboundNormalizer>,
    dispatcher: Arc<OutboundDispatcher>,
    gate: Arc<ChatGate>,
    bus_outbound: mpsc::Sender<Message>,
    mut bus_replies: mpsc::Receiver<Message>,
    mut events: mpsc::Receiver<MessageEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> LoopExit {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                return LoopExit::Shutdown;
            }
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    return LoopExit::EventsClosed;
                };
                let user_id = event
                    .sender
                    .sender_id
                    .as_ref()
                    .and_then(|id| id.open_id.as_deref())
                    .unwrap_or("");
                if !gate.permits(&event.message.chat_id, user_id) {
                    continue;
                }

                let normalizer = Arc::clone(&normalizer);
                let bus_outbound = bus_outbound.clone();
                tokio::spawn(async move {
                    if let Some(message) = normalizer.normalize(&event).await {
                        if bus_outbound.send(message).await.is_err() {
                            warn!("bus channel gone, inbound message dropped");
                        }
                    }
                });
            }
            maybe_reply = bus_replies.recv() => {
                let Some(reply) = maybe_reply else {
                    return LoopExit::BusClosed;
                };
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    dispatcher.dispatch(reply).await;
                });
            }
        }
    }
}
