//! Session state machine and request correlation
//!
//! One driver task per connection owns the transport, the nonce→waiter map,
//! and the not-ready request queue. Public operations talk to it over an
//! mpsc channel and suspend on oneshot replies, so no mutable protocol state
//! is touched from more than one task. Subscription registrations are also
//! made by the driver, at the moment the peer's acknowledgement is settled;
//! a dispatch arriving right behind the ack cannot slip past the
//! registration.
//!
//! Lifecycle:
//!
//! ```text
//! Idle → Connecting → Connected ──────────────→ Ready
//!            │            └→ Authorizing → Authenticating ─┘
//!            └──────────────── (timeout / close) ─────────→ Closed
//! ```
//!
//! Requests issued before Ready (other than the AUTHORIZE/AUTHENTICATE
//! bootstrap) are held in a bounded FIFO and flushed exactly once at the
//! Ready transition. On loopback reconnection the session re-authenticates
//! with its stored token, resubscribes active subscriptions, then flushes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::ClientConfig;
use crate::discovery;
use crate::error::{Result, RpcError};
use crate::models::{Application, User};
use crate::protocol::{close_codes, Command, EventKind, IncomingMessage, OutgoingMessage};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{CloseInfo, Transport, TransportEvent, TransportKind};

/// Timeout for the initial connect, covering transport open and the READY
/// dispatch
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before a loopback reconnect attempt
const RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Capacity of the not-ready request queue
const REQUEST_QUEUE_LIMIT: usize = 64;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Authorizing,
    Authenticating,
    Ready,
    Closed,
}

/// Events broadcast to session observers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Transport handshake finished (READY dispatch observed)
    Connected,
    /// Session is usable: login finished and queued requests flushed
    Ready,
    /// The connection is gone and will not recover on its own
    Disconnected,
    /// Unsolicited dispatch from the peer
    Dispatch { event: EventKind, data: Value },
    /// Non-fatal session error (discovery failure, peer error payloads)
    Error { message: String },
}

/// Identity payloads stored after AUTHENTICATE
#[derive(Default)]
pub(crate) struct Identity {
    pub user: Option<User>,
    pub application: Option<Application>,
    pub access_token: Option<String>,
}

/// State shared between client handles and the session driver
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub http: reqwest::Client,
    state: RwLock<SessionState>,
    pub identity: RwLock<Identity>,
    pub endpoint: RwLock<Option<String>>,
    pub subs: Mutex<SubscriptionRegistry>,
    events: broadcast::Sender<ClientEvent>,
    ops: RwLock<Option<mpsc::UnboundedSender<Op>>>,
}

impl Shared {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            http: reqwest::Client::new(),
            state: RwLock::new(SessionState::Idle),
            identity: RwLock::new(Identity::default()),
            endpoint: RwLock::new(None),
            subs: Mutex::new(SubscriptionRegistry::new()),
            events,
            ops: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub fn emit(&self, event: ClientEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Sender to the live driver, if any
    pub fn ops(&self) -> Result<mpsc::UnboundedSender<Op>> {
        self.ops
            .read()
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .cloned()
            .ok_or(RpcError::NotConnected)
    }

    pub fn install_ops(&self, tx: mpsc::UnboundedSender<Op>) {
        *self.ops.write() = Some(tx);
    }

    fn clear_ops(&self) {
        *self.ops.write() = None;
    }

    /// Store the user/application blocks of an AUTHENTICATE payload
    pub fn store_identity_payload(&self, data: &Value) {
        let mut identity = self.identity.write();
        if let Some(user) = data.get("user") {
            identity.user = serde_json::from_value(user.clone()).ok();
        }
        if let Some(application) = data.get("application") {
            identity.application = serde_json::from_value(application.clone()).ok();
        }
    }
}

pub(crate) type SubscribeReply = oneshot::Sender<Result<(u64, mpsc::UnboundedReceiver<Value>)>>;

/// Commands sent from client handles to the driver
pub(crate) enum Op {
    Request {
        cmd: Command,
        args: Option<Value>,
        evt: Option<EventKind>,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// SUBSCRIBE + local registration once the peer acknowledges
    Subscribe {
        event: EventKind,
        args: Value,
        reply: SubscribeReply,
    },
    /// UNSUBSCRIBE + removal of the local registration
    Unsubscribe {
        event: EventKind,
        args: Value,
        id: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Login finished; resubscribe, release the queue, then acknowledge
    MarkReady {
        reply: oneshot::Sender<()>,
    },
    EndpointDiscovered(Result<String>),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What to do when a matched response arrives
enum Waiter {
    Caller(oneshot::Sender<Result<Value>>),
    Subscribe {
        event: EventKind,
        args: Value,
        reply: SubscribeReply,
    },
    Unsubscribe {
        id: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    /// AUTHENTICATE re-issued internally after a reconnect
    Reauthenticate,
    /// SUBSCRIBE re-issued internally after a reconnect
    Resubscribe(EventKind),
}

enum Phase {
    /// Waiting for the READY dispatch; `notify` resolves the initial
    /// connect call and is absent on reconnects
    AwaitingReady {
        notify: Option<oneshot::Sender<Result<()>>>,
        deadline: Option<Instant>,
    },
    Connected,
    Ready,
}

enum Exit {
    Shutdown,
    Fatal,
    Reconnect { code: Option<u16> },
}

/// Driver task owning one connection's protocol state
pub(crate) struct SessionDriver {
    shared: Arc<Shared>,
    transport: Transport,
    ops_rx: mpsc::UnboundedReceiver<Op>,
    ops_tx: mpsc::UnboundedSender<Op>,
    pending: HashMap<String, Waiter>,
    queue: VecDeque<Op>,
    phase: Phase,
    /// Set once Ready has been reached; drives resubscription after a
    /// scope-less session reconnects
    was_ready: bool,
    discovery_started: bool,
    /// Loopback reconnect counter; selects the next port in the range
    retry: u32,
}

impl SessionDriver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        transport: Transport,
        ops_rx: mpsc::UnboundedReceiver<Op>,
        ops_tx: mpsc::UnboundedSender<Op>,
        notify: oneshot::Sender<Result<()>>,
        deadline: Instant,
    ) -> Self {
        Self {
            shared,
            transport,
            ops_rx,
            ops_tx,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            phase: Phase::AwaitingReady {
                notify: Some(notify),
                deadline: Some(deadline),
            },
            was_ready: false,
            discovery_started: false,
            retry: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            match self.drive_connection().await {
                Exit::Shutdown | Exit::Fatal => break,
                Exit::Reconnect { code } => {
                    self.retry = if code == Some(close_codes::CLOSE_ABNORMAL) {
                        self.retry.saturating_add(1)
                    } else {
                        0
                    };
                    if !self.reconnect().await {
                        break;
                    }
                }
            }
        }
        self.finalize();
    }

    /// Event loop for one connection; returns how it ended
    async fn drive_connection(&mut self) -> Exit {
        loop {
            let deadline = match &self.phase {
                Phase::AwaitingReady {
                    deadline: Some(deadline),
                    ..
                } => Some(*deadline),
                _ => None,
            };

            tokio::select! {
                event = self.transport.recv() => match event {
                    Ok(TransportEvent::Message(message)) => {
                        if let Some(exit) = self.handle_message(message).await {
                            return exit;
                        }
                    }
                    Ok(TransportEvent::Closed(info)) => return self.handle_close(info),
                    Err(err) => {
                        tracing::error!(%err, "transport failure");
                        self.shared.emit(ClientEvent::Error {
                            message: err.to_string(),
                        });
                        return self.handle_close(CloseInfo::default());
                    }
                },
                op = self.ops_rx.recv() => match op {
                    Some(op) => {
                        if let Some(exit) = self.handle_op(op).await {
                            return exit;
                        }
                    }
                    // every client handle dropped
                    None => return Exit::Shutdown,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    tracing::warn!("connection timed out waiting for READY");
                    if let Phase::AwaitingReady { notify, .. } = &mut self.phase {
                        if let Some(tx) = notify.take() {
                            let _ = tx.send(Err(RpcError::ConnectionTimeout));
                        }
                    }
                    return Exit::Fatal;
                }
            }
        }
    }

    async fn handle_op(&mut self, op: Op) -> Option<Exit> {
        match op {
            Op::MarkReady { reply } => {
                self.mark_ready().await;
                let _ = reply.send(());
                None
            }
            Op::EndpointDiscovered(result) => {
                self.store_endpoint(result);
                None
            }
            Op::Shutdown { reply } => {
                if let Err(err) = self.transport.close().await {
                    tracing::debug!(%err, "error closing transport");
                }
                self.reject_pending();
                let _ = reply.send(());
                Some(Exit::Shutdown)
            }
            op => {
                // AUTHORIZE/AUTHENTICATE bootstrap the session and bypass
                // the not-ready queue
                let bootstrap = matches!(
                    &op,
                    Op::Request {
                        cmd: Command::Authorize | Command::Authenticate,
                        ..
                    }
                );
                if matches!(self.phase, Phase::Ready) || bootstrap {
                    self.submit(op).await;
                } else {
                    self.enqueue(op);
                }
                None
            }
        }
    }

    /// Put an operation on the wire with a fresh nonce
    async fn submit(&mut self, op: Op) {
        match op {
            Op::Request {
                cmd,
                args,
                evt,
                reply,
            } => {
                self.send_request(cmd, args, evt, Waiter::Caller(reply)).await;
            }
            Op::Subscribe { event, args, reply } => {
                let send_args = option_args(&args);
                self.send_request(
                    Command::Subscribe,
                    send_args,
                    Some(event),
                    Waiter::Subscribe { event, args, reply },
                )
                .await;
            }
            Op::Unsubscribe {
                event,
                args,
                id,
                reply,
            } => {
                let send_args = option_args(&args);
                self.send_request(
                    Command::Unsubscribe,
                    send_args,
                    Some(event),
                    Waiter::Unsubscribe { id, reply },
                )
                .await;
            }
            // handled in handle_op
            Op::MarkReady { .. } | Op::EndpointDiscovered(_) | Op::Shutdown { .. } => {}
        }
    }

    fn enqueue(&mut self, op: Op) {
        if self.queue.len() >= REQUEST_QUEUE_LIMIT {
            reject_op(
                op,
                RpcError::RequestQueueFull {
                    limit: REQUEST_QUEUE_LIMIT,
                },
            );
            return;
        }
        tracing::debug!(depth = self.queue.len() + 1, "deferring operation until ready");
        self.queue.push_back(op);
    }

    async fn handle_message(&mut self, message: IncomingMessage) -> Option<Exit> {
        // the local-socket peer reveals its REST endpoint once AUTHORIZE
        // succeeds
        if message.cmd == Command::Authorize
            && !message.is_error()
            && self.transport.kind() == TransportKind::LocalSocket
            && !self.discovery_started
        {
            self.discovery_started = true;
            self.spawn_discovery();
        }

        if let Some(nonce) = message.nonce.clone() {
            if let Some(waiter) = self.pending.remove(&nonce) {
                return self.settle(waiter, message).await;
            }
            if message.cmd != Command::Dispatch {
                // late response after local cleanup
                tracing::trace!(%nonce, cmd = ?message.cmd, "ignoring response for unknown nonce");
                return None;
            }
        }

        if message.cmd == Command::Dispatch {
            return self.handle_dispatch(message).await;
        }
        None
    }

    /// Resolve or reject a waiter with a matched response
    async fn settle(&mut self, waiter: Waiter, message: IncomingMessage) -> Option<Exit> {
        let result = if message.is_error() {
            let (code, text) = message.error_parts();
            Err(RpcError::Protocol {
                code,
                message: text,
            })
        } else {
            Ok(message.data.unwrap_or(Value::Null))
        };

        match waiter {
            Waiter::Caller(reply) => {
                let _ = reply.send(result);
                None
            }
            Waiter::Subscribe { event, args, reply } => {
                match result {
                    Ok(_) => {
                        // registration becomes active only now, with the
                        // ack settled, so no following dispatch is lost
                        let registered = self.shared.subs.lock().register(event, args, true);
                        let _ = reply.send(Ok(registered));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
                None
            }
            Waiter::Unsubscribe { id, reply } => {
                match result {
                    Ok(_) => {
                        self.shared.subs.lock().remove(id);
                        let _ = reply.send(Ok(()));
                    }
                    // the registration stays if the peer refused
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
                None
            }
            Waiter::Reauthenticate => match result {
                Ok(data) => {
                    self.shared.store_identity_payload(&data);
                    tracing::info!("re-authenticated after reconnect");
                    self.mark_ready().await;
                    None
                }
                Err(err) => {
                    tracing::error!(%err, "re-authentication failed");
                    self.shared.emit(ClientEvent::Error {
                        message: err.to_string(),
                    });
                    self.reject_pending();
                    if let Err(err) = self.transport.close().await {
                        tracing::debug!(%err, "error closing transport");
                    }
                    Some(Exit::Fatal)
                }
            },
            Waiter::Resubscribe(event) => {
                if let Err(err) = result {
                    tracing::warn!(%err, event = ?event, "resubscription rejected");
                }
                None
            }
        }
    }

    async fn handle_dispatch(&mut self, message: IncomingMessage) -> Option<Exit> {
        let event = match message.evt {
            Some(event) => event,
            None => {
                tracing::trace!("dispatch without an event");
                return None;
            }
        };
        let data = message.data.unwrap_or(Value::Null);

        match event {
            EventKind::Ready => self.on_transport_ready().await,
            EventKind::Error => {
                // an ERROR dispatch not tied to a nonce is fatal
                let code = data.get("code").and_then(Value::as_u64).unwrap_or(0);
                let text = data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown RPC error");
                tracing::error!(code, message = text, "fatal error dispatch");
                self.shared.emit(ClientEvent::Error {
                    message: format!("RPC error {code}: {text}"),
                });
                self.reject_pending();
                if let Err(err) = self.transport.close().await {
                    tracing::debug!(%err, "error closing transport");
                }
                Some(Exit::Fatal)
            }
            _ => {
                let delivered = self.shared.subs.lock().dispatch(event, &data);
                tracing::trace!(?event, delivered, "dispatch");
                self.shared.emit(ClientEvent::Dispatch { event, data });
                None
            }
        }
    }

    async fn on_transport_ready(&mut self) -> Option<Exit> {
        match std::mem::replace(&mut self.phase, Phase::Connected) {
            Phase::AwaitingReady {
                notify: Some(notify),
                ..
            } => {
                self.shared.set_state(SessionState::Connected);
                self.shared.emit(ClientEvent::Connected);
                tracing::info!("connected");
                let _ = notify.send(Ok(()));
            }
            Phase::AwaitingReady { notify: None, .. } => {
                // reconnect: restore the session before releasing queued work
                self.shared.set_state(SessionState::Connected);
                self.shared.emit(ClientEvent::Connected);
                let token = self.shared.identity.read().access_token.clone();
                if let Some(token) = token {
                    self.shared.set_state(SessionState::Authenticating);
                    self.send_request(
                        Command::Authenticate,
                        Some(json!({ "access_token": token })),
                        None,
                        Waiter::Reauthenticate,
                    )
                    .await;
                } else if self.was_ready {
                    self.mark_ready().await;
                }
            }
            other => {
                self.phase = other;
                tracing::trace!("duplicate READY dispatch");
            }
        }
        None
    }

    /// Enter Ready: resubscribe active subscriptions first, then flush the
    /// deferred queue in FIFO order
    async fn mark_ready(&mut self) {
        self.resubscribe_active().await;
        self.phase = Phase::Ready;
        self.was_ready = true;
        self.shared.set_state(SessionState::Ready);
        self.shared.emit(ClientEvent::Ready);
        self.flush_queue().await;
    }

    async fn resubscribe_active(&mut self) {
        let active = self.shared.subs.lock().active();
        for (event, args) in active {
            tracing::debug!(event = ?event, "resubscribing");
            self.send_request(
                Command::Subscribe,
                option_args(&args),
                Some(event),
                Waiter::Resubscribe(event),
            )
            .await;
        }
    }

    async fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        tracing::debug!(count = self.queue.len(), "flushing deferred requests");
        while let Some(op) = self.queue.pop_front() {
            self.submit(op).await;
        }
    }

    async fn send_request(
        &mut self,
        cmd: Command,
        args: Option<Value>,
        evt: Option<EventKind>,
        waiter: Waiter,
    ) {
        let nonce = Uuid::new_v4().to_string();
        let message = OutgoingMessage {
            cmd,
            args,
            evt,
            nonce: Some(nonce.clone()),
        };
        tracing::debug!(?cmd, %nonce, "sending request");
        match self.transport.send(&message).await {
            Ok(()) => {
                self.pending.insert(nonce, waiter);
            }
            Err(err) => {
                tracing::error!(%err, ?cmd, "failed to write request");
                reject_waiter(waiter, RpcError::ConnectionClosed);
            }
        }
    }

    fn handle_close(&mut self, info: CloseInfo) -> Exit {
        tracing::info!(code = ?info.code, reason = ?info.reason, "connection closed");
        self.reject_pending();

        if let Phase::AwaitingReady { notify, .. } = &mut self.phase {
            if let Some(tx) = notify.take() {
                // close before READY fails the connect call outright
                let _ = tx.send(Err(RpcError::ConnectionClosed));
                return Exit::Fatal;
            }
        }

        match self.transport.kind() {
            // the local socket never reconnects on its own
            TransportKind::LocalSocket => Exit::Fatal,
            TransportKind::Loopback => match info.code {
                Some(code) if (4000..5000).contains(&code) => {
                    self.shared.emit(ClientEvent::Error {
                        message: format!("peer closed the connection: code {code}"),
                    });
                    Exit::Fatal
                }
                code => Exit::Reconnect { code },
            },
        }
    }

    /// Reopen the loopback transport, advancing through the port range.
    /// Returns false if a shutdown was requested while waiting.
    async fn reconnect(&mut self) -> bool {
        self.shared.set_state(SessionState::Connecting);
        loop {
            if !self.wait_reconnect_delay().await {
                return false;
            }
            match Transport::connect(&self.shared.config, self.retry).await {
                Ok(transport) => {
                    if let Transport::Loopback(ws) = &transport {
                        *self.shared.endpoint.write() = Some(ws.http_endpoint());
                    }
                    self.transport = transport;
                    self.phase = Phase::AwaitingReady {
                        notify: None,
                        deadline: None,
                    };
                    tracing::info!(retry = self.retry, "reconnected, waiting for READY");
                    return true;
                }
                Err(err) => {
                    tracing::warn!(%err, retry = self.retry, "reconnect attempt failed");
                    self.retry = self.retry.saturating_add(1);
                }
            }
        }
    }

    /// Sleep out the reconnect delay while still answering ops
    async fn wait_reconnect_delay(&mut self) -> bool {
        let sleep = tokio::time::sleep(RECONNECT_DELAY);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                op = self.ops_rx.recv() => match op {
                    Some(Op::Shutdown { reply }) => {
                        let _ = reply.send(());
                        return false;
                    }
                    Some(Op::MarkReady { .. }) => {
                        tracing::warn!("ignoring ready mark while disconnected");
                    }
                    Some(Op::EndpointDiscovered(result)) => self.store_endpoint(result),
                    Some(op) => self.enqueue(op),
                    None => return false,
                }
            }
        }
    }

    fn spawn_discovery(&self) {
        let http = self.shared.http.clone();
        let port_base = self.shared.config.port_base;
        let ops = self.ops_tx.clone();
        tokio::spawn(async move {
            let result = discovery::find_endpoint(&http, port_base).await;
            let _ = ops.send(Op::EndpointDiscovered(result));
        });
    }

    fn store_endpoint(&mut self, result: Result<String>) {
        match result {
            Ok(endpoint) => {
                tracing::info!(%endpoint, "discovered local HTTP endpoint");
                *self.shared.endpoint.write() = Some(endpoint);
            }
            Err(err) => {
                // discovery failure never fails the session
                tracing::warn!(%err, "endpoint discovery failed");
                self.shared.emit(ClientEvent::Error {
                    message: err.to_string(),
                });
            }
        }
    }

    /// Reject every in-flight request with a connection-closed error
    fn reject_pending(&mut self) {
        for (_, waiter) in self.pending.drain() {
            reject_waiter(waiter, RpcError::ConnectionClosed);
        }
    }

    fn finalize(mut self) {
        self.reject_pending();
        for op in self.queue.drain(..) {
            reject_op(op, RpcError::ConnectionClosed);
        }
        self.shared.clear_ops();
        self.shared.set_state(SessionState::Closed);
        self.shared.emit(ClientEvent::Disconnected);
        tracing::info!("session closed");
    }
}

fn option_args(args: &Value) -> Option<Value> {
    if args.is_null() {
        None
    } else {
        Some(args.clone())
    }
}

fn reject_op(op: Op, err: RpcError) {
    match op {
        Op::Request { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Op::Subscribe { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Op::Unsubscribe { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Op::MarkReady { .. } | Op::EndpointDiscovered(_) => {}
        Op::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

fn reject_waiter(waiter: Waiter, err: RpcError) {
    match waiter {
        Waiter::Caller(reply) => {
            let _ = reply.send(Err(err));
        }
        Waiter::Subscribe { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Waiter::Unsubscribe { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Waiter::Reauthenticate | Waiter::Resubscribe(_) => {}
    }
}
