//! Public client surface
//!
//! [`Client`] is a cheap-to-clone handle onto one session. All operations
//! that talk to the peer suspend until a matching response or a terminal
//! failure; none applies a client-side per-request timeout (the `timeout`
//! arguments below are forwarded to the peer, which enforces them).

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use crate::activity::Activity;
use crate::auth;
use crate::error::{Result, RpcError};
use crate::models::{
    Application, CertifiedDevice, Channel, Guild, User, UserVoiceSettings, VoiceSettings,
};
use crate::protocol::{Command, EventKind, API_BASE_URL, DEFAULT_PORT_BASE};
use crate::session::{
    ClientEvent, Op, SessionDriver, SessionState, Shared, CONNECT_TIMEOUT,
};
use crate::transport::{Transport, TransportKind};

/// Transport selection plus connection knobs
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// OAuth2 application client id
    pub client_id: String,
    pub transport: TransportKind,
    /// First port of the loopback range (WebSocket and discovery probes)
    pub port_base: u16,
    /// Directory holding the unix socket, overriding the runtime-dir search
    pub socket_dir: Option<PathBuf>,
    /// Origin header for the loopback transport
    pub origin: Option<String>,
    /// Base URL for the OAuth2 endpoints
    pub api_base_url: String,
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            transport: TransportKind::LocalSocket,
            port_base: DEFAULT_PORT_BASE,
            socket_dir: None,
            origin: None,
            api_base_url: API_BASE_URL.to_string(),
        }
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn port_base(mut self, port_base: u16) -> Self {
        self.port_base = port_base;
        self
    }

    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

/// Options for [`Client::login`]
///
/// With no scopes the session is usable right after the transport
/// handshake; with scopes the full authorize → token exchange →
/// authenticate flow runs first.
#[derive(Debug, Clone, Default)]
pub struct LoginArgs {
    pub scopes: Vec<String>,
    pub client_secret: Option<String>,
    /// Skip AUTHORIZE and authenticate with this token directly
    pub access_token: Option<String>,
    /// One-time RPC token to attach to AUTHORIZE
    pub rpc_token: Option<String>,
    /// Fetch the RPC token from the vendor endpoint before AUTHORIZE
    pub fetch_rpc_token: bool,
    /// Caller-supplied endpoint answering `{"rpc_token": ...}`
    pub token_endpoint: Option<String>,
    pub redirect_uri: Option<String>,
}

impl LoginArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn rpc_token(mut self, token: impl Into<String>) -> Self {
        self.rpc_token = Some(token.into());
        self
    }

    pub fn fetch_rpc_token(mut self) -> Self {
        self.fetch_rpc_token = true;
        self
    }

    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }
}

/// Handle to one RPC session
///
/// Clones share the same session. A process may hold any number of
/// independent clients; nothing is shared between them.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Authenticated user, once AUTHENTICATE has succeeded
    pub fn user(&self) -> Option<User> {
        self.shared.identity.read().user.clone()
    }

    /// Application of the authenticated session
    pub fn application(&self) -> Option<Application> {
        self.shared.identity.read().application.clone()
    }

    /// Discovered REST-style base URL, once known
    pub fn rest_endpoint(&self) -> Option<String> {
        self.shared.endpoint.read().clone()
    }

    /// Subscribe to session lifecycle and dispatch events
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.subscribe_events()
    }

    /// Open the transport and wait for the peer's READY dispatch
    ///
    /// Succeeds immediately if a connection is already established; a
    /// concurrent connect in flight is awaited rather than duplicated.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.ops().is_ok() {
            let mut events = self.shared.subscribe_events();
            match self.state() {
                SessionState::Connected
                | SessionState::Authorizing
                | SessionState::Authenticating
                | SessionState::Ready => return Ok(()),
                SessionState::Connecting => {
                    loop {
                        match events.recv().await {
                            Ok(ClientEvent::Connected) | Ok(ClientEvent::Ready) => return Ok(()),
                            Ok(ClientEvent::Disconnected) => return Err(RpcError::ConnectionClosed),
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => {
                                return Err(RpcError::ConnectionClosed)
                            }
                        }
                    }
                }
                // the driver died between the two checks; reconnect
                _ => {}
            }
        }

        self.shared.set_state(SessionState::Connecting);
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        let transport =
            match tokio::time::timeout_at(deadline, Transport::connect(&self.shared.config, 0))
                .await
            {
                Ok(Ok(transport)) => transport,
                Ok(Err(err)) => {
                    self.shared.set_state(SessionState::Closed);
                    return Err(err);
                }
                Err(_) => {
                    self.shared.set_state(SessionState::Closed);
                    return Err(RpcError::ConnectionTimeout);
                }
            };
        if let Transport::Loopback(ws) = &transport {
            *self.shared.endpoint.write() = Some(ws.http_endpoint());
        }

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        self.shared.install_ops(ops_tx.clone());
        let driver = SessionDriver::new(
            Arc::clone(&self.shared),
            transport,
            ops_rx,
            ops_tx,
            ready_tx,
            deadline,
        );
        tokio::spawn(driver.run());

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }

    /// Connect (if needed) and perform the authentication flow
    pub async fn login(&self, args: LoginArgs) -> Result<()> {
        self.connect().await?;

        if args.scopes.is_empty() {
            return self.mark_ready().await;
        }

        let result = self.login_with_scopes(&args).await;
        if result.is_err()
            && matches!(
                self.state(),
                SessionState::Authorizing | SessionState::Authenticating
            )
        {
            self.shared.set_state(SessionState::Connected);
        }
        result
    }

    async fn login_with_scopes(&self, args: &LoginArgs) -> Result<()> {
        let access_token = match args.access_token.clone() {
            Some(token) => token,
            None => self.authorize(args).await?,
        };
        self.authenticate(access_token).await
    }

    /// AUTHORIZE with the requested scopes and exchange the returned code
    /// for an access token
    async fn authorize(&self, args: &LoginArgs) -> Result<String> {
        self.shared.set_state(SessionState::Authorizing);

        let rpc_token = if let Some(token) = args.rpc_token.clone() {
            Some(token)
        } else if let Some(endpoint) = &args.token_endpoint {
            Some(auth::fetch_rpc_token_from(&self.shared.http, endpoint).await?)
        } else if args.fetch_rpc_token {
            let secret = args.client_secret.as_deref().ok_or_else(|| {
                RpcError::InvalidConfig {
                    message: "client_secret is required to fetch an RPC token".into(),
                }
            })?;
            Some(
                auth::fetch_rpc_token(
                    &self.shared.http,
                    &self.shared.config.api_base_url,
                    &self.shared.config.client_id,
                    secret,
                )
                .await?,
            )
        } else {
            None
        };

        let data = self
            .request(
                Command::Authorize,
                Some(serde_json::to_value(AuthorizeArgs {
                    scopes: &args.scopes,
                    client_id: &self.shared.config.client_id,
                    rpc_token,
                })?),
                None,
            )
            .await?;
        let code = data
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Decode {
                message: "AUTHORIZE response missing code".into(),
            })?;

        let secret = args.client_secret.as_deref().ok_or_else(|| {
            RpcError::InvalidConfig {
                message: "client_secret is required to exchange the authorization code".into(),
            }
        })?;
        auth::exchange_code(
            &self.shared.http,
            &self.shared.config.api_base_url,
            &self.shared.config.client_id,
            secret,
            code,
            args.redirect_uri.as_deref(),
        )
        .await
    }

    /// AUTHENTICATE with an access token and mark the session ready
    pub async fn authenticate(&self, access_token: String) -> Result<()> {
        self.shared.set_state(SessionState::Authenticating);
        let data = self
            .request(
                Command::Authenticate,
                Some(json!({ "access_token": access_token })),
                None,
            )
            .await?;
        self.shared.identity.write().access_token = Some(access_token);
        self.shared.store_identity_payload(&data);
        self.mark_ready().await
    }

    /// Resolves once the driver has resubscribed and flushed the queue
    async fn mark_ready(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .ops()?
            .send(Op::MarkReady { reply: reply_tx })
            .map_err(|_| RpcError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| RpcError::ConnectionClosed)
    }

    /// Close the connection; all outstanding requests are rejected
    ///
    /// Subscriptions are retained so a later [`Client::connect`] +
    /// [`Client::login`] resubscribes them.
    pub async fn destroy(&self) -> Result<()> {
        let ops = match self.shared.ops() {
            Ok(ops) => ops,
            // already closed
            Err(_) => return Ok(()),
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if ops.send(Op::Shutdown { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
        Ok(())
    }

    /// Send a command and suspend until its response arrives
    pub(crate) async fn request(
        &self,
        cmd: Command,
        args: Option<Value>,
        evt: Option<EventKind>,
    ) -> Result<Value> {
        let ops = self.shared.ops()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        ops.send(Op::Request {
            cmd,
            args,
            evt,
            reply: reply_tx,
        })
        .map_err(|_| RpcError::ConnectionClosed)?;
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }

    /// Fetch a guild by id
    pub async fn get_guild(&self, id: &str, timeout: Option<u32>) -> Result<Guild> {
        let data = self
            .request(
                Command::GetGuild,
                Some(serde_json::to_value(GuildArgs {
                    guild_id: id,
                    timeout,
                })?),
                None,
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Fetch all guilds visible to the session
    pub async fn get_guilds(&self, timeout: Option<u32>) -> Result<Vec<Guild>> {
        let data = self
            .request(
                Command::GetGuilds,
                Some(serde_json::to_value(TimeoutArgs { timeout })?),
                None,
            )
            .await?;
        let guilds = data.get("guilds").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(guilds)?)
    }

    /// Fetch a channel by id
    pub async fn get_channel(&self, id: &str, timeout: Option<u32>) -> Result<Channel> {
        let data = self
            .request(
                Command::GetChannel,
                Some(serde_json::to_value(ChannelArgs {
                    channel_id: id,
                    timeout,
                })?),
                None,
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Fetch the channels of a guild, or of every guild when `guild_id` is
    /// `None`
    pub async fn get_channels(
        &self,
        guild_id: Option<&str>,
        timeout: Option<u32>,
    ) -> Result<Vec<Channel>> {
        let data = self
            .request(
                Command::GetChannels,
                Some(serde_json::to_value(ChannelsArgs { guild_id, timeout })?),
                None,
            )
            .await?;
        let channels = data.get("channels").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(channels)?)
    }

    /// Voice channel the user is currently in, if any
    pub async fn get_selected_voice_channel(&self) -> Result<Option<Channel>> {
        let data = self
            .request(Command::GetSelectedVoiceChannel, None, None)
            .await?;
        if data.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(data)?))
    }

    /// Move the user into a voice channel
    ///
    /// `force` should only be set with the user's explicit permission.
    pub async fn select_voice_channel(
        &self,
        id: &str,
        timeout: Option<u32>,
        force: bool,
    ) -> Result<Option<Channel>> {
        let data = self
            .request(
                Command::SelectVoiceChannel,
                Some(serde_json::to_value(SelectVoiceArgs {
                    channel_id: id,
                    timeout,
                    force,
                })?),
                None,
            )
            .await?;
        if data.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(data)?))
    }

    /// Move the user into a text channel
    pub async fn select_text_channel(
        &self,
        id: &str,
        timeout: Option<u32>,
    ) -> Result<Option<Channel>> {
        let data = self
            .request(
                Command::SelectTextChannel,
                Some(serde_json::to_value(ChannelArgs {
                    channel_id: id,
                    timeout,
                })?),
                None,
            )
            .await?;
        if data.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(data)?))
    }

    /// Current voice settings
    pub async fn get_voice_settings(&self) -> Result<VoiceSettings> {
        let data = self.request(Command::GetVoiceSettings, None, None).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Override voice settings until this session disconnects
    pub async fn set_voice_settings(&self, settings: VoiceSettings) -> Result<VoiceSettings> {
        let data = self
            .request(
                Command::SetVoiceSettings,
                Some(serde_json::to_value(settings)?),
                None,
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Set voice settings for a single user
    pub async fn set_user_voice_settings(
        &self,
        user_id: &str,
        mut settings: UserVoiceSettings,
    ) -> Result<Value> {
        settings.user_id = Some(user_id.to_string());
        self.request(
            Command::SetUserVoiceSettings,
            Some(serde_json::to_value(settings)?),
            None,
        )
        .await
    }

    /// Set the rich presence for the logged-in user
    pub async fn set_activity(&self, activity: Activity) -> Result<Value> {
        self.set_activity_with_pid(activity, std::process::id()).await
    }

    /// Set the rich presence, attributing it to an explicit process id
    pub async fn set_activity_with_pid(&self, activity: Activity, pid: u32) -> Result<Value> {
        // range-checked before anything reaches the wire
        activity.validate()?;
        self.request(
            Command::SetActivity,
            Some(serde_json::to_value(SetActivityArgs {
                pid,
                activity: Some(activity),
            })?),
            None,
        )
        .await
    }

    /// Clear the currently set presence, if any
    pub async fn clear_activity(&self) -> Result<Value> {
        self.request(
            Command::SetActivity,
            Some(serde_json::to_value(SetActivityArgs {
                pid: std::process::id(),
                activity: None,
            })?),
            None,
        )
        .await
    }

    /// Invite a user to join the current game
    pub async fn send_join_invite(&self, user_id: &str) -> Result<Value> {
        self.request(
            Command::SendActivityJoinInvite,
            Some(json!({ "user_id": user_id })),
            None,
        )
        .await
    }

    /// Reject a join request from a user
    pub async fn close_join_request(&self, user_id: &str) -> Result<Value> {
        self.request(
            Command::CloseActivityRequest,
            Some(json!({ "user_id": user_id })),
            None,
        )
        .await
    }

    /// Tell the peer which certified devices are in use
    pub async fn set_certified_devices(&self, devices: Vec<CertifiedDevice>) -> Result<()> {
        self.request(
            Command::SetCertifiedDevices,
            Some(json!({ "devices": devices })),
            None,
        )
        .await?;
        Ok(())
    }

    /// Subscribe to a dispatch event, with `args` as the peer-side filter
    ///
    /// The local registration only becomes active once the peer has
    /// acknowledged the SUBSCRIBE; the session driver makes it in the same
    /// step that settles the acknowledgement, so no following dispatch is
    /// missed.
    pub async fn subscribe(&self, event: EventKind, args: Value) -> Result<Subscription> {
        let ops = self.shared.ops()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        ops.send(Op::Subscribe {
            event,
            args: args.clone(),
            reply: reply_tx,
        })
        .map_err(|_| RpcError::ConnectionClosed)?;
        let (id, rx) = match reply_rx.await {
            Ok(result) => result?,
            Err(_) => return Err(RpcError::ConnectionClosed),
        };
        Ok(Subscription {
            client: self.clone(),
            event,
            args,
            id,
            rx,
        })
    }

    /// Start capturing shortcut key combinations
    ///
    /// [`ShortcutCapture::stop`] must be called before disconnecting or the
    /// peer keeps capturing.
    pub async fn capture_shortcut(&self) -> Result<ShortcutCapture> {
        let (id, rx) = self
            .shared
            .subs
            .lock()
            .register(EventKind::CaptureShortcutChange, Value::Null, false);
        match self
            .request(
                Command::CaptureShortcut,
                Some(json!({ "action": "START" })),
                None,
            )
            .await
        {
            Ok(_) => Ok(ShortcutCapture {
                client: self.clone(),
                id,
                rx,
            }),
            Err(err) => {
                self.shared.subs.lock().remove(id);
                Err(err)
            }
        }
    }
}

/// Active subscription handle; receives matching dispatch payloads
pub struct Subscription {
    client: Client,
    event: EventKind,
    args: Value,
    id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn event(&self) -> EventKind {
        self.event
    }

    /// Next matching dispatch payload
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Tell the peer to stop sending this event and drop the registration
    pub async fn unsubscribe(self) -> Result<()> {
        let ops = self.client.shared.ops()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        ops.send(Op::Unsubscribe {
            event: self.event,
            args: self.args.clone(),
            id: self.id,
            reply: reply_tx,
        })
        .map_err(|_| RpcError::ConnectionClosed)?;
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.client.shared.subs.lock().remove(self.id);
    }
}

/// Handle returned by [`Client::capture_shortcut`]
pub struct ShortcutCapture {
    client: Client,
    id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ShortcutCapture {
    /// Next captured key combination payload
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Stop capturing shortcuts
    pub async fn stop(self) -> Result<()> {
        self.client
            .request(
                Command::CaptureShortcut,
                Some(json!({ "action": "STOP" })),
                None,
            )
            .await
            .map(|_| ())
    }
}

impl Drop for ShortcutCapture {
    fn drop(&mut self) {
        self.client.shared.subs.lock().remove(self.id);
    }
}

#[derive(Serialize)]
struct AuthorizeArgs<'a> {
    scopes: &'a [String],
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rpc_token: Option<String>,
}

#[derive(Serialize)]
struct TimeoutArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u32>,
}

#[derive(Serialize)]
struct GuildArgs<'a> {
    guild_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u32>,
}

#[derive(Serialize)]
struct ChannelArgs<'a> {
    channel_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u32>,
}

#[derive(Serialize)]
struct ChannelsArgs<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    guild_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u32>,
}

#[derive(Serialize)]
struct SelectVoiceArgs<'a> {
    channel_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u32>,
    force: bool,
}

#[derive(Serialize)]
struct SetActivityArgs {
    pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    activity: Option<Activity>,
}
