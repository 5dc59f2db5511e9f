//! Client for the Discord desktop application's local RPC protocol
//!
//! Talks to the running desktop client over one of two transports: a
//! platform inter-process socket (named pipe on Windows, unix domain socket
//! elsewhere) with a small binary framing layer, or a loopback WebSocket
//! carrying one JSON document per frame. On top of the transport, the
//! session performs the connect → authorize → authenticate handshake,
//! correlates requests to responses by nonce, and multiplexes event
//! subscriptions to per-registration channels.
//!
//! # Example
//!
//! ```ignore
//! use discord_rpc_client::{Activity, Client, ClientConfig, LoginArgs};
//!
//! let client = Client::new(ClientConfig::new("180984871685062656"));
//! client.login(LoginArgs::new()).await?;
//! client
//!     .set_activity(Activity::new().state("In the menus").details("Warmup"))
//!     .await?;
//! ```
//!
//! Sessions are independent: a process may hold several clients, each with
//! its own transport, pending-request map, and subscriptions.

pub mod activity;
mod auth;
pub mod client;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod models;
pub mod protocol;
mod session;
mod subscriptions;
pub mod transport;

// Re-export the common surface
pub use activity::{Activity, ActivitySecrets, Timestamp, MAX_TIMESTAMP_MS};
pub use client::{Client, ClientConfig, LoginArgs, ShortcutCapture, Subscription};
pub use error::{Result, RpcError};
pub use models::{
    Application, CertifiedDevice, Channel, DeviceDescriptor, DeviceType, Guild, User,
    UserVoiceSettings, VoiceSettings,
};
pub use protocol::{Command, EventKind};
pub use session::{ClientEvent, SessionState};
pub use transport::TransportKind;
