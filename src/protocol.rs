//! Wire vocabulary shared by both transports
//!
//! Defines the closed command/event enums and the logical message shape that
//! the session layer exchanges with the peer:
//!
//! ```json
//! // outbound request
//! {"cmd":"GET_GUILD","args":{"guild_id":"1234"},"nonce":"..."}
//!
//! // inbound response (nonce echoed) or dispatch (no nonce)
//! {"cmd":"DISPATCH","evt":"MESSAGE_CREATE","data":{...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent during the transport handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// First port of the local HTTP/WebSocket port range
pub const DEFAULT_PORT_BASE: u16 = 6463;

/// Number of ports in the local port range
pub const PORT_RANGE: u16 = 10;

/// Base URL of the vendor HTTP API (OAuth2 token exchange)
pub const API_BASE_URL: &str = "https://discord.com/api";

/// Commands understood by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Authenticate,
    Authorize,
    CaptureShortcut,
    CloseActivityRequest,
    Dispatch,
    GetChannel,
    GetChannels,
    GetGuild,
    GetGuilds,
    GetSelectedVoiceChannel,
    GetVoiceSettings,
    SelectTextChannel,
    SelectVoiceChannel,
    SendActivityJoinInvite,
    SetActivity,
    SetCertifiedDevices,
    SetUserVoiceSettings,
    SetVoiceSettings,
    Subscribe,
    Unsubscribe,
}

/// Dispatch events emitted by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ActivityJoin,
    ActivityJoinRequest,
    ActivitySpectate,
    CaptureShortcutChange,
    ChannelCreate,
    Error,
    GuildCreate,
    GuildStatus,
    MessageCreate,
    MessageDelete,
    MessageUpdate,
    NotificationCreate,
    Ready,
    SpeakingStart,
    SpeakingStop,
    VoiceChannelSelect,
    VoiceConnectionStatus,
    VoiceSettingsUpdate,
    VoiceStateCreate,
    VoiceStateDelete,
    VoiceStateUpdate,
}

/// Outbound logical message
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub cmd: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evt: Option<EventKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Inbound logical message, after transport decode
///
/// `nonce` is present on request/response pairs and absent on unsolicited
/// dispatches.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub cmd: Command,
    #[serde(default)]
    pub evt: Option<EventKind>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl IncomingMessage {
    /// Whether this message reports a peer-side error
    pub fn is_error(&self) -> bool {
        self.evt == Some(EventKind::Error)
    }

    /// Peer error payload as `(code, message)`
    pub fn error_parts(&self) -> (u64, String) {
        let code = self
            .data
            .as_ref()
            .and_then(|d| d.get("code"))
            .and_then(Value::as_u64)
            .unwrap_or(error_codes::UNKNOWN_ERROR);
        let message = self
            .data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown RPC error")
            .to_string();
        (code, message)
    }
}

/// Error codes the peer attaches to ERROR payloads
pub mod error_codes {
    pub const UNKNOWN_ERROR: u64 = 1000;
    pub const INVALID_PAYLOAD: u64 = 4000;
    pub const INVALID_COMMAND: u64 = 4002;
    pub const INVALID_GUILD: u64 = 4003;
    pub const INVALID_EVENT: u64 = 4004;
    pub const INVALID_CHANNEL: u64 = 4005;
    pub const INVALID_PERMISSIONS: u64 = 4006;
    pub const INVALID_CLIENT_ID: u64 = 4007;
    pub const INVALID_ORIGIN: u64 = 4008;
    pub const INVALID_TOKEN: u64 = 4009;
    pub const INVALID_USER: u64 = 4010;
    pub const OAUTH2_ERROR: u64 = 5000;
    pub const SELECT_CHANNEL_TIMEOUT: u64 = 5001;
    pub const GET_GUILD_TIMEOUT: u64 = 5002;
    pub const SELECT_VOICE_FORCE_REQUIRED: u64 = 5003;
    pub const CAPTURE_SHORTCUT_ALREADY_LISTENING: u64 = 5004;
}

/// WebSocket close codes used by the peer
pub mod close_codes {
    pub const CLOSE_NORMAL: u16 = 1000;
    pub const CLOSE_UNSUPPORTED: u16 = 1003;
    pub const CLOSE_ABNORMAL: u16 = 1006;
    pub const INVALID_CLIENT_ID: u16 = 4000;
    pub const INVALID_ORIGIN: u16 = 4001;
    pub const RATELIMITED: u16 = 4002;
    pub const TOKEN_REVOKED: u16 = 4003;
    pub const INVALID_VERSION: u16 = 4004;
    pub const INVALID_ENCODING: u16 = 4005;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_serialize_as_screaming_snake_case() {
        let json = serde_json::to_string(&Command::GetSelectedVoiceChannel).unwrap();
        assert_eq!(json, "\"GET_SELECTED_VOICE_CHANNEL\"");
        let json = serde_json::to_string(&EventKind::CaptureShortcutChange).unwrap();
        assert_eq!(json, "\"CAPTURE_SHORTCUT_CHANGE\"");
    }

    #[test]
    fn incoming_message_parses_dispatch() {
        let raw = r#"{"cmd":"DISPATCH","evt":"READY","data":{"v":1}}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.cmd, Command::Dispatch);
        assert_eq!(msg.evt, Some(EventKind::Ready));
        assert!(msg.nonce.is_none());
        assert!(!msg.is_error());
    }

    #[test]
    fn outgoing_message_omits_empty_fields() {
        let msg = OutgoingMessage {
            cmd: Command::SetActivity,
            args: Some(json!({"pid": 42})),
            evt: None,
            nonce: Some("abc".into()),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"cmd": "SET_ACTIVITY", "args": {"pid": 42}, "nonce": "abc"}));
    }

    #[test]
    fn error_parts_fall_back_to_defaults() {
        let raw = r#"{"cmd":"SET_ACTIVITY","evt":"ERROR","nonce":"n"}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_error());
        let (code, message) = msg.error_parts();
        assert_eq!(code, error_codes::UNKNOWN_ERROR);
        assert_eq!(message, "unknown RPC error");
    }
}
