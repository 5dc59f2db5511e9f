//! Value objects decoded from response payloads
//!
//! Thin serde mappings over the peer's documents; wire field names are
//! snake_case natively so no case transformation layer is needed. Fields the
//! peer omits depending on context default to `None`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Discord user, as carried in READY and AUTHENTICATE payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: Option<bool>,
    #[serde(default)]
    pub flags: Option<u64>,
}

/// The OAuth2 application an authenticated session belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A guild from GET_GUILD / GET_GUILDS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    /// Only populated by GET_GUILD
    #[serde(default)]
    pub members: Vec<User>,
}

/// A channel from GET_CHANNEL(S) and the select commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Channel type discriminant as sent by the peer
    #[serde(rename = "type", default)]
    pub kind: Option<u8>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub user_limit: Option<u32>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub voice_states: Vec<Value>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// Pan settings for a single user, 0.0..=1.0 per side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pan {
    pub left: f32,
    pub right: f32,
}

/// Per-user voice overrides for SET_USER_VOICE_SETTINGS
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserVoiceSettings {
    /// Filled in from the call's user id argument
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan: Option<Pan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

/// An input/output device the peer reports as available
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableDevice {
    pub id: String,
    pub name: String,
}

/// One half of the audio device settings (input or output)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioDeviceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    /// Read-only; never sent back to the peer
    #[serde(default, skip_serializing)]
    pub available_devices: Option<Vec<AvailableDevice>>,
}

/// A key in a shortcut combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutKey {
    #[serde(rename = "type")]
    pub kind: u32,
    pub code: u32,
    pub name: String,
}

/// Voice mode block of the voice settings document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceMode {
    /// `PUSH_TO_TALK` or `VOICE_ACTIVITY`
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_threshold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<Vec<ShortcutKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<f32>,
}

/// Voice settings document for GET/SET_VOICE_SETTINGS
///
/// Every field is optional so the same type serves partial updates; unset
/// fields are left untouched by the peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_gain_control: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_cancellation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_suppression: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_warning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deaf: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<AudioDeviceSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AudioDeviceSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<VoiceMode>,
}

/// Hardware category of a certified device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    AudioInput,
    AudioOutput,
    VideoInput,
}

/// Vendor/model descriptor blocks of a certified device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub url: String,
}

/// A certified hardware device for SET_CERTIFIED_DEVICES
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertifiedDevice {
    #[serde(rename = "type")]
    pub kind: DeviceType,
    /// The device's Windows UUID
    pub id: String,
    pub vendor: DeviceDescriptor,
    pub model: DeviceDescriptor,
    /// Windows UUIDs of related products
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_cancellation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_suppression: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_gain_control: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_mute: Option<bool>,
}
