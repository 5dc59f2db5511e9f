//! Rich-presence activity payloads for SET_ACTIVITY
//!
//! Timestamps are millisecond unix times and must fit a 32-bit seconds
//! quantity on the peer side; out-of-range values are rejected before any
//! frame is written.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, RpcError};

/// Largest activity timestamp the peer accepts, in milliseconds
pub const MAX_TIMESTAMP_MS: u64 = 2_147_483_647_000;

/// Millisecond unix timestamp accepted by the activity builders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl From<u64> for Timestamp {
    fn from(ms: u64) -> Self {
        Timestamp(ms)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let ms = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(ms)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Timestamp(time.timestamp_millis().max(0) as u64)
    }
}

/// Start/end pair of an activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityTimestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

/// Image assets of an activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image_text: Option<String>,
}

/// Party block of an activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityParty {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `[current size, max size]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
}

/// Join/spectate secrets of an activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivitySecrets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectate: Option<String>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_secret: Option<String>,
}

/// Rich-presence payload, built up with chained setters
///
/// ```
/// use discord_rpc_client::Activity;
///
/// let activity = Activity::new()
///     .state("In a group")
///     .details("Competitive")
///     .start_timestamp(1_507_665_886_000u64)
///     .party("party-id", Some((2, 4)));
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct Activity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Whether the activity is an instanced game session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<ActivityTimestamps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<ActivityAssets>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<ActivityParty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<ActivitySecrets>,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn instance(mut self, instance: bool) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn start_timestamp(mut self, start: impl Into<Timestamp>) -> Self {
        self.timestamps.get_or_insert_with(Default::default).start = Some(start.into());
        self
    }

    pub fn end_timestamp(mut self, end: impl Into<Timestamp>) -> Self {
        self.timestamps.get_or_insert_with(Default::default).end = Some(end.into());
        self
    }

    pub fn large_image(mut self, key: impl Into<String>, text: Option<&str>) -> Self {
        let assets = self.assets.get_or_insert_with(Default::default);
        assets.large_image = Some(key.into());
        assets.large_image_text = text.map(str::to_owned);
        self
    }

    pub fn small_image(mut self, key: impl Into<String>, text: Option<&str>) -> Self {
        let assets = self.assets.get_or_insert_with(Default::default);
        assets.small_image = Some(key.into());
        assets.small_image_text = text.map(str::to_owned);
        self
    }

    pub fn party(mut self, id: impl Into<String>, size: Option<(u32, u32)>) -> Self {
        self.party = Some(ActivityParty {
            id: Some(id.into()),
            size,
        });
        self
    }

    pub fn secrets(mut self, secrets: ActivitySecrets) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Range-check the timestamps; called before the payload is sent
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(timestamps) = &self.timestamps {
            if let Some(Timestamp(start)) = timestamps.start {
                if start > MAX_TIMESTAMP_MS {
                    return Err(RpcError::TimestampTooLarge {
                        field: "timestamps.start",
                    });
                }
            }
            if let Some(Timestamp(end)) = timestamps.end {
                if end > MAX_TIMESTAMP_MS {
                    return Err(RpcError::TimestampTooLarge {
                        field: "timestamps.end",
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_produces_wire_shape() {
        let activity = Activity::new()
            .state("In the menus")
            .details("Warmup")
            .instance(true)
            .start_timestamp(1_507_665_886_000u64)
            .large_image("canary-large", Some("Snek"))
            .party("ae488379", Some((1, 5)));
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(
            value,
            json!({
                "state": "In the menus",
                "details": "Warmup",
                "instance": true,
                "timestamps": {"start": 1_507_665_886_000u64},
                "assets": {"large_image": "canary-large", "large_image_text": "Snek"},
                "party": {"id": "ae488379", "size": [1, 5]},
            })
        );
    }

    #[test]
    fn timestamps_at_the_bound_pass() {
        let activity = Activity::new().start_timestamp(MAX_TIMESTAMP_MS);
        assert!(activity.validate().is_ok());
    }

    #[test]
    fn timestamps_past_the_bound_fail() {
        // ~year 2200
        let activity = Activity::new().start_timestamp(7_258_118_400_000u64);
        assert!(matches!(
            activity.validate(),
            Err(RpcError::TimestampTooLarge {
                field: "timestamps.start"
            })
        ));

        let activity = Activity::new().end_timestamp(MAX_TIMESTAMP_MS + 1);
        assert!(matches!(
            activity.validate(),
            Err(RpcError::TimestampTooLarge {
                field: "timestamps.end"
            })
        ));
    }

    #[test]
    fn system_time_converts_to_milliseconds() {
        let Timestamp(ms) = SystemTime::UNIX_EPOCH.into();
        assert_eq!(ms, 0);
    }
}
