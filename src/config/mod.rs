
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::packet::TimeBase;

pub(crate) const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_GATHERING_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_STREAM_ID: &str = "whip-output";

/// WhipConfig configures how a [`WhipSession`] negotiates and carries media.
/// These may be set up once and shared by every session a factory creates.
///
/// [`WhipSession`]: crate::session::whip::WhipSession
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhipConfig {
    /// STUN/TURN urls handed to the ICE agent. Empty means host candidates only.
    pub ice_servers: Vec<String>,

    /// Upper bound for each HTTP exchange with the WHIP endpoint.
    pub request_timeout_ms: u64,

    /// Upper bound for ICE candidate gathering before the offer is sent.
    pub gathering_timeout_ms: u64,

    /// Time base of the duration ticks passed for audio packets.
    pub audio_time_base: TimeBase,

    /// Time base of the duration ticks passed for video packets.
    pub video_time_base: TimeBase,

    /// Media stream id shared by the audio and video tracks.
    pub stream_id: String,
}

impl Default for WhipConfig {
    fn default() -> Self {
        WhipConfig {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_owned()],
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            gathering_timeout_ms: DEFAULT_GATHERING_TIMEOUT_MS,
            audio_time_base: TimeBase::MICROSECONDS,
            video_time_base: TimeBase::MICROSECONDS,
            stream_id: DEFAULT_STREAM_ID.to_owned(),
        }
    }
}

impl WhipConfig {
    /// from_json parses a configuration, filling absent fields with defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: WhipConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio_time_base.validate()?;
        self.video_time_base.validate()
    }

    pub fn time_base(&self, is_audio: bool) -> TimeBase {
        if is_audio {
            self.audio_time_base
        } else {
            self.video_time_base
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }
}
