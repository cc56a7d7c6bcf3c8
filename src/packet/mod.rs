
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// MediaType is the kind of elementary stream a packet belongs to.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    /// Data, subtitle or attachment streams. Carried without duration.
    #[default]
    Other,
}

const MEDIA_TYPE_AUDIO_STR: &str = "audio";
const MEDIA_TYPE_VIDEO_STR: &str = "video";
const MEDIA_TYPE_OTHER_STR: &str = "other";

impl From<&str> for MediaType {
    fn from(raw: &str) -> Self {
        match raw {
            MEDIA_TYPE_AUDIO_STR => MediaType::Audio,
            MEDIA_TYPE_VIDEO_STR => MediaType::Video,
            _ => MediaType::Other,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            MediaType::Audio => MEDIA_TYPE_AUDIO_STR,
            MediaType::Video => MEDIA_TYPE_VIDEO_STR,
            MediaType::Other => MEDIA_TYPE_OTHER_STR,
        };
        write!(f, "{s}")
    }
}

/// Packet is one encoded access unit handed over by the producer.
///
/// `dts` is expressed in the owning stream's time base and is expected to be
/// non-decreasing per stream, although nothing here enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    pub media_type: MediaType,
    pub dts: i64,
    pub data: Bytes,
}

impl Packet {
    pub fn new(
        stream_index: usize,
        media_type: MediaType,
        dts: i64,
        data: impl Into<Bytes>,
    ) -> Self {
        Packet {
            stream_index,
            media_type,
            dts,
            data: data.into(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.media_type == MediaType::Audio
    }
}

/// TimeBase is the rational unit, in seconds, of one timestamp tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const MICROSECONDS: TimeBase = TimeBase {
        num: 1,
        den: 1_000_000,
    };
    pub const MILLISECONDS: TimeBase = TimeBase { num: 1, den: 1_000 };
    /// RTP video clock.
    pub const VIDEO_90KHZ: TimeBase = TimeBase { num: 1, den: 90_000 };
    /// Opus sample clock.
    pub const AUDIO_48KHZ: TimeBase = TimeBase { num: 1, den: 48_000 };

    pub fn new(num: i32, den: i32) -> Result<Self> {
        let time_base = TimeBase { num, den };
        time_base.validate()?;
        Ok(time_base)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num <= 0 || self.den <= 0 {
            return Err(Error::ErrInvalidTimeBase {
                num: self.num,
                den: self.den,
            });
        }
        Ok(())
    }

    /// to_duration converts a tick count into wall-clock time.
    /// Zero and negative tick counts map to a zero duration.
    pub fn to_duration(&self, ticks: i64) -> Duration {
        if ticks <= 0 || self.num <= 0 || self.den <= 0 {
            return Duration::ZERO;
        }
        let nanos = ticks as i128 * self.num as i128 * NANOS_PER_SECOND / self.den as i128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase::MICROSECONDS
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
