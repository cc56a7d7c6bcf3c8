use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// ErrSessionUnavailable indicates that the outbound session could not be
    /// constructed or could not reach the destination during open.
    #[error("session unavailable: {0}")]
    ErrSessionUnavailable(String),

    /// ErrAlreadyOpened indicates that open was called on an output that
    /// already holds a live session.
    #[error("output already opened")]
    ErrAlreadyOpened,

    /// ErrOutputClosed indicates an operation executed after the output has
    /// been torn down. Outputs are never reconnected.
    #[error("output closed")]
    ErrOutputClosed,

    /// ErrSessionAlreadyConnected indicates that connect was issued twice on
    /// the same session.
    #[error("session already connected")]
    ErrSessionAlreadyConnected,

    #[error("unsupported url scheme: {0}")]
    ErrUnsupportedUrlScheme(String),

    #[error("peer connection has no local description")]
    ErrNoLocalDescription,

    #[error("whip endpoint responded {status}: {body}")]
    ErrWhipStatus { status: u16, body: String },

    #[error("whip endpoint returned 201 Created without a Location header")]
    ErrWhipMissingLocation,

    #[error("whip endpoint returned an empty sdp answer")]
    ErrWhipEmptyAnswer,

    #[error("whip request timed out after {0}ms")]
    ErrWhipTimeout(u64),

    #[error("invalid time base {num}/{den}")]
    ErrInvalidTimeBase { num: i32, den: i32 },

    #[error("output format {0} is already registered")]
    ErrOutputFormatExists(String),

    #[error("unknown output format: {0}")]
    ErrUnknownOutputFormat(String),

    #[error("{0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("parse url: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}
