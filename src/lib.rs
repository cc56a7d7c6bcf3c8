//! Packet output that publishes encoded audio and video to a WHIP
//! (WebRTC-HTTP Ingestion Protocol) endpoint.
//!
//! A media pipeline drives a [`Muxer`] through header, packets and trailer.
//! [`WhipOutput`] maps that lifecycle onto a single outbound [`Session`];
//! [`WhipSession`] is the webrtc-rs backed session used by the registered
//! `whip` format.
//!
//! [`Muxer`]: format::Muxer
//! [`WhipOutput`]: output::WhipOutput
//! [`Session`]: session::Session
//! [`WhipSession`]: session::whip::WhipSession

#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod format;
pub mod output;
pub mod packet;
pub mod session;

pub use config::WhipConfig;
pub use error::{Error, Result};
pub use format::{Muxer, OutputFormat};
pub use output::{CloseReason, ConnectionState, OutputStats, WhipOutput};
pub use packet::{MediaType, Packet, TimeBase};
pub use session::whip::{WhipSession, WhipSessionFactory};
pub use session::{Session, SessionFactory};

#[macro_use]
extern crate lazy_static;
