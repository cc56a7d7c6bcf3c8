#[cfg(test)]
mod output_test;

mod state;

pub use state::{CloseReason, ConnectionState, OutputStats};

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace, warn};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::format::Muxer;
use crate::packet::{MediaType, Packet};
use crate::session::{Session, SessionFactory};

/// Everything guarded by the output lock.
#[derive(Default)]
struct OutputInternal {
    /// Authoritative lifecycle state. The watch channel only mirrors it.
    state: ConnectionState,
    session: Option<Box<dyn Session>>,
    audio_timestamp: i64,
    video_timestamp: i64,
    stats: OutputStats,
}

impl OutputInternal {
    /// advance returns the duration of a packet and whether it is audio, and
    /// records its timestamp as the last one seen for its media type.
    /// Durations are not validated: repeated or out of order timestamps yield
    /// zero or negative values and are passed through as is. The difference
    /// wraps on `i64` overflow rather than saturating.
    fn advance(&mut self, media_type: MediaType, dts: i64) -> (i64, bool) {
        match media_type {
            MediaType::Audio => {
                let duration = dts.wrapping_sub(self.audio_timestamp);
                self.audio_timestamp = dts;
                (duration, true)
            }
            MediaType::Video => {
                let duration = dts.wrapping_sub(self.video_timestamp);
                self.video_timestamp = dts;
                (duration, false)
            }
            MediaType::Other => (0, false),
        }
    }
}

/// WhipOutput adapts the open/write/close packet output lifecycle onto a
/// single outbound [`Session`].
///
/// The session slot, the per media type timestamps and the counters share one
/// lock, so `write_packet` and `close` may be called concurrently from
/// different threads. A failed session write tears the session down on the
/// spot; the failure is never returned to the caller and every later packet is
/// dropped. Callers that need to notice a dead output watch
/// [`WhipOutput::subscribe`].
pub struct WhipOutput {
    factory: Box<dyn SessionFactory>,
    internal: Mutex<OutputInternal>,
    state_tx: watch::Sender<ConnectionState>,
}

impl WhipOutput {
    pub fn new(factory: impl SessionFactory + 'static) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        WhipOutput {
            factory: Box::new(factory),
            internal: Mutex::new(OutputInternal::default()),
            state_tx,
        }
    }

    /// open constructs a session and connects it to `url`.
    ///
    /// The lock is held for the whole connect, so a concurrent close waits for
    /// it to settle and then tears the fresh session down.
    pub fn open(&self, url: &str, auth_token: Option<&str>) -> Result<()> {
        let mut internal = self.lock();

        match internal.state {
            ConnectionState::Uninitialized => {}
            ConnectionState::Closed(_) => return Err(Error::ErrOutputClosed),
            ConnectionState::Connecting | ConnectionState::Connected => {
                return Err(Error::ErrAlreadyOpened)
            }
        }

        let mut session = match self.factory.new_session() {
            Some(session) => session,
            None => {
                warn!("no session could be constructed for {url}");
                return Err(Error::ErrSessionUnavailable(
                    "session could not be constructed".to_owned(),
                ));
            }
        };

        self.set_state(&mut internal, ConnectionState::Connecting);
        if let Err(err) = session.connect(url, auth_token) {
            warn!("failed to connect to {url}: {err}");
            session.close();
            self.set_state(
                &mut internal,
                ConnectionState::Closed(CloseReason::ConnectFailed),
            );
            return Err(Error::ErrSessionUnavailable(err.to_string()));
        }

        internal.session = Some(session);
        self.set_state(&mut internal, ConnectionState::Connected);
        info!("output connected to {url}");

        Ok(())
    }

    /// write_packet forwards one packet to the session. It always returns
    /// `Ok`; without a live session the packet is dropped.
    pub fn write_packet(&self, packet: &Packet) -> Result<()> {
        let mut internal = self.lock();

        let (duration, is_audio) = internal.advance(packet.media_type, packet.dts);
        if packet.media_type == MediaType::Other {
            trace!(
                "stream {} is neither audio nor video, forwarding without duration",
                packet.stream_index
            );
        }

        let written = match internal.session.as_mut() {
            Some(session) => session.write(packet.data.clone(), duration, is_audio),
            None => {
                internal.stats.packets_dropped += 1;
                return Ok(());
            }
        };

        if written {
            internal.stats.packets_written += 1;
            internal.stats.bytes_written += packet.data.len() as u64;
        } else {
            // Write errors are treated as connectivity loss that cannot be recovered from.
            warn!(
                "write failed on stream {}, closing session",
                packet.stream_index
            );
            internal.stats.packets_dropped += 1;
            self.close_session(&mut internal, CloseReason::ConnectivityLost);
        }

        Ok(())
    }

    /// close tears the session down and makes the output terminal, even when
    /// no session was ever opened. Safe to call when open failed or when a
    /// write failure already closed the session; an earlier close reason is
    /// kept.
    pub fn close(&self) -> Result<()> {
        let mut internal = self.lock();
        self.close_session(&mut internal, CloseReason::Trailer);
        if !internal.state.is_closed() {
            self.set_state(
                &mut internal,
                ConnectionState::Closed(CloseReason::Trailer),
            );
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// subscribe returns a receiver that observes every state transition,
    /// including a silent `Connected -> Closed(ConnectivityLost)`.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> OutputStats {
        self.lock().stats
    }

    /// close_session closes and releases the session if one is present.
    /// Taking the guarded state means the caller already holds the lock.
    fn close_session(&self, internal: &mut OutputInternal, reason: CloseReason) {
        if let Some(mut session) = internal.session.take() {
            session.close();
            self.set_state(internal, ConnectionState::Closed(reason));
            info!("output closed: {reason}");
        }
    }

    /// set_state records the new state under the lock and then publishes it.
    fn set_state(&self, internal: &mut OutputInternal, state: ConnectionState) {
        internal.state = state;
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("output state changed: {previous} -> {state}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutputInternal> {
        // The guarded state stays consistent even if a session panicked mid-call.
        self.internal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WhipOutput {
    fn drop(&mut self) {
        let internal = self
            .internal
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if internal.session.take().is_some() {
            debug!("output dropped with a live session, releasing it");
        }
    }
}

impl Muxer for WhipOutput {
    fn write_header(&self, url: &str, auth_token: Option<&str>) -> Result<()> {
        self.open(url, auth_token)
    }

    fn write_packet(&self, packet: &Packet) -> Result<()> {
        WhipOutput::write_packet(self, packet)
    }

    fn write_trailer(&self) -> Result<()> {
        self.close()
    }
}
