
pub mod whip;

use bytes::Bytes;

use crate::error::Result;

/// Session is the outbound media connection an output publishes through.
///
/// Calls are issued by one caller at a time; implementations do not need to
/// synchronize internally. Dropping a session releases its resources and must
/// be safe whether or not `close` ran first.
pub trait Session: Send {
    /// connect negotiates with `url`. `auth_token` is forwarded as a bearer
    /// credential when present.
    fn connect(&mut self, url: &str, auth_token: Option<&str>) -> Result<()>;

    /// write sends one encoded access unit lasting `duration` ticks.
    /// Returning false reports a failure the session cannot recover from.
    fn write(&mut self, payload: Bytes, duration: i64, is_audio: bool) -> bool;

    /// close tears the connection down. Calling it twice is a no-op.
    fn close(&mut self);
}

/// SessionFactory constructs sessions on demand. `None` means the underlying
/// resources could not be allocated.
pub trait SessionFactory: Send + Sync {
    fn new_session(&self) -> Option<Box<dyn Session>>;
}

impl<F> SessionFactory for F
where
    F: Fn() -> Option<Box<dyn Session>> + Send + Sync,
{
    fn new_session(&self) -> Option<Box<dyn Session>> {
        self()
    }
}
