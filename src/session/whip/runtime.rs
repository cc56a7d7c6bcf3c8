use std::future::Future;
use std::panic;
use std::thread;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use crate::error::Result;

const RUNTIME_WORKER_THREADS: usize = 2;
const RUNTIME_THREAD_NAME: &str = "whip-session";

/// SessionRuntime is the private runtime a [`WhipSession`] drives its async
/// work on. It can be blocked on from plain threads as well as from inside
/// another tokio runtime, and it can be dropped from either.
///
/// [`WhipSession`]: super::WhipSession
pub(crate) struct SessionRuntime {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl SessionRuntime {
    pub(crate) fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKER_THREADS)
            .thread_name(RUNTIME_THREAD_NAME)
            .enable_all()
            .build()?;

        Ok(SessionRuntime {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// block_on runs `future` to completion on the session runtime.
    ///
    /// A caller already inside a multi-thread runtime gives up its worker with
    /// `block_in_place` for the duration. A current-thread runtime cannot do
    /// that, so the future is driven from a scoped helper thread instead.
    pub(crate) fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        let current = match Handle::try_current() {
            Ok(current) => current,
            Err(_) => return self.handle.block_on(future),
        };

        match current.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.handle.block_on(future))
            }
            _ => thread::scope(|s| {
                match s.spawn(|| self.handle.block_on(future)).join() {
                    Ok(output) => output,
                    Err(payload) => panic::resume_unwind(payload),
                }
            }),
        }
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        // A blocking shutdown panics on an async thread.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
