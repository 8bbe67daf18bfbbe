//! Named background threads with a cooperative stop flag.
//!
//! Each worker holds the sending half of a done channel for as long as its
//! body runs. Dropping it, on return or unwind, is what `stop` waits on, so a
//! stop never waits longer than its deadline even if the body is stuck.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on how long stopping waits for a background thread.
pub(crate) const JOIN_WAIT: Duration = Duration::from_secs(1);

pub(crate) struct Worker {
    name: &'static str,
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Runs `body` on a thread called `name`. `body` receives the stop flag
    /// and should return soon after it is set.
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let (done_tx, done) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                body(flag);
            })?;

        Ok(Self {
            name,
            stop,
            done,
            handle,
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Sets the stop flag and waits up to `wait` for the thread to finish.
    ///
    /// Returns `true` if the thread was joined. A thread that overruns the
    /// deadline is detached, and a worker stopped from its own thread is not
    /// joined at all.
    pub(crate) fn stop(self, wait: Duration) -> bool {
        self.stop.store(true, Ordering::Release);

        if self.handle.thread().id() == thread::current().id() {
            debug!(thread = self.name, "stop requested from the thread itself; not joining");
            return false;
        }

        match self.done.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(thread = self.name, "thread did not stop in time; detaching");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!(thread = self.name, "thread panicked before stopping");
                }
                true
            }
        }
    }
}
