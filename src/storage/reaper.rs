//! Background Reaper
//!
//! Lazy expiry only catches bins that are read again. The reaper periodically
//! asks an engine to [`Sweep`] what nobody reads any more:
//!
//! - the in-memory engine drops expired bins with their history
//! - the network-backed engine trims request lists that outgrew the
//!   retention limit
//!
//! The reaper runs on its own named thread because the storage contract is
//! synchronous. Each cycle sweeps first, then waits `interval` for a stop
//! signal. A stop that arrives mid-sweep takes effect once the sweep is done.

use crate::config::ReaperConfig;
use crate::error::StorageResult;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Periodic maintenance performed by the [`Reaper`].
pub trait Sweep: Send + Sync {
    /// Runs one maintenance pass and returns how many items it handled.
    fn sweep(&self) -> StorageResult<usize>;
}

/// A handle to the running reaper.
///
/// When this handle is dropped, the reaper is told to stop.
#[derive(Debug)]
pub struct Reaper {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Starts sweeping `target` in the background.
    ///
    /// The first sweep runs immediately.
    ///
    /// # Example
    ///
    /// ```
    /// use skimmer::config::{ReaperConfig, StorageConfig};
    /// use skimmer::storage::{MemoryStorage, Reaper};
    /// use std::sync::Arc;
    ///
    /// let storage = Arc::new(MemoryStorage::new(StorageConfig::default()).unwrap());
    /// let reaper = Reaper::start(Arc::clone(&storage), &ReaperConfig::default()).unwrap();
    ///
    /// // Sweeps run in the background...
    ///
    /// reaper.join();
    /// ```
    pub fn start<S>(target: Arc<S>, config: &ReaperConfig) -> StorageResult<Self>
    where
        S: Sweep + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let interval = config.interval;

        let handle = thread::Builder::new()
            .name("skimmer-reaper".to_string())
            .spawn(move || reaper_loop(target, interval, shutdown_rx))?;

        info!(interval_ms = interval.as_millis() as u64, "Reaper started");

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Tells the reaper to stop.
    ///
    /// This is called automatically when the handle is dropped. A sweep in
    /// progress is not interrupted.
    pub fn stop(&self) {
        if self.shutdown_tx.send(()).is_ok() {
            info!("Reaper stopped");
        }
    }

    /// Stops the reaper and waits for its thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Reaper thread panicked");
            }
        }
    }

    /// Returns true while the reaper thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reaper_loop<S>(target: Arc<S>, interval: Duration, shutdown_rx: Receiver<()>)
where
    S: Sweep + ?Sized,
{
    loop {
        match target.sweep() {
            Ok(0) => trace!("Sweep found nothing to reap"),
            Ok(handled) => debug!(handled, "Sweep completed"),
            Err(e) => warn!(error = %e, "Sweep failed"),
        }

        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Reaper received shutdown signal");
                return;
            }
        }
    }
}
