//! Background poller threads that periodically run a sync job.
//!
//! Each poller owns a dedicated OS thread with a current-thread tokio runtime
//! and stamps a shared last-active timestamp at the start of every tick. The
//! spec store's watchdog reads that timestamp to detect quiesced pollers and
//! restart them.
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc::RecvTimeoutError, Arc};
use std::time::Duration;

use chrono::Utc;
use rand::{thread_rng, Rng};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between runs of the job.
    pub interval: Duration,
    /// Jitter applies a randomized duration to subtract from the interval.
    /// This helps to avoid multiple server instances synchronizing and
    /// producing spiky network load.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
    /// Run the job once immediately on start instead of waiting a full
    /// interval first. Used when a poller is restarted by the watchdog and
    /// for lazily-initialized ID lists.
    pub run_immediately: bool,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(1);

    pub fn new(interval: Duration) -> PollerConfig {
        PollerConfig {
            interval,
            jitter: PollerConfig::DEFAULT_JITTER,
            run_immediately: false,
        }
    }

    pub fn run_immediately(mut self, run_immediately: bool) -> PollerConfig {
        self.run_immediately = run_immediately;
        self
    }
}

/// A background sync thread.
///
/// The job is an async closure; the thread owns a current-thread tokio
/// runtime and blocks on each run.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl PollerThread {
    /// Start a poller thread named `name` running `job` every
    /// `config.interval` (minus jitter).
    ///
    /// `last_active` is stamped with the current epoch-ms time when the
    /// thread starts and again at the start of every tick.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread failed to start.
    pub fn start<F, Fut>(
        name: &'static str,
        config: PollerConfig,
        last_active: Arc<AtomicI64>,
        mut job: F,
    ) -> std::io::Result<PollerThread>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        // Using `sync_channel` as it makes `stop_sender` `Sync` (shareable
        // between threads). Buffer size of 1 is enough: we can `try_send()`
        // and ignore a full buffer (another thread has sent a stop command
        // already).
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        last_active.store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        let join_handle = std::thread::Builder::new()
            .name(format!("flagstone-{name}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        log::error!(target: "flagstone", "failed to start {name} poller runtime: {err}");
                        return;
                    }
                };

                if config.run_immediately {
                    last_active.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                    runtime.block_on(job());
                }

                loop {
                    let timeout = jitter(config.interval, config.jitter);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            // Timed out. Time to run the job.
                        }
                        Ok(()) => {
                            log::debug!(target: "flagstone", "{name} poller received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // When the other end of channel disconnects,
                            // calls to .recv_timeout() return immediately.
                            // Stop the thread.
                            log::debug!(target: "flagstone", "{name} poller channel disconnected");
                            return;
                        }
                    }

                    last_active.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                    runtime.block_on(job());
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the
        // channel buffer is full. The first case can be ignored as the thread
        // is already stopped. The second case can be ignored as it indicates
        // that another thread already sent a stop command.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    pub fn shutdown(self) {
        self.stop();
        // Error means that the thread has panicked and there's nothing useful
        // we can do in that case.
        let _ = self.join_handle.join();
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);
        let jitter_max = Duration::from_secs(30);

        let result = jitter(interval, jitter_max);

        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        let result = jitter(Duration::ZERO, Duration::from_secs(30));
        assert_eq!(result, Duration::ZERO);
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let result = jitter(Duration::from_secs(30), Duration::ZERO);
        assert_eq!(result, Duration::from_secs(30));
    }

    #[test]
    fn run_immediately_executes_job_and_stamps_last_active() {
        let last_active = Arc::new(AtomicI64::new(0));
        let runs = Arc::new(AtomicU32::new(0));

        let poller = {
            let runs = runs.clone();
            PollerThread::start(
                "test",
                PollerConfig::new(Duration::from_secs(3600)).run_immediately(true),
                last_active.clone(),
                move || {
                    let runs = runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                    }
                },
            )
            .unwrap()
        };

        // The immediate run happens before the first interval wait; give the
        // thread a moment to get there.
        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(last_active.load(Ordering::SeqCst) > 0);

        poller.shutdown();
    }

    #[test]
    fn stop_is_idempotent() {
        let poller = PollerThread::start(
            "stop-test",
            PollerConfig::new(Duration::from_secs(3600)),
            Arc::new(AtomicI64::new(0)),
            || async {},
        )
        .unwrap();

        poller.stop();
        poller.stop();
        poller.shutdown();
    }
}
