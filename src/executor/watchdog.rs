//! Startup watchdog for the test child process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::constants::timeouts::WATCHDOG_POLL_INTERVAL;

/// Watches wall time from child launch until the test announces itself.
///
/// The watchdog wakes every couple of seconds; once the startup timeout has
/// passed it requests a kill through the channel and records that it fired.
/// [`terminate`](StartupWatchdog::terminate) is race-free against the timer:
/// the terminated flag is checked before the deadline on every wake-up, and
/// the reader additionally ignores kill requests that arrive after the test
/// has started.
pub struct StartupWatchdog {
    terminated: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StartupWatchdog {
    pub fn spawn(startup_timeout: Duration, kill_tx: mpsc::Sender<()>) -> Self {
        let terminated = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicBool::new(false));
        let handle = {
            let terminated = Arc::clone(&terminated);
            let fired = Arc::clone(&fired);
            tokio::spawn(async move {
                let start = Instant::now();
                loop {
                    tokio::time::sleep(WATCHDOG_POLL_INTERVAL).await;
                    if terminated.load(Ordering::Acquire) {
                        return;
                    }
                    if start.elapsed() >= startup_timeout {
                        warn!(
                            "The xcodebuild command got stuck and has not started test in {}s. \
                             Will kill the command directly.",
                            startup_timeout.as_secs()
                        );
                        fired.store(true, Ordering::Release);
                        let _ = kill_tx.send(()).await;
                        return;
                    }
                }
            })
        };
        Self {
            terminated,
            fired,
            handle,
        }
    }

    /// Disarms the watchdog. Idempotent.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    /// Whether the watchdog killed the child.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Drop for StartupWatchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_the_timeout() {
        let (kill_tx, mut kill_rx) = mpsc::channel(1);
        let watchdog = StartupWatchdog::spawn(Duration::from_secs(5), kill_tx);
        assert!(!watchdog.is_fired());

        tokio::time::advance(Duration::from_secs(7)).await;
        kill_rx.recv().await.expect("kill request");
        assert!(watchdog.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_prevents_firing() {
        let (kill_tx, mut kill_rx) = mpsc::channel(1);
        let watchdog = StartupWatchdog::spawn(Duration::from_secs(5), kill_tx);
        watchdog.terminate();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!watchdog.is_fired());
        assert!(kill_rx.try_recv().is_err());
    }
}
