//! Periodic Active-Expiration Ticker
//!
//! Lazy expiration alone leaks: a key that expires and is never read again
//! stays resident forever. The ticker wakes on a fixed interval and drives
//! [`Store::sweep_expired`] in a tight loop until the expired fraction of
//! the sample drops below a threshold, so a heavily-expired key space
//! converges in one wake-up without ever scanning the whole map.
//!
//! The task runs on the event-loop thread via `spawn_local` and borrows
//! the store only inside a synchronous sweep call, so it interleaves with
//! connection handlers at await points and never contends with them.

use crate::storage::store::Store;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Re-sweep while at least this fraction of the sample was expired.
pub const SWEEP_REPEAT_THRESHOLD: f64 = 0.25;

/// Handle to the running ticker task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct ExpiryTicker {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryTicker {
    /// Spawns the ticker onto the current `LocalSet`.
    ///
    /// `interval` comes from the `autoDeleteFrequency` configuration
    /// value and defaults to one second.
    pub fn start(store: Rc<RefCell<Store>>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::task::spawn_local(ticker_loop(store, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Expiration ticker started");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        debug!("Expiration ticker stopped");
    }
}

impl Drop for ExpiryTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn ticker_loop(
    store: Rc<RefCell<Store>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiration ticker received shutdown signal");
                    return;
                }
            }
        }

        // Keep sweeping while the sample keeps coming back mostly dead.
        loop {
            let frac = store.borrow_mut().sweep_expired();
            if frac < SWEEP_REPEAT_THRESHOLD {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::eviction::EvictionPolicy;
    use crate::storage::store::{now_ms, Entry, Value};
    use bytes::Bytes;

    fn expired_entry() -> Entry {
        let mut entry = Entry::new(Value::String(Bytes::from("v")));
        entry.expires_at_ms = now_ms() - 50;
        entry
    }

    #[tokio::test]
    async fn ticker_drains_expired_keys() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(RefCell::new(Store::new(256, EvictionPolicy::SimpleFirst)));

                for i in 0..100 {
                    store
                        .borrow_mut()
                        .put(Bytes::from(format!("dead{}", i)), expired_entry());
                }
                store
                    .borrow_mut()
                    .put(Bytes::from("alive"), Entry::new(Value::String(Bytes::from("v"))));

                let _ticker =
                    ExpiryTicker::start(Rc::clone(&store), Duration::from_millis(10));

                tokio::time::sleep(Duration::from_millis(100)).await;

                // The repeat loop collapses all 100 dead keys in one wake-up.
                assert_eq!(store.borrow().len(), 1);
                assert!(store.borrow_mut().get(&Bytes::from("alive")).is_some());
            })
            .await;
    }

    #[tokio::test]
    async fn ticker_stops_on_drop() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(RefCell::new(Store::new(256, EvictionPolicy::SimpleFirst)));

                {
                    let _ticker =
                        ExpiryTicker::start(Rc::clone(&store), Duration::from_millis(10));
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }

                store.borrow_mut().put(Bytes::from("dead"), expired_entry());
                tokio::time::sleep(Duration::from_millis(50)).await;

                // The stopped ticker no longer sweeps; the key is still resident.
                assert_eq!(store.borrow().len(), 1);
            })
            .await;
    }
}
