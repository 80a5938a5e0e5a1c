//! Attendance heartbeat timer

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Arm a periodic timer that calls `tick` every `period`, first after one
/// full period.
///
/// Ticks never queue: a tick that comes due while the previous one is
/// still running is skipped. `tick` returns `false` to disarm the timer.
pub(crate) fn arm<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !tick().await {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_repeat_until_disarmed() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();

        let handle = arm(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 }
        });

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("timer did not disarm")
            .unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_tick_waits_a_full_period() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();

        let handle = arm(Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        handle.abort();
    }
}
