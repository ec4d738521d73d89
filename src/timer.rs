//! Owned, cancellable one-shot timers.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// One pending delayed action.
///
/// Scheduling again cancels the previous action, and dropping the timer
/// cancels whatever is still pending. Must be used inside a
/// [`tokio::task::LocalSet`].
#[derive(Debug, Default)]
pub struct ResetTimer {
    handle: Option<JoinHandle<()>>,
}

impl ResetTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any pending action.
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce() + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::task::spawn_local(async move {
            sleep(delay).await;
            action();
        }));
    }

    /// Cancel the pending action. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ResetTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(0));
                let mut timer = ResetTimer::new();
                let f = fired.clone();
                timer.schedule(ms(3500), move || f.set(f.get() + 1));

                sleep(ms(3400)).await;
                assert!(timer.is_pending());
                assert_eq!(fired.get(), 0);

                sleep(ms(200)).await;
                assert_eq!(fired.get(), 1);
                assert!(!timer.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_cancels_previous() {
        LocalSet::new()
            .run_until(async {
                let log = Rc::new(Cell::new(0u32));
                let mut timer = ResetTimer::new();

                let l = log.clone();
                timer.schedule(ms(1000), move || l.set(l.get() + 1));
                sleep(ms(500)).await;
                let l = log.clone();
                timer.schedule(ms(1000), move || l.set(l.get() + 10));

                sleep(ms(2000)).await;
                assert_eq!(log.get(), 10);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(false));
                let mut timer = ResetTimer::new();
                let f = fired.clone();
                timer.schedule(ms(100), move || f.set(true));
                assert!(timer.cancel());
                assert!(!timer.cancel());

                let f = fired.clone();
                timer.schedule(ms(100), move || f.set(true));
                drop(timer);

                sleep(ms(500)).await;
                assert!(!fired.get());
            })
            .await;
    }
}
