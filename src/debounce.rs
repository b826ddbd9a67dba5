use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Delays a callback until its input has been quiet for `delay`. Each [`call`](Debouncer::call) restarts the timer,
/// so only the last value of a burst gets through. Typical use is feeding search input into a listing query.
///
/// Must be used from within a tokio runtime.
pub struct Debouncer<T>
where
    T: Send + 'static,
{
    delay:    Duration,
    callback: Arc<dyn Fn(T) + Send + Sync>,
    pending:  Mutex<Option<JoinHandle<()>>>,
}

impl<T> Debouncer<T>
where
    T: Send + 'static,
{
    pub fn new(delay: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            callback: Arc::new(callback),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `value`, superseding whatever was scheduled before and hasn't fired yet.
    pub fn call(&self, value: T) {
        let callback = Arc::clone(&self.callback);
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(value);
        });

        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    /// Drops the scheduled value, if any.
    pub fn cancel(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<T> Drop for Debouncer<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn only_the_last_value_fires() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let debouncer = Debouncer::new(Duration::from_millis(500), move |v: &'static str| sink.lock().push(v));

        debouncer.call("d");
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.call("du");
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.call("dune");
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*seen.lock(), vec!["dune"]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_value_never_fires() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let debouncer = Debouncer::new(Duration::from_millis(100), move |v: u32| sink.lock().push(v));

        debouncer.call(1);
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(seen.lock().is_empty());
    }
}
