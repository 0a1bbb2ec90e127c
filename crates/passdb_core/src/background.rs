//! Work offloaded to a worker thread.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use tracing::debug;

/// Handle to an open or save running on a worker thread.
///
/// The result is delivered over a channel; nothing is shared with the
/// worker except the cancellation flag. Cancelling is cooperative: the
/// worker checks the flag before it commits anything, so a cancelled
/// operation either finished before the request or has no effect.
#[derive(Debug)]
pub struct Background<T> {
    receiver: Receiver<CoreResult<T>>,
    cancelled: Arc<AtomicBool>,
    finished: bool,
}

impl<T: Send + 'static> Background<T> {
    /// Runs `work` on a new named thread.
    ///
    /// `work` receives the cancellation flag.
    pub(crate) fn spawn<F>(name: &str, work: F) -> CoreResult<Self>
    where
        F: FnOnce(&AtomicBool) -> CoreResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // The handle may have been dropped; nobody wants the result then.
                let _ = tx.send(work(&flag));
            })?;
        debug!(worker = name, "background task started");
        Ok(Self {
            receiver: rx,
            cancelled,
            finished: false,
        })
    }
}

impl<T> Background<T> {
    /// Asks the worker to stop before committing.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until the worker finishes.
    ///
    /// # Errors
    ///
    /// Returns the worker's error, or [`CoreError::Cancelled`] if the
    /// worker went away without a result.
    pub fn wait(self) -> CoreResult<T> {
        self.receiver.recv().unwrap_or(Err(CoreError::Cancelled))
    }

    /// Returns the result if the worker has finished, without blocking.
    ///
    /// The result is handed out once; later calls return `None`.
    pub fn try_result(&mut self) -> Option<CoreResult<T>> {
        if self.finished {
            return None;
        }
        let result = match self.receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(CoreError::Cancelled),
        };
        self.finished = true;
        Some(result)
    }
}

/// Returns [`CoreError::Cancelled`] if the flag is set.
pub(crate) fn check_cancelled(flag: &AtomicBool) -> CoreResult<()> {
    if flag.load(Ordering::SeqCst) {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn wait_returns_worker_result() {
        let task = Background::spawn("test-worker", |_| Ok(21 * 2)).unwrap();
        assert_eq!(task.wait().unwrap(), 42);
    }

    #[test]
    fn try_result_hands_out_once() {
        let mut task = Background::spawn("test-worker", |_| Ok("done")).unwrap();
        let mut result = None;
        for _ in 0..200 {
            if let Some(r) = task.try_result() {
                result = Some(r);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(result.unwrap().unwrap(), "done");
        assert!(task.try_result().is_none());
    }

    #[test]
    fn cancelled_worker_reports_cancelled() {
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let task = Background::spawn("test-worker", move |flag| {
            go_rx.recv().ok();
            check_cancelled(flag)?;
            Ok(())
        })
        .unwrap();

        task.cancel();
        assert!(task.is_cancelled());
        go_tx.send(()).unwrap();
        assert!(matches!(task.wait(), Err(CoreError::Cancelled)));
    }
}
