//! The one-slot prefetch pipeline.
//!
//! At most one prefetch is in flight at any time. The job runs on its own
//! thread and hands its result back through a bounded channel; the consumer
//! thread either blocks on it during a refill or waits it out with a bound
//! when the epoch ends.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::error::{ReaderError, Result};

use super::{PrefetchJob, PrefetchedWindow};

pub(crate) struct PrefetchSlot {
    receiver: Receiver<Result<PrefetchedWindow>>,
    thread: Option<thread::JoinHandle<()>>,
    finished: Option<Result<PrefetchedWindow>>,
}

impl PrefetchSlot {
    pub(crate) fn spawn(job: PrefetchJob) -> Result<Self> {
        let (sender, receiver) = bounded(1);
        let thread = thread::Builder::new()
            .name("timeline-prefetch".into())
            .spawn(move || {
                let _ = sender.send(job());
            })
            .map_err(|e| ReaderError::runtime(format!("failed to spawn prefetch thread: {e}")))?;
        Ok(Self {
            receiver,
            thread: Some(thread),
            finished: None,
        })
    }

    /// Blocks until the prefetch completes and returns its result.
    pub(crate) fn into_result(mut self) -> Result<PrefetchedWindow> {
        if let Some(result) = self.finished.take() {
            return result;
        }
        let result = self.receiver.recv().unwrap_or_else(|_| {
            Err(ReaderError::runtime(
                "prefetch thread terminated without producing a window",
            ))
        });
        self.join();
        result
    }

    /// Waits up to `timeout` for the prefetch to complete, caching the
    /// result for a later consumer. Returns false on timeout.
    pub(crate) fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if self.finished.is_some() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.finished = Some(result);
                self.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = Some(Err(ReaderError::runtime(
                    "prefetch thread terminated without producing a window",
                )));
                self.join();
                true
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trivial_job() -> PrefetchJob {
        Box::new(|| {
            Ok(PrefetchedWindow {
                sequences: Vec::new(),
                chunks: Vec::new(),
            })
        })
    }

    #[test]
    fn result_is_delivered() {
        let slot = PrefetchSlot::spawn(trivial_job()).unwrap();
        let window = slot.into_result().unwrap();
        assert!(window.sequences.is_empty());
    }

    #[test]
    fn wait_then_consume() {
        let mut slot = PrefetchSlot::spawn(trivial_job()).unwrap();
        assert!(slot.wait_timeout(Duration::from_secs(5)));
        assert!(slot.into_result().is_ok());
    }

    #[test]
    fn job_errors_are_propagated() {
        let slot = PrefetchSlot::spawn(Box::new(|| {
            Err(ReaderError::runtime("boom"))
        }))
        .unwrap();
        assert!(slot.into_result().is_err());
    }
}
