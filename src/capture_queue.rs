//! Capture request queue: bounded FIFO of photo requests
//! matched against arriving image frames.
//!
//! The producer side (platform frame callback, BLE/HTTP capture command)
//! must be non-blocking; `try_add` never waits. Processing runs on a
//! dedicated single-threaded worker so writes to a given output file are
//! serialized, the same way the audit-flush and staged-file writer tasks
//! elsewhere in this crate own their I/O on a single background task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub id: String,
    pub path: String,
    pub created_at_ms: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaptureQueueError {
    #[error("capture queue is full")]
    Full,
}

struct Inner {
    queued: VecDeque<CaptureRequest>,
    in_flight: usize,
    capacity: usize,
}

/// Bounded, strictly-FIFO capture request queue. `is_full` reflects
/// `queued + in_flight >= capacity`.
pub struct CaptureQueue {
    inner: Arc<Mutex<Inner>>,
    worker_tx: mpsc::UnboundedSender<(CaptureRequest, Vec<u8>)>,
}

/// Default bounded capacity.
pub const DEFAULT_CAPACITY: usize = 4;

impl CaptureQueue {
    /// Spawns the single-threaded I/O worker that actually writes frames to
    /// disk; `on_written` is invoked (on the worker task) once a request's
    /// image has been written, so callers can notify the status manager
    /// and the API dispatcher. The worker frees the request's in-flight
    /// slot itself once the write (successful or not) completes, so a
    /// capture never holds capacity forever.
    pub fn new<F>(capacity: usize, on_written: F) -> Self
    where
        F: Fn(&CaptureRequest) + Send + 'static,
    {
        let inner = Arc::new(Mutex::new(Inner { queued: VecDeque::new(), in_flight: 0, capacity }));
        let worker_inner = Arc::clone(&inner);
        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<(CaptureRequest, Vec<u8>)>();
        tokio::spawn(async move {
            while let Some((request, bytes)) = worker_rx.recv().await {
                if let Err(e) = tokio::fs::write(&request.path, &bytes).await {
                    tracing::error!(path = %request.path, error = %e, "capture write failed");
                } else {
                    on_written(&request);
                }
                let mut inner = worker_inner.lock().expect("capture queue lock poisoned");
                inner.in_flight = inner.in_flight.saturating_sub(1);
            }
        });

        Self { inner, worker_tx }
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().expect("capture queue lock poisoned");
        inner.queued.len() + inner.in_flight >= inner.capacity
    }

    /// Enqueue a capture request; non-blocking, rejects when full.
    pub fn try_add(&self, id: String, path: String, created_at_ms: i64) -> Result<(), CaptureQueueError> {
        let mut inner = self.inner.lock().expect("capture queue lock poisoned");
        if inner.queued.len() + inner.in_flight >= inner.capacity {
            return Err(CaptureQueueError::Full);
        }
        inner.queued.push_back(CaptureRequest { id, path, created_at_ms });
        Ok(())
    }

    /// Called from the platform frame-ready callback. Pops at most one
    /// queued request in arrival order, marks it in-flight, and schedules
    /// the write on the I/O worker. A frame with no queued request is
    /// silently discarded.
    pub fn on_frame_ready(&self, frame_bytes: Vec<u8>) {
        let request = {
            let mut inner = self.inner.lock().expect("capture queue lock poisoned");
            match inner.queued.pop_front() {
                Some(request) => {
                    inner.in_flight += 1;
                    request
                }
                None => return,
            }
        };
        let _ = self.worker_tx.send((request, frame_bytes));
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().expect("capture queue lock poisoned").queued.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn is_full_reflects_queued_plus_in_flight() {
        let written = Arc::new(AtomicUsize::new(0));
        let written_clone = written.clone();
        let queue = CaptureQueue::new(2, move |_| {
            written_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!queue.is_full());
        queue.try_add("a".into(), "/tmp/a.jpg".into(), 1).unwrap();
        queue.try_add("b".into(), "/tmp/b.jpg".into(), 2).unwrap();
        assert!(queue.is_full());
        assert_eq!(queue.try_add("c".into(), "/tmp/c.jpg".into(), 3), Err(CaptureQueueError::Full));
    }

    #[tokio::test]
    async fn frame_with_no_request_is_discarded() {
        let queue = CaptureQueue::new(DEFAULT_CAPACITY, |_| {});
        queue.on_frame_ready(vec![1, 2, 3]);
        assert_eq!(queue.queue_len(), 0);
    }

    #[tokio::test]
    async fn frame_ready_pops_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.jpg");
        let path_b = dir.path().join("b.jpg");
        let written = Arc::new(std::sync::Mutex::new(Vec::new()));
        let written_clone = written.clone();
        let queue = CaptureQueue::new(4, move |req: &CaptureRequest| {
            written_clone.lock().unwrap().push(req.id.clone());
        });

        queue.try_add("a".into(), path_a.to_string_lossy().into_owned(), 1).unwrap();
        queue.try_add("b".into(), path_b.to_string_lossy().into_owned(), 2).unwrap();

        queue.on_frame_ready(vec![1]);
        queue.on_frame_ready(vec![2]);

        // Allow the worker task to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let order = written.lock().unwrap().clone();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn in_flight_slot_frees_after_worker_completes_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        let queue = CaptureQueue::new(1, |_| {});

        queue.try_add("a".into(), path.to_string_lossy().into_owned(), 1).unwrap();
        queue.on_frame_ready(vec![1, 2, 3]);
        assert!(queue.is_full());

        // Allow the worker task to write the file and decrement in-flight.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!queue.is_full());
        queue.try_add("b".into(), path.to_string_lossy().into_owned(), 2).unwrap();
    }
}
