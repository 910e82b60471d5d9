//! Capture-result ↔ frame correlator.
//!
//! Both `on_frame` and `on_capture_result` are called from the same
//! thread, so this type takes `&mut self` rather than wrapping itself in
//! a lock: there is no concurrent access to guard against.

use std::collections::VecDeque;
use std::time::Duration;

/// Frames older than this are purged outright.
const MAX_AGE: Duration = Duration::from_secs(2);
/// Frames older than this are discarded proactively even before `MAX_AGE`.
const PROACTIVE_AGE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct CaptureResult {
    pub timestamp_ns: i64,
    pub exposure_ns: i64,
    pub rolling_shutter_skew_ns: i64,
}

struct PendingFrame {
    texture_matrix: [f32; 16],
    timestamp_ns: i64,
    received_at_ns: i64,
}

struct PendingResult {
    result: CaptureResult,
    received_at_ns: i64,
}

/// Copies a frame's texture matrix to the encoder surface at the given
/// timestamp; abstracted so the correlator stays a pure state machine over
/// its two input streams.
pub trait FrameSink {
    fn copy_frame(&mut self, texture_matrix: [f32; 16], adjusted_timestamp_ns: i64);
}

pub struct Correlator<S: FrameSink> {
    pending_frames: VecDeque<PendingFrame>,
    pending_results: VecDeque<PendingResult>,
    sink: S,
}

impl<S: FrameSink> Correlator<S> {
    pub fn new(sink: S) -> Self {
        Self { pending_frames: VecDeque::new(), pending_results: VecDeque::new(), sink }
    }

    /// `now_ns` is the caller-supplied wall-clock time used for aging out
    /// stale entries; passed explicitly so the correlator needs no clock.
    pub fn on_frame(&mut self, texture_matrix: [f32; 16], timestamp_ns: i64, now_ns: i64) {
        self.purge(now_ns);

        if let Some(pos) = self.pending_results.iter().position(|r| r.result.timestamp_ns == timestamp_ns) {
            let pending = self.pending_results.remove(pos).expect("position just found");
            let adjusted = adjusted_timestamp(&pending.result);
            self.sink.copy_frame(texture_matrix, adjusted);
            return;
        }

        self.pending_frames.push_back(PendingFrame {
            texture_matrix,
            timestamp_ns,
            received_at_ns: now_ns,
        });
    }

    pub fn on_capture_result(&mut self, result: CaptureResult, now_ns: i64) {
        self.purge(now_ns);

        if let Some(pos) = self.pending_frames.iter().position(|f| f.timestamp_ns == result.timestamp_ns) {
            let frame = self.pending_frames.remove(pos).expect("position just found");
            let adjusted = adjusted_timestamp(&result);
            self.sink.copy_frame(frame.texture_matrix, adjusted);
            return;
        }

        self.pending_results.push_back(PendingResult { result, received_at_ns: now_ns });
    }

    /// Copies any still-pending frame whose matching result never arrived,
    /// using its unadjusted timestamp.
    pub fn flush_missing(&mut self, timestamp_ns: i64) {
        if let Some(pos) = self.pending_frames.iter().position(|f| f.timestamp_ns == timestamp_ns) {
            let frame = self.pending_frames.remove(pos).expect("position just found");
            tracing::warn!(timestamp_ns, "capture result missing, copying with unadjusted timestamp");
            self.sink.copy_frame(frame.texture_matrix, frame.timestamp_ns);
        }
    }

    /// The 1s proactive threshold is the one actually enforced on every
    /// call; `MAX_AGE` is the outer backstop, applied to both queues so an
    /// entry can never outlive it even if the proactive cut were ever
    /// loosened.
    fn purge(&mut self, now_ns: i64) {
        let proactive_ns = PROACTIVE_AGE.as_nanos() as i64;
        let max_age_ns = MAX_AGE.as_nanos() as i64;
        self.pending_frames.retain(|f| now_ns - f.received_at_ns < proactive_ns);
        self.pending_results.retain(|r| now_ns - r.received_at_ns < proactive_ns);
        self.pending_frames.retain(|f| now_ns - f.received_at_ns < max_age_ns);
        self.pending_results.retain(|r| now_ns - r.received_at_ns < max_age_ns);
    }
}

fn adjusted_timestamp(result: &CaptureResult) -> i64 {
    result.timestamp_ns + (result.exposure_ns + result.rolling_shutter_skew_ns) / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct RecordingSink(Arc<Mutex<Vec<(f32, i64)>>>);

    impl RecordingSink {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Vec::new())))
        }
    }

    impl FrameSink for RecordingSink {
        fn copy_frame(&mut self, texture_matrix: [f32; 16], adjusted_timestamp_ns: i64) {
            self.0.lock().unwrap().push((texture_matrix[0], adjusted_timestamp_ns));
        }
    }

    fn matrix(tag: f32) -> [f32; 16] {
        let mut m = [0.0; 16];
        m[0] = tag;
        m
    }

    #[test]
    fn frame_then_result_copies_with_adjusted_timestamp() {
        let sink = RecordingSink::new();
        let mut correlator = Correlator::new(sink.clone());

        correlator.on_frame(matrix(1.0), 1_000, 1_000);
        correlator.on_capture_result(
            CaptureResult { timestamp_ns: 1_000, exposure_ns: 2_000, rolling_shutter_skew_ns: 0 },
            1_100,
        );

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (1.0, 1_000 + 1_000));
    }

    #[test]
    fn result_before_frame_copies_with_adjusted_timestamp() {
        let sink = RecordingSink::new();
        let mut correlator = Correlator::new(sink.clone());

        correlator.on_capture_result(
            CaptureResult { timestamp_ns: 500, exposure_ns: 1_000, rolling_shutter_skew_ns: 200 },
            500,
        );
        correlator.on_frame(matrix(2.0), 500, 600);

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (2.0, 500 + 600));
    }

    #[test]
    fn stale_pending_frame_is_purged_and_never_copied() {
        let sink = RecordingSink::new();
        let mut correlator = Correlator::new(sink.clone());

        correlator.on_frame(matrix(3.0), 0, 0);
        let three_seconds_ns = 3_000_000_000i64;
        correlator.on_capture_result(
            CaptureResult { timestamp_ns: 0, exposure_ns: 0, rolling_shutter_skew_ns: 0 },
            three_seconds_ns,
        );

        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn stale_pending_result_is_purged_and_never_matched() {
        let sink = RecordingSink::new();
        let mut correlator = Correlator::new(sink.clone());

        correlator.on_capture_result(
            CaptureResult { timestamp_ns: 0, exposure_ns: 0, rolling_shutter_skew_ns: 0 },
            0,
        );
        let three_seconds_ns = 3_000_000_000i64;
        correlator.on_frame(matrix(5.0), 0, three_seconds_ns);

        // The stale result was purged, so the late frame with the same
        // timestamp finds nothing pending and is buffered fresh instead of
        // spuriously matching.
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn flush_missing_copies_unadjusted_timestamp() {
        let sink = RecordingSink::new();
        let mut correlator = Correlator::new(sink.clone());

        correlator.on_frame(matrix(4.0), 900, 900);
        correlator.flush_missing(900);

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded[0], (4.0, 900));
    }
}
