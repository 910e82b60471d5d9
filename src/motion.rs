//! Motion ingest & merge: merges gyro/accel samples into
//! a single timestamp-ordered stream, drives an opaque orientation filter,
//! and records the derived orientation history.
//!
//! The merge step, bias variable, and filter handle are all serialized
//! under one mutex, the same single-lock-guards-one-state-machine shape
//! used by the pairing state machine.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A raw 6-axis gyro sample: `[x, y, z, bias_x, bias_y, bias_z]`, where
/// the last three values carry the bias triple.
#[derive(Debug, Clone, Copy)]
pub struct GyroSample {
    pub timestamp_ns: i64,
    pub values: [f64; 6],
}

#[derive(Debug, Clone, Copy)]
pub struct AccelSample {
    pub timestamp_ns: i64,
    pub values: [f64; 3],
}

/// An entry in the orientation history: a timestamped angle-axis rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub timestamp_ns: i64,
    pub angle_axis: [f64; 3],
}

/// Opaque collaborator representing the platform's sensor-fusion filter,
/// owned by `MotionIngest` and driven purely through this trait.
pub trait OrientationFilter: Send {
    fn init(&mut self);
    fn release(&mut self);
    fn push_gyro(&mut self, sample: &GyroSample);
    fn push_accel(&mut self, sample: &AccelSample);
    fn recenter(&mut self);
    fn set_bias(&mut self, bias: [f64; 3]);
    fn read_orientation(&self) -> [f64; 3];
}

/// How long derived orientation samples are retained.
const ORIENTATION_HISTORY_RETENTION: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Latency {
    High,
    Low,
}

struct Inner {
    gyro_queue: VecDeque<GyroSample>,
    accel_queue: VecDeque<AccelSample>,
    bias: [f64; 3],
    capture_active: bool,
    running: bool,
    latency: Latency,
    history: BTreeMap<i64, Orientation>,
    last_gyro_ts: Option<i64>,
    last_accel_ts: Option<i64>,
}

pub struct MotionIngest {
    inner: Mutex<Inner>,
    filter: Mutex<Box<dyn OrientationFilter>>,
}

impl MotionIngest {
    pub fn new(filter: Box<dyn OrientationFilter>) -> Self {
        let mut filter = filter;
        filter.init();
        Self {
            inner: Mutex::new(Inner {
                gyro_queue: VecDeque::new(),
                accel_queue: VecDeque::new(),
                bias: [0.0; 3],
                capture_active: false,
                running: true,
                latency: Latency::Low,
                history: BTreeMap::new(),
                last_gyro_ts: None,
                last_accel_ts: None,
            }),
            filter: Mutex::new(filter),
        }
    }

    /// Enqueues a gyro sample, dropping it with a warning if its timestamp
    /// does not strictly exceed the last accepted gyro sample's.
    pub fn push_gyro(&self, sample: GyroSample) {
        {
            let mut inner = self.inner.lock().expect("motion lock poisoned");
            if inner.last_gyro_ts.is_some_and(|last| sample.timestamp_ns <= last) {
                tracing::warn!(
                    timestamp_ns = sample.timestamp_ns,
                    last_timestamp_ns = inner.last_gyro_ts,
                    "dropping backward-going gyro sample"
                );
                return;
            }
            inner.last_gyro_ts = Some(sample.timestamp_ns);
            inner.gyro_queue.push_back(sample);
        }
        self.drain_merge();
    }

    /// Enqueues an accel sample, dropping it with a warning if its
    /// timestamp does not strictly exceed the last accepted accel sample's.
    pub fn push_accel(&self, sample: AccelSample) {
        {
            let mut inner = self.inner.lock().expect("motion lock poisoned");
            if inner.last_accel_ts.is_some_and(|last| sample.timestamp_ns <= last) {
                tracing::warn!(
                    timestamp_ns = sample.timestamp_ns,
                    last_timestamp_ns = inner.last_accel_ts,
                    "dropping backward-going accel sample"
                );
                return;
            }
            inner.last_accel_ts = Some(sample.timestamp_ns);
            inner.accel_queue.push_back(sample);
        }
        self.drain_merge();
    }

    /// Freezes emission but keeps filter state.
    pub fn stop(&self) {
        self.inner.lock().expect("motion lock poisoned").running = false;
    }

    /// Resumes emission without resetting the filter or bias.
    pub fn start(&self) {
        self.inner.lock().expect("motion lock poisoned").running = true;
    }

    pub fn set_capture_active(&self, active: bool) {
        let mut inner = self.inner.lock().expect("motion lock poisoned");
        inner.capture_active = active;
    }

    /// Switches high-latency (batched) / low-latency (live) mode, flushing
    /// any in-flight batch first so no stale sample is emitted afterward.
    pub fn reconfigure_latency(&self, high_latency: bool) {
        let mut inner = self.inner.lock().expect("motion lock poisoned");
        inner.gyro_queue.clear();
        inner.accel_queue.clear();
        inner.latency = if high_latency { Latency::High } else { Latency::Low };
    }

    pub fn orientation_at_or_before(&self, timestamp_ns: i64) -> Option<Orientation> {
        let inner = self.inner.lock().expect("motion lock poisoned");
        inner.history.range(..=timestamp_ns).next_back().map(|(_, o)| *o)
    }

    /// Drains the merge loop: while both queues are non-empty, consumes the
    /// sample with the smaller head timestamp.
    fn drain_merge(&self) {
        let mut inner = self.inner.lock().expect("motion lock poisoned");
        if !inner.running {
            return;
        }
        loop {
            let (gyro_ts, accel_ts) = match (inner.gyro_queue.front(), inner.accel_queue.front()) {
                (Some(g), Some(a)) => (Some(g.timestamp_ns), Some(a.timestamp_ns)),
                _ => break,
            };
            let gyro_ts = gyro_ts.unwrap();
            let accel_ts = accel_ts.unwrap();

            if gyro_ts <= accel_ts {
                let mut sample = inner.gyro_queue.pop_front().expect("front checked above");
                apply_bias(&mut inner, &mut sample);
                let orientation = {
                    let mut filter = self.filter.lock().expect("filter lock poisoned");
                    filter.push_gyro(&sample);
                    filter.read_orientation()
                };
                record_orientation(&mut inner, gyro_ts, orientation);
            } else {
                let sample = inner.accel_queue.pop_front().expect("front checked above");
                let mut filter = self.filter.lock().expect("filter lock poisoned");
                filter.push_accel(&sample);
            }
        }
    }
}

fn apply_bias(inner: &mut Inner, sample: &mut GyroSample) {
    if inner.capture_active {
        sample.values[3] = inner.bias[0];
        sample.values[4] = inner.bias[1];
        sample.values[5] = inner.bias[2];
    } else {
        inner.bias = [sample.values[3], sample.values[4], sample.values[5]];
    }
}

fn record_orientation(inner: &mut Inner, timestamp_ns: i64, angle_axis: [f64; 3]) {
    inner.history.insert(timestamp_ns, Orientation { timestamp_ns, angle_axis });
    let retention_ns = ORIENTATION_HISTORY_RETENTION.as_nanos() as i64;
    let cutoff = timestamp_ns - retention_ns;
    inner.history.retain(|ts, _| *ts >= cutoff);
}
