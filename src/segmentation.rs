//! Distance-based gesture segmentation.
//!
//! A gesture starts when consecutive normalized samples jump further apart
//! than `start_threshold` and ends on the first sample closer than
//! `stop_threshold` once the gesture has lasted longer than
//! `min_duration_ms`. The detector assumes the stream starts at rest;
//! re-entering a gesture mid-motion is not corrected.

use log::{debug, info};
use serde::Deserialize;

use crate::sample::NormalizedSample;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub start_threshold: f32,
    pub stop_threshold: f32,
    pub min_duration_ms: u64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            start_threshold: 0.25,
            stop_threshold: 0.95,
            min_duration_ms: 1000,
        }
    }
}

/// Keeps the previous normalized sample and measures the step to the next one.
#[derive(Debug, Default)]
pub struct MotionDeltaTracker {
    previous: NormalizedSample,
}

impl MotionDeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(&mut self, sample: NormalizedSample) -> f32 {
        let d = sample.distance(&self.previous);
        self.previous = sample;
        d
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Idle,
    Active,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Started,
    /// Flattened `x, y, z` triples collected while the gesture was active.
    Completed(Vec<f32>),
}

#[derive(Debug)]
pub struct SegmentationDetector {
    cfg: SegmentationConfig,
    tracker: MotionDeltaTracker,
    state: SegmentState,
    started_at_ms: u64,
    force_start: bool,
    features: Vec<f32>,
}

impl SegmentationDetector {
    pub fn new(cfg: SegmentationConfig) -> Self {
        Self {
            cfg,
            tracker: MotionDeltaTracker::new(),
            state: SegmentState::Idle,
            started_at_ms: 0,
            force_start: false,
            features: Vec::new(),
        }
    }

    pub fn set_config(&mut self, cfg: SegmentationConfig) {
        self.cfg = cfg;
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SegmentState::Active
    }

    /// Start the next segment on the next sample, whatever its distance.
    pub fn set_force_start(&mut self, on: bool) {
        self.force_start = on;
    }

    pub fn force_start(&self) -> bool {
        self.force_start
    }

    pub fn pending_len(&self) -> usize {
        self.features.len()
    }

    /// Feed one sample. `accumulate` decides whether the sample is appended to
    /// the in-progress feature sequence while a gesture is active.
    pub fn update(
        &mut self,
        sample: NormalizedSample,
        now_ms: u64,
        accumulate: bool,
    ) -> Option<Segment> {
        let d = self.tracker.delta(sample);

        if self.state == SegmentState::Idle {
            if d > self.cfg.start_threshold || self.force_start {
                self.state = SegmentState::Active;
                self.started_at_ms = now_ms;
                info!("gesture started (d={d:.3})");
                self.accumulate(sample, accumulate);
                return Some(Segment::Started);
            }
            return None;
        }

        self.accumulate(sample, accumulate);

        // A gesture MUST last longer than min_duration_ms.
        let elapsed = now_ms.saturating_sub(self.started_at_ms);
        if d < self.cfg.stop_threshold && elapsed > self.cfg.min_duration_ms {
            self.state = SegmentState::Idle;
            let features = std::mem::take(&mut self.features);
            info!(
                "gesture stopped after {elapsed} ms ({} samples)",
                features.len() / 3
            );
            return Some(Segment::Completed(features));
        }
        None
    }

    /// Drop the in-progress gesture without reporting it.
    pub fn cancel(&mut self) {
        if self.state == SegmentState::Active {
            debug!("gesture cancelled ({} values dropped)", self.features.len());
        }
        self.state = SegmentState::Idle;
        self.features.clear();
    }

    fn accumulate(&mut self, sample: NormalizedSample, on: bool) {
        if on {
            self.features.extend_from_slice(&[sample.x, sample.y, sample.z]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{DEFAULT_RANGE, RawSample, normalize};

    fn n(x: f32, y: f32, z: f32) -> NormalizedSample {
        NormalizedSample { x, y, z }
    }

    fn at_rest() -> NormalizedSample {
        normalize(
            RawSample {
                x: -32.0,
                y: -32.0,
                z: -32.0,
            },
            DEFAULT_RANGE,
        )
    }

    #[test]
    fn test_delta_tracker_starts_at_origin_and_always_updates() {
        let mut t = MotionDeltaTracker::new();
        assert!((t.delta(n(0.3, 0.4, 0.0)) - 0.5).abs() < 1e-6);
        assert_eq!(t.delta(n(0.3, 0.4, 0.0)), 0.0);
        assert!((t.delta(n(0.3, 0.4, 1.0)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_input_never_starts() {
        let mut det = SegmentationDetector::new(SegmentationConfig::default());
        for i in 0..200 {
            assert_eq!(det.update(at_rest(), i * 30, true), None);
        }
        assert_eq!(det.state(), SegmentState::Idle);

        // a constant stream close to the origin behaves the same
        let mut det = SegmentationDetector::new(SegmentationConfig::default());
        let s = normalize(
            RawSample {
                x: -30.0,
                y: -31.0,
                z: -32.0,
            },
            DEFAULT_RANGE,
        );
        for i in 0..200 {
            assert_eq!(det.update(s, i * 30, true), None);
        }
        assert!(!det.is_active());
    }

    #[test]
    fn test_end_to_end_distance_sequence() {
        // distances 0, 0.1, 0.3, 0.6, 0.97 along x
        let xs = [0.0, 0.1, 0.4, 1.0, 0.03];
        let ts = [0, 100, 200, 1300, 1400];
        let mut det = SegmentationDetector::new(SegmentationConfig::default());

        assert_eq!(det.update(n(xs[0], 0.0, 0.0), ts[0], true), None);
        assert_eq!(det.update(n(xs[1], 0.0, 0.0), ts[1], true), None);
        assert_eq!(det.update(n(xs[2], 0.0, 0.0), ts[2], true), Some(Segment::Started));
        assert!(det.is_active());

        match det.update(n(xs[3], 0.0, 0.0), ts[3], true) {
            Some(Segment::Completed(seq)) => {
                assert_eq!(seq, vec![0.4, 0.0, 0.0, 1.0, 0.0, 0.0]);
            }
            other => panic!("expected completion at t=1300, got {other:?}"),
        }
        assert_eq!(det.pending_len(), 0);

        // 0.97 jump starts the next gesture
        assert_eq!(det.update(n(xs[4], 0.0, 0.0), ts[4], true), Some(Segment::Started));
    }

    #[test]
    fn test_min_duration_floor() {
        let mut det = SegmentationDetector::new(SegmentationConfig::default());
        assert_eq!(det.update(n(0.5, 0.0, 0.0), 0, true), Some(Segment::Started));

        // still, but never longer than 1000 ms
        for t in (50..=1000).step_by(50) {
            assert_eq!(det.update(n(0.5, 0.0, 0.0), t, true), None, "t={t}");
        }
        assert!(det.is_active());

        assert!(matches!(
            det.update(n(0.5, 0.0, 0.0), 1001, true),
            Some(Segment::Completed(_))
        ));
    }

    #[test]
    fn test_large_step_keeps_gesture_open() {
        let mut det = SegmentationDetector::new(SegmentationConfig::default());
        det.update(n(0.5, 0.0, 0.0), 0, true);
        // distance 1.0 is not below the stop threshold
        assert_eq!(det.update(n(0.5, 1.0, 0.0), 2000, true), None);
        assert!(det.is_active());
    }

    #[test]
    fn test_force_start_opens_segment_without_motion() {
        let mut det = SegmentationDetector::new(SegmentationConfig::default());
        det.update(at_rest(), 0, true);
        det.set_force_start(true);
        assert_eq!(det.update(at_rest(), 10, true), Some(Segment::Started));

        let mut done = None;
        for t in (40..=1100).step_by(30) {
            if let Some(seg) = det.update(at_rest(), t, true) {
                done = Some((t, seg));
                break;
            }
        }
        let (t, seg) = done.expect("rest segment completes");
        assert!(t > 1010);
        match seg {
            Segment::Completed(seq) => assert!(!seq.is_empty()),
            Segment::Started => panic!("unexpected restart"),
        }
    }

    #[test]
    fn test_no_accumulation_when_not_capturing() {
        let mut det = SegmentationDetector::new(SegmentationConfig::default());
        det.update(n(0.5, 0.0, 0.0), 0, false);
        det.update(n(0.5, 0.0, 0.0), 500, false);
        assert_eq!(det.pending_len(), 0);
        assert_eq!(
            det.update(n(0.5, 0.0, 0.0), 1500, false),
            Some(Segment::Completed(Vec::new()))
        );
    }

    #[test]
    fn test_cancel_discards_without_event() {
        let mut det = SegmentationDetector::new(SegmentationConfig::default());
        det.update(n(0.5, 0.0, 0.0), 0, true);
        det.update(n(0.5, 0.0, 0.0), 100, true);
        assert_eq!(det.pending_len(), 6);

        det.cancel();
        assert_eq!(det.state(), SegmentState::Idle);
        assert_eq!(det.pending_len(), 0);
        // same position again: no motion, nothing starts
        assert_eq!(det.update(n(0.5, 0.0, 0.0), 2000, true), None);
    }
}
