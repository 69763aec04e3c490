//! Guided recording protocol.
//!
//! Ten fixed phases: three repetitions of the user's shape, a short pause, a
//! forced "hold still" capture, another pause, two random shapes, then
//! training. Phases only move forward. Timed phases keep a single deadline;
//! entering any phase replaces it, so a stale timer can never advance twice.

use log::info;

use crate::training::LabelVector;

pub const PHASE_COUNT: u8 = 10;
pub const DEFAULT_PHASE_DELAY_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Next phase once a gesture has been captured.
    OnGesture,
    /// Next phase after the configured delay.
    AfterDelay,
    /// Last phase: hand the collected examples to the trainer.
    Train,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub number: u8,
    pub prompt: &'static str,
    pub capture: bool,
    pub force_start: bool,
    pub advance: Advance,
}

const fn phase(
    number: u8,
    prompt: &'static str,
    capture: bool,
    force_start: bool,
    advance: Advance,
) -> Phase {
    Phase {
        number,
        prompt,
        capture,
        force_start,
        advance,
    }
}

pub const PHASES: [Phase; PHASE_COUNT as usize] = [
    phase(1, "Draw a shape in the air", true, false, Advance::OnGesture),
    phase(2, "Please draw the same shape", true, false, Advance::OnGesture),
    phase(3, "Once more, draw the same shape", true, false, Advance::OnGesture),
    phase(4, "Well done, now just leave the hand steady", false, false, Advance::AfterDelay),
    phase(5, "Ready? Don't move!", false, false, Advance::AfterDelay),
    phase(6, "Recording...", true, true, Advance::OnGesture),
    phase(7, "Well done! that was easy", false, false, Advance::AfterDelay),
    phase(8, "Now, just draw a random shape", true, false, Advance::OnGesture),
    phase(9, "Once more, another random shape", true, false, Advance::OnGesture),
    phase(10, "OK, processing....", false, false, Advance::Train),
];

const SAME_SHAPE: LabelVector = [false, false, true];
const AT_REST: LabelVector = [false, true, false];
const RANDOM_SHAPE: LabelVector = [true, false, false];

/// Output labels for examples captured in each phase: `[random, rest, same]`.
const LABELS: [(u8, LabelVector); 6] = [
    (1, SAME_SHAPE),
    (2, SAME_SHAPE),
    (3, SAME_SHAPE),
    (6, AT_REST),
    (8, RANDOM_SHAPE),
    (9, RANDOM_SHAPE),
];

/// Label for an example captured during `phase`, `None` for phases that
/// do not capture.
pub fn label_for(phase: u8) -> Option<LabelVector> {
    LABELS
        .iter()
        .find(|(p, _)| *p == phase)
        .map(|(_, label)| *label)
}

#[derive(Debug)]
pub struct RecordingSession {
    index: usize,
    delay_ms: u64,
    deadline_ms: Option<u64>,
}

impl RecordingSession {
    /// Begin at phase 1.
    pub fn start(now_ms: u64, delay_ms: u64) -> Self {
        let mut s = Self {
            index: 0,
            delay_ms,
            deadline_ms: None,
        };
        s.enter(now_ms);
        s
    }

    pub fn phase(&self) -> &'static Phase {
        &PHASES[self.index]
    }

    pub fn capturing(&self) -> bool {
        self.phase().capture
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == PHASES.len()
    }

    /// Move to the next phase. Returns `None` once the protocol is finished.
    pub fn advance(&mut self, now_ms: u64) -> Option<&'static Phase> {
        if self.is_last() {
            self.deadline_ms = None;
            return None;
        }
        self.index += 1;
        self.enter(now_ms);
        Some(self.phase())
    }

    /// Take the pending timer if it is due.
    pub fn timer_due(&mut self, now_ms: u64) -> bool {
        match self.deadline_ms {
            Some(deadline) if now_ms >= deadline => {
                self.deadline_ms = None;
                true
            }
            _ => false,
        }
    }

    fn enter(&mut self, now_ms: u64) {
        let p = self.phase();
        self.deadline_ms = match p.advance {
            Advance::AfterDelay => Some(now_ms + self.delay_ms),
            Advance::OnGesture | Advance::Train => None,
        };
        info!("phase {}/{}: {}", p.number, PHASE_COUNT, p.prompt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_table_is_ordered() {
        for (i, p) in PHASES.iter().enumerate() {
            assert_eq!(p.number as usize, i + 1);
        }
        let forced: Vec<u8> = PHASES.iter().filter(|p| p.force_start).map(|p| p.number).collect();
        assert_eq!(forced, vec![6]);
    }

    #[test]
    fn test_labels_per_phase() {
        for p in [1, 2, 3] {
            assert_eq!(label_for(p), Some([false, false, true]), "phase {p}");
        }
        assert_eq!(label_for(6), Some([false, true, false]));
        for p in [8, 9] {
            assert_eq!(label_for(p), Some([true, false, false]), "phase {p}");
        }
        for p in [4, 5, 7, 10] {
            assert_eq!(label_for(p), None, "phase {p}");
        }
    }

    #[test]
    fn test_labels_match_capture_phases() {
        for p in PHASES.iter() {
            assert_eq!(label_for(p.number).is_some(), p.capture, "phase {}", p.number);
            if let Some(label) = label_for(p.number) {
                let n = p.number;
                assert_eq!(label, [n > 7, n == 6, n < 4]);
            }
        }
    }

    #[test]
    fn test_advance_runs_forward_to_the_end() {
        let mut s = RecordingSession::start(0, DEFAULT_PHASE_DELAY_MS);
        assert_eq!(s.phase().number, 1);
        for expected in 2..=10u8 {
            let p = s.advance(0).expect("next phase");
            assert_eq!(p.number, expected);
        }
        assert!(s.is_last());
        assert!(s.advance(0).is_none());
        assert_eq!(s.phase().number, 10);
    }

    #[test]
    fn test_timer_only_for_delayed_phases() {
        let mut s = RecordingSession::start(0, 2000);
        assert_eq!(s.deadline_ms(), None);
        s.advance(100);
        s.advance(150);
        assert_eq!(s.phase().number, 3);
        assert_eq!(s.deadline_ms(), None);
        s.advance(200);
        // phase 4 waits 2 s
        assert_eq!(s.phase().number, 4);
        assert_eq!(s.deadline_ms(), Some(2200));
        assert!(!s.timer_due(2199));
        assert!(s.timer_due(2200));
        // consumed
        assert!(!s.timer_due(5000));
    }

    #[test]
    fn test_entering_phase_replaces_timer() {
        let mut s = RecordingSession::start(0, 2000);
        for _ in 0..3 {
            s.advance(0);
        }
        assert_eq!(s.phase().number, 4);
        assert_eq!(s.deadline_ms(), Some(2000));

        // advanced early: the old deadline is gone, phase 5 has its own
        s.advance(500);
        assert_eq!(s.deadline_ms(), Some(2500));
        assert!(!s.timer_due(2000));

        // phase 6 waits for a gesture, no timer at all
        s.advance(2500);
        assert_eq!(s.phase().number, 6);
        assert_eq!(s.deadline_ms(), None);
    }
}
