//! Offline runs of the engine over recorded sample streams.
//!
//! A stream is JSON lines of `{"axis":"x","value":-31.5,"t_ms":120}`. The
//! first stream goes through the guided recording protocol and trains a
//! model; the optional second one is listened to.

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::{fs, path::Path};

use crate::classifier::{Classifier, LogisticTrainer};
use crate::config::Profile;
use crate::engine::{Engine, EngineEvent, Mode};
use crate::protocol::PHASE_COUNT;
use crate::recognition::{Outputs, Recognition, RecognitionSink};
use crate::sample::AxisEvent;

#[derive(Debug, Default, PartialEq)]
pub struct Summary {
    pub examples: usize,
    pub trained: bool,
    pub recognized: usize,
}

struct PrintSink;

impl RecognitionSink for PrintSink {
    fn deliver(&mut self, recognition: &Recognition) -> Result<()> {
        println!("{}", recognition.payload());
        Ok(())
    }
}

pub fn run(profile: &Profile, record: &Path, listen: Option<&Path>) -> Result<()> {
    let record = read_events(record)?;
    let listen = listen.map(read_events).transpose()?;

    let outputs = Outputs {
        listeners: Some(Box::new(PrintSink)),
        gates: None,
    };
    let mut engine = Engine::new(
        profile.engine_config(),
        Classifier::new(LogisticTrainer),
        outputs,
    );

    let summary = replay(
        &mut engine,
        &record,
        listen.as_deref(),
        profile.protocol.phase_delay_ms,
    )?;
    info!(
        "replay done: {} examples, trained={}, {} recognized",
        summary.examples, summary.trained, summary.recognized
    );
    Ok(())
}

fn read_events(path: &Path) -> Result<Vec<AxisEvent>> {
    let txt = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    parse_events(&txt)
}

/// Blank lines and `#` comments are skipped.
fn parse_events(txt: &str) -> Result<Vec<AxisEvent>> {
    txt.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(AxisEvent::from_json_line)
        .collect()
}

fn replay(
    engine: &mut Engine,
    record: &[AxisEvent],
    listen: Option<&[AxisEvent]>,
    phase_delay_ms: u64,
) -> Result<Summary> {
    let mut summary = Summary::default();
    let start = record.first().map_or(0, |e| e.t_ms);

    note(engine.start_recording(start)?, &mut summary);
    let mut t = drive(engine, record, 0, &mut summary);

    // Let trailing phase timers run out.
    let mut guard = 0;
    while engine.mode() == Mode::Recording && guard < PHASE_COUNT {
        t += phase_delay_ms;
        note(engine.tick(t), &mut summary);
        guard += 1;
    }
    note(engine.finish_training(), &mut summary);
    if engine.mode() == Mode::Recording {
        warn!("record stream ended before the protocol finished");
        engine.cancel_recording();
    }
    summary.examples = engine.store().len();
    summary.trained = engine.is_trained();

    if let Some(listen) = listen {
        engine.start_listening()?;
        let first = listen.first().map_or(0, |e| e.t_ms);
        let offset = (t + 1).saturating_sub(first);
        drive(engine, listen, offset, &mut summary);
        engine.stop_listening();
    }
    Ok(summary)
}

/// Feed a stream with timestamps shifted by `offset`; returns the last time.
fn drive(engine: &mut Engine, events: &[AxisEvent], offset: u64, summary: &mut Summary) -> u64 {
    let mut t = 0;
    for ev in events {
        t = ev.t_ms + offset;
        note(engine.tick(t), summary);
        note(engine.on_axis(ev.axis, ev.value, t), summary);
    }
    t
}

fn note(events: Vec<EngineEvent>, summary: &mut Summary) {
    for ev in events {
        match ev {
            EngineEvent::Recognized(_) => summary.recognized += 1,
            EngineEvent::TrainingFailed(e) => warn!("training failed: {e}"),
            other => debug!("{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::FixedTrainer;
    use crate::engine::EngineConfig;
    use crate::sample::Axis;

    const REST: f32 = -32.0;

    #[derive(Default)]
    struct Script {
        t: u64,
        out: Vec<AxisEvent>,
    }

    impl Script {
        fn sample(&mut self, x: f32) {
            self.t += 30;
            for (axis, value) in [(Axis::X, x), (Axis::Y, REST), (Axis::Z, REST)] {
                self.out.push(AxisEvent {
                    axis,
                    value,
                    t_ms: self.t,
                });
            }
        }

        fn draw(&mut self) {
            self.sample(0.0);
            for i in 0..40 {
                self.sample(if i % 2 == 0 { 2.0 } else { 0.0 });
            }
            let mut x = 0.0;
            while x > REST {
                x -= 4.0;
                self.sample(x);
            }
        }

        fn rest(&mut self, ms: u64) {
            let end = self.t + ms;
            while self.t < end {
                self.sample(REST);
            }
        }
    }

    fn engine(scores: [f32; 3]) -> Engine {
        Engine::new(
            EngineConfig::default(),
            Classifier::new(FixedTrainer(scores)),
            Outputs::default(),
        )
    }

    fn protocol_stream() -> Vec<AxisEvent> {
        let mut s = Script::default();
        s.rest(300);
        for _ in 0..3 {
            s.draw();
        }
        s.rest(2100);
        s.rest(2100);
        s.rest(1500);
        s.rest(2100);
        s.draw();
        s.draw();
        s.out
    }

    #[test]
    fn test_parse_events_skips_comments() {
        let txt = concat!(
            "# header\n\n",
            "{\"axis\":\"x\",\"value\":1.5,\"t_ms\":10}\n",
            "{\"axis\":\"z\",\"value\":-2}\n",
        );
        let evs = parse_events(txt).unwrap();
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[0].axis, Axis::X);
        assert_eq!(evs[1].t_ms, 0);
        assert!(parse_events("{\"axis\":\"w\",\"value\":1}").is_err());
    }

    #[test]
    fn test_replay_records_trains_and_listens() {
        let mut e = engine([0.1, 0.1, 0.9]);
        let mut listen = Script::default();
        listen.rest(300);
        listen.draw();
        listen.rest(300);

        let summary = replay(&mut e, &protocol_stream(), Some(&listen.out), 2000).unwrap();
        assert_eq!(
            summary,
            Summary {
                examples: 6,
                trained: true,
                recognized: 1,
            }
        );
        assert_eq!(e.mode(), Mode::Idle);
    }

    #[test]
    fn test_replay_below_threshold_recognizes_nothing() {
        let mut e = engine([0.1, 0.1, 0.5]);
        let mut listen = Script::default();
        listen.draw();

        let summary = replay(&mut e, &protocol_stream(), Some(&listen.out), 2000).unwrap();
        assert!(summary.trained);
        assert_eq!(summary.recognized, 0);
    }

    #[test]
    fn test_listen_without_model_fails() {
        let mut e = engine([0.1, 0.1, 0.9]);
        let mut s = Script::default();
        s.rest(300);
        s.draw();
        let mut listen = Script::default();
        listen.draw();

        assert!(replay(&mut e, &s.out, Some(&listen.out), 2000).is_err());
    }
}
