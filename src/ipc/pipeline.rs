use anyhow::{Result, anyhow};
use log::{error, info, warn};
use std::{
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender, TryRecvError},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::ActionGate;
use crate::actions::UinputSink;
use crate::classifier::{Classifier, LogisticTrainer};
use crate::config::Profile;
use crate::engine::{Engine, EngineEvent};
use crate::input;
use crate::recognition::{Outputs, Recognition, RecognitionSink};

pub enum DaemonEvent {
    /// `{ "<gesture>": true }`
    Recognized(serde_json::Value),
    Engine(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Record,
    Cancel,
    Listen,
    Unlisten,
    Reset,
    Status,
}

type Reply = Sender<Result<serde_json::Value>>;

enum PipelineCmd {
    Run(Op, Reply),
    Configure(Profile),
    Stop,
}

struct ListenerFeed {
    tx: Sender<DaemonEvent>,
}

impl RecognitionSink for ListenerFeed {
    fn deliver(&mut self, recognition: &Recognition) -> Result<()> {
        self.tx
            .send(DaemonEvent::Recognized(recognition.payload()))
            .map_err(|_| anyhow!("event channel closed"))
    }
}

/// Handle to the thread that owns the engine and the sensor devices.
pub struct Pipeline {
    tx: Sender<PipelineCmd>,
    profile: Arc<Mutex<Profile>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(profile: Profile, tx_evt: Sender<DaemonEvent>) -> Result<Self> {
        let shared = Arc::new(Mutex::new(profile));
        let (tx, rx) = mpsc::channel();
        let prof = shared.clone();
        let handle = thread::Builder::new()
            .name("pipeline".into())
            .spawn(move || {
                if let Err(e) = run_pipeline(prof, rx, tx_evt) {
                    error!("gesture pipeline failed: {e}");
                }
            })?;
        Ok(Self {
            tx,
            profile: shared,
            handle: Some(handle),
        })
    }

    pub fn request(&self, op: Op) -> Result<serde_json::Value> {
        let (tx, rx) = mpsc::channel();
        self.tx
            .send(PipelineCmd::Run(op, tx))
            .map_err(|_| anyhow!("gesture pipeline is not running"))?;
        rx.recv_timeout(Duration::from_secs(2))
            .map_err(|_| anyhow!("gesture pipeline did not answer"))?
    }

    pub fn update_profile(&self, profile: Profile) {
        if let Ok(mut p) = self.profile.lock() {
            *p = profile.clone();
        }
        let _ = self.tx.send(PipelineCmd::Configure(profile));
    }

    pub fn stop(mut self) {
        let _ = self.tx.send(PipelineCmd::Stop);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn run_pipeline(
    profile: Arc<Mutex<Profile>>,
    rx: Receiver<PipelineCmd>,
    tx_evt: Sender<DaemonEvent>,
) -> Result<()> {
    let (cfg, input_cfg) = {
        let p = profile
            .lock()
            .map_err(|_| anyhow!("profile lock poisoned"))?;
        (p.engine_config(), p.input.clone())
    };

    let sink = UinputSink::new().unwrap_or_else(|e| {
        warn!("uinput unavailable ({e}); actions are NO-OP");
        UinputSink::noop()
    });
    let outputs = Outputs {
        listeners: Some(Box::new(ListenerFeed { tx: tx_evt.clone() })),
        gates: Some(Box::new(ActionGate::new(profile.clone(), sink))),
    };
    let mut engine = Engine::new(cfg, Classifier::new(LogisticTrainer), outputs);

    let mut devs = input::open_accelerometers(input_cfg.device.as_deref());
    if devs.is_empty() {
        warn!("no accelerometer detected; control commands still work, no samples will arrive");
    }
    let mut scale = input_cfg.scale;
    let clock = Instant::now();

    loop {
        let now = clock.elapsed().as_millis() as u64;

        loop {
            match rx.try_recv() {
                Ok(PipelineCmd::Run(op, reply)) => {
                    let result = apply(&mut engine, op, now).map(|(data, events)| {
                        report(events, &tx_evt);
                        data
                    });
                    let _ = reply.send(result);
                }
                Ok(PipelineCmd::Configure(p)) => {
                    engine.set_config(p.engine_config());
                    scale = p.input.scale;
                    info!("pipeline: profile applied");
                }
                Ok(PipelineCmd::Stop) | Err(TryRecvError::Disconnected) => {
                    info!("pipeline: stopping");
                    return Ok(());
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        let mut any_event = false;
        for dev in devs.iter_mut() {
            if let Ok(events) = dev.fetch_events() {
                for ev in events {
                    any_event = true;
                    if let Some((axis, value)) = input::axis_reading(&ev, scale) {
                        report(engine.on_axis(axis, value, now), &tx_evt);
                    }
                }
            }
        }

        report(engine.tick(now), &tx_evt);

        if !any_event {
            thread::sleep(Duration::from_millis(4));
        }
    }
}

fn apply(
    engine: &mut Engine,
    op: Op,
    now_ms: u64,
) -> Result<(serde_json::Value, Vec<EngineEvent>)> {
    let mut events = Vec::new();
    let data = match op {
        Op::Record => {
            events = engine.start_recording(now_ms)?;
            engine.status()
        }
        Op::Cancel => serde_json::json!({ "cancelled": engine.cancel_recording() }),
        Op::Listen => {
            engine.start_listening()?;
            engine.status()
        }
        Op::Unlisten => serde_json::json!({ "stopped": engine.stop_listening() }),
        Op::Reset => {
            engine.reset();
            engine.status()
        }
        Op::Status => engine.status(),
    };
    Ok((data, events))
}

/// JSON form of an engine event for watchers. Recognitions travel through
/// the listener sink instead.
fn describe(ev: &EngineEvent) -> Option<serde_json::Value> {
    use serde_json::json;
    let v = match ev {
        EngineEvent::GestureStarted => json!({"event": "gesture_started"}),
        EngineEvent::GestureCompleted { values } => {
            json!({"event": "gesture_completed", "values": values})
        }
        EngineEvent::PhaseChanged { phase, prompt } => {
            json!({"event": "phase", "phase": phase, "prompt": prompt})
        }
        EngineEvent::ExampleAdded { phase, accepted } => {
            json!({"event": "example", "phase": phase, "accepted": accepted})
        }
        EngineEvent::TrainingStarted { examples } => {
            json!({"event": "training_started", "examples": examples})
        }
        EngineEvent::TrainingSkipped => json!({"event": "training_skipped"}),
        EngineEvent::TrainingFinished => json!({"event": "training_finished"}),
        EngineEvent::TrainingFailed(e) => json!({"event": "training_failed", "error": e}),
        EngineEvent::NotRecognized { score } => {
            json!({"event": "not_recognized", "score": score})
        }
        EngineEvent::Recognized(_) => return None,
    };
    Some(v)
}

fn report(events: Vec<EngineEvent>, tx_evt: &Sender<DaemonEvent>) {
    for ev in &events {
        if let EngineEvent::PhaseChanged { phase, prompt } = ev {
            info!("phase {phase}: {prompt}");
        }
        if let Some(v) = describe(ev) {
            let _ = tx_evt.send(DaemonEvent::Engine(v));
        }
    }
}
