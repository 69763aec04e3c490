//! One gesture session.
//!
//! Every complete sample runs normalize -> delta -> segmentation ->
//! accumulate synchronously. A finished gesture either becomes a training
//! example (recording) or goes through the classifier and the gate
//! (listening). Training is the only work that leaves this thread.

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::classifier::{Classifier, ClassifierError, Model, TrainingOptions, TrainingTask};
use crate::protocol::{self, Advance, Phase, RecordingSession};
use crate::recognition::{
    Decision, GestureCatalog, Outputs, Recognition, RecognitionConfig, RecognitionGate,
};
use crate::sample::{Axis, AxisAssembler, DEFAULT_RANGE, RawSample, normalize};
use crate::segmentation::{Segment, SegmentationConfig, SegmentationDetector};
use crate::training::TrainingSetStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no trained model; record a gesture first")]
    NotTrained,
    #[error("training is still running")]
    TrainingInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Recording,
    Training,
    Listening,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Recording => "recording",
            Mode::Training => "training",
            Mode::Listening => "listening",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    GestureStarted,
    GestureCompleted { values: usize },
    PhaseChanged { phase: u8, prompt: &'static str },
    ExampleAdded { phase: u8, accepted: bool },
    TrainingStarted { examples: usize },
    TrainingSkipped,
    TrainingFinished,
    TrainingFailed(String),
    Recognized(Recognition),
    NotRecognized { score: f32 },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Raw readings are expected in `[-range, range]`.
    pub range: f32,
    pub segmentation: SegmentationConfig,
    pub phase_delay_ms: u64,
    pub training: TrainingOptions,
    pub recognition: RecognitionConfig,
    pub catalog: GestureCatalog,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            range: DEFAULT_RANGE,
            segmentation: SegmentationConfig::default(),
            phase_delay_ms: protocol::DEFAULT_PHASE_DELAY_MS,
            training: TrainingOptions::default(),
            recognition: RecognitionConfig::default(),
            catalog: GestureCatalog::default(),
        }
    }
}

pub struct Engine {
    cfg: EngineConfig,
    assembler: AxisAssembler,
    detector: SegmentationDetector,
    mode: Mode,
    session: Option<RecordingSession>,
    store: TrainingSetStore,
    classifier: Classifier,
    training: Option<TrainingTask>,
    gate: RecognitionGate,
    outputs: Outputs,
}

impl Engine {
    pub fn new(cfg: EngineConfig, classifier: Classifier, outputs: Outputs) -> Self {
        Self {
            assembler: AxisAssembler::new(),
            detector: SegmentationDetector::new(cfg.segmentation.clone()),
            mode: Mode::Idle,
            session: None,
            store: TrainingSetStore::new(),
            classifier,
            training: None,
            gate: RecognitionGate::new(cfg.recognition.threshold),
            outputs,
            cfg,
        }
    }

    /// Swap thresholds and catalog; in-flight state is kept.
    pub fn set_config(&mut self, cfg: EngineConfig) {
        self.detector.set_config(cfg.segmentation.clone());
        self.gate = RecognitionGate::new(cfg.recognition.threshold);
        self.cfg = cfg;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn phase(&self) -> Option<&'static Phase> {
        self.session.as_ref().map(RecordingSession::phase)
    }

    pub fn store(&self) -> &TrainingSetStore {
        &self.store
    }

    pub fn is_trained(&self) -> bool {
        self.classifier.is_trained()
    }

    pub fn status(&self) -> serde_json::Value {
        let phase = self.phase();
        serde_json::json!({
            "mode": self.mode.as_str(),
            "phase": phase.map(|p| p.number),
            "prompt": phase.map(|p| p.prompt),
            "phase_deadline_ms": self.session.as_ref().and_then(RecordingSession::deadline_ms),
            "examples": self.store.len(),
            "trained": self.is_trained(),
            "gesture_active": self.detector.is_active(),
            "gesture": self.cfg.catalog.label(self.cfg.recognition.gesture),
        })
    }

    /// Per-axis input; the triple is processed once x, y and z have arrived.
    pub fn on_axis(&mut self, axis: Axis, value: f32, now_ms: u64) -> Vec<EngineEvent> {
        match self.assembler.push(axis, value) {
            Some(raw) => self.on_sample(raw, now_ms),
            None => Vec::new(),
        }
    }

    pub fn on_sample(&mut self, raw: RawSample, now_ms: u64) -> Vec<EngineEvent> {
        let sample = normalize(raw, self.cfg.range);
        let capturing = self.capturing();
        let mut events = Vec::new();

        match self.detector.update(sample, now_ms, capturing) {
            Some(Segment::Started) => {
                if self.mode == Mode::Listening {
                    info!("listening...");
                }
                events.push(EngineEvent::GestureStarted);
            }
            Some(Segment::Completed(sequence)) => {
                events.push(EngineEvent::GestureCompleted {
                    values: sequence.len(),
                });
                self.on_gesture(sequence, now_ms, &mut events);
            }
            None => {}
        }
        events
    }

    /// Fire a due phase timer and collect a finished training run.
    pub fn tick(&mut self, now_ms: u64) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        if self.mode == Mode::Recording
            && self.session.as_mut().is_some_and(|s| s.timer_due(now_ms))
        {
            self.advance(now_ms, &mut events);
        }

        if let Some(result) = self.training.as_mut().and_then(TrainingTask::poll) {
            self.training = None;
            self.on_trained(result, &mut events);
        }
        events
    }

    /// Block until the running training task is done.
    pub fn finish_training(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if let Some(task) = self.training.take() {
            let result = task.wait();
            self.on_trained(result, &mut events);
        }
        events
    }

    /// (Re)start the guided protocol at phase 1.
    pub fn start_recording(&mut self, now_ms: u64) -> Result<Vec<EngineEvent>, EngineError> {
        if self.mode == Mode::Training {
            return Err(EngineError::TrainingInProgress);
        }
        self.detector.cancel();
        self.mode = Mode::Recording;
        let session = RecordingSession::start(now_ms, self.cfg.phase_delay_ms);
        let phase = session.phase();
        self.session = Some(session);

        let mut events = Vec::new();
        self.enter_phase(phase, &mut events);
        Ok(events)
    }

    /// Abandon the protocol. Examples captured so far stay in the store.
    pub fn cancel_recording(&mut self) -> bool {
        if self.mode != Mode::Recording {
            return false;
        }
        info!("recording cancelled");
        self.to_idle();
        true
    }

    pub fn start_listening(&mut self) -> Result<(), EngineError> {
        match self.mode {
            Mode::Training => Err(EngineError::TrainingInProgress),
            _ if !self.classifier.is_trained() => Err(EngineError::NotTrained),
            Mode::Listening => Ok(()),
            Mode::Idle | Mode::Recording => {
                self.to_idle();
                self.mode = Mode::Listening;
                info!("listening for '{}'", self.label());
                Ok(())
            }
        }
    }

    /// Stop listening; a gesture in progress is dropped without a decision.
    pub fn stop_listening(&mut self) -> bool {
        if self.mode != Mode::Listening {
            return false;
        }
        self.to_idle();
        info!("stopped listening");
        true
    }

    /// Forget everything learned: examples, model, running training.
    /// A fit in flight is joined and its result discarded, so a new run
    /// never overlaps it.
    pub fn reset(&mut self) {
        if let Some(task) = self.training.take() {
            let _ = task.wait();
            debug!("running training discarded");
        }
        self.to_idle();
        self.assembler.clear();
        self.store.clear();
        self.classifier.forget();
        info!("training set and model cleared");
    }

    fn to_idle(&mut self) {
        self.detector.cancel();
        self.detector.set_force_start(false);
        self.session = None;
        self.mode = Mode::Idle;
    }

    fn capturing(&self) -> bool {
        match self.mode {
            Mode::Recording => self
                .session
                .as_ref()
                .is_some_and(RecordingSession::capturing),
            Mode::Listening => true,
            Mode::Idle | Mode::Training => false,
        }
    }

    fn label(&self) -> String {
        self.cfg.catalog.label(self.cfg.recognition.gesture)
    }

    fn on_gesture(&mut self, sequence: Vec<f32>, now_ms: u64, events: &mut Vec<EngineEvent>) {
        match self.mode {
            Mode::Recording => {
                let Some(session) = self.session.as_ref() else {
                    return;
                };
                if !session.capturing() {
                    return;
                }
                let phase = session.phase().number;
                if let Some(label) = protocol::label_for(phase) {
                    let accepted = self.store.add_example(sequence, label);
                    events.push(EngineEvent::ExampleAdded { phase, accepted });
                }
                self.advance(now_ms, events);
            }
            Mode::Listening => self.recognize(&sequence, events),
            Mode::Idle | Mode::Training => {
                debug!("gesture ignored while {}", self.mode.as_str());
            }
        }
    }

    fn advance(&mut self, now_ms: u64, events: &mut Vec<EngineEvent>) {
        let next = self.session.as_mut().and_then(|s| s.advance(now_ms));
        if let Some(phase) = next {
            self.enter_phase(phase, events);
        }
    }

    fn enter_phase(&mut self, phase: &'static Phase, events: &mut Vec<EngineEvent>) {
        self.detector.set_force_start(phase.force_start);
        events.push(EngineEvent::PhaseChanged {
            phase: phase.number,
            prompt: phase.prompt,
        });
        if phase.advance == Advance::Train {
            self.start_training(events);
        }
    }

    fn start_training(&mut self, events: &mut Vec<EngineEvent>) {
        self.to_idle();
        let examples = self.store.examples().to_vec();
        let count = examples.len();
        match self.classifier.train(examples, self.cfg.training.clone()) {
            Ok(task) => {
                self.training = Some(task);
                self.mode = Mode::Training;
                events.push(EngineEvent::TrainingStarted { examples: count });
            }
            Err(ClassifierError::EmptyTrainingSet) => {
                warn!("no training set defined; use record first");
                events.push(EngineEvent::TrainingSkipped);
            }
            Err(e) => {
                error!("could not start training: {e}");
                events.push(EngineEvent::TrainingFailed(e.to_string()));
            }
        }
    }

    fn on_trained(
        &mut self,
        result: Result<Box<dyn Model>, ClassifierError>,
        events: &mut Vec<EngineEvent>,
    ) {
        self.mode = Mode::Idle;
        match result {
            Ok(model) => {
                self.classifier.install(model);
                info!("model ready; listening is available");
                events.push(EngineEvent::TrainingFinished);
            }
            Err(e) => {
                error!("training failed: {e}");
                events.push(EngineEvent::TrainingFailed(e.to_string()));
            }
        }
    }

    fn recognize(&mut self, sequence: &[f32], events: &mut Vec<EngineEvent>) {
        let probs = match self.classifier.infer(sequence) {
            Ok(p) => p,
            Err(e) => {
                warn!("cannot classify gesture: {e}");
                return;
            }
        };
        debug!("done, results: {probs:?}");

        match self.gate.decide(&probs, &self.label()) {
            Decision::Recognized(r) => {
                info!("recognized '{}' (score {:.3})", r.name, r.score);
                self.outputs.deliver(&r);
                events.push(EngineEvent::Recognized(r));
            }
            Decision::NotRecognized { score } => {
                debug!("not recognized (score {score:.3})");
                events.push(EngineEvent::NotRecognized { score });
            }
        }
    }
}
