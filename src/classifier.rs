//! Trainable sequence classifier boundary.
//!
//! The engine only needs two things from a learner: `fit` a model over the
//! labeled examples, and `infer` three independent class scores for one
//! feature sequence. Training runs on a worker thread and hands back a
//! [`TrainingTask`]; a model is only usable once that task has delivered it.

use log::{debug, info};
use serde::Deserialize;
use std::{
    sync::{
        Arc,
        mpsc::{self, Receiver, TryRecvError},
    },
    thread::{self, JoinHandle},
};
use thiserror::Error;

use crate::training::TrainingExample;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier is not trained")]
    NotTrained,
    #[error("no training examples; record a gesture first")]
    EmptyTrainingSet,
    #[error("cannot classify an empty sequence")]
    EmptySequence,
    #[error("training failed: {0}")]
    Training(String),
    #[error("training worker exited without a result")]
    WorkerLost,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub rate: f32,
    pub iterations: usize,
    /// Training stops once the mean squared error drops below this.
    pub error: f32,
    /// Frames every sequence is resampled to before fitting.
    pub frames: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            rate: 0.1,
            iterations: 20_000,
            error: 0.005,
            frames: 20,
        }
    }
}

pub trait Model: Send {
    /// Scores for `[random shape, at rest, same shape]`.
    fn infer(&self, sequence: &[f32]) -> [f32; 3];
}

pub trait Trainer: Send + Sync {
    fn fit(
        &self,
        examples: &[TrainingExample],
        opts: &TrainingOptions,
    ) -> Result<Box<dyn Model>, ClassifierError>;
}

type TrainingResult = Result<Box<dyn Model>, ClassifierError>;

/// Handle to a training run in flight.
pub struct TrainingTask {
    rx: Receiver<TrainingResult>,
    handle: Option<JoinHandle<()>>,
}

impl TrainingTask {
    /// Non-blocking check; `Some` exactly once when the worker is done.
    pub fn poll(&mut self) -> Option<TrainingResult> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.reap();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.reap();
                Some(Err(ClassifierError::WorkerLost))
            }
        }
    }

    pub fn wait(mut self) -> TrainingResult {
        let result = self.rx.recv().unwrap_or(Err(ClassifierError::WorkerLost));
        self.reap();
        result
    }

    fn reap(&mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

pub struct Classifier {
    trainer: Arc<dyn Trainer>,
    model: Option<Box<dyn Model>>,
}

impl Classifier {
    pub fn new(trainer: impl Trainer + 'static) -> Self {
        Self {
            trainer: Arc::new(trainer),
            model: None,
        }
    }

    /// Start training in the background. Any previous model is dropped first.
    pub fn train(
        &mut self,
        examples: Vec<TrainingExample>,
        opts: TrainingOptions,
    ) -> Result<TrainingTask, ClassifierError> {
        if examples.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        self.model = None;

        info!("training on {} examples...", examples.len());
        let trainer = Arc::clone(&self.trainer);
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("trainer".into())
            .spawn(move || {
                let _ = tx.send(trainer.fit(&examples, &opts));
            })
            .map_err(|e| ClassifierError::Training(e.to_string()))?;

        Ok(TrainingTask {
            rx,
            handle: Some(handle),
        })
    }

    pub fn install(&mut self, model: Box<dyn Model>) {
        self.model = Some(model);
    }

    pub fn forget(&mut self) {
        self.model = None;
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn infer(&self, sequence: &[f32]) -> Result<[f32; 3], ClassifierError> {
        let model = self.model.as_ref().ok_or(ClassifierError::NotTrained)?;
        if sequence.is_empty() {
            return Err(ClassifierError::EmptySequence);
        }
        Ok(model.infer(sequence))
    }
}

/// Stretch or squeeze a flattened `x, y, z` sequence to `frames` triples by
/// linear interpolation. A trailing partial triple is ignored.
pub fn resample(sequence: &[f32], frames: usize) -> Vec<f32> {
    let n = sequence.len() / 3;
    let mut out = Vec::with_capacity(frames * 3);
    if n == 0 {
        out.resize(frames * 3, 0.0);
        return out;
    }

    for i in 0..frames {
        let pos = if frames > 1 {
            i as f32 * (n - 1) as f32 / (frames - 1) as f32
        } else {
            0.0
        };
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = pos - lo as f32;
        for axis in 0..3 {
            let a = sequence[lo * 3 + axis];
            let b = sequence[hi * 3 + axis];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Three independent logistic units over the resampled sequence, fitted by
/// batch gradient descent.
#[derive(Debug, Default)]
pub struct LogisticTrainer;

struct LogisticModel {
    frames: usize,
    weights: [Vec<f32>; 3],
    bias: [f32; 3],
}

impl Model for LogisticModel {
    fn infer(&self, sequence: &[f32]) -> [f32; 3] {
        let x = resample(sequence, self.frames);
        std::array::from_fn(|k| sigmoid(dot(&self.weights[k], &x) + self.bias[k]))
    }
}

impl Trainer for LogisticTrainer {
    fn fit(
        &self,
        examples: &[TrainingExample],
        opts: &TrainingOptions,
    ) -> Result<Box<dyn Model>, ClassifierError> {
        if examples.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let frames = opts.frames.max(2);
        let dim = frames * 3;
        let inputs: Vec<Vec<f32>> = examples.iter().map(|e| resample(&e.input, frames)).collect();
        let targets: Vec<[f32; 3]> = examples.iter().map(TrainingExample::target).collect();
        let n = inputs.len() as f32;

        let mut weights: [Vec<f32>; 3] = std::array::from_fn(|_| vec![0.0; dim]);
        let mut bias = [0.0f32; 3];
        let mut grad_w: [Vec<f32>; 3] = std::array::from_fn(|_| vec![0.0; dim]);
        let mut mse = f32::INFINITY;
        let mut epochs = 0;

        for epoch in 0..opts.iterations {
            epochs = epoch + 1;
            grad_w.iter_mut().for_each(|g| g.fill(0.0));
            let mut grad_b = [0.0f32; 3];
            let mut sq = 0.0;

            for (x, t) in inputs.iter().zip(&targets) {
                for k in 0..3 {
                    let err = sigmoid(dot(&weights[k], x) + bias[k]) - t[k];
                    sq += err * err;
                    for (g, xi) in grad_w[k].iter_mut().zip(x) {
                        *g += err * xi;
                    }
                    grad_b[k] += err;
                }
            }

            mse = sq / (n * 3.0);
            if !mse.is_finite() {
                return Err(ClassifierError::Training(format!(
                    "error diverged at iteration {epochs}"
                )));
            }
            if mse < opts.error {
                break;
            }
            for k in 0..3 {
                for (w, g) in weights[k].iter_mut().zip(&grad_w[k]) {
                    *w -= opts.rate * g / n;
                }
                bias[k] -= opts.rate * grad_b[k] / n;
            }
            if epoch % 1000 == 0 {
                debug!("iteration {epoch}: error {mse:.5}");
            }
        }

        info!("network trained: {epochs} iterations, error {mse:.5}");
        Ok(Box::new(LogisticModel {
            frames,
            weights,
            bias,
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Learner whose model always answers with the same scores.
    pub struct FixedTrainer(pub [f32; 3]);

    struct FixedModel([f32; 3]);

    impl Model for FixedModel {
        fn infer(&self, _sequence: &[f32]) -> [f32; 3] {
            self.0
        }
    }

    impl Trainer for FixedTrainer {
        fn fit(
            &self,
            _examples: &[TrainingExample],
            _opts: &TrainingOptions,
        ) -> Result<Box<dyn Model>, ClassifierError> {
            Ok(Box::new(FixedModel(self.0)))
        }
    }

    /// Like [`FixedTrainer`], but `fit` blocks until the test releases it.
    pub struct GatedTrainer {
        pub scores: [f32; 3],
        pub release: Mutex<mpsc::Receiver<()>>,
    }

    impl GatedTrainer {
        pub fn new(scores: [f32; 3]) -> (Self, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let trainer = Self {
                scores,
                release: Mutex::new(rx),
            };
            (trainer, tx)
        }
    }

    impl Trainer for GatedTrainer {
        fn fit(
            &self,
            _examples: &[TrainingExample],
            _opts: &TrainingOptions,
        ) -> Result<Box<dyn Model>, ClassifierError> {
            if let Ok(rx) = self.release.lock() {
                let _ = rx.recv();
            }
            Ok(Box::new(FixedModel(self.scores)))
        }
    }
}
