//! Labeled training examples collected by the recording protocol.

use log::{debug, warn};

/// `[random shape, at rest, same shape]`
pub type LabelVector = [bool; 3];

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub input: Vec<f32>,
    pub output: LabelVector,
}

impl TrainingExample {
    pub fn target(&self) -> [f32; 3] {
        self.output.map(|b| if b { 1.0 } else { 0.0 })
    }
}

#[derive(Debug, Default)]
pub struct TrainingSetStore {
    examples: Vec<TrainingExample>,
}

impl TrainingSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an example. Empty sequences are rejected.
    pub fn add_example(&mut self, input: Vec<f32>, output: LabelVector) -> bool {
        if input.is_empty() {
            warn!("the given input is empty; example for {output:?} dropped");
            return false;
        }
        debug!("adding input set of {} values for output {output:?}", input.len());
        self.examples.push(TrainingExample { input, output });
        true
    }

    pub fn examples(&self) -> &[TrainingExample] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn clear(&mut self) {
        self.examples.clear();
    }
}
