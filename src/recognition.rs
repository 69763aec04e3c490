//! Threshold decision over classifier scores and delivery of recognitions.

use anyhow::Result;
use log::error;
use serde::Deserialize;

/// Scores at index 2 ("same shape") above this count as a match.
pub const DEFAULT_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub threshold: f32,
    /// Catalog entry whose name labels a recognition.
    pub gesture: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            gesture: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub name: String,
    pub score: f32,
}

impl Recognition {
    /// `{ "<name>": true }`
    pub fn payload(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert(self.name.clone(), serde_json::Value::Bool(true));
        serde_json::Value::Object(obj)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Recognized(Recognition),
    NotRecognized { score: f32 },
}

#[derive(Debug, Clone)]
pub struct RecognitionGate {
    threshold: f32,
}

impl RecognitionGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Only the "same shape" channel is consulted; the other two exist for
    /// training labels.
    pub fn decide(&self, probs: &[f32; 3], label: &str) -> Decision {
        let score = probs[2];
        if score > self.threshold {
            Decision::Recognized(Recognition {
                name: label.to_string(),
                score,
            })
        } else {
            Decision::NotRecognized { score }
        }
    }
}

/// Names the user gave to trained gestures, looked up by index.
#[derive(Debug, Clone, Default)]
pub struct GestureCatalog {
    names: Vec<String>,
}

impl GestureCatalog {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Event label for `index`: lowercased name, or "gesture" when the slot
    /// is missing or unnamed.
    pub fn label(&self, index: usize) -> String {
        match self.name(index).map(str::trim) {
            Some(n) if !n.is_empty() => n.to_lowercase(),
            _ => "gesture".to_string(),
        }
    }
}

/// Downstream consumer of recognized gestures.
pub trait RecognitionSink {
    fn deliver(&mut self, recognition: &Recognition) -> Result<()>;
}

/// The two places a recognition goes: everyone listening for events, and the
/// action gate that turns it into input.
#[derive(Default)]
pub struct Outputs {
    pub listeners: Option<Box<dyn RecognitionSink>>,
    pub gates: Option<Box<dyn RecognitionSink>>,
}

impl Outputs {
    pub fn deliver(&mut self, recognition: &Recognition) {
        for sink in [self.listeners.as_mut(), self.gates.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = sink.deliver(recognition) {
                error!("recognition sink failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    struct Collect(Rc<RefCell<Vec<serde_json::Value>>>);

    impl RecognitionSink for Collect {
        fn deliver(&mut self, recognition: &Recognition) -> Result<()> {
            self.0.borrow_mut().push(recognition.payload());
            Ok(())
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let gate = RecognitionGate::new(DEFAULT_THRESHOLD);
        assert_eq!(
            gate.decide(&[0.0, 0.0, 0.85], "wave"),
            Decision::NotRecognized { score: 0.85 }
        );
        assert!(matches!(
            gate.decide(&[0.0, 0.0, 0.86], "wave"),
            Decision::Recognized(Recognition { ref name, .. }) if name == "wave"
        ));
    }

    #[test]
    fn test_other_channels_ignored() {
        let gate = RecognitionGate::new(DEFAULT_THRESHOLD);
        assert!(matches!(
            gate.decide(&[0.99, 0.99, 0.1], "wave"),
            Decision::NotRecognized { .. }
        ));
    }

    #[test]
    fn test_payload_shape() {
        let r = Recognition {
            name: "circle".into(),
            score: 0.9,
        };
        assert_eq!(r.payload(), serde_json::json!({"circle": true}));
    }

    #[test]
    fn test_catalog_label() {
        let cat = GestureCatalog::new(vec!["Wave".into(), "  ".into()]);
        assert_eq!(cat.label(0), "wave");
        assert_eq!(cat.label(1), "gesture");
        assert_eq!(cat.label(7), "gesture");
        assert_eq!(cat.name(0), Some("Wave"));
    }

    #[test]
    fn test_outputs_reach_both_sinks() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut out = Outputs {
            listeners: Some(Box::new(Collect(seen.clone()))),
            gates: Some(Box::new(Collect(seen.clone()))),
        };
        out.deliver(&Recognition {
            name: "wave".into(),
            score: 0.9,
        });
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }
}
