//! Raw accelerometer samples, axis assembly and normalization.

use anyhow::{Result, anyhow};
use serde::Deserialize;

/// Half-width of the raw reading range the sensor reports (device units).
pub const DEFAULT_RANGE: f32 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl NormalizedSample {
    pub fn distance(&self, other: &NormalizedSample) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Maps `[-range, range]` onto `[0, 1]` per axis. Values outside the range
/// are passed through the same affine map; nothing is clamped.
pub fn normalize(raw: RawSample, range: f32) -> NormalizedSample {
    let span = 2.0 * range;
    NormalizedSample {
        x: (raw.x + range) / span,
        y: (raw.y + range) / span,
        z: (raw.z + range) / span,
    }
}

/// Collects per-axis readings until a full x/y/z triple is available.
///
/// A repeated reading for an axis that is already pending overwrites it.
#[derive(Debug, Default)]
pub struct AxisAssembler {
    x: Option<f32>,
    y: Option<f32>,
    z: Option<f32>,
}

impl AxisAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, axis: Axis, value: f32) -> Option<RawSample> {
        match axis {
            Axis::X => self.x = Some(value),
            Axis::Y => self.y = Some(value),
            Axis::Z => self.z = Some(value),
        }

        match (self.x, self.y, self.z) {
            (Some(x), Some(y), Some(z)) => {
                self.clear();
                Some(RawSample { x, y, z })
            }
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.x = None;
        self.y = None;
        self.z = None;
    }
}

/// One line of a recorded sample stream: `{"axis":"x","value":1.5,"t_ms":120}`.
#[derive(Debug, Clone, Deserialize)]
pub struct AxisEvent {
    pub axis: Axis,
    pub value: f32,
    #[serde(default)]
    pub t_ms: u64,
}

impl AxisEvent {
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| anyhow!("bad sample line '{}': {e}", line.trim()))
    }
}
