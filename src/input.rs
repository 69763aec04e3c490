//! Accelerometer discovery and axis mapping (evdev 0.13)

use evdev::{AbsoluteAxisCode, Device, EventType, InputEvent, PropType};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::sample::Axis;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
}

fn is_accelerometer(dev: &Device) -> bool {
    if dev.properties().contains(PropType::ACCELEROMETER) {
        return true;
    }
    // Joysticks and touchpads also report ABS_X/Y/Z; they carry keys or MT slots.
    let has_xyz = dev.supported_absolute_axes().is_some_and(|a| {
        a.contains(AbsoluteAxisCode::ABS_X)
            && a.contains(AbsoluteAxisCode::ABS_Y)
            && a.contains(AbsoluteAxisCode::ABS_Z)
            && !a.contains(AbsoluteAxisCode::ABS_MT_SLOT)
    });
    has_xyz && !dev.supported_events().contains(EventType::KEY)
}

pub fn discover_accelerometers() -> Vec<DeviceInfo> {
    let Ok(rd) = std::fs::read_dir("/dev/input") else {
        return Vec::new();
    };
    let mut out: Vec<DeviceInfo> = rd
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with("event"))
        })
        .filter_map(|p| {
            let dev = Device::open(&p).ok()?;
            is_accelerometer(&dev).then(|| DeviceInfo {
                name: dev.name().unwrap_or("unknown").to_string(),
                path: p,
            })
        })
        .collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

pub fn describe_accelerometers() -> Vec<String> {
    discover_accelerometers()
        .into_iter()
        .map(|d| format!("{} ({})", d.name, d.path.display()))
        .collect()
}

/// The configured device if given, otherwise every detected accelerometer.
/// Devices are switched to non-blocking reads.
pub fn open_accelerometers(device: Option<&str>) -> Vec<Device> {
    let paths: Vec<PathBuf> = match device {
        Some(p) => vec![Path::new(p).to_path_buf()],
        None => discover_accelerometers().into_iter().map(|d| d.path).collect(),
    };

    let mut devs = Vec::new();
    for p in paths {
        match Device::open(&p) {
            Ok(mut dev) => {
                if let Err(e) = dev.set_nonblocking(true) {
                    warn!("cannot make {} non-blocking: {e}", p.display());
                    continue;
                }
                info!(
                    "reading accelerometer {} ({})",
                    dev.name().unwrap_or("unknown"),
                    p.display()
                );
                devs.push(dev);
            }
            Err(e) => warn!("failed to open {}: {e}", p.display()),
        }
    }
    devs
}

pub fn axis_for(code: u16) -> Option<Axis> {
    match code {
        c if c == AbsoluteAxisCode::ABS_X.0 => Some(Axis::X),
        c if c == AbsoluteAxisCode::ABS_Y.0 => Some(Axis::Y),
        c if c == AbsoluteAxisCode::ABS_Z.0 => Some(Axis::Z),
        _ => None,
    }
}

/// Axis reading carried by an event, divided by `scale`.
pub fn axis_reading(ev: &InputEvent, scale: f32) -> Option<(Axis, f32)> {
    if ev.event_type() != EventType::ABSOLUTE {
        return None;
    }
    axis_for(ev.code()).map(|axis| (axis, ev.value() as f32 / scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_codes() {
        assert_eq!(axis_for(AbsoluteAxisCode::ABS_X.0), Some(Axis::X));
        assert_eq!(axis_for(AbsoluteAxisCode::ABS_Z.0), Some(Axis::Z));
        assert_eq!(axis_for(AbsoluteAxisCode::ABS_MT_SLOT.0), None);
    }

    #[test]
    fn test_axis_reading_scales() {
        let ev = InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_Y.0, 512);
        assert_eq!(axis_reading(&ev, 16.0), Some((Axis::Y, 32.0)));

        let syn = InputEvent::new(EventType::SYNCHRONIZATION.0, 0, 0);
        assert_eq!(axis_reading(&syn, 1.0), None);
    }
}
