use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::actions::Action;
use crate::classifier::TrainingOptions;
use crate::engine::EngineConfig;
use crate::input;
use crate::protocol::DEFAULT_PHASE_DELAY_MS;
use crate::recognition::{GestureCatalog, RecognitionConfig};
use crate::sample::DEFAULT_RANGE;
use crate::segmentation::SegmentationConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
    #[serde(default)]
    pub allow_commands: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub phase_delay_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            phase_delay_ms: DEFAULT_PHASE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub range: f32,
    /// Raw device values are divided by this before normalization.
    pub scale: f32,
    pub device: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            range: DEFAULT_RANGE,
            scale: 1.0,
            device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GestureBinding {
    pub name: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub training: TrainingOptions,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub gestures: Vec<GestureBinding>,
}

impl Profile {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            range: self.input.range,
            segmentation: self.segmentation.clone(),
            phase_delay_ms: self.protocol.phase_delay_ms,
            training: self.training.clone(),
            recognition: self.recognition.clone(),
            catalog: GestureCatalog::new(self.gestures.iter().map(|g| g.name.clone()).collect()),
        }
    }

    /// Binding for a recognized label; labels are lowercased names.
    pub fn binding(&self, name: &str) -> Option<&GestureBinding> {
        self.gestures
            .iter()
            .find(|g| g.name.trim().eq_ignore_ascii_case(name))
    }
}

pub fn parse_profile(txt: &str) -> Result<Profile> {
    let profile: Profile = toml::from_str(txt)?;
    validate_profile(&profile)?;
    Ok(profile)
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub detected_devices: Vec<String>,
}

fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("airgestd"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir()?;
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;
        let detected_devices = input::describe_accelerometers();

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
            detected_devices,
        })
    }

    /// On error the previous profile stays in place.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v: Vec<String> = fs::read_dir(&self.profiles_dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "accelerometers": input::describe_accelerometers(),
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

fn load_profile(dir: &Path, name: &str) -> Result<Profile> {
    read_profile(&dir.join(format!("{name}.toml")))
}

pub fn read_profile(path: &Path) -> Result<Profile> {
    let txt = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    parse_profile(&txt).map_err(|e| anyhow!("invalid profile {}: {e}", path.display()))
}

/// The profile shipped with the binary.
pub fn builtin_profile() -> Result<Profile> {
    parse_profile(default_profile_text())
}

fn validate_profile(p: &Profile) -> Result<()> {
    let seg = &p.segmentation;
    if seg.start_threshold <= 0.0 || seg.stop_threshold <= 0.0 {
        return Err(anyhow!("segmentation thresholds must be positive"));
    }
    if seg.start_threshold >= seg.stop_threshold {
        return Err(anyhow!(
            "segmentation.start_threshold must be below stop_threshold"
        ));
    }
    if !(p.recognition.threshold > 0.0 && p.recognition.threshold < 1.0) {
        return Err(anyhow!("recognition.threshold must be in (0,1)"));
    }
    if p.input.range <= 0.0 {
        return Err(anyhow!("input.range must be positive"));
    }
    if p.input.scale == 0.0 {
        return Err(anyhow!("input.scale must be non-zero"));
    }
    let t = &p.training;
    if t.rate <= 0.0 || t.iterations == 0 {
        return Err(anyhow!("training.rate and training.iterations must be positive"));
    }
    if t.frames < 2 {
        return Err(anyhow!("training.frames must be at least 2"));
    }

    let mut seen = HashSet::new();
    for g in &p.gestures {
        let name = g.name.trim();
        if name.is_empty() {
            return Err(anyhow!("gesture with empty name"));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(anyhow!("duplicate gesture '{name}'"));
        }
        let action = Action::parse(&g.action)
            .map_err(|e| anyhow!("gesture '{name}': {e}"))?;
        if matches!(action, Action::Command(_)) && !p.meta.allow_commands {
            return Err(anyhow!(
                "gesture '{name}' uses cmd: but allow_commands=false"
            ));
        }
    }
    if !p.gestures.is_empty() && p.recognition.gesture >= p.gestures.len() {
        return Err(anyhow!(
            "recognition.gesture = {} but only {} gestures defined",
            p.recognition.gesture,
            p.gestures.len()
        ));
    }
    Ok(())
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| {
            line.split(':')
                .nth(3)
                .unwrap_or("")
                .split(',')
                .any(|u| u == user)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_parses() {
        let p = builtin_profile().unwrap();
        assert_eq!(p.segmentation.start_threshold, 0.25);
        assert_eq!(p.segmentation.stop_threshold, 0.95);
        assert_eq!(p.segmentation.min_duration_ms, 1000);
        assert_eq!(p.recognition.threshold, 0.85);
        assert_eq!(p.protocol.phase_delay_ms, 2000);
        assert_eq!(p.input.range, 32.0);
        assert_eq!(p.engine_config().catalog.label(0), "activate");
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let p = parse_profile("[meta]\nname = \"bare\"\n").unwrap();
        assert_eq!(p.segmentation.min_duration_ms, 1000);
        assert_eq!(p.training.frames, 20);
        assert!(p.gestures.is_empty());
        assert_eq!(p.engine_config().catalog.label(0), "gesture");
    }

    #[test]
    fn test_binding_lookup_ignores_case() {
        let p = parse_profile(
            r#"
[[gestures]]
name = "Wave"
action = "mouse:left"
"#,
        )
        .unwrap();
        assert_eq!(p.binding("wave").map(|b| b.action.as_str()), Some("mouse:left"));
        assert!(p.binding("circle").is_none());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = parse_profile(
            "[segmentation]\nstart_threshold = 0.9\nstop_threshold = 0.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("start_threshold"));
    }

    #[test]
    fn test_rejects_gate_threshold_out_of_range() {
        assert!(parse_profile("[recognition]\nthreshold = 1.0\n").is_err());
        assert!(parse_profile("[recognition]\nthreshold = 0.0\n").is_err());
    }

    #[test]
    fn test_cmd_requires_allow_commands() {
        let txt = r#"
[[gestures]]
name = "Lock"
action = "cmd:loginctl lock-session"
"#;
        assert!(parse_profile(txt).is_err());
        let allowed = format!("[meta]\nallow_commands = true\n{txt}");
        assert!(parse_profile(&allowed).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_and_bad_gestures() {
        let dup = r#"
[[gestures]]
name = "Wave"
[[gestures]]
name = "wave"
"#;
        assert!(parse_profile(dup).is_err());

        let bad = "[[gestures]]\nname = \"Wave\"\naction = \"beep\"\n";
        assert!(parse_profile(bad).is_err());

        let out_of_range = "[recognition]\ngesture = 3\n[[gestures]]\nname = \"Wave\"\n";
        assert!(parse_profile(out_of_range).is_err());
    }

    #[test]
    fn test_rejects_bad_input_and_training() {
        assert!(parse_profile("[input]\nrange = 0.0\n").is_err());
        assert!(parse_profile("[input]\nscale = 0.0\n").is_err());
        assert!(parse_profile("[training]\nframes = 1\n").is_err());
        assert!(parse_profile("[training]\niterations = 0\n").is_err());
    }
}
