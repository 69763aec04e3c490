use anyhow::{Result, anyhow};
use log::{debug, error, info};
use std::{
    process::Command,
    sync::{Arc, Mutex},
    thread,
};

use crate::actions::{Action, UinputSink};
use crate::config::Profile;
use crate::recognition::{Recognition, RecognitionSink};

/// Turns recognitions into input through the active profile's bindings.
pub struct ActionGate {
    profile: Arc<Mutex<Profile>>,
    sink: UinputSink,
}

impl ActionGate {
    pub fn new(profile: Arc<Mutex<Profile>>, sink: UinputSink) -> Self {
        Self { profile, sink }
    }
}

impl RecognitionSink for ActionGate {
    fn deliver(&mut self, recognition: &Recognition) -> Result<()> {
        let (action, allow_commands) = {
            let p = self
                .profile
                .lock()
                .map_err(|_| anyhow!("profile lock poisoned"))?;
            (resolve(&p, &recognition.name)?, p.meta.allow_commands)
        };
        match action {
            Action::None => {
                debug!("no action bound to '{}'", recognition.name);
                Ok(())
            }
            Action::Command(cmd) if allow_commands => run_command(&cmd),
            Action::Command(_) => Err(anyhow!(
                "'{}' is bound to cmd: but allow_commands=false",
                recognition.name
            )),
            other => self.sink.perform(&other),
        }
    }
}

fn resolve(profile: &Profile, name: &str) -> Result<Action> {
    match profile.binding(name) {
        Some(b) => Action::parse(&b.action),
        None => Ok(Action::None),
    }
}

fn run_command(cmd: &str) -> Result<()> {
    let mut child = Command::new("sh").arg("-c").arg(cmd).spawn()?;
    info!("spawned '{cmd}' (pid={})", child.id());
    let cmd = cmd.to_string();
    thread::spawn(move || match child.wait() {
        Ok(status) if !status.success() => error!("'{cmd}' exited with {status}"),
        Ok(_) => {}
        Err(e) => error!("waiting for '{cmd}' failed: {e}"),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_profile;

    fn profile(txt: &str) -> Arc<Mutex<Profile>> {
        Arc::new(Mutex::new(parse_profile(txt).unwrap()))
    }

    fn wave() -> Recognition {
        Recognition {
            name: "wave".into(),
            score: 0.9,
        }
    }

    #[test]
    fn test_resolve_binding() {
        let p = parse_profile("[[gestures]]\nname = \"Wave\"\naction = \"scroll:vertical@-2\"\n")
            .unwrap();
        assert_eq!(resolve(&p, "wave").unwrap(), Action::Scroll(-2));
        assert_eq!(resolve(&p, "circle").unwrap(), Action::None);
    }

    #[test]
    fn test_unbound_and_empty_actions_are_quiet() {
        let mut gate = ActionGate::new(
            profile("[[gestures]]\nname = \"Wave\"\n"),
            UinputSink::noop(),
        );
        assert!(gate.deliver(&wave()).is_ok());
        assert!(
            gate.deliver(&Recognition {
                name: "other".into(),
                score: 0.99
            })
            .is_ok()
        );
    }

    #[test]
    fn test_noop_sink_accepts_input_actions() {
        let mut gate = ActionGate::new(
            profile("[[gestures]]\nname = \"Wave\"\naction = \"key:CTRL+EQUAL\"\n"),
            UinputSink::noop(),
        );
        assert!(gate.deliver(&wave()).is_ok());
    }

    #[test]
    fn test_command_refused_after_profile_change() {
        let shared = profile(
            "[meta]\nallow_commands = true\n[[gestures]]\nname = \"Wave\"\naction = \"cmd:true\"\n",
        );
        let mut gate = ActionGate::new(shared.clone(), UinputSink::noop());
        shared.lock().unwrap().meta.allow_commands = false;
        assert!(gate.deliver(&wave()).is_err());
    }
}
