use anyhow::{Result, anyhow};
use log::{info, warn};

/// What a recognized gesture turns into, parsed from a profile binding:
/// `key:CTRL+EQUAL`, `mouse:left`, `scroll:vertical@-3`, `cmd:<shell>` or
/// empty for "emit the event only".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Mouse(String),
    Scroll(i32),
    Key(Vec<&'static str>),
    Command(String),
}

impl Action {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Action::None);
        }
        if let Some(rest) = s.strip_prefix("mouse:") {
            let button = rest.trim().to_ascii_lowercase();
            return match button.as_str() {
                "left" | "right" | "middle" => Ok(Action::Mouse(button)),
                other => Err(anyhow!("unknown mouse button: {other}")),
            };
        }
        if let Some(rest) = s.strip_prefix("scroll:") {
            let (axis, steps) = rest.split_once('@').unwrap_or(("vertical", rest));
            if !axis.trim().eq_ignore_ascii_case("vertical") {
                return Err(anyhow!("only vertical scroll is supported, got '{axis}'"));
            }
            let steps: i32 = steps
                .trim()
                .parse()
                .map_err(|_| anyhow!("bad scroll steps '{steps}'"))?;
            return Ok(Action::Scroll(steps));
        }
        if let Some(rest) = s.strip_prefix("key:") {
            let mut keys = Vec::new();
            for tok in rest.split('+') {
                let tok = tok.trim().to_ascii_uppercase();
                keys.push(key_name(&tok).ok_or_else(|| anyhow!("unsupported key token: {tok}"))?);
            }
            return Ok(Action::Key(keys));
        }
        if let Some(rest) = s.strip_prefix("cmd:") {
            let cmd = rest.trim();
            if cmd.is_empty() {
                return Err(anyhow!("cmd: action without a command"));
            }
            return Ok(Action::Command(cmd.to_string()));
        }
        Err(anyhow!("invalid action '{s}'"))
    }
}

const LETTERS: [&str; 26] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
    "S", "T", "U", "V", "W", "X", "Y", "Z",
];

/// Canonical key name for a chord token.
fn key_name(tok: &str) -> Option<&'static str> {
    let k = match tok {
        "CTRL" | "CONTROL" => "CTRL",
        "ALT" => "ALT",
        "SHIFT" => "SHIFT",
        "SUPER" | "META" | "WIN" => "SUPER",
        "TAB" => "TAB",
        "MINUS" | "-" => "MINUS",
        "EQUAL" | "=" => "EQUAL",
        "SPACE" => "SPACE",
        "ENTER" | "RETURN" => "ENTER",
        "ESC" | "ESCAPE" => "ESC",
        "UP" => "UP",
        "DOWN" => "DOWN",
        "LEFT" => "LEFT",
        "RIGHT" => "RIGHT",
        other => return LETTERS.iter().copied().find(|l| *l == other),
    };
    Some(k)
}

pub struct UinputSink {
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; actions are NO-OP");
            Ok(Self { linux: None })
        }
    }

    pub fn noop() -> Self {
        Self { linux: None }
    }

    pub fn perform(&mut self, action: &Action) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            match action {
                Action::Mouse(button) => dev.click(button)?,
                Action::Scroll(steps) => dev.scroll_vertical(*steps)?,
                Action::Key(keys) => dev.chord(keys)?,
                Action::None | Action::Command(_) => {}
            }
        }
        #[cfg(not(target_os = "linux"))]
        let _ = action;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn map_key(name: &str) -> Result<uinput::event::keyboard::Key> {
    use uinput::event::keyboard::Key as K;
    let k = match name {
        "CTRL" => K::LeftControl,
        "ALT" => K::LeftAlt,
        "SHIFT" => K::LeftShift,
        "SUPER" => K::LeftMeta,
        "TAB" => K::Tab,
        "MINUS" => K::Minus,
        "EQUAL" => K::Equal,
        "SPACE" => K::Space,
        "ENTER" => K::Enter,
        "ESC" => K::Esc,
        "UP" => K::Up,
        "DOWN" => K::Down,
        "LEFT" => K::Left,
        "RIGHT" => K::Right,
        "A" => K::A,
        "B" => K::B,
        "C" => K::C,
        "D" => K::D,
        "E" => K::E,
        "F" => K::F,
        "G" => K::G,
        "H" => K::H,
        "I" => K::I,
        "J" => K::J,
        "K" => K::K,
        "L" => K::L,
        "M" => K::M,
        "N" => K::N,
        "O" => K::O,
        "P" => K::P,
        "Q" => K::Q,
        "R" => K::R,
        "S" => K::S,
        "T" => K::T,
        "U" => K::U,
        "V" => K::V,
        "W" => K::W,
        "X" => K::X,
        "Y" => K::Y,
        "Z" => K::Z,
        other => return Err(anyhow!("unsupported key: {other}")),
    };
    Ok(k)
}

#[cfg(target_os = "linux")]
fn mouse_button(name: &str) -> Result<uinput::event::controller::Mouse> {
    use uinput::event::controller::Mouse;
    match name {
        "left" => Ok(Mouse::Left),
        "right" => Ok(Mouse::Right),
        "middle" => Ok(Mouse::Middle),
        other => Err(anyhow!("unknown mouse button: {other}")),
    }
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::{Keyboard, controller::Mouse, relative};

        let dev = uinput::default()?
            .name("airgestd virtual input")?
            .event(relative::Wheel::Vertical)?
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(Mouse::Middle)?
            .event(Keyboard::All)?
            .create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn click(&mut self, button: &str) -> Result<()> {
        self.dev.send(mouse_button(button)?, 1)?;
        self.sync()?;
        self.dev.send(mouse_button(button)?, 0)?;
        self.sync()
    }

    /// Press in order, release in reverse.
    fn chord(&mut self, names: &[&str]) -> Result<()> {
        let keys = names
            .iter()
            .map(|n| map_key(n))
            .collect::<Result<Vec<_>>>()?;
        for k in &keys {
            self.dev.send(*k, 1)?;
        }
        self.sync()?;
        for k in keys.iter().rev() {
            self.dev.send(*k, 0)?;
        }
        self.sync()
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        assert_eq!(Action::parse("").unwrap(), Action::None);
        assert_eq!(
            Action::parse("mouse:Right").unwrap(),
            Action::Mouse("right".into())
        );
        assert_eq!(
            Action::parse("scroll:vertical@-3").unwrap(),
            Action::Scroll(-3)
        );
        assert_eq!(Action::parse("scroll:+2").unwrap(), Action::Scroll(2));
        assert_eq!(
            Action::parse("key:ctrl+equal").unwrap(),
            Action::Key(vec!["CTRL", "EQUAL"])
        );
        assert_eq!(
            Action::parse("key:SUPER+l").unwrap(),
            Action::Key(vec!["SUPER", "L"])
        );
        assert_eq!(
            Action::parse("cmd: notify-send hi").unwrap(),
            Action::Command("notify-send hi".into())
        );
    }

    #[test]
    fn test_parse_rejects_bad_actions() {
        assert!(Action::parse("mouse:side").is_err());
        assert!(Action::parse("scroll:horizontal@1").is_err());
        assert!(Action::parse("scroll:vertical@lots").is_err());
        assert!(Action::parse("key:CTRL+F13").is_err());
        assert!(Action::parse("cmd:").is_err());
        assert!(Action::parse("beep").is_err());
    }
}
