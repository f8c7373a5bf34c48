//! Boot command language.
//!
//! A boot command is typed into the installer over VNC. Plain characters are
//! typed as-is; `<name>` tokens press special keys, hold or release
//! modifiers, or pause:
//!
//! ```text
//! <esc><wait>boot -s<enter>
//! <leftCtrlOn>c<leftCtrlOff>
//! <wait10>http://{{ .HTTPIP }}:{{ .HTTPPort }}/ks.cfg<enter>
//! ```
//!
//! Unknown `<...>` tokens are typed literally.

use std::time::Duration;

use crate::error::BuildError;

// X11 keysyms used by RFB key events.
pub mod keysym {
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const HOME: u32 = 0xff50;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const END: u32 = 0xff57;
    pub const INSERT: u32 = 0xff63;
    pub const F1: u32 = 0xffbe;
    pub const SHIFT_L: u32 = 0xffe1;
    pub const SHIFT_R: u32 = 0xffe2;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const CONTROL_R: u32 = 0xffe4;
    pub const ALT_L: u32 = 0xffe9;
    pub const ALT_R: u32 = 0xffea;
    pub const DELETE: u32 = 0xffff;
    pub const SPACE: u32 = 0x20;
}

/// One thing to do on the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Press and release.
    Tap(u32),
    /// Press and release while holding left shift.
    ShiftedTap(u32),
    Down(u32),
    Up(u32),
    Wait(Duration),
}

/// Values substituted into `{{ .Name }}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct BootVars {
    pub http_ip: String,
    pub http_port: String,
    pub name: String,
}

/// Replace `{{ .HTTPIP }}`, `{{ .HTTPPort }}` and `{{ .Name }}`.
pub fn interpolate(template: &str, vars: &BootVars) -> Result<String, BuildError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            BuildError::other(format!("unterminated placeholder in boot command: {template}"))
        })?;
        let value = match after[..end].trim() {
            ".HTTPIP" => &vars.http_ip,
            ".HTTPPort" => &vars.http_port,
            ".Name" => &vars.name,
            other => {
                return Err(BuildError::other(format!(
                    "unknown boot command variable '{other}'"
                )));
            }
        };
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Parse an interpolated boot command into key actions.
pub fn parse(command: &str) -> Vec<KeyAction> {
    let mut actions = Vec::new();
    let mut rest = command;

    while let Some(c) = rest.chars().next() {
        if c == '<' {
            if let Some(end) = rest.find('>') {
                if let Some(action) = special(&rest[1..end]) {
                    actions.push(action);
                    rest = &rest[end + 1..];
                    continue;
                }
            }
        }
        actions.push(literal(c));
        rest = &rest[c.len_utf8()..];
    }
    actions
}

fn special(token: &str) -> Option<KeyAction> {
    use keysym::*;

    let key = match token {
        "enter" | "return" => RETURN,
        "esc" => ESCAPE,
        "tab" => TAB,
        "bs" => BACKSPACE,
        "del" => DELETE,
        "spacebar" => SPACE,
        "up" => UP,
        "down" => DOWN,
        "left" => LEFT,
        "right" => RIGHT,
        "home" => HOME,
        "end" => END,
        "pageUp" => PAGE_UP,
        "pageDown" => PAGE_DOWN,
        "insert" => INSERT,
        _ => return modifier(token).or_else(|| function_key(token)).or_else(|| wait(token)),
    };
    Some(KeyAction::Tap(key))
}

fn modifier(token: &str) -> Option<KeyAction> {
    use keysym::*;

    let (name, down) = if let Some(name) = token.strip_suffix("On") {
        (name, true)
    } else if let Some(name) = token.strip_suffix("Off") {
        (name, false)
    } else {
        return None;
    };
    let key = match name {
        "leftCtrl" => CONTROL_L,
        "rightCtrl" => CONTROL_R,
        "leftAlt" => ALT_L,
        "rightAlt" => ALT_R,
        "leftShift" => SHIFT_L,
        "rightShift" => SHIFT_R,
        _ => return None,
    };
    Some(if down { KeyAction::Down(key) } else { KeyAction::Up(key) })
}

fn function_key(token: &str) -> Option<KeyAction> {
    let n: u32 = token.strip_prefix('f')?.parse().ok()?;
    (1..=12)
        .contains(&n)
        .then(|| KeyAction::Tap(keysym::F1 + n - 1))
}

fn wait(token: &str) -> Option<KeyAction> {
    let spec = token.strip_prefix("wait")?;
    if spec.is_empty() {
        return Some(KeyAction::Wait(Duration::from_secs(1)));
    }
    let (digits, unit) = match spec.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => spec.split_at(i),
        None => (spec, "s"),
    };
    let n: u64 = digits.parse().ok()?;
    let d = match unit {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n.saturating_mul(60)),
        "h" => Duration::from_secs(n.saturating_mul(3600)),
        _ => return None,
    };
    Some(KeyAction::Wait(d))
}

const SHIFTED: &str = "~!@#$%^&*()_+{}|:\"<>?";

fn literal(c: char) -> KeyAction {
    match c {
        '\n' => KeyAction::Tap(keysym::RETURN),
        '\t' => KeyAction::Tap(keysym::TAB),
        c if c.is_ascii_uppercase() || SHIFTED.contains(c) => KeyAction::ShiftedTap(c as u32),
        c => KeyAction::Tap(c as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::keysym::*;
    use super::*;

    #[test]
    fn plain_text_and_enter() {
        assert_eq!(
            parse("ls<enter>"),
            vec![
                KeyAction::Tap('l' as u32),
                KeyAction::Tap('s' as u32),
                KeyAction::Tap(RETURN),
            ]
        );
    }

    #[test]
    fn uppercase_and_symbols_hold_shift() {
        assert_eq!(
            parse("A:b"),
            vec![
                KeyAction::ShiftedTap('A' as u32),
                KeyAction::ShiftedTap(':' as u32),
                KeyAction::Tap('b' as u32),
            ]
        );
    }

    #[test]
    fn waits_in_various_units() {
        assert_eq!(parse("<wait>"), vec![KeyAction::Wait(Duration::from_secs(1))]);
        assert_eq!(parse("<wait5>"), vec![KeyAction::Wait(Duration::from_secs(5))]);
        assert_eq!(parse("<wait10>"), vec![KeyAction::Wait(Duration::from_secs(10))]);
        assert_eq!(parse("<wait2m>"), vec![KeyAction::Wait(Duration::from_secs(120))]);
        assert_eq!(
            parse("<wait250ms>"),
            vec![KeyAction::Wait(Duration::from_millis(250))]
        );
    }

    #[test]
    fn huge_waits_saturate() {
        assert_eq!(
            parse("<wait307445734561825861m>"),
            vec![KeyAction::Wait(Duration::from_secs(u64::MAX))]
        );
        assert_eq!(
            parse("<wait5124095576030432h>"),
            vec![KeyAction::Wait(Duration::from_secs(u64::MAX))]
        );
    }

    #[test]
    fn modifiers_and_function_keys() {
        assert_eq!(
            parse("<leftCtrlOn>c<leftCtrlOff><f12>"),
            vec![
                KeyAction::Down(CONTROL_L),
                KeyAction::Tap('c' as u32),
                KeyAction::Up(CONTROL_L),
                KeyAction::Tap(F1 + 11),
            ]
        );
    }

    #[test]
    fn unknown_tokens_are_typed_literally() {
        let actions = parse("<nope>");
        assert_eq!(actions.len(), 6);
        assert_eq!(actions[0], KeyAction::ShiftedTap('<' as u32));
        assert_eq!(actions[5], KeyAction::ShiftedTap('>' as u32));
    }

    #[test]
    fn interpolation_substitutes_known_variables() {
        let vars = BootVars {
            http_ip: "10.0.0.5".to_string(),
            http_port: "8123".to_string(),
            name: "packer-omnios".to_string(),
        };
        let out = interpolate("http://{{ .HTTPIP }}:{{.HTTPPort}}/{{ .Name }}.cfg", &vars).unwrap();
        assert_eq!(out, "http://10.0.0.5:8123/packer-omnios.cfg");
    }

    #[test]
    fn interpolation_rejects_unknown_variables() {
        assert!(interpolate("{{ .Nope }}", &BootVars::default()).is_err());
        assert!(interpolate("{{ .Name ", &BootVars::default()).is_err());
    }
}
