//! Key-combo grammar for `keyboardAction`.
//!
//! ```text
//! sequence := combo ((',' | ';') combo)*
//! combo    := (modifier '+')* key
//! hold     := 'hold' modifier ','? 'and'? 'press' combo
//! ```

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::driver::Modifier;
use crate::error::InteractError;

static HOLD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*hold\s+([a-z]+)\s*[,;]?\s*(?:and\s+|then\s+)?press\s+(.+?)\s*$")
        .expect("static regex")
});

/// One key press, optionally with modifiers held around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    pub key: String,
    pub modifiers: Vec<Modifier>,
    /// Modifiers are held with a pause before and after the key.
    pub hold: bool,
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hold {
            f.write_str("hold ")?;
        }
        for m in &self.modifiers {
            write!(f, "{}+", modifier_name(*m))?;
        }
        f.write_str(if self.key == " " { "Space" } else { self.key.as_str() })
    }
}

fn modifier_name(m: Modifier) -> &'static str {
    match m {
        Modifier::Alt => "alt",
        Modifier::Ctrl => "ctrl",
        Modifier::Meta => "meta",
        Modifier::Shift => "shift",
    }
}

pub fn parse_modifier(raw: &str) -> Option<Modifier> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "ctrl" | "control" | "ctl" => Some(Modifier::Ctrl),
        "alt" | "option" | "opt" => Some(Modifier::Alt),
        "shift" => Some(Modifier::Shift),
        "meta" | "cmd" | "command" | "win" | "super" => Some(Modifier::Meta),
        _ => None,
    }
}

/// Normalise a key name to the DOM `key` value the driver understands.
pub fn normalize_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return Some(ch.to_string());
    }

    let lower = trimmed.to_ascii_lowercase();
    let named = match lower.as_str() {
        "enter" | "return" => "Enter",
        "tab" => "Tab",
        "esc" | "escape" => "Escape",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "space" | "spacebar" => " ",
        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "home" => "Home",
        "end" => "End",
        "pageup" | "pgup" => "PageUp",
        "pagedown" | "pgdn" => "PageDown",
        "insert" => "Insert",
        _ => {
            let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
            return (1..=12).contains(&n).then(|| format!("F{}", n));
        }
    };
    Some(named.to_string())
}

fn parse_combo(raw: &str) -> Result<KeyCombo, InteractError> {
    let raw = raw.trim();
    if raw == "+" {
        return Ok(KeyCombo {
            key: "+".to_string(),
            modifiers: vec![],
            hold: false,
        });
    }

    let parts: Vec<&str> = raw.split('+').map(str::trim).collect();
    let Some((key, mods)) = parts.split_last() else {
        return Err(InteractError::Invalid("empty key combo".to_string()));
    };

    let mut modifiers = Vec::with_capacity(mods.len());
    for m in mods {
        let modifier = parse_modifier(m)
            .ok_or_else(|| InteractError::Invalid(format!("unknown modifier {:?} in {:?}", m, raw)))?;
        if !modifiers.contains(&modifier) {
            modifiers.push(modifier);
        }
    }

    let key = normalize_key(key)
        .ok_or_else(|| InteractError::Invalid(format!("unknown key {:?} in {:?}", key, raw)))?;

    Ok(KeyCombo {
        key,
        modifiers,
        hold: false,
    })
}

/// Parse a `keyboardAction` payload into the presses to perform, in order.
pub fn parse_key_sequence(input: &str) -> Result<Vec<KeyCombo>, InteractError> {
    let input = input.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    if input.is_empty() {
        return Err(InteractError::Invalid("empty key sequence".to_string()));
    }

    if let Some(caps) = HOLD_PATTERN.captures(input) {
        let held = parse_modifier(&caps[1]).ok_or_else(|| {
            InteractError::Invalid(format!("cannot hold {:?}; only modifiers can be held", &caps[1]))
        })?;
        let mut combo = parse_combo(&caps[2])?;
        if !combo.modifiers.contains(&held) {
            combo.modifiers.insert(0, held);
        }
        combo.hold = true;
        return Ok(vec![combo]);
    }

    input
        .split([',', ';'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_combo)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_and_characters() {
        let seq = parse_key_sequence("Enter").unwrap();
        assert_eq!(seq[0].key, "Enter");
        assert!(seq[0].modifiers.is_empty());

        assert_eq!(normalize_key("esc").as_deref(), Some("Escape"));
        assert_eq!(normalize_key("space").as_deref(), Some(" "));
        assert_eq!(normalize_key("F5").as_deref(), Some("F5"));
        assert_eq!(normalize_key("F13"), None);
        assert_eq!(normalize_key("x").as_deref(), Some("x"));
    }

    #[test]
    fn modifier_combos() {
        let seq = parse_key_sequence("ctrl+shift+t").unwrap();
        assert_eq!(
            seq,
            vec![KeyCombo {
                key: "t".to_string(),
                modifiers: vec![Modifier::Ctrl, Modifier::Shift],
                hold: false,
            }]
        );
        assert_eq!(seq[0].to_string(), "ctrl+shift+t");
    }

    #[test]
    fn sequences_split_on_comma_and_semicolon() {
        let seq = parse_key_sequence("Tab, Tab; Enter").unwrap();
        let keys: Vec<&str> = seq.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["Tab", "Tab", "Enter"]);
    }

    #[test]
    fn hold_then_press() {
        let seq = parse_key_sequence("hold shift, press Tab").unwrap();
        assert_eq!(seq.len(), 1);
        assert!(seq[0].hold);
        assert_eq!(seq[0].modifiers, vec![Modifier::Shift]);
        assert_eq!(seq[0].key, "Tab");
    }

    #[test]
    fn unknown_keys_are_invalid() {
        assert!(matches!(
            parse_key_sequence("ctrl+banana"),
            Err(InteractError::Invalid(_))
        ));
        assert!(matches!(
            parse_key_sequence("hyper+a"),
            Err(InteractError::Invalid(_))
        ));
        assert!(matches!(parse_key_sequence("  "), Err(InteractError::Invalid(_))));
    }
}
