use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::key::Keys;

/// Modifier bits that take part in matching and formatting.
const KNOWN_MODIFIERS: Keys = Keys::from_bits(
    Keys::WIN_LOGO.bits() | Keys::CONTROL.bits() | Keys::SHIFT.bits() | Keys::ALT.bits(),
);

/// A key combination: zero or more modifiers plus at most one non-modifier key.
///
/// Chords compare by their friendly string rather than by raw bits, so a chord
/// holding the `LControlKey` key code equals a chord holding the `Control`
/// modifier. Comparison works on the canonical parts the string is printed
/// from and never allocates.
///
/// Supports parsing from and formatting to the `"Modifier + Modifier + Key"` form:
/// - `"A"`
/// - `"Control + Shift + A"`
/// - `"ctrl+alt+f4"` (case-insensitive, `ctrl` is an alias for `Control`)
/// - `"WinLogo + 5"` (digit keys drop their `D` prefix)
/// - `"Control + ;"` (OEM keys print as the character they produce)
#[derive(Clone, Copy, Default)]
pub struct KeyChord {
    keys: Keys,
}

impl KeyChord {
    /// Create a chord from an explicit mask
    pub const fn new(keys: Keys) -> Self {
        KeyChord { keys }
    }

    /// Create a chord holding a single platform virtual-key code
    pub const fn from_key_code(code: u32) -> Self {
        KeyChord {
            keys: Keys::from_key_code(code),
        }
    }

    /// The raw mask
    pub fn keys(&self) -> Keys {
        self.keys
    }

    /// The non-modifier key, or [`Keys::NONE`]
    pub fn key_code(&self) -> Keys {
        self.keys.key_code()
    }

    /// The modifier region
    pub fn modifiers(&self) -> Keys {
        self.keys.modifiers()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_none()
    }

    /// Whether the chord can be used as a shortcut.
    ///
    /// A chord needs a key code that is not a lock/navigation key (Enter,
    /// CapsLock, NumLock, Tab) and not a bare modifier key. Control+Alt+Delete
    /// belongs to the operating system and is rejected as well.
    pub fn is_valid(&self) -> bool {
        let code = self.keys.key_code();
        match code {
            Keys::NONE | Keys::ENTER | Keys::CAPS_LOCK | Keys::NUM_LOCK | Keys::TAB => false,
            _ if code.modifier_of().is_some() => false,
            Keys::DELETE => self.keys.modifiers() != (Keys::CONTROL | Keys::ALT),
            _ => true,
        }
    }

    /// Add keys to the chord.
    ///
    /// A key code replaces the existing key code, modifiers accumulate.
    pub fn add(&mut self, keys: Keys) {
        let code = keys.key_code();
        if !code.is_none() {
            self.keys = code | self.keys.modifiers();
        }

        let modifiers = keys.modifiers();
        if !modifiers.is_none() {
            self.keys |= modifiers;
        }
    }

    /// Remove a single key code or modifier identity.
    ///
    /// Removing `LWin` or `RWin` also drops the `WinLogo` modifier.
    pub fn remove(&mut self, key: Keys) {
        if key.is_modifier() {
            if self.keys.contains(key) {
                self.keys ^= key;
            }
        } else if !key.key_code().is_none() && self.keys.key_code() == key.key_code() {
            self.keys ^= key.key_code();
        }

        if (key == Keys::L_WIN || key == Keys::R_WIN) && self.keys.contains(Keys::WIN_LOGO) {
            self.keys ^= Keys::WIN_LOGO;
        }
    }

    /// Check for a key code, or for a modifier being the chord's only modifier
    pub fn contains(&self, key: Keys) -> bool {
        if key.is_modifier() {
            self.keys.modifiers() == key
        } else {
            self.keys.key_code() == key
        }
    }

    /// Format the chord, rendering OEM keys through `translate`.
    ///
    /// `translate` maps a virtual-key code to the character it produces, e.g.
    /// [`HookPlatform::virtual_key_to_char`](crate::HookPlatform::virtual_key_to_char).
    /// OEM keys without a character fall back to their name.
    pub fn format_with<F>(&self, translate: F) -> String
    where
        F: Fn(Keys) -> Option<char>,
    {
        let (modifiers, code) = self.canonical();
        let mut out = String::new();

        for modifier in Keys::MODIFIER_ORDER {
            if modifiers.contains(modifier) {
                out.push_str(modifier.name().unwrap_or_default());
                out.push_str(" + ");
            }
        }

        match key_token(code, &translate) {
            Some(token) => out.push_str(&token),
            None => {
                if out.len() >= 3 {
                    out.truncate(out.len() - 3);
                }
            }
        }
        out
    }

    /// Canonical (modifiers, key) parts that the friendly string is printed from.
    fn canonical(&self) -> (Keys, Keys) {
        let mut modifiers = self.keys & KNOWN_MODIFIERS;
        let mut code = self.keys.key_code();
        if let Some(modifier) = code.modifier_of() {
            modifiers |= modifier;
            code = Keys::NONE;
        }
        (modifiers, code)
    }
}

fn key_token<F>(code: Keys, translate: &F) -> Option<String>
where
    F: Fn(Keys) -> Option<char>,
{
    if code.is_none() {
        return None;
    }
    if code.is_digit() {
        return code.name().map(|name| name[1..].to_string());
    }
    if code.is_oem() {
        if let Some(c) = translate(code) {
            return Some(c.to_string());
        }
    }
    Some(match code.name() {
        Some(name) => name.to_string(),
        None => format!("{:#04x}", code.bits()),
    })
}

fn parse_token(token: &str) -> Result<Keys> {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(digit) = c.to_digit(10) {
            return Ok(Keys::from_key_code(Keys::D0.bits() + digit));
        }
        if let Some(keys) = Keys::from_us_char(c) {
            return Ok(keys);
        }
    }

    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return match u32::from_str_radix(hex, 16) {
            Ok(code) if code <= Keys::KEY_CODE.bits() => Ok(Keys::from_key_code(code)),
            _ => Err(Error::InvalidKey(format!("Invalid key code: {token}"))),
        };
    }

    Keys::from_name(token).ok_or_else(|| Error::InvalidKey(format!("Unknown key: {token}")))
}

impl PartialEq for KeyChord {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for KeyChord {}

impl Hash for KeyChord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl From<Keys> for KeyChord {
    fn from(keys: Keys) -> Self {
        KeyChord::new(keys)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_with(Keys::us_char))
    }
}

impl fmt::Debug for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyChord({self})")
    }
}

impl FromStr for KeyChord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(KeyChord::default());
        }

        let mut keys = Keys::NONE;
        for segment in s.split('+') {
            let token = segment.trim();
            if token.is_empty() {
                return Err(Error::InvalidKey(format!("Empty segment in '{s}'")));
            }

            let parsed = parse_token(token)?;
            let code = parsed.key_code();
            if !code.is_none() && !keys.key_code().is_none() && keys.key_code() != code {
                return Err(Error::InvalidKey(format!(
                    "More than one non-modifier key in '{s}'"
                )));
            }
            keys |= parsed;
        }

        Ok(KeyChord::new(keys))
    }
}

impl Serialize for KeyChord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyChord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
