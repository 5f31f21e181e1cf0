//! Packed key values.
//!
//! A [`Keys`] value is a single `u32` split into two regions: the low 16 bits
//! hold one Win32 virtual-key code, the high 16 bits hold modifier flags. This
//! mirrors the layout used by the platform's own key enumeration, extended with
//! a combined logo modifier that stands for either Windows key.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, BitXor, BitXorAssign};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::{WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN, WM_SYSKEYUP};

/// A packed key-code and modifier value
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keys(u32);

macro_rules! named_keys {
    ($($name:ident = $value:expr => $text:literal;)*) => {
        impl Keys {
            $(
                #[allow(missing_docs)]
                pub const $name: Keys = Keys($value);
            )*
        }

        /// Canonical names in declaration order.
        const NAMES: &[(Keys, &str)] = &[$((Keys::$name, $text),)*];
    };
}

named_keys! {
    NONE = 0x00 => "None";
    L_BUTTON = 0x01 => "LButton";
    R_BUTTON = 0x02 => "RButton";
    CANCEL = 0x03 => "Cancel";
    M_BUTTON = 0x04 => "MButton";
    X_BUTTON1 = 0x05 => "XButton1";
    X_BUTTON2 = 0x06 => "XButton2";
    BACK = 0x08 => "Back";
    TAB = 0x09 => "Tab";
    LINE_FEED = 0x0A => "LineFeed";
    CLEAR = 0x0C => "Clear";
    ENTER = 0x0D => "Enter";
    SHIFT_KEY = 0x10 => "ShiftKey";
    CONTROL_KEY = 0x11 => "ControlKey";
    MENU = 0x12 => "Menu";
    PAUSE = 0x13 => "Pause";
    CAPS_LOCK = 0x14 => "CapsLock";
    KANA_MODE = 0x15 => "KanaMode";
    JUNJA_MODE = 0x17 => "JunjaMode";
    FINAL_MODE = 0x18 => "FinalMode";
    KANJI_MODE = 0x19 => "KanjiMode";
    ESCAPE = 0x1B => "Escape";
    IME_CONVERT = 0x1C => "IMEConvert";
    IME_NONCONVERT = 0x1D => "IMENonconvert";
    IME_ACCEPT = 0x1E => "IMEAccept";
    IME_MODE_CHANGE = 0x1F => "IMEModeChange";
    SPACE = 0x20 => "Space";
    PAGE_UP = 0x21 => "PageUp";
    PAGE_DOWN = 0x22 => "PageDown";
    END = 0x23 => "End";
    HOME = 0x24 => "Home";
    LEFT = 0x25 => "Left";
    UP = 0x26 => "Up";
    RIGHT = 0x27 => "Right";
    DOWN = 0x28 => "Down";
    SELECT = 0x29 => "Select";
    PRINT = 0x2A => "Print";
    EXECUTE = 0x2B => "Execute";
    PRINT_SCREEN = 0x2C => "PrintScreen";
    INSERT = 0x2D => "Insert";
    DELETE = 0x2E => "Delete";
    HELP = 0x2F => "Help";
    D0 = 0x30 => "D0";
    D1 = 0x31 => "D1";
    D2 = 0x32 => "D2";
    D3 = 0x33 => "D3";
    D4 = 0x34 => "D4";
    D5 = 0x35 => "D5";
    D6 = 0x36 => "D6";
    D7 = 0x37 => "D7";
    D8 = 0x38 => "D8";
    D9 = 0x39 => "D9";
    A = 0x41 => "A";
    B = 0x42 => "B";
    C = 0x43 => "C";
    D = 0x44 => "D";
    E = 0x45 => "E";
    F = 0x46 => "F";
    G = 0x47 => "G";
    H = 0x48 => "H";
    I = 0x49 => "I";
    J = 0x4A => "J";
    K = 0x4B => "K";
    L = 0x4C => "L";
    M = 0x4D => "M";
    N = 0x4E => "N";
    O = 0x4F => "O";
    P = 0x50 => "P";
    Q = 0x51 => "Q";
    R = 0x52 => "R";
    S = 0x53 => "S";
    T = 0x54 => "T";
    U = 0x55 => "U";
    V = 0x56 => "V";
    W = 0x57 => "W";
    X = 0x58 => "X";
    Y = 0x59 => "Y";
    Z = 0x5A => "Z";
    L_WIN = 0x5B => "LWin";
    R_WIN = 0x5C => "RWin";
    APPS = 0x5D => "Apps";
    SLEEP = 0x5F => "Sleep";
    NUM_PAD0 = 0x60 => "NumPad0";
    NUM_PAD1 = 0x61 => "NumPad1";
    NUM_PAD2 = 0x62 => "NumPad2";
    NUM_PAD3 = 0x63 => "NumPad3";
    NUM_PAD4 = 0x64 => "NumPad4";
    NUM_PAD5 = 0x65 => "NumPad5";
    NUM_PAD6 = 0x66 => "NumPad6";
    NUM_PAD7 = 0x67 => "NumPad7";
    NUM_PAD8 = 0x68 => "NumPad8";
    NUM_PAD9 = 0x69 => "NumPad9";
    MULTIPLY = 0x6A => "Multiply";
    ADD = 0x6B => "Add";
    SEPARATOR = 0x6C => "Separator";
    SUBTRACT = 0x6D => "Subtract";
    DECIMAL = 0x6E => "Decimal";
    DIVIDE = 0x6F => "Divide";
    F1 = 0x70 => "F1";
    F2 = 0x71 => "F2";
    F3 = 0x72 => "F3";
    F4 = 0x73 => "F4";
    F5 = 0x74 => "F5";
    F6 = 0x75 => "F6";
    F7 = 0x76 => "F7";
    F8 = 0x77 => "F8";
    F9 = 0x78 => "F9";
    F10 = 0x79 => "F10";
    F11 = 0x7A => "F11";
    F12 = 0x7B => "F12";
    F13 = 0x7C => "F13";
    F14 = 0x7D => "F14";
    F15 = 0x7E => "F15";
    F16 = 0x7F => "F16";
    F17 = 0x80 => "F17";
    F18 = 0x81 => "F18";
    F19 = 0x82 => "F19";
    F20 = 0x83 => "F20";
    F21 = 0x84 => "F21";
    F22 = 0x85 => "F22";
    F23 = 0x86 => "F23";
    F24 = 0x87 => "F24";
    NUM_LOCK = 0x90 => "NumLock";
    SCROLL = 0x91 => "Scroll";
    L_SHIFT_KEY = 0xA0 => "LShiftKey";
    R_SHIFT_KEY = 0xA1 => "RShiftKey";
    L_CONTROL_KEY = 0xA2 => "LControlKey";
    R_CONTROL_KEY = 0xA3 => "RControlKey";
    L_MENU = 0xA4 => "LMenu";
    R_MENU = 0xA5 => "RMenu";
    BROWSER_BACK = 0xA6 => "BrowserBack";
    BROWSER_FORWARD = 0xA7 => "BrowserForward";
    BROWSER_REFRESH = 0xA8 => "BrowserRefresh";
    BROWSER_STOP = 0xA9 => "BrowserStop";
    BROWSER_SEARCH = 0xAA => "BrowserSearch";
    BROWSER_FAVORITES = 0xAB => "BrowserFavorites";
    BROWSER_HOME = 0xAC => "BrowserHome";
    VOLUME_MUTE = 0xAD => "VolumeMute";
    VOLUME_DOWN = 0xAE => "VolumeDown";
    VOLUME_UP = 0xAF => "VolumeUp";
    MEDIA_NEXT_TRACK = 0xB0 => "MediaNextTrack";
    MEDIA_PREVIOUS_TRACK = 0xB1 => "MediaPreviousTrack";
    MEDIA_STOP = 0xB2 => "MediaStop";
    MEDIA_PLAY_PAUSE = 0xB3 => "MediaPlayPause";
    LAUNCH_MAIL = 0xB4 => "LaunchMail";
    SELECT_MEDIA = 0xB5 => "SelectMedia";
    LAUNCH_APPLICATION1 = 0xB6 => "LaunchApplication1";
    LAUNCH_APPLICATION2 = 0xB7 => "LaunchApplication2";
    OEM_SEMICOLON = 0xBA => "OemSemicolon";
    OEM_PLUS = 0xBB => "Oemplus";
    OEM_COMMA = 0xBC => "Oemcomma";
    OEM_MINUS = 0xBD => "OemMinus";
    OEM_PERIOD = 0xBE => "OemPeriod";
    OEM_QUESTION = 0xBF => "OemQuestion";
    OEM_TILDE = 0xC0 => "Oemtilde";
    OEM_OPEN_BRACKETS = 0xDB => "OemOpenBrackets";
    OEM_PIPE = 0xDC => "OemPipe";
    OEM_CLOSE_BRACKETS = 0xDD => "OemCloseBrackets";
    OEM_QUOTES = 0xDE => "OemQuotes";
    OEM8 = 0xDF => "Oem8";
    OEM_BACKSLASH = 0xE2 => "OemBackslash";
    PROCESS_KEY = 0xE5 => "ProcessKey";
    PACKET = 0xE7 => "Packet";
    ATTN = 0xF6 => "Attn";
    CRSEL = 0xF7 => "Crsel";
    EXSEL = 0xF8 => "Exsel";
    ERASE_EOF = 0xF9 => "EraseEof";
    PLAY = 0xFA => "Play";
    ZOOM = 0xFB => "Zoom";
    NO_NAME = 0xFC => "NoName";
    PA1 = 0xFD => "Pa1";
    OEM_CLEAR = 0xFE => "OemClear";
    SHIFT = 0x0001_0000 => "Shift";
    CONTROL = 0x0002_0000 => "Control";
    ALT = 0x0004_0000 => "Alt";
    WIN_LOGO = 0x0008_0000 => "WinLogo";
}

/// Alternative spellings accepted when parsing.
const ALIASES: &[(&str, Keys)] = &[
    ("ctrl", Keys::CONTROL),
    ("win", Keys::WIN_LOGO),
    ("logo", Keys::WIN_LOGO),
    ("return", Keys::ENTER),
    ("capital", Keys::CAPS_LOCK),
    ("prior", Keys::PAGE_UP),
    ("next", Keys::PAGE_DOWN),
    ("snapshot", Keys::PRINT_SCREEN),
    ("hanguelmode", Keys::KANA_MODE),
    ("hangulmode", Keys::KANA_MODE),
    ("hanjamode", Keys::KANJI_MODE),
    ("oem1", Keys::OEM_SEMICOLON),
    ("oem2", Keys::OEM_QUESTION),
    ("oem3", Keys::OEM_TILDE),
    ("oem4", Keys::OEM_OPEN_BRACKETS),
    ("oem5", Keys::OEM_PIPE),
    ("oem6", Keys::OEM_CLOSE_BRACKETS),
    ("oem7", Keys::OEM_QUOTES),
    ("oem102", Keys::OEM_BACKSLASH),
];

/// Characters produced by the OEM keys on a US keyboard layout.
const US_OEM_CHARS: &[(Keys, char)] = &[
    (Keys::OEM_SEMICOLON, ';'),
    (Keys::OEM_PLUS, '='),
    (Keys::OEM_COMMA, ','),
    (Keys::OEM_MINUS, '-'),
    (Keys::OEM_PERIOD, '.'),
    (Keys::OEM_QUESTION, '/'),
    (Keys::OEM_TILDE, '`'),
    (Keys::OEM_OPEN_BRACKETS, '['),
    (Keys::OEM_PIPE, '\\'),
    (Keys::OEM_CLOSE_BRACKETS, ']'),
    (Keys::OEM_QUOTES, '\''),
];

impl Keys {
    /// Mask of the key-code region
    pub const KEY_CODE: Keys = Keys(0x0000_FFFF);
    /// Mask of the modifier region
    pub const MODIFIERS: Keys = Keys(0xFFFF_0000);

    /// The four modifier identities in display order.
    pub(crate) const MODIFIER_ORDER: [Keys; 4] =
        [Keys::WIN_LOGO, Keys::CONTROL, Keys::SHIFT, Keys::ALT];

    /// Create a value from its raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Keys(bits)
    }

    /// Create a value from a platform virtual-key code
    pub const fn from_key_code(code: u32) -> Self {
        Keys(code & Keys::KEY_CODE.0)
    }

    /// The raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The key-code region
    pub const fn key_code(self) -> Keys {
        Keys(self.0 & Keys::KEY_CODE.0)
    }

    /// The modifier region
    pub const fn modifiers(self) -> Keys {
        Keys(self.0 & Keys::MODIFIERS.0)
    }

    /// True when no bit is set
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`
    pub const fn contains(self, other: Keys) -> bool {
        self.0 & other.0 == other.0
    }

    /// True for the four modifier identities (Shift, Control, Alt, WinLogo)
    pub fn is_modifier(self) -> bool {
        Keys::MODIFIER_ORDER.contains(&self)
    }

    /// The modifier a physical modifier key stands for, e.g. `LControlKey` gives `Control`
    pub fn modifier_of(self) -> Option<Keys> {
        match self {
            Keys::SHIFT_KEY | Keys::L_SHIFT_KEY | Keys::R_SHIFT_KEY => Some(Keys::SHIFT),
            Keys::CONTROL_KEY | Keys::L_CONTROL_KEY | Keys::R_CONTROL_KEY => Some(Keys::CONTROL),
            Keys::MENU | Keys::L_MENU | Keys::R_MENU => Some(Keys::ALT),
            Keys::L_WIN | Keys::R_WIN => Some(Keys::WIN_LOGO),
            _ => None,
        }
    }

    /// True for digit-row keys `D0`..`D9`
    pub fn is_digit(self) -> bool {
        (Keys::D0.0..=Keys::D9.0).contains(&self.0)
    }

    /// True for keys whose platform name carries the `Oem` prefix
    pub fn is_oem(self) -> bool {
        self.name().is_some_and(|name| name.starts_with("Oem"))
    }

    /// Canonical name of a single key code or modifier identity
    pub fn name(self) -> Option<&'static str> {
        NAMES
            .iter()
            .find(|(keys, _)| *keys == self)
            .map(|(_, name)| *name)
    }

    /// Look up a key by name, case-insensitively, including aliases
    pub fn from_name(name: &str) -> Option<Keys> {
        NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(keys, _)| *keys)
            .or_else(|| {
                ALIASES
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, keys)| *keys)
            })
    }

    /// Character printed by this OEM key on a US layout
    pub fn us_char(self) -> Option<char> {
        US_OEM_CHARS
            .iter()
            .find(|(keys, _)| *keys == self)
            .map(|(_, c)| *c)
    }

    /// The OEM key that prints `c` on a US layout
    pub fn from_us_char(c: char) -> Option<Keys> {
        US_OEM_CHARS
            .iter()
            .find(|(_, ch)| *ch == c)
            .map(|(keys, _)| *keys)
    }
}

impl BitOr for Keys {
    type Output = Keys;

    fn bitor(self, rhs: Keys) -> Keys {
        Keys(self.0 | rhs.0)
    }
}

impl BitOrAssign for Keys {
    fn bitor_assign(&mut self, rhs: Keys) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Keys {
    type Output = Keys;

    fn bitand(self, rhs: Keys) -> Keys {
        Keys(self.0 & rhs.0)
    }
}

impl BitXor for Keys {
    type Output = Keys;

    fn bitxor(self, rhs: Keys) -> Keys {
        Keys(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for Keys {
    fn bitxor_assign(&mut self, rhs: Keys) {
        self.0 ^= rhs.0;
    }
}

impl From<u32> for Keys {
    fn from(bits: u32) -> Self {
        Keys(bits)
    }
}

/// Flag-style rendering: the key-code name followed by each set modifier, e.g. `A, Control`.
impl fmt::Display for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.key_code();
        let mut parts: Vec<String> = Vec::new();
        if !code.is_none() || self.modifiers().is_none() {
            parts.push(match code.name() {
                Some(name) => name.to_string(),
                None => format!("{:#04x}", code.0),
            });
        }
        for modifier in [Keys::SHIFT, Keys::CONTROL, Keys::ALT, Keys::WIN_LOGO] {
            if self.contains(modifier) {
                parts.push(modifier.name().unwrap_or_default().to_string());
            }
        }
        write!(f, "{}", parts.join(", "))
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keys({self})")
    }
}

/// Direction of a key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    /// The key was pressed (or auto-repeated)
    Down,
    /// The key was released
    Up,
}

impl KeyState {
    /// Decode a keyboard message identifier
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedKeyState`] for anything other than the four key messages.
    pub fn from_message(message: usize) -> Result<KeyState> {
        match message {
            WM_KEYDOWN | WM_SYSKEYDOWN => Ok(KeyState::Down),
            WM_KEYUP | WM_SYSKEYUP => Ok(KeyState::Up),
            other => Err(Error::UnexpectedKeyState(other)),
        }
    }
}
