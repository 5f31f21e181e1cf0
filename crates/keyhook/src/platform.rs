//! The native hook surface.
//!
//! Everything the hooks need from the operating system goes through
//! [`HookPlatform`]: installing and removing a low-level keyboard callback,
//! handing an event on to the next interceptor in the chain, and querying
//! instantaneous key state. [`simulated::SimulatedPlatform`] implements it
//! in-process; [`win32::Win32Platform`] implements it on top of
//! `SetWindowsHookExW`.

use std::sync::Arc;

use crate::error::Result;
use crate::key::Keys;

mod chain;
pub mod simulated;
#[cfg(windows)]
pub mod win32;

/// `WM_KEYDOWN`
pub const WM_KEYDOWN: usize = 0x0100;
/// `WM_KEYUP`
pub const WM_KEYUP: usize = 0x0101;
/// `WM_SYSKEYDOWN`, sent for keys pressed while Alt is held
pub const WM_SYSKEYDOWN: usize = 0x0104;
/// `WM_SYSKEYUP`
pub const WM_SYSKEYUP: usize = 0x0105;

/// One keyboard event as delivered to a hook callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Hook processing code. Negative values must be forwarded without inspection.
    pub code: i32,
    /// Message identifier (`WM_KEYDOWN`, `WM_KEYUP`, ...)
    pub message: usize,
    /// Virtual-key code of the key
    pub vk_code: u32,
    /// Platform payload, handed back untouched when the event is forwarded
    pub raw: isize,
}

impl KeyEvent {
    /// A plain key-down event for `key`
    pub fn down(key: Keys) -> Self {
        Self::new(WM_KEYDOWN, key)
    }

    /// A plain key-up event for `key`
    pub fn up(key: Keys) -> Self {
        Self::new(WM_KEYUP, key)
    }

    /// An event with an explicit message identifier
    pub fn new(message: usize, key: Keys) -> Self {
        KeyEvent {
            code: 0,
            message,
            vk_code: key.key_code().bits(),
            raw: 0,
        }
    }

    /// The key this event refers to
    pub fn key(&self) -> Keys {
        Keys::from_key_code(self.vk_code)
    }
}

/// What a hook callback decided to do with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Swallow the event; later hooks and default processing never see it
    Block,
    /// The event was handed on; carries the result of the rest of the chain
    Pass(isize),
}

impl Verdict {
    /// True for [`Verdict::Block`]
    pub fn is_blocked(self) -> bool {
        matches!(self, Verdict::Block)
    }
}

/// Identity of one installed hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookToken(pub usize);

/// Callback invoked for every keyboard event while its hook is installed.
///
/// It runs on the thread that owns the hook chain and must return quickly.
pub type HookCallback = Arc<dyn Fn(&KeyEvent) -> Result<Verdict> + Send + Sync>;

/// The raw platform capability the hooks are built on
pub trait HookPlatform: Send + Sync + 'static {
    /// Install a low-level keyboard callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`](crate::Error::Platform) carrying the OS error code.
    fn install(&self, callback: HookCallback) -> Result<HookToken>;

    /// Remove a previously installed callback. Unknown tokens are ignored.
    fn uninstall(&self, token: HookToken);

    /// Hand an event to the next interceptor in the chain
    fn forward(&self, token: HookToken, event: &KeyEvent) -> Verdict;

    /// Whether `key` is held down right now
    fn is_key_down(&self, key: Keys) -> bool;

    /// The character `key` produces on the active keyboard layout
    fn virtual_key_to_char(&self, key: Keys) -> Option<char>;
}
