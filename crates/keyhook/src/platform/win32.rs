//! Win32 low-level keyboard hooks.
//!
//! `SetWindowsHookExW(WH_KEYBOARD_LL, ..)` takes a bare function pointer with
//! no user data, so the process installs a single native hook and runs its
//! own chain of callbacks behind it: the most recently installed callback
//! sees an event first, [`HookPlatform::forward`] hands it to the next older
//! one, and the oldest forwards to `CallNextHookEx`. There is no limit on
//! the number of callbacks.
//!
//! The native hook is installed by the first `install` and removed with the
//! last `uninstall`. The thread that makes the first `install` must run a
//! message loop, otherwise Windows never calls the hook.

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ::windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
use ::windows::Win32::UI::Input::KeyboardAndMouse::{
    GetAsyncKeyState, MAPVK_VK_TO_CHAR, MapVirtualKeyW,
};
use ::windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, HHOOK, KBDLLHOOKSTRUCT, SetWindowsHookExW, UnhookWindowsHookEx,
    WH_KEYBOARD_LL,
};
use tracing::{debug, error, warn};

use super::chain::HookChain;
use super::{HookCallback, HookPlatform, HookToken, KeyEvent, Verdict};
use crate::error::Result;
use crate::key::Keys;

struct Chain {
    hooks: HookChain,
    /// Raw `HHOOK` of the native hook, zero while none is installed
    native: isize,
}

static CHAIN: RwLock<Chain> = RwLock::new(Chain {
    hooks: HookChain::new(),
    native: 0,
});

fn read() -> RwLockReadGuard<'static, Chain> {
    CHAIN.read().unwrap_or_else(PoisonError::into_inner)
}

fn write() -> RwLockWriteGuard<'static, Chain> {
    CHAIN.write().unwrap_or_else(PoisonError::into_inner)
}

unsafe extern "system" fn hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let vk_code = if code >= 0 && lparam.0 != 0 {
        // SAFETY: for non-negative codes lparam points at the KBDLLHOOKSTRUCT of this event
        unsafe { (*(lparam.0 as *const KBDLLHOOKSTRUCT)).vkCode }
    } else {
        0
    };
    let event = KeyEvent {
        code,
        message: wparam.0,
        vk_code,
        raw: lparam.0,
    };

    let top = read().hooks.first();
    let result = match top {
        Some((token, callback)) => run(token, &callback, &event),
        None => call_next(&event),
    };
    LRESULT(result)
}

/// Run one callback, forwarding the event if it fails or panics
fn run(token: HookToken, callback: &HookCallback, event: &KeyEvent) -> isize {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(Verdict::Block)) => 1,
        Ok(Ok(Verdict::Pass(result))) => result,
        Ok(Err(e)) => {
            error!(?token, "keyboard hook callback failed: {}", e);
            forward_from(token, event)
        }
        Err(_) => {
            error!(?token, "keyboard hook callback panicked");
            forward_from(token, event)
        }
    }
}

/// Hand an event to the callback installed before `token`, or to the OS chain
fn forward_from(token: HookToken, event: &KeyEvent) -> isize {
    let next = read().hooks.after(token);
    match next {
        Some((next_token, callback)) => run(next_token, &callback, event),
        None => call_next(event),
    }
}

fn call_next(event: &KeyEvent) -> isize {
    let native = read().native;
    // SAFETY: the event fields are the untouched values Windows passed to the hook procedure
    unsafe {
        CallNextHookEx(
            HHOOK(native as *mut c_void),
            event.code,
            WPARAM(event.message),
            LPARAM(event.raw),
        )
        .0
    }
}

/// [`HookPlatform`] backed by one process-wide `WH_KEYBOARD_LL` hook
#[derive(Debug, Default)]
pub struct Win32Platform {
    _private: (),
}

impl Win32Platform {
    /// A handle to the process-wide hook chain
    pub fn new() -> Self {
        Self::default()
    }
}

impl HookPlatform for Win32Platform {
    fn install(&self, callback: HookCallback) -> Result<HookToken> {
        let mut chain = write();
        if chain.native == 0 {
            // SAFETY: hook_proc is a valid hook procedure for the lifetime of the process
            let hook = unsafe {
                SetWindowsHookExW(WH_KEYBOARD_LL, Some(hook_proc), HINSTANCE::default(), 0)
            }?;
            chain.native = hook.0 as isize;
            debug!("installed low-level keyboard hook");
        }

        let token = chain.hooks.push(callback);
        debug!(?token, callbacks = chain.hooks.len(), "keyboard callback added");
        Ok(token)
    }

    fn uninstall(&self, token: HookToken) {
        let mut chain = write();
        if !chain.hooks.remove(token) {
            return;
        }
        debug!(?token, callbacks = chain.hooks.len(), "keyboard callback removed");

        if chain.hooks.is_empty() && chain.native != 0 {
            let hook = HHOOK(chain.native as *mut c_void);
            chain.native = 0;
            // SAFETY: hook was returned by SetWindowsHookExW and is removed exactly once
            if let Err(e) = unsafe { UnhookWindowsHookEx(hook) } {
                warn!("UnhookWindowsHookEx failed: {}", e);
            } else {
                debug!("removed low-level keyboard hook");
            }
        }
    }

    fn forward(&self, token: HookToken, event: &KeyEvent) -> Verdict {
        Verdict::Pass(forward_from(token, event))
    }

    fn is_key_down(&self, key: Keys) -> bool {
        // SAFETY: plain state query without pointers
        unsafe { GetAsyncKeyState(key.key_code().bits() as i32) < 0 }
    }

    fn virtual_key_to_char(&self, key: Keys) -> Option<char> {
        // SAFETY: plain table lookup without pointers
        let value = unsafe { MapVirtualKeyW(key.key_code().bits(), MAPVK_VK_TO_CHAR) };
        match value & 0xFFFF {
            0 => None,
            c => char::from_u32(c),
        }
    }
}
