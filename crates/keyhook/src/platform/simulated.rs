//! An in-process hook chain.
//!
//! Behaves like the OS chain: the most recently installed hook sees an event
//! first, a hook either blocks it or forwards it to the next older hook, and
//! an event that falls off the end of the chain reaches "default processing",
//! which is recorded so callers can see what got through.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, trace};

use super::chain::HookChain;
use super::{HookCallback, HookPlatform, HookToken, KeyEvent, Verdict};
use crate::error::{Error, Result};
use crate::key::Keys;

#[derive(Default)]
struct ChainState {
    hooks: HookChain,
    held: HashSet<Keys>,
    /// Layout overrides on top of the US table
    layout: HashMap<Keys, char>,
    fail_next_install: Option<i32>,
    delivered: Vec<KeyEvent>,
}

/// A scriptable [`HookPlatform`] that runs entirely in-process
#[derive(Default)]
pub struct SimulatedPlatform {
    state: Mutex<ChainState>,
}

impl SimulatedPlatform {
    /// A platform with no hooks installed and no keys held
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `install` call fail with the given OS error code
    pub fn fail_next_install(&self, code: i32) {
        self.state().fail_next_install = Some(code);
    }

    /// Make `key` produce `c` on the simulated keyboard layout
    pub fn set_char(&self, key: Keys, c: char) {
        self.state().layout.insert(key.key_code(), c);
    }

    /// Number of currently installed hooks
    pub fn installed(&self) -> usize {
        self.state().hooks.len()
    }

    /// Set the held state of a key without sending an event
    pub fn set_key_down(&self, key: Keys, down: bool) {
        let mut state = self.state();
        if down {
            state.held.insert(key.key_code());
        } else {
            state.held.remove(&key.key_code());
        }
    }

    /// Hold `key` down and send a key-down event through the chain
    pub fn press(&self, key: Keys) -> Result<Verdict> {
        self.set_key_down(key, true);
        self.send(&KeyEvent::down(key))
    }

    /// Release `key` and send a key-up event through the chain
    pub fn release(&self, key: Keys) -> Result<Verdict> {
        self.set_key_down(key, false);
        self.send(&KeyEvent::up(key))
    }

    /// Send an event to the most recently installed hook.
    ///
    /// # Errors
    ///
    /// Returns whatever error the first hook in the chain reports.
    pub fn send(&self, event: &KeyEvent) -> Result<Verdict> {
        let top = self.state().hooks.first();
        match top {
            Some((token, callback)) => {
                trace!(?token, ?event, "simulated event");
                callback(event)
            }
            None => Ok(self.deliver(event)),
        }
    }

    /// Events that reached default processing, oldest first
    pub fn delivered(&self) -> Vec<KeyEvent> {
        self.state().delivered.clone()
    }

    fn deliver(&self, event: &KeyEvent) -> Verdict {
        self.state().delivered.push(*event);
        Verdict::Pass(0)
    }
}

impl HookPlatform for SimulatedPlatform {
    fn install(&self, callback: HookCallback) -> Result<HookToken> {
        let mut state = self.state();
        if let Some(code) = state.fail_next_install.take() {
            return Err(Error::Platform { code });
        }

        Ok(state.hooks.push(callback))
    }

    fn uninstall(&self, token: HookToken) {
        self.state().hooks.remove(token);
    }

    fn forward(&self, token: HookToken, event: &KeyEvent) -> Verdict {
        let next = self.state().hooks.after(token);
        match next {
            Some((next_token, callback)) => match callback(event) {
                Ok(verdict) => verdict,
                Err(e) => {
                    error!(?next_token, "hook callback failed: {}", e);
                    self.forward(next_token, event)
                }
            },
            None => self.deliver(event),
        }
    }

    fn is_key_down(&self, key: Keys) -> bool {
        self.state().held.contains(&key.key_code())
    }

    fn virtual_key_to_char(&self, key: Keys) -> Option<char> {
        let key = key.key_code();
        self.state()
            .layout
            .get(&key)
            .copied()
            .or_else(|| key.us_char())
    }
}
