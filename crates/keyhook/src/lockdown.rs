//! Keyboard lockdown.
//!
//! While engaged, a dedicated hook swallows every key event system-wide and
//! reports each transition with the set of keys currently held. Ordinary
//! hooks check [`LockdownController::is_active`] first and block without
//! matching, so nothing gets through regardless of chain order.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, trace};

use crate::dispatch::{Dispatcher, LockdownCallback, LockdownKeyEvent, SubscriptionId};
use crate::error::Result;
use crate::key::{KeyState, Keys};
use crate::platform::{HookPlatform, HookToken, KeyEvent, Verdict};

/// Flag and key mask read by the lockdown hook and by every ordinary hook
#[derive(Debug, Default)]
pub(crate) struct LockdownState {
    active: AtomicBool,
    keys: AtomicU32,
}

impl LockdownState {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Suppresses all keyboard input of the process context while engaged.
///
/// There is one controller per [`HookContext`](crate::HookContext), reached
/// through [`HookContext::lockdown`](crate::HookContext::lockdown). Dropping it
/// releases the hook.
pub struct LockdownController {
    platform: Arc<dyn HookPlatform>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<LockdownState>,
    installed: Mutex<Option<HookToken>>,
}

impl LockdownController {
    pub(crate) fn new(
        platform: Arc<dyn HookPlatform>,
        dispatcher: Arc<Dispatcher>,
        state: Arc<LockdownState>,
    ) -> Self {
        Self {
            platform,
            dispatcher,
            state,
            installed: Mutex::new(None),
        }
    }

    fn installed(&self) -> MutexGuard<'_, Option<HookToken>> {
        self.installed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the lockdown hook and start blocking all input.
    ///
    /// Does nothing if lockdown is already engaged. The tracked key mask is
    /// kept from any previous lockdown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Platform`](crate::Error::Platform) if the hook cannot be installed.
    pub fn engage(&self) -> Result<()> {
        let mut installed = self.installed();
        if installed.is_some() {
            return Ok(());
        }

        let own = Arc::new(AtomicUsize::new(0));
        let token = self.platform.install(Arc::new({
            let own = own.clone();
            let platform = self.platform.clone();
            let dispatcher = self.dispatcher.clone();
            let state = self.state.clone();
            move |event: &KeyEvent| -> Result<Verdict> {
                let token = HookToken(own.load(Ordering::Acquire));
                on_event(platform.as_ref(), &dispatcher, &state, token, event)
            }
        }))?;
        own.store(token.0, Ordering::Release);

        *installed = Some(token);
        self.state.active.store(true, Ordering::Release);
        info!("keyboard lockdown engaged");
        Ok(())
    }

    /// Stop blocking input and remove the hook. Does nothing if not engaged.
    pub fn release(&self) {
        let mut installed = self.installed();
        self.state.active.store(false, Ordering::Release);
        if let Some(token) = installed.take() {
            self.platform.uninstall(token);
            info!("keyboard lockdown released");
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Keys held according to the transitions seen during lockdown
    pub fn keys(&self) -> Keys {
        Keys::from_bits(self.state.keys.load(Ordering::Acquire))
    }

    /// Subscribe to key transitions observed while locked down
    pub fn on_key_event<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LockdownKeyEvent) + Send + Sync + 'static,
    {
        let callback: LockdownCallback = Arc::new(callback);
        self.dispatcher.subscribe_lockdown(callback)
    }

    /// Remove a subscription made with [`on_key_event`](Self::on_key_event)
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }
}

impl Drop for LockdownController {
    fn drop(&mut self) {
        self.release();
    }
}

fn on_event(
    platform: &dyn HookPlatform,
    dispatcher: &Dispatcher,
    state: &LockdownState,
    token: HookToken,
    event: &KeyEvent,
) -> Result<Verdict> {
    // released between the OS picking this hook and us running
    if !state.is_active() {
        return Ok(platform.forward(token, event));
    }

    let key_state = KeyState::from_message(event.message)?;
    let key = event.key();
    let bit = key.modifier_of().unwrap_or(key).bits();
    let keys = match key_state {
        KeyState::Down => state.keys.fetch_or(bit, Ordering::AcqRel) | bit,
        KeyState::Up => state.keys.fetch_xor(bit, Ordering::AcqRel) ^ bit,
    };

    let keys = Keys::from_bits(keys);
    trace!(%keys, ?key_state, "lockdown key event");
    dispatcher.publish_lockdown(LockdownKeyEvent {
        keys,
        state: key_state,
    });
    Ok(Verdict::Block)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::context::HookContext;
    use crate::error::Error;
    use crate::platform::simulated::SimulatedPlatform;

    const WAIT: Duration = Duration::from_secs(5);

    fn context() -> (Arc<SimulatedPlatform>, Arc<HookContext>) {
        let platform = Arc::new(SimulatedPlatform::new());
        let context = HookContext::new(platform.clone()).unwrap();
        (platform, context)
    }

    #[test]
    fn test_shift_down_up_scenario() {
        let (platform, context) = context();
        let lockdown = context.lockdown();
        let (tx, rx) = mpsc::channel();
        lockdown.on_key_event(move |e| tx.send(*e).unwrap());

        lockdown.engage().unwrap();
        assert!(lockdown.is_active());

        assert_eq!(platform.press(Keys::L_SHIFT_KEY).unwrap(), Verdict::Block);
        assert_eq!(lockdown.keys(), Keys::SHIFT);
        assert_eq!(platform.release(Keys::L_SHIFT_KEY).unwrap(), Verdict::Block);
        assert_eq!(lockdown.keys(), Keys::NONE);

        // subscribers run as independent tasks, so arrival order is not fixed
        let mut events = vec![rx.recv_timeout(WAIT).unwrap(), rx.recv_timeout(WAIT).unwrap()];
        events.sort_by_key(|e| e.state == KeyState::Up);
        assert_eq!(
            events,
            vec![
                LockdownKeyEvent {
                    keys: Keys::SHIFT,
                    state: KeyState::Down
                },
                LockdownKeyEvent {
                    keys: Keys::NONE,
                    state: KeyState::Up
                },
            ]
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(platform.delivered().is_empty());
    }

    #[test]
    fn test_keys_accumulate() {
        let (platform, context) = context();
        let lockdown = context.lockdown();
        lockdown.engage().unwrap();

        platform.press(Keys::R_CONTROL_KEY).unwrap();
        platform.press(Keys::L_MENU).unwrap();
        platform.press(Keys::Q).unwrap();
        assert_eq!(lockdown.keys(), Keys::CONTROL | Keys::ALT | Keys::Q);

        platform.release(Keys::Q).unwrap();
        platform.release(Keys::L_MENU).unwrap();
        assert_eq!(lockdown.keys(), Keys::CONTROL);
    }

    #[test]
    fn test_release_restores_input() {
        let (platform, context) = context();
        let lockdown = context.lockdown();
        lockdown.engage().unwrap();
        assert_eq!(platform.installed(), 1);
        assert!(platform.press(Keys::A).unwrap().is_blocked());

        lockdown.release();
        assert!(!lockdown.is_active());
        assert_eq!(platform.installed(), 0);
        assert_eq!(platform.press(Keys::A).unwrap(), Verdict::Pass(0));
        assert_eq!(platform.delivered(), vec![KeyEvent::down(Keys::A)]);

        lockdown.release();
    }

    #[test]
    fn test_engage_is_idempotent() {
        let (platform, context) = context();
        context.lockdown().engage().unwrap();
        context.lockdown().engage().unwrap();
        assert_eq!(platform.installed(), 1);
    }

    #[test]
    fn test_engage_failure() {
        let (platform, context) = context();
        platform.fail_next_install(1428);
        let result = context.lockdown().engage();
        assert!(matches!(result, Err(Error::Platform { code: 1428 })));
        assert!(!context.lockdown().is_active());
        assert_eq!(platform.installed(), 0);
    }

    #[test]
    fn test_unexpected_message() {
        let (platform, context) = context();
        context.lockdown().engage().unwrap();
        let result = platform.send(&KeyEvent::new(0x0102, Keys::A));
        assert!(matches!(result, Err(Error::UnexpectedKeyState(0x0102))));
    }

    #[test]
    fn test_inactive_flag_forwards() {
        let platform = Arc::new(SimulatedPlatform::new());
        let context = HookContext::new(platform.clone()).unwrap();
        let state = LockdownState::default();
        let verdict = on_event(
            platform.as_ref(),
            context.dispatcher(),
            &state,
            HookToken(42),
            &KeyEvent::down(Keys::A),
        )
        .unwrap();
        assert_eq!(verdict, Verdict::Pass(0));
        assert_eq!(platform.delivered().len(), 1);
    }
}
