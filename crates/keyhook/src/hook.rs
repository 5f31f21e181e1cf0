//! Per-chord keyboard hooks.
//!
//! A [`HookHandle`] moves through three states:
//!
//! - **Idle**: no chord, nothing installed
//! - **Configured**: holds a valid chord claimed in the context registry
//! - **Engaged**: its callback is installed on the platform hook chain
//!
//! The chord can only change while the hook is not engaged. While engaged,
//! every key event is matched against the chord plus the live modifier
//! state; matching presses are published to the hook's subscribers and
//! blocked unless pass-through is enabled.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, info, trace};

use crate::chord::KeyChord;
use crate::context::HookContext;
use crate::dispatch::{Dispatcher, HookId, PressedCallback, PressedEvent, SubscriptionId};
use crate::error::{Error, Result};
use crate::key::{KeyState, Keys};
use crate::lockdown::LockdownState;
use crate::platform::{HookPlatform, HookToken, KeyEvent, Verdict};

/// Physical keys whose live state contributes each modifier
const LIVE_MODIFIERS: [(Keys, Keys, Keys); 4] = [
    (Keys::CONTROL, Keys::L_CONTROL_KEY, Keys::R_CONTROL_KEY),
    (Keys::SHIFT, Keys::L_SHIFT_KEY, Keys::R_SHIFT_KEY),
    (Keys::ALT, Keys::L_MENU, Keys::R_MENU),
    (Keys::WIN_LOGO, Keys::L_WIN, Keys::R_WIN),
];

/// State shared between a handle and its installed callback
#[derive(Debug)]
struct Flags {
    auto_repeat: AtomicBool,
    allow_pass_through: AtomicBool,
    /// Set by a matching key-up; a press without auto-repeat fires only when set
    released: AtomicBool,
    token: AtomicUsize,
}

/// A global keyboard hook for one key chord.
///
/// Dropping the handle disposes it: the hook is uninstalled, the chord
/// released and the subscriptions removed.
pub struct HookHandle {
    id: HookId,
    context: Arc<HookContext>,
    chord: KeyChord,
    installed: Option<HookToken>,
    disposed: bool,
    flags: Arc<Flags>,
}

impl HookHandle {
    /// Create an idle hook in `context`
    pub fn new(context: &Arc<HookContext>) -> Self {
        let id = context.next_hook_id();
        debug!(?id, "hook created");
        Self {
            id,
            context: context.clone(),
            chord: KeyChord::default(),
            installed: None,
            disposed: false,
            flags: Arc::new(Flags {
                auto_repeat: AtomicBool::new(false),
                allow_pass_through: AtomicBool::new(false),
                released: AtomicBool::new(true),
                token: AtomicUsize::new(0),
            }),
        }
    }

    /// Identity used to route this hook's notifications
    pub fn id(&self) -> HookId {
        self.id
    }

    /// The configured chord, empty while idle
    pub fn combination(&self) -> KeyChord {
        self.chord
    }

    /// Whether the hook is installed on the platform
    pub fn is_engaged(&self) -> bool {
        self.installed.is_some()
    }

    /// Whether [`dispose`](Self::dispose) has run
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether a held chord keeps firing on every auto-repeated key-down
    pub fn auto_repeat(&self) -> bool {
        self.flags.auto_repeat.load(Ordering::Relaxed)
    }

    /// Enable or disable firing on auto-repeated key-downs
    pub fn set_auto_repeat(&self, auto_repeat: bool) {
        self.flags.auto_repeat.store(auto_repeat, Ordering::Relaxed);
    }

    /// Whether matching presses continue down the hook chain
    pub fn allow_pass_through(&self) -> bool {
        self.flags.allow_pass_through.load(Ordering::Relaxed)
    }

    /// Let matching presses through instead of blocking them
    pub fn set_allow_pass_through(&self, allow: bool) {
        self.flags.allow_pass_through.store(allow, Ordering::Relaxed);
    }

    /// Configure the chord this hook reacts to.
    ///
    /// Setting the chord the hook already holds does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] while engaged
    /// - [`Error::Disposed`] after disposal
    /// - [`Error::InvalidCombination`] if the chord cannot be a shortcut
    /// - [`Error::CombinationInUse`] if another hook holds an equal chord
    pub fn set_keys(&mut self, chord: KeyChord) -> Result<()> {
        if chord == self.chord {
            return Ok(());
        }
        if self.is_engaged() {
            return Err(Error::InvalidState("cannot change keys while engaged"));
        }
        if self.disposed {
            return Err(Error::Disposed);
        }
        if !chord.is_valid() {
            return Err(Error::InvalidCombination(chord));
        }
        if !self.context.registry().try_claim(chord) {
            return Err(Error::CombinationInUse(chord));
        }

        if !self.chord.is_empty() {
            self.context.registry().release(&self.chord);
        }
        debug!(id = ?self.id, %chord, "hook configured");
        self.chord = chord;
        Ok(())
    }

    /// Drop the chord and its registry claim.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while engaged.
    pub fn remove_keys(&mut self) -> Result<()> {
        if self.chord.is_empty() {
            return Ok(());
        }
        if self.is_engaged() {
            return Err(Error::InvalidState("cannot remove keys while engaged"));
        }
        self.context.registry().release(&self.chord);
        self.chord = KeyChord::default();
        Ok(())
    }

    /// Install the hook. Does nothing if already engaged.
    ///
    /// Any number of hooks may be engaged at once; each joins the platform's
    /// chain in front of the ones engaged before it.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] after disposal
    /// - [`Error::InvalidState`] if no chord is configured
    /// - [`Error::Platform`] if the platform refuses the hook
    pub fn engage(&mut self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        if self.chord.is_empty() {
            return Err(Error::InvalidState("no key combination configured"));
        }
        if self.is_engaged() {
            return Ok(());
        }

        self.flags.released.store(true, Ordering::Release);
        let callback = {
            let platform = self.context.platform().clone();
            let dispatcher = self.context.dispatcher().clone();
            let lockdown = self.context.lockdown_state().clone();
            let flags = self.flags.clone();
            let hook = self.id;
            let chord = self.chord;
            move |event: &KeyEvent| -> Result<Verdict> {
                on_event(
                    platform.as_ref(),
                    &dispatcher,
                    &lockdown,
                    &flags,
                    hook,
                    chord,
                    event,
                )
            }
        };

        let token = self.context.platform().install(Arc::new(callback))?;
        self.flags.token.store(token.0, Ordering::Release);
        self.installed = Some(token);
        info!(id = ?self.id, chord = %self.chord, "hook engaged");
        Ok(())
    }

    /// Uninstall the hook. Does nothing if not engaged.
    pub fn disengage(&mut self) {
        if let Some(token) = self.installed.take() {
            self.context.platform().uninstall(token);
            info!(id = ?self.id, chord = %self.chord, "hook disengaged");
        }
    }

    /// Disengage, release the chord and drop all subscriptions.
    ///
    /// Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disengage();
        if !self.chord.is_empty() {
            self.context.registry().release(&self.chord);
            self.chord = KeyChord::default();
        }
        self.context.dispatcher().clear_pressed(self.id);
        self.disposed = true;
        debug!(id = ?self.id, "hook disposed");
    }

    /// Subscribe to presses of this hook's chord
    pub fn on_pressed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PressedEvent) + Send + Sync + 'static,
    {
        let callback: PressedCallback = Arc::new(callback);
        self.context.dispatcher().subscribe_pressed(self.id, callback)
    }

    /// Remove a subscription made with [`on_pressed`](Self::on_pressed)
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.context.dispatcher().unsubscribe(id)
    }
}

impl Drop for HookHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Renders the chord with OEM keys translated by the platform
impl fmt::Display for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.context.format_chord(&self.chord))
    }
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookHandle")
            .field("id", &self.id)
            .field("chord", &self.chord)
            .field("engaged", &self.is_engaged())
            .field("disposed", &self.disposed)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Modifiers currently held, read from the platform
fn live_modifiers(platform: &dyn HookPlatform) -> Keys {
    LIVE_MODIFIERS
        .iter()
        .filter(|(_, left, right)| platform.is_key_down(*left) || platform.is_key_down(*right))
        .fold(Keys::NONE, |keys, (modifier, _, _)| keys | *modifier)
}

fn on_event(
    platform: &dyn HookPlatform,
    dispatcher: &Dispatcher,
    lockdown: &LockdownState,
    flags: &Flags,
    hook: HookId,
    chord: KeyChord,
    event: &KeyEvent,
) -> Result<Verdict> {
    if lockdown.is_active() {
        return Ok(Verdict::Block);
    }

    let token = HookToken(flags.token.load(Ordering::Acquire));
    if event.code < 0 {
        return Ok(platform.forward(token, event));
    }

    let state = KeyState::from_message(event.message)?;
    let candidate = KeyChord::new(event.key() | live_modifiers(platform));
    if candidate != chord {
        return Ok(platform.forward(token, event));
    }

    match state {
        KeyState::Up => {
            flags.released.store(true, Ordering::Release);
            Ok(platform.forward(token, event))
        }
        KeyState::Down => {
            let released = flags.released.swap(false, Ordering::AcqRel);
            if released || flags.auto_repeat.load(Ordering::Relaxed) {
                trace!(?hook, %chord, "chord pressed");
                dispatcher.publish_pressed(PressedEvent { hook, chord });
            }

            if flags.allow_pass_through.load(Ordering::Relaxed) {
                Ok(platform.forward(token, event))
            } else {
                Ok(Verdict::Block)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::platform::simulated::SimulatedPlatform;

    const WAIT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(200);

    fn context() -> (Arc<SimulatedPlatform>, Arc<HookContext>) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let platform = Arc::new(SimulatedPlatform::new());
        let context = HookContext::new(platform.clone()).unwrap();
        (platform, context)
    }

    fn chord(s: &str) -> KeyChord {
        s.parse().unwrap()
    }

    /// An engaged hook plus a channel receiving its presses
    fn engaged(context: &Arc<HookContext>, keys: &str) -> (HookHandle, mpsc::Receiver<PressedEvent>) {
        let mut hook = HookHandle::new(context);
        hook.set_keys(chord(keys)).unwrap();
        let (tx, rx) = mpsc::channel();
        hook.on_pressed(move |e| tx.send(*e).unwrap());
        hook.engage().unwrap();
        (hook, rx)
    }

    fn count(rx: &mpsc::Receiver<PressedEvent>, expected: usize) {
        for _ in 0..expected {
            rx.recv_timeout(WAIT).unwrap();
        }
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_state_machine() {
        let (platform, context) = context();
        let mut hook = HookHandle::new(&context);
        assert!(hook.combination().is_empty());
        assert!(matches!(hook.engage(), Err(Error::InvalidState(_))));

        assert!(matches!(
            hook.set_keys(chord("Control + Alt + Delete")),
            Err(Error::InvalidCombination(_))
        ));
        assert!(matches!(hook.set_keys(chord("Shift")), Err(Error::InvalidCombination(_))));

        hook.set_keys(chord("Control + Shift + A")).unwrap();
        assert!(context.is_taken(&chord("ctrl+shift+a")));
        hook.engage().unwrap();
        hook.engage().unwrap();
        assert!(hook.is_engaged());
        assert_eq!(platform.installed(), 1);

        hook.set_keys(chord("shift + ctrl + a")).unwrap();
        assert!(matches!(hook.set_keys(chord("Control + B")), Err(Error::InvalidState(_))));
        assert!(matches!(hook.remove_keys(), Err(Error::InvalidState(_))));

        hook.disengage();
        hook.disengage();
        assert!(!hook.is_engaged());
        assert_eq!(platform.installed(), 0);

        hook.set_keys(chord("Control + B")).unwrap();
        assert!(!context.is_taken(&chord("Control + Shift + A")));
        hook.remove_keys().unwrap();
        hook.remove_keys().unwrap();
        assert!(context.registry().is_empty());
    }

    #[test]
    fn test_combination_in_use() {
        let (_platform, context) = context();
        let mut first = HookHandle::new(&context);
        let mut second = HookHandle::new(&context);
        first.set_keys(chord("Alt + F4")).unwrap();

        let result = second.set_keys(chord("alt+f4"));
        assert!(matches!(result, Err(Error::CombinationInUse(c)) if c == chord("Alt + F4")));
        assert!(second.combination().is_empty());

        drop(first);
        second.set_keys(chord("Alt + F4")).unwrap();
    }

    #[test]
    fn test_repeat_suppression() {
        let (platform, context) = context();
        let (_hook, rx) = engaged(&context, "Control + Q");
        platform.set_key_down(Keys::L_CONTROL_KEY, true);

        assert!(platform.press(Keys::Q).unwrap().is_blocked());
        assert!(platform.press(Keys::Q).unwrap().is_blocked());
        assert_eq!(platform.release(Keys::Q).unwrap(), Verdict::Pass(0));
        assert!(platform.press(Keys::Q).unwrap().is_blocked());
        count(&rx, 2);
    }

    #[test]
    fn test_auto_repeat() {
        let (platform, context) = context();
        let (hook, rx) = engaged(&context, "Control + Q");
        hook.set_auto_repeat(true);
        platform.set_key_down(Keys::R_CONTROL_KEY, true);

        platform.press(Keys::Q).unwrap();
        platform.press(Keys::Q).unwrap();
        platform.release(Keys::Q).unwrap();
        platform.press(Keys::Q).unwrap();
        count(&rx, 3);
    }

    #[test]
    fn test_win_logo_scenario() {
        let (platform, context) = context();
        let (hook, rx) = engaged(&context, "WinLogo + D");
        assert!(!hook.allow_pass_through());
        platform.set_key_down(Keys::L_WIN, true);

        assert_eq!(platform.press(Keys::D).unwrap(), Verdict::Block);
        let event = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(event.hook, hook.id());
        assert_eq!(event.chord, chord("WinLogo + D"));

        assert_eq!(platform.press(Keys::A).unwrap(), Verdict::Pass(0));
        assert_eq!(platform.delivered(), vec![KeyEvent::down(Keys::A)]);
        count(&rx, 0);
    }

    #[test]
    fn test_modifiers_must_match_exactly() {
        let (platform, context) = context();
        let (_hook, rx) = engaged(&context, "Control + Q");
        platform.set_key_down(Keys::L_CONTROL_KEY, true);
        platform.set_key_down(Keys::L_SHIFT_KEY, true);

        assert_eq!(platform.press(Keys::Q).unwrap(), Verdict::Pass(0));
        count(&rx, 0);
    }

    #[test]
    fn test_pass_through() {
        let (platform, context) = context();
        let (hook, rx) = engaged(&context, "F9");
        hook.set_allow_pass_through(true);

        assert_eq!(platform.press(Keys::F9).unwrap(), Verdict::Pass(0));
        assert_eq!(platform.delivered(), vec![KeyEvent::down(Keys::F9)]);
        count(&rx, 1);
    }

    #[test]
    fn test_lockdown_blocks_before_matching() {
        let (platform, context) = context();
        context.lockdown().engage().unwrap();
        // installed after lockdown, so it sees events first
        let (_hook, rx) = engaged(&context, "F9");

        assert_eq!(platform.press(Keys::F9).unwrap(), Verdict::Block);
        assert_eq!(platform.press(Keys::A).unwrap(), Verdict::Block);
        assert_eq!(context.lockdown().keys(), Keys::NONE);
        assert!(platform.delivered().is_empty());
        count(&rx, 0);

        context.lockdown().release();
        assert!(platform.press(Keys::F9).unwrap().is_blocked());
        count(&rx, 1);
    }

    #[test]
    fn test_negative_code_is_forwarded() {
        let (platform, context) = context();
        let (_hook, rx) = engaged(&context, "F9");
        let event = KeyEvent {
            code: -1,
            ..KeyEvent::down(Keys::F9)
        };

        assert_eq!(platform.send(&event).unwrap(), Verdict::Pass(0));
        assert_eq!(platform.delivered(), vec![event]);
        count(&rx, 0);
    }

    #[test]
    fn test_unexpected_message() {
        let (platform, context) = context();
        let (_hook, _rx) = engaged(&context, "F9");
        let result = platform.send(&KeyEvent::new(0x0102, Keys::F9));
        assert!(matches!(result, Err(Error::UnexpectedKeyState(0x0102))));
    }

    #[test]
    fn test_system_messages_match() {
        let (platform, context) = context();
        let (_hook, rx) = engaged(&context, "Alt + F4");
        platform.set_key_down(Keys::L_MENU, true);

        let down = KeyEvent::new(crate::platform::WM_SYSKEYDOWN, Keys::F4);
        assert!(platform.send(&down).unwrap().is_blocked());
        count(&rx, 1);
    }

    #[test]
    fn test_engage_failure() {
        let (platform, context) = context();
        let mut hook = HookHandle::new(&context);
        hook.set_keys(chord("F9")).unwrap();

        platform.fail_next_install(5);
        assert!(matches!(hook.engage(), Err(Error::Platform { code: 5 })));
        assert!(!hook.is_engaged());
        hook.engage().unwrap();
    }

    #[test]
    fn test_many_hooks_engaged() {
        let (platform, context) = context();
        let (tx, rx) = mpsc::channel();
        let hooks: Vec<HookHandle> = (1..=20)
            .map(|n| {
                let mut hook = HookHandle::new(&context);
                hook.set_keys(chord(&format!("F{n}"))).unwrap();
                let tx = tx.clone();
                hook.on_pressed(move |e| tx.send(e.chord).unwrap());
                hook.engage().unwrap();
                hook
            })
            .collect();
        assert_eq!(platform.installed(), 20);
        assert!(hooks.iter().all(HookHandle::is_engaged));

        for n in 1..=20 {
            let key = Keys::from_name(&format!("F{n}")).unwrap();
            assert!(platform.press(key).unwrap().is_blocked());
            platform.release(key).unwrap();
            assert_eq!(rx.recv_timeout(WAIT).unwrap(), KeyChord::new(key));
        }
        assert!(platform.delivered().iter().all(|e| e.message == crate::platform::WM_KEYUP));

        drop(hooks);
        assert_eq!(platform.installed(), 0);
    }

    #[test]
    fn test_dispose() {
        let (platform, context) = context();
        let (mut hook, rx) = engaged(&context, "F9");

        hook.dispose();
        hook.dispose();
        assert!(hook.is_disposed());
        assert!(!hook.is_engaged());
        assert_eq!(platform.installed(), 0);
        assert!(!context.is_taken(&chord("F9")));
        assert!(matches!(hook.engage(), Err(Error::Disposed)));
        assert!(matches!(hook.set_keys(chord("F10")), Err(Error::Disposed)));

        platform.press(Keys::F9).unwrap();
        count(&rx, 0);
    }

    #[test]
    fn test_dispose_keeps_queued_presses() {
        let (platform, context) = context();
        for _ in 0..50 {
            let (mut hook, rx) = engaged(&context, "F9");
            assert!(platform.press(Keys::F9).unwrap().is_blocked());
            hook.dispose();
            assert!(rx.recv_timeout(WAIT).is_ok());
            platform.release(Keys::F9).unwrap();
        }
    }

    #[test]
    fn test_drop_uninstalls() {
        let (platform, context) = context();
        let (hook, _rx) = engaged(&context, "Control + 1");
        assert_eq!(hook.to_string(), "Control + 1");
        drop(hook);
        assert_eq!(platform.installed(), 0);
        assert!(context.registry().is_empty());
    }

    #[test]
    fn test_display_uses_platform_layout() {
        let (platform, context) = context();
        platform.set_char(Keys::OEM_TILDE, 'ü');
        let mut hook = HookHandle::new(&context);
        hook.set_keys(chord("Control + `")).unwrap();

        assert_eq!(hook.to_string(), "Control + ü");
        assert_eq!(hook.combination().to_string(), "Control + `");
    }

    #[test]
    fn test_unsubscribe() {
        let (platform, context) = context();
        let (hook, rx) = engaged(&context, "F9");
        let (tx, other) = mpsc::channel();
        let id = hook.on_pressed(move |e| tx.send(*e).unwrap());
        assert!(hook.unsubscribe(id));

        platform.press(Keys::F9).unwrap();
        count(&rx, 1);
        assert!(other.recv_timeout(QUIET).is_err());
    }
}
