use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::chord::KeyChord;
use crate::dispatch::{Dispatcher, HookId};
use crate::error::Result;
use crate::lockdown::{LockdownController, LockdownState};
use crate::platform::HookPlatform;
use crate::registry::ComboRegistry;

/// Default name of the notification threads
pub const DEFAULT_THREAD_NAME: &str = "keyhook-notify";

/// Configuration for a [`HookContext`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Async worker threads driving the notification queue
    pub worker_threads: usize,
    /// Upper bound on subscribers running at the same time
    pub max_subscriber_threads: usize,
    /// Name given to the notification threads
    pub thread_name: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            max_subscriber_threads: 16,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ContextConfig {
    /// Set the number of async worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set how many subscribers may run at once
    pub fn with_max_subscriber_threads(mut self, threads: usize) -> Self {
        self.max_subscriber_threads = threads;
        self
    }

    /// Set the notification thread name
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Shared state of all hooks built on one platform.
///
/// Owns the claimed-chord registry, the lockdown controller and the
/// notification dispatcher. Every [`HookHandle`](crate::HookHandle) holds an
/// `Arc` to its context; the registry invariant (no two equal chords claimed)
/// holds per context.
pub struct HookContext {
    platform: Arc<dyn HookPlatform>,
    registry: ComboRegistry,
    dispatcher: Arc<Dispatcher>,
    lockdown_state: Arc<LockdownState>,
    lockdown: LockdownController,
    next_hook: AtomicU64,
}

impl HookContext {
    /// Create a context with the default configuration.
    ///
    /// # Errors
    ///
    /// Fails if the notification runtime cannot be started.
    pub fn new(platform: Arc<dyn HookPlatform>) -> Result<Arc<Self>> {
        Self::with_config(platform, ContextConfig::default())
    }

    /// Create a context with an explicit configuration
    pub fn with_config(platform: Arc<dyn HookPlatform>, config: ContextConfig) -> Result<Arc<Self>> {
        let dispatcher = Arc::new(Dispatcher::new(&config)?);
        let lockdown_state = Arc::new(LockdownState::default());
        let lockdown =
            LockdownController::new(platform.clone(), dispatcher.clone(), lockdown_state.clone());
        debug!(?config, "hook context created");

        Ok(Arc::new(Self {
            platform,
            registry: ComboRegistry::new(),
            dispatcher,
            lockdown_state,
            lockdown,
            next_hook: AtomicU64::new(1),
        }))
    }

    /// The platform hooks are installed on
    pub fn platform(&self) -> &Arc<dyn HookPlatform> {
        &self.platform
    }

    /// Chords claimed by the hooks of this context
    pub fn registry(&self) -> &ComboRegistry {
        &self.registry
    }

    /// Queue delivering notifications to subscribers
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The keyboard lockdown of this context
    pub fn lockdown(&self) -> &LockdownController {
        &self.lockdown
    }

    /// Whether keyboard lockdown is active
    pub fn is_locked_down(&self) -> bool {
        self.lockdown_state.is_active()
    }

    /// Whether a hook of this context currently holds `chord`
    pub fn is_taken(&self, chord: &KeyChord) -> bool {
        self.registry.is_taken(chord)
    }

    /// Format `chord` with OEM keys rendered for the platform's keyboard layout
    pub fn format_chord(&self, chord: &KeyChord) -> String {
        chord.format_with(|key| self.platform.virtual_key_to_char(key))
    }

    pub(crate) fn lockdown_state(&self) -> &Arc<LockdownState> {
        &self.lockdown_state
    }

    pub(crate) fn next_hook_id(&self) -> HookId {
        HookId(self.next_hook.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("claimed", &self.registry.len())
            .field("locked_down", &self.is_locked_down())
            .finish_non_exhaustive()
    }
}
