//! Global low-level keyboard hooks with modifier-aware key chords.
//!
//! A [`HookContext`] ties together a [`HookPlatform`], the registry of
//! claimed chords, the keyboard lockdown and the notification dispatcher.
//! [`HookHandle`]s are created in a context, configured with a [`KeyChord`]
//! and engaged to start intercepting that chord system-wide. Notifications
//! are delivered to subscribers off the hook thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use keyhook::{HookContext, HookHandle, platform::simulated::SimulatedPlatform};
//!
//! # fn main() -> keyhook::Result<()> {
//! let context = HookContext::new(Arc::new(SimulatedPlatform::new()))?;
//! let mut hook = HookHandle::new(&context);
//! hook.set_keys("WinLogo + D".parse()?)?;
//! hook.on_pressed(|event| println!("{} pressed", event.chord));
//! hook.engage()?;
//! # Ok(())
//! # }
//! ```

pub mod chord;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hook;
pub mod key;
pub mod lockdown;
pub mod platform;
pub mod registry;

pub use chord::KeyChord;
pub use context::{ContextConfig, HookContext};
pub use dispatch::{Dispatcher, HookId, LockdownKeyEvent, PressedEvent, SubscriptionId};
pub use error::{Error, Result};
pub use hook::HookHandle;
pub use key::{KeyState, Keys};
pub use lockdown::LockdownController;
pub use platform::{HookCallback, HookPlatform, HookToken, KeyEvent, Verdict};
pub use registry::ComboRegistry;
