//! Deferred notification delivery.
//!
//! Hook callbacks run on the thread that owns the OS hook chain and must
//! return immediately, so they only push a small `Copy` record onto an
//! unbounded channel. A worker task on the dispatcher's own tokio runtime
//! drains the channel and runs every subscriber as a separate blocking task:
//! a slow or panicking subscriber never holds up the others, and never
//! reaches back into the callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::chord::KeyChord;
use crate::context::ContextConfig;
use crate::error::Result;
use crate::key::{KeyState, Keys};

/// Identity of one hook within its context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HookId(pub(crate) u64);

/// Handle returned by the `on_*` subscription methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A hook's chord was pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PressedEvent {
    /// The hook that matched
    pub hook: HookId,
    /// The chord it is configured with
    pub chord: KeyChord,
}

/// A key transition observed while the keyboard is locked down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockdownKeyEvent {
    /// Keys currently held, left/right modifier keys collapsed to their modifier bit
    pub keys: Keys,
    /// Whether the key went down or up
    pub state: KeyState,
}

/// Subscriber for [`PressedEvent`]s
pub type PressedCallback = Arc<dyn Fn(&PressedEvent) + Send + Sync>;

/// Subscriber for [`LockdownKeyEvent`]s
pub type LockdownCallback = Arc<dyn Fn(&LockdownKeyEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Notification {
    Pressed(PressedEvent),
    Lockdown(LockdownKeyEvent),
    /// Drop a hook's pressed subscribers once everything queued before it is delivered
    ClearPressed(HookId),
}

#[derive(Default)]
struct Subscribers {
    pressed: HashMap<HookId, Vec<(SubscriptionId, PressedCallback)>>,
    lockdown: Vec<(SubscriptionId, LockdownCallback)>,
}

/// Queue plus worker that fans notifications out to subscribers
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Notification>,
    subscribers: Arc<RwLock<Subscribers>>,
    next_id: AtomicU64,
    runtime: Option<Runtime>,
}

impl Dispatcher {
    /// Start the delivery runtime and its worker task.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the runtime threads cannot be created.
    pub fn new(config: &ContextConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .max_blocking_threads(config.max_subscriber_threads.max(1))
            .thread_name(config.thread_name.clone())
            .build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let subscribers = Arc::new(RwLock::new(Subscribers::default()));
        runtime.spawn(drain(rx, subscribers.clone()));
        debug!(thread_name = %config.thread_name, "notification dispatcher started");

        Ok(Self {
            tx,
            subscribers,
            next_id: AtomicU64::new(1),
            runtime: Some(runtime),
        })
    }

    /// Queue a pressed notification. Never blocks.
    pub fn publish_pressed(&self, event: PressedEvent) {
        self.publish(Notification::Pressed(event));
    }

    /// Queue a lockdown key notification. Never blocks.
    pub fn publish_lockdown(&self, event: LockdownKeyEvent) {
        self.publish(Notification::Lockdown(event));
    }

    fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!(?notification, "dispatcher stopped, notification dropped");
        }
    }

    /// Register a callback for presses of one hook
    pub fn subscribe_pressed(&self, hook: HookId, callback: PressedCallback) -> SubscriptionId {
        let id = self.next_subscription();
        self.write()
            .pressed
            .entry(hook)
            .or_default()
            .push((id, callback));
        debug!(?hook, ?id, "pressed subscriber added");
        id
    }

    /// Register a callback for lockdown key events
    pub fn subscribe_lockdown(&self, callback: LockdownCallback) -> SubscriptionId {
        let id = self.next_subscription();
        self.write().lockdown.push((id, callback));
        debug!(?id, "lockdown subscriber added");
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.write();
        let before = subscribers.lockdown.len();
        subscribers.lockdown.retain(|(sub, _)| *sub != id);
        let mut removed = subscribers.lockdown.len() != before;

        for list in subscribers.pressed.values_mut() {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
        }
        subscribers.pressed.retain(|_, list| !list.is_empty());
        removed
    }

    /// Drop every pressed subscriber of a hook.
    ///
    /// The removal is queued behind notifications already published, so those
    /// still reach the subscribers.
    pub fn clear_pressed(&self, hook: HookId) {
        if self.tx.send(Notification::ClearPressed(hook)).is_err() {
            remove_pressed(&self.subscribers, hook);
        }
    }

    fn next_subscription(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Subscribers> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    subscribers: Arc<RwLock<Subscribers>>,
) {
    while let Some(notification) = rx.recv().await {
        trace!(?notification, "delivering notification");
        match notification {
            Notification::Pressed(event) => {
                let targets: Vec<PressedCallback> = {
                    let subscribers = subscribers.read().unwrap_or_else(PoisonError::into_inner);
                    subscribers
                        .pressed
                        .get(&event.hook)
                        .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                        .unwrap_or_default()
                };
                for callback in targets {
                    spawn_isolated(move || callback(&event));
                }
            }
            Notification::Lockdown(event) => {
                let targets: Vec<LockdownCallback> = {
                    let subscribers = subscribers.read().unwrap_or_else(PoisonError::into_inner);
                    subscribers
                        .lockdown
                        .iter()
                        .map(|(_, cb)| cb.clone())
                        .collect()
                };
                for callback in targets {
                    spawn_isolated(move || callback(&event));
                }
            }
            Notification::ClearPressed(hook) => remove_pressed(&subscribers, hook),
        }
    }
}

fn remove_pressed(subscribers: &RwLock<Subscribers>, hook: HookId) {
    let removed = subscribers
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .pressed
        .remove(&hook);
    if removed.is_some() {
        debug!(?hook, "pressed subscribers cleared");
    }
}

fn spawn_isolated<F>(deliver: F)
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::task::spawn_blocking(deliver);
    tokio::spawn(async move {
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!("notification subscriber panicked");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&ContextConfig::default()).unwrap()
    }

    fn pressed(hook: u64) -> PressedEvent {
        PressedEvent {
            hook: HookId(hook),
            chord: KeyChord::new(Keys::CONTROL | Keys::A),
        }
    }

    #[test]
    fn test_pressed_delivery_is_per_hook() {
        let dispatcher = dispatcher();
        let (tx, rx) = std_mpsc::channel();
        let tx2 = tx.clone();
        dispatcher.subscribe_pressed(HookId(1), Arc::new(move |e: &PressedEvent| tx.send((1, *e)).unwrap()));
        dispatcher.subscribe_pressed(HookId(2), Arc::new(move |e: &PressedEvent| tx2.send((2, *e)).unwrap()));

        dispatcher.publish_pressed(pressed(2));
        let (who, event) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(who, 2);
        assert_eq!(event, pressed(2));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_lockdown_delivery() {
        let dispatcher = dispatcher();
        let (tx, rx) = std_mpsc::channel();
        dispatcher.subscribe_lockdown(Arc::new(move |e: &LockdownKeyEvent| tx.send(*e).unwrap()));

        let event = LockdownKeyEvent {
            keys: Keys::SHIFT,
            state: KeyState::Down,
        };
        dispatcher.publish_lockdown(event);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), event);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let dispatcher = dispatcher();
        let (tx, rx) = std_mpsc::channel();
        dispatcher.subscribe_pressed(HookId(1), Arc::new(|_: &PressedEvent| panic!("subscriber failure")));
        dispatcher.subscribe_pressed(HookId(1), Arc::new(move |e: &PressedEvent| tx.send(*e).unwrap()));

        dispatcher.publish_pressed(pressed(1));
        dispatcher.publish_pressed(pressed(1));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), pressed(1));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), pressed(1));
    }

    #[test]
    fn test_slow_subscriber_does_not_delay_others() {
        let dispatcher = dispatcher();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let gate_rx = std::sync::Mutex::new(gate_rx);
        let (tx, rx) = std_mpsc::channel();

        dispatcher.subscribe_pressed(
            HookId(1),
            Arc::new(move |_: &PressedEvent| {
                let _ = gate_rx.lock().unwrap().recv_timeout(WAIT);
            }),
        );
        dispatcher.subscribe_pressed(HookId(1), Arc::new(move |e: &PressedEvent| tx.send(*e).unwrap()));

        dispatcher.publish_pressed(pressed(1));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), pressed(1));
        gate_tx.send(()).unwrap();
    }

    #[test]
    fn test_unsubscribe() {
        let dispatcher = dispatcher();
        let (tx, rx) = std_mpsc::channel();
        let id = dispatcher.subscribe_pressed(HookId(1), Arc::new(move |e: &PressedEvent| tx.send(*e).unwrap()));

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        dispatcher.publish_pressed(pressed(1));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_clear_pressed_keeps_queued_notifications() {
        let dispatcher = dispatcher();
        let (tx, rx) = std_mpsc::channel();
        dispatcher.subscribe_pressed(HookId(4), Arc::new(move |e: &PressedEvent| tx.send(*e).unwrap()));

        dispatcher.publish_pressed(pressed(4));
        dispatcher.clear_pressed(HookId(4));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), pressed(4));

        dispatcher.publish_pressed(pressed(4));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_clear_pressed() {
        let dispatcher = dispatcher();
        let (tx, rx) = std_mpsc::channel();
        dispatcher.subscribe_pressed(HookId(3), Arc::new(move |e: &PressedEvent| tx.send(*e).unwrap()));

        dispatcher.clear_pressed(HookId(3));
        dispatcher.publish_pressed(pressed(3));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
