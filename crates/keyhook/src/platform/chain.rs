//! Ordered list of installed callbacks shared by the platform backends.

use super::{HookCallback, HookToken};

/// Installed callbacks, newest first in call order
pub(crate) struct HookChain {
    /// Oldest first
    hooks: Vec<(HookToken, HookCallback)>,
    next_token: usize,
}

impl HookChain {
    pub(crate) const fn new() -> Self {
        Self {
            hooks: Vec::new(),
            next_token: 1,
        }
    }

    /// Add a callback in front of all others
    pub(crate) fn push(&mut self, callback: HookCallback) -> HookToken {
        let token = HookToken(self.next_token);
        self.next_token += 1;
        self.hooks.push((token, callback));
        token
    }

    /// Remove a callback. Returns false for unknown tokens.
    pub(crate) fn remove(&mut self, token: HookToken) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(t, _)| *t != token);
        self.hooks.len() != before
    }

    /// The callback that sees events first
    pub(crate) fn first(&self) -> Option<(HookToken, HookCallback)> {
        self.hooks.last().cloned()
    }

    /// The callback `token` forwards to, `None` at the end of the chain
    pub(crate) fn after(&self, token: HookToken) -> Option<(HookToken, HookCallback)> {
        self.hooks
            .iter()
            .position(|(t, _)| *t == token)
            .and_then(|index| index.checked_sub(1))
            .map(|index| self.hooks[index].clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.hooks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl Default for HookChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::Result;
    use crate::platform::{KeyEvent, Verdict};

    fn callback() -> HookCallback {
        Arc::new(|_: &KeyEvent| -> Result<Verdict> { Ok(Verdict::Block) })
    }

    #[test]
    fn test_order_is_newest_first() {
        let mut chain = HookChain::new();
        let tokens: Vec<HookToken> = (0..20).map(|_| chain.push(callback())).collect();
        assert_eq!(chain.len(), 20);

        let mut seen = Vec::new();
        let mut current = chain.first();
        while let Some((token, _)) = current {
            seen.push(token);
            current = chain.after(token);
        }
        let expected: Vec<HookToken> = tokens.iter().rev().copied().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_remove_relinks() {
        let mut chain = HookChain::new();
        let oldest = chain.push(callback());
        let middle = chain.push(callback());
        let newest = chain.push(callback());

        assert!(chain.remove(middle));
        assert!(!chain.remove(middle));
        assert_eq!(chain.after(newest).map(|(t, _)| t), Some(oldest));
        assert!(chain.after(oldest).is_none());
        assert!(chain.after(middle).is_none());

        chain.remove(oldest);
        chain.remove(newest);
        assert!(chain.is_empty());
        assert!(chain.first().is_none());
    }

    #[test]
    fn test_tokens_are_not_reused() {
        let mut chain = HookChain::new();
        let first = chain.push(callback());
        chain.remove(first);
        assert_ne!(chain.push(callback()), first);
    }
}
