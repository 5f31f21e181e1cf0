use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::chord::KeyChord;

/// The set of chords currently claimed by hooks.
///
/// Clones share the same set. Equality follows [`KeyChord`] equality, so two
/// chords that print the same can never be claimed at once.
#[derive(Debug, Clone, Default)]
pub struct ComboRegistry {
    claimed: Arc<Mutex<HashSet<KeyChord>>>,
}

impl ComboRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn claimed(&self) -> MutexGuard<'_, HashSet<KeyChord>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `chord`. Returns false if an equal chord is already claimed.
    pub fn try_claim(&self, chord: KeyChord) -> bool {
        let inserted = self.claimed().insert(chord);
        if inserted {
            debug!(%chord, "combination claimed");
        }
        inserted
    }

    /// Release `chord`. Releasing an unclaimed chord does nothing.
    pub fn release(&self, chord: &KeyChord) {
        if self.claimed().remove(chord) {
            debug!(%chord, "combination released");
        }
    }

    /// Whether an equal chord is claimed
    pub fn contains(&self, chord: &KeyChord) -> bool {
        self.claimed().contains(chord)
    }

    /// Whether `chord` is in use, for checking before calling `set_keys`
    pub fn is_taken(&self, chord: &KeyChord) -> bool {
        self.contains(chord)
    }

    /// Number of claimed chords
    pub fn len(&self) -> usize {
        self.claimed().len()
    }

    /// True when nothing is claimed
    pub fn is_empty(&self) -> bool {
        self.claimed().is_empty()
    }
}
