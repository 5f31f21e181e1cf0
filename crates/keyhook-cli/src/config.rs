use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use keyhook::{ComboRegistry, HookContext, HookHandle, KeyChord};
use serde::{Deserialize, Serialize};

/// One hook declared in the binding file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Label used in log output
    pub name: String,
    pub keys: KeyChord,
    #[serde(default)]
    pub auto_repeat: bool,
    #[serde(default)]
    pub allow_pass_through: bool,
}

/// The RON binding file read by the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingFile {
    pub hooks: Vec<Binding>,
}

impl BindingFile {
    /// Read and validate a binding file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read binding file {}", path.display()))?;
        Self::from_ron(&text).with_context(|| format!("Invalid binding file {}", path.display()))
    }

    /// Parse and validate bindings from RON text
    pub fn from_ron(text: &str) -> Result<Self> {
        let file: BindingFile = ron::from_str(text).context("Failed to parse bindings")?;
        file.validate()?;
        Ok(file)
    }

    /// Reject chords that cannot be shortcuts and chords bound twice
    pub fn validate(&self) -> Result<()> {
        let claimed = ComboRegistry::new();
        for binding in &self.hooks {
            if !binding.keys.is_valid() {
                bail!("{}: '{}' is not a valid combination", binding.name, binding.keys);
            }
            if !claimed.try_claim(binding.keys) {
                bail!("{}: '{}' is bound more than once", binding.name, binding.keys);
            }
        }
        Ok(())
    }

    /// Create a configured, not yet engaged, hook per binding
    pub fn create_hooks(&self, context: &Arc<HookContext>) -> keyhook::Result<Vec<HookHandle>> {
        self.hooks
            .iter()
            .map(|binding| {
                let mut hook = HookHandle::new(context);
                hook.set_auto_repeat(binding.auto_repeat);
                hook.set_allow_pass_through(binding.allow_pass_through);
                hook.set_keys(binding.keys)?;
                Ok(hook)
            })
            .collect()
    }
}
