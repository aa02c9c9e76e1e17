//! Named preset storage for one effect session.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::EffectError;

/// Where a preset lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PresetSlot {
    /// Saved by the user under a name.
    User(String),
    /// Shipped with the effect. Read-only.
    Factory(String),
    /// Scratch slot the host uses to park the settings in effect.
    CurrentSettings,
    /// The plugin's declared defaults. Read-only.
    FactoryDefaults,
}

impl PresetSlot {
    pub const USER_PRESET_IDENT: &'static str = "User Preset:";
    pub const FACTORY_PRESET_IDENT: &'static str = "Factory Preset:";
    pub const CURRENT_SETTINGS_IDENT: &'static str = "<Current Settings>";
    pub const FACTORY_DEFAULTS_IDENT: &'static str = "<Factory Defaults>";

    pub fn is_read_only(&self) -> bool {
        matches!(self, PresetSlot::Factory(_) | PresetSlot::FactoryDefaults)
    }
}

impl fmt::Display for PresetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetSlot::User(name) => write!(f, "{}{name}", Self::USER_PRESET_IDENT),
            PresetSlot::Factory(name) => write!(f, "{}{name}", Self::FACTORY_PRESET_IDENT),
            PresetSlot::CurrentSettings => f.write_str(Self::CURRENT_SETTINGS_IDENT),
            PresetSlot::FactoryDefaults => f.write_str(Self::FACTORY_DEFAULTS_IDENT),
        }
    }
}

/// Encoded presets keyed by slot. Factory defaults are computed, never
/// stored.
#[derive(Debug, Default)]
pub struct PresetLibrary {
    entries: Mutex<BTreeMap<PresetSlot, String>>,
}

impl PresetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `text` in a writable slot.
    pub fn store(&self, slot: PresetSlot, text: String) -> Result<(), EffectError> {
        if slot.is_read_only() {
            return Err(EffectError::ReadOnlyPreset(slot.to_string()));
        }
        self.entries.lock().insert(slot, text);
        Ok(())
    }

    /// Registers a preset shipped with the effect.
    pub fn add_factory(&self, name: impl Into<String>, text: String) {
        self.entries
            .lock()
            .insert(PresetSlot::Factory(name.into()), text);
    }

    pub fn get(&self, slot: &PresetSlot) -> Result<String, EffectError> {
        self.entries
            .lock()
            .get(slot)
            .cloned()
            .ok_or_else(|| EffectError::UnknownPreset(slot.to_string()))
    }

    pub fn remove(&self, slot: &PresetSlot) -> Result<(), EffectError> {
        if slot.is_read_only() {
            return Err(EffectError::ReadOnlyPreset(slot.to_string()));
        }
        self.entries
            .lock()
            .remove(slot)
            .map(|_| ())
            .ok_or_else(|| EffectError::UnknownPreset(slot.to_string()))
    }

    pub fn user_presets(&self) -> Vec<String> {
        self.names(|slot| match slot {
            PresetSlot::User(name) => Some(name),
            _ => None,
        })
    }

    pub fn factory_presets(&self) -> Vec<String> {
        self.names(|slot| match slot {
            PresetSlot::Factory(name) => Some(name),
            _ => None,
        })
    }

    fn names(&self, pick: impl Fn(&PresetSlot) -> Option<&String>) -> Vec<String> {
        self.entries
            .lock()
            .keys()
            .filter_map(|slot| pick(slot).cloned())
            .collect()
    }
}
