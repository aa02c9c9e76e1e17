//! Effect settings shared between the model and its UI.
//!
//! [`SettingsAccess`] gives readers the last committed snapshot and writers
//! an exclusive working copy. A writer's edits become visible only when it
//! calls [`SettingsWriteGuard::commit`]; dropping the guard discards them.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::EffectError;
use crate::params::ParamId;

/// Host-side settings every effect carries besides its plugin parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettingsExtra {
    /// Length in seconds for generators.
    pub duration: f64,
    pub duration_format: String,
    pub active: bool,
}

impl Default for EffectSettingsExtra {
    fn default() -> Self {
        Self {
            duration: 0.0,
            duration_format: "hh:mm:ss + milliseconds".to_owned(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub parameters: BTreeMap<ParamId, f64>,
    pub extra: EffectSettingsExtra,
}

impl EffectSettings {
    pub fn get(&self, id: ParamId) -> Option<f64> {
        self.parameters.get(&id).copied()
    }

    pub fn set(&mut self, id: ParamId, value: f64) {
        self.parameters.insert(id, value);
    }
}

/// Converts settings to and from a portable string.
pub trait SettingsCodec: Send + Sync {
    fn save(&self, settings: &EffectSettings) -> Result<String, EffectError>;
    fn load(&self, text: &str) -> Result<EffectSettings, EffectError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSettingsCodec;

impl SettingsCodec for JsonSettingsCodec {
    fn save(&self, settings: &EffectSettings) -> Result<String, EffectError> {
        serde_json::to_string(settings).map_err(|err| EffectError::Codec(err.to_string()))
    }

    fn load(&self, text: &str) -> Result<EffectSettings, EffectError> {
        serde_json::from_str(text).map_err(|err| EffectError::Codec(err.to_string()))
    }
}

/// Exclusive-write, shared-read container for [`EffectSettings`].
#[derive(Debug)]
pub struct SettingsAccess {
    committed: ArcSwap<EffectSettings>,
    writer: Mutex<()>,
    version: AtomicU64,
}

impl SettingsAccess {
    pub fn new(settings: EffectSettings) -> Self {
        Self {
            committed: ArcSwap::from_pointee(settings),
            writer: Mutex::new(()),
            version: AtomicU64::new(0),
        }
    }

    /// The last committed settings.
    pub fn get(&self) -> Arc<EffectSettings> {
        self.committed.load_full()
    }

    /// Opens a working copy of the committed settings, waiting for any
    /// other writer to finish first.
    pub fn write(&self) -> SettingsWriteGuard<'_> {
        let lock = self.writer.lock();
        self.guard(lock)
    }

    pub fn try_write(&self) -> Option<SettingsWriteGuard<'_>> {
        self.writer.try_lock().map(|lock| self.guard(lock))
    }

    /// Edits and commits in one step.
    pub fn modify<F>(&self, edit: F)
    where
        F: FnOnce(&mut EffectSettings),
    {
        let mut guard = self.write();
        edit(&mut guard);
        guard.commit();
    }

    pub fn replace(&self, settings: EffectSettings) {
        self.modify(|current| *current = settings);
    }

    /// Number of commits so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn save_to_string(&self, codec: &dyn SettingsCodec) -> Result<String, EffectError> {
        codec.save(&self.get())
    }

    /// Parses `text` and commits the result.
    pub fn load_from_string(
        &self,
        codec: &dyn SettingsCodec,
        text: &str,
    ) -> Result<Arc<EffectSettings>, EffectError> {
        let settings = codec.load(text)?;
        self.replace(settings);
        Ok(self.get())
    }

    fn guard<'a>(&'a self, lock: MutexGuard<'a, ()>) -> SettingsWriteGuard<'a> {
        SettingsWriteGuard {
            access: self,
            working: (*self.committed.load_full()).clone(),
            committed: false,
            _lock: lock,
        }
    }
}

impl Default for SettingsAccess {
    fn default() -> Self {
        Self::new(EffectSettings::default())
    }
}

/// Exclusive working copy handed out by [`SettingsAccess::write`].
pub struct SettingsWriteGuard<'a> {
    access: &'a SettingsAccess,
    working: EffectSettings,
    committed: bool,
    _lock: MutexGuard<'a, ()>,
}

impl SettingsWriteGuard<'_> {
    /// Publishes the working copy to readers.
    pub fn commit(mut self) {
        let settings = std::mem::take(&mut self.working);
        self.access.committed.store(Arc::new(settings));
        self.access.version.fetch_add(1, Ordering::AcqRel);
        self.committed = true;
    }
}

impl Deref for SettingsWriteGuard<'_> {
    type Target = EffectSettings;

    fn deref(&self) -> &Self::Target {
        &self.working
    }
}

impl DerefMut for SettingsWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.working
    }
}

impl Drop for SettingsWriteGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            trace!("discarding uncommitted settings edit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn readers_see_only_committed_state() {
        let access = SettingsAccess::default();
        let mut guard = access.write();
        guard.set(ParamId(1), 0.75);
        assert_eq!(access.get().get(ParamId(1)), None);
        guard.commit();
        assert_eq!(access.get().get(ParamId(1)), Some(0.75));
        assert_eq!(access.version(), 1);
    }

    #[test]
    fn dropped_guard_discards_edits() {
        let access = SettingsAccess::default();
        {
            let mut guard = access.write();
            guard.set(ParamId(4), 2.0);
            guard.extra.active = false;
        }
        assert_eq!(*access.get(), EffectSettings::default());
        assert_eq!(access.version(), 0);
    }

    #[test]
    fn writers_are_exclusive() {
        let access = SettingsAccess::default();
        let guard = access.write();
        assert!(access.try_write().is_none());
        drop(guard);
        assert!(access.try_write().is_some());
    }

    #[test]
    fn concurrent_reader_never_sees_half_written_settings() {
        let access = Arc::new(SettingsAccess::default());
        let writer = {
            let access = Arc::clone(&access);
            thread::spawn(move || {
                for round in 0..2_000 {
                    access.modify(|settings| {
                        settings.set(ParamId(1), round as f64);
                        settings.set(ParamId(2), round as f64);
                    });
                }
            })
        };
        for _ in 0..2_000 {
            let snapshot = access.get();
            assert_eq!(snapshot.get(ParamId(1)), snapshot.get(ParamId(2)));
        }
        writer.join().expect("writer");
    }

    #[test]
    fn json_codec_round_trip_preserves_values() {
        let access = SettingsAccess::default();
        access.modify(|settings| {
            settings.set(ParamId(1), 0.5);
            settings.set(ParamId(2), 120.0);
            settings.extra.duration = 30.0;
        });
        let text = access.save_to_string(&JsonSettingsCodec).expect("save");

        let restored = SettingsAccess::default();
        let loaded = restored
            .load_from_string(&JsonSettingsCodec, &text)
            .expect("load");
        assert_eq!(*loaded, *access.get());
    }

    #[test]
    fn malformed_string_is_a_codec_error() {
        let access = SettingsAccess::default();
        let err = access
            .load_from_string(&JsonSettingsCodec, "{not json")
            .unwrap_err();
        assert!(matches!(err, EffectError::Codec(_)));
        assert_eq!(access.version(), 0);
    }
}
