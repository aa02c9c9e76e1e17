use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use cadenza_audioio::ProjectAudioIo;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::EffectError;
use crate::flusher::ChangeFlusher;
use crate::instance::{LiveInstance, PluginInstance};
use crate::listener::{ChangeBuffer, ParameterListener};
use crate::params::{ParamId, ParameterStore};
use crate::presets::{PresetLibrary, PresetSlot};
use crate::settings::{EffectSettings, JsonSettingsCodec, SettingsAccess, SettingsCodec};
use crate::validator::{ControlPanel, EffectUiClient, EffectUiValidator, ParameterValidator};

/// One hosted effect: its live instance and the state shared with dialogs.
pub struct EffectSession<P: PluginInstance> {
    instance: Arc<Mutex<LiveInstance<P>>>,
    store: Arc<ParameterStore>,
    // Buffer of the most recently opened dialog.
    buffer: ArcSwap<ChangeBuffer>,
    access: Arc<SettingsAccess>,
    codec: Box<dyn SettingsCodec>,
    presets: PresetLibrary,
    batch: AtomicBool,
    config: SyncConfig,
}

impl<P: PluginInstance> EffectSession<P> {
    pub fn new(plugin: P, config: SyncConfig) -> Self {
        let instance = LiveInstance::new(plugin);
        let store = ParameterStore::with_parameters(instance.parameter_infos().to_vec());
        if !instance.resync(&store) {
            warn!("some plugin parameters could not be read, using defaults");
        }
        store.drain_dirty();

        let settings = EffectSettings {
            parameters: store.snapshot(),
            ..EffectSettings::default()
        };
        let buffer = ArcSwap::from_pointee(ChangeBuffer::new(store.ids(), config.overflow_capacity));
        debug!(parameters = store.len(), "effect session created");

        Self {
            instance: Arc::new(Mutex::new(instance)),
            store: Arc::new(store),
            buffer,
            access: Arc::new(SettingsAccess::new(settings)),
            codec: Box::new(JsonSettingsCodec),
            presets: PresetLibrary::new(),
            batch: AtomicBool::new(false),
            config,
        }
    }

    pub fn with_codec(mut self, codec: impl SettingsCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Opens a dialog on `panel`.
    ///
    /// Re-reads the plugin, starts listening for its changes and fills the
    /// panel with the current values. A dialog opened earlier loses the
    /// listener and stops syncing.
    pub fn populate_ui<W: ControlPanel>(
        &self,
        panel: W,
        client: Box<dyn EffectUiClient>,
    ) -> ParameterValidator<P, W> {
        let buffer = Arc::new(ChangeBuffer::new(
            self.store.ids(),
            self.config.overflow_capacity,
        ));
        let listener = Arc::new(ParameterListener::new(Arc::clone(&buffer)));
        {
            let mut live = self.instance.lock();
            live.attach_listener(Arc::clone(&listener));
            if !live.resync(&self.store) {
                warn!("plugin state only partially read while opening dialog");
            }
        }
        self.buffer.store(Arc::clone(&buffer));

        let flusher = ChangeFlusher::new(buffer, Arc::clone(&self.store))
            .with_overflow_logging(self.config.log_overflow);
        let mut validator = ParameterValidator::new(
            client,
            panel,
            &self.instance,
            listener,
            Arc::clone(&self.access),
            flusher,
            &self.config,
        );
        validator.update_ui();
        validator
    }

    /// Stores `settings` into the plugin and commits them.
    ///
    /// On a plugin failure the store is re-read from the plugin and nothing
    /// is committed.
    pub fn apply_settings(&self, settings: EffectSettings) -> bool {
        let mut live = self.instance.lock();
        if !live.store_settings(&settings) {
            warn!("plugin refused preset, re-reading its state");
            live.resync(&self.store);
            return false;
        }
        drop(live);

        self.store.load(&settings.parameters);
        self.access.replace(settings);
        true
    }

    pub fn load_preset_string(&self, text: &str) -> Result<bool, EffectError> {
        let settings = self.codec.load(text)?;
        Ok(self.apply_settings(settings))
    }

    /// Serialises the committed settings with the store's current values.
    pub fn save_preset_string(&self) -> Result<String, EffectError> {
        let mut settings = (*self.access.get()).clone();
        settings.parameters = self.store.snapshot();
        self.codec.save(&settings)
    }

    /// Settings holding every declared parameter at its default.
    pub fn factory_defaults(&self) -> EffectSettings {
        EffectSettings {
            parameters: self
                .store
                .infos()
                .into_iter()
                .map(|info| (info.id, info.default))
                .collect(),
            ..(*self.access.get()).clone()
        }
    }

    /// Saves the current settings into a writable preset slot.
    pub fn save_preset(&self, slot: PresetSlot) -> Result<(), EffectError> {
        let text = self.save_preset_string()?;
        self.presets.store(slot, text)
    }

    /// Applies the preset stored in `slot`. `Ok(false)` means the plugin
    /// refused it.
    pub fn load_preset(&self, slot: &PresetSlot) -> Result<bool, EffectError> {
        if *slot == PresetSlot::FactoryDefaults {
            return Ok(self.apply_settings(self.factory_defaults()));
        }
        let text = self.presets.get(slot)?;
        debug!(%slot, "loading preset");
        self.load_preset_string(&text)
    }

    pub fn add_factory_preset(
        &self,
        name: impl Into<String>,
        settings: &EffectSettings,
    ) -> Result<(), EffectError> {
        let text = self.codec.save(settings)?;
        self.presets.add_factory(name, text);
        Ok(())
    }

    pub fn presets(&self) -> &PresetLibrary {
        &self.presets
    }

    pub fn is_batch_processing(&self) -> bool {
        self.batch.load(Ordering::Acquire)
    }

    /// Parks the current settings so a batch run can change them freely.
    pub fn set_batch_processing(&self) -> Result<(), EffectError> {
        self.save_preset(PresetSlot::CurrentSettings)?;
        self.batch.store(true, Ordering::Release);
        Ok(())
    }

    /// Ends a batch run and restores the parked settings.
    pub fn unset_batch_processing(&self) -> Result<bool, EffectError> {
        self.batch.store(false, Ordering::Release);
        self.load_preset(&PresetSlot::CurrentSettings)
    }

    pub fn can_export_presets(&self) -> bool {
        true
    }

    /// Writes the current settings to `path` as a preset file.
    pub fn export_presets(&self, path: impl AsRef<Path>) -> Result<(), EffectError> {
        let path = path.as_ref();
        let text = self.save_preset_string()?;
        fs::write(path, text).map_err(|err| preset_file_error(path, err))?;
        debug!(path = %path.display(), "presets exported");
        Ok(())
    }

    /// Reads a preset file written by [`EffectSession::export_presets`] and
    /// applies it.
    pub fn import_presets(&self, path: impl AsRef<Path>) -> Result<bool, EffectError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| preset_file_error(path, err))?;
        self.load_preset_string(&text)
    }

    /// Overwrites the store with what the plugin currently reports.
    pub fn resync(&self) -> bool {
        self.instance.lock().resync(&self.store)
    }

    /// Current value of `id`, scaled by the project's play speed for
    /// rate-type parameters.
    pub fn scaled_parameter(
        &self,
        id: ParamId,
        audio: &ProjectAudioIo,
    ) -> Result<f64, EffectError> {
        self.store.scaled_value(id, audio.play_speed())
    }

    pub fn instance(&self) -> &Arc<Mutex<LiveInstance<P>>> {
        &self.instance
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    /// Pending-change buffer of the most recently opened dialog.
    pub fn buffer(&self) -> Arc<ChangeBuffer> {
        self.buffer.load_full()
    }

    pub fn access(&self) -> &Arc<SettingsAccess> {
        &self.access
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

fn preset_file_error(path: &Path, err: std::io::Error) -> EffectError {
    EffectError::PresetFile {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

impl<P: PluginInstance> std::fmt::Debug for EffectSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectSession")
            .field("parameters", &self.store.len())
            .field("buffer", &self.buffer.load_full())
            .field("batch", &self.is_batch_processing())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::{MemoryPanel, NullPlugin, NullUiClient};
    use crate::params::{ParameterInfo, ParameterUnit};
    use pretty_assertions::assert_eq;

    fn plugin() -> NullPlugin {
        NullPlugin::new(vec![
            ParameterInfo::new(1, "Depth", 0.0, 1.0, 0.3),
            ParameterInfo::new(2, "Rate", 0.1, 20.0, 2.0).with_unit(ParameterUnit::Rate),
        ])
    }

    #[test]
    fn new_session_seeds_store_and_settings_from_plugin() {
        let session = EffectSession::new(plugin(), SyncConfig::default());
        assert_eq!(session.store().get(ParamId(1)), Ok(0.3));
        assert_eq!(session.access().get().get(ParamId(2)), Some(2.0));
        assert_eq!(session.store().dirty_count(), 0);
    }

    #[test]
    fn populate_ui_fills_panel_and_listens() {
        let plugin = plugin();
        let session = EffectSession::new(plugin.clone(), SyncConfig::default());
        let validator = session.populate_ui(MemoryPanel::new(), Box::new(NullUiClient::new()));
        assert_eq!(validator.panel().control(ParamId(1)), Some(0.3));
        assert_eq!(validator.panel().control(ParamId(2)), Some(2.0));
        assert_eq!(plugin.listener_count(), 1);

        drop(validator);
        assert_eq!(plugin.listener_count(), 0);
    }

    #[test]
    fn preset_strings_reach_the_plugin() {
        let plugin = plugin();
        let session = EffectSession::new(plugin.clone(), SyncConfig::default());
        session.store().set(ParamId(1), 0.8);
        let text = session.save_preset_string().expect("save");

        let other_plugin = NullPlugin::new(plugin.parameter_infos());
        let other = EffectSession::new(other_plugin.clone(), SyncConfig::default());
        assert_eq!(other.load_preset_string(&text), Ok(true));
        assert_eq!(other_plugin.value(ParamId(1)), Some(0.8));
        assert_eq!(other.access().get().get(ParamId(1)), Some(0.8));
    }

    #[test]
    fn refused_preset_resyncs_without_commit() {
        let plugin = plugin();
        let session = EffectSession::new(plugin.clone(), SyncConfig::default());
        let version = session.access().version();
        plugin.set_busy(ParamId(2), true);

        let mut settings = EffectSettings::default();
        settings.set(ParamId(1), 0.9);
        settings.set(ParamId(2), 5.0);
        assert!(!session.apply_settings(settings));
        assert_eq!(session.access().version(), version);
        assert_eq!(session.store().get(ParamId(1)), Ok(0.9));
        assert_eq!(session.store().get(ParamId(2)), Ok(2.0));
    }

    #[test]
    fn rate_parameters_scale_with_play_speed() {
        let session = EffectSession::new(plugin(), SyncConfig::default());
        let audio = ProjectAudioIo::default();
        audio.set_play_speed(1.5);
        assert_eq!(session.scaled_parameter(ParamId(2), &audio), Ok(3.0));
        assert_eq!(session.scaled_parameter(ParamId(1), &audio), Ok(0.3));
    }

    #[test]
    fn user_presets_round_trip_and_factory_slots_are_read_only() {
        let plugin = plugin();
        let session = EffectSession::new(plugin.clone(), SyncConfig::default());
        session.store().set(ParamId(1), 0.9);
        session
            .save_preset(PresetSlot::User("Wide".into()))
            .expect("save");
        assert_eq!(
            session.save_preset(PresetSlot::FactoryDefaults),
            Err(EffectError::ReadOnlyPreset("<Factory Defaults>".into()))
        );

        assert_eq!(session.load_preset(&PresetSlot::FactoryDefaults), Ok(true));
        assert_eq!(plugin.value(ParamId(1)), Some(0.3));
        assert_eq!(session.load_preset(&PresetSlot::User("Wide".into())), Ok(true));
        assert_eq!(plugin.value(ParamId(1)), Some(0.9));
        assert_eq!(session.access().get().get(ParamId(1)), Some(0.9));
        assert_eq!(
            session.load_preset(&PresetSlot::User("Narrow".into())),
            Err(EffectError::UnknownPreset("User Preset:Narrow".into()))
        );
    }

    #[test]
    fn factory_presets_load_by_name() {
        let plugin = plugin();
        let session = EffectSession::new(plugin.clone(), SyncConfig::default());
        let mut slow = session.factory_defaults();
        slow.set(ParamId(2), 0.5);
        session.add_factory_preset("Slow", &slow).expect("add");

        assert_eq!(session.presets().factory_presets(), vec!["Slow".to_owned()]);
        assert_eq!(session.load_preset(&PresetSlot::Factory("Slow".into())), Ok(true));
        assert_eq!(plugin.value(ParamId(2)), Some(0.5));
    }

    #[test]
    fn batch_processing_restores_parked_settings() {
        let plugin = plugin();
        let session = EffectSession::new(plugin.clone(), SyncConfig::default());
        assert!(!session.is_batch_processing());

        session.set_batch_processing().expect("park");
        assert!(session.is_batch_processing());
        let mut run = EffectSettings::default();
        run.set(ParamId(1), 0.7);
        assert!(session.apply_settings(run));
        assert_eq!(plugin.value(ParamId(1)), Some(0.7));

        assert_eq!(session.unset_batch_processing(), Ok(true));
        assert!(!session.is_batch_processing());
        assert_eq!(plugin.value(ParamId(1)), Some(0.3));
        assert_eq!(session.store().get(ParamId(1)), Ok(0.3));
    }

    #[test]
    fn exported_presets_import_into_another_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chorus.json");
        let session = EffectSession::new(plugin(), SyncConfig::default());
        assert!(session.can_export_presets());
        session.store().set(ParamId(2), 12.0);
        session.export_presets(&path).expect("export");

        let other_plugin = plugin();
        let other = EffectSession::new(other_plugin.clone(), SyncConfig::default());
        assert_eq!(other.import_presets(&path), Ok(true));
        assert_eq!(other_plugin.value(ParamId(2)), Some(12.0));

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            other.import_presets(&missing),
            Err(EffectError::PresetFile { .. })
        ));
    }
}
