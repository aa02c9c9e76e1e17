use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::EffectError;
use crate::listener::ParameterListener;
use crate::params::{ParamId, ParameterInfo, ParameterStore};
use crate::settings::EffectSettings;

/// Why a native plugin call was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginFailure {
    InvalidParameter,
    Busy,
    Rejected(String),
}

impl fmt::Display for PluginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginFailure::InvalidParameter => f.write_str("invalid parameter id"),
            PluginFailure::Busy => f.write_str("plugin busy"),
            PluginFailure::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("plugin call for parameter {id} failed: {failure}")]
pub struct PluginCallError {
    pub id: ParamId,
    pub failure: PluginFailure,
}

impl PluginCallError {
    pub fn new(id: ParamId, failure: PluginFailure) -> Self {
        Self { id, failure }
    }
}

/// Handle identifying a registered listener inside a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

/// Native plugin seam supplied by the plugin factory.
///
/// `add_listener` hands the plugin a callback object it may invoke from any
/// thread. `remove_listener` must be synchronous: once it returns, the plugin
/// no longer holds the listener for new callbacks.
pub trait PluginInstance: Send {
    fn parameter_infos(&self) -> Vec<ParameterInfo>;
    fn get_parameter(&self, id: ParamId) -> Result<f64, PluginCallError>;
    fn set_parameter(&mut self, id: ParamId, value: f64) -> Result<(), PluginCallError>;
    fn add_listener(&mut self, listener: Arc<ParameterListener>) -> ListenerToken;
    fn remove_listener(&mut self, token: ListenerToken);
}

/// Wraps a native plugin instance for the thread that owns it.
///
/// `LiveInstance` can move between threads but cannot be shared; sessions
/// keep it behind a mutex so exactly one thread drives it at a time.
pub struct LiveInstance<P: PluginInstance> {
    plugin: P,
    infos: Vec<ParameterInfo>,
    listener: Option<(ListenerToken, Arc<ParameterListener>)>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<P: PluginInstance> LiveInstance<P> {
    pub fn new(plugin: P) -> Self {
        let infos = plugin.parameter_infos();
        Self {
            plugin,
            infos,
            listener: None,
            _not_sync: PhantomData,
        }
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut P {
        &mut self.plugin
    }

    pub fn parameter_infos(&self) -> &[ParameterInfo] {
        &self.infos
    }

    /// Reads every declared parameter from the plugin.
    ///
    /// Parameters the plugin fails to report are left out of the snapshot and
    /// the returned flag is `false`.
    pub fn read_all(&self) -> (ParameterStore, bool) {
        let store = ParameterStore::new();
        let mut ok = true;
        for info in &self.infos {
            match self.plugin.get_parameter(info.id) {
                Ok(value) => {
                    store.register(info.clone());
                    store.set(info.id, value);
                }
                Err(err) => {
                    warn!(%err, "failed to read plugin parameter");
                    ok = false;
                }
            }
        }
        store.drain_dirty();
        (store, ok)
    }

    /// Pushes every stored value into the plugin.
    ///
    /// Keeps going after a failure; a `false` result means the plugin may hold
    /// a mix of old and new values and should be re-read with
    /// [`LiveInstance::read_all`].
    pub fn write_all(&mut self, store: &ParameterStore) -> bool {
        let mut ok = true;
        for (id, value) in store.values() {
            if let Err(err) = self.plugin.set_parameter(id, value) {
                warn!(%err, "failed to write plugin parameter");
                ok = false;
            }
        }
        ok
    }

    pub fn set_parameter(&mut self, id: ParamId, value: f64) -> Result<(), EffectError> {
        self.plugin.set_parameter(id, value).map_err(EffectError::from)
    }

    pub fn get_parameter(&self, id: ParamId) -> Result<f64, EffectError> {
        self.plugin.get_parameter(id).map_err(EffectError::from)
    }

    /// Copies the plugin's current values into `settings`.
    pub fn fetch_settings(&self, settings: &mut EffectSettings) -> bool {
        let (snapshot, ok) = self.read_all();
        for (id, value) in snapshot.values() {
            settings.set(id, value);
        }
        ok
    }

    /// Applies the parameter values held by `settings` to the plugin.
    pub fn store_settings(&mut self, settings: &EffectSettings) -> bool {
        let mut ok = true;
        for (&id, &value) in &settings.parameters {
            if let Err(err) = self.plugin.set_parameter(id, value) {
                warn!(%err, "failed to store setting into plugin");
                ok = false;
            }
        }
        ok
    }

    /// Re-reads the plugin and overwrites the matching values in `store`.
    pub fn resync(&self, store: &ParameterStore) -> bool {
        let (snapshot, ok) = self.read_all();
        store.load(&snapshot.snapshot());
        ok
    }

    /// Registers `listener` with the plugin, replacing any previous one.
    pub fn attach_listener(&mut self, listener: Arc<ParameterListener>) {
        self.detach_listener();
        let token = self.plugin.add_listener(Arc::clone(&listener));
        debug!(token = token.0, "parameter listener attached");
        self.listener = Some((token, listener));
    }

    /// Unregisters the listener. Returns `false` if none was attached.
    pub fn detach_listener(&mut self) -> bool {
        let Some((token, listener)) = self.listener.take() else {
            return false;
        };
        self.plugin.remove_listener(token);
        listener.deactivate();
        debug!(token = token.0, "parameter listener detached");
        true
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Whether `listener` is the one currently registered with the plugin.
    pub fn is_listening_with(&self, listener: &Arc<ParameterListener>) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|(_, current)| Arc::ptr_eq(current, listener))
    }
}

impl<P: PluginInstance> Drop for LiveInstance<P> {
    fn drop(&mut self) {
        self.detach_listener();
    }
}

impl<P: PluginInstance> fmt::Debug for LiveInstance<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveInstance")
            .field("parameters", &self.infos.len())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}
