//! In-process stand-ins for a native plugin and its dialog.
//!
//! Used by the simulator and by tests. [`NullPlugin`] behaves like a plugin
//! whose parameters can also be moved by its own automation, which may run
//! on any thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use atomic_float::AtomicF64;

use crate::instance::{ListenerToken, PluginCallError, PluginFailure, PluginInstance};
use crate::listener::ParameterListener;
use crate::params::{ParamId, ParameterInfo};
use crate::settings::EffectSettings;
use crate::validator::{ControlPanel, EffectUiClient};

type Listeners = Vec<(ListenerToken, Arc<ParameterListener>)>;

struct NullShared {
    infos: Vec<ParameterInfo>,
    values: Vec<AtomicF64>,
    busy: Vec<AtomicBool>,
    listeners: ArcSwap<Listeners>,
    next_token: AtomicU64,
}

impl NullShared {
    fn index(&self, id: ParamId) -> Option<usize> {
        self.infos.iter().position(|info| info.id == id)
    }

    fn notify(&self, id: ParamId, value: f64) -> usize {
        let listeners = self.listeners.load();
        for (_, listener) in listeners.iter() {
            listener.on_parameter_changed(id, value);
        }
        listeners.len()
    }
}

/// A plugin with no DSP, only parameters.
///
/// Clones share state, so a test can keep a handle after giving the plugin
/// to a session.
#[derive(Clone)]
pub struct NullPlugin {
    shared: Arc<NullShared>,
}

impl NullPlugin {
    pub fn new(infos: Vec<ParameterInfo>) -> Self {
        let values = infos
            .iter()
            .map(|info| AtomicF64::new(info.default))
            .collect();
        let busy = infos.iter().map(|_| AtomicBool::new(false)).collect();
        Self {
            shared: Arc::new(NullShared {
                infos,
                values,
                busy,
                listeners: ArcSwap::from_pointee(Vec::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// `count` generic parameters in `0.0..=1.0`, ids starting at 0.
    pub fn with_parameters(count: u32) -> Self {
        Self::new(
            (0..count)
                .map(|id| ParameterInfo::new(id, format!("Param {id}"), 0.0, 1.0, 0.5))
                .collect(),
        )
    }

    /// Handle for changing parameters from the plugin's side.
    pub fn automation(&self) -> NullAutomation {
        NullAutomation {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Makes reads and writes of `id` fail until cleared.
    pub fn set_busy(&self, id: ParamId, busy: bool) {
        if let Some(index) = self.shared.index(id) {
            self.shared.busy[index].store(busy, Ordering::Release);
        }
    }

    /// The plugin's value for `id`, bypassing the busy flag.
    pub fn value(&self, id: ParamId) -> Option<f64> {
        self.shared
            .index(id)
            .map(|index| self.shared.values[index].load(Ordering::Acquire))
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.load().len()
    }

    fn checked_index(&self, id: ParamId) -> Result<usize, PluginCallError> {
        let index = self
            .shared
            .index(id)
            .ok_or_else(|| PluginCallError::new(id, PluginFailure::InvalidParameter))?;
        if self.shared.busy[index].load(Ordering::Acquire) {
            return Err(PluginCallError::new(id, PluginFailure::Busy));
        }
        Ok(index)
    }
}

impl PluginInstance for NullPlugin {
    fn parameter_infos(&self) -> Vec<ParameterInfo> {
        self.shared.infos.clone()
    }

    fn get_parameter(&self, id: ParamId) -> Result<f64, PluginCallError> {
        let index = self.checked_index(id)?;
        Ok(self.shared.values[index].load(Ordering::Acquire))
    }

    fn set_parameter(&mut self, id: ParamId, value: f64) -> Result<(), PluginCallError> {
        let index = self.checked_index(id)?;
        self.shared.values[index].store(value, Ordering::Release);
        Ok(())
    }

    fn add_listener(&mut self, listener: Arc<ParameterListener>) -> ListenerToken {
        let token = ListenerToken(self.shared.next_token.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.rcu(|current| {
            let mut next = Listeners::clone(current);
            next.push((token, Arc::clone(&listener)));
            next
        });
        token
    }

    fn remove_listener(&mut self, token: ListenerToken) {
        self.shared.listeners.rcu(|current| {
            current
                .iter()
                .filter(|(existing, _)| *existing != token)
                .cloned()
                .collect::<Listeners>()
        });
    }
}

impl std::fmt::Debug for NullPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullPlugin")
            .field("parameters", &self.shared.infos.len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Moves a [`NullPlugin`]'s parameters the way its own automation would.
#[derive(Clone)]
pub struct NullAutomation {
    shared: Arc<NullShared>,
}

impl NullAutomation {
    /// Changes `id` and notifies every registered listener on the calling
    /// thread. Returns the number of listeners notified.
    pub fn emit(&self, id: ParamId, value: f64) -> usize {
        if let Some(index) = self.shared.index(id) {
            self.shared.values[index].store(value, Ordering::Release);
        }
        self.shared.notify(id, value)
    }

    pub fn parameter_ids(&self) -> Vec<ParamId> {
        self.shared.infos.iter().map(|info| info.id).collect()
    }
}

/// A control panel that keeps its controls in memory.
#[derive(Debug, Default)]
pub struct MemoryPanel {
    controls: BTreeMap<ParamId, f64>,
    errors: Vec<String>,
    apply_enabled: bool,
    preview_enabled: bool,
    writes: usize,
}

impl MemoryPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the user typing into a control without any notification.
    pub fn set_control(&mut self, id: ParamId, value: f64) {
        self.controls.insert(id, value);
    }

    pub fn control(&self, id: ParamId) -> Option<f64> {
        self.controls.get(&id).copied()
    }

    pub fn controls(&self) -> &BTreeMap<ParamId, f64> {
        &self.controls
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn apply_enabled(&self) -> bool {
        self.apply_enabled
    }

    pub fn preview_enabled(&self) -> bool {
        self.preview_enabled
    }

    /// Number of control writes made by the validator.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ControlPanel for MemoryPanel {
    fn read_control(&self, id: ParamId) -> Option<f64> {
        self.control(id)
    }

    fn write_control(&mut self, id: ParamId, value: f64) -> bool {
        self.controls.insert(id, value);
        self.writes += 1;
        true
    }

    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_owned());
    }

    fn enable_apply(&mut self, enable: bool) -> bool {
        self.apply_enabled = enable;
        true
    }

    fn enable_preview(&mut self, enable: bool) -> bool {
        self.preview_enabled = enable;
        true
    }
}

/// Effect client that accepts everything unless told to reject.
#[derive(Debug, Clone, Default)]
pub struct NullUiClient {
    closed: Arc<AtomicBool>,
    reject: Arc<AtomicBool>,
}

impl NullUiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Makes the next validations fail on the effect side.
    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::Release);
    }
}

impl EffectUiClient for NullUiClient {
    fn validate_ui(&mut self, _settings: &mut EffectSettings) -> bool {
        !self.reject.load(Ordering::Acquire)
    }

    fn close_ui(&mut self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}
