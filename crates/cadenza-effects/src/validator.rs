//! Mediation between an effect's control panel and its settings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cadenza_utils::{Publisher, Subscription};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::EffectError;
use crate::flusher::ChangeFlusher;
use crate::instance::{LiveInstance, PluginInstance};
use crate::listener::{ParameterListener, PendingChange};
use crate::params::{ParamId, ParameterStore};
use crate::settings::{EffectSettings, SettingsAccess};

/// Sent when the user changes a control directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectSettingChanged {
    /// Raw id of the parameter behind the control.
    pub index: usize,
    pub new_value: f64,
}

/// Read/write surface of the panel holding an effect's controls.
pub trait ControlPanel {
    fn read_control(&self, id: ParamId) -> Option<f64>;
    fn write_control(&mut self, id: ParamId, value: f64) -> bool;

    fn show_error(&mut self, _message: &str) {}

    /// Returns `true` if the panel has an Apply button to toggle.
    fn enable_apply(&mut self, _enable: bool) -> bool {
        false
    }

    /// Returns `true` if the panel has a preview button to toggle.
    fn enable_preview(&mut self, _enable: bool) -> bool {
        false
    }
}

/// The effect side of a dialog: extra validation and UI teardown.
pub trait EffectUiClient {
    fn is_graphical_ui(&self) -> bool {
        false
    }

    /// Last chance for the effect to reject or adjust settings.
    fn validate_ui(&mut self, _settings: &mut EffectSettings) -> bool {
        true
    }

    fn close_ui(&mut self) -> bool;
}

/// Transfers values between a panel of effect controls and the settings.
pub trait EffectUiValidator {
    /// Gets settings data from the panel; may report errors and return false.
    fn validate_ui(&mut self) -> bool;

    /// Updates the panel for changed settings.
    fn update_ui(&mut self) -> bool {
        true
    }

    fn is_graphical_ui(&self) -> bool {
        false
    }

    /// On the first call only, stops further event handling.
    fn disconnect(&mut self) {}

    fn ui_client(&mut self) -> &mut dyn EffectUiClient;

    fn on_close(&mut self) {
        self.ui_client().close_ui();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorState {
    Open,
    Closed,
}

/// Validator for panels made of one control per plugin parameter.
///
/// Holds only a weak reference to the live instance: once the session drops
/// the instance, instance-bound calls become no-ops. Opening another dialog on
/// the same session retires this one the same way.
pub struct ParameterValidator<P: PluginInstance, W: ControlPanel> {
    client: Box<dyn EffectUiClient>,
    panel: W,
    instance: Weak<Mutex<LiveInstance<P>>>,
    listener: Arc<ParameterListener>,
    access: Arc<SettingsAccess>,
    store: Arc<ParameterStore>,
    flusher: ChangeFlusher,
    refresh_pending: Arc<AtomicBool>,
    publisher: Publisher<EffectSettingChanged>,
    state: ValidatorState,
    connected: bool,
    superseded: bool,
    clamp_on_validate: bool,
}

impl<P: PluginInstance, W: ControlPanel> ParameterValidator<P, W> {
    /// Id of the dialog's preview play button.
    pub const PLAY_ID: i32 = 20102;

    pub fn new(
        client: Box<dyn EffectUiClient>,
        panel: W,
        instance: &Arc<Mutex<LiveInstance<P>>>,
        listener: Arc<ParameterListener>,
        access: Arc<SettingsAccess>,
        mut flusher: ChangeFlusher,
        config: &SyncConfig,
    ) -> Self {
        let refresh_pending = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&refresh_pending);
        flusher.attach(move |_changes: &[PendingChange]| {
            flag.store(true, Ordering::Release);
        });
        let store = Arc::clone(flusher.store());
        debug!("effect validator opened");
        Self {
            client,
            panel,
            instance: Arc::downgrade(instance),
            listener,
            access,
            store,
            flusher,
            refresh_pending,
            publisher: Publisher::new(),
            state: ValidatorState::Open,
            connected: true,
            superseded: false,
            clamp_on_validate: config.clamp_on_validate,
        }
    }

    pub fn state(&self) -> ValidatorState {
        self.state
    }

    /// `false` after [`EffectUiValidator::disconnect`], or once a newer
    /// dialog has taken over the plugin's listener.
    pub fn is_connected(&self) -> bool {
        self.connected && self.listener.is_active()
    }

    pub fn panel(&self) -> &W {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut W {
        &mut self.panel
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EffectSettingChanged) + Send + Sync + 'static,
    {
        self.publisher.subscribe(callback)
    }

    pub fn publisher(&self) -> &Publisher<EffectSettingChanged> {
        &self.publisher
    }

    /// Handles a user edit of the control for `id`.
    ///
    /// The value goes to the store and the plugin immediately and is also
    /// queued behind any plugin-originated change already waiting, so the
    /// edit is not overwritten by an older change at the next flush.
    pub fn on_control_changed(&mut self, id: ParamId, value: f64) -> Result<(), EffectError> {
        if !self.is_live() {
            debug!(%id, "control change after disconnect ignored");
            return Err(EffectError::UseAfterDisconnect);
        }

        let Some(instance) = self.instance.upgrade() else {
            debug!(%id, "control change after the effect instance was released");
            return Err(EffectError::UseAfterDisconnect);
        };

        self.store.set(id, value);
        self.flusher.buffer().push(id, value);
        let forwarded = instance.lock().set_parameter(id, value);
        if let Err(err) = &forwarded {
            warn!(%err, "failed to forward control change to plugin");
        }

        self.publisher.publish(&EffectSettingChanged {
            index: id.0 as usize,
            new_value: value,
        });
        forwarded
    }

    /// Idle-time hook: flushes plugin changes and refreshes the panel.
    pub fn on_idle(&mut self) -> usize {
        if self.state == ValidatorState::Closed || self.retire_if_superseded() {
            return 0;
        }
        let applied = self.flusher.flush();
        if self.refresh_pending.swap(false, Ordering::AcqRel) && self.is_connected() {
            self.update_ui();
        }
        applied
    }

    /// Loads the committed settings into the store and shows them.
    pub fn refresh_from_settings(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        let settings = self.access.get();
        self.store.load(&settings.parameters);
        self.update_ui()
    }

    pub fn enable_apply(&mut self, enable: bool) -> bool {
        self.is_live() && self.panel.enable_apply(enable)
    }

    pub fn enable_preview(&mut self, enable: bool) -> bool {
        self.is_live() && self.panel.enable_preview(enable)
    }

    fn is_live(&self) -> bool {
        self.state == ValidatorState::Open && self.is_connected()
    }

    /// Disconnects if the listener was deactivated behind our back.
    ///
    /// Whatever is left in our buffer predates the re-read done for the
    /// newer dialog, so it is never flushed.
    fn retire_if_superseded(&mut self) -> bool {
        if self.connected && !self.listener.is_active() {
            debug!("effect validator superseded by a newer dialog");
            self.superseded = true;
            EffectUiValidator::disconnect(self);
        }
        self.superseded
    }
}

impl<P: PluginInstance, W: ControlPanel> EffectUiValidator for ParameterValidator<P, W> {
    fn validate_ui(&mut self) -> bool {
        if !self.is_live() {
            debug!("validate_ui after disconnect ignored");
            return false;
        }
        let Some(instance) = self.instance.upgrade() else {
            warn!("validate_ui after the effect instance was released");
            return false;
        };

        let mut working = self.access.write();
        for id in self.store.ids() {
            let Some(raw) = self.panel.read_control(id) else {
                continue;
            };
            let value = match self.store.info(id) {
                None => raw,
                Some(info) => match info.check(raw) {
                    Ok(()) => raw,
                    Err(_) if self.clamp_on_validate => info.clamp(raw),
                    Err(err) => {
                        self.panel.show_error(&format!("{}: {err}", info.name));
                        warn!(%err, "panel value rejected");
                        return false;
                    }
                },
            };
            working.set(id, value);
        }

        if !self.client.validate_ui(&mut working) {
            debug!("effect rejected panel settings");
            return false;
        }

        let mut live = instance.lock();
        if !live.store_settings(&working) {
            warn!("plugin refused settings, re-reading its state");
            live.resync(&self.store);
            return false;
        }
        drop(live);

        self.store.load(&working.parameters);
        working.commit();
        true
    }

    fn update_ui(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        let mut ok = true;
        for (id, value) in self.store.values() {
            ok &= self.panel.write_control(id, value);
        }
        self.store.drain_dirty();
        ok
    }

    fn is_graphical_ui(&self) -> bool {
        self.client.is_graphical_ui()
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.flusher.detach();
        self.refresh_pending.store(false, Ordering::Release);
        self.listener.deactivate();
        if let Some(instance) = self.instance.upgrade() {
            let mut live = instance.lock();
            if live.is_listening_with(&self.listener) {
                live.detach_listener();
            }
        }
        debug!("effect validator disconnected");
    }

    fn ui_client(&mut self) -> &mut dyn EffectUiClient {
        self.client.as_mut()
    }

    fn on_close(&mut self) {
        if self.state == ValidatorState::Closed {
            return;
        }
        self.disconnect();
        if !self.client.close_ui() {
            debug!("effect client did not close its ui");
        }
        self.state = ValidatorState::Closed;
    }
}

impl<P: PluginInstance, W: ControlPanel> Drop for ParameterValidator<P, W> {
    fn drop(&mut self) {
        EffectUiValidator::disconnect(self);
    }
}
