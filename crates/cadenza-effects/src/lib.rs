//! Keeps a hosted plugin's parameters, its settings and its dialog in sync.
//!
//! Plugin-originated changes arrive through a [`ParameterListener`] on any
//! thread, wait in a [`ChangeBuffer`], and are applied to the
//! [`ParameterStore`] by a [`ChangeFlusher`] at idle time. User edits travel
//! the other way through a [`ParameterValidator`].

pub mod config;
pub mod error;
pub mod flusher;
pub mod instance;
pub mod listener;
pub mod null;
pub mod params;
pub mod presets;
pub mod session;
pub mod settings;
pub mod validator;

pub use config::{ConfigError, SyncConfig};
pub use error::EffectError;
pub use flusher::{ChangeFlusher, RefreshTarget};
pub use instance::{ListenerToken, LiveInstance, PluginCallError, PluginFailure, PluginInstance};
pub use listener::{ChangeBuffer, ParameterListener, PendingChange, PushOutcome};
pub use null::{MemoryPanel, NullAutomation, NullPlugin, NullUiClient};
pub use params::{ParamId, Parameter, ParameterInfo, ParameterStore, ParameterUnit};
pub use presets::{PresetLibrary, PresetSlot};
pub use session::EffectSession;
pub use settings::{
    EffectSettings, EffectSettingsExtra, JsonSettingsCodec, SettingsAccess, SettingsCodec,
    SettingsWriteGuard,
};
pub use validator::{
    ControlPanel, EffectSettingChanged, EffectUiClient, EffectUiValidator, ParameterValidator,
    ValidatorState,
};
