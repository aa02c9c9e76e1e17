use thiserror::Error;

use crate::instance::PluginCallError;
use crate::params::ParamId;

/// Errors surfaced by the parameter synchronisation core.
///
/// None of these are fatal: callers log them, show them on the panel, or
/// re-synchronise from the plugin.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EffectError {
    #[error("unknown parameter {0}")]
    UnknownParameter(ParamId),
    #[error("plugin call failed for parameter {id}: {reason}")]
    PluginCallFailed { id: ParamId, reason: String },
    #[error("value {value} for parameter {id} is outside {min}..={max}")]
    ValidationFailed {
        id: ParamId,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("pending change buffer overflowed, {dropped} change(s) dropped")]
    QueueOverflow { dropped: u64 },
    #[error("call arrived after the validator was disconnected")]
    UseAfterDisconnect,
    #[error("invalid settings string: {0}")]
    Codec(String),
    #[error("no preset stored in {0}")]
    UnknownPreset(String),
    #[error("{0} is read-only")]
    ReadOnlyPreset(String),
    #[error("preset file {path}: {reason}")]
    PresetFile { path: String, reason: String },
}

impl From<PluginCallError> for EffectError {
    fn from(err: PluginCallError) -> Self {
        EffectError::PluginCallFailed {
            id: err.id,
            reason: err.failure.to_string(),
        }
    }
}
