use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::EffectError;

/// Identifier of a plugin parameter, unique within one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamId(pub u32);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for ParamId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// How a parameter's value should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterUnit {
    #[default]
    Generic,
    Decibels,
    Hertz,
    /// Tied to playback tempo or rate; scaled by the project's play speed.
    Rate,
    Boolean,
    Indexed,
}

/// Static description of a parameter as reported by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub id: ParamId,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub unit: ParameterUnit,
}

impl ParameterInfo {
    pub fn new(
        id: impl Into<ParamId>,
        name: impl Into<String>,
        min: f64,
        max: f64,
        default: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            min,
            max,
            default,
            unit: ParameterUnit::Generic,
        }
    }

    pub fn with_unit(mut self, unit: ParameterUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Whether `value` lies in the plugin-declared range. NaN never does.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Pulls `value` into range. NaN, or a range with inverted or NaN
    /// bounds, yields the default.
    pub fn clamp(&self, value: f64) -> f64 {
        let broken = self.min.is_nan() || self.max.is_nan() || self.min > self.max;
        if value.is_nan() || broken {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }

    pub fn check(&self, value: f64) -> Result<(), EffectError> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(EffectError::ValidationFailed {
                id: self.id,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Current value of one parameter as held by the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameter {
    pub id: ParamId,
    pub value: f64,
    pub dirty: bool,
}

#[derive(Debug, Default)]
struct StoreInner {
    params: BTreeMap<ParamId, Parameter>,
    infos: BTreeMap<ParamId, ParameterInfo>,
}

/// Canonical parameter values shared by the flusher and the validator.
///
/// Values are stored as given; ranges in [`ParameterInfo`] are only used by
/// validation. Iteration order is ascending by id.
#[derive(Debug, Default)]
pub struct ParameterStore {
    inner: RwLock<StoreInner>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding every parameter at its default value.
    pub fn with_parameters(infos: impl IntoIterator<Item = ParameterInfo>) -> Self {
        let store = Self::new();
        for info in infos {
            store.register(info);
        }
        store
    }

    /// Adds or updates a parameter description. Existing values are kept.
    pub fn register(&self, info: ParameterInfo) {
        let mut inner = self.inner.write();
        inner.params.entry(info.id).or_insert(Parameter {
            id: info.id,
            value: info.default,
            dirty: false,
        });
        inner.infos.insert(info.id, info);
    }

    pub fn get(&self, id: ParamId) -> Result<f64, EffectError> {
        self.inner
            .read()
            .params
            .get(&id)
            .map(|param| param.value)
            .ok_or(EffectError::UnknownParameter(id))
    }

    /// Stores `value` and marks the parameter dirty. Unknown ids are added.
    pub fn set(&self, id: ParamId, value: f64) {
        let mut inner = self.inner.write();
        let param = inner.params.entry(id).or_insert(Parameter {
            id,
            value,
            dirty: true,
        });
        param.value = value;
        param.dirty = true;
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.inner.read().params.contains_key(&id)
    }

    pub fn parameter(&self, id: ParamId) -> Option<Parameter> {
        self.inner.read().params.get(&id).copied()
    }

    pub fn info(&self, id: ParamId) -> Option<ParameterInfo> {
        self.inner.read().infos.get(&id).cloned()
    }

    pub fn infos(&self) -> Vec<ParameterInfo> {
        self.inner.read().infos.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<ParamId> {
        self.inner.read().params.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().params.is_empty()
    }

    /// Every `(id, value)` pair in ascending id order.
    pub fn values(&self) -> Vec<(ParamId, f64)> {
        self.inner
            .read()
            .params
            .values()
            .map(|param| (param.id, param.value))
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<ParamId, f64> {
        self.values().into_iter().collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner
            .read()
            .params
            .values()
            .filter(|param| param.dirty)
            .count()
    }

    /// Returns the dirty parameters and clears their flags.
    pub fn drain_dirty(&self) -> Vec<(ParamId, f64)> {
        let mut inner = self.inner.write();
        inner
            .params
            .values_mut()
            .filter(|param| param.dirty)
            .map(|param| {
                param.dirty = false;
                (param.id, param.value)
            })
            .collect()
    }

    /// Replaces the values of every parameter present in `values`.
    pub fn load(&self, values: &BTreeMap<ParamId, f64>) {
        let mut inner = self.inner.write();
        for (&id, &value) in values {
            inner.params.insert(
                id,
                Parameter {
                    id,
                    value,
                    dirty: true,
                },
            );
        }
    }

    /// The value of `id` with rate-type parameters multiplied by `play_speed`.
    pub fn scaled_value(&self, id: ParamId, play_speed: f64) -> Result<f64, EffectError> {
        let inner = self.inner.read();
        let value = inner
            .params
            .get(&id)
            .map(|param| param.value)
            .ok_or(EffectError::UnknownParameter(id))?;
        match inner.infos.get(&id).map(|info| info.unit) {
            Some(ParameterUnit::Rate) => Ok(value * play_speed),
            _ => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> ParameterStore {
        ParameterStore::with_parameters([
            ParameterInfo::new(1, "Mix", 0.0, 1.0, 0.5),
            ParameterInfo::new(2, "Tempo", 20.0, 300.0, 120.0).with_unit(ParameterUnit::Rate),
        ])
    }

    #[test]
    fn unknown_ids_are_reported() {
        let store = store();
        assert_eq!(
            store.get(ParamId(9)),
            Err(EffectError::UnknownParameter(ParamId(9)))
        );
        assert_eq!(store.get(ParamId(1)), Ok(0.5));
    }

    #[test]
    fn set_marks_dirty_and_drain_clears() {
        let store = store();
        assert_eq!(store.dirty_count(), 0);
        store.set(ParamId(2), 98.0);
        store.set(ParamId(1), 0.25);
        assert_eq!(
            store.drain_dirty(),
            vec![(ParamId(1), 0.25), (ParamId(2), 98.0)]
        );
        assert!(store.drain_dirty().is_empty());
        assert_eq!(store.get(ParamId(2)), Ok(98.0));
    }

    #[test]
    fn out_of_range_values_pass_through() {
        let store = store();
        store.set(ParamId(1), 7.5);
        assert_eq!(store.get(ParamId(1)), Ok(7.5));
        assert!(store
            .info(ParamId(1))
            .is_some_and(|info| info.check(7.5).is_err()));
    }

    #[test]
    fn register_keeps_existing_value() {
        let store = store();
        store.set(ParamId(1), 0.9);
        store.register(ParameterInfo::new(1, "Wet", 0.0, 1.0, 0.1));
        assert_eq!(store.get(ParamId(1)), Ok(0.9));
        assert_eq!(
            store.info(ParamId(1)).map(|info| info.name),
            Some("Wet".to_string())
        );
    }

    #[test]
    fn rate_parameters_follow_play_speed() {
        let store = store();
        assert_eq!(store.scaled_value(ParamId(2), 2.0), Ok(240.0));
        assert_eq!(store.scaled_value(ParamId(1), 2.0), Ok(0.5));
    }

    #[test]
    fn clamp_replaces_nan_with_default() {
        let info = ParameterInfo::new(3, "Q", 0.1, 10.0, 0.7);
        assert_eq!(info.clamp(f64::NAN), 0.7);
        assert_eq!(info.clamp(20.0), 10.0);
        assert!(!info.contains(f64::NAN));
    }

    #[test]
    fn clamp_with_broken_bounds_uses_default() {
        let inverted = ParameterInfo::new(4, "Gain", 10.0, -10.0, 0.0);
        assert_eq!(inverted.clamp(3.0), 0.0);
        let open = ParameterInfo::new(5, "Pan", f64::NAN, 1.0, 0.5);
        assert_eq!(open.clamp(-2.0), 0.5);
    }
}
