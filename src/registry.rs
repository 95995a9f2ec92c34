//! Flat key/value settings store
//!
//! Settings are saved as strings under the historical key names so that
//! stored sessions keep loading. Missing keys fall back to the supplied
//! defaults; values that do not parse are reported as `Registry` errors.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnakeError};
use crate::levelset::parameters::{SnakeParameters, SnakeType, SolverType};
use crate::merge::{CoverageMode, MergeSettings};
use crate::preprocessing::{EdgePreprocessingSettings, ThresholdSettings};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: BTreeMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn put_raw(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Parse `key`, or return `default` when it is absent.
    pub fn get<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.entries.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| SnakeError::registry(key, format!("cannot parse '{}': {}", raw, e))),
            None => Ok(default),
        }
    }

    pub fn put<T: Display>(&mut self, key: &str, value: T) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    /// Booleans are accepted as `true`/`false` or `1`/`0`.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get_raw(key).map(str::trim) {
            None => Ok(default),
            Some("1") | Some("true") => Ok(true),
            Some("0") | Some("false") => Ok(false),
            Some(other) => Err(SnakeError::registry(key, format!("'{}' is not a boolean", other))),
        }
    }

    pub fn put_bool(&mut self, key: &str, value: bool) {
        self.put(key, if value { 1 } else { 0 });
    }

    pub fn get_enum<E: RegistryEnum>(&self, key: &str, default: E) -> Result<E> {
        match self.get_raw(key) {
            None => Ok(default),
            Some(raw) => E::from_name(raw.trim()).ok_or_else(|| {
                let names: Vec<&str> = E::NAMES.iter().map(|(_, n)| *n).collect();
                SnakeError::registry(key, format!("'{}' is not one of {}", raw, names.join(", ")))
            }),
        }
    }

    pub fn put_enum<E: RegistryEnum>(&mut self, key: &str, value: E) {
        self.put(key, value.name());
    }

    /// Entries under `prefix.`, with the prefix removed.
    pub fn folder(&self, prefix: &str) -> Registry {
        let head = format!("{}.", prefix);
        let entries = self
            .entries
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&head).map(|rest| (rest.to_string(), v.clone())))
            .collect();
        Registry { entries }
    }

    /// Store every entry of `folder` under `prefix.`.
    pub fn set_folder(&mut self, prefix: &str, folder: &Registry) {
        for (k, v) in &folder.entries {
            self.entries.insert(format!("{}.{}", prefix, k), v.clone());
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SnakeError::registry("<json>", e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SnakeError::registry("<json>", e.to_string()))
    }
}

/// Enum stored by name
pub trait RegistryEnum: Copy + PartialEq + 'static {
    const NAMES: &'static [(Self, &'static str)];

    fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(v, _)| *v == self)
            .map_or("", |(_, n)| *n)
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::NAMES.iter().find(|(_, n)| *n == name).map(|(v, _)| *v)
    }
}

impl RegistryEnum for SnakeType {
    const NAMES: &'static [(Self, &'static str)] = &[
        (SnakeType::EdgeSnake, "EdgeStopping"),
        (SnakeType::RegionSnake, "RegionCompetition"),
    ];
}

impl RegistryEnum for SolverType {
    const NAMES: &'static [(Self, &'static str)] = &[
        (SolverType::Dense, "Dense"),
        (SolverType::Legacy, "Legacy"),
        (SolverType::SparseField, "SparseField"),
        (SolverType::NarrowBand, "NarrowBand"),
    ];
}

impl RegistryEnum for CoverageMode {
    const NAMES: &'static [(Self, &'static str)] = &[
        (CoverageMode::PaintOverAll, "OverAll"),
        (CoverageMode::PaintOverOne, "OverOne"),
        (CoverageMode::PaintOverColors, "OverVisible"),
    ];
}

/// Settings that can be saved to and restored from a registry folder
pub trait RegistrySettings: Sized {
    /// Read from `reg`, taking missing entries from `default`.
    fn read(reg: &Registry, default: &Self) -> Result<Self>;
    fn write(&self, reg: &mut Registry);
}

impl RegistrySettings for SnakeParameters {
    fn read(reg: &Registry, d: &Self) -> Result<Self> {
        Ok(SnakeParameters {
            snake_type: reg.get_enum("SnakeType", d.snake_type)?,
            solver: reg.get_enum("SolverAlgorithm", d.solver)?,
            curvature_weight: reg.get("CurvatureWeight", d.curvature_weight)?,
            curvature_exponent: reg.get("CurvatureSpeedExponent", d.curvature_exponent)?,
            advection_weight: reg.get("AdvectionWeight", d.advection_weight)?,
            advection_exponent: reg.get("AdvectionSpeedExponent", d.advection_exponent)?,
            propagation_weight: reg.get("PropagationWeight", d.propagation_weight)?,
            propagation_exponent: reg.get("PropagationSpeedExponent", d.propagation_exponent)?,
            laplacian_weight: reg.get("LaplacianWeight", d.laplacian_weight)?,
            laplacian_exponent: reg.get("LaplacianSpeedExponent", d.laplacian_exponent)?,
            time_step: reg.get("TimeStep", d.time_step)?,
            automatic_time_step: reg.get_bool("AutomaticTimeStep", d.automatic_time_step)?,
            time_step_factor: reg.get("TimeStepFactor", d.time_step_factor)?,
            legacy_clamp: reg.get_bool("Clamp", d.legacy_clamp)?,
            legacy_ground: reg.get("Ground", d.legacy_ground)?,
        })
    }

    fn write(&self, reg: &mut Registry) {
        reg.put_enum("SnakeType", self.snake_type);
        reg.put_enum("SolverAlgorithm", self.solver);
        reg.put("CurvatureWeight", self.curvature_weight);
        reg.put("CurvatureSpeedExponent", self.curvature_exponent);
        reg.put("AdvectionWeight", self.advection_weight);
        reg.put("AdvectionSpeedExponent", self.advection_exponent);
        reg.put("PropagationWeight", self.propagation_weight);
        reg.put("PropagationSpeedExponent", self.propagation_exponent);
        reg.put("LaplacianWeight", self.laplacian_weight);
        reg.put("LaplacianSpeedExponent", self.laplacian_exponent);
        reg.put("TimeStep", self.time_step);
        reg.put_bool("AutomaticTimeStep", self.automatic_time_step);
        reg.put("TimeStepFactor", self.time_step_factor);
        reg.put_bool("Clamp", self.legacy_clamp);
        reg.put("Ground", self.legacy_ground);
    }
}

impl RegistrySettings for EdgePreprocessingSettings {
    fn read(reg: &Registry, d: &Self) -> Result<Self> {
        Ok(EdgePreprocessingSettings {
            gaussian_blur_scale: reg.get("GaussianBlurScale", d.gaussian_blur_scale)?,
            remapping_steepness: reg.get("RemappingSteepness", d.remapping_steepness)?,
            remapping_exponent: reg.get("RemappingExponent", d.remapping_exponent)?,
        })
    }

    fn write(&self, reg: &mut Registry) {
        reg.put("GaussianBlurScale", self.gaussian_blur_scale);
        reg.put("RemappingSteepness", self.remapping_steepness);
        reg.put("RemappingExponent", self.remapping_exponent);
    }
}

impl RegistrySettings for ThresholdSettings {
    fn read(reg: &Registry, d: &Self) -> Result<Self> {
        Ok(ThresholdSettings {
            lower_threshold: reg.get("LowerThreshold", d.lower_threshold)?,
            upper_threshold: reg.get("UpperThreshold", d.upper_threshold)?,
            smoothness: reg.get("Smoothness", d.smoothness)?,
            lower_enabled: reg.get_bool("LowerThresholdEnabled", d.lower_enabled)?,
            upper_enabled: reg.get_bool("UpperThresholdEnabled", d.upper_enabled)?,
        })
    }

    fn write(&self, reg: &mut Registry) {
        reg.put("LowerThreshold", self.lower_threshold);
        reg.put("UpperThreshold", self.upper_threshold);
        reg.put("Smoothness", self.smoothness);
        reg.put_bool("LowerThresholdEnabled", self.lower_enabled);
        reg.put_bool("UpperThresholdEnabled", self.upper_enabled);
    }
}

impl RegistrySettings for MergeSettings {
    fn read(reg: &Registry, d: &Self) -> Result<Self> {
        Ok(MergeSettings {
            drawing_label: reg.get("DrawingLabel", d.drawing_label)?,
            overwrite_label: reg.get("OverwriteLabel", d.overwrite_label)?,
            coverage: reg.get_enum("CoverageMode", d.coverage)?,
            invert: reg.get_bool("PolygonInvert", d.invert)?,
        })
    }

    fn write(&self, reg: &mut Registry) {
        reg.put("DrawingLabel", self.drawing_label);
        reg.put("OverwriteLabel", self.overwrite_label);
        reg.put_enum("CoverageMode", self.coverage);
        reg.put_bool("PolygonInvert", self.invert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levelset::parameters::ParameterPreset;

    fn round_trip<T: RegistrySettings>(value: &T, default: &T) -> T {
        let mut reg = Registry::new();
        value.write(&mut reg);
        T::read(&reg, default).unwrap()
    }

    #[test]
    fn test_snake_parameters_round_trip() {
        let p = SnakeParameters {
            solver: SolverType::Legacy,
            time_step: 0.25,
            time_step_factor: 0.5,
            legacy_clamp: false,
            legacy_ground: 3.0,
            ..SnakeParameters::default_edge().with_preset(ParameterPreset::Schlegel)
        };
        assert_eq!(round_trip(&p, &SnakeParameters::default_region()), p);

        let r = SnakeParameters::default_region();
        assert_eq!(round_trip(&r, &SnakeParameters::default_edge()), r);
    }

    #[test]
    fn test_other_settings_round_trip() {
        let t = ThresholdSettings {
            lower_threshold: 12.5,
            upper_threshold: 90.0,
            smoothness: 4.0,
            lower_enabled: false,
            upper_enabled: true,
        };
        assert_eq!(round_trip(&t, &ThresholdSettings::default()), t);

        let e = EdgePreprocessingSettings {
            gaussian_blur_scale: 2.0,
            remapping_steepness: 0.3,
            remapping_exponent: 1.5,
        };
        assert_eq!(round_trip(&e, &EdgePreprocessingSettings::default()), e);

        let m = MergeSettings {
            drawing_label: 7,
            overwrite_label: 3,
            coverage: CoverageMode::PaintOverOne,
            invert: true,
        };
        assert_eq!(round_trip(&m, &MergeSettings::default()), m);
    }

    #[test]
    fn test_historical_names() {
        let mut reg = Registry::new();
        SnakeParameters::default_region().write(&mut reg);
        assert_eq!(reg.get_raw("SnakeType"), Some("RegionCompetition"));
        assert_eq!(reg.get_raw("SolverAlgorithm"), Some("SparseField"));
        assert_eq!(reg.get_raw("AutomaticTimeStep"), Some("1"));

        reg.put_raw("Clamp", "false");
        assert!(!reg.get_bool("Clamp", true).unwrap());
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let mut reg = Registry::new();
        reg.put_raw("PropagationWeight", "-2.5");
        let p = SnakeParameters::read(&reg, &SnakeParameters::default_region()).unwrap();
        assert_eq!(p.propagation_weight, -2.5);
        assert_eq!(p.curvature_weight, SnakeParameters::default_region().curvature_weight);
    }

    #[test]
    fn test_malformed_values_rejected() {
        let mut reg = Registry::new();
        reg.put_raw("PropagationWeight", "fast");
        let err = SnakeParameters::read(&reg, &SnakeParameters::default()).unwrap_err();
        assert!(matches!(err, SnakeError::Registry { ref key, .. } if key == "PropagationWeight"));

        let mut reg = Registry::new();
        reg.put_raw("SolverAlgorithm", "ParallelSparseField");
        assert!(SnakeParameters::read(&reg, &SnakeParameters::default()).is_err());

        let mut reg = Registry::new();
        reg.put_raw("PolygonInvert", "maybe");
        assert!(MergeSettings::read(&reg, &MergeSettings::default()).is_err());
    }

    #[test]
    fn test_folders_and_json() {
        let mut section = Registry::new();
        ThresholdSettings::default().write(&mut section);
        let mut reg = Registry::new();
        reg.set_folder("SNAP.Preprocessing.InOut", &section);
        assert!(reg.contains("SNAP.Preprocessing.InOut.Smoothness"));
        assert_eq!(reg.folder("SNAP.Preprocessing.InOut"), section);

        let restored = Registry::from_json(&reg.to_json().unwrap()).unwrap();
        assert_eq!(restored, reg);
    }
}
