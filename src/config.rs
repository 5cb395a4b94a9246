//! Serde deserialisable configuration for propagation and phase recovery runs.

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use crate::solver::{wave_number, AngularSpectrumSolver, Geometry, Pitch, Padding};
use serde::Deserialize;

/// Optical and sampling parameters of a propagation.
#[derive(Clone, Debug, Deserialize)]
pub struct PropagationConfig {
    /// Vacuum wavelength, in the same unit as `pitch`.
    pub wavelength: f64,
    #[serde(default = "default_refractive_index")]
    pub refractive_index: f64,
    /// Scalar or one value per spatial axis.
    pub pitch: Pitch,
    /// `"none"`, `"same"` or `[[before, after], ...]` (default: none).
    #[serde(default)]
    pub padding: Padding,
    #[serde(default)]
    pub pad_fill_value: f64,
    #[serde(default)]
    pub batched: bool,
    /// `"cpu"`, `"parallel"` or `"accelerator"`, any case (default: cpu).
    #[serde(default)]
    pub backend: BackendKind,
}

fn default_refractive_index() -> f64 {
    1.0
}

impl PropagationConfig {
    pub fn wave_number(&self) -> Result<f64> {
        if !(self.wavelength.is_finite() && self.wavelength > 0.0) {
            return Err(Error::Config(format!(
                "wavelength must be positive and finite, got {}",
                self.wavelength
            )));
        }
        if !(self.refractive_index.is_finite() && self.refractive_index > 0.0) {
            return Err(Error::Config(format!(
                "refractive index must be positive and finite, got {}",
                self.refractive_index
            )));
        }
        Ok(wave_number(self.wavelength, self.refractive_index))
    }

    /// Solver for inputs of `shape`.
    pub fn build_solver(&self, shape: &[usize]) -> Result<AngularSpectrumSolver> {
        let geometry = Geometry::new(
            shape,
            self.pitch.clone(),
            self.batched,
            self.padding.clone(),
            self.pad_fill_value,
        )?;
        AngularSpectrumSolver::with_backend(geometry, self.backend)
    }
}

/// A multi-height phase recovery run.
#[derive(Clone, Debug, Deserialize)]
pub struct RecoveryConfig {
    pub propagation: PropagationConfig,
    /// Propagation distance of each measurement plane.
    pub z_values: Vec<f64>,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

fn default_iterations() -> usize {
    20
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn minimal_propagation_config() {
        let cfg: PropagationConfig = toml::from_str(
            r#"
            wavelength = 0.532
            pitch = 1.12
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pitch, Pitch::Uniform(1.12));
        assert_eq!(cfg.padding, Padding::None);
        assert_eq!(cfg.backend, BackendKind::Cpu);
        assert!(!cfg.batched);
        assert_relative_eq!(cfg.wave_number().unwrap(), 2.0 * PI / 0.532);

        let solver = cfg.build_solver(&[16, 16]).unwrap();
        assert_eq!(solver.geometry().padded_shape(), &[16, 16]);
    }

    #[test]
    fn full_recovery_config() {
        let cfg: RecoveryConfig = toml::from_str(
            r#"
            z_values = [-300.0, -350.0, -400.0]
            iterations = 50

            [propagation]
            wavelength = 0.532
            refractive_index = 1.33
            pitch = [1.12, 2.24]
            padding = [[4, 4], [2, 6]]
            pad_fill_value = 1.0
            batched = true
            backend = "Parallel"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.iterations, 50);
        assert_eq!(cfg.z_values.len(), 3);
        let p = &cfg.propagation;
        assert_eq!(p.pitch, Pitch::PerAxis(vec![1.12, 2.24]));
        assert_eq!(p.padding, Padding::Explicit(vec![[4, 4], [2, 6]]));
        assert_eq!(p.backend, BackendKind::Parallel);
        assert_relative_eq!(p.wave_number().unwrap(), 2.0 * PI * 1.33 / 0.532);

        let solver = p.build_solver(&[2, 8, 8]).unwrap();
        assert_eq!(solver.geometry().padded_shape(), &[16, 16]);
        assert_eq!(solver.geometry().pad_fill_value(), 1.0);
    }

    #[test]
    fn named_padding_and_defaults() {
        let cfg: RecoveryConfig = toml::from_str(
            r#"
            z_values = [1.0, 2.0]
            [propagation]
            wavelength = 0.5
            pitch = 1.0
            padding = "Same"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.iterations, 20);
        assert_eq!(cfg.propagation.padding, Padding::Same);
    }

    #[test]
    fn backend_names_ignore_case() {
        for (name, kind) in [
            ("CPU", BackendKind::Cpu),
            ("cpu", BackendKind::Cpu),
            ("PARALLEL", BackendKind::Parallel),
            ("Accelerator", BackendKind::Accelerator),
        ]
        .iter()
        {
            let cfg: PropagationConfig =
                toml::from_str(&format!("wavelength = 0.5\npitch = 1.0\nbackend = \"{}\"", name))
                    .unwrap();
            assert_eq!(cfg.backend, *kind);
        }
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn accelerator_requires_gpu_build() {
        let cfg: PropagationConfig =
            toml::from_str("wavelength = 0.5\npitch = 1.0\nbackend = \"accelerator\"").unwrap();
        assert!(matches!(cfg.build_solver(&[8, 8]), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(toml::from_str::<PropagationConfig>(
            "wavelength = 0.5\npitch = 1.0\npadding = \"reflect\""
        )
        .is_err());
        assert!(toml::from_str::<PropagationConfig>(
            "wavelength = 0.5\npitch = 1.0\nbackend = \"tensorflow\""
        )
        .is_err());

        let cfg: PropagationConfig = toml::from_str("wavelength = -0.5\npitch = 1.0").unwrap();
        assert!(matches!(cfg.wave_number(), Err(Error::Config(_))));
        let cfg: PropagationConfig =
            toml::from_str("wavelength = 0.5\npitch = [1.0, 1.0, 1.0]").unwrap();
        assert!(matches!(cfg.build_solver(&[8, 8]), Err(Error::Config(_))));
    }
}
