//! Hologram simulation and focus scanning built on a [`Solver`].

use crate::backend::{ComplexArray, RealArray};
use crate::error::{Error, Result};
use crate::solver::Solver;
use log::trace;
use ndarray::Zip;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Complex object field `amplitude * exp(i 2π phase)`, with the phase given in cycles.
pub fn object_field(amplitude: &RealArray, phase: &RealArray) -> Result<ComplexArray> {
    if amplitude.shape() != phase.shape() {
        return Err(Error::ShapeMismatch(format!(
            "amplitude shape {:?} does not match phase shape {:?}",
            amplitude.shape(),
            phase.shape()
        )));
    }
    Ok(Zip::from(amplitude)
        .and(phase)
        .map_collect(|&a, &p| Complex64::from_polar(a, 2.0 * PI * p)))
}

/// Intensities `|u|^2` of `field` propagated to `z + i * dz` for `i` in `0..count`.
pub fn simulate_multiple<S: Solver + ?Sized>(
    solver: &S,
    field: &ComplexArray,
    k: f64,
    z: f64,
    dz: f64,
    count: usize,
) -> Result<Vec<RealArray>> {
    let b = solver.backend();
    (0..count)
        .map(|i| -> Result<RealArray> {
            let z = z + i as f64 * dz;
            trace!("simulating hologram {} at z = {}", i, z);
            let amplitude = b.abs(&solver.solve(field, k, z)?);
            b.multiply_real(&amplitude, &amplitude)
        })
        .collect()
}

/// Upper bound on the number of distances in one focus scan.
pub const MAX_SCAN_PLANES: usize = 100_000;

/// Distances `start, start + step, ...` strictly before `stop`.
///
/// Fails with [`Error::Config`] for a zero or non-finite step, and when the range holds more than
/// [`MAX_SCAN_PLANES`] distances.
fn z_range(start: f64, stop: f64, step: f64) -> Result<Vec<f64>> {
    if step == 0.0 || !step.is_finite() {
        return Err(Error::Config(format!(
            "scan step must be non-zero and finite, got {}",
            step
        )));
    }
    let count = ((stop - start) / step).ceil();
    if !(count > 0.0) {
        return Ok(Vec::new());
    }
    if count > MAX_SCAN_PLANES as f64 {
        return Err(Error::Config(format!(
            "scanning {}..{} in steps of {} needs {} planes, at most {} are allowed",
            start, stop, step, count, MAX_SCAN_PLANES
        )));
    }
    Ok((0..count as usize).map(|i| start + i as f64 * step).collect())
}

/// Reconstructs `hologram` at each distance of the half open range `start..stop` spaced by `step`.
///
/// Returns `(z, amplitude)` pairs, each amplitude scaled so its maximum is 1. Useful to locate the focal
/// plane.
pub fn scan_z<S: Solver + ?Sized>(
    solver: &S,
    hologram: &RealArray,
    k: f64,
    start: f64,
    stop: f64,
    step: f64,
) -> Result<Vec<(f64, RealArray)>> {
    let b = solver.backend();
    let field = b.to_complex(hologram);
    z_range(start, stop, step)?
        .into_iter()
        .map(|z| -> Result<(f64, RealArray)> {
            let amplitude = b.abs(&solver.solve(&field, k, z)?);
            let max = b.reduce_max(&amplitude);
            trace!("scan at z = {}: peak amplitude {}", z, max);
            let amplitude = if max > 0.0 {
                b.affine(&amplitude, 1.0 / max, 0.0)
            } else {
                amplitude
            };
            Ok((z, amplitude))
        })
        .collect()
}
