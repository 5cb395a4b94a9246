//! Multi-height phase recovery.
//!
//! A Gerchberg-Saxton style fixed point iteration over amplitude measurements taken at several distances from the
//! object. Each step propagates the current estimate to the next plane, keeps the propagated phase and replaces
//! the amplitude with the measured one. A forward sweep through the planes followed by a backward sweep makes up
//! one iteration. There is no convergence guarantee; the iteration count is a tuning parameter.

use crate::backend::{Backend, ComplexArray, RealArray};
use crate::error::{Error, Result};
use crate::solver::Solver;
use log::{debug, info, trace};
use std::ops::ControlFlow;

/// Progress passed to the observer of [`MultiHeightPhaseRecovery::solve_with`] after every iteration.
#[derive(Debug)]
pub struct IterationReport<'a> {
    /// zero based
    pub iteration: usize,
    /// `Σ| |u| - m | / Σ m` at the first plane, before its amplitude is replaced
    pub residual: f64,
    /// current estimate at the first plane
    pub field: &'a ComplexArray,
}

/// Measured amplitude combined with the phase of the propagated field: `measured * exp(i angle(propagated))`.
pub fn substitute_amplitude(
    backend: &dyn Backend,
    propagated: &ComplexArray,
    measured: &RealArray,
) -> Result<ComplexArray> {
    let phase = backend.angle(propagated);
    let rotation = backend.exp(&backend.complex(&backend.zeros_like(&phase), &phase)?);
    backend.multiply(&backend.to_complex(measured), &rotation)
}

fn amplitude_residual(
    backend: &dyn Backend,
    propagated: &ComplexArray,
    measured: &RealArray,
) -> Result<f64> {
    let mismatch = backend.total(&backend.abs_real(
        &backend.subtract_real(&backend.abs(propagated), measured)?,
    ));
    let norm = backend.total(measured);
    Ok(if norm > 0.0 { mismatch / norm } else { mismatch })
}

/// Recovers a complex field from amplitudes measured at several propagation distances.
pub struct MultiHeightPhaseRecovery<'s, S: ?Sized> {
    solver: &'s S,
}

impl<'s, S: Solver + ?Sized> MultiHeightPhaseRecovery<'s, S> {
    pub fn new(solver: &'s S) -> Self {
        MultiHeightPhaseRecovery { solver }
    }

    /// Runs `iterations` forward/backward sweeps and returns the estimate propagated by `z_values[0]`.
    ///
    /// * `measurements` - amplitude (square root of intensity) at each plane, each of the solver's shape
    /// * `k` - wave number
    /// * `z_values` - distance of each plane; the step from plane `j` to `j + 1` propagates by `z[j] - z[j + 1]`
    /// * `iterations` - number of full iterations; zero returns the first measurement propagated by `z_values[0]`
    ///
    /// Equal neighbouring distances are accepted, the step is then an identity and adds no information.
    pub fn solve(
        &self,
        measurements: &[RealArray],
        k: f64,
        z_values: &[f64],
        iterations: usize,
    ) -> Result<ComplexArray> {
        self.solve_with(measurements, k, z_values, iterations, |_| {
            ControlFlow::Continue(())
        })
    }

    /// As [`MultiHeightPhaseRecovery::solve`], calling `observer` after every iteration.
    ///
    /// Returning `ControlFlow::Break(())` ends the loop early. The final propagation to `z_values[0]` still runs.
    pub fn solve_with<F>(
        &self,
        measurements: &[RealArray],
        k: f64,
        z_values: &[f64],
        iterations: usize,
        mut observer: F,
    ) -> Result<ComplexArray>
    where
        F: FnMut(&IterationReport<'_>) -> ControlFlow<()>,
    {
        self.check_inputs(measurements, z_values)?;
        let backend = self.solver.backend();
        let last = measurements.len() - 1;

        info!(
            "phase recovery over {} planes, {} iterations, {} backend",
            measurements.len(),
            iterations,
            backend.name()
        );

        let mut field = backend.to_complex(&measurements[0]);
        for iteration in 0..iterations {
            for j in 0..last {
                let propagated = self.solver.solve(&field, k, z_values[j] - z_values[j + 1])?;
                field = substitute_amplitude(backend, &propagated, &measurements[j + 1])?;
            }
            trace!("iteration {}: forward sweep done", iteration);

            let mut residual = 0.0;
            for j in 0..last {
                let target = last - j - 1;
                let propagated =
                    self.solver.solve(&field, k, z_values[last - j] - z_values[target])?;
                if target == 0 {
                    residual = amplitude_residual(backend, &propagated, &measurements[0])?;
                }
                field = substitute_amplitude(backend, &propagated, &measurements[target])?;
            }
            trace!("iteration {}: backward sweep done", iteration);

            if iteration % 5 == 0 {
                debug!("iteration {}: residual {:.6e}", iteration, residual);
            }

            let report = IterationReport {
                iteration,
                residual,
                field: &field,
            };
            if let ControlFlow::Break(()) = observer(&report) {
                debug!("stopped by observer after iteration {}", iteration);
                break;
            }
        }

        let recovered = self.solver.solve(&field, k, z_values[0])?;
        info!("phase recovery finished");
        Ok(recovered)
    }

    fn check_inputs(&self, measurements: &[RealArray], z_values: &[f64]) -> Result<()> {
        if measurements.len() != z_values.len() {
            return Err(Error::Config(format!(
                "{} measurements given with {} distances",
                measurements.len(),
                z_values.len()
            )));
        }
        if measurements.len() < 2 {
            return Err(Error::Config(format!(
                "phase recovery needs at least 2 planes, got {}",
                measurements.len()
            )));
        }
        if let Some((i, m)) = measurements
            .iter()
            .enumerate()
            .find(|(_, m)| m.shape() != self.solver.shape())
        {
            return Err(Error::ShapeMismatch(format!(
                "measurement {} has shape {:?}, the solver expects {:?}",
                i,
                m.shape(),
                self.solver.shape()
            )));
        }
        Ok(())
    }
}
