//! Band-limited angular spectrum propagation and multi-height phase recovery.
//!
//! [`AngularSpectrumSolver`] propagates complex fields between parallel planes. [`MultiHeightPhaseRecovery`] uses
//! it to recover a complex field from amplitudes measured at several distances. All numerical work goes through a
//! [`Backend`]: [`NdarrayBackend`] runs on the calling thread, [`RayonBackend`] spreads elementwise kernels and FFT
//! lanes over a thread pool, and with the `gpu` feature `WgpuBackend` dispatches complex kernels to a GPU adapter.
//!
//! ```no_run
//! use phase_recovery::{wave_number, AngularSpectrumSolver, BackendKind, Geometry, Padding, Solver};
//! use ndarray::ArrayD;
//! use num_complex::Complex64;
//!
//! let geometry = Geometry::new(&[512, 512], 1.12, false, Padding::Same, 0.0)?;
//! let solver = AngularSpectrumSolver::with_backend(geometry, BackendKind::Parallel)?;
//! let field = ArrayD::<Complex64>::zeros(ndarray::IxDyn(&[512, 512]));
//! let propagated = solver.solve(&field, wave_number(0.532, 1.0), 300.0)?;
//! # Ok::<(), phase_recovery::Error>(())
//! ```

pub mod backend;
pub mod config;
mod error;
pub mod recovery;
pub mod simulate;
pub mod solver;

#[cfg(feature = "gpu")]
pub use backend::WgpuBackend;
pub use backend::{Backend, BackendKind, ComplexArray, NdarrayBackend, RayonBackend, RealArray};
pub use config::{PropagationConfig, RecoveryConfig};
pub use error::{Error, Result};
pub use recovery::{substitute_amplitude, IterationReport, MultiHeightPhaseRecovery};
pub use solver::{wave_number, AngularSpectrumSolver, Geometry, Padding, Pitch, Solver};
