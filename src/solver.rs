//! Band-limited angular spectrum propagation.

use crate::backend::{Backend, BackendKind, ComplexArray, Comparison, RealArray};
use crate::error::{Error, Result};
use log::{debug, warn};
use num_complex::Complex64;
use num_integer::Integer;
use serde::Deserialize;
use std::convert::TryFrom;
use std::f64::consts::PI;
use std::sync::Arc;

/// Wave number `2πn/λ`.
///
/// * `wavelength` - vacuum wavelength, in the same length unit as the pitch and propagation distances
/// * `refractive_index` - refractive index of the medium (1.0 for air)
pub fn wave_number(wavelength: f64, refractive_index: f64) -> f64 {
    2.0 * PI * refractive_index / wavelength
}

/// A propagation operator: takes a field and returns it propagated by `z` for wave number `k`.
pub trait Solver {
    fn backend(&self) -> &dyn Backend;

    /// Configured input shape, including the batch axis if there is one.
    fn shape(&self) -> &[usize];

    fn solve(&self, input: &ComplexArray, k: f64, z: f64) -> Result<ComplexArray>;
}

/// Sample pitch, either shared by all spatial axes or given per axis.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Pitch {
    Uniform(f64),
    PerAxis(Vec<f64>),
}

impl From<f64> for Pitch {
    fn from(pitch: f64) -> Self {
        Pitch::Uniform(pitch)
    }
}

impl From<Vec<f64>> for Pitch {
    fn from(pitch: Vec<f64>) -> Self {
        Pitch::PerAxis(pitch)
    }
}

/// Zero padding applied around the field before the FFT.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "PaddingRepr")]
pub enum Padding {
    None,
    /// `len / 2` samples on both sides of every spatial axis, roughly doubling each axis.
    Same,
    /// `[before, after]` sample counts for each spatial axis.
    Explicit(Vec<[usize; 2]>),
}

impl Default for Padding {
    fn default() -> Self {
        Padding::None
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PaddingRepr {
    Named(String),
    Explicit(Vec<[usize; 2]>),
}

impl TryFrom<PaddingRepr> for Padding {
    type Error = String;

    fn try_from(repr: PaddingRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            PaddingRepr::Named(name) => match name.to_lowercase().as_str() {
                "none" => Ok(Padding::None),
                "same" => Ok(Padding::Same),
                other => Err(format!("unknown padding '{}'", other)),
            },
            PaddingRepr::Explicit(pads) => Ok(Padding::Explicit(pads)),
        }
    }
}

/// Static configuration of a solver. Validated once on construction and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    shape: Vec<usize>,
    is_batched: bool,
    pitch: Vec<f64>,
    padding: Vec<[usize; 2]>,
    padded_shape: Vec<usize>,
    pad_fill_value: f64,
}

impl Geometry {
    /// * `shape` - input/output shape, with the batch axis first if `is_batched`
    /// * `pitch` - sample pitch of each spatial axis
    /// * `is_batched` - whether axis 0 is a batch axis
    /// * `padding` - padding of the spatial axes
    /// * `pad_fill_value` - constant written into the padded region
    pub fn new(
        shape: &[usize],
        pitch: impl Into<Pitch>,
        is_batched: bool,
        padding: Padding,
        pad_fill_value: f64,
    ) -> Result<Self> {
        if shape.is_empty() {
            return Err(Error::Config("shape must have at least one axis".into()));
        }
        if shape.len() > 2 && !is_batched {
            return Err(Error::Config(
                "more than 2-dimensional data is not supported without a batch dimension".into(),
            ));
        }
        if shape.len() > 3 {
            return Err(Error::Config(
                "more than 3-dimensional data is not supported".into(),
            ));
        }
        if shape.len() == 1 && is_batched {
            return Err(Error::Config(
                "shape is one dimensional while a batch dimension is also expected".into(),
            ));
        }
        if shape.contains(&0) {
            return Err(Error::Config(format!("shape {:?} has an empty axis", shape)));
        }

        let spatial_shape = &shape[if is_batched { 1 } else { 0 }..];
        let rank = spatial_shape.len();

        let pitch = match pitch.into() {
            Pitch::Uniform(p) => vec![p; rank],
            Pitch::PerAxis(p) if p.len() == rank => p,
            Pitch::PerAxis(p) => {
                return Err(Error::Config(format!(
                    "{} pitch values given for {} spatial axes",
                    p.len(),
                    rank
                )))
            }
        };
        if let Some(p) = pitch.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
            return Err(Error::Config(format!(
                "pitch must be positive and finite, got {}",
                p
            )));
        }

        let spatial_padding = match padding {
            Padding::None => vec![[0, 0]; rank],
            Padding::Same => spatial_shape.iter().map(|&s| [s / 2, s / 2]).collect(),
            Padding::Explicit(pads) if pads.len() == rank => pads,
            Padding::Explicit(pads) => {
                return Err(Error::Config(format!(
                    "padding must have one [before, after] pair per data dimension, got {} for {}",
                    pads.len(),
                    rank
                )))
            }
        };

        let padded_shape = spatial_shape
            .iter()
            .zip(&spatial_padding)
            .map(|(&s, p)| s + p[0] + p[1])
            .collect();

        let mut padding = Vec::with_capacity(shape.len());
        if is_batched {
            padding.push([0, 0]);
        }
        padding.extend(spatial_padding);

        Ok(Geometry {
            shape: shape.to_vec(),
            is_batched,
            pitch,
            padding,
            padded_shape,
            pad_fill_value,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn is_batched(&self) -> bool {
        self.is_batched
    }

    /// Shape without the batch axis.
    pub fn spatial_shape(&self) -> &[usize] {
        &self.shape[self.batch_axes()..]
    }

    /// Number of spatial axes, which is also the rank of the FFT.
    pub fn spatial_rank(&self) -> usize {
        self.shape.len() - self.batch_axes()
    }

    pub fn pitch(&self) -> &[f64] {
        &self.pitch
    }

    /// `[before, after]` padding for every axis of the input, including a zero entry for the batch axis.
    pub fn padding(&self) -> &[[usize; 2]] {
        &self.padding
    }

    /// Spatial shape after padding.
    pub fn padded_shape(&self) -> &[usize] {
        &self.padded_shape
    }

    pub fn pad_fill_value(&self) -> f64 {
        self.pad_fill_value
    }

    fn batch_axes(&self) -> usize {
        if self.is_batched {
            1
        } else {
            0
        }
    }
}

/// Free-space propagation by the band-limited angular spectrum method.
///
/// The transverse angular frequency grid is computed once on construction and shared read-only by every
/// call to [`AngularSpectrumSolver::solve`], so a solver can be used from several threads at once.
#[derive(Clone, Debug)]
pub struct AngularSpectrumSolver {
    geometry: Geometry,
    backend: Arc<dyn Backend>,
    /// transverse angular frequency of each spatial axis, over the padded grid
    kt: Vec<RealArray>,
    /// squared transverse angular frequency magnitude, summed over the spatial axes
    kt2: RealArray,
}

impl AngularSpectrumSolver {
    pub fn new(geometry: Geometry, backend: Arc<dyn Backend>) -> Result<Self> {
        let b = &*backend;

        for (axis, &n) in geometry.padded_shape().iter().enumerate() {
            if n.is_odd() {
                warn!(
                    "padded axis {} has odd length {}, zero frequency lands at index {} not 0",
                    axis,
                    n,
                    n - 1
                );
            }
        }

        let axes = geometry
            .padded_shape()
            .iter()
            .zip(geometry.pitch())
            .map(|(&n, &d)| {
                let u = 1.0 / (d * n as f64);
                let (f_min, f_max) = if n.is_even() {
                    (-(n as f64 / 2.0) * u, (n as f64 / 2.0 - 1.0) * u)
                } else {
                    (-((n - 1) as f64 / 2.0) * u, ((n - 1) as f64 / 2.0) * u)
                };
                b.fftshift(&b.linspace(f_min * 2.0 * PI, f_max * 2.0 * PI, n))
            })
            .collect::<Vec<_>>();

        let mut kt = b.meshgrid(&axes)?;
        let kt_abs = b.convert(&kt)?;
        let mut kt2 = b.reduce_sum(&b.multiply_real(&kt_abs, &kt_abs)?, 0)?;

        // leading unit axis so the transfer function broadcasts over the batch
        if geometry.is_batched() {
            kt2 = b.expand_dim(&kt2, 0)?;
            kt = kt
                .iter()
                .map(|grid| b.expand_dim(grid, 0))
                .collect::<Result<_>>()?;
        }

        debug!(
            "angular spectrum solver: shape {:?}, padded {:?}, pitch {:?}, backend {}",
            geometry.shape(),
            geometry.padded_shape(),
            geometry.pitch(),
            b.name()
        );

        Ok(AngularSpectrumSolver {
            geometry,
            backend,
            kt,
            kt2,
        })
    }

    /// Convenience constructor selecting one of the built in backends.
    pub fn with_backend(geometry: Geometry, kind: BackendKind) -> Result<Self> {
        Self::new(geometry, kind.create()?)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Squared transverse angular frequency magnitude over the padded grid, in FFT order.
    pub fn kt2(&self) -> &RealArray {
        &self.kt2
    }

    /// Low pass filter over the padded frequency grid, 1.0 inside the pass band and 0.0 outside.
    ///
    /// Frequencies whose propagation over `z` would alias on the padded grid are removed. The pass band of each
    /// axis is `|kt| < k / sqrt((2z / (pitch * len))^2 + 1)`, and the axes are combined by multiplication.
    pub fn band_limit_mask(&self, k: f64, z: f64) -> Result<RealArray> {
        let b = self.backend();
        let mut mask: Option<RealArray> = None;
        for (i, kt) in self.kt.iter().enumerate() {
            let extent = self.geometry.pitch[i] * self.geometry.padded_shape[i] as f64;
            let k_limit = k / ((2.0 * z / extent).powi(2) + 1.0).sqrt();
            let axis_mask =
                b.select_real(&b.compare(&b.abs_real(kt), Comparison::Less, k_limit), 1.0, 0.0);
            mask = Some(match mask {
                None => axis_mask,
                Some(mask) => b.multiply_real(&mask, &axis_mask)?,
            });
        }
        Ok(mask.unwrap_or_else(|| b.zeros_like(&self.kt2)))
    }

    /// Number of frequency samples kept by [`AngularSpectrumSolver::band_limit_mask`].
    pub fn passband_area(&self, k: f64, z: f64) -> Result<usize> {
        Ok(self.backend().total(&self.band_limit_mask(k, z)?).round() as usize)
    }

    /// Free-space propagation phase `exp(iz sqrt(k^2 - kt^2))`.
    ///
    /// Evanescent components (`kt^2 > k^2`) get the real exponent `-z sqrt(kt^2 - k^2)` instead.
    pub fn propagator(&self, k: f64, z: f64) -> Result<ComplexArray> {
        let b = self.backend();
        let k2_kt2 = b.affine(&self.kt2, -1.0, k * k);
        let sqk2_kt2 = b.sqrt(&b.abs_real(&k2_kt2));
        let zeros = b.zeros_like(&self.kt2);
        let propagating = b.complex(&zeros, &b.affine(&sqk2_kt2, z, 0.0))?;
        let evanescent = b.complex(&b.affine(&sqk2_kt2, -z, 0.0), &zeros)?;
        let exponent = b.select(
            &b.compare(&k2_kt2, Comparison::GreaterEqual, 0.0),
            &propagating,
            &evanescent,
        )?;
        Ok(b.exp(&exponent))
    }

    /// The propagator restricted to the band limit; exactly zero outside it.
    pub fn transfer_function(&self, k: f64, z: f64) -> Result<ComplexArray> {
        let b = self.backend();
        let mask = self.band_limit_mask(k, z)?;
        let p = self.propagator(k, z)?;
        b.select(
            &b.compare(&mask, Comparison::Greater, 0.0),
            &p,
            &b.complex_zeros_like(&p),
        )
    }

    fn check_input(&self, input: &ComplexArray) -> Result<()> {
        if input.ndim() != self.geometry.padding.len() {
            return Err(Error::ShapeMismatch(format!(
                "input has {} axes but the solver expects {}",
                input.ndim(),
                self.geometry.padding.len()
            )));
        }
        let spatial = &input.shape()[self.geometry.batch_axes()..];
        if spatial != self.geometry.spatial_shape() {
            return Err(Error::ShapeMismatch(format!(
                "input spatial shape {:?} does not match the configured {:?}",
                spatial,
                self.geometry.spatial_shape()
            )));
        }
        Ok(())
    }
}

impl Solver for AngularSpectrumSolver {
    fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    fn shape(&self) -> &[usize] {
        self.geometry.shape()
    }

    /// Propagates `input` by `z`: pad, FFT, multiply by the transfer function, inverse FFT, unpad.
    fn solve(&self, input: &ComplexArray, k: f64, z: f64) -> Result<ComplexArray> {
        self.check_input(input)?;
        let b = self.backend();
        let padding = self.geometry.padding();
        let rank = self.geometry.spatial_rank();

        let field = b.pad(input, padding, Complex64::new(self.geometry.pad_fill_value, 0.0))?;
        let tf = self.transfer_function(k, z)?;
        let spectrum = b.multiply(&tf, &b.fft(&field, rank)?)?;
        b.unpad(&b.ifft(&spectrum, rank)?, padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdarrayBackend;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, ArrayD, Axis, Dimension, IxDyn};

    const PITCH: f64 = 1.12;
    const WAVELENGTH: f64 = 532e-3;

    fn k() -> f64 {
        wave_number(WAVELENGTH, 1.0)
    }

    fn solver(shape: &[usize], padding: Padding) -> AngularSpectrumSolver {
        let geometry = Geometry::new(shape, PITCH, false, padding, 0.0).unwrap();
        AngularSpectrumSolver::new(geometry, Arc::new(NdarrayBackend)).unwrap()
    }

    fn textured(shape: &[usize]) -> ComplexArray {
        ArrayD::from_shape_fn(IxDyn(shape), |idx| {
            let (y, x) = (idx[0] as f64, idx[1] as f64);
            Complex64::from_polar(1.0 + 0.5 * (0.7 * y).sin() * (1.3 * x).cos(), 0.2 * x - 0.1 * y)
        })
    }

    fn gaussian(shape: &[usize], sigma: f64) -> ComplexArray {
        let (cy, cx) = ((shape[0] / 2) as f64, (shape[1] / 2) as f64);
        ArrayD::from_shape_fn(IxDyn(shape), |idx| {
            let r2 = (idx[0] as f64 - cy).powi(2) + (idx[1] as f64 - cx).powi(2);
            Complex64::new((-r2 / (2.0 * sigma * sigma)).exp(), 0.0)
        })
    }

    fn max_abs_diff(a: &ComplexArray, b: &ComplexArray) -> f64 {
        assert_eq!(a.shape(), b.shape());
        a.iter()
            .zip(b.iter())
            .fold(0.0, |max, (x, y)| (x - y).norm().max(max))
    }

    #[test]
    fn rejects_bad_geometry() {
        fn cfg(shape: &[usize], batched: bool, padding: Padding) -> Result<Geometry> {
            Geometry::new(shape, PITCH, batched, padding, 0.0)
        }
        assert!(matches!(cfg(&[], false, Padding::None), Err(Error::Config(_))));
        assert!(matches!(cfg(&[2, 8, 8], false, Padding::None), Err(Error::Config(_))));
        assert!(matches!(cfg(&[2, 2, 8, 8], true, Padding::None), Err(Error::Config(_))));
        assert!(matches!(cfg(&[8], true, Padding::None), Err(Error::Config(_))));
        assert!(matches!(cfg(&[8, 0], false, Padding::None), Err(Error::Config(_))));
        assert!(matches!(
            cfg(&[2, 8, 8], true, Padding::Explicit(vec![[1, 1]])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Geometry::new(&[8, 8], vec![1.0, 2.0, 3.0], false, Padding::None, 0.0),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Geometry::new(&[8, 8], -1.0, false, Padding::None, 0.0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn geometry_padding() {
        let g = Geometry::new(&[3, 8, 5], vec![1.0, 2.0], true, Padding::Same, 0.5).unwrap();
        assert_eq!(g.padding(), &[[0, 0], [4, 4], [2, 2]]);
        assert_eq!(g.padded_shape(), &[16, 9]);
        assert_eq!(g.spatial_shape(), &[8, 5]);
        assert_eq!(g.spatial_rank(), 2);
        assert_eq!(g.pitch(), &[1.0, 2.0]);

        let g = Geometry::new(&[8, 5], 1.0, false, Padding::Explicit(vec![[1, 2], [0, 3]]), 0.0)
            .unwrap();
        assert_eq!(g.padding(), &[[1, 2], [0, 3]]);
        assert_eq!(g.padded_shape(), &[11, 8]);
    }

    #[test]
    fn frequency_grid_is_fft_shifted() {
        let geometry = Geometry::new(&[4], 1.0, false, Padding::None, 0.0).unwrap();
        let solver = AngularSpectrumSolver::new(geometry, Arc::new(NdarrayBackend)).unwrap();
        let expected = [0.0, PI * PI / 4.0, PI * PI, PI * PI / 4.0];
        for (&v, &e) in solver.kt2().iter().zip(expected.iter()) {
            assert_abs_diff_eq!(v, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn batched_grid_broadcasts_over_batch() {
        let geometry = Geometry::new(&[3, 8, 6], PITCH, true, Padding::None, 0.0).unwrap();
        let solver = AngularSpectrumSolver::new(geometry, Arc::new(NdarrayBackend)).unwrap();
        assert_eq!(solver.kt2().shape(), &[1, 8, 6]);
        assert_eq!(solver.transfer_function(k(), 10.0).unwrap().shape(), &[1, 8, 6]);
    }

    #[test]
    fn zero_distance_is_identity() {
        let solver = solver(&[32, 24], Padding::None);
        let field = textured(&[32, 24]);
        let out = solver.solve(&field, k(), 0.0).unwrap();
        assert!(max_abs_diff(&out, &field) < 1e-10);
    }

    #[test]
    fn round_trip_recovers_field() {
        // at this distance nothing on the grid is band limited
        let solver = solver(&[64, 64], Padding::None);
        assert_eq!(solver.passband_area(k(), 50.0).unwrap(), 64 * 64);

        let field = textured(&[64, 64]);
        let there = solver.solve(&field, k(), 50.0).unwrap();
        assert!(max_abs_diff(&there, &field) > 1e-3);
        let back = solver.solve(&there, k(), -50.0).unwrap();
        assert!(max_abs_diff(&back, &field) < 1e-9);
    }

    #[test]
    fn round_trip_with_band_limit_and_padding() {
        let solver = solver(&[64, 64], Padding::Same);
        assert!(solver.passband_area(k(), 600.0).unwrap() < 128 * 128);

        // narrow enough spectrum to sit well inside the pass band
        let field = gaussian(&[64, 64], 6.0);
        let there = solver.solve(&field, k(), 600.0).unwrap();
        assert_eq!(there.shape(), &[64, 64]);
        let back = solver.solve(&there, k(), -600.0).unwrap();
        assert!(max_abs_diff(&back, &field) < 1e-5);
    }

    #[test]
    fn mask_shrinks_with_distance() {
        let solver = solver(&[64, 64], Padding::None);
        let areas: Vec<usize> = [0.0, 100.0, 500.0, 1000.0, 2000.0, 5000.0]
            .iter()
            .map(|&z| solver.passband_area(k(), z).unwrap())
            .collect();
        assert_eq!(areas[0], 64 * 64);
        for pair in areas.windows(2) {
            assert!(pair[1] <= pair[0], "{:?}", areas);
        }
        assert!(areas[5] < areas[0]);
        assert_eq!(
            solver.band_limit_mask(k(), -700.0).unwrap(),
            solver.band_limit_mask(k(), 700.0).unwrap()
        );
    }

    #[test]
    fn transfer_function_is_zero_outside_mask() {
        let solver = solver(&[64, 64], Padding::None);
        let mask = solver.band_limit_mask(k(), 1000.0).unwrap();
        let p = solver.propagator(k(), 1000.0).unwrap();
        let tf = solver.transfer_function(k(), 1000.0).unwrap();
        let mut outside = 0;
        for ((&m, &p), &t) in mask.iter().zip(p.iter()).zip(tf.iter()) {
            if m > 0.0 {
                assert_eq!(t, p);
                assert_abs_diff_eq!(t.norm(), 1.0, epsilon = 1e-12);
            } else {
                assert_eq!(t, Complex64::new(0.0, 0.0));
                outside += 1;
            }
        }
        assert!(outside > 0);
    }

    #[test]
    fn evanescent_components_decay() {
        // pitch well below the wavelength so that |kt| exceeds k at high frequencies
        let geometry = Geometry::new(&[16], 0.1, false, Padding::None, 0.0).unwrap();
        let solver = AngularSpectrumSolver::new(geometry, Arc::new(NdarrayBackend)).unwrap();
        let k = 10.0;
        let p = solver.propagator(k, 1.0).unwrap();
        let mut evanescent = 0;
        for (&kt2, &v) in solver.kt2().iter().zip(p.iter()) {
            if kt2 > k * k {
                evanescent += 1;
                assert_eq!(v.im, 0.0);
                assert!(v.re < 1.0 && v.re > 0.0);
            } else {
                assert_abs_diff_eq!(v.norm(), 1.0, epsilon = 1e-12);
            }
        }
        assert!(evanescent > 0);
    }

    #[test]
    fn point_source_spreads_and_refocuses() {
        let n = 512;
        let c = n / 2;
        let solver = solver(&[n, n], Padding::None);
        let mut source = Array2::<Complex64>::zeros((n, n));
        source[[c, c]] = Complex64::new(1.0, 0.0);
        let source = source.into_dyn();

        let out = solver.solve(&source, k(), 300.0).unwrap();
        let amp = out.mapv(|e| e.norm());
        assert!(amp[[c, c]] < 1.0);
        // energy is conserved when nothing is band limited
        assert_abs_diff_eq!(out.iter().map(|e| e.norm_sqr()).sum::<f64>(), 1.0, epsilon = 1e-9);
        // circular symmetry of the diffraction pattern
        for &r in &[5usize, 20, 60] {
            assert_abs_diff_eq!(amp[[c + r, c]], amp[[c, c + r]], epsilon = 1e-9);
            assert_abs_diff_eq!(amp[[c + r, c]], amp[[c - r, c]], epsilon = 1e-9);
        }

        let back = solver.solve(&out, k(), -300.0).unwrap();
        let peak = back
            .indexed_iter()
            .fold((vec![0, 0], 0.0), |best, (idx, e)| {
                if e.norm() > best.1 {
                    (idx.slice().to_vec(), e.norm())
                } else {
                    best
                }
            });
        assert_eq!(peak.0, vec![c, c]);
        assert_abs_diff_eq!(peak.1, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn batched_matches_individual() {
        let geometry = Geometry::new(&[2, 16, 12], PITCH, true, Padding::Same, 0.0).unwrap();
        let batched = AngularSpectrumSolver::new(geometry, Arc::new(NdarrayBackend)).unwrap();
        let single = solver(&[16, 12], Padding::Same);

        let a = textured(&[16, 12]);
        let b = gaussian(&[16, 12], 2.0);
        let stacked = ndarray::stack(Axis(0), &[a.view(), b.view()]).unwrap();

        let out = batched.solve(&stacked, k(), 80.0).unwrap();
        assert_eq!(out.shape(), &[2, 16, 12]);
        let out_a = single.solve(&a, k(), 80.0).unwrap();
        let out_b = single.solve(&b, k(), 80.0).unwrap();
        assert!(max_abs_diff(&out.index_axis(Axis(0), 0).to_owned(), &out_a) < 1e-10);
        assert!(max_abs_diff(&out.index_axis(Axis(0), 1).to_owned(), &out_b) < 1e-10);
    }

    #[test]
    fn rejects_mismatched_input() {
        let solver = solver(&[16, 16], Padding::Same);
        let wrong_rank = textured(&[16, 16]).insert_axis(Axis(0));
        assert!(matches!(
            solver.solve(&wrong_rank, k(), 10.0),
            Err(Error::ShapeMismatch(_))
        ));
        let wrong_shape = textured(&[16, 8]);
        assert!(matches!(
            solver.solve(&wrong_shape, k(), 10.0),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn backends_agree() {
        let geometry = Geometry::new(&[48, 40], PITCH, false, Padding::Same, 0.0).unwrap();
        let cpu = AngularSpectrumSolver::with_backend(geometry.clone(), BackendKind::Cpu).unwrap();
        let par = AngularSpectrumSolver::with_backend(geometry, BackendKind::Parallel).unwrap();

        let field = textured(&[48, 40]);
        for &z in &[0.0, 150.0, -400.0] {
            let a = cpu.solve(&field, k(), z).unwrap();
            let b = par.solve(&field, k(), z).unwrap();
            let scale = a.iter().fold(0.0f64, |max, e| e.norm().max(max));
            assert!(max_abs_diff(&a, &b) <= 1e-4 * scale);
        }
    }

    #[cfg(feature = "gpu")]
    #[test]
    fn accelerator_agrees_with_cpu() {
        let geometry = Geometry::new(&[48, 40], PITCH, false, Padding::Same, 0.0).unwrap();
        let gpu = AngularSpectrumSolver::with_backend(geometry.clone(), BackendKind::Accelerator);
        let gpu = match gpu {
            Ok(solver) => solver,
            Err(e) => {
                println!("skipping, no GPU adapter: {}", e);
                return;
            }
        };
        let cpu = AngularSpectrumSolver::with_backend(geometry, BackendKind::Cpu).unwrap();

        let field = textured(&[48, 40]);
        for &z in &[0.0, 150.0, -400.0] {
            let a = cpu.solve(&field, k(), z).unwrap();
            let b = gpu.solve(&field, k(), z).unwrap();
            let scale = a.iter().fold(0.0f64, |max, e| e.norm().max(max));
            assert!(max_abs_diff(&a, &b) <= 1e-4 * scale);
        }
    }

    #[test]
    fn odd_grid_keeps_zero_frequency_last() {
        let geometry = Geometry::new(&[3], 1.0, false, Padding::None, 0.0).unwrap();
        let solver = AngularSpectrumSolver::new(geometry, Arc::new(NdarrayBackend)).unwrap();
        let f = 2.0 * PI / 3.0;
        let kt2: Vec<f64> = solver.kt2().iter().cloned().collect();
        assert_abs_diff_eq!(kt2[0], f * f, epsilon = 1e-12);
        assert_abs_diff_eq!(kt2[1], f * f, epsilon = 1e-12);
        assert_abs_diff_eq!(kt2[2], 0.0, epsilon = 1e-12);

        // same padding of an odd axis stays odd: 5 + 2 + 2
        let geometry = Geometry::new(&[5, 4], 1.0, false, Padding::Same, 0.0).unwrap();
        assert_eq!(geometry.padded_shape(), &[9, 8]);
        let solver = AngularSpectrumSolver::new(geometry, Arc::new(NdarrayBackend)).unwrap();
        assert_abs_diff_eq!(solver.kt2()[[8, 0]], 0.0, epsilon = 1e-12);
        assert!(solver.kt2()[[0, 0]] > 0.0);
    }

    #[test]
    fn padding_window_is_cropped() {
        let solver = solver(&[8, 8], Padding::Explicit(vec![[3, 1], [2, 2]]));
        let field = textured(&[8, 8]);
        let out = solver.solve(&field, k(), 0.0).unwrap();
        assert_eq!(out.shape(), &[8, 8]);
        assert!(max_abs_diff(&out, &field) < 1e-10);
    }
}
