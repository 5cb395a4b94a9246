//! Numeric backends.
//!
//! The propagation solver and phase recovery are written against the [`Backend`] trait only. Layout operations
//! (padding, stacking, meshgrids, reductions) have shared default implementations; elementwise kernels and FFTs
//! are provided by each backend and differ only in where and how the work is executed.

use crate::error::{Error, Result};
use ndarray::{concatenate, stack, Array1, ArrayD, ArrayViewD, Axis, Dimension, IxDyn, Slice, Zip};
use num_complex::Complex64;
use serde::Deserialize;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "gpu")]
pub mod accelerator;
pub mod cpu;
pub mod fft;
pub mod parallel;

#[cfg(feature = "gpu")]
pub use accelerator::WgpuBackend;
pub use cpu::NdarrayBackend;
pub use parallel::RayonBackend;

pub type RealArray = ArrayD<f64>;
pub type ComplexArray = ArrayD<Complex64>;
pub type MaskArray = ArrayD<bool>;

/// Selects one of the built in backends.
///
/// | Kind | Backend | Feature |
/// |---|---|---|
/// | `cpu` | [`NdarrayBackend`] | always |
/// | `parallel` | [`RayonBackend`] | always |
/// | `accelerator` | `WgpuBackend` | `gpu` |
///
/// Names are matched case insensitively, in configuration files as well as through [`FromStr`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum BackendKind {
    /// Single threaded ndarray kernels.
    Cpu,
    /// Data parallel kernels dispatched over a rayon thread pool.
    Parallel,
    /// wgpu compute kernels on a GPU adapter.
    Accelerator,
}

impl BackendKind {
    /// Instantiate the backend.
    ///
    /// Fails with [`Error::NotImplemented`] for `Accelerator` when the crate is built without the `gpu` feature,
    /// and with [`Error::Unavailable`] when no adapter can be opened.
    pub fn create(self) -> Result<Arc<dyn Backend>> {
        match self {
            BackendKind::Cpu => Ok(Arc::new(NdarrayBackend)),
            BackendKind::Parallel => Ok(Arc::new(RayonBackend::new())),
            #[cfg(feature = "gpu")]
            BackendKind::Accelerator => Ok(Arc::new(WgpuBackend::new_blocking()?)),
            #[cfg(not(feature = "gpu"))]
            BackendKind::Accelerator => Err(Error::NotImplemented(
                "the accelerator backend requires the `gpu` feature".to_string(),
            )),
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Cpu
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "parallel" => Ok(BackendKind::Parallel),
            "accelerator" => Ok(BackendKind::Accelerator),
            other => Err(Error::NotImplemented(format!("unknown backend '{}'", other))),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::Parallel => write!(f, "parallel"),
            BackendKind::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Elementwise comparison against a scalar threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Less => value < threshold,
            Comparison::LessEqual => value <= threshold,
            Comparison::Greater => value > threshold,
            Comparison::GreaterEqual => value >= threshold,
        }
    }
}

/// Array operations required by the solver and phase recovery.
///
/// All operations are pure: inputs are borrowed and new arrays are returned. Implementations must agree on
/// numerical results to floating point tolerance.
pub trait Backend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    // creation

    fn zeros(&self, shape: &[usize]) -> RealArray {
        ArrayD::zeros(IxDyn(shape))
    }

    fn zeros_like(&self, input: &RealArray) -> RealArray {
        ArrayD::zeros(input.raw_dim())
    }

    fn complex_zeros(&self, shape: &[usize]) -> ComplexArray {
        ArrayD::zeros(IxDyn(shape))
    }

    fn complex_zeros_like(&self, input: &ComplexArray) -> ComplexArray {
        ArrayD::zeros(input.raw_dim())
    }

    /// `num` evenly spaced samples over the closed interval `[start, stop]`.
    fn linspace(&self, start: f64, stop: f64, num: usize) -> RealArray {
        Array1::linspace(start, stop, num).into_dyn()
    }

    /// Coordinate grids with matrix ("ij") indexing, one per 1-D input.
    fn meshgrid(&self, axes: &[RealArray]) -> Result<Vec<RealArray>> {
        if let Some(axis) = axes.iter().find(|a| a.ndim() != 1) {
            return Err(Error::ShapeMismatch(format!(
                "meshgrid expects 1-D inputs, got shape {:?}",
                axis.shape()
            )));
        }
        let shape: Vec<usize> = axes.iter().map(|a| a.len()).collect();
        Ok(axes
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let values: Vec<f64> = a.iter().cloned().collect();
                ArrayD::from_shape_fn(IxDyn(&shape), |idx| values[idx[i]])
            })
            .collect())
    }

    /// Stacks equally shaped arrays along a new leading axis.
    fn convert(&self, parts: &[RealArray]) -> Result<RealArray> {
        let views: Vec<ArrayViewD<f64>> = parts.iter().map(|p| p.view()).collect();
        Ok(stack(Axis(0), &views)?)
    }

    /// Casts a real array to complex with zero imaginary part.
    fn to_complex(&self, input: &RealArray) -> ComplexArray;

    fn complex(&self, real: &RealArray, imag: &RealArray) -> Result<ComplexArray>;

    // layout

    fn expand_dim(&self, input: &RealArray, axis: usize) -> Result<RealArray> {
        if axis > input.ndim() {
            return Err(Error::ShapeMismatch(format!(
                "cannot insert axis {} into an array with {} axes",
                axis,
                input.ndim()
            )));
        }
        Ok(input.clone().insert_axis(Axis(axis)))
    }

    /// Repeats every element `repeats` times along `axis`, like `numpy.repeat`.
    fn repeat(&self, input: &ComplexArray, repeats: usize, axis: usize) -> Result<ComplexArray> {
        check_axis(input.ndim(), axis)?;
        if repeats == 0 || input.len_of(Axis(axis)) == 0 {
            let mut shape = input.shape().to_vec();
            shape[axis] *= repeats;
            return Ok(ArrayD::zeros(IxDyn(&shape)));
        }
        let views: Vec<_> = input
            .axis_iter(Axis(axis))
            .flat_map(|sub| std::iter::repeat(sub).take(repeats))
            .map(|sub| sub.insert_axis(Axis(axis)))
            .collect();
        Ok(concatenate(Axis(axis), &views)?)
    }

    /// Pads every axis with `[before, after]` samples of a constant fill value.
    fn pad(
        &self,
        input: &ComplexArray,
        padding: &[[usize; 2]],
        fill: Complex64,
    ) -> Result<ComplexArray> {
        check_padding_rank(input.ndim(), padding)?;
        let shape: Vec<usize> = input
            .shape()
            .iter()
            .zip(padding)
            .map(|(&s, p)| s + p[0] + p[1])
            .collect();
        let mut out = ArrayD::from_elem(IxDyn(&shape), fill);
        {
            let mut view = out.view_mut();
            for (axis, (p, &s)) in padding.iter().zip(input.shape()).enumerate() {
                view.slice_axis_inplace(Axis(axis), Slice::from(p[0]..p[0] + s));
            }
            view.assign(input);
        }
        Ok(out)
    }

    /// Removes `[before, after]` samples from every axis, inverting [`Backend::pad`].
    fn unpad(&self, input: &ComplexArray, padding: &[[usize; 2]]) -> Result<ComplexArray> {
        check_padding_rank(input.ndim(), padding)?;
        let mut view = input.view();
        for (axis, (p, &s)) in padding.iter().zip(input.shape()).enumerate() {
            if p[0] + p[1] > s {
                return Err(Error::ShapeMismatch(format!(
                    "cannot remove {:?} samples from axis {} of length {}",
                    p, axis, s
                )));
            }
            view.slice_axis_inplace(Axis(axis), Slice::from(p[0]..s - p[1]));
        }
        Ok(view.to_owned())
    }

    fn fftshift(&self, input: &RealArray) -> RealArray {
        fft::fftshift(input.clone())
    }

    /// Values of `input` where `mask` is set, flattened in logical order.
    fn boolean_mask(&self, input: &RealArray, mask: &MaskArray) -> Result<RealArray> {
        if input.shape() != mask.shape() {
            return Err(Error::ShapeMismatch(format!(
                "mask of shape {:?} does not match array of shape {:?}",
                mask.shape(),
                input.shape()
            )));
        }
        let mut values = Vec::new();
        Zip::from(input).and(mask).for_each(|&v, &m| {
            if m {
                values.push(v)
            }
        });
        Ok(Array1::from(values).into_dyn())
    }

    // reductions

    fn reduce_sum(&self, input: &RealArray, axis: usize) -> Result<RealArray> {
        check_axis(input.ndim(), axis)?;
        Ok(input.sum_axis(Axis(axis)))
    }

    fn total(&self, input: &RealArray) -> f64 {
        input.sum()
    }

    /// Largest element, or negative infinity for an empty array.
    fn reduce_max(&self, input: &RealArray) -> f64 {
        input.iter().fold(f64::NEG_INFINITY, |max, &v| v.max(max))
    }

    // elementwise

    fn abs(&self, input: &ComplexArray) -> RealArray;
    fn abs_real(&self, input: &RealArray) -> RealArray;
    fn angle(&self, input: &ComplexArray) -> RealArray;
    fn exp(&self, input: &ComplexArray) -> ComplexArray;
    fn sqrt(&self, input: &RealArray) -> RealArray;

    /// `scale * x + offset`
    fn affine(&self, input: &RealArray, scale: f64, offset: f64) -> RealArray;

    fn multiply(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray>;
    fn multiply_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray>;
    fn subtract_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray>;
    fn divide(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray>;

    // comparison and selection

    fn compare(&self, input: &RealArray, comparison: Comparison, threshold: f64) -> MaskArray;
    fn logical_and(&self, x: &MaskArray, y: &MaskArray) -> Result<MaskArray>;

    /// Picks `x` where `condition` is set and `y` elsewhere.
    fn select(
        &self,
        condition: &MaskArray,
        x: &ComplexArray,
        y: &ComplexArray,
    ) -> Result<ComplexArray>;

    /// Scalar form of [`Backend::select`], e.g. turning a mask into 0/1 weights.
    fn select_real(&self, condition: &MaskArray, x: f64, y: f64) -> RealArray;

    // spectral

    /// Forward FFT over the trailing `rank` axes.
    fn fft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray>;

    /// Inverse FFT over the trailing `rank` axes, scaled by 1/N.
    fn ifft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray>;
}

fn check_axis(ndim: usize, axis: usize) -> Result<()> {
    if axis >= ndim {
        return Err(Error::ShapeMismatch(format!(
            "axis {} out of range for an array with {} axes",
            axis, ndim
        )));
    }
    Ok(())
}

fn check_padding_rank(ndim: usize, padding: &[[usize; 2]]) -> Result<()> {
    if padding.len() != ndim {
        return Err(Error::ShapeMismatch(format!(
            "padding has {} entries but the array has {} axes",
            padding.len(),
            ndim
        )));
    }
    Ok(())
}

/// Shape that all of `shapes` broadcast to under numpy rules.
pub(crate) fn broadcast_shape(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1; ndim];
    for shape in shapes {
        let offset = ndim - shape.len();
        for (i, &s) in shape.iter().enumerate() {
            let o = &mut out[offset + i];
            if *o == 1 {
                *o = s;
            } else if s != 1 && s != *o {
                return Err(Error::ShapeMismatch(format!(
                    "shapes {:?} cannot be broadcast together",
                    shapes
                )));
            }
        }
    }
    Ok(out)
}

/// View of `input` broadcast to `shape`.
pub(crate) fn broadcast_to<'a, A>(
    input: &'a ArrayD<A>,
    shape: &IxDyn,
) -> Result<ArrayViewD<'a, A>> {
    input.broadcast(shape.clone()).ok_or_else(|| {
        Error::ShapeMismatch(format!(
            "shape {:?} cannot be broadcast to {:?}",
            input.shape(),
            shape.slice()
        ))
    })
}

/// Broadcast views of `x` and `y` over their common shape.
pub(crate) fn broadcast_pair<'a, A, B>(
    x: &'a ArrayD<A>,
    y: &'a ArrayD<B>,
) -> Result<(ArrayViewD<'a, A>, ArrayViewD<'a, B>)> {
    let shape = IxDyn(&broadcast_shape(&[x.shape(), y.shape()])?);
    Ok((broadcast_to(x, &shape)?, broadcast_to(y, &shape)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("CPU".parse::<BackendKind>().unwrap(), BackendKind::Cpu);
        assert_eq!(
            "accelerator".parse::<BackendKind>().unwrap(),
            BackendKind::Accelerator
        );
        assert!(matches!(
            "tensorflow".parse::<BackendKind>(),
            Err(Error::NotImplemented(_))
        ));
        assert_eq!("Parallel".parse::<BackendKind>().unwrap(), BackendKind::Parallel);
        assert_eq!(BackendKind::Cpu.create().unwrap().name(), "cpu");
        assert_eq!(BackendKind::Parallel.create().unwrap().name(), "parallel");
        for kind in [BackendKind::Cpu, BackendKind::Parallel, BackendKind::Accelerator].iter() {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), *kind);
        }
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn accelerator_needs_gpu_feature() {
        assert!(matches!(
            BackendKind::Accelerator.create(),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn broadcast_rules() {
        assert_eq!(broadcast_shape(&[&[3, 4, 5], &[4, 5]]).unwrap(), vec![3, 4, 5]);
        assert_eq!(broadcast_shape(&[&[1, 5], &[4, 1]]).unwrap(), vec![4, 5]);
        assert!(broadcast_shape(&[&[3, 4], &[3]]).is_err());
    }

    #[test]
    fn pad_then_unpad() {
        let backend = NdarrayBackend;
        let input = array![[c(1.), c(2.)], [c(3.), c(4.)]].into_dyn();
        let padding = [[1, 0], [2, 1]];
        let padded = backend.pad(&input, &padding, c(9.)).unwrap();
        assert_eq!(padded.shape(), &[3, 5]);
        assert_eq!(padded[[0, 0]], c(9.));
        assert_eq!(padded[[1, 2]], c(1.));
        assert_eq!(padded[[2, 3]], c(4.));
        assert_eq!(padded[[2, 4]], c(9.));
        assert_eq!(backend.unpad(&padded, &padding).unwrap(), input);

        assert!(matches!(
            backend.pad(&input, &[[1, 1]], c(0.)),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn repeat_matches_numpy() {
        let backend = NdarrayBackend;
        let input = array![[c(1.), c(2.)], [c(3.), c(4.)]].into_dyn();
        let out = backend.repeat(&input, 2, 0).unwrap();
        assert_eq!(
            out,
            array![[c(1.), c(2.)], [c(1.), c(2.)], [c(3.), c(4.)], [c(3.), c(4.)]].into_dyn()
        );
        assert_eq!(backend.repeat(&input, 0, 1).unwrap().shape(), &[2, 0]);
    }

    #[test]
    fn meshgrid_stack_and_reduce() {
        let backend = NdarrayBackend;
        let a = backend.linspace(0., 2., 3);
        let b = backend.linspace(10., 20., 2);
        let grids = backend.meshgrid(&[a, b]).unwrap();
        assert_eq!(grids[0], array![[0., 0.], [1., 1.], [2., 2.]].into_dyn());
        assert_eq!(grids[1], array![[10., 20.], [10., 20.], [10., 20.]].into_dyn());

        let stacked = backend.convert(&grids).unwrap();
        assert_eq!(stacked.shape(), &[2, 3, 2]);
        let summed = backend.reduce_sum(&stacked, 0).unwrap();
        assert_eq!(summed, array![[10., 20.], [11., 21.], [12., 22.]].into_dyn());
        assert_eq!(backend.total(&summed), 96.);
        assert_eq!(backend.reduce_max(&summed), 22.);

        let expanded = backend.expand_dim(&summed, 0).unwrap();
        assert_eq!(expanded.shape(), &[1, 3, 2]);
        assert!(backend.expand_dim(&summed, 3).is_err());
    }

    #[test]
    fn boolean_mask_collects_selected() {
        let backend = NdarrayBackend;
        let input = array![[1., 2.], [3., 4.]].into_dyn();
        let mask = backend.compare(&input, Comparison::Greater, 1.5);
        let picked = backend.boolean_mask(&input, &mask).unwrap();
        assert_eq!(picked, array![2., 3., 4.].into_dyn());
    }
}
