//! Single threaded backend built directly on ndarray and rustfft.

use crate::backend::fft::fftn;
use crate::backend::{
    broadcast_pair, broadcast_shape, broadcast_to, Backend, ComplexArray, Comparison, MaskArray,
    RealArray,
};
use crate::error::Result;
use ndarray::{IxDyn, Zip};
use num_complex::Complex64;
use rustfft::FftDirection;

/// Stateless CPU backend. Every kernel runs on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct NdarrayBackend;

impl Backend for NdarrayBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn to_complex(&self, input: &RealArray) -> ComplexArray {
        input.mapv(|re| Complex64::new(re, 0.0))
    }

    fn complex(&self, real: &RealArray, imag: &RealArray) -> Result<ComplexArray> {
        let (re, im) = broadcast_pair(real, imag)?;
        Ok(Zip::from(&re)
            .and(&im)
            .map_collect(|&re, &im| Complex64::new(re, im)))
    }

    fn abs(&self, input: &ComplexArray) -> RealArray {
        input.mapv(|e| e.norm())
    }

    fn abs_real(&self, input: &RealArray) -> RealArray {
        input.mapv(f64::abs)
    }

    fn angle(&self, input: &ComplexArray) -> RealArray {
        input.mapv(|e| e.arg())
    }

    fn exp(&self, input: &ComplexArray) -> ComplexArray {
        input.mapv(|e| e.exp())
    }

    fn sqrt(&self, input: &RealArray) -> RealArray {
        input.mapv(f64::sqrt)
    }

    fn affine(&self, input: &RealArray, scale: f64, offset: f64) -> RealArray {
        input.mapv(|e| scale * e + offset)
    }

    fn multiply(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(Zip::from(&x).and(&y).map_collect(|&a, &b| a * b))
    }

    fn multiply_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(Zip::from(&x).and(&y).map_collect(|&a, &b| a * b))
    }

    fn subtract_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(Zip::from(&x).and(&y).map_collect(|&a, &b| a - b))
    }

    fn divide(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(Zip::from(&x).and(&y).map_collect(|&a, &b| a / b))
    }

    fn compare(&self, input: &RealArray, comparison: Comparison, threshold: f64) -> MaskArray {
        input.mapv(|e| comparison.holds(e, threshold))
    }

    fn logical_and(&self, x: &MaskArray, y: &MaskArray) -> Result<MaskArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(Zip::from(&x).and(&y).map_collect(|&a, &b| a && b))
    }

    fn select(
        &self,
        condition: &MaskArray,
        x: &ComplexArray,
        y: &ComplexArray,
    ) -> Result<ComplexArray> {
        let shape = IxDyn(&broadcast_shape(&[condition.shape(), x.shape(), y.shape()])?);
        let condition = broadcast_to(condition, &shape)?;
        let x = broadcast_to(x, &shape)?;
        let y = broadcast_to(y, &shape)?;
        Ok(Zip::from(&condition)
            .and(&x)
            .and(&y)
            .map_collect(|&c, &a, &b| if c { a } else { b }))
    }

    fn select_real(&self, condition: &MaskArray, x: f64, y: f64) -> RealArray {
        condition.mapv(|c| if c { x } else { y })
    }

    fn fft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray> {
        fftn(input.clone(), rank, FftDirection::Forward)
    }

    fn ifft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray> {
        fftn(input.clone(), rank, FftDirection::Inverse)
    }
}
