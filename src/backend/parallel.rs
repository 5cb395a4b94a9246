//! Data parallel backend.
//!
//! Elementwise kernels are split across a rayon thread pool with `Zip::par_map_collect`, and each FFT axis is
//! processed lane-parallel. By default the global pool is used; [`RayonBackend::with_threads`] pins all work to a
//! dedicated pool.

use crate::backend::fft::par_fftn;
use crate::backend::{
    broadcast_pair, broadcast_shape, broadcast_to, Backend, ComplexArray, Comparison, MaskArray,
    RealArray,
};
use crate::error::{Error, Result};
use ndarray::{IxDyn, Zip};
use num_complex::Complex64;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustfft::FftDirection;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct RayonBackend {
    pool: Option<Arc<ThreadPool>>,
}

impl RayonBackend {
    /// Create a backend that dispatches onto the global rayon pool.
    pub fn new() -> Self {
        RayonBackend { pool: None }
    }

    /// Create a backend with its own pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(RayonBackend {
            pool: Some(Arc::new(pool)),
        })
    }

    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl Backend for RayonBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn to_complex(&self, input: &RealArray) -> ComplexArray {
        self.install(|| Zip::from(input).par_map_collect(|&re| Complex64::new(re, 0.0)))
    }

    fn complex(&self, real: &RealArray, imag: &RealArray) -> Result<ComplexArray> {
        let (re, im) = broadcast_pair(real, imag)?;
        Ok(self.install(|| {
            Zip::from(&re)
                .and(&im)
                .par_map_collect(|&re, &im| Complex64::new(re, im))
        }))
    }

    fn abs(&self, input: &ComplexArray) -> RealArray {
        self.install(|| Zip::from(input).par_map_collect(|e| e.norm()))
    }

    fn abs_real(&self, input: &RealArray) -> RealArray {
        self.install(|| Zip::from(input).par_map_collect(|e| e.abs()))
    }

    fn angle(&self, input: &ComplexArray) -> RealArray {
        self.install(|| Zip::from(input).par_map_collect(|e| e.arg()))
    }

    fn exp(&self, input: &ComplexArray) -> ComplexArray {
        self.install(|| Zip::from(input).par_map_collect(|e| e.exp()))
    }

    fn sqrt(&self, input: &RealArray) -> RealArray {
        self.install(|| Zip::from(input).par_map_collect(|e| e.sqrt()))
    }

    fn affine(&self, input: &RealArray, scale: f64, offset: f64) -> RealArray {
        self.install(|| Zip::from(input).par_map_collect(|&e| scale * e + offset))
    }

    fn multiply(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(self.install(|| Zip::from(&x).and(&y).par_map_collect(|&a, &b| a * b)))
    }

    fn multiply_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(self.install(|| Zip::from(&x).and(&y).par_map_collect(|&a, &b| a * b)))
    }

    fn subtract_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(self.install(|| Zip::from(&x).and(&y).par_map_collect(|&a, &b| a - b)))
    }

    fn divide(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(self.install(|| Zip::from(&x).and(&y).par_map_collect(|&a, &b| a / b)))
    }

    fn compare(&self, input: &RealArray, comparison: Comparison, threshold: f64) -> MaskArray {
        self.install(|| Zip::from(input).par_map_collect(|&e| comparison.holds(e, threshold)))
    }

    fn logical_and(&self, x: &MaskArray, y: &MaskArray) -> Result<MaskArray> {
        let (x, y) = broadcast_pair(x, y)?;
        Ok(self.install(|| Zip::from(&x).and(&y).par_map_collect(|&a, &b| a && b)))
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
        Ok(self.install(|| {
            Zip::from(&condition)
                .and(&x)
                .and(&y)
                .par_map_collect(|&c, &a, &b| if c { a } else { b })
        }))
    }

    fn select_real(&self, condition: &MaskArray, x: f64, y: f64) -> RealArray {
        self.install(|| Zip::from(condition).par_map_collect(|&c| if c { x } else { y }))
    }

    fn fft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray> {
        self.install(|| par_fftn(input.clone(), rank, FftDirection::Forward))
    }

    fn ifft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray> {
        self.install(|| par_fftn(input.clone(), rank, FftDirection::Inverse))
    }
}
