use crate::backend::ComplexArray;
use crate::error::{Error, Result};
use ndarray::parallel::prelude::{IntoParallelIterator, ParallelIterator};
use ndarray::{ArrayD, ArrayViewMut1, ArrayViewMutD, Axis, Zip};
use num_complex::Complex64;
use rustfft::num_traits::Zero;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;
use unchecked_index::get_unchecked_mut;

/// Returns the axes transformed by an FFT of the given rank: the trailing `rank` axes of an array with `ndim` axes.
///
/// Ranks 1 and 2 map to the 1-D and 2-D transforms, ranks of 3 or more to an N-D transform over the trailing axes.
pub fn transform_axes(ndim: usize, rank: usize) -> Result<std::ops::Range<usize>> {
    if rank == 0 {
        return Err(Error::NotImplemented(
            "FFT rank must be 1, 2 or at least 3".to_string(),
        ));
    }
    if rank > ndim {
        return Err(Error::ShapeMismatch(format!(
            "FFT of rank {} requested for an array with {} axes",
            rank, ndim
        )));
    }
    Ok(ndim - rank..ndim)
}

/// Forward (unnormalised) or inverse (scaled by 1/N) FFT over the trailing `rank` axes.
///
/// Lanes are transformed one after another on the calling thread.
pub fn fftn(mut input: ComplexArray, rank: usize, direction: FftDirection) -> Result<ComplexArray> {
    let axes = transform_axes(input.ndim(), rank)?;
    let mut planner = FftPlanner::new();
    for axis in axes {
        let len = input.len_of(Axis(axis));
        let fft = planner.plan_fft(len, direction);
        transform_lanes(input.view_mut(), axis, &fft, normalisation(len, direction));
    }
    Ok(input)
}

/// As [`fftn`], but the lanes of each axis are distributed over the rayon thread pool.
pub fn par_fftn(
    mut input: ComplexArray,
    rank: usize,
    direction: FftDirection,
) -> Result<ComplexArray> {
    let axes = transform_axes(input.ndim(), rank)?;
    let mut planner = FftPlanner::new();
    for axis in axes {
        let len = input.len_of(Axis(axis));
        let fft = planner.plan_fft(len, direction);
        par_transform_lanes(input.view_mut(), axis, &fft, normalisation(len, direction));
    }
    Ok(input)
}

fn normalisation(len: usize, direction: FftDirection) -> f64 {
    match direction {
        FftDirection::Forward => 1.0,
        FftDirection::Inverse => 1.0 / len as f64,
    }
}

fn transform_lanes(
    mut input: ArrayViewMutD<Complex64>,
    axis: usize,
    fft: &Arc<dyn Fft<f64>>,
    normalisation: f64,
) {
    let len = input.len_of(Axis(axis));
    let mut buffer = vec![Complex64::zero(); len];
    let mut scratch = vec![Complex64::zero(); fft.get_inplace_scratch_len()];
    for lane in input.lanes_mut(Axis(axis)) {
        transform_lane(lane, fft, &mut buffer, &mut scratch, normalisation);
    }
}

fn par_transform_lanes(
    mut input: ArrayViewMutD<Complex64>,
    axis: usize,
    fft: &Arc<dyn Fft<f64>>,
    normalisation: f64,
) {
    let len = input.len_of(Axis(axis));
    Zip::from(input.lanes_mut(Axis(axis)))
        .into_par_iter()
        .for_each_init(
            || {
                (
                    vec![Complex64::zero(); len],
                    vec![Complex64::zero(); fft.get_inplace_scratch_len()],
                )
            },
            |(buffer, scratch), lane| {
                transform_lane(lane.0, fft, buffer, scratch, normalisation);
            },
        );
}

// lanes are generally strided, so gather into a contiguous buffer and scatter back
fn transform_lane(
    mut lane: ArrayViewMut1<Complex64>,
    fft: &Arc<dyn Fft<f64>>,
    buffer: &mut Vec<Complex64>,
    scratch: &mut Vec<Complex64>,
    normalisation: f64,
) {
    debug_assert_eq!(lane.len(), buffer.len());
    unsafe {
        for (k, &e) in lane.iter().enumerate() {
            *get_unchecked_mut(buffer.as_mut_slice(), k) = e;
        }
    }

    fft.process_with_scratch(buffer, scratch);

    unsafe {
        for (k, e) in lane.iter_mut().enumerate() {
            *e = *buffer.get_unchecked(k) * normalisation;
        }
    }
}

/// Moves the origin of every axis to the "center" (N/2), matching `numpy.fft.fftshift`.
pub fn fftshift<T: Copy>(mut input: ArrayD<T>) -> ArrayD<T> {
    for axis in 0..input.ndim() {
        for lane in input.lanes_mut(Axis(axis)) {
            fft_shift_inplace(lane);
        }
    }
    input
}

/// Moves the origin (0) to the "center" of the array (N/2)
///
/// For even array lengths, which have no center value, this moves the value to the next value after the center
pub fn fft_shift_inplace<T: Copy>(mut input: ArrayViewMut1<T>) {
    if input.len() % 2 == 0 {
        return fft_shift_even(input);
    }

    let len = input.len();
    let half = len / 2;

    let mut i = input.len();
    let mut j = half;
    let mut temp1 = input[half];
    for _ in 0..half {
        i -= 1;
        j -= 1;
        std::mem::swap(&mut temp1, &mut input[i]);

        std::mem::swap(&mut temp1, &mut input[j]);
    }
    input[half] = temp1;
}

fn fft_shift_even<T: Copy>(mut input: ArrayViewMut1<T>) {
    let half = input.len() / 2;
    for i in 0..half {
        input.swap(i, i + half);
    }
}
