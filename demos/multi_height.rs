use image::{Rgb, RgbImage};
use log::info;
use ndarray::{ArrayD, ArrayView2, Ix2, IxDyn};
use num_complex::Complex64;
use palette::{Lch, Srgb};
use phase_recovery::simulate::{object_field, simulate_multiple};
use phase_recovery::{MultiHeightPhaseRecovery, RealArray, RecoveryConfig};
use std::ops::ControlFlow;

// planes must be evenly spaced, they are simulated from the first distance and the spacing
const CONFIG: &str = r#"
z_values = [-300.0, -320.0, -340.0, -360.0]
iterations = 40

[propagation]
wavelength = 0.532
pitch = 1.12
padding = "same"
backend = "parallel"
"#;

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cfg: RecoveryConfig = toml::from_str(CONFIG)?;
    let shape = 256;
    let solver = cfg.propagation.build_solver(&[shape, shape])?;
    let k = cfg.propagation.wave_number()?;

    let (amplitude, phase) = generate_cells(shape, 1.12);
    let object = object_field(&amplitude, &phase)?;
    save_complex_image("object.png", view2(&object)?)?;

    let z = -cfg.z_values[0];
    let dz = cfg.z_values[0] - cfg.z_values[1];
    let holograms = simulate_multiple(&solver, &object, k, z, dz, cfg.z_values.len())?;
    for (i, h) in holograms.iter().enumerate() {
        save_real_image(format!("hologram_{}.png", i), view2(h)?, 1.0, true)?;
    }

    let amplitudes: Vec<RealArray> = holograms.iter().map(|h| h.mapv(f64::sqrt)).collect();
    let recovery = MultiHeightPhaseRecovery::new(&solver);
    let recovered = recovery.solve_with(&amplitudes, k, &cfg.z_values, cfg.iterations, |report| {
        if report.iteration % 10 == 0 {
            info!("iteration {} residual {:.4e}", report.iteration, report.residual);
        }
        ControlFlow::Continue(())
    })?;

    save_complex_image("recovered.png", view2(&recovered)?)?;
    let recovered_phase = recovered.mapv(|e| e.arg());
    save_real_image("recovered_phase.png", view2(&recovered_phase)?, 1.0, true)?;
    Ok(())
}

fn view2<T>(arr: &ArrayD<T>) -> Result<ArrayView2<'_, T>, ndarray::ShapeError> {
    arr.view().into_dimensionality::<Ix2>()
}

// 1.0 above the nominal value, with a linear transition one pitch wide straddling it.
fn soft_greater_than(x: f64, x_nominal: f64, pitch: f64) -> f64 {
    if x < x_nominal - 0.5 * pitch {
        0.0
    } else if x > x_nominal + 0.5 * pitch {
        1.0
    } else {
        (x - (x_nominal - 0.5 * pitch)) / pitch
    }
}

// a few weakly absorbing round cells, returned as amplitude and phase in cycles
fn generate_cells(shape: usize, pitch: f64) -> (RealArray, RealArray) {
    let cells = [
        (-30.0, -25.0, 18.0, 0.35),
        (20.0, -10.0, 12.0, 0.25),
        (5.0, 35.0, 22.0, 0.45),
    ];
    let c = (shape / 2) as f64;

    let mut amplitude = ArrayD::from_elem(IxDyn(&[shape, shape]), 1.0);
    let mut phase = ArrayD::zeros(IxDyn(&[shape, shape]));
    for ((idx, a), p) in amplitude.indexed_iter_mut().zip(phase.iter_mut()) {
        let y0 = (idx[0] as f64 - c) * pitch;
        let x0 = (idx[1] as f64 - c) * pitch;
        for &(cy, cx, radius, cycles) in &cells {
            let r = ((y0 - cy).powi(2) + (x0 - cx).powi(2)).sqrt();
            let inside = 1.0 - soft_greater_than(r, radius, pitch);
            *a -= 0.1 * inside;
            *p += cycles * inside;
        }
    }
    (amplitude, phase)
}

pub fn save_real_image<T: AsRef<std::path::Path> + std::fmt::Debug>(
    file_name: T,
    arr: ArrayView2<f64>,
    amp: f64,
    normalise: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if let &[h, w] = arr.shape() {
        let min: f64 = arr.iter().fold(f64::INFINITY, |min, val| val.min(min));
        let mut max: f64 = arr.iter().fold(f64::NEG_INFINITY, |max, val| val.max(max));
        info!("h:{} w:{} min:{} max:{} - {:?}", h, w, min, max, file_name);

        let offset = if normalise { min } else { 0.0 };
        max = if normalise { max - min } else { 1.0 };

        let mut img = RgbImage::new(w as u32, h as u32);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let value = (arr[[y as usize, x as usize]] - offset) / max;
            let value = (value * amp).min(1.0).max(0.0);

            let colour = Srgb::from(Lch::new(value * 70.0, value * 128.0, 280.0 - 245.0 * value));
            *p = Rgb([
                (colour.red * 255.0) as u8,
                (colour.green * 255.0) as u8,
                (colour.blue * 255.0) as u8,
            ]);
        }

        img.save(file_name)?;
    }
    Ok(())
}

pub fn save_complex_image<T: AsRef<std::path::Path> + std::fmt::Debug>(
    file_name: T,
    arr: ArrayView2<Complex64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let &[h, w] = arr.shape() {
        let max_sqr: f64 = arr.iter().fold(0.0, |max, val| val.norm_sqr().max(max));
        info!("h:{} w:{} max_sqr:{} - {:?}", h, w, max_sqr, file_name);

        let max = max_sqr.sqrt();

        let mut img = RgbImage::new(w as u32, h as u32);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let (r, theta) = arr[[y as usize, x as usize]].to_polar();
            let r = r / max;

            let colour = Srgb::from(Lch::new(
                r * 100.0,
                r * 128.0,
                360.0 * (theta / ::std::f64::consts::PI + 1.0) * 0.5,
            ));
            *p = Rgb([
                (colour.red * 255.0) as u8,
                (colour.green * 255.0) as u8,
                (colour.blue * 255.0) as u8,
            ]);
        }

        img.save(file_name)?;
    }
    Ok(())
}
