//! GPU backend on wgpu compute shaders.
//!
//! The complex elementwise kernels (`multiply`, `divide`, `exp`, `abs`, `angle`) are dispatched to the adapter and
//! computed in `f32`. FFTs, real valued grid arithmetic and masking stay on the host in `f64`. Phases passed to
//! `exp` are wrapped into `[-π, π)` on the host before upload, since propagation exponents reach thousands of
//! radians.
//!
//! A kernel that fails on the device is logged and recomputed on the host, so elementwise results are always
//! returned.

use crate::backend::{
    broadcast_pair, Backend, ComplexArray, Comparison, MaskArray, NdarrayBackend, RealArray,
};
use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use ndarray::{ArrayD, ArrayViewD};
use num_complex::Complex64;
use std::borrow::Cow;
use std::f64::consts::PI;
use std::fmt;
use std::sync::mpsc;

const WORKGROUP_SIZE: u32 = 256;

/// Kernel selector, matching the `switch` in `shaders/elementwise.wgsl`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kernel {
    Multiply = 0,
    Divide = 1,
    Exp = 2,
    Abs = 3,
    Angle = 4,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct KernelParams {
    kernel: u32,
    len: u32,
    _pad0: u32,
    _pad1: u32,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    adapter_name: String,
    host: NdarrayBackend,
}

impl fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter_name)
            .finish()
    }
}

impl WgpuBackend {
    /// Open the highest performance adapter available and compile the kernels.
    pub async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| Error::Unavailable("no GPU adapter found".to_string()))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("phase_recovery"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| Error::Unavailable(format!("cannot open {}: {}", adapter_name, e)))?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("elementwise"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "shaders/elementwise.wgsl"
            ))),
        });

        let buffer_entry = |binding: u32, ty: wgpu::BufferBindingType| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("elementwise"),
            entries: &[
                buffer_entry(0, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_entry(2, wgpu::BufferBindingType::Storage { read_only: false }),
                buffer_entry(3, wgpu::BufferBindingType::Uniform),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("elementwise"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("elementwise"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        debug!("wgpu backend opened on {}", adapter_name);
        Ok(WgpuBackend {
            device,
            queue,
            pipeline,
            bind_group_layout,
            adapter_name,
            host: NdarrayBackend,
        })
    }

    /// Blocking wrapper around [`WgpuBackend::new_async`].
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn dispatch(
        &self,
        kernel: Kernel,
        lhs: &[[f32; 2]],
        rhs: Option<&[[f32; 2]]>,
    ) -> Result<Vec<[f32; 2]>> {
        let len = lhs.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        let limits = self.device.limits();
        let bytes = (len * std::mem::size_of::<[f32; 2]>()) as u64;
        let groups = (len as u64 + WORKGROUP_SIZE as u64 - 1) / WORKGROUP_SIZE as u64;
        if bytes > limits.max_storage_buffer_binding_size as u64
            || groups > limits.max_compute_workgroups_per_dimension as u64
        {
            return Err(Error::Unavailable(format!(
                "{} elements do not fit a single dispatch on {}",
                len, self.adapter_name
            )));
        }

        let input_buffer = |label: &str, data: &[[f32; 2]]| {
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(data));
            buffer
        };
        let lhs_buffer = input_buffer("lhs", lhs);
        let rhs_buffer = rhs.map(|rhs| input_buffer("rhs", rhs));
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dst"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params = KernelParams {
            kernel: kernel as u32,
            len: len as u32,
            _pad0: 0,
            _pad1: 0,
        };
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        // unary kernels read the lhs buffer through both bindings
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("elementwise"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lhs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: rhs_buffer.as_ref().unwrap_or(&lhs_buffer).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("elementwise"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("elementwise"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups as u32, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        let readback_error = |e: &dyn fmt::Display| {
            Error::Unavailable(format!("readback from {}: {}", self.adapter_name, e))
        };
        receiver
            .recv()
            .map_err(|e| readback_error(&e))?
            .map_err(|e| readback_error(&e))?;

        let output = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, [f32; 2]>(&data).to_vec()
        };
        staging_buffer.unmap();
        Ok(output)
    }

    fn complex_kernel(
        &self,
        kernel: Kernel,
        x: ArrayViewD<Complex64>,
        y: Option<ArrayViewD<Complex64>>,
    ) -> Result<ComplexArray> {
        let lhs = to_device(x.iter());
        let rhs = y.map(|y| to_device(y.iter()));
        let output = self.dispatch(kernel, &lhs, rhs.as_deref())?;
        let values = output
            .into_iter()
            .map(|[re, im]| Complex64::new(re as f64, im as f64))
            .collect();
        Ok(ArrayD::from_shape_vec(x.raw_dim(), values)?)
    }

    fn real_kernel(&self, kernel: Kernel, x: &ComplexArray) -> Result<RealArray> {
        Ok(self.complex_kernel(kernel, x.view(), None)?.mapv(|e| e.re))
    }

    fn on_host<T>(&self, kernel: Kernel, error: Error, host: impl FnOnce() -> T) -> T {
        warn!(
            "{:?} kernel failed on {}, computing on the host: {}",
            kernel, self.adapter_name, error
        );
        host()
    }
}

fn to_device<'a>(values: impl Iterator<Item = &'a Complex64>) -> Vec<[f32; 2]> {
    values.map(|c| [c.re as f32, c.im as f32]).collect()
}

/// Wrap a phase into `[-π, π)`.
fn wrap_phase(phase: f64) -> f64 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

impl Backend for WgpuBackend {
    fn name(&self) -> &'static str {
        "accelerator"
    }

    fn to_complex(&self, input: &RealArray) -> ComplexArray {
        self.host.to_complex(input)
    }

    fn complex(&self, real: &RealArray, imag: &RealArray) -> Result<ComplexArray> {
        self.host.complex(real, imag)
    }

    fn abs(&self, input: &ComplexArray) -> RealArray {
        self.real_kernel(Kernel::Abs, input)
            .unwrap_or_else(|e| self.on_host(Kernel::Abs, e, || self.host.abs(input)))
    }

    fn abs_real(&self, input: &RealArray) -> RealArray {
        self.host.abs_real(input)
    }

    fn angle(&self, input: &ComplexArray) -> RealArray {
        self.real_kernel(Kernel::Angle, input)
            .unwrap_or_else(|e| self.on_host(Kernel::Angle, e, || self.host.angle(input)))
    }

    fn exp(&self, input: &ComplexArray) -> ComplexArray {
        let wrapped = input.mapv(|e| Complex64::new(e.re, wrap_phase(e.im)));
        self.complex_kernel(Kernel::Exp, wrapped.view(), None)
            .unwrap_or_else(|e| self.on_host(Kernel::Exp, e, || self.host.exp(input)))
    }

    fn sqrt(&self, input: &RealArray) -> RealArray {
        self.host.sqrt(input)
    }

    fn affine(&self, input: &RealArray, scale: f64, offset: f64) -> RealArray {
        self.host.affine(input, scale, offset)
    }

    fn multiply(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray> {
        let (xv, yv) = broadcast_pair(x, y)?;
        self.complex_kernel(Kernel::Multiply, xv, Some(yv))
            .or_else(|e| self.on_host(Kernel::Multiply, e, || self.host.multiply(x, y)))
    }

    fn multiply_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray> {
        self.host.multiply_real(x, y)
    }

    fn subtract_real(&self, x: &RealArray, y: &RealArray) -> Result<RealArray> {
        self.host.subtract_real(x, y)
    }

    fn divide(&self, x: &ComplexArray, y: &ComplexArray) -> Result<ComplexArray> {
        let (xv, yv) = broadcast_pair(x, y)?;
        self.complex_kernel(Kernel::Divide, xv, Some(yv))
            .or_else(|e| self.on_host(Kernel::Divide, e, || self.host.divide(x, y)))
    }

    fn compare(&self, input: &RealArray, comparison: Comparison, threshold: f64) -> MaskArray {
        self.host.compare(input, comparison, threshold)
    }

    fn logical_and(&self, x: &MaskArray, y: &MaskArray) -> Result<MaskArray> {
        self.host.logical_and(x, y)
    }

    fn select(
        &self,
        condition: &MaskArray,
        x: &ComplexArray,
        y: &ComplexArray,
    ) -> Result<ComplexArray> {
        self.host.select(condition, x, y)
    }

    fn select_real(&self, condition: &MaskArray, x: f64, y: f64) -> RealArray {
        self.host.select_real(condition, x, y)
    }

    fn fft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray> {
        self.host.fft(input, rank)
    }

    fn ifft(&self, input: &ComplexArray, rank: usize) -> Result<ComplexArray> {
        self.host.ifft(input, rank)
    }
}
