//! GPU kernels using WGPU.
//!
//! Every [`KernelDescriptor`] is turned into its own WGSL compute shader with
//! the layer widths written into the source as constants, so a compiled
//! pipeline only ever serves one layer of one topology. This is why kernels
//! are rebuilt whenever the topology changes.
//!
//! Host tensors are `f64`; they are narrowed to `f32` when uploaded and
//! widened again when results are read back.
//!
//! One shader invocation computes one output element (one weight for the
//! update kernel). Invocations of the same dispatch never share writes.

use std::borrow::Cow;
use std::sync::mpsc;

use wgpu::util::DeviceExt;

use super::{KernelDescriptor, KernelKind};
use crate::error::{NetworkError, Result};

const WORKGROUP_SIZE: usize = 64;

/// Upper bound on generated shader size.
const MAX_SHADER_LEN: usize = 65536;

/// Holds the WGPU device and queue used for executing compute pipelines.
///
/// Initialized once globally and reused by every kernel via `lazy_static`.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The queue kernels are submitted to.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device + queue.
    ///
    /// # Errors
    /// Returns a description of the failure if no adapter or device is available.
    pub fn new() -> core::result::Result<Self, String> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(|e| format!("adapter error: {e}"))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("briny_mlp"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|e| format!("device error: {e}"))?;

        Ok(Self { device, queue })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: core::result::Result<GpuContext, String> = GpuContext::new();
}

fn context() -> Result<&'static GpuContext> {
    GPU_CONTEXT.as_ref().map_err(|e| {
        log::warn!("no GPU context: {e}");
        NetworkError::KernelCompilation(format!("no GPU available: {e}"))
    })
}

/// Buffer roles of one kernel kind, in binding order.
struct Bindings {
    reads: &'static [&'static str],
    writes: &'static [&'static str],
    uniform: bool,
}

fn bindings(kind: KernelKind) -> Bindings {
    match kind {
        KernelKind::Forward => Bindings {
            reads: &["weights", "biases", "inputs"],
            writes: &["outputs"],
            uniform: false,
        },
        KernelKind::BackwardOutput => Bindings {
            reads: &["outputs", "targets"],
            writes: &["errors", "deltas"],
            uniform: false,
        },
        KernelKind::BackwardHidden => Bindings {
            reads: &["next_weights", "outputs", "next_deltas"],
            writes: &["errors", "deltas"],
            uniform: false,
        },
        KernelKind::Update => Bindings {
            reads: &["prev_outputs", "deltas"],
            writes: &["weights", "biases", "changes"],
            uniform: true,
        },
    }
}

/// Generates the WGSL source for one kernel.
pub fn shader_source(desc: &KernelDescriptor) -> String {
    let layout = bindings(desc.kind);
    let mut src = String::new();

    src.push_str(&format!(
        "const WIDTH: u32 = {}u;\nconst FAN: u32 = {}u;\n\n",
        desc.width,
        desc.fan.max(1)
    ));

    let mut binding = 0;
    for name in layout.reads {
        src.push_str(&format!(
            "@group(0) @binding({binding}) var<storage, read> {name}: array<f32>;\n"
        ));
        binding += 1;
    }
    for name in layout.writes {
        src.push_str(&format!(
            "@group(0) @binding({binding}) var<storage, read_write> {name}: array<f32>;\n"
        ));
        binding += 1;
    }
    if layout.uniform {
        src.push_str(
            "\nstruct Params {\n    learning_rate: f32,\n    momentum: f32,\n    pad0: f32,\n    pad1: f32,\n}\n",
        );
        src.push_str(&format!(
            "@group(0) @binding({binding}) var<uniform> params: Params;\n"
        ));
    }

    src.push_str(&format!(
        "\n@compute @workgroup_size({WORKGROUP_SIZE})\nfn main(@builtin(global_invocation_id) gid: vec3<u32>) {{\n"
    ));

    let body = match desc.kind {
        KernelKind::Forward => {
            "    let n = gid.x;
    if (n >= WIDTH) { return; }
    var sum: f32 = biases[n];
    for (var k: u32 = 0u; k < FAN; k = k + 1u) {
        sum = sum + weights[n * FAN + k] * inputs[k];
    }
    outputs[n] = 1.0 / (1.0 + exp(-sum));
"
        }
        KernelKind::BackwardOutput => {
            "    let n = gid.x;
    if (n >= WIDTH) { return; }
    let y = outputs[n];
    let err = targets[n] - y;
    errors[n] = err;
    deltas[n] = err * y * (1.0 - y);
"
        }
        KernelKind::BackwardHidden => {
            "    let n = gid.x;
    if (n >= WIDTH) { return; }
    var err: f32 = 0.0;
    for (var k: u32 = 0u; k < FAN; k = k + 1u) {
        err = err + next_deltas[k] * next_weights[k * WIDTH + n];
    }
    let y = outputs[n];
    errors[n] = err;
    deltas[n] = err * y * (1.0 - y);
"
        }
        KernelKind::Update => {
            "    let i = gid.x;
    if (i >= WIDTH * FAN) { return; }
    let n = i / FAN;
    let k = i % FAN;
    let change = params.learning_rate * deltas[n] * prev_outputs[k] + params.momentum * changes[i];
    changes[i] = change;
    weights[i] = weights[i] + change;
    if (k == 0u) {
        biases[n] = biases[n] + params.learning_rate * deltas[n];
    }
"
        }
    };
    src.push_str(body);
    src.push_str("}\n");
    src
}

/// Cheap structural checks before handing generated source to the driver.
fn validate_source(label: &str, src: &str) -> Result<()> {
    let invalid = |why: &str| NetworkError::KernelCompilation(format!("{label}: {why}"));

    if src.len() > MAX_SHADER_LEN {
        return Err(invalid("shader source too large"));
    }
    if !src.contains("fn main") {
        return Err(invalid("shader has no entry point"));
    }
    let opened = src.matches('{').count();
    let closed = src.matches('}').count();
    if opened != closed {
        return Err(invalid("unbalanced braces in shader source"));
    }
    Ok(())
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn narrow(data: &[f64]) -> Vec<f32> {
    data.iter().map(|&x| x as f32).collect()
}

fn execution_error(label: &str, what: impl core::fmt::Display) -> NetworkError {
    NetworkError::KernelExecution(format!("{label}: {what}"))
}

/// A compiled compute pipeline bound to one layer's widths.
pub struct GpuKernel {
    label: String,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    workgroups: u32,
}

impl core::fmt::Debug for GpuKernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GpuKernel")
            .field("label", &self.label)
            .field("workgroups", &self.workgroups)
            .finish_non_exhaustive()
    }
}

impl GpuKernel {
    /// Generates, validates and compiles the shader for `desc`.
    ///
    /// # Errors
    /// `KernelCompilation` if no GPU is available, the dispatch would exceed
    /// the device's workgroup limit, or the driver rejects the shader.
    pub fn compile(desc: &KernelDescriptor) -> Result<Self> {
        let ctx = context()?;
        let device = &ctx.device;
        let label = desc.label();

        let max_groups = device.limits().max_compute_workgroups_per_dimension;
        let workgroups = u32::try_from(desc.invocations().div_ceil(WORKGROUP_SIZE))
            .ok()
            .filter(|&groups| groups <= max_groups)
            .ok_or_else(|| {
                NetworkError::KernelCompilation(format!(
                    "{label}: {} invocations exceed the device limit of {max_groups} workgroups",
                    desc.invocations()
                ))
            })?;

        let source = shader_source(desc);
        validate_source(&label, &source)?;

        let layout = bindings(desc.kind);
        let mut entries = Vec::with_capacity(layout.reads.len() + layout.writes.len() + 1);
        let mut binding = 0u32;
        for _ in layout.reads {
            entries.push(storage_entry(binding, true));
            binding += 1;
        }
        for _ in layout.writes {
            entries.push(storage_entry(binding, false));
            binding += 1;
        }
        if layout.uniform {
            entries.push(uniform_entry(binding));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(NetworkError::KernelCompilation(format!("{label}: {err}")));
        }

        Ok(Self {
            label,
            layout: bind_group_layout,
            pipeline,
            workgroups,
        })
    }

    pub fn forward(&self, weights: &[f64], biases: &[f64], input: &[f64], output: &mut [f64]) -> Result<()> {
        self.dispatch(&[weights, biases, input], &mut [output], None)
    }

    pub fn backward_output(
        &self,
        outputs: &[f64],
        targets: &[f64],
        errors: &mut [f64],
        deltas: &mut [f64],
    ) -> Result<()> {
        self.dispatch(&[outputs, targets], &mut [errors, deltas], None)
    }

    pub fn backward_hidden(
        &self,
        next_weights: &[f64],
        outputs: &[f64],
        next_deltas: &[f64],
        errors: &mut [f64],
        deltas: &mut [f64],
    ) -> Result<()> {
        self.dispatch(&[next_weights, outputs, next_deltas], &mut [errors, deltas], None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        prev_outputs: &[f64],
        deltas: &[f64],
        weights: &mut [f64],
        biases: &mut [f64],
        changes: &mut [f64],
        learning_rate: f64,
        momentum: f64,
    ) -> Result<()> {
        let params = [learning_rate as f32, momentum as f32, 0.0, 0.0];
        self.dispatch(&[prev_outputs, deltas], &mut [weights, biases, changes], Some(params))
    }

    /// Uploads `reads` and `writes`, runs the pipeline once, and copies the
    /// final contents of every `writes` buffer back into the host slices.
    fn dispatch(&self, reads: &[&[f64]], writes: &mut [&mut [f64]], params: Option<[f32; 4]>) -> Result<()> {
        let ctx = context().map_err(|e| execution_error(&self.label, e))?;
        let device = &ctx.device;
        let queue = &ctx.queue;

        let mut buffers = Vec::with_capacity(reads.len() + writes.len() + 1);
        for data in reads {
            buffers.push(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_input"),
                contents: bytemuck::cast_slice(&narrow(data)),
                usage: wgpu::BufferUsages::STORAGE,
            }));
        }
        for data in writes.iter() {
            buffers.push(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_output"),
                contents: bytemuck::cast_slice(&narrow(data)),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            }));
        }
        if let Some(params) = params {
            buffers.push(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_params"),
                contents: bytemuck::cast_slice(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            }));
        }

        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.label),
            layout: &self.layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&self.label),
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(self.workgroups, 1, 1);
        }

        let staging: Vec<wgpu::Buffer> = writes
            .iter()
            .enumerate()
            .map(|(i, data)| {
                let size = (data.len() * size_of::<f32>()) as u64;
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("kernel_staging"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                encoder.copy_buffer_to_buffer(&buffers[reads.len() + i], 0, &buffer, 0, size);
                buffer
            })
            .collect();

        queue.submit(Some(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        for buffer in &staging {
            let tx = tx.clone();
            buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        }
        drop(tx);

        device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| execution_error(&self.label, format!("{e:?}")))?;

        for _ in 0..staging.len() {
            rx.recv()
                .map_err(|_| execution_error(&self.label, "buffer mapping callback dropped"))?
                .map_err(|e| execution_error(&self.label, format!("{e:?}")))?;
        }

        for (buffer, host) in staging.iter().zip(writes.iter_mut()) {
            {
                let view = buffer.slice(..).get_mapped_range();
                let values: &[f32] = bytemuck::try_cast_slice(&view)
                    .map_err(|e| execution_error(&self.label, format!("{e:?}")))?;
                for (dst, &src) in host.iter_mut().zip(values) {
                    *dst = f64::from(src);
                }
            }
            buffer.unmap();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;

    #[test]
    fn shaders_bake_in_layer_widths() {
        let topology = Topology::new(vec![5, 7, 2]).unwrap();
        let forward = shader_source(&KernelDescriptor::forward(&topology, 1));
        assert!(forward.contains("const WIDTH: u32 = 7u;"));
        assert!(forward.contains("const FAN: u32 = 5u;"));

        let update = shader_source(&KernelDescriptor::update(&topology, 2));
        assert!(update.contains("var<uniform> params: Params"));
        assert!(update.contains("const WIDTH: u32 = 2u;"));
    }

    #[test]
    fn every_generated_shader_passes_validation() {
        let topology = Topology::new(vec![3, 4, 2]).unwrap();
        for desc in KernelDescriptor::all(&topology) {
            validate_source(&desc.label(), &shader_source(&desc)).unwrap();
        }
    }

    #[test]
    fn gpu_forward_matches_cpu_when_available() {
        let topology = Topology::new(vec![3, 2]).unwrap();
        let kernel = match GpuKernel::compile(&KernelDescriptor::forward(&topology, 1)) {
            Ok(kernel) => kernel,
            Err(_) => return, // no adapter on this machine
        };

        let weights = [0.1, 0.2, 0.3, -0.3, -0.2, -0.1];
        let biases = [0.0, 0.5];
        let input = [1.0, 0.0, 1.0];
        let mut gpu = [0.0; 2];
        let mut cpu = [0.0; 2];

        kernel.forward(&weights, &biases, &input, &mut gpu).unwrap();
        super::super::cpu::forward(3, &weights, &biases, &input, &mut cpu);

        for (g, c) in gpu.iter().zip(cpu) {
            assert!((g - c).abs() < 1e-5);
        }
    }

    fn assert_close(gpu: &[f64], cpu: &[f64]) {
        assert_eq!(gpu.len(), cpu.len());
        for (g, c) in gpu.iter().zip(cpu) {
            assert!((g - c).abs() < 1e-5, "gpu {g} vs cpu {c}");
        }
    }

    #[test]
    fn gpu_backward_output_matches_cpu_when_available() {
        let topology = Topology::new(vec![3, 2]).unwrap();
        let kernel = match GpuKernel::compile(&KernelDescriptor::backward(&topology, 1)) {
            Ok(kernel) => kernel,
            Err(_) => return,
        };

        let outputs = [0.25, 0.8];
        let targets = [1.0, 0.0];
        let (mut gpu_errors, mut gpu_deltas) = ([0.0; 2], [0.0; 2]);
        let (mut cpu_errors, mut cpu_deltas) = ([0.0; 2], [0.0; 2]);

        kernel.backward_output(&outputs, &targets, &mut gpu_errors, &mut gpu_deltas).unwrap();
        super::super::cpu::backward_output(&outputs, &targets, &mut cpu_errors, &mut cpu_deltas);

        assert_close(&gpu_errors, &cpu_errors);
        assert_close(&gpu_deltas, &cpu_deltas);
    }

    #[test]
    fn gpu_backward_hidden_matches_cpu_when_available() {
        let topology = Topology::new(vec![3, 4, 2]).unwrap();
        let desc = KernelDescriptor::backward(&topology, 1);
        assert_eq!((desc.width, desc.fan), (4, 2));
        let kernel = match GpuKernel::compile(&desc) {
            Ok(kernel) => kernel,
            Err(_) => return,
        };

        let next_weights = [0.1, -0.2, 0.3, 0.05, -0.4, 0.2, 0.0, 0.15];
        let outputs = [0.1, 0.4, 0.6, 0.9];
        let next_deltas = [0.07, -0.12];
        let (mut gpu_errors, mut gpu_deltas) = ([0.0; 4], [0.0; 4]);
        let (mut cpu_errors, mut cpu_deltas) = ([0.0; 4], [0.0; 4]);

        kernel
            .backward_hidden(&next_weights, &outputs, &next_deltas, &mut gpu_errors, &mut gpu_deltas)
            .unwrap();
        super::super::cpu::backward_hidden(4, &next_weights, &outputs, &next_deltas, &mut cpu_errors, &mut cpu_deltas);

        assert_close(&gpu_errors, &cpu_errors);
        assert_close(&gpu_deltas, &cpu_deltas);
    }

    #[test]
    fn gpu_update_matches_cpu_when_available() {
        let topology = Topology::new(vec![3, 2]).unwrap();
        let kernel = match GpuKernel::compile(&KernelDescriptor::update(&topology, 1)) {
            Ok(kernel) => kernel,
            Err(_) => return,
        };

        let prev_outputs = [1.0, 0.5, 0.25];
        let deltas = [0.2, -0.1];
        let weights = [0.1, 0.2, 0.3, -0.3, -0.2, -0.1];
        let biases = [0.0, 0.5];
        let changes = [0.01, -0.02, 0.03, 0.0, 0.05, -0.04];

        let (mut gpu_w, mut gpu_b, mut gpu_c) = (weights, biases, changes);
        let (mut cpu_w, mut cpu_b, mut cpu_c) = (weights, biases, changes);

        kernel
            .update(&prev_outputs, &deltas, &mut gpu_w, &mut gpu_b, &mut gpu_c, 0.3, 0.1)
            .unwrap();
        super::super::cpu::update(3, &prev_outputs, &deltas, &mut cpu_w, &mut cpu_b, &mut cpu_c, 0.3, 0.1);

        assert_close(&gpu_w, &cpu_w);
        assert_close(&gpu_b, &cpu_b);
        assert_close(&gpu_c, &cpu_c);
    }
}
