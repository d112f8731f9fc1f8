//! Compute pipelines, one per kernel, with bind-group layouts built from the binding tables.

use crate::kernel::{Kernel, KernelParams};

const COMMON_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/common.wgsl"));

fn kernel_source(kernel: Kernel) -> &'static str {
    match kernel {
        Kernel::Clear => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/clear.wgsl")),
        Kernel::Gradient => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/gradient.wgsl")),
        Kernel::GradientAtrous => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/gradient_atrous.wgsl")),
        Kernel::Temporal => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/temporal.wgsl")),
        Kernel::Variance => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/variance.wgsl")),
        Kernel::Atrous => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/atrous.wgsl")),
        Kernel::HistoryTap => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/history_tap.wgsl")),
        Kernel::Visualize => include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/visualize.wgsl")),
    }
}

pub(crate) struct KernelPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl KernelPipeline {
    pub fn new(device: &wgpu::Device, kernel: Kernel) -> Self {
        let source = format!("{COMMON_SHADER}\n{}", kernel_source(kernel));
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.label()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = kernel.layout();
        let sampled = wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        };
        let storage = wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: super::IMAGE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        };
        let params = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<KernelParams>() as u64),
        };
        let entries: Vec<wgpu::BindGroupLayoutEntry> = layout
            .reads
            .iter()
            .map(|_| sampled)
            .chain(layout.writes.iter().map(|_| storage))
            .chain(std::iter::once(params))
            .enumerate()
            .map(|(binding, ty)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty,
                count: None,
            })
            .collect();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(kernel.label()),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel.label()),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.label()),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        Self { pipeline, bind_group_layout }
    }
}

/// Built once per device, indexed by kernel.
pub(crate) struct PipelineTable {
    pipelines: Vec<(Kernel, KernelPipeline)>,
}

impl PipelineTable {
    pub fn new(device: &wgpu::Device) -> Self {
        let pipelines = Kernel::ALL.iter().map(|&kernel| (kernel, KernelPipeline::new(device, kernel))).collect();
        Self { pipelines }
    }

    pub fn get(&self, kernel: Kernel) -> Option<&KernelPipeline> {
        self.pipelines.iter().find(|(k, _)| *k == kernel).map(|(_, p)| p)
    }
}
