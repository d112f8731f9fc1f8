//! wgpu compute backend. Pipelines are compiled once at construction; each dispatch
//! gets its own uniform buffer and bind group.

mod pipelines;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use render_api::{Extent, HostFence};
use wgpu::util::DeviceExt;

use crate::device::{Bindings, DenoiseDevice, ImageDesc};
use crate::error::{DenoiseError, DenoiseResult};
use crate::kernel::{workgroup_count, Kernel, KernelParams, Requirement};

use pipelines::PipelineTable;

pub(crate) const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const TEXEL_BYTES: u32 = 16;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct WgpuImage {
    id: u64,
    label: &'static str,
    extent: Extent,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl WgpuImage {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn size(&self) -> wgpu::Extent3d {
        wgpu::Extent3d { width: self.extent.width, height: self.extent.height, depth_or_array_layers: 1 }
    }
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: PipelineTable,
    /// Bound to optional slots the caller leaves empty.
    fallback: WgpuImage,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> DenoiseResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipelines = PipelineTable::new(&device);
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(DenoiseError::device(format!("pipeline creation failed: {err}")));
        }
        let fallback = create_texture(&device, &ImageDesc::new("afterglow.fallback", Extent::new(1, 1)));
        log::info!("afterglow wgpu backend ready ({} kernels)", Kernel::ALL.len());
        Ok(Self { device, queue, pipelines, fallback })
    }

    /// Headless device on the default adapter.
    pub fn from_default_adapter() -> DenoiseResult<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::default();
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| DenoiseError::device("no suitable adapter"))?;
            log::info!("adapter: {}", adapter.get_info().name);
            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("afterglow.device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: wgpu::Limits::default(),
                        memory_hints: wgpu::MemoryHints::Performance,
                    },
                    None,
                )
                .await
                .map_err(DenoiseError::device)?;
            Self::new(device, queue)
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

fn create_texture(device: &wgpu::Device, desc: &ImageDesc) -> WgpuImage {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(desc.label),
        size: wgpu::Extent3d { width: desc.extent.width, height: desc.extent.height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: IMAGE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    WgpuImage {
        id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
        label: desc.label,
        extent: desc.extent,
        texture,
        view,
    }
}

/// Bytes per row padded to the copy alignment.
fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * TEXEL_BYTES;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

impl DenoiseDevice for WgpuDevice {
    type Image = WgpuImage;
    type Fence = HostFence;
    type Encoder = wgpu::CommandEncoder;

    fn create_image(&self, desc: &ImageDesc) -> DenoiseResult<WgpuImage> {
        if desc.extent.is_empty() {
            return Err(DenoiseError::ZeroExtent);
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let image = create_texture(&self.device, desc);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if oom.is_some() {
            return Err(DenoiseError::OutOfMemory { requested: desc.extent.texel_count() });
        }
        if let Some(err) = validation {
            return Err(DenoiseError::allocation(format!("{}: {err}", desc.label)));
        }
        Ok(image)
    }

    fn image_extent(&self, image: &WgpuImage) -> Extent {
        image.extent
    }

    fn create_encoder(&self, label: &'static str) -> wgpu::CommandEncoder {
        self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        kernel: Kernel,
        bindings: &Bindings<'_, WgpuImage>,
        params: &KernelParams,
    ) -> DenoiseResult<()> {
        bindings.validate(kernel)?;
        let pipeline = self
            .pipelines
            .get(kernel)
            .ok_or_else(|| DenoiseError::device(format!("no pipeline for {}", kernel.label())))?;
        let layout = kernel.layout();

        let mut views = Vec::with_capacity(layout.binding_count());
        for &(slot, requirement) in layout.reads {
            match (bindings.get(slot), requirement) {
                (Some(image), _) => views.push(image),
                (None, Requirement::Optional) => views.push(&self.fallback),
                (None, Requirement::Required) => return Err(DenoiseError::MissingBinding { kernel, slot }),
            }
        }
        for &slot in layout.writes {
            let image = bindings.get(slot).ok_or(DenoiseError::MissingBinding { kernel, slot })?;
            if image.extent != params.extent() {
                return Err(DenoiseError::ExtentMismatch {
                    name: kernel.label(),
                    expected: params.extent(),
                    actual: image.extent,
                });
            }
            if views[..layout.reads.len()].iter().any(|read| read.id == image.id) {
                return Err(DenoiseError::Hazard { kernel, slot });
            }
            views.push(image);
        }

        let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(kernel.label()),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(binding, image)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(&image.view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: layout.params_binding(),
            resource: uniform.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.label()),
            layout: &pipeline.bind_group_layout,
            entries: &entries,
        });

        let (x, y) = workgroup_count(params.extent());
        log::trace!("dispatch {} {}x{} groups", kernel.label(), x, y);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
        Ok(())
    }

    fn copy_image(&self, encoder: &mut wgpu::CommandEncoder, src: &WgpuImage, dst: &WgpuImage) -> DenoiseResult<()> {
        if src.extent != dst.extent {
            return Err(DenoiseError::ExtentMismatch { name: dst.label, expected: src.extent, actual: dst.extent });
        }
        if src.id == dst.id {
            return Ok(());
        }
        encoder.copy_texture_to_texture(src.texture.as_image_copy(), dst.texture.as_image_copy(), src.size());
        Ok(())
    }

    fn submit(&self, encoder: wgpu::CommandEncoder, fence: &HostFence) -> DenoiseResult<()> {
        self.queue.submit(Some(encoder.finish()));
        let fence = fence.clone();
        self.queue.on_submitted_work_done(move || fence.signal());
        Ok(())
    }

    fn poll(&self) {
        let _ = self.device.poll(wgpu::Maintain::Poll);
    }

    fn wait_idle(&self) -> DenoiseResult<()> {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn write_image(&self, image: &WgpuImage, texels: &[[f32; 4]]) -> DenoiseResult<()> {
        if texels.len() != image.extent.texel_count() {
            return Err(DenoiseError::device(format!(
                "upload of {} texels into {} image {}",
                texels.len(),
                image.extent,
                image.label
            )));
        }
        self.queue.write_texture(
            image.texture.as_image_copy(),
            bytemuck::cast_slice(texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.extent.width * TEXEL_BYTES),
                rows_per_image: Some(image.extent.height),
            },
            image.size(),
        );
        Ok(())
    }

    fn read_image(&self, image: &WgpuImage) -> DenoiseResult<Vec<[f32; 4]>> {
        let row_bytes = padded_row_bytes(image.extent.width);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("afterglow.readback"),
            size: row_bytes as u64 * image.extent.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.create_encoder("afterglow.readback");
        encoder.copy_texture_to_buffer(
            image.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes),
                    rows_per_image: Some(image.extent.height),
                },
            },
            image.size(),
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(DenoiseError::readback)?.map_err(DenoiseError::readback)?;

        let data = slice.get_mapped_range();
        let unpadded = (image.extent.width * TEXEL_BYTES) as usize;
        let texels = data
            .chunks_exact(row_bytes as usize)
            .flat_map(|row| row[..unpadded].chunks_exact(TEXEL_BYTES as usize))
            .map(bytemuck::pod_read_unaligned::<[f32; 4]>)
            .collect();
        drop(data);
        buffer.unmap();
        Ok(texels)
    }
}
