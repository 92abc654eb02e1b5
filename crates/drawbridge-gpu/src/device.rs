//! wgpu implementation of the core device catalog.
//!
//! Renders into an offscreen color target. Texture handles map to wgpu
//! textures; the pixel-unpack buffer is CPU-side staging feeding
//! `queue.write_texture` (wgpu has no bindable unpack buffer). Readback
//! maps a staging buffer per call, so the device reports
//! `buffer_storage: false` and the core selects the explicit-map
//! double-buffer technique.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use drawbridge_core::caps::DeviceCaps;
use drawbridge_core::device::{
    BufferId, DeviceError, DrawBatch, GfxDevice, PixelFormat, ReadRegion, TexFilter, TexParams,
    TexRegion, TexWrap, TextureAllocation, TextureId,
};

use crate::pipeline::QuadPipeline;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("no compatible GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

struct GpuTexture {
    texture: Option<wgpu::Texture>,
    params: TexParams,
    /// Rebuilt lazily after storage or parameter changes.
    bind_group: Option<wgpu::BindGroup>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,
    pipeline: QuadPipeline,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    target_width: u32,
    target_height: u32,
    /// 1x1 white fallback for untextured batches.
    white_bind_group: wgpu::BindGroup,
    textures: HashMap<TextureId, GpuTexture>,
    staging: HashMap<BufferId, Vec<u8>>,
    bound_texture: Option<TextureId>,
    bound_staging: Option<BufferId>,
    readback_staging: Option<wgpu::Buffer>,
    next_texture: u64,
    next_buffer: u64,
}

impl WgpuDevice {
    /// Wrap an existing wgpu device with a `width` x `height` offscreen
    /// color target.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let pipeline = QuadPipeline::new(&device, TARGET_FORMAT);

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("drawbridge_color_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let white = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("drawbridge_white_fallback"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[0xFF, 0xFF, 0xFF, 0xFF],
        );
        let white_view = white.create_view(&wgpu::TextureViewDescriptor::default());
        let white_sampler = device.create_sampler(&wgpu::SamplerDescriptor::default());
        let white_bind_group = pipeline.bind_group(&device, &white_view, &white_sampler);

        tracing::info!(width, height, "wgpu device ready");
        Self {
            device,
            queue,
            caps: DeviceCaps {
                version: (1, 0),
                buffer_storage: false,
                direct_state_access: true,
                texture_storage: true,
            },
            pipeline,
            target,
            target_view,
            target_width: width,
            target_height: height,
            white_bind_group,
            textures: HashMap::new(),
            staging: HashMap::new(),
            bound_texture: None,
            bound_staging: None,
            readback_staging: None,
            next_texture: 1,
            next_buffer: 1,
        }
    }

    /// Stand up an adapter and device without a surface; blocking.
    pub fn offscreen(width: u32, height: u32) -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        }))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("drawbridge_device"),
            ..Default::default()
        }))?;
        Ok(Self::new(device, queue, width, height))
    }

    fn texture_entry(&mut self, tex: TextureId) -> Result<&mut GpuTexture, DeviceError> {
        self.textures
            .get_mut(&tex)
            .ok_or(DeviceError::UnknownTexture(tex))
    }

    fn bound_texture(&self) -> Result<TextureId, DeviceError> {
        self.bound_texture.ok_or(DeviceError::NoTextureBound)
    }

    fn new_texture_id(&mut self) -> TextureId {
        let tex = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(
            tex,
            GpuTexture {
                texture: None,
                params: TexParams::default(),
                bind_group: None,
            },
        );
        tex
    }

    fn alloc_storage(
        &mut self,
        tex: TextureId,
        alloc: &TextureAllocation,
    ) -> Result<(), DeviceError> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("drawbridge_texture"),
            size: wgpu::Extent3d {
                width: alloc.width,
                height: alloc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: alloc.levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(alloc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let entry = self.texture_entry(tex)?;
        entry.texture = Some(texture);
        entry.bind_group = None;
        Ok(())
    }

    fn write_region(
        &mut self,
        tex: TextureId,
        region: &TexRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let need = region.byte_len();
        if data.len() < need {
            return Err(DeviceError::SliceTooSmall {
                need,
                have: data.len(),
            });
        }
        let entry = self.textures.get(&tex).ok_or(DeviceError::UnknownTexture(tex))?;
        let texture = entry.texture.as_ref().ok_or(DeviceError::NoStorage(tex))?;
        let bpp = region.format.bytes_per_pixel() as u32;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: region.level,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &data[..need],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.width * bpp),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn staged_bytes(&self) -> Result<&[u8], DeviceError> {
        let buf = self.bound_staging.ok_or(DeviceError::NoPixelBufferBound)?;
        let data = self
            .staging
            .get(&buf)
            .ok_or(DeviceError::UnknownBuffer(buf))?;
        if data.is_empty() {
            return Err(DeviceError::NoStagedData);
        }
        Ok(data)
    }

    fn ensure_bind_group(&mut self, tex: TextureId) -> Result<(), DeviceError> {
        let entry = self
            .textures
            .get_mut(&tex)
            .ok_or(DeviceError::UnknownTexture(tex))?;
        if entry.bind_group.is_some() {
            return Ok(());
        }
        let texture = entry.texture.as_ref().ok_or(DeviceError::NoStorage(tex))?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&sampler_descriptor(&entry.params));
        entry.bind_group = Some(self.pipeline.bind_group(&self.device, &view, &sampler));
        Ok(())
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
    }
}

fn filter_mode(filter: TexFilter) -> wgpu::FilterMode {
    match filter {
        TexFilter::Nearest => wgpu::FilterMode::Nearest,
        TexFilter::Linear => wgpu::FilterMode::Linear,
    }
}

fn address_mode(wrap: TexWrap) -> wgpu::AddressMode {
    match wrap {
        TexWrap::Clamp => wgpu::AddressMode::ClampToEdge,
        TexWrap::Repeat => wgpu::AddressMode::Repeat,
        TexWrap::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn sampler_descriptor(params: &TexParams) -> wgpu::SamplerDescriptor<'static> {
    // Anisotropy requires all-linear filtering in wgpu.
    let linear = params.mag_filter == TexFilter::Linear && params.min_filter == TexFilter::Linear;
    let anisotropy_clamp = match params.max_anisotropy {
        Some(a) if linear && a > 1.0 => a as u16,
        _ => 1,
    };
    wgpu::SamplerDescriptor {
        label: Some("drawbridge_sampler"),
        address_mode_u: address_mode(params.wrap_s),
        address_mode_v: address_mode(params.wrap_t),
        mag_filter: filter_mode(params.mag_filter),
        min_filter: filter_mode(params.min_filter),
        lod_max_clamp: params.max_level.map_or(32.0, |level| level as f32),
        anisotropy_clamp,
        ..Default::default()
    }
}

impl GfxDevice for WgpuDevice {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_texture(&mut self) -> Result<TextureId, DeviceError> {
        Ok(self.new_texture_id())
    }

    fn gen_texture(&mut self) -> Result<TextureId, DeviceError> {
        Ok(self.new_texture_id())
    }

    fn delete_texture(&mut self, tex: TextureId) -> Result<(), DeviceError> {
        self.textures.remove(&tex);
        if self.bound_texture == Some(tex) {
            self.bound_texture = None;
        }
        Ok(())
    }

    fn bind_texture(&mut self, tex: TextureId) -> Result<(), DeviceError> {
        if !self.textures.contains_key(&tex) {
            return Err(DeviceError::UnknownTexture(tex));
        }
        self.bound_texture = Some(tex);
        Ok(())
    }

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        let buf = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.staging.insert(buf, Vec::new());
        Ok(buf)
    }

    fn delete_buffer(&mut self, buf: BufferId) -> Result<(), DeviceError> {
        self.staging.remove(&buf);
        if self.bound_staging == Some(buf) {
            self.bound_staging = None;
        }
        Ok(())
    }

    fn bind_pixel_buffer(&mut self, buf: Option<BufferId>) -> Result<(), DeviceError> {
        if let Some(buf) = buf {
            if !self.staging.contains_key(&buf) {
                return Err(DeviceError::UnknownBuffer(buf));
            }
        }
        self.bound_staging = buf;
        Ok(())
    }

    fn pixel_buffer_data(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let buf = self.bound_staging.ok_or(DeviceError::NoPixelBufferBound)?;
        let staging = self
            .staging
            .get_mut(&buf)
            .ok_or(DeviceError::UnknownBuffer(buf))?;
        staging.clear();
        staging.extend_from_slice(data);
        Ok(())
    }

    fn alloc_texture_storage(
        &mut self,
        tex: TextureId,
        alloc: &TextureAllocation,
    ) -> Result<(), DeviceError> {
        self.alloc_storage(tex, alloc)
    }

    fn alloc_texture_storage_bound(
        &mut self,
        alloc: &TextureAllocation,
    ) -> Result<(), DeviceError> {
        let tex = self.bound_texture()?;
        self.alloc_storage(tex, alloc)
    }

    fn alloc_texture_image_bound(&mut self, alloc: &TextureAllocation) -> Result<(), DeviceError> {
        let tex = self.bound_texture()?;
        self.alloc_storage(tex, alloc)
    }

    fn texture_sub_image_buffered(
        &mut self,
        tex: TextureId,
        region: &TexRegion,
    ) -> Result<(), DeviceError> {
        let data = self.staged_bytes()?.to_vec();
        self.write_region(tex, region, &data)
    }

    fn texture_sub_image_buffered_bound(&mut self, region: &TexRegion) -> Result<(), DeviceError> {
        let tex = self.bound_texture()?;
        let data = self.staged_bytes()?.to_vec();
        self.write_region(tex, region, &data)
    }

    fn texture_sub_image_unbuffered(
        &mut self,
        region: &TexRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let tex = self.bound_texture()?;
        self.write_region(tex, region, data)
    }

    fn set_texture_params(
        &mut self,
        tex: TextureId,
        params: &TexParams,
    ) -> Result<(), DeviceError> {
        let entry = self.texture_entry(tex)?;
        entry.params = *params;
        entry.bind_group = None;
        Ok(())
    }

    fn set_texture_params_bound(&mut self, params: &TexParams) -> Result<(), DeviceError> {
        let tex = self.bound_texture()?;
        self.set_texture_params(tex, params)
    }

    fn draw(&mut self, batch: &DrawBatch) -> Result<(), DeviceError> {
        if batch.vertices.is_empty() {
            return Ok(());
        }
        if let Some(tex) = batch.texture {
            self.ensure_bind_group(tex)?;
        }
        let bind_group = match batch.texture {
            Some(tex) => self
                .textures
                .get(&tex)
                .and_then(|entry| entry.bind_group.as_ref())
                .ok_or(DeviceError::UnknownTexture(tex))?,
            None => &self.white_bind_group,
        };

        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("drawbridge_batch_vertices"),
                contents: bytemuck::cast_slice(&batch.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("drawbridge_draw_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("drawbridge_draw_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(self.pipeline.pipeline());
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..batch.vertices.len() as u32, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, region: &ReadRegion, dst: &mut [u8]) -> Result<(), DeviceError> {
        if region.x0 + region.width > self.target_width
            || region.y0 + region.height > self.target_height
        {
            return Err(DeviceError::RegionOutOfBounds);
        }
        let need = region.byte_len();
        if dst.len() < need {
            return Err(DeviceError::SliceTooSmall {
                need,
                have: dst.len(),
            });
        }

        // Copy rows padded out to the 256-byte alignment the buffer copy
        // requires, then repack tightly.
        let bpp = region.format.bytes_per_pixel() as u32;
        let padded_bytes_per_row =
            (region.width * bpp + wgpu::COPY_BYTES_PER_ROW_ALIGNMENT - 1)
                & !(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT - 1);
        let size = padded_bytes_per_row as u64 * region.height as u64;

        let needs_new_staging = match self.readback_staging.as_ref() {
            Some(buf) => buf.size() < size,
            None => true,
        };
        if needs_new_staging {
            self.readback_staging = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("drawbridge_readback_staging"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }));
        }
        let staging = self
            .readback_staging
            .as_ref()
            .ok_or_else(|| DeviceError::Backend("readback staging missing".into()))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("drawbridge_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x0,
                    y: region.y0,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(region.height),
                },
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = std::sync::mpsc::channel();
        staging
            .slice(..size)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| DeviceError::Backend(err.to_string()))?;
        rx.recv()
            .map_err(|_| DeviceError::Backend("readback map callback dropped".into()))?
            .map_err(|err| DeviceError::Backend(err.to_string()))?;

        {
            let data = staging.slice(..size).get_mapped_range();
            let row_len = (region.width * bpp) as usize;
            for row in 0..region.height as usize {
                let src = row * padded_bytes_per_row as usize;
                dst[row * row_len..(row + 1) * row_len]
                    .copy_from_slice(&data[src..src + row_len]);
            }
        }
        staging.unmap();

        // The target is RGBA; swizzle when the caller asked for BGRA.
        if region.format == PixelFormat::Bgra8 {
            for px in dst[..need].chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DeviceError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| DeviceError::Backend(err.to_string()))?;
        Ok(())
    }
}
