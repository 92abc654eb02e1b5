//! In-memory device for tests: records every call in order and models just
//! enough texture/framebuffer state to verify pixel flow end to end.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::caps::DeviceCaps;
use crate::device::{
    BufferId, DeviceError, DrawBatch, GfxDevice, ReadRegion, TexParams, TexRegion,
    TextureAllocation, TextureId,
};

pub(crate) type SharedState = Arc<Mutex<MockState>>;

pub(crate) struct MockTexture {
    pub data: Vec<u8>,
    pub width: u32,
    pub params: Option<TexParams>,
}

pub(crate) struct MockState {
    /// Every device call, in execution order.
    pub calls: Vec<String>,
    pub fail_next_draw: bool,
    pub textures: HashMap<TextureId, MockTexture>,
    pub framebuffer: Vec<u8>,
    fb_width: u32,
    fb_height: u32,
    buffers: HashSet<BufferId>,
    bound_texture: Option<TextureId>,
    bound_pixel_buffer: Option<BufferId>,
    staged: Option<Vec<u8>>,
    next_texture: u64,
    next_buffer: u64,
}

impl MockState {
    /// Tile `pattern` across the whole framebuffer.
    pub fn fill_framebuffer(&mut self, pattern: &[u8]) {
        for (i, byte) in self.framebuffer.iter_mut().enumerate() {
            *byte = pattern[i % pattern.len()];
        }
    }

    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }

    fn texture_mut(&mut self, tex: TextureId) -> Result<&mut MockTexture, DeviceError> {
        self.textures
            .get_mut(&tex)
            .ok_or(DeviceError::UnknownTexture(tex))
    }

    fn bound_texture(&self) -> Result<TextureId, DeviceError> {
        self.bound_texture.ok_or(DeviceError::NoTextureBound)
    }

    fn alloc_storage(&mut self, tex: TextureId, alloc: &TextureAllocation) -> Result<(), DeviceError> {
        let size = alloc.width as usize * alloc.height as usize * alloc.format.bytes_per_pixel();
        let texture = self.texture_mut(tex)?;
        texture.data = vec![0u8; size];
        texture.width = alloc.width;
        Ok(())
    }

    fn sub_image(&mut self, tex: TextureId, region: &TexRegion, data: &[u8]) -> Result<(), DeviceError> {
        let need = region.byte_len();
        if data.len() < need {
            return Err(DeviceError::SliceTooSmall {
                need,
                have: data.len(),
            });
        }
        let bpp = region.format.bytes_per_pixel();
        // Copy rows individually in case the region is narrower than the texture.
        let row_len = region.width as usize * bpp;
        let tex_width = {
            let texture = self.texture_mut(tex)?;
            if texture.data.is_empty() {
                return Err(DeviceError::NoStorage(tex));
            }
            texture.width as usize
        };
        let data_rows: Vec<&[u8]> = data[..need].chunks(row_len).collect();
        let texture = self.texture_mut(tex)?;
        for (row, src) in data_rows.iter().enumerate() {
            let y = region.y as usize + row;
            let offset = (y * tex_width + region.x as usize) * bpp;
            texture.data[offset..offset + row_len].copy_from_slice(src);
        }
        Ok(())
    }

    fn staged(&self) -> Result<&[u8], DeviceError> {
        if self.bound_pixel_buffer.is_none() {
            return Err(DeviceError::NoPixelBufferBound);
        }
        self.staged.as_deref().ok_or(DeviceError::NoStagedData)
    }
}

pub(crate) struct MockDevice {
    caps: DeviceCaps,
    state: SharedState,
}

impl MockDevice {
    /// A device with a `fb_width` x `fb_height` RGBA8 color buffer, plus a
    /// shared handle on its state for assertions.
    pub fn new(caps: DeviceCaps, fb_width: u32, fb_height: u32) -> (Self, SharedState) {
        let state = Arc::new(Mutex::new(MockState {
            calls: Vec::new(),
            fail_next_draw: false,
            textures: HashMap::new(),
            framebuffer: vec![0u8; (fb_width * fb_height * 4) as usize],
            fb_width,
            fb_height,
            buffers: HashSet::new(),
            bound_texture: None,
            bound_pixel_buffer: None,
            staged: None,
            next_texture: 1,
            next_buffer: 1,
        }));
        (
            Self {
                caps,
                state: Arc::clone(&state),
            },
            state,
        )
    }

    fn new_texture(&mut self, call: &str) -> Result<TextureId, DeviceError> {
        let mut state = self.state.lock();
        state.record(call);
        let tex = TextureId(state.next_texture);
        state.next_texture += 1;
        state.textures.insert(
            tex,
            MockTexture {
                data: Vec::new(),
                width: 0,
                params: None,
            },
        );
        Ok(tex)
    }
}

impl GfxDevice for MockDevice {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_texture(&mut self) -> Result<TextureId, DeviceError> {
        self.new_texture("create_texture")
    }

    fn gen_texture(&mut self) -> Result<TextureId, DeviceError> {
        self.new_texture("gen_texture")
    }

    fn delete_texture(&mut self, tex: TextureId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record(format!("delete_texture:{}", tex.0));
        state.textures.remove(&tex);
        if state.bound_texture == Some(tex) {
            state.bound_texture = None;
        }
        Ok(())
    }

    fn bind_texture(&mut self, tex: TextureId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("bind_texture");
        if !state.textures.contains_key(&tex) {
            return Err(DeviceError::UnknownTexture(tex));
        }
        state.bound_texture = Some(tex);
        Ok(())
    }

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        let mut state = self.state.lock();
        state.record("create_buffer");
        let buf = BufferId(state.next_buffer);
        state.next_buffer += 1;
        state.buffers.insert(buf);
        Ok(buf)
    }

    fn delete_buffer(&mut self, buf: BufferId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record(format!("delete_buffer:{}", buf.0));
        state.buffers.remove(&buf);
        if state.bound_pixel_buffer == Some(buf) {
            state.bound_pixel_buffer = None;
        }
        Ok(())
    }

    fn bind_pixel_buffer(&mut self, buf: Option<BufferId>) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        match buf {
            Some(buf) => {
                state.record("bind_pixel_buffer");
                if !state.buffers.contains(&buf) {
                    return Err(DeviceError::UnknownBuffer(buf));
                }
                state.bound_pixel_buffer = Some(buf);
            }
            None => {
                state.record("unbind_pixel_buffer");
                state.bound_pixel_buffer = None;
            }
        }
        Ok(())
    }

    fn pixel_buffer_data(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("pixel_buffer_data");
        if state.bound_pixel_buffer.is_none() {
            return Err(DeviceError::NoPixelBufferBound);
        }
        state.staged = Some(data.to_vec());
        Ok(())
    }

    fn alloc_texture_storage(
        &mut self,
        tex: TextureId,
        alloc: &TextureAllocation,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("alloc_texture_storage");
        state.alloc_storage(tex, alloc)
    }

    fn alloc_texture_storage_bound(
        &mut self,
        alloc: &TextureAllocation,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("alloc_texture_storage_bound");
        let tex = state.bound_texture()?;
        state.alloc_storage(tex, alloc)
    }

    fn alloc_texture_image_bound(&mut self, alloc: &TextureAllocation) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("alloc_texture_image_bound");
        let tex = state.bound_texture()?;
        state.alloc_storage(tex, alloc)
    }

    fn texture_sub_image_buffered(
        &mut self,
        tex: TextureId,
        region: &TexRegion,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("texture_sub_image_buffered");
        let staged = state.staged()?.to_vec();
        state.sub_image(tex, region, &staged)
    }

    fn texture_sub_image_buffered_bound(&mut self, region: &TexRegion) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("texture_sub_image_buffered_bound");
        let tex = state.bound_texture()?;
        let staged = state.staged()?.to_vec();
        state.sub_image(tex, region, &staged)
    }

    fn texture_sub_image_unbuffered(
        &mut self,
        region: &TexRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("texture_sub_image_unbuffered");
        let tex = state.bound_texture()?;
        state.sub_image(tex, region, data)
    }

    fn set_texture_params(
        &mut self,
        tex: TextureId,
        params: &TexParams,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("set_texture_params");
        if let Some(texture) = state.textures.get_mut(&tex) {
            texture.params = Some(*params);
        }
        Ok(())
    }

    fn set_texture_params_bound(&mut self, params: &TexParams) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("set_texture_params_bound");
        let tex = state.bound_texture()?;
        state.texture_mut(tex)?.params = Some(*params);
        Ok(())
    }

    fn draw(&mut self, batch: &DrawBatch) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("draw");
        if state.fail_next_draw {
            state.fail_next_draw = false;
            return Err(DeviceError::Backend("injected draw failure".into()));
        }
        // Pixel-flow model: splat the batch texture into the color buffer
        // at the origin.
        if let Some(tex) = batch.texture {
            let data = state.texture_mut(tex)?.data.clone();
            let len = data.len().min(state.framebuffer.len());
            state.framebuffer[..len].copy_from_slice(&data[..len]);
        }
        Ok(())
    }

    fn read_pixels(&mut self, region: &ReadRegion, dst: &mut [u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.record("read_pixels");
        if region.x0 + region.width > state.fb_width || region.y0 + region.height > state.fb_height
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
        let bpp = region.format.bytes_per_pixel();
        let row_len = region.width as usize * bpp;
        for row in 0..region.height as usize {
            let src_offset =
                ((region.y0 as usize + row) * state.fb_width as usize + region.x0 as usize) * bpp;
            dst[row * row_len..(row + 1) * row_len]
                .copy_from_slice(&state.framebuffer[src_offset..src_offset + row_len]);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DeviceError> {
        self.state.lock().record("finish");
        Ok(())
    }
}
