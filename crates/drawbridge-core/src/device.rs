//! The graphics device call interface consumed by the consumer loop.
//!
//! [`GfxDevice`] is the fixed catalog of operation primitives the command
//! executor dispatches into. The core does not define their rendering
//! semantics — it only guarantees the call order. The catalog carries both
//! direct (handle-taking) and bound-target variants of the texture calls so
//! the capability-selected strategies can emit whichever sequence the
//! device supports.

use crate::caps::DeviceCaps;

/// Failure of a single device call. Swallowed and logged by the consumer
/// loop; never propagated back to blocking producers.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown texture handle {0:?}")]
    UnknownTexture(TextureId),

    #[error("unknown buffer handle {0:?}")]
    UnknownBuffer(BufferId),

    #[error("texture {0:?} has no storage allocated")]
    NoStorage(TextureId),

    #[error("bound-target call with no texture bound")]
    NoTextureBound,

    #[error("buffered upload with no pixel buffer bound")]
    NoPixelBufferBound,

    #[error("no data staged in the bound pixel buffer")]
    NoStagedData,

    #[error("destination too small: need {need} bytes, have {have}")]
    SliceTooSmall { need: usize, have: usize },

    #[error("read region out of bounds")]
    RegionOutOfBounds,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Handle to a device texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Handle to a device buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Pixel layout for uploads and readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }
}

/// Storage allocation request for a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureAllocation {
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub format: PixelFormat,
}

/// Sub-rectangle of a texture level targeted by an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub level: u32,
    pub format: PixelFormat,
}

impl TexRegion {
    /// Full level 0 of an allocation.
    pub fn full(alloc: &TextureAllocation) -> Self {
        Self {
            x: 0,
            y: 0,
            width: alloc.width,
            height: alloc.height,
            level: 0,
            format: alloc.format,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexWrap {
    Clamp,
    Repeat,
    MirroredRepeat,
}

/// Sampler state applied to a texture object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexParams {
    pub mag_filter: TexFilter,
    pub min_filter: TexFilter,
    pub wrap_s: TexWrap,
    pub wrap_t: TexWrap,
    pub max_level: Option<u32>,
    pub max_anisotropy: Option<f32>,
}

impl Default for TexParams {
    fn default() -> Self {
        Self {
            mag_filter: TexFilter::Nearest,
            min_filter: TexFilter::Nearest,
            wrap_s: TexWrap::Clamp,
            wrap_t: TexWrap::Clamp,
            max_level: None,
            max_anisotropy: None,
        }
    }
}

/// One vertex of a draw batch, in clip space.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub color: [f32; 4],
}

/// A self-contained draw: vertices plus the texture they sample, if any.
#[derive(Debug, Clone)]
pub struct DrawBatch {
    pub texture: Option<TextureId>,
    pub vertices: Box<[Vertex]>,
}

/// Source rectangle of a color-buffer read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegion {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl ReadRegion {
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// The opaque device capability set the consumer dispatches into.
///
/// Exactly one execution context calls these methods for the lifetime of a
/// context: the consumer thread in threaded mode, the producer itself in
/// direct mode. Implementations therefore never need internal locking.
pub trait GfxDevice: Send {
    fn caps(&self) -> &DeviceCaps;

    /// Direct-create a texture object (DSA style).
    fn create_texture(&mut self) -> Result<TextureId, DeviceError>;
    /// Generate a texture name that becomes a real object on first bind.
    fn gen_texture(&mut self) -> Result<TextureId, DeviceError>;
    fn delete_texture(&mut self, tex: TextureId) -> Result<(), DeviceError>;
    fn bind_texture(&mut self, tex: TextureId) -> Result<(), DeviceError>;

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError>;
    fn delete_buffer(&mut self, buf: BufferId) -> Result<(), DeviceError>;
    /// Bind (or with `None`, unbind) the pixel-unpack buffer.
    fn bind_pixel_buffer(&mut self, buf: Option<BufferId>) -> Result<(), DeviceError>;
    /// Stage upload data in the bound pixel-unpack buffer.
    fn pixel_buffer_data(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Allocate immutable storage, addressing the texture by handle.
    fn alloc_texture_storage(
        &mut self,
        tex: TextureId,
        alloc: &TextureAllocation,
    ) -> Result<(), DeviceError>;
    /// Allocate immutable storage for the bound texture.
    fn alloc_texture_storage_bound(&mut self, alloc: &TextureAllocation)
    -> Result<(), DeviceError>;
    /// Legacy mutable image allocation for the bound texture.
    fn alloc_texture_image_bound(&mut self, alloc: &TextureAllocation) -> Result<(), DeviceError>;

    /// Upload a sub-image from the bound pixel buffer, by handle.
    fn texture_sub_image_buffered(
        &mut self,
        tex: TextureId,
        region: &TexRegion,
    ) -> Result<(), DeviceError>;
    /// Upload a sub-image from the bound pixel buffer to the bound texture.
    fn texture_sub_image_buffered_bound(&mut self, region: &TexRegion) -> Result<(), DeviceError>;
    /// Upload a sub-image straight from client memory to the bound texture.
    fn texture_sub_image_unbuffered(
        &mut self,
        region: &TexRegion,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    fn set_texture_params(
        &mut self,
        tex: TextureId,
        params: &TexParams,
    ) -> Result<(), DeviceError>;
    fn set_texture_params_bound(&mut self, params: &TexParams) -> Result<(), DeviceError>;

    fn draw(&mut self, batch: &DrawBatch) -> Result<(), DeviceError>;

    /// Copy a region of the color buffer into `dst`, tightly packed at
    /// `region.width` pixels per row. `dst` may be larger than the region.
    fn read_pixels(&mut self, region: &ReadRegion, dst: &mut [u8]) -> Result<(), DeviceError>;

    /// Full pipeline sync: returns once all prior calls have completed.
    fn finish(&mut self) -> Result<(), DeviceError>;
}
