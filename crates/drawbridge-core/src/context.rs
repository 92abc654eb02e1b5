//! The producer-facing context.
//!
//! [`DeferredContext`] owns the dispatcher and the capability-selected
//! strategies, and exposes the command vocabulary as plain methods. The
//! frontend never sees commands, strategies or the consumer thread; it
//! calls `upload_texture` and moves on.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::caps::DeviceCaps;
use crate::command::{Command, PixelData, completion};
use crate::config::ContextConfig;
use crate::device::{DrawBatch, GfxDevice, PixelFormat, TexParams, TexRegion, TextureAllocation, TextureId};
use crate::queue::{DispatchError, Dispatcher};
use crate::readback::ColorBufferReader;
use crate::strategy::StrategySet;

pub struct DeferredContext {
    dispatcher: Arc<Dispatcher>,
    caps: DeviceCaps,
    strategies: Mutex<StrategySet>,
    config: ContextConfig,
}

impl DeferredContext {
    /// Probe the device's capabilities, select techniques, and start the
    /// consumer (or set up inline execution, per `config.threaded`).
    pub fn new(device: Box<dyn GfxDevice>, config: ContextConfig) -> Self {
        let caps = *device.caps();
        let strategies = StrategySet::select(&caps);
        let dispatcher = if config.threaded {
            Arc::new(Dispatcher::threaded(device, config.queue_capacity))
        } else {
            Arc::new(Dispatcher::direct(device))
        };
        tracing::info!(
            threaded = config.threaded,
            version = ?caps.version,
            buffer_storage = caps.buffer_storage,
            direct_state_access = caps.direct_state_access,
            texture_storage = caps.texture_storage,
            "deferred context ready"
        );
        Self {
            dispatcher,
            caps,
            strategies: Mutex::new(strategies),
            config,
        }
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn is_threaded(&self) -> bool {
        self.dispatcher.is_threaded()
    }

    /// The raw dispatch handle, for callers that enqueue their own
    /// commands.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Create a texture object. Blocking: the handle must exist before the
    /// producer can reference it in later commands.
    pub fn create_texture(&self) -> Result<TextureId, DispatchError> {
        let create = self.strategies.lock().create;
        create.create(&self.dispatcher)
    }

    /// Delete a texture and purge any per-handle cached state, so a
    /// recycled handle starts clean.
    pub fn delete_texture(&self, tex: TextureId) -> Result<(), DispatchError> {
        self.strategies.lock().forget(tex);
        self.dispatcher.submit(Command::DeleteTexture { tex })
    }

    /// Allocate texture storage. Returns `false` when a repeat init of the
    /// same handle was suppressed.
    pub fn init_texture(
        &self,
        tex: TextureId,
        alloc: TextureAllocation,
    ) -> Result<bool, DispatchError> {
        self.strategies.lock().storage.init(&self.dispatcher, tex, alloc)
    }

    /// Upload pixels into a texture sub-region. Fire-and-forget; the pixel
    /// payload moves into the queue.
    pub fn upload_texture(
        &self,
        tex: TextureId,
        region: TexRegion,
        data: impl Into<PixelData>,
    ) -> Result<(), DispatchError> {
        self.strategies
            .lock()
            .update
            .upload(&self.dispatcher, tex, region, data.into())
    }

    /// Apply sampler parameters. Returns `false` when the parameter cache
    /// suppressed a redundant application.
    pub fn set_texture_params(
        &self,
        tex: TextureId,
        params: TexParams,
    ) -> Result<bool, DispatchError> {
        self.strategies.lock().params.apply(&self.dispatcher, tex, params)
    }

    pub fn draw(&self, batch: DrawBatch) -> Result<(), DispatchError> {
        self.dispatcher.submit(Command::Draw { batch })
    }

    /// Full pipeline sync. Blocks until every previously enqueued command
    /// has executed and the device reports idle.
    pub fn finish(&self) -> Result<(), DispatchError> {
        let (done, token) = completion();
        self.dispatcher.submit_wait(Command::Finish { done }, token)
    }

    /// A color-buffer reader sized for a `width` x `height` buffer of
    /// `format` pixels, sharing this context's queue.
    pub fn color_buffer_reader(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> ColorBufferReader {
        ColorBufferReader::new(
            &self.caps,
            Arc::clone(&self.dispatcher),
            width,
            height,
            format,
            self.config.transfer_slots,
        )
    }

    /// Ordered shutdown; idempotent, also runs on drop.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
