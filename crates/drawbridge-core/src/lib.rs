//! Drawbridge Core — deferred command execution for an emulated GPU.
//!
//! A producer thread (the emulated graphics pipeline) records commands and
//! hands them to a bounded FIFO queue; a dedicated consumer thread replays
//! them, in order, against a [`device::GfxDevice`] backend. Pixel readback
//! goes through rotating transfer slots so the producer never has to stall
//! on an in-flight copy. No GPU dependency — backends live in sibling
//! crates (`drawbridge-gpu` for wgpu).

pub mod caps;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod queue;
pub mod readback;
pub mod strategy;
pub mod transfer;
mod worker;

#[cfg(test)]
pub(crate) mod mock;

// Re-exports for convenience.
pub use caps::DeviceCaps;
pub use command::{Command, CompletionToken, PixelData, completion};
pub use config::ContextConfig;
pub use context::DeferredContext;
pub use device::{
    BufferId, DeviceError, DrawBatch, GfxDevice, PixelFormat, ReadRegion, TexParams, TexRegion,
    TextureAllocation, TextureId, Vertex,
};
pub use queue::{DispatchError, Dispatcher};
pub use readback::{ColorBufferReader, ReadParams, ReadbackError, ReadbackView};
pub use strategy::StrategySet;
