//! Drawbridge GPU — wgpu backend for the deferred command core.
//!
//! This crate owns all GPU resources. No queueing logic here — it
//! implements [`drawbridge_core::GfxDevice`] against an offscreen render
//! target and lets `drawbridge-core` drive it from whichever thread ends
//! up owning the device.

pub mod device;
pub mod pipeline;

pub use device::{InitError, WgpuDevice};
