//! Color-buffer readback without pipeline stalls.
//!
//! Two techniques behind one `read` contract: a persistent-mapped pool for
//! devices with coherent buffer storage, and an explicit-map double buffer
//! for everything else. Both return a [`ReadbackView`] — pixel bytes, row
//! stride, height offset — that borrows the reader, so the data is valid
//! exactly until the next `read` (the borrow checker enforces the original
//! "copy out before calling again" rule). Dropping the view releases the
//! mapping.

use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::caps::DeviceCaps;
use crate::command::{Command, completion};
use crate::device::{PixelFormat, ReadRegion};
use crate::queue::{DispatchError, Dispatcher};
use crate::strategy::ReadbackKind;
use crate::transfer::TransferPool;

#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("read of {need} bytes exceeds slot capacity {capacity}")]
    RegionTooLarge { need: usize, capacity: usize },
}

/// Parameters of one color-buffer read.
///
/// The copy always packs full buffer-width rows (the readers read
/// `buffer_width * height` pixels starting at the source origin); `width`
/// describes the sub-rectangle the caller cares about within those rows.
#[derive(Debug, Clone, Copy)]
pub struct ReadParams {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Demand current data (forces a pipeline sync) instead of the
    /// pipelined previous-copy result.
    pub sync: bool,
}

/// CPU view of one completed (or in-flight, for pipelined reads) copy.
/// Valid until dropped; the borrow it holds on the reader makes a stale
/// view unrepresentable.
pub struct ReadbackView<'a> {
    guard: MutexGuard<'a, Box<[u8]>>,
    slot_index: usize,
    height_offset: u32,
    stride: u32,
    len: usize,
}

impl ReadbackView<'_> {
    /// Tightly packed pixel bytes, `stride()` pixels per row.
    pub fn pixels(&self) -> &[u8] {
        &self.guard[..self.len]
    }

    /// Row width in pixels.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Rows to skip before the requested region starts.
    pub fn height_offset(&self) -> u32 {
        self.height_offset
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }
}

/// The capability-selected readback technique. The variant set is closed;
/// selection happens once, at context setup.
pub enum ColorBufferReader {
    Persistent(PersistentReader),
    Mapped(MappedReader),
}

impl ColorBufferReader {
    /// Pick the fastest technique the device supports and allocate its
    /// transfer slots, sized for `width * height` pixels of `format`.
    pub fn new(
        caps: &DeviceCaps,
        dispatcher: Arc<Dispatcher>,
        width: u32,
        height: u32,
        format: PixelFormat,
        slots: usize,
    ) -> Self {
        let capacity = width as usize * height as usize * format.bytes_per_pixel();
        match ReadbackKind::select(caps) {
            ReadbackKind::Persistent => Self::Persistent(PersistentReader {
                dispatcher,
                pool: TransferPool::new(slots.max(1), capacity),
                width,
                cur: 0,
            }),
            ReadbackKind::Mapped => Self::Mapped(MappedReader {
                dispatcher,
                pool: TransferPool::new(2, capacity),
                width,
                cur: 0,
            }),
        }
    }

    pub fn kind(&self) -> ReadbackKind {
        match self {
            Self::Persistent(_) => ReadbackKind::Persistent,
            Self::Mapped(_) => ReadbackKind::Mapped,
        }
    }

    /// Read a sub-rectangle of the color buffer. See the variant types for
    /// the latency/ordering contract of each technique.
    pub fn read(&mut self, params: &ReadParams) -> Result<ReadbackView<'_>, ReadbackError> {
        match self {
            Self::Persistent(reader) => reader.read(params),
            Self::Mapped(reader) => reader.read(params),
        }
    }
}

/// Persistent-mapped pool: slots stay mapped for their whole lifetime, so
/// a read is just "issue the copy, hand out the standing pointer". With
/// `sync`, a full pipeline sync runs before the view is returned.
pub struct PersistentReader {
    dispatcher: Arc<Dispatcher>,
    pool: TransferPool,
    width: u32,
    /// Rotation index; stays 0 while one active slot at a time suffices.
    cur: usize,
}

impl PersistentReader {
    fn read(&mut self, params: &ReadParams) -> Result<ReadbackView<'_>, ReadbackError> {
        let region = ReadRegion {
            x0: params.x0,
            y0: params.y0,
            width: self.width,
            height: params.height,
            format: params.format,
        };
        let slot = self.pool.slot(self.cur);
        let need = region.byte_len();
        if need > slot.capacity() {
            return Err(ReadbackError::RegionTooLarge {
                need,
                capacity: slot.capacity(),
            });
        }

        if params.sync {
            let (tx, token) = completion();
            self.dispatcher.submit_wait(
                Command::ReadPixels {
                    slot: Arc::clone(slot),
                    region,
                    done: Some(tx),
                },
                token,
            )?;
            debug_assert!(!slot.is_in_flight());
        } else {
            self.dispatcher.submit(Command::ReadPixels {
                slot: Arc::clone(slot),
                region,
                done: None,
            })?;
        }

        Ok(ReadbackView {
            guard: slot.lock(),
            slot_index: slot.index(),
            height_offset: 0,
            stride: self.width,
            len: need,
        })
    }
}

/// Explicit-map fallback with two slots in alternation.
///
/// Non-sync reads advance the rotation index, issue the copy into the NEW
/// slot and return the OTHER one — a deliberate one-frame delay that trades
/// latency for never stalling on an unfinished copy. Sync reads target the
/// last slot with a blocking copy and return current data.
pub struct MappedReader {
    dispatcher: Arc<Dispatcher>,
    pool: TransferPool,
    width: u32,
    cur: usize,
}

impl MappedReader {
    fn read(&mut self, params: &ReadParams) -> Result<ReadbackView<'_>, ReadbackError> {
        let region = ReadRegion {
            x0: params.x0,
            y0: params.y0,
            width: self.width,
            height: params.height,
            format: params.format,
        };
        let need = region.byte_len();
        if need > self.pool.slot(0).capacity() {
            return Err(ReadbackError::RegionTooLarge {
                need,
                capacity: self.pool.slot(0).capacity(),
            });
        }

        let read_index = if params.sync {
            let last = self.pool.len() - 1;
            let slot = self.pool.slot(last);
            let (tx, token) = completion();
            self.dispatcher.submit_wait(
                Command::ReadPixels {
                    slot: Arc::clone(slot),
                    region,
                    done: Some(tx),
                },
                token,
            )?;
            debug_assert!(!slot.is_in_flight());
            last
        } else {
            self.cur ^= 1;
            self.dispatcher.submit(Command::ReadPixels {
                slot: Arc::clone(self.pool.slot(self.cur)),
                region,
                done: None,
            })?;
            // Hand back the previous slot: its copy was issued last call
            // and has (almost certainly) completed by now.
            self.cur ^ 1
        };

        let slot = self.pool.slot(read_index);
        Ok(ReadbackView {
            guard: slot.lock(),
            slot_index: slot.index(),
            height_offset: 0,
            stride: self.width,
            len: need,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    const W: u32 = 4;
    const H: u32 = 4;

    fn reader_with_mock(caps: DeviceCaps) -> (ColorBufferReader, crate::mock::SharedState) {
        let (device, state) = MockDevice::new(caps, W, H);
        let dispatcher = Arc::new(Dispatcher::direct(Box::new(device)));
        let reader = ColorBufferReader::new(&caps, dispatcher, W, H, PixelFormat::Rgba8, 3);
        (reader, state)
    }

    fn params(sync: bool) -> ReadParams {
        ReadParams {
            x0: 0,
            y0: 0,
            width: W,
            height: H,
            format: PixelFormat::Rgba8,
            sync,
        }
    }

    #[test]
    fn test_selects_persistent_when_buffer_storage_available() {
        let (reader, _) = reader_with_mock(DeviceCaps::modern());
        assert_eq!(reader.kind(), ReadbackKind::Persistent);
    }

    #[test]
    fn test_selects_mapped_fallback_otherwise() {
        let (reader, _) = reader_with_mock(DeviceCaps::legacy());
        assert_eq!(reader.kind(), ReadbackKind::Mapped);
    }

    #[test]
    fn test_persistent_sync_read_returns_current_pixels() {
        let (mut reader, state) = reader_with_mock(DeviceCaps::modern());
        state.lock().fill_framebuffer(&[0xAA, 0xBB, 0xCC, 0xFF]);

        let view = reader.read(&params(true)).expect("read succeeds");
        assert_eq!(view.stride(), W);
        assert_eq!(view.height_offset(), 0);
        assert_eq!(&view.pixels()[..4], &[0xAA, 0xBB, 0xCC, 0xFF]);
    }

    #[test]
    fn test_mapped_nonsync_read_is_delayed_one_frame() {
        let (mut reader, state) = reader_with_mock(DeviceCaps::legacy());

        state.lock().fill_framebuffer(&[1, 1, 1, 1]);
        let first = reader.read(&params(false)).expect("read succeeds");
        // Nothing has been copied into the returned slot yet.
        assert_eq!(&first.pixels()[..4], &[0, 0, 0, 0]);
        drop(first);

        state.lock().fill_framebuffer(&[2, 2, 2, 2]);
        let second = reader.read(&params(false)).expect("read succeeds");
        // The second call returns the device state at the time of the
        // FIRST call, not the second.
        assert_eq!(&second.pixels()[..4], &[1, 1, 1, 1]);
    }

    #[test]
    fn test_mapped_rotation_never_returns_the_write_target() {
        let (mut reader, state) = reader_with_mock(DeviceCaps::legacy());
        state.lock().fill_framebuffer(&[3, 3, 3, 3]);

        for _ in 0..4 {
            let ColorBufferReader::Mapped(ref m) = reader else {
                panic!("legacy caps select the mapped reader");
            };
            let write_target = m.cur ^ 1; // the slot the next read will copy into
            let view = reader.read(&params(false)).expect("read succeeds");
            assert_ne!(view.slot_index(), write_target);
        }
    }

    #[test]
    fn test_mapped_sync_read_returns_current_pixels() {
        let (mut reader, state) = reader_with_mock(DeviceCaps::legacy());
        state.lock().fill_framebuffer(&[7, 8, 9, 10]);

        let view = reader.read(&params(true)).expect("read succeeds");
        assert_eq!(&view.pixels()[..4], &[7, 8, 9, 10]);
    }

    #[test]
    fn test_oversized_region_is_rejected() {
        let (mut reader, _) = reader_with_mock(DeviceCaps::legacy());
        let oversized = ReadParams {
            height: H * 10,
            ..params(true)
        };
        assert!(matches!(
            reader.read(&oversized),
            Err(ReadbackError::RegionTooLarge { .. })
        ));
    }
}
