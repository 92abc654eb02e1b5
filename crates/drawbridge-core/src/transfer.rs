//! Rotating transfer slots for asynchronous pixel readback.
//!
//! A pool of N CPU-visible regions alternates between the consumer (which
//! fills a slot from the device) and the producer (which reads a slot
//! through a guard-backed view). The rotation discipline in
//! [`crate::readback`] keeps write-target and read-source distinct; the
//! per-slot mutex only backstops that discipline and is uncontended in
//! correct use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::device::{DeviceError, GfxDevice, ReadRegion};

/// One rotating CPU-visible region.
pub struct TransferSlot {
    index: usize,
    capacity: usize,
    /// Set while the consumer is copying device pixels into this slot.
    in_flight: AtomicBool,
    data: Mutex<Box<[u8]>>,
}

impl TransferSlot {
    fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            capacity,
            in_flight: AtomicBool::new(false),
            data: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Consumer side: copy device pixels into this slot.
    pub(crate) fn fill(
        &self,
        device: &mut dyn GfxDevice,
        region: &ReadRegion,
    ) -> Result<(), DeviceError> {
        self.in_flight.store(true, Ordering::Release);
        let result = {
            let mut guard = self.data.lock();
            device.read_pixels(region, &mut guard)
        };
        self.in_flight.store(false, Ordering::Release);
        result
    }

    /// Producer side: lock the payload for reading.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.data.lock()
    }
}

/// Fixed set of transfer slots, allocated once per color-buffer reader and
/// sized to the maximum expected pixel payload.
pub struct TransferPool {
    slots: Vec<Arc<TransferSlot>>,
}

impl TransferPool {
    /// Panics on a zero-sized pool; slot allocation failures abort setup.
    pub fn new(count: usize, capacity: usize) -> Self {
        assert!(count > 0, "transfer pool needs at least one slot");
        assert!(capacity > 0, "transfer slots need a non-zero capacity");
        let slots = (0..count)
            .map(|index| Arc::new(TransferSlot::new(index, capacity)))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &Arc<TransferSlot> {
        &self.slots[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::DeviceCaps;
    use crate::device::PixelFormat;
    use crate::mock::MockDevice;

    #[test]
    fn test_fill_copies_device_pixels_and_clears_in_flight() {
        let (mut device, state) = MockDevice::new(DeviceCaps::legacy(), 4, 4);
        state.lock().fill_framebuffer(&[9, 8, 7, 6]);

        let pool = TransferPool::new(2, 4 * 4 * 4);
        let region = ReadRegion {
            x0: 0,
            y0: 0,
            width: 4,
            height: 1,
            format: PixelFormat::Rgba8,
        };
        pool.slot(0)
            .fill(&mut device, &region)
            .expect("mock read_pixels succeeds");

        assert!(!pool.slot(0).is_in_flight());
        let guard = pool.slot(0).lock();
        assert_eq!(&guard[..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_pool_slots_are_indexed() {
        let pool = TransferPool::new(3, 16);
        assert_eq!(pool.len(), 3);
        for i in 0..3 {
            assert_eq!(pool.slot(i).index(), i);
            assert_eq!(pool.slot(i).capacity(), 16);
        }
    }
}
