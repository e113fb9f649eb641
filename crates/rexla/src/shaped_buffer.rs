//! Device-resident values.
//!
//! A [`ShapedBuffer`] maps every sub-shape index of its on-device shape to a
//! device region: arrays hold their elements in layout order, tuple nodes hold
//! a table naming their children. A [`ScopedShapedBuffer`] also owns those
//! regions and returns them to its allocator when dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::allocator::DeviceMemoryAllocator;
use crate::error::XlaResult;
use crate::executor::DeviceMemory;
use crate::platform::PlatformId;
use crate::shape::{Shape, ShapeIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedBuffer {
    on_host_shape: Shape,
    on_device_shape: Shape,
    platform: PlatformId,
    device_ordinal: usize,
    buffers: BTreeMap<ShapeIndex, DeviceMemory>,
}

impl ShapedBuffer {
    /// Empty buffer table for `on_host_shape`; the device shape gets default
    /// layouts wherever the host shape has none.
    pub fn new(on_host_shape: Shape, platform: PlatformId, device_ordinal: usize) -> Self {
        let on_device_shape = on_host_shape.with_default_layouts();
        Self {
            on_host_shape,
            on_device_shape,
            platform,
            device_ordinal,
            buffers: BTreeMap::new(),
        }
    }

    pub fn on_host_shape(&self) -> &Shape {
        &self.on_host_shape
    }

    /// Shape as stored on the device, with every layout explicit.
    pub fn on_device_shape(&self) -> &Shape {
        &self.on_device_shape
    }

    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    pub fn device_ordinal(&self) -> usize {
        self.device_ordinal
    }

    pub fn buffer(&self, index: &[usize]) -> Option<&DeviceMemory> {
        self.buffers.get(index)
    }

    pub fn root_buffer(&self) -> Option<&DeviceMemory> {
        self.buffer(&[])
    }

    pub fn set_buffer(&mut self, index: ShapeIndex, memory: DeviceMemory) {
        self.buffers.insert(index, memory);
    }

    pub fn buffers(&self) -> impl Iterator<Item = (&ShapeIndex, &DeviceMemory)> {
        self.buffers.iter()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Total bytes across every region.
    pub fn size_in_bytes(&self) -> usize {
        self.buffers.values().map(DeviceMemory::size).sum()
    }
}

impl fmt::Display for ShapedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ShapedBuffer({}:{}), on-device shape={}",
            self.platform, self.device_ordinal, self.on_device_shape
        )?;
        for (index, memory) in &self.buffers {
            writeln!(f, "  {index:?}: {memory}")?;
        }
        Ok(())
    }
}

/// A [`ShapedBuffer`] that owns its device regions.
pub struct ScopedShapedBuffer {
    buffer: ShapedBuffer,
    allocator: Arc<dyn DeviceMemoryAllocator>,
}

impl ScopedShapedBuffer {
    /// Allocates one region per sub-shape of `on_host_shape` on `device_ordinal`.
    ///
    /// Regions allocated before a failure are released again.
    pub fn allocate(
        on_host_shape: Shape,
        allocator: Arc<dyn DeviceMemoryAllocator>,
        device_ordinal: usize,
    ) -> XlaResult<Self> {
        let buffer = ShapedBuffer::new(on_host_shape, allocator.platform().clone(), device_ordinal);
        let mut scoped = Self { buffer, allocator };
        for index in scoped.buffer.on_device_shape.indices() {
            let size = scoped
                .buffer
                .on_device_shape
                .subshape(&index)
                .map_or(0, Shape::node_byte_size);
            let memory = scoped.allocator.allocate(device_ordinal, size)?;
            scoped.buffer.set_buffer(index, memory);
        }
        Ok(scoped)
    }

    /// Takes ownership of the regions in `buffer`.
    pub fn from_shaped_buffer(buffer: ShapedBuffer, allocator: Arc<dyn DeviceMemoryAllocator>) -> Self {
        Self { buffer, allocator }
    }

    pub fn allocator(&self) -> &Arc<dyn DeviceMemoryAllocator> {
        &self.allocator
    }

    /// Gives up ownership; the caller becomes responsible for the regions.
    pub fn release(mut self) -> ShapedBuffer {
        let released = self.buffer.clone();
        self.buffer.buffers.clear();
        released
    }
}

impl Deref for ScopedShapedBuffer {
    type Target = ShapedBuffer;

    fn deref(&self) -> &ShapedBuffer {
        &self.buffer
    }
}

impl Drop for ScopedShapedBuffer {
    fn drop(&mut self) {
        let ordinal = self.buffer.device_ordinal;
        for (index, memory) in std::mem::take(&mut self.buffer.buffers) {
            if let Err(err) = self.allocator.deallocate(ordinal, &memory) {
                tracing::warn!(?index, %memory, error = %err, "failed to release device memory");
            }
        }
    }
}

impl fmt::Debug for ScopedShapedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedShapedBuffer")
            .field("buffer", &self.buffer)
            .field("allocator", self.allocator.platform())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::StreamExecutorMemoryAllocator;
    use crate::dtype::DType;
    use crate::executor::StreamExecutor;

    fn allocator() -> Arc<StreamExecutorMemoryAllocator> {
        let platform = PlatformId::new("test");
        let exec = Arc::new(StreamExecutor::new(platform.clone(), 0));
        Arc::new(StreamExecutorMemoryAllocator::new(platform, vec![exec]))
    }

    #[test]
    fn drop_releases_every_region() {
        let allocator = allocator();
        let shape = Shape::tuple([
            Shape::array(DType::F32, [3]),
            Shape::tuple([Shape::scalar(DType::Si32)]),
        ]);
        {
            let scoped =
                ScopedShapedBuffer::allocate(shape.clone(), allocator.clone(), 0).unwrap();
            assert_eq!(scoped.buffer_count(), 4);
            assert_eq!(scoped.root_buffer().map(DeviceMemory::size), Some(16));
            assert_eq!(scoped.buffer(&[0]).map(DeviceMemory::size), Some(12));
            assert_eq!(allocator.live_allocations(), 4);
        }
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn release_hands_over_ownership() {
        let allocator = allocator();
        let scoped =
            ScopedShapedBuffer::allocate(Shape::scalar(DType::F64), allocator.clone(), 0).unwrap();
        let plain = scoped.release();
        assert_eq!(allocator.live_allocations(), 1);
        let scoped = ScopedShapedBuffer::from_shaped_buffer(plain, allocator.clone());
        drop(scoped);
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn failed_allocation_leaks_nothing() {
        let allocator = allocator();
        let err = ScopedShapedBuffer::allocate(Shape::scalar(DType::F32), allocator.clone(), 3);
        assert!(err.is_err());
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn device_shape_gets_default_layouts() {
        let buffer = ShapedBuffer::new(Shape::array(DType::F32, [2, 3]), PlatformId::new("test"), 0);
        assert!(buffer.on_device_shape().has_layouts());
        assert!(!buffer.on_host_shape().has_layouts());
    }
}
