use std::fmt;
use std::sync::Arc;

use crate::error::{XlaError, XlaResult};
use crate::executor::{DeviceMemory, StreamExecutor};
use crate::platform::{Platform, PlatformId};

/// Source of device memory for shaped buffers.
pub trait DeviceMemoryAllocator: Send + Sync {
    fn platform(&self) -> &PlatformId;

    fn allocate(&self, ordinal: usize, size: usize) -> XlaResult<DeviceMemory>;

    fn deallocate(&self, ordinal: usize, memory: &DeviceMemory) -> XlaResult<()>;
}

/// Default allocator: forwards to the stream executor of each device.
pub struct StreamExecutorMemoryAllocator {
    platform: PlatformId,
    executors: Vec<Arc<StreamExecutor>>,
}

impl StreamExecutorMemoryAllocator {
    pub fn new(platform: PlatformId, executors: Vec<Arc<StreamExecutor>>) -> Self {
        Self {
            platform,
            executors,
        }
    }

    /// Allocator over every device of `platform`.
    pub fn for_platform(platform: &dyn Platform) -> XlaResult<Self> {
        let executors = (0..platform.device_count())
            .map(|ordinal| platform.executor(ordinal))
            .collect::<XlaResult<Vec<_>>>()?;
        Ok(Self::new(platform.id().clone(), executors))
    }

    pub fn executor(&self, ordinal: usize) -> XlaResult<&Arc<StreamExecutor>> {
        self.executors
            .get(ordinal)
            .ok_or(XlaError::InvalidDeviceOrdinal {
                ordinal,
                count: self.executors.len(),
            })
    }

    /// Live regions across all devices.
    pub fn live_allocations(&self) -> usize {
        self.executors.iter().map(|e| e.live_allocations()).sum()
    }

    pub fn live_bytes(&self) -> usize {
        self.executors.iter().map(|e| e.live_bytes()).sum()
    }
}

impl DeviceMemoryAllocator for StreamExecutorMemoryAllocator {
    fn platform(&self) -> &PlatformId {
        &self.platform
    }

    fn allocate(&self, ordinal: usize, size: usize) -> XlaResult<DeviceMemory> {
        self.executor(ordinal)?.allocate(size)
    }

    fn deallocate(&self, ordinal: usize, memory: &DeviceMemory) -> XlaResult<()> {
        self.executor(ordinal)?.deallocate(memory)
    }
}

impl fmt::Debug for StreamExecutorMemoryAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamExecutorMemoryAllocator")
            .field("platform", &self.platform)
            .field("devices", &self.executors.len())
            .field("live_allocations", &self.live_allocations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_ordinal() {
        let platform = PlatformId::new("test");
        let executors = (0..2)
            .map(|ordinal| Arc::new(StreamExecutor::new(platform.clone(), ordinal)))
            .collect();
        let allocator = StreamExecutorMemoryAllocator::new(platform, executors);
        let mem = allocator.allocate(1, 16).unwrap();
        assert_eq!(mem.device_ordinal(), 1);
        assert_eq!(allocator.live_bytes(), 16);
        assert!(matches!(
            allocator.allocate(2, 1),
            Err(XlaError::InvalidDeviceOrdinal { ordinal: 2, count: 2 })
        ));
        allocator.deallocate(1, &mem).unwrap();
        assert_eq!(allocator.live_allocations(), 0);
    }
}
