//! Per-device memory owner.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{XlaError, XlaResult};
use crate::platform::PlatformId;

/// Opaque handle to one device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMemory {
    id: u64,
    ordinal: usize,
    size: usize,
}

impl DeviceMemory {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Display for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{} ({} bytes)", self.id, self.ordinal, self.size)
    }
}

/// Byte-addressed memory of one device.
pub struct StreamExecutor {
    platform: PlatformId,
    ordinal: usize,
    memory_limit: Option<usize>,
    next_id: AtomicU64,
    allocations: Mutex<HashMap<u64, Box<[u8]>>>,
}

impl StreamExecutor {
    pub fn new(platform: PlatformId, ordinal: usize) -> Self {
        Self {
            platform,
            ordinal,
            memory_limit: None,
            next_id: AtomicU64::new(1),
            allocations: Mutex::new(HashMap::new()),
        }
    }

    /// Caps the number of live bytes; allocations beyond it fail.
    pub fn with_memory_limit(mut self, limit: Option<usize>) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    pub fn device_ordinal(&self) -> usize {
        self.ordinal
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Box<[u8]>>> {
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allocate(&self, size: usize) -> XlaResult<DeviceMemory> {
        let mut allocations = self.lock();
        if let Some(limit) = self.memory_limit {
            let live: usize = allocations.values().map(|bytes| bytes.len()).sum();
            if live.saturating_add(size) > limit {
                return Err(XlaError::Allocation {
                    ordinal: self.ordinal,
                    size,
                    reason: format!("{live} of {limit} bytes already in use"),
                });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        allocations.insert(id, vec![0u8; size].into_boxed_slice());
        tracing::trace!(ordinal = self.ordinal, id, size, "allocated device memory");
        Ok(DeviceMemory {
            id,
            ordinal: self.ordinal,
            size,
        })
    }

    pub fn deallocate(&self, memory: &DeviceMemory) -> XlaResult<()> {
        self.check_owner(memory)?;
        match self.lock().remove(&memory.id) {
            Some(_) => {
                tracing::trace!(ordinal = self.ordinal, id = memory.id, "freed device memory");
                Ok(())
            }
            None => Err(XlaError::Allocation {
                ordinal: self.ordinal,
                size: memory.size,
                reason: format!("region {memory} is not live"),
            }),
        }
    }

    /// Overwrites a whole region.
    pub fn write(&self, memory: &DeviceMemory, bytes: &[u8]) -> XlaResult<()> {
        self.check_owner(memory)?;
        let mut allocations = self.lock();
        let region = allocations
            .get_mut(&memory.id)
            .ok_or_else(|| XlaError::transfer(format!("write to freed region {memory}")))?;
        if region.len() != bytes.len() {
            return Err(XlaError::transfer(format!(
                "write of {} bytes into region {memory}",
                bytes.len()
            )));
        }
        region.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, memory: &DeviceMemory) -> XlaResult<Vec<u8>> {
        self.check_owner(memory)?;
        self.lock()
            .get(&memory.id)
            .map(|region| region.to_vec())
            .ok_or_else(|| XlaError::transfer(format!("read from freed region {memory}")))
    }

    pub fn live_allocations(&self) -> usize {
        self.lock().len()
    }

    pub fn live_bytes(&self) -> usize {
        self.lock().values().map(|bytes| bytes.len()).sum()
    }

    fn check_owner(&self, memory: &DeviceMemory) -> XlaResult<()> {
        if memory.ordinal != self.ordinal {
            return Err(XlaError::DeviceMismatch(format!(
                "region {memory} belongs to device {}, not device {}",
                memory.ordinal, self.ordinal
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for StreamExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamExecutor")
            .field("platform", &self.platform)
            .field("ordinal", &self.ordinal)
            .field("live_allocations", &self.live_allocations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_read_free() {
        let exec = StreamExecutor::new(PlatformId::new("test"), 0);
        let mem = exec.allocate(4).unwrap();
        exec.write(&mem, &[1, 2, 3, 4]).unwrap();
        assert_eq!(exec.read(&mem).unwrap(), vec![1, 2, 3, 4]);
        assert!(exec.write(&mem, &[1]).is_err());
        assert_eq!(exec.live_bytes(), 4);
        exec.deallocate(&mem).unwrap();
        assert_eq!(exec.live_allocations(), 0);
        assert!(exec.deallocate(&mem).is_err());
        assert!(exec.read(&mem).is_err());
    }

    #[test]
    fn memory_limit_is_enforced() {
        let exec = StreamExecutor::new(PlatformId::new("test"), 1).with_memory_limit(Some(8));
        let a = exec.allocate(6).unwrap();
        let err = exec.allocate(4).unwrap_err();
        assert!(matches!(err, XlaError::Allocation { ordinal: 1, size: 4, .. }));
        exec.deallocate(&a).unwrap();
        assert!(exec.allocate(8).is_ok());
    }

    #[test]
    fn foreign_regions_are_rejected() {
        let a = StreamExecutor::new(PlatformId::new("test"), 0);
        let b = StreamExecutor::new(PlatformId::new("test"), 1);
        let mem = a.allocate(1).unwrap();
        assert!(matches!(b.read(&mem), Err(XlaError::DeviceMismatch(_))));
    }
}
