use std::fmt;
use std::sync::Arc;

use crate::allocator::DeviceMemoryAllocator;
use crate::profiling::ExecutionProfile;
use crate::shape::Shape;
use crate::stream::Stream;

/// Options fixed when a computation is compiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutableBuildOptions {
    /// Device the executable is built for; the client's default when unset.
    pub device_ordinal: Option<usize>,
    /// Shape, with layouts, in which the result is stored.
    pub result_layout: Option<Shape>,
}

impl ExecutableBuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_ordinal(mut self, ordinal: usize) -> Self {
        self.device_ordinal = Some(ordinal);
        self
    }

    pub fn with_result_layout(mut self, shape: Shape) -> Self {
        self.result_layout = Some(shape);
        self
    }
}

/// Per-launch options. Every field is optional; the executable falls back to
/// the client's allocator and the build-time device.
#[derive(Clone, Default)]
pub struct ExecutableRunOptions {
    pub allocator: Option<Arc<dyn DeviceMemoryAllocator>>,
    pub stream: Option<Arc<Stream>>,
    pub device_ordinal: Option<usize>,
    pub execution_profile: Option<Arc<ExecutionProfile>>,
}

impl ExecutableRunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn DeviceMemoryAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn with_stream(mut self, stream: Arc<Stream>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_device_ordinal(mut self, ordinal: usize) -> Self {
        self.device_ordinal = Some(ordinal);
        self
    }

    pub fn with_execution_profile(mut self, profile: Arc<ExecutionProfile>) -> Self {
        self.execution_profile = Some(profile);
        self
    }
}

impl fmt::Debug for ExecutableRunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableRunOptions")
            .field("allocator", &self.allocator.as_ref().map(|a| a.platform().clone()))
            .field("stream", &self.stream)
            .field("device_ordinal", &self.device_ordinal)
            .field("execution_profile", &self.execution_profile.is_some())
            .finish()
    }
}
