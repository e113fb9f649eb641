//! In-process client over one platform.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::allocator::{DeviceMemoryAllocator, StreamExecutorMemoryAllocator};
use crate::env;
use crate::error::{XlaError, XlaResult};
use crate::executable::LocalExecutable;
use crate::executor::StreamExecutor;
use crate::ir::Computation;
use crate::literal::Literal;
use crate::options::{ExecutableBuildOptions, ExecutableRunOptions};
use crate::platform::{Platform, PlatformId};
use crate::registry;
use crate::shape::Shape;
use crate::shaped_buffer::{ScopedShapedBuffer, ShapedBuffer};
use crate::stream::Stream;
use crate::transfer::TransferManager;

/// Compiles computations for, and moves literals to and from, the devices of
/// one platform.
#[derive(Clone)]
pub struct LocalClient {
    platform: Arc<dyn Platform>,
    allocator: Arc<StreamExecutorMemoryAllocator>,
}

impl LocalClient {
    pub fn new(platform: Arc<dyn Platform>) -> XlaResult<Self> {
        let allocator = Arc::new(StreamExecutorMemoryAllocator::for_platform(platform.as_ref())?);
        Ok(Self {
            platform,
            allocator,
        })
    }

    /// Client over a fresh instance of the platform registered as `name`.
    pub fn for_platform_name(name: &str) -> XlaResult<Self> {
        Self::new(registry::create_platform(name)?)
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn platform_id(&self) -> &PlatformId {
        self.platform.id()
    }

    pub fn device_count(&self) -> usize {
        self.platform.device_count()
    }

    pub fn device_ordinal_supported(&self, ordinal: usize) -> bool {
        ordinal < self.device_count() && self.platform.device_ordinal_supported(ordinal)
    }

    /// First device the service supports.
    pub fn default_device_ordinal(&self) -> XlaResult<usize> {
        (0..self.device_count())
            .find(|&ordinal| self.device_ordinal_supported(ordinal))
            .ok_or_else(|| XlaError::DeviceNotSupported {
                ordinal: 0,
                platform: self.platform.name().to_string(),
            })
    }

    pub fn default_allocator(&self) -> Arc<dyn DeviceMemoryAllocator> {
        self.allocator.clone()
    }

    /// The default allocator with its live-allocation counters.
    pub fn memory_allocator(&self) -> &Arc<StreamExecutorMemoryAllocator> {
        &self.allocator
    }

    /// Range check first, then the platform's support check.
    pub fn check_device_ordinal(&self, ordinal: usize) -> XlaResult<()> {
        let count = self.device_count();
        if ordinal >= count {
            return Err(XlaError::InvalidDeviceOrdinal { ordinal, count });
        }
        if !self.platform.device_ordinal_supported(ordinal) {
            return Err(XlaError::DeviceNotSupported {
                ordinal,
                platform: self.platform.name().to_string(),
            });
        }
        Ok(())
    }

    pub fn executor(&self, ordinal: usize) -> XlaResult<Arc<StreamExecutor>> {
        self.check_device_ordinal(ordinal)?;
        self.platform.executor(ordinal)
    }

    /// New, initialised stream on `ordinal`.
    pub fn new_stream(&self, ordinal: usize) -> XlaResult<Arc<Stream>> {
        let stream = Stream::new(self.executor(ordinal)?);
        stream.init()?;
        Ok(Arc::new(stream))
    }

    /// Builds an executable for `computation`.
    ///
    /// `argument_layouts` gives the layout each argument is expected in and
    /// must be compatible with the declared parameter shapes. Arrays left
    /// without a layout accept arguments in any layout.
    pub fn compile(
        &self,
        computation: &Computation,
        argument_layouts: &[Shape],
        options: &ExecutableBuildOptions,
    ) -> XlaResult<LocalExecutable> {
        let build_ordinal = match options.device_ordinal {
            Some(ordinal) => ordinal,
            None => self.default_device_ordinal()?,
        };
        self.check_device_ordinal(build_ordinal)?;

        let program_shape = computation.program_shape();
        if argument_layouts.len() != program_shape.parameters.len() {
            return Err(XlaError::InvalidArgumentCount {
                expected: program_shape.parameters.len(),
                actual: argument_layouts.len(),
            });
        }
        let strict = env::strict_layouts();
        for (index, (layout, parameter)) in argument_layouts
            .iter()
            .zip(&program_shape.parameters)
            .enumerate()
        {
            if !layout.compatible(parameter) {
                return Err(XlaError::InvalidArgumentShape {
                    index,
                    expected: parameter.to_string(),
                    actual: layout.to_string(),
                });
            }
            if strict && !layout.has_layouts() {
                return Err(XlaError::InvalidLayout(format!(
                    "argument {index} ({layout}) has no explicit layout"
                )));
            }
            layout.validate_layouts()?;
        }

        let result_shape = match &options.result_layout {
            Some(layout) => {
                if !layout.compatible(&program_shape.result) {
                    return Err(XlaError::IncompatibleResultLayout {
                        layout: layout.to_string(),
                        shape: program_shape.result.to_string(),
                    });
                }
                layout.validate_layouts()?;
                layout.with_default_layouts()
            }
            None => program_shape.result.with_default_layouts(),
        };

        let program = self.platform.compile(computation, &result_shape)?;
        tracing::debug!(
            computation = computation.name(),
            platform = %self.platform.id(),
            device = build_ordinal,
            result = %result_shape,
            "compiled executable"
        );
        Ok(LocalExecutable::new(
            Arc::new(computation.clone()),
            argument_layouts.to_vec(),
            result_shape,
            build_ordinal,
            options.device_ordinal.is_some(),
            self.clone(),
            program,
        ))
    }

    /// Allocates a buffer for `literal` on `device_ordinal` and copies it over.
    pub fn literal_to_shaped_buffer(
        &self,
        literal: &Literal,
        device_ordinal: usize,
        allocator: Option<Arc<dyn DeviceMemoryAllocator>>,
    ) -> XlaResult<ScopedShapedBuffer> {
        self.check_device_ordinal(device_ordinal)?;
        let allocator = allocator.unwrap_or_else(|| self.default_allocator());
        self.check_allocator(allocator.as_ref())?;
        let buffer = ScopedShapedBuffer::allocate(literal.shape(), allocator, device_ordinal)?;
        self.transfer_manager()
            .transfer_literal_to_device(literal, &buffer)?;
        Ok(buffer)
    }

    pub fn shaped_buffer_to_literal(&self, buffer: &ShapedBuffer) -> XlaResult<Literal> {
        self.check_device_ordinal(buffer.device_ordinal())?;
        self.transfer_manager().transfer_literal_from_device(buffer)
    }

    /// Compiles `computation` against the layouts of `arguments` and runs it once.
    pub fn execute_locally(
        &self,
        computation: &Computation,
        arguments: &[&ShapedBuffer],
        build_options: &ExecutableBuildOptions,
        run_options: &ExecutableRunOptions,
    ) -> XlaResult<ScopedShapedBuffer> {
        let layouts = arguments
            .iter()
            .map(|buffer| buffer.on_device_shape().clone())
            .collect::<Vec<_>>();
        let executable = self.compile(computation, &layouts, build_options)?;
        executable.run(arguments, run_options)
    }

    pub fn transfer_manager(&self) -> TransferManager<'_> {
        TransferManager::new(self.platform.as_ref())
    }

    pub(crate) fn check_allocator(&self, allocator: &dyn DeviceMemoryAllocator) -> XlaResult<()> {
        if allocator.platform() != self.platform.id() {
            return Err(XlaError::AllocatorPlatformMismatch {
                allocator: allocator.platform().to_string(),
                service: self.platform.id().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for LocalClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClient")
            .field("platform", self.platform.id())
            .field("device_count", &self.device_count())
            .finish()
    }
}

static LOCAL_CLIENTS: OnceLock<Mutex<HashMap<String, LocalClient>>> = OnceLock::new();

/// Process-wide cache of one [`LocalClient`] per platform name.
pub struct ClientLibrary;

impl ClientLibrary {
    /// Returns the cached client for `name`, creating it from the registry on
    /// first use.
    pub fn get_or_create_local_client(name: &str) -> XlaResult<LocalClient> {
        let clients = LOCAL_CLIENTS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(name) {
            return Ok(client.clone());
        }
        let client = LocalClient::for_platform_name(name)?;
        clients.insert(name.to_string(), client.clone());
        Ok(client)
    }

    /// Client for the platform selected by `REXLA_PLATFORM` (default `host`).
    pub fn local_client() -> XlaResult<LocalClient> {
        Self::get_or_create_local_client(env::default_platform_name())
    }
}
