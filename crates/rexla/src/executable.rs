//! Compiled computations bound to a client.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::allocator::DeviceMemoryAllocator;
use crate::client::LocalClient;
use crate::error::{XlaError, XlaResult};
use crate::ir::Computation;
use crate::literal::Literal;
use crate::options::ExecutableRunOptions;
use crate::platform::{ExecutionContext, PlatformProgram};
use crate::shape::Shape;
use crate::shaped_buffer::{ScopedShapedBuffer, ShapedBuffer};

/// A computation compiled for one device of a client's platform.
///
/// Compiled once, runnable any number of times; every run validates its
/// arguments and options before touching device memory.
pub struct LocalExecutable {
    computation: Arc<Computation>,
    argument_layouts: Vec<Shape>,
    result_shape: Shape,
    build_device_ordinal: usize,
    build_ordinal_explicit: bool,
    client: LocalClient,
    program: Arc<dyn PlatformProgram>,
}

impl LocalExecutable {
    pub(crate) fn new(
        computation: Arc<Computation>,
        argument_layouts: Vec<Shape>,
        result_shape: Shape,
        build_device_ordinal: usize,
        build_ordinal_explicit: bool,
        client: LocalClient,
        program: Arc<dyn PlatformProgram>,
    ) -> Self {
        Self {
            computation,
            argument_layouts,
            result_shape,
            build_device_ordinal,
            build_ordinal_explicit,
            client,
            program,
        }
    }

    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    /// Argument shapes given at compile time. Layouts set here must match
    /// the layouts of the buffers passed to [`LocalExecutable::run`].
    pub fn argument_layouts(&self) -> &[Shape] {
        &self.argument_layouts
    }

    /// Result shape with the layouts the output is stored in.
    pub fn result_shape(&self) -> &Shape {
        &self.result_shape
    }

    pub fn build_device_ordinal(&self) -> usize {
        self.build_device_ordinal
    }

    /// Runs the executable on `arguments`, returning an owned output buffer.
    pub fn run(
        &self,
        arguments: &[&ShapedBuffer],
        options: &ExecutableRunOptions,
    ) -> XlaResult<ScopedShapedBuffer> {
        let (device_ordinal, allocator) = self.validate(arguments, options).map_err(|err| {
            tracing::warn!(
                computation = self.computation.name(),
                error = %err,
                "rejected run"
            );
            err
        })?;
        let _span = tracing::debug_span!(
            "run",
            computation = self.computation.name(),
            device = device_ordinal
        )
        .entered();

        let start = Instant::now();
        let transfer = self.client.transfer_manager();
        let literals = arguments
            .iter()
            .map(|buffer| transfer.transfer_literal_from_device(buffer))
            .collect::<XlaResult<Vec<Literal>>>()?;

        let compute_start = Instant::now();
        let result = self.program.execute(ExecutionContext {
            arguments: &literals,
            device_ordinal,
            stream: options.stream.as_deref(),
        });
        let compute = compute_start.elapsed();
        let result = match result {
            Ok(literal) => literal,
            Err(err) => {
                if let Some(stream) = &options.stream {
                    stream.set_error();
                }
                return Err(err);
            }
        };
        if !result.shape().compatible(&self.result_shape) {
            return Err(XlaError::execution(format!(
                "program produced {} but the executable returns {}",
                result.shape(),
                self.result_shape
            )));
        }

        let output = ScopedShapedBuffer::allocate(self.result_shape.clone(), allocator, device_ordinal)?;
        transfer.transfer_literal_to_device(&result, &output)?;
        if let Some(stream) = &options.stream {
            stream.record_launch();
        }
        let total = start.elapsed();
        if let Some(profile) = &options.execution_profile {
            profile.record(compute, total);
        }
        tracing::debug!(
            elapsed_us = total.as_micros() as u64,
            output_bytes = output.size_in_bytes(),
            "run finished"
        );
        Ok(output)
    }

    /// Checks arguments and options, returning the effective device and allocator.
    fn validate(
        &self,
        arguments: &[&ShapedBuffer],
        options: &ExecutableRunOptions,
    ) -> XlaResult<(usize, Arc<dyn DeviceMemoryAllocator>)> {
        let parameter_count = self.computation.parameter_count();
        if arguments.len() != parameter_count {
            return Err(XlaError::InvalidArgumentCount {
                expected: parameter_count,
                actual: arguments.len(),
            });
        }
        for (index, argument) in arguments.iter().enumerate() {
            let expected = self
                .computation
                .parameter_shape(index)
                .ok_or_else(|| XlaError::execution(format!("parameter {index} is missing")))?;
            if !argument.on_device_shape().compatible(expected) {
                return Err(XlaError::InvalidArgumentShape {
                    index,
                    expected: expected.to_string(),
                    actual: argument.on_device_shape().to_string(),
                });
            }
            if let Some(layout) = self.argument_layouts.get(index) {
                if !layout.accepts_layouts_of(argument.on_device_shape()) {
                    return Err(XlaError::InvalidArgumentShape {
                        index,
                        expected: layout.to_string(),
                        actual: argument.on_device_shape().to_string(),
                    });
                }
            }
        }

        let platform = self.client.platform_id();
        if let Some(stream) = &options.stream {
            if !stream.is_ok() {
                return Err(XlaError::StreamNotReady);
            }
            if stream.platform() != platform {
                return Err(XlaError::StreamPlatformMismatch {
                    stream: stream.platform().to_string(),
                    service: platform.to_string(),
                });
            }
            if let Some(ordinal) = options.device_ordinal {
                if ordinal != stream.device_ordinal() {
                    return Err(XlaError::DeviceMismatch(format!(
                        "run options name device {ordinal} but the stream is on device {}",
                        stream.device_ordinal()
                    )));
                }
            }
        }

        let allocator = match &options.allocator {
            Some(allocator) => {
                self.client.check_allocator(allocator.as_ref())?;
                allocator.clone()
            }
            None => self.client.default_allocator(),
        };

        let device_ordinal = options
            .stream
            .as_ref()
            .map(|stream| stream.device_ordinal())
            .or(options.device_ordinal)
            .unwrap_or(self.build_device_ordinal);
        self.client.check_device_ordinal(device_ordinal)?;
        if self.build_ordinal_explicit && device_ordinal != self.build_device_ordinal {
            return Err(XlaError::DeviceMismatch(format!(
                "executable was built for device {} but the run targets device {device_ordinal}",
                self.build_device_ordinal
            )));
        }

        for (index, argument) in arguments.iter().enumerate() {
            if argument.platform() != platform || argument.device_ordinal() != device_ordinal {
                return Err(XlaError::DeviceMismatch(format!(
                    "argument {index} resides on {}:{}, but the run targets {platform}:{device_ordinal}",
                    argument.platform(),
                    argument.device_ordinal()
                )));
            }
        }
        Ok((device_ordinal, allocator))
    }
}

impl fmt::Debug for LocalExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutable")
            .field("computation", &self.computation.name())
            .field("result_shape", &self.result_shape)
            .field("build_device_ordinal", &self.build_device_ordinal)
            .field("platform", self.client.platform_id())
            .finish()
    }
}
