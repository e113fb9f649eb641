//! The seam between the client and a device family.
//!
//! A [`Platform`] owns a fixed set of devices, hands out one
//! [`StreamExecutor`] per device and turns a validated [`Computation`] into a
//! [`PlatformProgram`]. All argument checks, transfers and allocation happen
//! in the client, so a platform only has to evaluate literals.

use std::fmt;
use std::sync::Arc;

use crate::error::XlaResult;
use crate::executor::StreamExecutor;
use crate::ir::Computation;
use crate::literal::Literal;
use crate::shape::Shape;
use crate::stream::Stream;

/// Name-based platform identity; streams, allocators and buffers carry one
/// so the client can reject cross-platform use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformId(Arc<str>);

impl PlatformId {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait Platform: Send + Sync {
    fn id(&self) -> &PlatformId;

    fn name(&self) -> &str {
        self.id().as_str()
    }

    fn device_count(&self) -> usize;

    /// Whether the service may run computations on this in-range device.
    fn device_ordinal_supported(&self, ordinal: usize) -> bool {
        ordinal < self.device_count()
    }

    fn executor(&self, ordinal: usize) -> XlaResult<Arc<StreamExecutor>>;

    /// Prepares `computation` for execution; `result_shape` carries the
    /// layouts the client will store the result in.
    fn compile(
        &self,
        computation: &Computation,
        result_shape: &Shape,
    ) -> XlaResult<Arc<dyn PlatformProgram>>;
}

/// Inputs of one launch, already read back from device memory.
pub struct ExecutionContext<'a> {
    pub arguments: &'a [Literal],
    pub device_ordinal: usize,
    pub stream: Option<&'a Stream>,
}

pub trait PlatformProgram: Send + Sync {
    fn execute(&self, ctx: ExecutionContext<'_>) -> XlaResult<Literal>;
}
