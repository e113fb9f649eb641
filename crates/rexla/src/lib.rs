extern crate self as rexla;

pub use linkme;

pub mod allocator;
pub mod builder;
pub mod client;
pub mod dtype;
pub mod env;
pub mod error;
pub mod executable;
pub mod executor;
pub mod ir;
pub mod layout;
pub mod literal;
pub mod options;
pub mod platform;
pub mod profiling;
pub mod registry;
pub mod shape;
pub mod shape_inference;
pub mod shaped_buffer;
pub mod stream;
pub mod transfer;

pub use allocator::{DeviceMemoryAllocator, StreamExecutorMemoryAllocator};
pub use builder::{ComputationBuilder, XlaOp};
pub use client::{ClientLibrary, LocalClient};
pub use dtype::DType;
pub use error::{XlaError, XlaResult};
pub use executable::LocalExecutable;
pub use executor::{DeviceMemory, StreamExecutor};
pub use ir::{Computation, ProgramShape};
pub use layout::Layout;
pub use literal::{ArrayData, Literal, NativeType};
pub use options::{ExecutableBuildOptions, ExecutableRunOptions};
pub use platform::{ExecutionContext, Platform, PlatformId, PlatformProgram};
pub use profiling::ExecutionProfile;
pub use shape::{ArrayShape, Shape, ShapeIndex};
pub use shaped_buffer::{ScopedShapedBuffer, ShapedBuffer};
pub use stream::{Stream, StreamState};
