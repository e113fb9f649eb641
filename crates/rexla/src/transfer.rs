//! Host <-> device copies of literals.

use std::sync::Arc;

use crate::error::{XlaError, XlaResult};
use crate::executor::{DeviceMemory, StreamExecutor};
use crate::literal::{ArrayData, Literal};
use crate::platform::Platform;
use crate::shape::{Shape, ShapeIndex};
use crate::shaped_buffer::ShapedBuffer;

/// Moves literals in and out of shaped buffers on one platform.
pub struct TransferManager<'a> {
    platform: &'a dyn Platform,
}

impl<'a> TransferManager<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Writes `literal` into the already allocated `buffer`, converting every
    /// array to the buffer's on-device layout.
    pub fn transfer_literal_to_device(&self, literal: &Literal, buffer: &ShapedBuffer) -> XlaResult<()> {
        if !literal.shape().compatible(buffer.on_device_shape()) {
            return Err(XlaError::transfer(format!(
                "literal of shape {} does not fit buffer of shape {}",
                literal.shape(),
                buffer.on_device_shape()
            )));
        }
        let executor = self.executor_for(buffer)?;
        let mut index = ShapeIndex::new();
        write_node(&executor, literal, buffer.on_device_shape(), buffer, &mut index)?;
        tracing::trace!(
            ordinal = buffer.device_ordinal(),
            bytes = buffer.size_in_bytes(),
            "transferred literal to device"
        );
        Ok(())
    }

    /// Reads `buffer` back into a literal laid out like the device shape.
    pub fn transfer_literal_from_device(&self, buffer: &ShapedBuffer) -> XlaResult<Literal> {
        let executor = self.executor_for(buffer)?;
        let mut index = ShapeIndex::new();
        read_node(&executor, buffer.on_device_shape(), buffer, &mut index)
    }

    fn executor_for(&self, buffer: &ShapedBuffer) -> XlaResult<Arc<StreamExecutor>> {
        if buffer.platform() != self.platform.id() {
            return Err(XlaError::transfer(format!(
                "buffer lives on platform {}, not {}",
                buffer.platform(),
                self.platform.id()
            )));
        }
        self.platform.executor(buffer.device_ordinal())
    }
}

fn region<'b>(buffer: &'b ShapedBuffer, index: &[usize]) -> XlaResult<&'b DeviceMemory> {
    buffer
        .buffer(index)
        .ok_or_else(|| XlaError::transfer(format!("no device region at shape index {index:?}")))
}

fn write_node(
    executor: &StreamExecutor,
    literal: &Literal,
    shape: &Shape,
    buffer: &ShapedBuffer,
    index: &mut ShapeIndex,
) -> XlaResult<()> {
    let memory = region(buffer, index)?;
    match (literal, shape) {
        (Literal::Array { .. }, Shape::Array(array)) => {
            let laid_out = literal.relayout(&array.layout_or_default())?;
            executor.write(memory, &laid_out.physical_data()?.to_le_bytes())
        }
        (Literal::Tuple(elements), Shape::Tuple(shapes)) => {
            let mut table = Vec::with_capacity(elements.len() * 8);
            for i in 0..elements.len() {
                index.push(i);
                let child = region(buffer, index)?.id();
                index.pop();
                table.extend_from_slice(&child.to_le_bytes());
            }
            executor.write(memory, &table)?;
            for (i, (element, element_shape)) in elements.iter().zip(shapes).enumerate() {
                index.push(i);
                write_node(executor, element, element_shape, buffer, index)?;
                index.pop();
            }
            Ok(())
        }
        _ => Err(XlaError::transfer(format!(
            "literal structure does not match {shape} at {index:?}"
        ))),
    }
}

fn read_node(
    executor: &StreamExecutor,
    shape: &Shape,
    buffer: &ShapedBuffer,
    index: &mut ShapeIndex,
) -> XlaResult<Literal> {
    let bytes = executor.read(region(buffer, index)?)?;
    match shape {
        Shape::Array(array) => {
            let data = ArrayData::from_le_bytes(array.dtype, &bytes)?;
            Literal::from_physical(array.clone(), data)
        }
        Shape::Tuple(shapes) => {
            let table = bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    u64::from_le_bytes(raw)
                })
                .collect::<Vec<_>>();
            if table.len() != shapes.len() {
                return Err(XlaError::transfer(format!(
                    "tuple table at {index:?} has {} entries, shape has {}",
                    table.len(),
                    shapes.len()
                )));
            }
            let mut elements = Vec::with_capacity(shapes.len());
            for (i, element_shape) in shapes.iter().enumerate() {
                index.push(i);
                if region(buffer, index)?.id() != table[i] {
                    return Err(XlaError::transfer(format!(
                        "tuple table entry {index:?} does not name its region"
                    )));
                }
                elements.push(read_node(executor, element_shape, buffer, index)?);
                index.pop();
            }
            Ok(Literal::Tuple(elements))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{DeviceMemoryAllocator, StreamExecutorMemoryAllocator};
    use crate::dtype::DType;
    use crate::ir::Computation;
    use crate::platform::{PlatformId, PlatformProgram};
    use crate::shaped_buffer::ScopedShapedBuffer;

    struct MemoryOnly {
        id: PlatformId,
        executor: Arc<StreamExecutor>,
    }

    impl MemoryOnly {
        fn new() -> Self {
            let id = PlatformId::new("memory-only");
            let executor = Arc::new(StreamExecutor::new(id.clone(), 0));
            Self { id, executor }
        }
    }

    impl Platform for MemoryOnly {
        fn id(&self) -> &PlatformId {
            &self.id
        }

        fn device_count(&self) -> usize {
            1
        }

        fn executor(&self, ordinal: usize) -> XlaResult<Arc<StreamExecutor>> {
            match ordinal {
                0 => Ok(self.executor.clone()),
                _ => Err(XlaError::InvalidDeviceOrdinal { ordinal, count: 1 }),
            }
        }

        fn compile(&self, _: &Computation, _: &Shape) -> XlaResult<Arc<dyn PlatformProgram>> {
            Err(XlaError::unimplemented("compile", "memory-only platform"))
        }
    }

    fn round_trip(platform: &MemoryOnly, literal: &Literal, device_shape: Shape) -> Literal {
        let allocator: Arc<dyn DeviceMemoryAllocator> =
            Arc::new(StreamExecutorMemoryAllocator::for_platform(platform).unwrap());
        let buffer = ScopedShapedBuffer::allocate(device_shape, allocator, 0).unwrap();
        let manager = TransferManager::new(platform);
        manager.transfer_literal_to_device(literal, &buffer).unwrap();
        manager.transfer_literal_from_device(&buffer).unwrap()
    }

    #[test]
    fn nested_tuple_round_trip() {
        let platform = MemoryOnly::new();
        let literal = Literal::tuple(vec![
            Literal::tuple(vec![Literal::r1(&[1.0f32, -42.0]), Literal::r0(123456.0f32)]),
            Literal::r0(false),
            Literal::tuple(Vec::new()),
        ]);
        let back = round_trip(&platform, &literal, literal.shape());
        assert_eq!(back, literal);
        assert_eq!(platform.executor.live_allocations(), 0);
    }

    #[test]
    fn device_layout_is_applied() {
        let platform = MemoryOnly::new();
        let literal = Literal::r2(&[[1i32, 2], [3, 4]]);
        let back = round_trip(
            &platform,
            &literal,
            Shape::with_layout(DType::Si32, [2, 2], [0, 1]),
        );
        assert_eq!(back, literal);
        assert_eq!(
            back.physical_data().unwrap(),
            &ArrayData::Si32(vec![1, 3, 2, 4])
        );
    }

    #[test]
    fn mismatched_literal_is_rejected() {
        let platform = MemoryOnly::new();
        let allocator: Arc<dyn DeviceMemoryAllocator> =
            Arc::new(StreamExecutorMemoryAllocator::for_platform(&platform).unwrap());
        let buffer =
            ScopedShapedBuffer::allocate(Shape::array(DType::F32, [2]), allocator, 0).unwrap();
        let err = TransferManager::new(&platform)
            .transfer_literal_to_device(&Literal::r1(&[1.0f32, 2.0, 3.0]), &buffer)
            .unwrap_err();
        assert!(matches!(err, XlaError::Transfer(_)));
    }
}
