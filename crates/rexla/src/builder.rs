//! Fluent construction of [`Computation`]s.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::dtype::DType;
use crate::error::{XlaError, XlaResult};
use crate::ir::{
    BinaryOp, ComparisonDirection, Computation, Instruction, Operation, UnaryOp, ValueId,
};
use crate::literal::{Literal, NativeType};
use crate::shape::Shape;
use crate::shape_inference;

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

const INVALID_VALUE: ValueId = ValueId(u32::MAX);

/// Handle to a value staged in a [`ComputationBuilder`].
///
/// Handles are only meaningful for the builder that produced them; mixing
/// them across builders is reported by [`ComputationBuilder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XlaOp {
    id: ValueId,
    builder: u64,
}

impl XlaOp {
    pub fn id(self) -> ValueId {
        self.id
    }

    /// `false` for handles returned after a failed operation.
    pub fn is_valid(self) -> bool {
        self.id != INVALID_VALUE
    }
}

/// Stages instructions and produces an immutable [`Computation`].
///
/// Every call runs shape inference immediately. The first failure is kept and
/// returned from [`build`](Self::build); later calls still return handles so a
/// graph can be written without `?` after each op.
pub struct ComputationBuilder {
    id: u64,
    name: String,
    next_value_id: u32,
    instructions: Vec<Instruction>,
    first_error: Option<XlaError>,
}

impl ComputationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            next_value_id: 0,
            instructions: Vec::new(),
            first_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First recorded error, if any.
    pub fn first_error(&self) -> Option<&XlaError> {
        self.first_error.as_ref()
    }

    /// Shape of a staged value.
    pub fn shape_of(&self, op: XlaOp) -> XlaResult<&Shape> {
        self.resolve(op).map(|id| &self.instructions[id.index()].shape)
    }

    pub fn parameter(&mut self, number: usize, shape: Shape, name: impl Into<String>) -> XlaOp {
        if let Err(err) = shape.validate_layouts() {
            return self.fail(err);
        }
        let op = Operation::Parameter {
            number,
            name: name.into(),
        };
        self.emit(op, Vec::new(), shape)
    }

    pub fn constant(&mut self, literal: Literal) -> XlaOp {
        if let Err(err) = literal.validate() {
            return self.fail(err);
        }
        self.infer_and_emit(Operation::Constant(literal), &[])
    }

    pub fn constant_r0<T: NativeType>(&mut self, value: T) -> XlaOp {
        self.constant(Literal::r0(value))
    }

    pub fn constant_r1<T: NativeType>(&mut self, values: &[T]) -> XlaOp {
        self.constant(Literal::r1(values))
    }

    pub fn constant_r2<T: NativeType, const N: usize>(&mut self, rows: &[[T; N]]) -> XlaOp {
        self.constant(Literal::r2(rows))
    }

    pub fn add(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn max(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.binary(BinaryOp::Max, lhs, rhs)
    }

    pub fn min(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.binary(BinaryOp::Min, lhs, rhs)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.infer_and_emit(Operation::Binary(op), &[lhs, rhs])
    }

    pub fn neg(&mut self, operand: XlaOp) -> XlaOp {
        self.unary(UnaryOp::Neg, operand)
    }

    pub fn abs(&mut self, operand: XlaOp) -> XlaOp {
        self.unary(UnaryOp::Abs, operand)
    }

    pub fn exp(&mut self, operand: XlaOp) -> XlaOp {
        self.unary(UnaryOp::Exp, operand)
    }

    pub fn log(&mut self, operand: XlaOp) -> XlaOp {
        self.unary(UnaryOp::Log, operand)
    }

    pub fn tanh(&mut self, operand: XlaOp) -> XlaOp {
        self.unary(UnaryOp::Tanh, operand)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: XlaOp) -> XlaOp {
        self.infer_and_emit(Operation::Unary(op), &[operand])
    }

    pub fn compare(&mut self, direction: ComparisonDirection, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.infer_and_emit(Operation::Compare(direction), &[lhs, rhs])
    }

    pub fn eq(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.compare(ComparisonDirection::Eq, lhs, rhs)
    }

    pub fn lt(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.compare(ComparisonDirection::Lt, lhs, rhs)
    }

    pub fn gt(&mut self, lhs: XlaOp, rhs: XlaOp) -> XlaOp {
        self.compare(ComparisonDirection::Gt, lhs, rhs)
    }

    pub fn convert(&mut self, operand: XlaOp, dtype: DType) -> XlaOp {
        self.infer_and_emit(Operation::Convert(dtype), &[operand])
    }

    pub fn select(&mut self, pred: XlaOp, on_true: XlaOp, on_false: XlaOp) -> XlaOp {
        self.infer_and_emit(Operation::Select, &[pred, on_true, on_false])
    }

    pub fn tuple(&mut self, elements: &[XlaOp]) -> XlaOp {
        self.infer_and_emit(Operation::Tuple, elements)
    }

    pub fn get_tuple_element(&mut self, tuple: XlaOp, index: usize) -> XlaOp {
        self.infer_and_emit(Operation::GetTupleElement { index }, &[tuple])
    }

    /// Finishes the graph with the most recently added value as its root.
    pub fn build(self) -> XlaResult<Computation> {
        let root = match self.instructions.last() {
            Some(inst) => inst.id,
            None if self.first_error.is_some() => INVALID_VALUE,
            None => {
                return Err(XlaError::build(format!(
                    "computation '{}' is empty",
                    self.name
                )))
            }
        };
        self.finish(root)
    }

    /// Finishes the graph with `root` as its result.
    pub fn build_with_root(self, root: XlaOp) -> XlaResult<Computation> {
        let root = match self.resolve(root) {
            Ok(id) => id,
            Err(err) => return Err(self.first_error.unwrap_or(err)),
        };
        self.finish(root)
    }

    fn finish(self, root: ValueId) -> XlaResult<Computation> {
        if let Some(err) = self.first_error {
            return Err(err);
        }
        Computation::from_instructions(self.name, self.instructions, root)
    }

    fn resolve(&self, op: XlaOp) -> XlaResult<ValueId> {
        if op.builder != self.id {
            return Err(XlaError::build(format!(
                "operand {} belongs to a different builder than '{}'",
                op.id, self.name
            )));
        }
        if !op.is_valid() || op.id.index() >= self.instructions.len() {
            return Err(XlaError::build(format!(
                "operand {} does not name a valid value",
                op.id
            )));
        }
        Ok(op.id)
    }

    fn infer_and_emit(&mut self, op: Operation, operands: &[XlaOp]) -> XlaOp {
        let mut ids = Vec::with_capacity(operands.len());
        for operand in operands {
            match self.resolve(*operand) {
                Ok(id) => ids.push(id),
                Err(err) => return self.fail(err),
            }
        }
        let shapes = ids
            .iter()
            .map(|id| &self.instructions[id.index()].shape)
            .collect::<Vec<_>>();
        match shape_inference::infer(&op, &shapes) {
            Ok(shape) => self.emit(op, ids, shape),
            Err(err) => self.fail(err),
        }
    }

    fn emit(&mut self, op: Operation, operands: Vec<ValueId>, shape: Shape) -> XlaOp {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.instructions.push(Instruction {
            id,
            op,
            operands,
            shape,
        });
        XlaOp {
            id,
            builder: self.id,
        }
    }

    fn fail(&mut self, err: XlaError) -> XlaOp {
        tracing::debug!(builder = %self.name, error = %err, "builder operation failed");
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
        XlaOp {
            id: INVALID_VALUE,
            builder: self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::ArrayData;
    use crate::shape::ArrayShape;

    #[test]
    fn builds_add_of_parameters() {
        let mut b = ComputationBuilder::new("add");
        let x = b.parameter(0, Shape::array(DType::F32, [3]), "x");
        let y = b.parameter(1, Shape::array(DType::F32, [3]), "y");
        let sum = b.add(x, y);
        assert_eq!(b.shape_of(sum).unwrap(), &Shape::array(DType::F32, [3]));
        let computation = b.build().unwrap();
        assert_eq!(computation.parameter_count(), 2);
        assert_eq!(computation.root(), sum.id());
    }

    #[test]
    fn constant_with_mismatched_data_fails_build() {
        let mut b = ComputationBuilder::new("short_constant");
        let x = b.parameter(0, Shape::array(DType::F32, [3]), "x");
        let c = b.constant(Literal::Array {
            shape: ArrayShape::new(DType::F32, [3]),
            data: ArrayData::F32(vec![1.0, 2.0]),
        });
        b.add(x, c);
        let err = b.build().unwrap_err();
        assert!(matches!(err, XlaError::InvalidLiteral(_)), "{err}");

        let mut b = ComputationBuilder::new("wrong_type_constant");
        b.constant(Literal::Array {
            shape: ArrayShape::new(DType::Si32, [2]),
            data: ArrayData::F32(vec![1.0, 2.0]),
        });
        assert!(b.build().is_err());
    }

    #[test]
    fn first_error_is_reported() {
        let mut b = ComputationBuilder::new("bad");
        let x = b.constant_r1(&[1.0f32, 2.0]);
        let y = b.constant_r1(&[1.0f32, 2.0, 3.0]);
        let bad = b.add(x, y);
        assert!(!bad.is_valid());
        let _ = b.neg(bad);
        let err = b.build().unwrap_err();
        assert!(matches!(err, XlaError::ShapeInference { op: "add", .. }));
    }

    #[test]
    fn empty_builder_fails() {
        let err = ComputationBuilder::new("empty").build().unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn foreign_operands_are_rejected() {
        let mut a = ComputationBuilder::new("a");
        let mut b = ComputationBuilder::new("b");
        let x = a.constant_r0(1.0f32);
        let y = b.constant_r0(2.0f32);
        let _ = b.add(x, y);
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("different builder"));
    }

    #[test]
    fn duplicate_parameter_numbers_fail_build() {
        let mut b = ComputationBuilder::new("dup");
        b.parameter(0, Shape::scalar(DType::F32), "a");
        b.parameter(0, Shape::scalar(DType::F32), "b");
        assert!(b.build().is_err());
    }

    #[test]
    fn build_with_root_picks_earlier_value() {
        let mut b = ComputationBuilder::new("root");
        let x = b.constant_r0(1i32);
        let _ = b.constant_r0(2i32);
        let computation = b.build_with_root(x).unwrap();
        assert_eq!(computation.root(), x.id());
        assert_eq!(computation.result_shape(), &Shape::scalar(DType::Si32));
    }

    #[test]
    fn nested_tuples_and_element_access() {
        let mut b = ComputationBuilder::new("tuple");
        let v = b.constant_r1(&[1.0f32, 2.0]);
        let s = b.constant_r0(3.0f32);
        let inner = b.tuple(&[v, s]);
        let p = b.constant_r0(true);
        let outer = b.tuple(&[inner, p]);
        let back = b.get_tuple_element(outer, 0);
        assert_eq!(b.shape_of(back).unwrap(), b.shape_of(inner).unwrap());
        let computation = b.build().unwrap();
        assert!(computation.result_shape().is_tuple());
    }

    #[test]
    fn invalid_parameter_layout_is_recorded() {
        let mut b = ComputationBuilder::new("layout");
        b.parameter(0, Shape::with_layout(DType::F32, [2, 2], [0, 0]), "x");
        assert!(matches!(b.build().unwrap_err(), XlaError::InvalidLayout(_)));
    }
}
