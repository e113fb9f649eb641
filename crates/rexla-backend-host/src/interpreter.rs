//! Reference evaluator for computations.
//!
//! Values are kept as literals indexed by value id. Element-wise kernels work
//! on logical (row-major) data, so operand layouts never affect results.

use std::sync::Arc;

use rexla::ir::{BinaryOp, ComparisonDirection, Computation, Instruction, Operation, UnaryOp};
use rexla::{
    ArrayData, DType, ExecutionContext, Literal, PlatformProgram, Shape, XlaError, XlaResult,
};

/// A computation prepared for the host platform.
pub struct HostProgram {
    computation: Arc<Computation>,
    result_shape: Shape,
}

impl HostProgram {
    pub fn new(computation: Arc<Computation>, result_shape: Shape) -> Self {
        Self {
            computation,
            result_shape,
        }
    }

    pub fn result_shape(&self) -> &Shape {
        &self.result_shape
    }
}

impl PlatformProgram for HostProgram {
    fn execute(&self, ctx: ExecutionContext<'_>) -> XlaResult<Literal> {
        tracing::trace!(
            computation = self.computation.name(),
            device = ctx.device_ordinal,
            "interpreting"
        );
        evaluate(&self.computation, ctx.arguments)
    }
}

/// Evaluates `computation` on host literals and returns the root value.
pub fn evaluate(computation: &Computation, arguments: &[Literal]) -> XlaResult<Literal> {
    if arguments.len() != computation.parameter_count() {
        return Err(XlaError::execution(format!(
            "computation '{}' expects {} arguments, got {}",
            computation.name(),
            computation.parameter_count(),
            arguments.len()
        )));
    }
    for (number, argument) in arguments.iter().enumerate() {
        argument.validate()?;
        let declared = computation
            .parameter_shape(number)
            .ok_or_else(|| XlaError::execution(format!("parameter {number} is missing")))?;
        if !argument.shape().compatible(declared) {
            return Err(XlaError::InvalidArgumentShape {
                index: number,
                expected: declared.to_string(),
                actual: argument.shape().to_string(),
            });
        }
    }
    let mut values: Vec<Literal> = Vec::with_capacity(computation.instructions().len());
    for (index, instruction) in computation.instructions().iter().enumerate() {
        let inputs = instruction
            .operands
            .iter()
            .map(|id| {
                values
                    .get(id.index())
                    .ok_or_else(|| XlaError::execution(format!("operand {id} is not evaluated yet")))
            })
            .collect::<XlaResult<Vec<&Literal>>>()?;
        let value = execute_operation(instruction, &inputs, arguments).map_err(|err| {
            augment_error(err, computation.name(), index, instruction, &inputs)
        })?;
        tracing::trace!(id = %instruction.id, op = instruction.op.mnemonic(), "evaluated");
        values.push(value);
    }
    values
        .into_iter()
        .nth(computation.root().index())
        .ok_or_else(|| XlaError::execution("root value was not evaluated"))
}

fn execute_operation(
    instruction: &Instruction,
    inputs: &[&Literal],
    arguments: &[Literal],
) -> XlaResult<Literal> {
    match &instruction.op {
        Operation::Parameter { number, .. } => arguments
            .get(*number)
            .cloned()
            .ok_or_else(|| XlaError::execution(format!("argument {number} is missing"))),
        Operation::Constant(literal) => Ok(literal.clone()),
        Operation::Unary(op) => unary(*op, inputs[0], &instruction.shape),
        Operation::Binary(op) => binary(*op, inputs[0], inputs[1], &instruction.shape),
        Operation::Compare(direction) => compare(*direction, inputs[0], inputs[1], &instruction.shape),
        Operation::Convert(dtype) => convert(inputs[0], *dtype),
        Operation::Select => select(inputs[0], inputs[1], inputs[2]),
        Operation::Tuple => Ok(Literal::tuple(inputs.iter().map(|&l| l.clone()).collect())),
        Operation::GetTupleElement { index } => inputs[0]
            .tuple_element(*index)
            .cloned()
            .ok_or_else(|| XlaError::execution(format!("tuple has no element {index}"))),
    }
}

fn augment_error(
    error: XlaError,
    computation: &str,
    index: usize,
    instruction: &Instruction,
    inputs: &[&Literal],
) -> XlaError {
    let context = format!(
        "at computation `{computation}` instruction #{index}, {} {} operands [{}]",
        instruction.op.mnemonic(),
        instruction.id,
        inputs
            .iter()
            .map(|l| l.shape().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    match error {
        XlaError::Execution(message) => XlaError::Execution(format!("{message} ({context})")),
        XlaError::Unimplemented { op, reason } => XlaError::Unimplemented {
            op,
            reason: format!("{reason} (while executing {context})"),
        },
        other => other,
    }
}

fn result_dims(shape: &Shape) -> XlaResult<Vec<usize>> {
    shape
        .as_array()
        .map(|array| array.dims.clone())
        .ok_or_else(|| XlaError::execution(format!("expected an array result, found {shape}")))
}

trait Arith: Copy + PartialOrd {
    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn div(self, other: Self) -> XlaResult<Self>;
    fn max(self, other: Self) -> Self;
    fn min(self, other: Self) -> Self;
    fn neg(self) -> Self;
    fn abs(self) -> Self;
}

macro_rules! float_arith {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn add(self, other: Self) -> Self { self + other }
            fn sub(self, other: Self) -> Self { self - other }
            fn mul(self, other: Self) -> Self { self * other }
            fn div(self, other: Self) -> XlaResult<Self> { Ok(self / other) }
            fn max(self, other: Self) -> Self {
                if self.is_nan() || self > other { self } else { other }
            }
            fn min(self, other: Self) -> Self {
                if self.is_nan() || self < other { self } else { other }
            }
            fn neg(self) -> Self { -self }
            fn abs(self) -> Self { <$ty>::abs(self) }
        }
    )*};
}

macro_rules! int_arith {
    (@abs signed $value:expr) => { $value.wrapping_abs() };
    (@abs unsigned $value:expr) => { $value };
    ($kind:ident: $($ty:ty),*) => {$(
        impl Arith for $ty {
            fn add(self, other: Self) -> Self { self.wrapping_add(other) }
            fn sub(self, other: Self) -> Self { self.wrapping_sub(other) }
            fn mul(self, other: Self) -> Self { self.wrapping_mul(other) }
            fn div(self, other: Self) -> XlaResult<Self> {
                if other == 0 {
                    return Err(XlaError::execution("integer divide by zero"));
                }
                Ok(self.wrapping_div(other))
            }
            fn max(self, other: Self) -> Self { Ord::max(self, other) }
            fn min(self, other: Self) -> Self { Ord::min(self, other) }
            fn neg(self) -> Self { self.wrapping_neg() }
            fn abs(self) -> Self { int_arith!(@abs $kind self) }
        }
    )*};
}

float_arith!(f32, f64);
int_arith!(signed: i8, i32, i64);
int_arith!(unsigned: u8, u32, u64);

/// Element `i` of an operand that is either full-size or a broadcast scalar.
#[inline]
fn broadcast_at<T: Copy>(values: &[T], i: usize) -> T {
    if values.len() == 1 {
        values[0]
    } else {
        values[i]
    }
}

fn zip_with<T: Copy, U>(
    lhs: &[T],
    rhs: &[T],
    len: usize,
    f: impl Fn(T, T) -> XlaResult<U>,
) -> XlaResult<Vec<U>> {
    (0..len)
        .map(|i| f(broadcast_at(lhs, i), broadcast_at(rhs, i)))
        .collect()
}

fn apply_binary<T: Arith>(op: BinaryOp, lhs: &[T], rhs: &[T], len: usize) -> XlaResult<Vec<T>> {
    zip_with(lhs, rhs, len, |a, b| match op {
        BinaryOp::Add => Ok(a.add(b)),
        BinaryOp::Sub => Ok(a.sub(b)),
        BinaryOp::Mul => Ok(a.mul(b)),
        BinaryOp::Div => a.div(b),
        BinaryOp::Max => Ok(Arith::max(a, b)),
        BinaryOp::Min => Ok(Arith::min(a, b)),
    })
}

fn apply_unary<T: Arith>(op: UnaryOp, values: &[T]) -> XlaResult<Vec<T>> {
    match op {
        UnaryOp::Neg => Ok(values.iter().map(|v| Arith::neg(*v)).collect()),
        UnaryOp::Abs => Ok(values.iter().map(|v| Arith::abs(*v)).collect()),
        other => Err(XlaError::unimplemented(
            other.name(),
            "only defined for floating-point operands",
        )),
    }
}

macro_rules! float_unary {
    ($ty:ty, $op:expr, $values:expr) => {
        match $op {
            UnaryOp::Exp => $values.iter().map(|v| v.exp()).collect::<Vec<$ty>>(),
            UnaryOp::Log => $values.iter().map(|v| v.ln()).collect::<Vec<$ty>>(),
            UnaryOp::Tanh => $values.iter().map(|v| v.tanh()).collect::<Vec<$ty>>(),
            UnaryOp::Neg => $values.iter().map(|v| -v).collect::<Vec<$ty>>(),
            UnaryOp::Abs => $values.iter().map(|v| v.abs()).collect::<Vec<$ty>>(),
        }
    };
}

fn unary(op: UnaryOp, operand: &Literal, shape: &Shape) -> XlaResult<Literal> {
    let data = match operand.logical_data()? {
        ArrayData::F32(values) => ArrayData::F32(float_unary!(f32, op, values)),
        ArrayData::F64(values) => ArrayData::F64(float_unary!(f64, op, values)),
        ArrayData::Si8(values) => ArrayData::Si8(apply_unary(op, &values)?),
        ArrayData::Ui8(values) => ArrayData::Ui8(apply_unary(op, &values)?),
        ArrayData::Si32(values) => ArrayData::Si32(apply_unary(op, &values)?),
        ArrayData::Ui32(values) => ArrayData::Ui32(apply_unary(op, &values)?),
        ArrayData::Si64(values) => ArrayData::Si64(apply_unary(op, &values)?),
        ArrayData::Ui64(values) => ArrayData::Ui64(apply_unary(op, &values)?),
        ArrayData::I1(_) => {
            return Err(XlaError::unimplemented(op.name(), "not defined for pred"))
        }
    };
    Literal::from_logical(result_dims(shape)?, data)
}

fn binary(op: BinaryOp, lhs: &Literal, rhs: &Literal, shape: &Shape) -> XlaResult<Literal> {
    let dims = result_dims(shape)?;
    let len = dims.iter().product();
    let data = match (lhs.logical_data()?, rhs.logical_data()?) {
        (ArrayData::F32(a), ArrayData::F32(b)) => ArrayData::F32(apply_binary(op, &a, &b, len)?),
        (ArrayData::F64(a), ArrayData::F64(b)) => ArrayData::F64(apply_binary(op, &a, &b, len)?),
        (ArrayData::Si8(a), ArrayData::Si8(b)) => ArrayData::Si8(apply_binary(op, &a, &b, len)?),
        (ArrayData::Ui8(a), ArrayData::Ui8(b)) => ArrayData::Ui8(apply_binary(op, &a, &b, len)?),
        (ArrayData::Si32(a), ArrayData::Si32(b)) => ArrayData::Si32(apply_binary(op, &a, &b, len)?),
        (ArrayData::Ui32(a), ArrayData::Ui32(b)) => ArrayData::Ui32(apply_binary(op, &a, &b, len)?),
        (ArrayData::Si64(a), ArrayData::Si64(b)) => ArrayData::Si64(apply_binary(op, &a, &b, len)?),
        (ArrayData::Ui64(a), ArrayData::Ui64(b)) => ArrayData::Ui64(apply_binary(op, &a, &b, len)?),
        (a, b) => {
            return Err(XlaError::unimplemented(
                op.name(),
                format!("operand types {} and {}", a.dtype(), b.dtype()),
            ))
        }
    };
    Literal::from_logical(dims, data)
}

fn compare_values<T: Copy + PartialOrd>(
    direction: ComparisonDirection,
    lhs: &[T],
    rhs: &[T],
    len: usize,
) -> XlaResult<Vec<bool>> {
    zip_with(lhs, rhs, len, |a, b| {
        Ok(match direction {
            ComparisonDirection::Eq => a == b,
            ComparisonDirection::Ne => a != b,
            ComparisonDirection::Lt => a < b,
            ComparisonDirection::Le => a <= b,
            ComparisonDirection::Gt => a > b,
            ComparisonDirection::Ge => a >= b,
        })
    })
}

fn compare(
    direction: ComparisonDirection,
    lhs: &Literal,
    rhs: &Literal,
    shape: &Shape,
) -> XlaResult<Literal> {
    let dims = result_dims(shape)?;
    let len = dims.iter().product();
    let values = match (lhs.logical_data()?, rhs.logical_data()?) {
        (ArrayData::I1(a), ArrayData::I1(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::F32(a), ArrayData::F32(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::F64(a), ArrayData::F64(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::Si8(a), ArrayData::Si8(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::Ui8(a), ArrayData::Ui8(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::Si32(a), ArrayData::Si32(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::Ui32(a), ArrayData::Ui32(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::Si64(a), ArrayData::Si64(b)) => compare_values(direction, &a, &b, len)?,
        (ArrayData::Ui64(a), ArrayData::Ui64(b)) => compare_values(direction, &a, &b, len)?,
        (a, b) => {
            return Err(XlaError::unimplemented(
                "compare",
                format!("operand types {} and {}", a.dtype(), b.dtype()),
            ))
        }
    };
    Literal::from_logical(dims, ArrayData::I1(values))
}

#[derive(Clone, Copy)]
enum Scalar {
    Int(i128),
    Float(f64),
}

fn widen(data: &ArrayData) -> Vec<Scalar> {
    match data {
        ArrayData::I1(v) => v.iter().map(|&x| Scalar::Int(i128::from(x))).collect(),
        ArrayData::Si8(v) => v.iter().map(|&x| Scalar::Int(i128::from(x))).collect(),
        ArrayData::Ui8(v) => v.iter().map(|&x| Scalar::Int(i128::from(x))).collect(),
        ArrayData::Si32(v) => v.iter().map(|&x| Scalar::Int(i128::from(x))).collect(),
        ArrayData::Ui32(v) => v.iter().map(|&x| Scalar::Int(i128::from(x))).collect(),
        ArrayData::Si64(v) => v.iter().map(|&x| Scalar::Int(i128::from(x))).collect(),
        ArrayData::Ui64(v) => v.iter().map(|&x| Scalar::Int(i128::from(x))).collect(),
        ArrayData::F32(v) => v.iter().map(|&x| Scalar::Float(f64::from(x))).collect(),
        ArrayData::F64(v) => v.iter().map(|&x| Scalar::Float(x)).collect(),
    }
}

macro_rules! narrow {
    ($values:expr, $ty:ty) => {
        $values
            .iter()
            .map(|s| match *s {
                Scalar::Int(i) => i as $ty,
                Scalar::Float(f) => f as $ty,
            })
            .collect::<Vec<$ty>>()
    };
}

/// Integer narrowing wraps, float-to-integer saturates, anything non-zero is `true`.
fn convert(operand: &Literal, dtype: DType) -> XlaResult<Literal> {
    let dims = operand
        .array_shape()
        .map(|shape| shape.dims.clone())
        .ok_or_else(|| XlaError::execution("convert expects an array operand"))?;
    let values = widen(&operand.logical_data()?);
    let data = match dtype {
        DType::I1 => ArrayData::I1(
            values
                .iter()
                .map(|s| match *s {
                    Scalar::Int(i) => i != 0,
                    Scalar::Float(f) => f != 0.0,
                })
                .collect(),
        ),
        DType::Si8 => ArrayData::Si8(narrow!(values, i8)),
        DType::Ui8 => ArrayData::Ui8(narrow!(values, u8)),
        DType::Si32 => ArrayData::Si32(narrow!(values, i32)),
        DType::Ui32 => ArrayData::Ui32(narrow!(values, u32)),
        DType::Si64 => ArrayData::Si64(narrow!(values, i64)),
        DType::Ui64 => ArrayData::Ui64(narrow!(values, u64)),
        DType::F32 => ArrayData::F32(narrow!(values, f32)),
        DType::F64 => ArrayData::F64(narrow!(values, f64)),
    };
    Literal::from_logical(dims, data)
}

fn pick<T: Copy>(pred: &[bool], on_true: &[T], on_false: &[T]) -> Vec<T> {
    pred.iter()
        .zip(on_true.iter().zip(on_false))
        .map(|(&p, (&t, &f))| if p { t } else { f })
        .collect()
}

fn select(pred: &Literal, on_true: &Literal, on_false: &Literal) -> XlaResult<Literal> {
    let pred_shape = pred
        .array_shape()
        .ok_or_else(|| XlaError::execution("select predicate must be an array"))?;
    if pred_shape.is_scalar() {
        return Ok(if pred.get::<bool>(&[])? {
            on_true.clone()
        } else {
            on_false.clone()
        });
    }
    let mask = pred.to_vec::<bool>()?;
    let dims = pred_shape.dims.clone();
    let data = match (on_true.logical_data()?, on_false.logical_data()?) {
        (ArrayData::I1(t), ArrayData::I1(f)) => ArrayData::I1(pick(&mask, &t, &f)),
        (ArrayData::Si8(t), ArrayData::Si8(f)) => ArrayData::Si8(pick(&mask, &t, &f)),
        (ArrayData::Ui8(t), ArrayData::Ui8(f)) => ArrayData::Ui8(pick(&mask, &t, &f)),
        (ArrayData::Si32(t), ArrayData::Si32(f)) => ArrayData::Si32(pick(&mask, &t, &f)),
        (ArrayData::Ui32(t), ArrayData::Ui32(f)) => ArrayData::Ui32(pick(&mask, &t, &f)),
        (ArrayData::Si64(t), ArrayData::Si64(f)) => ArrayData::Si64(pick(&mask, &t, &f)),
        (ArrayData::Ui64(t), ArrayData::Ui64(f)) => ArrayData::Ui64(pick(&mask, &t, &f)),
        (ArrayData::F32(t), ArrayData::F32(f)) => ArrayData::F32(pick(&mask, &t, &f)),
        (ArrayData::F64(t), ArrayData::F64(f)) => ArrayData::F64(pick(&mask, &t, &f)),
        (t, f) => {
            return Err(XlaError::execution(format!(
                "select branches have different types {} and {}",
                t.dtype(),
                f.dtype()
            )))
        }
    };
    Literal::from_logical(dims, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rexla::ComputationBuilder;

    #[test]
    fn broadcast_scalar_add() {
        let mut b = ComputationBuilder::new("add");
        let x = b.constant_r1(&[1.0f32, 2.0, 3.0]);
        let y = b.constant_r0(10.0f32);
        b.add(y, x);
        let result = evaluate(&b.build().unwrap(), &[]).unwrap();
        assert_eq!(result, Literal::r1(&[11.0f32, 12.0, 13.0]));
    }

    #[test]
    fn column_major_operands_use_logical_order() {
        let mut b = ComputationBuilder::new("sub");
        let x = b.parameter(0, Shape::array(DType::Si32, [2, 2]), "x");
        let y = b.parameter(1, Shape::array(DType::Si32, [2, 2]), "y");
        b.sub(x, y);
        let computation = b.build().unwrap();
        let lhs = Literal::r2_with_layout(&[[10i32, 20], [30, 40]], &[0, 1]).unwrap();
        let rhs = Literal::r2(&[[1i32, 2], [3, 4]]);
        let result = evaluate(&computation, &[lhs, rhs]).unwrap();
        assert_eq!(result, Literal::r2(&[[9i32, 18], [27, 36]]));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let mut b = ComputationBuilder::new("add_constant");
        let x = b.parameter(0, Shape::array(DType::F32, [3]), "x");
        let c = b.constant_r1(&[2.0f32, 3.0, 4.0]);
        b.add(x, c);
        let computation = b.build().unwrap();

        let short = Literal::Array {
            shape: rexla::ArrayShape::new(DType::F32, [3]),
            data: ArrayData::F32(vec![1.0, 2.0]),
        };
        let err = evaluate(&computation, &[short]).unwrap_err();
        assert!(matches!(err, XlaError::InvalidLiteral(_)), "{err}");

        let err = evaluate(&computation, &[Literal::r1(&[1.0f32, 2.0])]).unwrap_err();
        assert!(err.to_string().contains("invalid argument shape for parameter 0"), "{err}");
    }

    #[test]
    fn integer_division_by_zero_reports_instruction() {
        let mut b = ComputationBuilder::new("div");
        let x = b.constant_r1(&[4i32, 2]);
        let y = b.constant_r1(&[2i32, 0]);
        b.div(x, y);
        let err = evaluate(&b.build().unwrap(), &[]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("integer divide by zero"), "{message}");
        assert!(message.contains("instruction #2"), "{message}");
    }

    #[test]
    fn convert_wraps_and_saturates() {
        let mut b = ComputationBuilder::new("convert");
        let x = b.constant_r1(&[300i32, -1]);
        b.convert(x, DType::Ui8);
        let result = evaluate(&b.build().unwrap(), &[]).unwrap();
        assert_eq!(result, Literal::r1(&[44u8, 255]));

        let mut b = ComputationBuilder::new("convert");
        let x = b.constant_r1(&[1e10f32, -2.5, 0.0]);
        b.convert(x, DType::Si32);
        let result = evaluate(&b.build().unwrap(), &[]).unwrap();
        assert_eq!(result, Literal::r1(&[i32::MAX, -2, 0]));
    }

    #[test]
    fn elementwise_select_and_compare() {
        let mut b = ComputationBuilder::new("select");
        let x = b.constant_r1(&[1.0f32, 5.0, 3.0]);
        let y = b.constant_r1(&[4.0f32, 2.0, 3.0]);
        let pred = b.gt(x, y);
        b.select(pred, x, y);
        let result = evaluate(&b.build().unwrap(), &[]).unwrap();
        assert_eq!(result, Literal::r1(&[4.0f32, 5.0, 3.0]));
    }

    #[test]
    fn zero_element_ops_are_empty() {
        let mut b = ComputationBuilder::new("empty");
        let x = b.constant_r1::<f32>(&[]);
        let y = b.constant_r1::<f32>(&[]);
        let sum = b.add(x, y);
        b.exp(sum);
        let result = evaluate(&b.build().unwrap(), &[]).unwrap();
        assert_eq!(result, Literal::r1::<f32>(&[]));
    }

    #[test]
    fn transcendental_ops() {
        let mut b = ComputationBuilder::new("unary");
        let x = b.constant_r1(&[0.0f64, 1.0]);
        let e = b.exp(x);
        let l = b.log(e);
        let t = b.tanh(x);
        b.tuple(&[l, t]);
        let result = evaluate(&b.build().unwrap(), &[]).unwrap();
        let log_exp = result.tuple_element(0).unwrap().to_vec::<f64>().unwrap();
        assert!((log_exp[1] - 1.0).abs() < 1e-12);
        let tanh = result.tuple_element(1).unwrap().to_vec::<f64>().unwrap();
        assert!((tanh[1] - 1.0f64.tanh()).abs() < 1e-12);
    }
}
