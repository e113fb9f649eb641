//! Result-shape rules for every IR operation.
//!
//! Inferred shapes never carry layouts; layouts are chosen at compile time
//! (result layout) or by the caller (argument layouts).

use crate::dtype::DType;
use crate::error::{XlaError, XlaResult};
use crate::ir::{BinaryOp, ComparisonDirection, Operation, UnaryOp};
use crate::shape::{ArrayShape, Shape};

/// Infers the result shape of `op` applied to `operands`.
///
/// Parameters have no inferable shape: their shape is whatever was declared.
pub fn infer(op: &Operation, operands: &[&Shape]) -> XlaResult<Shape> {
    match op {
        Operation::Parameter { .. } => Err(XlaError::shape_inference(
            "parameter",
            "parameter shapes are declared, not inferred",
        )),
        Operation::Constant(literal) => {
            expect_arity("constant", operands, 0)?;
            Ok(literal.shape().without_layouts())
        }
        Operation::Unary(unary) => {
            expect_arity(unary.name(), operands, 1)?;
            infer_unary(*unary, operands[0])
        }
        Operation::Binary(binary) => {
            expect_arity(binary.name(), operands, 2)?;
            infer_binary(*binary, operands[0], operands[1])
        }
        Operation::Compare(direction) => {
            expect_arity("compare", operands, 2)?;
            infer_compare(*direction, operands[0], operands[1])
        }
        Operation::Convert(dtype) => {
            expect_arity("convert", operands, 1)?;
            infer_convert(operands[0], *dtype)
        }
        Operation::Select => {
            expect_arity("select", operands, 3)?;
            infer_select(operands[0], operands[1], operands[2])
        }
        Operation::Tuple => Ok(infer_tuple(operands)),
        Operation::GetTupleElement { index } => {
            expect_arity("get_tuple_element", operands, 1)?;
            infer_get_tuple_element(operands[0], *index)
        }
    }
}

fn expect_arity(op: &'static str, operands: &[&Shape], expected: usize) -> XlaResult<()> {
    if operands.len() != expected {
        return Err(XlaError::shape_inference(
            op,
            format!("expected {expected} operands, got {}", operands.len()),
        ));
    }
    Ok(())
}

fn expect_array<'a>(op: &'static str, shape: &'a Shape) -> XlaResult<&'a ArrayShape> {
    shape
        .as_array()
        .ok_or_else(|| XlaError::shape_inference(op, format!("expected an array operand, got {shape}")))
}

pub fn infer_unary(op: UnaryOp, operand: &Shape) -> XlaResult<Shape> {
    let array = expect_array(op.name(), operand)?;
    if op.requires_float() && !array.dtype.is_float() {
        return Err(XlaError::shape_inference(
            op.name(),
            format!("requires a floating-point operand, got {operand}"),
        ));
    }
    if !array.dtype.is_numeric() {
        return Err(XlaError::shape_inference(
            op.name(),
            format!("requires a numeric operand, got {operand}"),
        ));
    }
    Ok(Shape::array(array.dtype, array.dims.clone()))
}

/// Element-wise rule shared by arithmetic and comparisons: equal dims, or a
/// scalar on either side broadcast to the other operand.
fn broadcast_dims(op: &'static str, lhs: &ArrayShape, rhs: &ArrayShape) -> XlaResult<Vec<usize>> {
    if lhs.dtype != rhs.dtype {
        return Err(XlaError::shape_inference(
            op,
            format!("operand types differ: {} vs {}", lhs.dtype, rhs.dtype),
        ));
    }
    if lhs.dims == rhs.dims || rhs.is_scalar() {
        Ok(lhs.dims.clone())
    } else if lhs.is_scalar() {
        Ok(rhs.dims.clone())
    } else {
        Err(XlaError::shape_inference(
            op,
            format!(
                "operand dimensions {:?} and {:?} are not compatible",
                lhs.dims, rhs.dims
            ),
        ))
    }
}

pub fn infer_binary(op: BinaryOp, lhs: &Shape, rhs: &Shape) -> XlaResult<Shape> {
    let name = op.name();
    let (lhs, rhs) = (expect_array(name, lhs)?, expect_array(name, rhs)?);
    let dims = broadcast_dims(name, lhs, rhs)?;
    if !lhs.dtype.is_numeric() {
        return Err(XlaError::shape_inference(
            name,
            format!("arithmetic is not defined for {}", lhs.dtype),
        ));
    }
    Ok(Shape::array(lhs.dtype, dims))
}

pub fn infer_compare(direction: ComparisonDirection, lhs: &Shape, rhs: &Shape) -> XlaResult<Shape> {
    let (lhs, rhs) = (expect_array("compare", lhs)?, expect_array("compare", rhs)?);
    let dims = broadcast_dims("compare", lhs, rhs)?;
    if direction.is_ordering() && !lhs.dtype.is_numeric() {
        return Err(XlaError::shape_inference(
            "compare",
            format!("{} is not an ordered type", lhs.dtype),
        ));
    }
    Ok(Shape::array(DType::I1, dims))
}

pub fn infer_convert(operand: &Shape, dtype: DType) -> XlaResult<Shape> {
    let array = expect_array("convert", operand)?;
    Ok(Shape::array(dtype, array.dims.clone()))
}

/// A scalar predicate picks one whole branch (arrays or tuples); an array
/// predicate selects element-wise between array branches of its dims.
pub fn infer_select(pred: &Shape, on_true: &Shape, on_false: &Shape) -> XlaResult<Shape> {
    let pred_array = expect_array("select", pred)?;
    if !pred_array.dtype.is_pred() {
        return Err(XlaError::shape_inference(
            "select",
            format!("predicate must be pred, got {pred}"),
        ));
    }
    if !on_true.compatible(on_false) {
        return Err(XlaError::shape_inference(
            "select",
            format!("branches have incompatible shapes {on_true} and {on_false}"),
        ));
    }
    if !pred_array.is_scalar() {
        let branch = expect_array("select", on_true)?;
        if branch.dims != pred_array.dims {
            return Err(XlaError::shape_inference(
                "select",
                format!("predicate {pred} does not match branch shape {on_true}"),
            ));
        }
    }
    Ok(on_true.without_layouts())
}

pub fn infer_tuple(elements: &[&Shape]) -> Shape {
    Shape::Tuple(elements.iter().map(|shape| shape.without_layouts()).collect())
}

pub fn infer_get_tuple_element(operand: &Shape, index: usize) -> XlaResult<Shape> {
    match operand {
        Shape::Tuple(elements) => elements
            .get(index)
            .map(Shape::without_layouts)
            .ok_or_else(|| {
                XlaError::shape_inference(
                    "get_tuple_element",
                    format!("index {index} out of range for {operand}"),
                )
            }),
        Shape::Array(_) => Err(XlaError::shape_inference(
            "get_tuple_element",
            format!("operand {operand} is not a tuple"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_broadcasts_either_side() {
        let vec3 = Shape::array(DType::F32, [3]);
        let scalar = Shape::scalar(DType::F32);
        assert_eq!(infer_binary(BinaryOp::Add, &vec3, &scalar).unwrap(), vec3);
        assert_eq!(infer_binary(BinaryOp::Mul, &scalar, &vec3).unwrap(), vec3);
        assert!(infer_binary(BinaryOp::Add, &vec3, &Shape::array(DType::F32, [2])).is_err());
        assert!(infer_binary(BinaryOp::Add, &vec3, &Shape::array(DType::F64, [3])).is_err());
    }

    #[test]
    fn zero_element_operands_are_legal() {
        let empty = Shape::array(DType::F32, [0]);
        assert_eq!(infer_binary(BinaryOp::Add, &empty, &empty).unwrap(), empty);
    }

    #[test]
    fn layouts_are_dropped() {
        let col = Shape::with_layout(DType::F32, [2, 2], [0, 1]);
        let result = infer_binary(BinaryOp::Add, &col, &col).unwrap();
        assert_eq!(result, Shape::array(DType::F32, [2, 2]));
    }

    #[test]
    fn pred_arithmetic_and_integer_exp_are_rejected() {
        let pred = Shape::scalar(DType::I1);
        assert!(infer_binary(BinaryOp::Add, &pred, &pred).is_err());
        assert!(infer_unary(UnaryOp::Exp, &Shape::scalar(DType::Si32)).is_err());
        assert!(infer_unary(UnaryOp::Neg, &Shape::scalar(DType::Si32)).is_ok());
        assert_eq!(
            infer_compare(ComparisonDirection::Eq, &pred, &pred).unwrap(),
            pred
        );
        assert!(infer_compare(ComparisonDirection::Lt, &pred, &pred).is_err());
    }

    #[test]
    fn select_between_tuples_needs_scalar_predicate() {
        let tuple = Shape::tuple([Shape::array(DType::F32, [3]), Shape::scalar(DType::F32)]);
        let scalar_pred = Shape::scalar(DType::I1);
        assert_eq!(infer_select(&scalar_pred, &tuple, &tuple).unwrap(), tuple);
        let vec_pred = Shape::array(DType::I1, [3]);
        assert!(infer_select(&vec_pred, &tuple, &tuple).is_err());
        let vec3 = Shape::array(DType::F32, [3]);
        assert_eq!(infer_select(&vec_pred, &vec3, &vec3).unwrap(), vec3);
        assert!(infer_select(&scalar_pred, &tuple, &vec3).is_err());
    }

    #[test]
    fn get_tuple_element_bounds() {
        let tuple = Shape::tuple([Shape::scalar(DType::Si32)]);
        assert_eq!(
            infer_get_tuple_element(&tuple, 0).unwrap(),
            Shape::scalar(DType::Si32)
        );
        assert!(infer_get_tuple_element(&tuple, 1).is_err());
        assert!(infer_get_tuple_element(&Shape::scalar(DType::Si32), 0).is_err());
    }
}
