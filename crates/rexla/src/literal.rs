//! Host-resident values: arrays stored in a physical layout, and tuples of literals.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{XlaError, XlaResult};
use crate::layout::Layout;
use crate::shape::{ArrayShape, Shape};

/// Typed element storage for one array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    I1(Vec<bool>),
    Si8(Vec<i8>),
    Ui8(Vec<u8>),
    Si32(Vec<i32>),
    Ui32(Vec<u32>),
    Si64(Vec<i64>),
    Ui64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Applies `$body` to the vector inside any [`ArrayData`] variant and
/// rewraps the result in the same variant.
macro_rules! map_array_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::I1($values) => ArrayData::I1($body),
            ArrayData::Si8($values) => ArrayData::Si8($body),
            ArrayData::Ui8($values) => ArrayData::Ui8($body),
            ArrayData::Si32($values) => ArrayData::Si32($body),
            ArrayData::Ui32($values) => ArrayData::Ui32($body),
            ArrayData::Si64($values) => ArrayData::Si64($body),
            ArrayData::Ui64($values) => ArrayData::Ui64($body),
            ArrayData::F32($values) => ArrayData::F32($body),
            ArrayData::F64($values) => ArrayData::F64($body),
        }
    };
}

/// Evaluates `$body` against the vector inside any [`ArrayData`] variant.
macro_rules! with_array_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::I1($values) => $body,
            ArrayData::Si8($values) => $body,
            ArrayData::Ui8($values) => $body,
            ArrayData::Si32($values) => $body,
            ArrayData::Ui32($values) => $body,
            ArrayData::Si64($values) => $body,
            ArrayData::Ui64($values) => $body,
            ArrayData::F32($values) => $body,
            ArrayData::F64($values) => $body,
        }
    };
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::I1(_) => DType::I1,
            ArrayData::Si8(_) => DType::Si8,
            ArrayData::Ui8(_) => DType::Ui8,
            ArrayData::Si32(_) => DType::Si32,
            ArrayData::Ui32(_) => DType::Ui32,
            ArrayData::Si64(_) => DType::Si64,
            ArrayData::Ui64(_) => DType::Ui64,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_array_data!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::I1 => ArrayData::I1(vec![false; len]),
            DType::Si8 => ArrayData::Si8(vec![0; len]),
            DType::Ui8 => ArrayData::Ui8(vec![0; len]),
            DType::Si32 => ArrayData::Si32(vec![0; len]),
            DType::Ui32 => ArrayData::Ui32(vec![0; len]),
            DType::Si64 => ArrayData::Si64(vec![0; len]),
            DType::Ui64 => ArrayData::Ui64(vec![0; len]),
            DType::F32 => ArrayData::F32(vec![0.0; len]),
            DType::F64 => ArrayData::F64(vec![0.0; len]),
        }
    }

    /// `out[i] = self[indices[i]]`.
    pub fn gather(&self, indices: &[usize]) -> ArrayData {
        map_array_data!(self, values => indices.iter().map(|&i| values[i]).collect())
    }

    /// `out[indices[i]] = self[i]`; `indices` must be a permutation of `0..len`.
    pub fn scatter(&self, indices: &[usize]) -> ArrayData {
        map_array_data!(self, values => {
            let mut out = values.clone();
            for (src, &dst) in indices.iter().enumerate() {
                out[dst] = values[src];
            }
            out
        })
    }

    /// Little-endian device representation.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            ArrayData::I1(values) => values.iter().map(|&v| u8::from(v)).collect(),
            ArrayData::Si8(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ArrayData::Ui8(values) => values.clone(),
            ArrayData::Si32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ArrayData::Ui32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ArrayData::Si64(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ArrayData::Ui64(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ArrayData::F32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ArrayData::F64(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> XlaResult<Self> {
        let size = dtype.size_in_bytes();
        if bytes.len() % size != 0 {
            return Err(XlaError::transfer(format!(
                "{} bytes cannot hold whole {dtype} elements",
                bytes.len()
            )));
        }
        Ok(match dtype {
            DType::I1 => ArrayData::I1(bytes.iter().map(|&b| b != 0).collect()),
            DType::Si8 => ArrayData::Si8(decode(bytes, i8::from_le_bytes)),
            DType::Ui8 => ArrayData::Ui8(bytes.to_vec()),
            DType::Si32 => ArrayData::Si32(decode(bytes, i32::from_le_bytes)),
            DType::Ui32 => ArrayData::Ui32(decode(bytes, u32::from_le_bytes)),
            DType::Si64 => ArrayData::Si64(decode(bytes, i64::from_le_bytes)),
            DType::Ui64 => ArrayData::Ui64(decode(bytes, u64::from_le_bytes)),
            DType::F32 => ArrayData::F32(decode(bytes, f32::from_le_bytes)),
            DType::F64 => ArrayData::F64(decode(bytes, f64::from_le_bytes)),
        })
    }
}

fn decode<const N: usize, T>(bytes: &[u8], convert: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            convert(buf)
        })
        .collect()
}

/// Rust scalar types that can populate a literal.
pub trait NativeType: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn into_data(values: Vec<Self>) -> ArrayData;

    fn slice(data: &ArrayData) -> Option<&[Self]>;
}

macro_rules! native_type {
    ($ty:ty, $variant:ident) => {
        impl NativeType for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn slice(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

native_type!(bool, I1);
native_type!(i8, Si8);
native_type!(u8, Ui8);
native_type!(i32, Si32);
native_type!(u32, Ui32);
native_type!(i64, Si64);
native_type!(u64, Ui64);
native_type!(f32, F32);
native_type!(f64, F64);

/// Host value tree. Array data is stored in the order given by the shape's
/// layout, which is always present on a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Array { shape: ArrayShape, data: ArrayData },
    Tuple(Vec<Literal>),
}

impl Literal {
    pub fn r0<T: NativeType>(value: T) -> Self {
        Self::row_major(Vec::new(), T::into_data(vec![value]))
    }

    pub fn r1<T: NativeType>(values: &[T]) -> Self {
        Self::row_major(vec![values.len()], T::into_data(values.to_vec()))
    }

    pub fn r2<T: NativeType, const N: usize>(rows: &[[T; N]]) -> Self {
        let values = rows.iter().flatten().copied().collect::<Vec<_>>();
        Self::row_major(vec![rows.len(), N], T::into_data(values))
    }

    /// Rank-2 literal whose storage follows `minor_to_major`.
    pub fn r2_with_layout<T: NativeType, const N: usize>(
        rows: &[[T; N]],
        minor_to_major: &[usize],
    ) -> XlaResult<Self> {
        Self::r2(rows).relayout(&Layout::new(minor_to_major))
    }

    /// Array literal from row-major values.
    pub fn from_vec<T: NativeType>(dims: impl Into<Vec<usize>>, values: Vec<T>) -> XlaResult<Self> {
        Self::from_logical(dims, T::into_data(values))
    }

    /// Array literal from untyped row-major data.
    pub fn from_logical(dims: impl Into<Vec<usize>>, data: ArrayData) -> XlaResult<Self> {
        let dims = dims.into();
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(XlaError::invalid_literal(format!(
                "{} elements supplied for dims {dims:?} ({expected} expected)",
                data.len()
            )));
        }
        Ok(Self::row_major(dims, data))
    }

    /// Array literal from data already stored in `shape`'s layout.
    pub fn from_physical(shape: ArrayShape, data: ArrayData) -> XlaResult<Self> {
        check_array(&shape, &data)?;
        let layout = shape.layout_or_default();
        layout.validate(shape.rank())?;
        Ok(Literal::Array {
            shape: shape.with_layout(layout),
            data,
        })
    }

    /// All-zero literal of the given shape; arrays follow the shape's layouts.
    pub fn zeros(shape: &Shape) -> XlaResult<Self> {
        match shape {
            Shape::Array(array) => Self::from_physical(
                array.clone(),
                ArrayData::zeros(array.dtype, array.element_count()),
            ),
            Shape::Tuple(elements) => Ok(Literal::Tuple(
                elements.iter().map(Literal::zeros).collect::<XlaResult<_>>()?,
            )),
        }
    }

    pub fn tuple(elements: Vec<Literal>) -> Self {
        Literal::Tuple(elements)
    }

    fn row_major(dims: Vec<usize>, data: ArrayData) -> Self {
        let layout = Layout::row_major(dims.len());
        Literal::Array {
            shape: ArrayShape::new(data.dtype(), dims).with_layout(layout),
            data,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Literal::Array { shape, .. } => Shape::Array(shape.clone()),
            Literal::Tuple(elements) => Shape::Tuple(elements.iter().map(Literal::shape).collect()),
        }
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Literal::Tuple(_))
    }

    pub fn array_shape(&self) -> Option<&ArrayShape> {
        match self {
            Literal::Array { shape, .. } => Some(shape),
            Literal::Tuple(_) => None,
        }
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.array_shape().and_then(|shape| shape.layout.as_ref())
    }

    pub fn tuple_elements(&self) -> Option<&[Literal]> {
        match self {
            Literal::Tuple(elements) => Some(elements),
            Literal::Array { .. } => None,
        }
    }

    pub fn tuple_element(&self, index: usize) -> Option<&Literal> {
        self.tuple_elements().and_then(|elements| elements.get(index))
    }

    /// Splits a tuple into its elements; arrays are returned as a one-element list.
    pub fn decompose_tuple(self) -> Vec<Literal> {
        match self {
            Literal::Tuple(elements) => elements,
            array => vec![array],
        }
    }

    pub fn element_count(&self) -> usize {
        match self {
            Literal::Array { shape, .. } => shape.element_count(),
            Literal::Tuple(elements) => elements.iter().map(Literal::element_count).sum(),
        }
    }

    /// Raw storage in physical order.
    pub fn physical_data(&self) -> XlaResult<&ArrayData> {
        match self {
            Literal::Array { data, .. } => Ok(data),
            Literal::Tuple(_) => Err(XlaError::invalid_literal(
                "tuple literals have no array data",
            )),
        }
    }

    /// Elements in logical row-major order.
    pub fn logical_data(&self) -> XlaResult<ArrayData> {
        let (shape, data) = self.as_array_parts()?;
        let layout = shape.layout_or_default();
        if layout.is_row_major() {
            return Ok(data.clone());
        }
        Ok(data.gather(&layout.physical_offsets(&shape.dims)))
    }

    pub fn to_vec<T: NativeType>(&self) -> XlaResult<Vec<T>> {
        let (shape, _) = self.as_array_parts()?;
        if shape.dtype != T::DTYPE {
            return Err(XlaError::invalid_literal(format!(
                "cannot read {} elements from a {shape} literal",
                T::DTYPE
            )));
        }
        let data = self.logical_data()?;
        T::slice(&data)
            .map(<[T]>::to_vec)
            .ok_or_else(|| XlaError::invalid_literal("element storage does not match dtype"))
    }

    /// Element at a logical multi-index.
    pub fn get<T: NativeType>(&self, index: &[usize]) -> XlaResult<T> {
        let (shape, data) = self.as_array_parts()?;
        if index.len() != shape.rank() || index.iter().zip(&shape.dims).any(|(i, d)| i >= d) {
            return Err(XlaError::invalid_literal(format!(
                "index {index:?} is out of bounds for {shape}"
            )));
        }
        let offset = shape.layout_or_default().linear_index(&shape.dims, index);
        T::slice(data)
            .and_then(|values| values.get(offset).copied())
            .ok_or_else(|| {
                XlaError::invalid_literal(format!("cannot read {} from {shape}", T::DTYPE))
            })
    }

    /// Same logical value stored in a different layout.
    pub fn relayout(&self, layout: &Layout) -> XlaResult<Literal> {
        let (shape, _) = self.as_array_parts()?;
        layout.validate(shape.rank())?;
        let logical = self.logical_data()?;
        let data = if layout.is_row_major() {
            logical
        } else {
            logical.scatter(&layout.physical_offsets(&shape.dims))
        };
        Ok(Literal::Array {
            shape: shape.clone().with_layout(layout.clone()),
            data,
        })
    }

    /// Re-lays out every array so that the literal's shape carries the
    /// layouts of `shape`, which must be compatible with it.
    pub fn relayout_to(&self, shape: &Shape) -> XlaResult<Literal> {
        match (self, shape) {
            (Literal::Array { .. }, Shape::Array(target)) => {
                if !self.shape().compatible(shape) {
                    return Err(XlaError::invalid_literal(format!(
                        "cannot lay out {} as {shape}",
                        self.shape()
                    )));
                }
                self.relayout(&target.layout_or_default())
            }
            (Literal::Tuple(elements), Shape::Tuple(targets)) if elements.len() == targets.len() => {
                Ok(Literal::Tuple(
                    elements
                        .iter()
                        .zip(targets)
                        .map(|(element, target)| element.relayout_to(target))
                        .collect::<XlaResult<_>>()?,
                ))
            }
            _ => Err(XlaError::invalid_literal(format!(
                "cannot lay out {} as {shape}",
                self.shape()
            ))),
        }
    }

    fn as_array_parts(&self) -> XlaResult<(&ArrayShape, &ArrayData)> {
        match self {
            Literal::Array { shape, data } => Ok((shape, data)),
            Literal::Tuple(_) => Err(XlaError::invalid_literal(
                "expected an array literal, found a tuple",
            )),
        }
    }

    pub fn to_json_string(&self) -> XlaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(src: &str) -> XlaResult<Self> {
        let literal: Literal = serde_json::from_str(src)?;
        literal.normalized()
    }

    /// Checks element counts and layouts, filling in missing layouts.
    /// Checks that every array's data matches its shape's type, element count
    /// and layout.
    pub fn validate(&self) -> XlaResult<()> {
        match self {
            Literal::Array { shape, data } => {
                check_array(shape, data)?;
                match &shape.layout {
                    Some(layout) => layout.validate(shape.rank()),
                    None => Ok(()),
                }
            }
            Literal::Tuple(elements) => elements.iter().try_for_each(Literal::validate),
        }
    }

    fn normalized(self) -> XlaResult<Literal> {
        match self {
            Literal::Array { shape, data } => Literal::from_physical(shape, data),
            Literal::Tuple(elements) => Ok(Literal::Tuple(
                elements
                    .into_iter()
                    .map(Literal::normalized)
                    .collect::<XlaResult<_>>()?,
            )),
        }
    }
}

fn check_array(shape: &ArrayShape, data: &ArrayData) -> XlaResult<()> {
    if shape.dtype != data.dtype() {
        return Err(XlaError::invalid_literal(format!(
            "data of type {} does not match shape {shape}",
            data.dtype()
        )));
    }
    if shape.element_count() != data.len() {
        return Err(XlaError::invalid_literal(format!(
            "{} elements supplied for shape {shape}",
            data.len()
        )));
    }
    Ok(())
}

/// Structural equality: compatible shapes and equal elements in logical order.
/// Physical layout does not take part in the comparison.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Array { shape: a, .. }, Literal::Array { shape: b, .. }) => {
                a.compatible(b)
                    && matches!(
                        (self.logical_data(), other.logical_data()),
                        (Ok(x), Ok(y)) if x == y
                    )
            }
            (Literal::Tuple(a), Literal::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Array { shape, .. } => {
                let values = match self.logical_data() {
                    Ok(data) => with_array_data!(&data, values => values
                        .iter()
                        .map(|v| format!("{v:?}"))
                        .collect::<Vec<_>>()
                        .join(", ")),
                    Err(_) => String::from("<invalid>"),
                };
                write!(f, "{shape} {{{values}}}")
            }
            Literal::Tuple(elements) => {
                let inner = elements
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({inner})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r2_with_col_major_layout_keeps_logical_values() {
        let literal = Literal::r2_with_layout(&[[1.0f32, 2.0], [3.0, 4.0]], &[0, 1]).unwrap();
        assert_eq!(literal.layout(), Some(&Layout::col_major(2)));
        assert_eq!(
            literal.physical_data().unwrap(),
            &ArrayData::F32(vec![1.0, 3.0, 2.0, 4.0])
        );
        assert_eq!(literal.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(literal.get::<f32>(&[0, 1]).unwrap(), 2.0);
        assert_eq!(literal, Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]));
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(Literal::r0(42.0f32), Literal::r0(42.0f32));
        assert_ne!(Literal::r0(42.0f32), Literal::r0(42.0f64));
        assert_ne!(Literal::r1(&[1i32, 2]), Literal::r1(&[2i32, 1]));
        assert_ne!(
            Literal::r1(&[1.0f32, 2.0]),
            Literal::tuple(vec![Literal::r1(&[1.0f32, 2.0])])
        );
        let nested = Literal::tuple(vec![
            Literal::tuple(vec![Literal::r1(&[1.0f32, -42.0]), Literal::r0(123456.0f32)]),
            Literal::r0(false),
        ]);
        assert_eq!(nested.clone(), nested);
        assert_eq!(Literal::tuple(Vec::new()), Literal::tuple(Vec::new()));
    }

    #[test]
    fn from_vec_checks_element_count() {
        assert!(Literal::from_vec([2, 2], vec![1.0f32, 2.0, 3.0]).is_err());
        let empty = Literal::from_vec([0], Vec::<f32>::new()).unwrap();
        assert_eq!(empty.element_count(), 0);
        assert_eq!(empty.shape(), Shape::with_layout(DType::F32, [0], [0]));
    }

    #[test]
    fn byte_encoding_round_trips() {
        let data = ArrayData::Si32(vec![2, 1, 4444, -56]);
        let bytes = data.to_le_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(ArrayData::from_le_bytes(DType::Si32, &bytes).unwrap(), data);
        assert!(ArrayData::from_le_bytes(DType::F64, &bytes[..7]).is_err());
        let preds = ArrayData::I1(vec![true, false]);
        assert_eq!(preds.to_le_bytes(), vec![1, 0]);
    }

    #[test]
    fn relayout_to_follows_tuple_structure() {
        let literal = Literal::tuple(vec![
            Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]),
            Literal::r0(7i32),
        ]);
        let target = Shape::tuple([
            Shape::with_layout(DType::F32, [2, 2], [0, 1]),
            Shape::scalar(DType::Si32),
        ]);
        let relaid = literal.relayout_to(&target).unwrap();
        assert!(relaid.shape().equal_with_layout(&target));
        assert_eq!(relaid, literal);
        assert!(literal
            .relayout_to(&Shape::array(DType::F32, [4]))
            .is_err());
    }

    #[test]
    fn typed_reads_reject_wrong_dtype_and_index() {
        let literal = Literal::r1(&[1u8, 2, 3]);
        assert!(literal.to_vec::<i8>().is_err());
        assert!(literal.get::<u8>(&[3]).is_err());
        assert_eq!(literal.get::<u8>(&[2]).unwrap(), 3);
        assert!(Literal::tuple(Vec::new()).to_vec::<u8>().is_err());
    }

    #[test]
    fn json_round_trip_validates() {
        let literal = Literal::tuple(vec![Literal::r1(&[1.5f64, -2.0]), Literal::r0(true)]);
        let json = literal.to_json_string().unwrap();
        assert_eq!(Literal::from_json_str(&json).unwrap(), literal);

        let unlaid = r#"{"Array":{"shape":{"dtype":"F32","dims":[2],"layout":null},"data":{"F32":[1.0,2.0]}}}"#;
        let parsed = Literal::from_json_str(unlaid).unwrap();
        assert_eq!(parsed.layout(), Some(&Layout::row_major(1)));

        let broken = r#"{"Array":{"shape":{"dtype":"F32","dims":[3],"layout":null},"data":{"F32":[1.0]}}}"#;
        assert!(Literal::from_json_str(broken).is_err());
    }

    #[test]
    fn display_prints_logical_order() {
        let literal = Literal::r2_with_layout(&[[1i32, 2], [3, 4]], &[0, 1]).unwrap();
        assert_eq!(literal.to_string(), "s32[2,2]{0,1} {1, 2, 3, 4}");
    }
}
