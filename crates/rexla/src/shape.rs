//! Array and tuple shapes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::XlaResult;
use crate::layout::Layout;

/// Path from the root of a (possibly nested) tuple shape to one of its sub-shapes.
pub type ShapeIndex = Vec<usize>;

/// Element type, dimensions and optional physical layout of one array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayShape {
    pub dtype: DType,
    pub dims: Vec<usize>,
    pub layout: Option<Layout>,
}

impl ArrayShape {
    pub fn new(dtype: DType, dims: impl Into<Vec<usize>>) -> Self {
        Self {
            dtype,
            dims: dims.into(),
            layout: None,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.element_count() * self.dtype.size_in_bytes()
    }

    /// The explicit layout, or row-major when none was set.
    pub fn layout_or_default(&self) -> Layout {
        self.layout
            .clone()
            .unwrap_or_else(|| Layout::row_major(self.rank()))
    }

    /// Same dtype and dimensions; layouts are ignored.
    pub fn compatible(&self, other: &ArrayShape) -> bool {
        self.dtype == other.dtype && self.dims == other.dims
    }
}

/// Shape of a literal or device buffer: an array or an ordered tuple of shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Array(ArrayShape),
    Tuple(Vec<Shape>),
}

impl Shape {
    pub fn array(dtype: DType, dims: impl Into<Vec<usize>>) -> Self {
        Shape::Array(ArrayShape::new(dtype, dims))
    }

    pub fn scalar(dtype: DType) -> Self {
        Shape::array(dtype, Vec::new())
    }

    /// Array shape with an explicit minor-to-major layout.
    pub fn with_layout(
        dtype: DType,
        dims: impl Into<Vec<usize>>,
        minor_to_major: impl Into<Vec<usize>>,
    ) -> Self {
        Shape::Array(ArrayShape::new(dtype, dims).with_layout(Layout::new(minor_to_major)))
    }

    pub fn tuple(elements: impl Into<Vec<Shape>>) -> Self {
        Shape::Tuple(elements.into())
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Shape::Array(_))
    }

    pub fn as_array(&self) -> Option<&ArrayShape> {
        match self {
            Shape::Array(array) => Some(array),
            Shape::Tuple(_) => None,
        }
    }

    pub fn tuple_element_count(&self) -> Option<usize> {
        match self {
            Shape::Tuple(elements) => Some(elements.len()),
            Shape::Array(_) => None,
        }
    }

    pub fn tuple_element(&self, index: usize) -> Option<&Shape> {
        match self {
            Shape::Tuple(elements) => elements.get(index),
            Shape::Array(_) => None,
        }
    }

    /// Layout of an array shape, if one was set.
    pub fn layout(&self) -> Option<&Layout> {
        self.as_array().and_then(|array| array.layout.as_ref())
    }

    /// Structural equality ignoring layouts.
    pub fn compatible(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Array(a), Shape::Array(b)) => a.compatible(b),
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible(y))
            }
            _ => false,
        }
    }

    /// Compatible, and every array carries the same effective layout.
    ///
    /// A missing layout compares equal to row-major.
    pub fn equal_with_layout(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Array(a), Shape::Array(b)) => {
                a.compatible(b) && a.layout_or_default() == b.layout_or_default()
            }
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal_with_layout(y))
            }
            _ => false,
        }
    }

    /// Compatible with `other`, and every layout set in `self` equals the
    /// effective layout of the matching array in `other`. Arrays without a
    /// layout in `self` accept any layout.
    pub fn accepts_layouts_of(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Array(a), Shape::Array(b)) => {
                a.compatible(b)
                    && a.layout
                        .as_ref()
                        .map_or(true, |layout| *layout == b.layout_or_default())
            }
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.accepts_layouts_of(y))
            }
            _ => false,
        }
    }

    /// Copy with every missing array layout set to row-major.
    pub fn with_default_layouts(&self) -> Shape {
        match self {
            Shape::Array(array) => {
                let layout = array.layout_or_default();
                Shape::Array(array.clone().with_layout(layout))
            }
            Shape::Tuple(elements) => {
                Shape::Tuple(elements.iter().map(Shape::with_default_layouts).collect())
            }
        }
    }

    /// Copy with every array layout cleared.
    pub fn without_layouts(&self) -> Shape {
        match self {
            Shape::Array(array) => Shape::Array(ArrayShape {
                layout: None,
                ..array.clone()
            }),
            Shape::Tuple(elements) => {
                Shape::Tuple(elements.iter().map(Shape::without_layouts).collect())
            }
        }
    }

    /// Returns `true` when every array in the shape has an explicit layout.
    pub fn has_layouts(&self) -> bool {
        match self {
            Shape::Array(array) => array.layout.is_some(),
            Shape::Tuple(elements) => elements.iter().all(Shape::has_layouts),
        }
    }

    /// Validates every explicit layout against its array's rank.
    pub fn validate_layouts(&self) -> XlaResult<()> {
        match self {
            Shape::Array(array) => match &array.layout {
                Some(layout) => layout.validate(array.rank()),
                None => Ok(()),
            },
            Shape::Tuple(elements) => elements.iter().try_for_each(Shape::validate_layouts),
        }
    }

    pub fn subshape(&self, index: &[usize]) -> Option<&Shape> {
        let mut current = self;
        for &i in index {
            current = current.tuple_element(i)?;
        }
        Some(current)
    }

    /// Every sub-shape index in pre-order, the root (`[]`) first.
    pub fn indices(&self) -> Vec<ShapeIndex> {
        let mut out = Vec::new();
        collect_indices(self, &mut Vec::new(), &mut out);
        out
    }

    /// Bytes needed to hold this node on a device: the array payload, or for
    /// a tuple an index table of one 64-bit handle per element.
    pub fn node_byte_size(&self) -> usize {
        match self {
            Shape::Array(array) => array.byte_size(),
            Shape::Tuple(elements) => elements.len() * std::mem::size_of::<u64>(),
        }
    }
}

fn collect_indices(shape: &Shape, prefix: &mut ShapeIndex, out: &mut Vec<ShapeIndex>) {
    out.push(prefix.clone());
    if let Shape::Tuple(elements) = shape {
        for (i, element) in elements.iter().enumerate() {
            prefix.push(i);
            collect_indices(element, prefix, out);
            prefix.pop();
        }
    }
}

impl fmt::Display for ArrayShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}[{dims}]", self.dtype)?;
        if let Some(layout) = &self.layout {
            write!(f, "{layout}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array(array) => write!(f, "{array}"),
            Shape::Tuple(elements) => {
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
    fn display_matches_shape_strings() {
        assert_eq!(Shape::array(DType::F32, [2, 2]).to_string(), "f32[2,2]");
        assert_eq!(
            Shape::with_layout(DType::F32, [2, 2], [0, 1]).to_string(),
            "f32[2,2]{0,1}"
        );
        let tuple = Shape::tuple([Shape::array(DType::F32, [3]), Shape::scalar(DType::I1)]);
        assert_eq!(tuple.to_string(), "(f32[3], pred[])");
        assert_eq!(Shape::tuple(Vec::new()).to_string(), "()");
    }

    #[test]
    fn compatibility_ignores_layout() {
        let row = Shape::with_layout(DType::F32, [2, 2], [1, 0]);
        let col = Shape::with_layout(DType::F32, [2, 2], [0, 1]);
        assert!(row.compatible(&col));
        assert!(!row.equal_with_layout(&col));
        assert!(row.equal_with_layout(&Shape::array(DType::F32, [2, 2])));
        assert!(!row.compatible(&Shape::array(DType::F32, [4])));
        assert!(!row.compatible(&Shape::tuple([row.clone()])));
    }

    #[test]
    fn unset_layouts_accept_any_layout() {
        let row = Shape::with_layout(DType::F32, [2, 2], [1, 0]);
        let col = Shape::with_layout(DType::F32, [2, 2], [0, 1]);
        let bare = Shape::array(DType::F32, [2, 2]);
        assert!(bare.accepts_layouts_of(&col));
        assert!(row.accepts_layouts_of(&bare));
        assert!(!col.accepts_layouts_of(&row));
        assert!(!col.accepts_layouts_of(&Shape::with_layout(DType::F32, [4], [0])));
        let tuple = Shape::tuple([bare, col.clone()]);
        assert!(tuple.accepts_layouts_of(&Shape::tuple([row.clone(), col])));
        assert!(!tuple.accepts_layouts_of(&Shape::tuple([row.clone(), row])));
    }

    #[test]
    fn indices_are_pre_order() {
        let nested = Shape::tuple([
            Shape::tuple([Shape::array(DType::F32, [2]), Shape::scalar(DType::F32)]),
            Shape::scalar(DType::I1),
        ]);
        assert_eq!(
            nested.indices(),
            vec![vec![], vec![0], vec![0, 0], vec![0, 1], vec![1]]
        );
        assert_eq!(nested.subshape(&[0, 1]), Some(&Shape::scalar(DType::F32)));
        assert_eq!(nested.subshape(&[2]), None);
        assert_eq!(nested.node_byte_size(), 16);
    }

    #[test]
    fn default_layouts_fill_missing_entries() {
        let shape = Shape::tuple([
            Shape::array(DType::F32, [2, 3]),
            Shape::with_layout(DType::F32, [2, 3], [0, 1]),
        ]);
        let filled = shape.with_default_layouts();
        assert!(filled.has_layouts());
        assert_eq!(
            filled.tuple_element(0).and_then(Shape::layout),
            Some(&Layout::row_major(2))
        );
        assert_eq!(
            filled.tuple_element(1).and_then(Shape::layout),
            Some(&Layout::col_major(2))
        );
        assert!(!filled.without_layouts().has_layouts());
    }
}
