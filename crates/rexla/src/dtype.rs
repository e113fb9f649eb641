//! Enumerates the scalar element types carried by shapes, literals and device buffers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar element type of an array shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum DType {
    /// Boolean predicate, stored as one byte per element.
    I1,
    Si8,
    Ui8,
    Si32,
    Ui32,
    Si64,
    Ui64,
    F32,
    F64,
}

impl DType {
    pub const ALL: [DType; 9] = [
        DType::I1,
        DType::Si8,
        DType::Ui8,
        DType::Si32,
        DType::Ui32,
        DType::Si64,
        DType::Ui64,
        DType::F32,
        DType::F64,
    ];

    /// Returns `true` for the predicate type.
    pub fn is_pred(self) -> bool {
        self == DType::I1
    }

    /// Returns `true` when the dtype is any signed or unsigned integer.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Si8 | DType::Ui8 | DType::Si32 | DType::Ui32 | DType::Si64 | DType::Ui64
        )
    }

    /// Returns `true` when the dtype is a signed integer.
    pub fn is_signed_integer(self) -> bool {
        matches!(self, DType::Si8 | DType::Si32 | DType::Si64)
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Returns `true` for dtypes that support arithmetic.
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Storage size of one element in device memory.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 | DType::Si8 | DType::Ui8 => 1,
            DType::Si32 | DType::Ui32 | DType::F32 => 4,
            DType::Si64 | DType::Ui64 | DType::F64 => 8,
        }
    }

    /// Short name used in shape strings (`f32[2,3]`).
    pub fn name(self) -> &'static str {
        match self {
            DType::I1 => "pred",
            DType::Si8 => "s8",
            DType::Ui8 => "u8",
            DType::Si32 => "s32",
            DType::Ui32 => "u32",
            DType::Si64 => "s64",
            DType::Ui64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DType::ALL.into_iter().find(|dtype| dtype.name() == name)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for dtype in DType::ALL {
            assert_eq!(DType::from_name(dtype.name()), Some(dtype));
        }
        assert_eq!(DType::from_name("bf16"), None);
    }

    #[test]
    fn classification() {
        assert!(DType::I1.is_pred());
        assert!(!DType::I1.is_numeric());
        assert!(DType::Ui32.is_integer() && !DType::Ui32.is_signed_integer());
        assert!(DType::F64.is_float());
        assert_eq!(DType::Si64.size_in_bytes(), 8);
    }
}
