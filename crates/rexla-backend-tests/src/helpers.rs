//! Literal assertions shared by the conformance tests.

use std::fmt::Debug;

use regex::Regex;
use rexla::{ArrayData, Literal, NativeType, XlaResult};

/// Tolerance for approximate float comparisons: a value passes when it is
/// within `abs` of the expectation, or within `rel` of it relatively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorSpec {
    pub abs: f64,
    pub rel: f64,
}

impl ErrorSpec {
    pub const fn new(abs: f64, rel: f64) -> Self {
        Self { abs, rel }
    }
}

impl Default for ErrorSpec {
    fn default() -> Self {
        Self::new(1e-4, 1e-4)
    }
}

fn widen(data: &ArrayData) -> Vec<f64> {
    match data {
        ArrayData::I1(v) => v.iter().map(|&x| f64::from(u8::from(x))).collect(),
        ArrayData::Si8(v) => v.iter().map(|&x| f64::from(x)).collect(),
        ArrayData::Ui8(v) => v.iter().map(|&x| f64::from(x)).collect(),
        ArrayData::Si32(v) => v.iter().map(|&x| f64::from(x)).collect(),
        ArrayData::Ui32(v) => v.iter().map(|&x| f64::from(x)).collect(),
        ArrayData::Si64(v) => v.iter().map(|&x| x as f64).collect(),
        ArrayData::Ui64(v) => v.iter().map(|&x| x as f64).collect(),
        ArrayData::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
        ArrayData::F64(v) => v.clone(),
    }
}

/// Asserts that `actual` has `expected`'s shape (ignoring layout) and that
/// every element is within `spec`. Tuples are compared element by element.
pub fn expect_near(expected: &Literal, actual: &Literal, spec: ErrorSpec) {
    assert!(
        expected.shape().compatible(&actual.shape()),
        "shape mismatch: expected {}, got {}",
        expected.shape(),
        actual.shape()
    );
    match (expected.tuple_elements(), actual.tuple_elements()) {
        (Some(expected), Some(actual)) => {
            for (e, a) in expected.iter().zip(actual) {
                expect_near(e, a, spec);
            }
        }
        _ => {
            let expected_values = widen(&expected.logical_data().expect("expected array"));
            let actual_values = widen(&actual.logical_data().expect("actual array"));
            for (i, (e, a)) in expected_values.iter().zip(&actual_values).enumerate() {
                let diff = (e - a).abs();
                let within = diff <= spec.abs || diff <= spec.rel * e.abs();
                let both_nan = e.is_nan() && a.is_nan();
                assert!(
                    within || both_nan,
                    "element {i} differs: expected {e}, got {a} (abs {}, rel {})",
                    spec.abs,
                    spec.rel
                );
            }
        }
    }
}

pub fn expect_r0_near<T: NativeType>(expected: T, actual: &Literal, spec: ErrorSpec) {
    expect_near(&Literal::r0(expected), actual, spec);
}

pub fn expect_r1_near<T: NativeType>(expected: &[T], actual: &Literal, spec: ErrorSpec) {
    expect_near(&Literal::r1(expected), actual, spec);
}

pub fn expect_r2_near<T: NativeType, const N: usize>(
    expected: &[[T; N]],
    actual: &Literal,
    spec: ErrorSpec,
) {
    expect_near(&Literal::r2(expected), actual, spec);
}

pub fn expect_r0_equal<T: NativeType>(expected: T, actual: &Literal) {
    assert_eq!(actual, &Literal::r0(expected));
}

pub fn expect_r1_equal<T: NativeType>(expected: &[T], actual: &Literal) {
    assert_eq!(actual, &Literal::r1(expected));
}

pub fn expect_r2_equal<T: NativeType, const N: usize>(expected: &[[T; N]], actual: &Literal) {
    assert_eq!(actual, &Literal::r2(expected));
}

/// Asserts that `result` failed with a message matching `pattern`.
pub fn expect_error_matches<T: Debug>(result: XlaResult<T>, pattern: &str) {
    let regex = Regex::new(pattern).expect("valid regex");
    match result {
        Ok(value) => panic!("expected an error matching /{pattern}/, got Ok({value:?})"),
        Err(err) => {
            let message = err.to_string();
            assert!(
                regex.is_match(&message),
                "error {message:?} does not match /{pattern}/"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_accepts_small_differences() {
        expect_r1_near(&[1.0f32, 2.0], &Literal::r1(&[1.00001f32, 1.99999]), ErrorSpec::default());
    }

    #[test]
    #[should_panic(expected = "element 1 differs")]
    fn near_rejects_large_differences() {
        expect_r1_near(&[1.0f32, 2.0], &Literal::r1(&[1.0f32, 2.5]), ErrorSpec::default());
    }

    #[test]
    fn error_regex_matches() {
        let result: XlaResult<()> = Err(rexla::XlaError::DeviceNotSupported {
            ordinal: 1,
            platform: "host".into(),
        });
        expect_error_matches(result, "device .* not supported");
    }
}
