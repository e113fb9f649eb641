use proptest::prelude::*;
use rexla::{Layout, Literal, Shape};

/// Dims of rank 1 to 3, two layouts for them and row-major values.
fn array_case() -> impl Strategy<Value = (Vec<usize>, Vec<usize>, Vec<usize>, Vec<i32>)> {
    prop::collection::vec(1usize..5, 1..=3).prop_flat_map(|dims| {
        let rank = dims.len();
        let count: usize = dims.iter().product();
        (
            Just(dims),
            Just((0..rank).collect::<Vec<_>>()).prop_shuffle(),
            Just((0..rank).collect::<Vec<_>>()).prop_shuffle(),
            prop::collection::vec(any::<i32>(), count),
        )
    })
}

fn unravel(mut flat: usize, dims: &[usize]) -> Vec<usize> {
    let mut index = vec![0; dims.len()];
    for axis in (0..dims.len()).rev() {
        index[axis] = flat % dims[axis];
        flat /= dims[axis];
    }
    index
}

proptest! {
    #[test]
    fn physical_offsets_are_a_permutation((dims, layout, _other, _values) in array_case()) {
        let mut offsets = Layout::new(layout).physical_offsets(&dims);
        offsets.sort_unstable();
        let count: usize = dims.iter().product();
        prop_assert_eq!(offsets, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn relayout_preserves_logical_values((dims, layout, _other, values) in array_case()) {
        let literal = Literal::from_vec(dims.clone(), values.clone()).unwrap();
        let relaid = literal.relayout(&Layout::new(layout.clone())).unwrap();
        prop_assert_eq!(relaid.layout(), Some(&Layout::new(layout)));
        prop_assert_eq!(relaid.to_vec::<i32>().unwrap(), values.clone());
        prop_assert_eq!(&relaid, &literal);
        for (flat, value) in values.iter().enumerate() {
            let index = unravel(flat, &dims);
            prop_assert_eq!(relaid.get::<i32>(&index).unwrap(), *value);
        }
    }

    #[test]
    fn relayout_is_path_independent((dims, first, second, values) in array_case()) {
        let literal = Literal::from_vec(dims, values).unwrap();
        let via_first = literal
            .relayout(&Layout::new(first))
            .unwrap()
            .relayout(&Layout::new(second.clone()))
            .unwrap();
        let direct = literal.relayout(&Layout::new(second)).unwrap();
        prop_assert_eq!(via_first.physical_data().unwrap(), direct.physical_data().unwrap());
    }

    #[test]
    fn relayout_to_applies_shape_layouts((dims, layout, _other, values) in array_case()) {
        let literal = Literal::from_vec(dims.clone(), values).unwrap();
        let target = Shape::with_layout(rexla::DType::Si32, dims, layout.clone());
        let relaid = literal.relayout_to(&target).unwrap();
        prop_assert!(relaid.shape().equal_with_layout(&target));
        prop_assert_eq!(relaid, literal);
    }
}
