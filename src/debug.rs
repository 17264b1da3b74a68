// Helpers for comparing floats in tests

pub fn assert_approx_eq(a: &f32, b: &f32, epsilon: f32) {
    assert!(
        (*a - *b).abs() <= epsilon,
        "Values differ: {:?} vs {:?} (tolerance: {:?})",
        *a,
        *b,
        epsilon
    );
}

pub fn assert_vec_approx_eq(actual: &[f32], expected: &[f32], epsilon: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Lengths differ: {:?} vs {:?}",
        actual,
        expected
    );

    for (i, (a, b)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - b).abs() <= epsilon,
            "Values differ at {}: {:?} vs {:?} (tolerance: {:?})",
            i,
            a,
            b,
            epsilon
        );
    }
}
