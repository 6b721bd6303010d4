use approx::assert_abs_diff_eq;

use nightstack_core::stack::combine::{
    auto_adaptive, combine_column, entropy_weighted, kappa_sigma_clip, mean, median, CombineMethod,
};

fn all_methods() -> Vec<CombineMethod> {
    vec![
        CombineMethod::Average,
        CombineMethod::Median,
        CombineMethod::kappa_sigma(),
        CombineMethod::median_kappa_sigma(),
        CombineMethod::AutoAdaptive { iterations: 5 },
        CombineMethod::EntropyWeighted,
    ]
}

#[test]
fn identical_samples_unchanged_for_every_method() {
    for method in all_methods() {
        let mut column = vec![0.37f32; 12];
        let result = combine_column(&mut column, method);
        assert_abs_diff_eq!(result, 0.37, epsilon = 1e-6);
    }
}

#[test]
fn median_is_order_invariant() {
    let mut a = vec![0.9f32, 0.1, 0.5, 0.3, 0.7];
    let mut b = vec![0.3f32, 0.7, 0.9, 0.1, 0.5];
    assert_abs_diff_eq!(median(&mut a), median(&mut b), epsilon = 1e-9);
    assert_abs_diff_eq!(median(&mut a), 0.5, epsilon = 1e-9);
}

#[test]
fn median_even_count_averages_central_pair() {
    let mut values = vec![0.4f32, 0.1, 0.3, 0.2];
    assert_abs_diff_eq!(median(&mut values), 0.25, epsilon = 1e-9);
}

#[test]
fn kappa_sigma_zero_iterations_is_plain_average() {
    let values = vec![0.1f32, 0.2, 0.3, 0.4, 5.0];
    let mut scratch = values.clone();
    let clipped = kappa_sigma_clip(&mut scratch, 2.0, 0, false);
    assert_abs_diff_eq!(clipped, mean(&values), epsilon = 1e-6);
}

#[test]
fn kappa_sigma_rejects_outlier() {
    let mut values = vec![0.20f32, 0.21, 0.19, 0.20, 0.21, 0.19, 0.20, 0.95];
    let clipped = kappa_sigma_clip(&mut values, 2.0, 3, false);
    assert!(clipped < 0.25, "outlier should be clipped, got {clipped}");
}

#[test]
fn median_kappa_sigma_rejects_outlier() {
    let mut values = vec![0.20f32, 0.21, 0.19, 0.20, 0.21, 0.19, 0.20, 0.95];
    let clipped = kappa_sigma_clip(&mut values, 2.0, 3, true);
    assert_abs_diff_eq!(clipped, 0.2, epsilon = 0.02);
}

#[test]
fn auto_adaptive_pulls_toward_consensus() {
    let values = vec![0.30f32, 0.31, 0.29, 0.30, 0.90];
    let plain = mean(&values);
    let adaptive = auto_adaptive(&values, 5);
    assert!(
        adaptive < plain,
        "adaptive {adaptive} should sit below the plain mean {plain}"
    );
    assert!(adaptive > 0.29);
}

#[test]
fn auto_adaptive_zero_iterations_is_plain_average() {
    let values = vec![0.1f32, 0.5, 0.9];
    assert_abs_diff_eq!(auto_adaptive(&values, 0), 0.5, epsilon = 1e-6);
}

#[test]
fn entropy_weighted_favors_heavier_samples() {
    let values = vec![0.0f32, 1.0];
    let weights = vec![3.0f32, 1.0];
    assert_abs_diff_eq!(entropy_weighted(&values, &weights), 0.25, epsilon = 1e-6);
}

#[test]
fn entropy_weighted_zero_weights_falls_back_to_mean() {
    let values = vec![0.2f32, 0.4];
    let weights = vec![0.0f32, 0.0];
    assert_abs_diff_eq!(entropy_weighted(&values, &weights), 0.3, epsilon = 1e-6);
}
