//! Winner-take-all selection over per-channel gate scores.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::autograd::grad_fn::MaskBackward;
use crate::autograd::{is_grad_enabled, with_graph, Tensor};

/// Keep the top-`k` scores per sample and zero the rest.
///
/// `scores` has shape `[batch, channels]` and `k = round(channels * ratio)`,
/// counted per sample by descending score value. Kept entries pass through
/// unchanged; dropped entries become zero. Ties at the k-th boundary resolve
/// toward the lower channel index, a selection order other implementations
/// need not share.
///
/// `ratio` must lie in `[0, 1]`; models validate this at construction, and
/// the assert here guards direct callers.
///
/// The mask is a constant of the forward pass, so gradients flow through
/// kept entries and vanish at dropped ones.
#[must_use]
pub fn winner_take_all(scores: &Tensor, ratio: f32) -> Tensor {
    assert!(
        (0.0..=1.0).contains(&ratio),
        "sparsity ratio {ratio} outside [0, 1]"
    );
    assert_eq!(
        scores.ndim(),
        2,
        "winner_take_all expects [batch, channels] scores, got {}D",
        scores.ndim()
    );

    let (batch, channels) = (scores.shape()[0], scores.shape()[1]);
    let k = (channels as f32 * ratio).round() as usize;

    let data = scores.data();
    let mut mask = vec![0.0f32; batch * channels];

    for b in 0..batch {
        let row = &data[b * channels..(b + 1) * channels];

        // Stable sort keeps lower indices first among equal scores
        let mut order: Vec<usize> = (0..channels).collect();
        order.sort_by(|&i, &j| row[j].partial_cmp(&row[i]).unwrap_or(Ordering::Equal));

        for &c in order.iter().take(k) {
            mask[b * channels + c] = 1.0;
        }
    }

    let output_data: Vec<f32> = data.iter().zip(mask.iter()).map(|(&s, &m)| s * m).collect();
    let mut output = Tensor::new(&output_data, scores.shape());

    if is_grad_enabled() && scores.requires_grad_enabled() {
        output.requires_grad_(true);
        let grad_fn = Arc::new(MaskBackward {
            mask: Tensor::new(&mask, scores.shape()),
        });
        output.set_grad_fn(grad_fn.clone());

        with_graph(|graph| {
            graph.register_tensor(scores.clone());
            graph.record(output.id(), grad_fn, vec![scores.id()]);
        });
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};
    use proptest::prelude::*;

    fn nonzero_count(row: &[f32]) -> usize {
        row.iter().filter(|&&v| v != 0.0).count()
    }

    #[test]
    fn test_keeps_exactly_k_per_sample() {
        let scores = Tensor::new(
            &[0.9, 0.1, 0.5, 0.3, 0.2, 0.8, 0.4, 0.6], //
            &[2, 4],
        );
        let out = winner_take_all(&scores, 0.5);

        assert_eq!(out.shape(), &[2, 4]);
        assert_eq!(out.data(), &[0.9, 0.0, 0.5, 0.0, 0.0, 0.8, 0.0, 0.6]);
    }

    #[test]
    fn test_kept_entries_equal_input() {
        let scores = Tensor::new(&[3.0, 1.0, 2.0, 0.5], &[1, 4]);
        let out = winner_take_all(&scores, 0.75);

        // k = round(4 * 0.75) = 3: drops only the smallest
        assert_eq!(out.data(), &[3.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_ratio_one_is_identity() {
        let scores = Tensor::new(&[0.1, 0.0, 7.0, 2.5, 2.5, 0.3], &[2, 3]);
        let out = winner_take_all(&scores, 1.0);
        assert_eq!(out.data(), scores.data());
    }

    #[test]
    fn test_ratio_zero_is_all_zero() {
        let scores = Tensor::new(&[5.0, 4.0, 3.0, 2.0], &[2, 2]);
        let out = winner_take_all(&scores, 0.0);
        assert!(out.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_rounding_of_k() {
        // round(3 * 0.5) = 2 (half away from zero)
        let scores = Tensor::new(&[1.0, 2.0, 3.0], &[1, 3]);
        let out = winner_take_all(&scores, 0.5);
        assert_eq!(nonzero_count(out.data()), 2);
    }

    #[test]
    fn test_ties_prefer_lower_index() {
        let scores = Tensor::new(&[1.0, 1.0, 1.0, 0.5], &[1, 4]);
        let out = winner_take_all(&scores, 0.5);
        assert_eq!(out.data(), &[1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_samples_select_independently() {
        let scores = Tensor::new(&[9.0, 1.0, 1.0, 9.0], &[2, 2]);
        let out = winner_take_all(&scores, 0.5);
        assert_eq!(out.data(), &[9.0, 0.0, 0.0, 9.0]);
    }

    #[test]
    fn test_gradient_dies_at_dropped_entries() {
        clear_graph();

        let scores = Tensor::new(&[0.9, 0.1, 0.5, 0.3], &[1, 4]).requires_grad();
        let out = winner_take_all(&scores, 0.5);
        out.sum().backward();

        let grad = get_grad(scores.id()).unwrap();
        assert_eq!(grad.data(), &[1.0, 0.0, 1.0, 0.0]);

        clear_graph();
    }

    #[test]
    #[should_panic(expected = "outside [0, 1]")]
    fn test_ratio_above_one_panics() {
        let scores = Tensor::new(&[1.0, 2.0], &[1, 2]);
        winner_take_all(&scores, 1.5);
    }

    #[test]
    #[should_panic(expected = "outside [0, 1]")]
    fn test_negative_ratio_panics() {
        let scores = Tensor::new(&[1.0, 2.0], &[1, 2]);
        winner_take_all(&scores, -0.1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_nonzero_count_matches_budget(
            batch in 1..=4usize,
            channels in 1..=16usize,
            ratio_pct in 0..=100u32,
            seed in 0..500u32,
        ) {
            let ratio = ratio_pct as f32 / 100.0;
            // Strictly positive distinct-ish scores so zeros only come from selection
            let data: Vec<f32> = (0..batch * channels)
                .map(|i| 1.0 + ((i as f32 + seed as f32) * 0.73).sin().abs())
                .collect();
            let scores = Tensor::new(&data, &[batch, channels]);

            let out = winner_take_all(&scores, ratio);
            let k = (channels as f32 * ratio).round() as usize;

            for b in 0..batch {
                let row = &out.data()[b * channels..(b + 1) * channels];
                prop_assert_eq!(
                    nonzero_count(row), k,
                    "sample {} kept {} of {} channels, budget {}",
                    b, nonzero_count(row), channels, k
                );
            }
        }

        #[test]
        fn prop_output_is_input_or_zero(
            channels in 1..=16usize,
            ratio_pct in 0..=100u32,
            seed in 0..500u32,
        ) {
            let ratio = ratio_pct as f32 / 100.0;
            let data: Vec<f32> = (0..channels)
                .map(|i| ((i as f32 + seed as f32) * 0.37).sin() * 3.0)
                .collect();
            let scores = Tensor::new(&data, &[1, channels]);

            let out = winner_take_all(&scores, ratio);

            for (c, (&o, &s)) in out.data().iter().zip(scores.data().iter()).enumerate() {
                prop_assert!(
                    o == 0.0 || o == s,
                    "channel {} produced {} which is neither 0 nor the input {}",
                    c, o, s
                );
            }
        }
    }
}
