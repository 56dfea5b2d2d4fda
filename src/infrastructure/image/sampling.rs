//! Decode-time sub-sampling.

use crate::domain::entities::DecodeBudget;

/// Computes the power-of-two sub-sampling factor for a decode.
///
/// Halves the true dimensions repeatedly while both halves still cover the
/// requested bounds, so the decoded image is never smaller than requested on
/// either axis. An unbounded budget always yields 1.
#[must_use]
pub fn sample_factor(true_width: u32, true_height: u32, budget: DecodeBudget) -> u32 {
    if budget.is_unbounded() {
        return 1;
    }

    let mut factor = 1u32;
    if true_height > budget.height || true_width > budget.width {
        let half_width = true_width / 2;
        let half_height = true_height / 2;

        while half_height / factor >= budget.height && half_width / factor >= budget.width {
            match factor.checked_mul(2) {
                Some(next) => factor = next,
                None => break,
            }
        }
    }
    factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1000, 1000, 100, 100, 8 ; "square_thousand_to_hundred")]
    #[test_case(1000, 1000, 0, 100, 1 ; "width_unset")]
    #[test_case(1000, 1000, 100, 0, 1 ; "height_unset")]
    #[test_case(100, 100, 100, 100, 1 ; "exact_fit")]
    #[test_case(50, 50, 100, 100, 1 ; "smaller_than_request")]
    #[test_case(200, 200, 100, 100, 2 ; "exactly_double")]
    #[test_case(199, 199, 100, 100, 1 ; "just_under_double")]
    #[test_case(4000, 1000, 100, 100, 8 ; "height_limits")]
    #[test_case(1000, 4000, 100, 100, 8 ; "width_limits")]
    #[test_case(4096, 4096, 1, 1, 4096 ; "tiny_request")]
    fn test_sample_factor(w: u32, h: u32, rw: u32, rh: u32, expected: u32) {
        assert_eq!(sample_factor(w, h, DecodeBudget::new(rw, rh)), expected);
    }

    #[test]
    fn test_factor_is_power_of_two_and_never_undershoots() {
        for (w, h) in [(1, 1), (333, 777), (1920, 1080), (8000, 20), (65535, 65535)] {
            for (rw, rh) in [(1, 1), (10, 10), (64, 48), (500, 300), (1000, 1000)] {
                let factor = sample_factor(w, h, DecodeBudget::new(rw, rh));
                assert!(factor >= 1);
                assert!(factor.is_power_of_two());
                if factor > 1 {
                    assert!(w / factor >= rw, "{w}x{h} -> {rw}x{rh}: {factor}");
                    assert!(h / factor >= rh, "{w}x{h} -> {rw}x{rh}: {factor}");
                }
            }
        }
    }

    #[test]
    fn test_extreme_dimensions_terminate() {
        let factor = sample_factor(u32::MAX, u32::MAX, DecodeBudget::new(1, 1));
        assert!(factor.is_power_of_two());
    }
}
