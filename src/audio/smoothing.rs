/// Two-stage curve smoothing: a gap-aware median filter followed by a
/// triangular weighted moving average over the median output.
///
/// Absent values are ignored inside each window. A gap surrounded by voiced
/// frames is filled by the median stage; a window with no voiced frames at
/// all stays absent. Output has the same length as the input.
///
/// Applying the filter twice generally changes the curve again.
pub fn smooth(pitches: &[Option<f32>], window_size: usize) -> Vec<Option<f32>> {
    if window_size <= 1 || pitches.is_empty() {
        return pitches.to_vec();
    }

    let half = window_size / 2;
    let medians = median_filter(pitches, half);
    weighted_average(&medians, half)
}

fn window_bounds(i: usize, half: usize, len: usize) -> (usize, usize) {
    (i.saturating_sub(half), (i + half + 1).min(len))
}

fn median_filter(pitches: &[Option<f32>], half: usize) -> Vec<Option<f32>> {
    let mut scratch: Vec<f32> = Vec::with_capacity(2 * half + 1);

    (0..pitches.len())
        .map(|i| {
            let (lo, hi) = window_bounds(i, half, pitches.len());
            scratch.clear();
            scratch.extend(pitches[lo..hi].iter().flatten());
            median(&mut scratch)
        })
        .collect()
}

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) * 0.5)
    } else {
        Some(values[mid])
    }
}

fn weighted_average(values: &[Option<f32>], half: usize) -> Vec<Option<f32>> {
    let falloff = (half + 1) as f64;

    values
        .iter()
        .enumerate()
        .map(|(i, &center)| {
            let center = center?;
            let (lo, hi) = window_bounds(i, half, values.len());

            // Accumulate in f64 so a flat curve comes back unchanged
            let mut sum = 0.0f64;
            let mut weight_sum = 0.0f64;
            for (j, value) in values.iter().enumerate().take(hi).skip(lo) {
                if let Some(v) = value {
                    let weight = 1.0 - i.abs_diff(j) as f64 / falloff;
                    sum += *v as f64 * weight;
                    weight_sum += weight;
                }
            }

            if weight_sum > 0.0 {
                Some((sum / weight_sum) as f32)
            } else {
                Some(center)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_single_gap() {
        let mut pitches = vec![Some(220.0f32); 21];
        pitches[10] = None;
        let smoothed = smooth(&pitches, 25);
        assert_eq!(smoothed.len(), pitches.len());
        for value in &smoothed {
            assert!((value.unwrap() - 220.0).abs() < 1e-3);
        }
    }

    #[test]
    fn preserves_length_and_all_absent() {
        let pitches = vec![None; 40];
        let smoothed = smooth(&pitches, 25);
        assert_eq!(smoothed.len(), 40);
        assert!(smoothed.iter().all(|p| p.is_none()));
    }

    #[test]
    fn long_gaps_stay_absent() {
        let mut pitches = vec![None; 30];
        pitches[0] = Some(200.0);
        pitches[1] = Some(200.0);
        let smoothed = smooth(&pitches, 5);
        assert_eq!(smoothed[0], Some(200.0));
        assert!(smoothed[10..].iter().all(|p| p.is_none()));
    }

    #[test]
    fn flat_curve_is_unchanged() {
        let mut pitches = vec![Some(200.0f32); 12];
        pitches.extend([None, None]);
        pitches.extend(vec![Some(187.5f32); 12]);
        let smoothed = smooth(&pitches, 5);
        assert_eq!(smoothed[0], Some(200.0));
        assert_eq!(smoothed[4], Some(200.0));
        assert_eq!(smoothed[25], Some(187.5));
    }

    #[test]
    fn median_rejects_spike() {
        let mut pitches = vec![Some(150.0f32); 15];
        pitches[7] = Some(600.0);
        let smoothed = smooth(&pitches, 5);
        assert!((smoothed[7].unwrap() - 150.0).abs() < 1e-3);
    }

    #[test]
    fn even_median_is_mean_of_middle() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut values), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn triangular_weights_favour_center() {
        // half = 1: neighbours weigh 0.5, the center 1.0
        let values = vec![Some(100.0), Some(200.0), Some(100.0)];
        let averaged = weighted_average(&values, 1);
        assert!((averaged[1].unwrap() - 150.0).abs() < 1e-3);
        // edge: (100 * 1.0 + 200 * 0.5) / 1.5
        assert!((averaged[0].unwrap() - 133.333).abs() < 1e-2);
    }

    #[test]
    fn tiny_windows_pass_through() {
        let pitches = vec![Some(1.0), None, Some(3.0)];
        assert_eq!(smooth(&pitches, 1), pitches);
        assert_eq!(smooth(&pitches, 0), pitches);
    }
}
