//! Otsu thresholding of sparse intensity samples.
//!
//! Marker decoding samples a handful of cells or line pixels and needs a
//! dark/light split for exactly those values, not for the whole frame.

/// Otsu threshold over `samples`.
///
/// Values `> t` are light. Degenerate inputs fall back to the midpoint of
/// the observed range (or `127` for an empty slice).
pub fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    let (Some(&min_v), Some(&max_v)) = (samples.iter().min(), samples.iter().max()) else {
        return 127;
    };
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

/// Split samples into light (`true`) and dark (`false`) with a shared
/// Otsu threshold.
pub fn binarize_samples(samples: &[u8]) -> Vec<bool> {
    let t = otsu_threshold_from_samples(samples);
    samples.iter().map(|&v| v > t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bimodal_samples_split_between_modes() {
        let mut samples = vec![20u8; 30];
        samples.extend([22, 25, 18, 230, 228, 235]);
        samples.extend(vec![240u8; 20]);
        let t = otsu_threshold_from_samples(&samples);
        assert!((25..228).contains(&t), "threshold {t}");
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(otsu_threshold_from_samples(&[]), 127);
        assert_eq!(otsu_threshold_from_samples(&[40, 40]), 40);
        assert_eq!(otsu_threshold_from_samples(&[0, 200, 0]), 100);
        assert_eq!(binarize_samples(&[0, 200, 0]), vec![false, true, false]);
    }
}
