//! Presentation helpers for score values.

/// Min-max rescale a set of scores to 0-100.
///
/// Returns the input unchanged when every score is equal.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if scores.is_empty() || range == 0.0 {
        return scores.to_vec();
    }

    scores.iter().map(|s| (s - min) / range * 100.0).collect()
}

pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Round to a fixed number of decimals.
pub fn round_score(score: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (score * factor).round() / factor
}
