use crate::config::MIN_CORRELATION_OVERLAP;
use crate::types::TimeSeries;

/// Pearson correlation of two series over the periods they share.
///
/// None when fewer than `MIN_CORRELATION_OVERLAP` periods overlap or either
/// side is constant on the overlap.
pub fn pearson(a: &TimeSeries, b: &TimeSeries) -> Option<f64> {
    pearson_pairs(&a.overlap(b))
}

pub(crate) fn pearson_pairs(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < MIN_CORRELATION_OVERLAP {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}
