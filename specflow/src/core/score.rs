//! Score arithmetic for quality validators.

/// Round to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Arithmetic mean; an empty slice scores `1.0`.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Linear penalty: `max(0, 1 - per_item * count)`.
pub fn penalty(count: usize, per_item: f64) -> f64 {
    (1.0 - per_item * count as f64).max(0.0)
}

/// Binary credit for a satisfied condition.
pub fn credit(ok: bool) -> f64 {
    if ok { 1.0 } else { 0.0 }
}
