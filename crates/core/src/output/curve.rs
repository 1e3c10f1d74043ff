use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// One `(time, value)` pair of a [`Curve`], serialised as `[t, v]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey(pub f32, pub f32);

/// Piecewise-linear response curve sampled with a normalised timeline
/// fraction. Keys are kept sorted by time; sampling outside the first or last
/// key clamps to that key's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<CurveKey>", into = "Vec<CurveKey>")]
pub struct Curve {
    keys: Vec<CurveKey>,
}

impl Curve {
    pub fn new(keys: Vec<CurveKey>) -> Self {
        let mut keys = keys;
        keys.retain(|key| key.0.is_finite() && key.1.is_finite());
        keys.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        Self { keys }
    }

    /// Curve that evaluates to `value` everywhere.
    pub fn constant(value: f32) -> Self {
        Self::new(vec![CurveKey(0.0, value)])
    }

    /// Straight line from `(0, from)` to `(1, to)`.
    pub fn linear(from: f32, to: f32) -> Self {
        Self::new(vec![CurveKey(0.0, from), CurveKey(1.0, to)])
    }

    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Samples the curve, or `None` when it has no keys.
    pub fn evaluate(&self, t: f32) -> Option<f32> {
        let first = self.keys.first()?;
        let last = self.keys.last()?;

        if t <= first.0 {
            return Some(first.1);
        }
        if t >= last.0 {
            return Some(last.1);
        }

        let upper = self.keys.partition_point(|key| key.0 <= t);
        let a = self.keys[upper - 1];
        let b = self.keys[upper];
        let span = b.0 - a.0;
        if span <= f32::EPSILON {
            return Some(b.1);
        }

        let local = (t - a.0) / span;
        Some(a.1 + (b.1 - a.1) * local)
    }
}

impl From<Vec<CurveKey>> for Curve {
    fn from(keys: Vec<CurveKey>) -> Self {
        Self::new(keys)
    }
}

impl From<Curve> for Vec<CurveKey> {
    fn from(curve: Curve) -> Self {
        curve.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_between_keys() {
        let curve = Curve::new(vec![CurveKey(0.0, 0.0), CurveKey(0.5, 1.0), CurveKey(1.0, 0.0)]);

        assert!((curve.evaluate(0.25).unwrap() - 0.5).abs() < 1e-6);
        assert!((curve.evaluate(0.5).unwrap() - 1.0).abs() < 1e-6);
        assert!((curve.evaluate(0.75).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn clamps_outside_the_key_range_and_sorts_keys() {
        let curve = Curve::new(vec![CurveKey(0.8, 2.0), CurveKey(0.2, 1.0)]);

        assert_eq!(curve.evaluate(-1.0), Some(1.0));
        assert_eq!(curve.evaluate(5.0), Some(2.0));
        assert_eq!(curve.keys()[0], CurveKey(0.2, 1.0));
    }

    #[test]
    fn empty_curve_has_no_value() {
        assert_eq!(Curve::default().evaluate(0.5), None);
        assert_eq!(Curve::constant(0.7).evaluate(0.3), Some(0.7));
    }

    #[test]
    fn deserialises_from_pairs() {
        let curve: Curve = serde_json::from_str("[[1.0, 0.0], [0.0, 1.0]]").unwrap();

        assert_eq!(curve.keys().len(), 2);
        assert_eq!(curve.evaluate(0.0), Some(1.0));
        assert_eq!(curve.evaluate(0.5), Some(0.5));
    }
}
