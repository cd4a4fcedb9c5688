//! Regions of a grid in which no peak may be reported.
//!
//! Coordinates are in point order and are compared as floats, so a box may
//! have fractional bounds.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned box with inclusive `[min, max]` bounds on every axis
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExclusionBox {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl ExclusionBox {
    pub fn new(min: Vec<f32>, max: Vec<f32>) -> Self {
        Self { min, max }
    }

    pub fn ndim(&self) -> usize {
        self.min.len()
    }

    /// Whether `point` falls within the bounds of every axis
    pub fn contains(&self, point: &[usize]) -> bool {
        point
            .iter()
            .zip(self.min.iter().zip(self.max.iter()))
            .all(|(p, (lo, hi))| {
                let p = *p as f32;
                p >= *lo && p <= *hi
            })
    }

    /// Express this box relative to a new `origin`
    pub fn translated(&self, origin: &[usize]) -> Self {
        let min = self
            .min
            .iter()
            .zip(origin.iter())
            .map(|(m, o)| m - *o as f32)
            .collect();
        let max = self
            .max
            .iter()
            .zip(origin.iter())
            .map(|(m, o)| m - *o as f32)
            .collect();
        Self::new(min, max)
    }
}

/// A band of half-width `d` around the line `a1 * x[dim1] - a2 * x[dim2] + b = 0`,
/// the region around the diagonal of a homonuclear spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiagonalExclusion {
    pub dim1: usize,
    pub dim2: usize,
    pub a1: f32,
    pub a2: f32,
    pub b: f32,
    pub d: f32,
}

impl DiagonalExclusion {
    pub fn new(dim1: usize, dim2: usize, a1: f32, a2: f32, b: f32, d: f32) -> Self {
        Self {
            dim1,
            dim2,
            a1,
            a2,
            b,
            d,
        }
    }

    /// The signed distance-like quantity `a1 * x[dim1] - a2 * x[dim2] + b`
    #[inline]
    pub fn delta(&self, point: &[usize]) -> f32 {
        self.a1 * point[self.dim1] as f32 - self.a2 * point[self.dim2] as f32 + self.b
    }

    pub fn contains(&self, point: &[usize]) -> bool {
        self.delta(point).abs() < self.d
    }

    /// Express this band relative to a new `origin`
    pub fn translated(&self, origin: &[usize]) -> Self {
        let b = self.b + self.a1 * origin[self.dim1] as f32 - self.a2 * origin[self.dim2] as f32;
        Self { b, ..*self }
    }
}

/// The full set of excluded regions for a peak search
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Exclusions {
    pub boxes: Vec<ExclusionBox>,
    pub diagonals: Vec<DiagonalExclusion>,
}

impl Exclusions {
    pub fn new(boxes: Vec<ExclusionBox>, diagonals: Vec<DiagonalExclusion>) -> Self {
        Self { boxes, diagonals }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty() && self.diagonals.is_empty()
    }

    /// Whether `point` lies in any diagonal band or any box
    pub fn excludes(&self, point: &[usize]) -> bool {
        self.diagonals.iter().any(|d| d.contains(point))
            || self.boxes.iter().any(|b| b.contains(point))
    }

    pub fn translated(&self, origin: &[usize]) -> Self {
        Self {
            boxes: self.boxes.iter().map(|b| b.translated(origin)).collect(),
            diagonals: self.diagonals.iter().map(|d| d.translated(origin)).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_box_inclusive() {
        let ex = ExclusionBox::new(vec![1.0, 2.0], vec![3.0, 2.0]);
        assert!(ex.contains(&[1, 2]));
        assert!(ex.contains(&[3, 2]));
        assert!(!ex.contains(&[4, 2]));
        assert!(!ex.contains(&[2, 3]));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(5, 5)]
    #[case(17, 17)]
    fn test_diagonal_on_line_excluded(#[case] x: usize, #[case] y: usize) {
        let diag = DiagonalExclusion::new(0, 1, 1.0, 1.0, 0.0, 0.5);
        assert_eq!(diag.delta(&[x, y]), 0.0);
        assert!(diag.contains(&[x, y]));
    }

    #[test]
    fn test_diagonal_band() {
        let diag = DiagonalExclusion::new(0, 1, 2.0, 1.0, -1.0, 1.5);
        // 2 * 3 - 5 - 1 = 0
        assert!(diag.contains(&[3, 5]));
        // 2 * 3 - 4 - 1 = 1
        assert!(diag.contains(&[3, 4]));
        // 2 * 3 - 3 - 1 = 2
        assert!(!diag.contains(&[3, 3]));
    }

    #[test]
    fn test_translation_preserves_membership() {
        let exclusions = Exclusions::new(
            vec![ExclusionBox::new(vec![4.0, 4.0], vec![6.0, 6.0])],
            vec![DiagonalExclusion::new(0, 1, 1.0, 1.0, 0.0, 0.5)],
        );
        let origin = [2, 3];
        let local = exclusions.translated(&origin);
        for x in 2..10 {
            for y in 3..10 {
                assert_eq!(
                    exclusions.excludes(&[x, y]),
                    local.excludes(&[x - origin[0], y - origin[1]]),
                    "{x} {y}"
                );
            }
        }
    }
}
