//! Shape statistics measured directly from grid samples around a peak.
use num_traits::{Float, FromPrimitive};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::MAX_NDIM;
use crate::grid::Grid;
use crate::peak::ExtremumKind;

/// Which way to walk along an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Forward, Direction::Backward];

    #[inline]
    pub fn step(&self) -> isize {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }
}

/// Walk from `point` along `axis` in `direction`, visiting each sample until `visit`
/// returns `Some`, or the edge of the grid is reached.
///
/// `visit` receives the coordinate along `axis` and the value there.
pub(crate) fn walk_axis<T, F: FnMut(usize, f32) -> Option<T>>(
    grid: &Grid,
    point: &[usize],
    axis: usize,
    direction: Direction,
    mut visit: F,
) -> Option<T> {
    let ndim = grid.ndim();
    let extent = grid.points()[axis] as isize;
    let step = direction.step();
    let mut q = [0usize; MAX_NDIM];
    q[..ndim].copy_from_slice(&point[..ndim]);

    let mut i = point[axis] as isize + step;
    while i >= 0 && i < extent {
        q[axis] = i as usize;
        let v = grid.value_at(&q[..ndim]);
        if let Some(result) = visit(i as usize, v) {
            return Some(result);
        }
        i += step;
    }
    None
}

/// Find the fractional coordinate along `axis` at which the signal first crosses half of
/// `value`, walking away from `point` in `direction`.
///
/// The crossing is linearly interpolated between the first sample past half height and the
/// sample before it. When the signal never crosses, the edge of the grid is returned.
pub fn half_max_position(
    grid: &Grid,
    kind: ExtremumKind,
    value: f32,
    point: &[usize],
    axis: usize,
    direction: Direction,
) -> f32 {
    let half = 0.5 * value;
    let step = direction.step() as f32;
    let mut prev = value;
    let crossing = walk_axis(grid, point, axis, direction, |i, v| {
        if kind.exceeds(half, v) {
            Some(i as f32 - step * (half - v) / (prev - v))
        } else {
            prev = v;
            None
        }
    });
    crossing.unwrap_or_else(|| match direction {
        Direction::Forward => (grid.points()[axis] - 1) as f32,
        Direction::Backward => 0.0,
    })
}

/// The full width at half maximum of the peak at `point` along `axis`, in grid points
pub fn half_max_linewidth(
    grid: &Grid,
    kind: ExtremumKind,
    value: f32,
    point: &[usize],
    axis: usize,
) -> f32 {
    let upper = half_max_position(grid, kind, value, point, axis, Direction::Forward);
    let lower = half_max_position(grid, kind, value, point, axis, Direction::Backward);
    upper - lower
}

/// The result of fitting a parabola through three evenly spaced samples
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParabolaFit<F> {
    /// The vertex position relative to the middle sample
    pub offset: F,
    /// The value of the parabola at its vertex
    pub height: F,
    /// Twice the distance from the vertex to where the parabola reaches half its height
    pub linewidth: F,
    /// Whether the samples had enough curvature to locate a vertex
    pub success: bool,
}

/// Fit `y = a x^2 + b x + c` through `(-1, vm)`, `(0, v)` and `(1, vp)`.
///
/// When the curvature `|a|` is at most `1e-6` the samples are treated as flat and the
/// fit fails with a zero offset, the middle sample as the height and a zero width.
pub fn fit_parabola<F: Float + FromPrimitive>(vm: F, v: F, vp: F) -> ParabolaFit<F> {
    let half = F::from_f64(0.5).unwrap();
    let two = F::from_f64(2.0).unwrap();
    let four = F::from_f64(4.0).unwrap();

    let c = v;
    let a = half * (vm + vp - two * v);
    if a.abs() <= F::from_f64(1e-6).unwrap() {
        return ParabolaFit {
            offset: F::zero(),
            height: v,
            linewidth: F::zero(),
            success: false,
        };
    }
    let b = vp - half * (vp + vm);

    let x = -b / (two * a);
    let height = a * x * x + b * x + c;
    let discriminant = b * b - four * a * (c - half * height);
    let linewidth = if discriminant >= F::zero() {
        let half_x = (discriminant.sqrt() - b) / (two * a);
        two * (x - half_x).abs()
    } else {
        F::zero()
    };
    ParabolaFit {
        offset: x,
        height,
        linewidth,
        success: true,
    }
}

/// A cheaper centre estimate from three samples which only reports the vertex offset,
/// clamped to just under half a grid step and signed by whether `v` is a positive or
/// a negative peak.
pub fn parabolic_offset<F: Float + FromPrimitive>(vm: F, v: F, vp: F) -> F {
    let half = F::from_f64(0.5).unwrap();
    let d = half * (v + v - vm - vp).abs();
    if d <= F::from_f64(1e-4).unwrap() {
        return F::zero();
    }
    let c = (F::from_f64(0.25).unwrap() * (vp - vm).abs() / d).min(F::from_f64(0.49999).unwrap());
    let is_positive = v > F::zero();
    if (is_positive && vp < vm) || (!is_positive && vp > vm) {
        -c
    } else {
        c
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    fn gaussian_1d(n: usize, height: f32, center: f32, fwhm: f32) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let dx = i as f32 - center;
                height * (-4.0 * std::f32::consts::LN_2 * dx * dx / (fwhm * fwhm)).exp()
            })
            .collect()
    }

    #[test]
    fn test_half_max_triangle() {
        let data = [0.0f32, 2.0, 4.0, 6.0, 8.0, 6.0, 4.0, 2.0, 0.0];
        let grid = Grid::from_points(&[9], &data[..]).unwrap();
        // half height is 4.0, crossed just beyond index 2 and index 6
        let upper = half_max_position(&grid, ExtremumKind::Maximum, 8.0, &[4], 0, Direction::Forward);
        let lower = half_max_position(&grid, ExtremumKind::Maximum, 8.0, &[4], 0, Direction::Backward);
        assert_is_close!(upper, 6.0, 1e-6, "upper");
        assert_is_close!(lower, 2.0, 1e-6, "lower");
        assert_is_close!(
            half_max_linewidth(&grid, ExtremumKind::Maximum, 8.0, &[4], 0),
            4.0,
            1e-6,
            "linewidth"
        );
    }

    #[test]
    fn test_half_max_interpolates() {
        let data = [0.0f32, 1.0, 10.0, 3.0, 0.0];
        let grid = Grid::from_points(&[5], &data[..]).unwrap();
        // forward: 3.0 < 5.0, crossing at 3 - (5 - 3) / (10 - 3)
        let upper = half_max_position(&grid, ExtremumKind::Maximum, 10.0, &[2], 0, Direction::Forward);
        assert_is_close!(upper, 3.0 - 2.0 / 7.0, 1e-6, "upper");
        // backward: 1.0 < 5.0, crossing at 1 + (5 - 1) / (10 - 1)
        let lower = half_max_position(&grid, ExtremumKind::Maximum, 10.0, &[2], 0, Direction::Backward);
        assert_is_close!(lower, 1.0 + 4.0 / 9.0, 1e-6, "lower");
    }

    #[test]
    fn test_half_max_minimum() {
        let data = [0.0f32, -2.0, -8.0, -2.0, 0.0];
        let grid = Grid::from_points(&[5], &data[..]).unwrap();
        let width = half_max_linewidth(&grid, ExtremumKind::Minimum, -8.0, &[2], 0);
        // -2.0 > -4.0 one step either side, crossing at 2 +- 2/3
        assert_is_close!(width, 4.0 / 3.0, 1e-6, "width");
    }

    #[test]
    fn test_half_max_clamps_to_edge() {
        let data = [9.0f32, 10.0, 9.0, 8.0];
        let grid = Grid::from_points(&[4], &data[..]).unwrap();
        let upper = half_max_position(&grid, ExtremumKind::Maximum, 10.0, &[1], 0, Direction::Forward);
        let lower = half_max_position(&grid, ExtremumKind::Maximum, 10.0, &[1], 0, Direction::Backward);
        assert_eq!(upper, 3.0);
        assert_eq!(lower, 0.0);
    }

    #[test]
    fn test_half_max_gaussian_2d_axis() {
        // two rows of the same profile, measure along point axis 0
        let row = gaussian_1d(21, 10.0, 10.0, 4.0);
        let mut data = row.clone();
        data.extend(row);
        let grid = Grid::from_points(&[21, 2], data).unwrap();
        let width = half_max_linewidth(&grid, ExtremumKind::Maximum, 10.0, &[10, 1], 0);
        assert_is_close!(width, 4.0, 0.15, "width");
    }

    #[test]
    fn test_parabola_symmetric() {
        let fit = fit_parabola(1.0f64, 4.0, 1.0);
        assert!(fit.success);
        assert_eq!(fit.offset, 0.0);
        assert_eq!(fit.height, 4.0);
        // y = -3x^2 + 4 reaches 2 at x = sqrt(2/3)
        assert_is_close!(fit.linewidth, 2.0 * (2.0f64 / 3.0).sqrt(), 1e-9, "linewidth");
    }

    #[test]
    fn test_parabola_flat() {
        let fit = fit_parabola(2.0f64, 2.0, 2.0);
        assert!(!fit.success);
        assert_eq!(fit.offset, 0.0);
        assert_eq!(fit.height, 2.0);
        assert_eq!(fit.linewidth, 0.0);
    }

    #[rstest]
    #[case(0.3)]
    #[case(-0.2)]
    #[case(0.45)]
    fn test_parabola_recovers_vertex(#[case] x0: f64) {
        let f = |x: f64| 5.0 - 2.0 * (x - x0).powi(2);
        let fit = fit_parabola(f(-1.0), f(0.0), f(1.0));
        assert!(fit.success);
        assert_is_close!(fit.offset, x0, 1e-9, "offset");
        assert_is_close!(fit.height, 5.0, 1e-9, "height");
    }

    #[test]
    fn test_parabolic_offset() {
        assert_eq!(parabolic_offset(1.0f32, 4.0, 1.0), 0.0);
        assert_eq!(parabolic_offset(2.0f32, 2.0, 2.0), 0.0);
        assert!(parabolic_offset(1.0f32, 4.0, 2.0) > 0.0);
        assert!(parabolic_offset(2.0f32, 4.0, 1.0) < 0.0);
        assert!(parabolic_offset(-1.0f32, -4.0, -2.0) > 0.0);
        assert!(parabolic_offset(0.0f32, 1.0, 1.0) <= 0.49999);
    }
}
