#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::grid::{FitRegion, Grid};
use crate::peak::FittedPeak;
use crate::peak_statistics::{fit_parabola, ParabolaFit};

use super::fitter::{clamp_seeds, PeakFitError};

/// A peak estimated from parabolas fit independently along each axis through its
/// nearest grid point and that point's two neighbors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParabolicFit {
    pub peak: FittedPeak,
    /// The parabola fit along each axis, including the ones which failed
    pub axes: Vec<ParabolaFit<f64>>,
}

impl ParabolicFit {
    /// Whether at least one axis produced a usable parabola
    pub fn succeeded(&self) -> bool {
        self.axes.iter().any(|a| a.success)
    }
}

/// Fit a parabola along `axis` through `point`. A point on the first or last sample of
/// the axis has no neighbor on one side and fails outright.
pub fn fit_parabola_along_axis(grid: &Grid, point: &[usize], axis: usize) -> ParabolaFit<f64> {
    let v = grid.value_at(point) as f64;
    let i = point[axis];
    if i == 0 || i + 1 >= grid.points()[axis] {
        return ParabolaFit {
            offset: 0.0,
            height: v,
            linewidth: 0.0,
            success: false,
        };
    }
    let mut q = point.to_vec();
    q[axis] = i - 1;
    let vm = grid.value_at(&q) as f64;
    q[axis] = i + 1;
    let vp = grid.value_at(&q) as f64;
    fit_parabola(vm, v, vp)
}

/// Estimate the peak at grid point `point` from per-axis parabolas
pub fn parabolic_estimate(grid: &Grid, point: &[usize]) -> ParabolicFit {
    let axes: Vec<ParabolaFit<f64>> = (0..grid.ndim())
        .map(|axis| fit_parabola_along_axis(grid, point, axis))
        .collect();

    let height = axes
        .iter()
        .filter(|a| a.success)
        .map(|a| a.height)
        .reduce(|best, h| if h.abs() > best.abs() { h } else { best })
        .unwrap_or_else(|| grid.value_at(point) as f64);

    let position = point
        .iter()
        .zip(axes.iter())
        .map(|(p, a)| *p as f64 + a.offset)
        .collect();
    let linewidth = axes.iter().map(|a| a.linewidth).collect();

    ParabolicFit {
        peak: FittedPeak::new(height, position, linewidth),
        axes,
    }
}

/// Refine each approximate peak position in `approx` by fitting parabolas through the
/// nearest grid point along every axis.
///
/// `region` must be a valid region of `grid`, but the positions are not restricted to it:
/// each is clamped into the grid and refined from its own neighborhood.
pub fn fit_parabolic_peaks(
    grid: &Grid,
    region: &FitRegion,
    approx: &[Vec<f64>],
) -> Result<Vec<ParabolicFit>, PeakFitError> {
    let ndim = grid.ndim();
    region.validate(grid.points())?;
    let seeds = clamp_seeds(grid, approx)?;
    let mut fits = Vec::new();
    fits.try_reserve_exact(seeds.len())?;
    fits.extend(seeds.iter().map(|seed| parabolic_estimate(grid, &seed[..ndim])));
    Ok(fits)
}
