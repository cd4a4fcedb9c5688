use std::collections::TryReserveError;

use log::debug;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::MAX_NDIM;
use crate::grid::{FitRegion, Grid, GridError};
use crate::peak::{ExtremumKind, FittedPeak};
use crate::peak_statistics::half_max_linewidth;

use super::shapes::{MultiPeakModel, PeakModel};
use super::solver::{LevenbergMarquardt, NonlinearLeastSquares, SolverError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeakFitError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("Peak {index} has {actual} coordinates, the grid has {expected} dimensions")]
    PeakDimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("No peaks were given to fit")]
    NoPeaks,
    #[error("Peak {index} at {position:?} lies outside the fitting region")]
    PeakOutsideRegion { index: usize, position: Vec<f64> },
    #[error("An error occurred while fitting peaks: {0}")]
    Solver(#[from] SolverError),
    #[error("Failed to allocate memory for the fitting region: {0}")]
    Allocation(#[from] TryReserveError),
}

/// The outcome of fitting several peaks jointly over one region
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultiPeakFit {
    pub model: PeakModel,
    /// The refined peaks, in the order their approximate positions were given
    pub peaks: Vec<FittedPeak>,
    /// The estimated standard deviation of every parameter of the matching peak
    pub deviations: Vec<FittedPeak>,
    /// The sum of squared residuals over the region
    pub chi_square: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl MultiPeakFit {
    /// Evaluate the sum of the fitted peaks at an arbitrary grid coordinate
    pub fn predict(&self, point: &[f64]) -> f64 {
        let mut params = Vec::with_capacity(1 + 2 * point.len());
        self.peaks
            .iter()
            .map(|peak| {
                params.clear();
                peak.write_parameters(&mut params);
                self.model.density(point, &params)
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// Round an approximate position to the nearest grid point, clamped into the grid
pub(crate) fn nearest_grid_point(position: &[f64], points: &[usize]) -> [usize; MAX_NDIM] {
    let mut point = [0usize; MAX_NDIM];
    for (i, (p, n)) in position.iter().zip(points.iter()).enumerate() {
        let q = p.round().max(0.0) as usize;
        point[i] = q.min(n - 1);
    }
    point
}

/// Check every approximate position has one coordinate per axis and clamp it to its
/// nearest grid point
pub(crate) fn clamp_seeds(
    grid: &Grid,
    approx: &[Vec<f64>],
) -> Result<Vec<[usize; MAX_NDIM]>, PeakFitError> {
    let ndim = grid.ndim();
    let mut seeds = Vec::new();
    seeds.try_reserve_exact(approx.len())?;
    for (index, position) in approx.iter().enumerate() {
        if position.len() != ndim {
            return Err(PeakFitError::PeakDimensionMismatch {
                index,
                expected: ndim,
                actual: position.len(),
            });
        }
        seeds.push(nearest_grid_point(position, grid.points()));
    }
    Ok(seeds)
}

/// Resolve every approximate position to a grid point, requiring it to lie within `region`
pub(crate) fn resolve_seeds(
    grid: &Grid,
    region: &FitRegion,
    approx: &[Vec<f64>],
) -> Result<Vec<[usize; MAX_NDIM]>, PeakFitError> {
    let ndim = grid.ndim();
    region.validate(grid.points())?;
    let seeds = clamp_seeds(grid, approx)?;
    if let Some(index) = seeds
        .iter()
        .position(|point| !region.contains_point(&point[..ndim]))
    {
        return Err(PeakFitError::PeakOutsideRegion {
            index,
            position: approx[index].clone(),
        });
    }
    Ok(seeds)
}

/// Build a starting estimate for a peak at grid point `point` from the grid alone
pub fn initial_estimate(grid: &Grid, point: &[usize]) -> FittedPeak {
    let height = grid.value_at(point);
    let kind = ExtremumKind::from_sign(height);
    let linewidth = (0..grid.ndim())
        .map(|axis| half_max_linewidth(grid, kind, height, point, axis) as f64)
        .collect();
    FittedPeak::new(
        height as f64,
        point.iter().map(|p| *p as f64).collect(),
        linewidth,
    )
}

/// Fit several peaks of one [`PeakModel`] shape jointly, using a [`NonlinearLeastSquares`]
/// solver.
#[derive(Debug, Default, Clone)]
pub struct PeakFitter<S: NonlinearLeastSquares = LevenbergMarquardt> {
    pub solver: S,
}

impl<S: NonlinearLeastSquares> PeakFitter<S> {
    pub fn new(solver: S) -> Self {
        Self { solver }
    }

    /// Fit one peak for every approximate position in `approx` to the values of `grid`
    /// within `region`.
    ///
    /// Each peak starts from the nearest grid point, the value there and its half-height
    /// linewidth along each axis. Peaks are not permitted to leave `region` while fitting.
    pub fn fit_peaks(
        &self,
        grid: &Grid,
        region: &FitRegion,
        approx: &[Vec<f64>],
        model: PeakModel,
    ) -> Result<MultiPeakFit, PeakFitError> {
        let ndim = grid.ndim();
        let seeds = resolve_seeds(grid, region, approx)?;
        if seeds.is_empty() {
            return Err(PeakFitError::NoPeaks);
        }

        let mut observed = Vec::new();
        observed.try_reserve_exact(region.len())?;
        observed.extend(
            region
                .iter_points()
                .map(|p| grid.value_at(&p[..ndim]) as f64),
        );

        let per_peak = 1 + 2 * ndim;
        let mut params = Vec::new();
        params.try_reserve_exact(seeds.len() * per_peak)?;
        for seed in seeds.iter() {
            initial_estimate(grid, &seed[..ndim]).write_parameters(&mut params);
        }

        let shape = MultiPeakModel::new(model, region, seeds.len());
        let outcome = self.solver.minimize(&shape, &observed, &mut params)?;

        debug!(
            "Fit {} {:?} peaks over {} samples: chi2 = {:0.4e}, {} iterations, converged = {}",
            seeds.len(),
            model,
            observed.len(),
            outcome.chi_square,
            outcome.iterations,
            outcome.converged
        );

        let peaks = params
            .chunks_exact(per_peak)
            .map(|block| FittedPeak::from_parameters(block, ndim))
            .collect();
        let deviations = outcome
            .deviations
            .chunks_exact(per_peak)
            .map(|block| FittedPeak::from_parameters(block, ndim))
            .collect();

        Ok(MultiPeakFit {
            model,
            peaks,
            deviations,
            chi_square: outcome.chi_square,
            iterations: outcome.iterations,
            converged: outcome.converged,
        })
    }
}

/// Fit peaks jointly with the default [`LevenbergMarquardt`] solver.
///
/// See [`PeakFitter::fit_peaks`]
pub fn fit_peaks(
    grid: &Grid,
    region: &FitRegion,
    approx: &[Vec<f64>],
    model: PeakModel,
) -> Result<MultiPeakFit, PeakFitError> {
    PeakFitter::<LevenbergMarquardt>::default().fit_peaks(grid, region, approx, model)
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

    fn render(points: &[usize], model: PeakModel, peaks: &[FittedPeak]) -> Grid<'static> {
        let region = FitRegion::new(vec![0; points.len()], points.to_vec());
        let mut params = Vec::new();
        for peak in peaks {
            peak.write_parameters(&mut params);
        }
        let data: Vec<f32> = region
            .iter_points()
            .map(|p| {
                let x: Vec<f64> = p[..points.len()].iter().map(|v| *v as f64).collect();
                params
                    .chunks_exact(1 + 2 * points.len())
                    .map(|block| model.density(&x, block))
                    .sum::<f64>() as f32
            })
            .collect();
        Grid::from_points(points, data).unwrap()
    }

    #[rstest]
    #[case(PeakModel::Gaussian, 3.0)]
    #[case(PeakModel::Gaussian, 3.4)]
    #[case(PeakModel::Lorentzian, 3.0)]
    #[case(PeakModel::Lorentzian, 2.7)]
    fn test_single_peak_recovery(#[case] model: PeakModel, #[case] center: f64) {
        let truth = FittedPeak::new(10.0, vec![center], vec![2.0]);
        let grid = render(&[10], model, &[truth]);
        let region = FitRegion::whole(&grid);
        let fit = fit_peaks(&grid, &region, &[vec![center]], model).unwrap();
        assert_eq!(fit.len(), 1);
        let peak = &fit.peaks[0];
        assert_is_close!(peak.height, 10.0, 1e-3, "height");
        assert_is_close!(peak.position[0], center, 1e-3, "position");
        assert_is_close!(peak.linewidth[0], 2.0, 1e-3, "linewidth");
        assert!(fit.chi_square < 1e-6);
        assert!(fit.deviations[0].height.is_finite());
    }

    #[test]
    fn test_negative_peak() {
        let truth = FittedPeak::new(-6.0, vec![7.2], vec![3.0]);
        let grid = render(&[16], PeakModel::Gaussian, &[truth]);
        let region = FitRegion::new(vec![2], vec![13]);
        let fit = fit_peaks(&grid, &region, &[vec![7.0]], PeakModel::Gaussian).unwrap();
        let peak = &fit.peaks[0];
        assert_is_close!(peak.height, -6.0, 1e-3, "height");
        assert_is_close!(peak.position[0], 7.2, 1e-3, "position");
        assert_is_close!(peak.linewidth[0], 3.0, 1e-3, "linewidth");
    }

    #[test_log::test]
    fn test_two_peaks_2d() {
        let truth = [
            FittedPeak::new(10.0, vec![5.0, 6.0], vec![2.5, 3.0]),
            FittedPeak::new(6.0, vec![12.3, 8.7], vec![2.0, 2.5]),
        ];
        let grid = render(&[20, 16], PeakModel::Gaussian, &truth);
        let region = FitRegion::new(vec![1, 1], vec![18, 14]);
        let approx = vec![vec![5.0, 6.0], vec![12.0, 9.0]];
        let fit = fit_peaks(&grid, &region, &approx, PeakModel::Gaussian).unwrap();
        assert_eq!(fit.len(), 2);
        for (found, expected) in fit.peaks.iter().zip(truth.iter()) {
            assert_is_close!(found.height, expected.height, 1e-2, "height");
            for i in 0..2 {
                assert_is_close!(found.position[i], expected.position[i], 1e-2, "position");
                assert_is_close!(found.linewidth[i], expected.linewidth[i], 1e-2, "linewidth");
            }
        }
        assert_is_close!(
            fit.predict(&[5.0, 6.0]),
            grid.value_at(&[5, 6]) as f64,
            1e-2,
            "prediction"
        );
        assert_eq!(fit.deviations.len(), 2);
        assert_eq!(fit.deviations[1].ndim(), 2);
    }

    #[test]
    fn test_initial_estimate() {
        let truth = FittedPeak::new(8.0, vec![4.0], vec![2.0]);
        let grid = render(&[9], PeakModel::Lorentzian, &[truth]);
        let estimate = initial_estimate(&grid, &[4]);
        assert_eq!(estimate.height, 8.0);
        assert_eq!(estimate.position, vec![4.0]);
        assert_is_close!(estimate.linewidth[0], 2.0, 1e-3, "linewidth");
    }

    #[test]
    fn test_seed_outside_region() {
        let grid = render(&[12], PeakModel::Gaussian, &[FittedPeak::new(1.0, vec![8.0], vec![2.0])]);
        let region = FitRegion::new(vec![0], vec![5]);
        let err = fit_peaks(&grid, &region, &[vec![8.0]], PeakModel::Gaussian).unwrap_err();
        assert_eq!(
            err,
            PeakFitError::PeakOutsideRegion {
                index: 0,
                position: vec![8.0]
            }
        );
    }

    #[rstest]
    #[case(vec![vec![1.0, 2.0]], PeakFitError::PeakDimensionMismatch { index: 0, expected: 1, actual: 2 })]
    #[case(vec![], PeakFitError::NoPeaks)]
    fn test_invalid_peaks(#[case] approx: Vec<Vec<f64>>, #[case] expected: PeakFitError) {
        let grid = render(&[12], PeakModel::Gaussian, &[FittedPeak::new(1.0, vec![6.0], vec![2.0])]);
        let region = FitRegion::whole(&grid);
        let err = fit_peaks(&grid, &region, &approx, PeakModel::Gaussian).unwrap_err();
        assert_eq!(err, expected);
    }

    #[test]
    fn test_invalid_region() {
        let grid = render(&[12], PeakModel::Gaussian, &[FittedPeak::new(1.0, vec![6.0], vec![2.0])]);
        let region = FitRegion::new(vec![4], vec![13]);
        let err = fit_peaks(&grid, &region, &[vec![6.0]], PeakModel::Gaussian).unwrap_err();
        assert!(matches!(err, PeakFitError::Grid(GridError::InvalidRegion { .. })));
    }

    #[test]
    fn test_nearest_grid_point_clamps() {
        let point = nearest_grid_point(&[-2.3, 4.6, 99.0], &[5, 6, 7]);
        assert_eq!(&point[..3], &[0, 5, 6]);
    }
}
