//! Refine approximate peak positions into fitted peak shapes.
//!
//! Two methods are provided:
//! - [`fit_parabolic_peaks`] fits a parabola along each axis through the nearest grid point
//!   and its two neighbors. It is cheap and always produces an estimate.
//! - [`fit_peaks`] fits several [`PeakModel`] peaks jointly over a [`FitRegion`] by nonlinear
//!   least squares, reporting parameter deviations and the residual chi-square.
//!
//! A peak is described by its height, a fractional position and a full width at half maximum
//! along each axis, see [`FittedPeak`].
//!
//! The joint fitter delegates the minimization to a [`NonlinearLeastSquares`] implementation,
//! [`LevenbergMarquardt`] by default, which solves its normal equations with `nalgebra`
//! or, when one of the LAPACK features is enabled instead, with `ndarray-linalg`.
//!
//! # Example
//!
//! ```rust
//! use ndpeak::{FitRegion, Grid};
//! use ndpeak::peak_fitting::{fit_peaks, PeakModel};
//!
//! let data: Vec<f32> = (0..10)
//!     .map(|i| {
//!         let dx = i as f32 - 3.0;
//!         10.0 * (-4.0 * std::f32::consts::LN_2 * dx * dx / 4.0).exp()
//!     })
//!     .collect();
//! let grid = Grid::from_points(&[10], data).unwrap();
//! let region = FitRegion::whole(&grid);
//! let fit = fit_peaks(&grid, &region, &[vec![3.0]], PeakModel::Gaussian).unwrap();
//! assert!((fit.peaks[0].linewidth[0] - 2.0).abs() < 1e-3);
//! ```
//!
//! [`FitRegion`]: crate::FitRegion
//! [`FittedPeak`]: crate::FittedPeak
mod fitter;
mod parabolic;
mod shapes;
mod solver;

pub use fitter::{fit_peaks, initial_estimate, MultiPeakFit, PeakFitError, PeakFitter};
pub use parabolic::{fit_parabola_along_axis, fit_parabolic_peaks, parabolic_estimate, ParabolicFit};
pub use shapes::{MultiPeakModel, PeakModel, OUT_OF_REGION_PENALTY};
pub use solver::{
    LevenbergMarquardt, ModelFunction, NonlinearLeastSquares, SolverError, SolverOutcome,
};
