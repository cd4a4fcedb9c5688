//! A nonlinear least squares solver seam and a damped Gauss-Newton implementation of it.
use std::collections::TryReserveError;

use log::trace;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A model of the observed samples in terms of a flat parameter vector
pub trait ModelFunction {
    fn parameter_count(&self) -> usize;

    fn sample_count(&self) -> usize;

    /// Compute the model's value at `sample` given `params`. When `gradient` is given, it
    /// receives the partial derivative with respect to every parameter.
    fn evaluate(&self, sample: usize, params: &[f64], gradient: Option<&mut [f64]>) -> f64;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("Failed to allocate solver working memory: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("Cannot fit {parameters} parameters to {samples} samples")]
    EmptyProblem { samples: usize, parameters: usize },
    #[error("Expected {expected} observed values, received {actual}")]
    ObservationMismatch { expected: usize, actual: usize },
    #[error("The fit did not produce a finite result")]
    NonFinite,
}

/// Describe a nonlinear least squares run
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverOutcome {
    /// The sum of squared residuals at the final parameters
    pub chi_square: f64,
    /// The estimated standard deviation of each parameter
    pub deviations: Vec<f64>,
    /// The number of iterations run
    pub iterations: usize,
    /// Whether or not the solver converged within the allowed number of iterations
    pub converged: bool,
}

/// Minimize the summed squared difference between a [`ModelFunction`] and observed values.
pub trait NonlinearLeastSquares {
    /// Refine `params` in place, starting from their current values
    fn minimize<M: ModelFunction + ?Sized>(
        &self,
        model: &M,
        observed: &[f64],
        params: &mut [f64],
    ) -> Result<SolverOutcome, SolverError>;
}

/// The Levenberg-Marquardt algorithm, scaling the damping term by the diagonal
/// of the approximate Hessian.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LevenbergMarquardt {
    /// The maximum number of iterations to attempt
    pub max_iter: usize,
    /// The relative decrease in chi-square, or relative parameter step, below which the
    /// fit is considered converged
    pub tolerance: f64,
    /// The damping applied on the first iteration
    pub initial_lambda: f64,
    /// Damping above which no further progress is possible
    pub max_lambda: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tolerance: 1e-10,
            initial_lambda: 1e-3,
            max_lambda: 1e16,
        }
    }
}

const MIN_LAMBDA: f64 = 1e-15;
const MIN_DIAGONAL: f64 = 1e-12;

fn try_zeros(n: usize) -> Result<Vec<f64>, SolverError> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(n)?;
    buffer.resize(n, 0.0);
    Ok(buffer)
}

/// The normal equations `J^T J` and `J^T r` at one parameter vector
struct NormalEquations {
    nparams: usize,
    jtj: Vec<f64>,
    jtr: Vec<f64>,
    row: Vec<f64>,
}

impl NormalEquations {
    fn new(nparams: usize) -> Result<Self, SolverError> {
        Ok(Self {
            nparams,
            jtj: try_zeros(nparams * nparams)?,
            jtr: try_zeros(nparams)?,
            row: try_zeros(nparams)?,
        })
    }

    /// Rebuild the system at `params`, returning the chi-square there
    fn accumulate<M: ModelFunction + ?Sized>(
        &mut self,
        model: &M,
        observed: &[f64],
        params: &[f64],
    ) -> f64 {
        let n = self.nparams;
        self.jtj.fill(0.0);
        self.jtr.fill(0.0);
        let mut chi2 = 0.0;
        for (sample, y) in observed.iter().enumerate() {
            let y_fit = model.evaluate(sample, params, Some(self.row.as_mut_slice()));
            let r = y - y_fit;
            chi2 += r * r;
            for j in 0..n {
                let gj = self.row[j];
                if gj == 0.0 {
                    continue;
                }
                self.jtr[j] += gj * r;
                let jtj_row = &mut self.jtj[j * n..(j + 1) * n];
                for (k, gk) in self.row[..=j].iter().enumerate() {
                    jtj_row[k] += gj * gk;
                }
            }
        }
        // mirror the lower triangle
        for j in 0..n {
            for k in 0..j {
                self.jtj[k * n + j] = self.jtj[j * n + k];
            }
        }
        chi2
    }
}

fn chi_square<M: ModelFunction + ?Sized>(model: &M, observed: &[f64], params: &[f64]) -> f64 {
    observed
        .iter()
        .enumerate()
        .map(|(sample, y)| {
            let r = y - model.evaluate(sample, params, None);
            r * r
        })
        .sum()
}

// Can't inline cfg-if
cfg_if::cfg_if! {
    if #[cfg(feature = "nalgebra")] {
        use nalgebra::{DMatrix, DVector};

        /// Solve the dense row-major system `a x = b`
        fn solve_linear(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
            let system = DMatrix::from_row_slice(n, n, a);
            let rhs = DVector::from_column_slice(b);
            if let Some(decomp) = system.clone().cholesky() {
                return Some(decomp.solve(&rhs).as_slice().to_vec());
            }
            system.lu().solve(&rhs).map(|x| x.as_slice().to_vec())
        }

        /// The diagonal of the inverse of the dense row-major matrix `a`
        fn inverse_diagonal(a: &[f64], n: usize) -> Option<Vec<f64>> {
            let system = DMatrix::from_row_slice(n, n, a);
            system
                .try_inverse()
                .map(|inv| (0..n).map(|i| inv[(i, i)]).collect())
        }
    } else if #[cfg(feature = "ndarray-linalg")] {
        use ndarray::{Array1, Array2};
        use ndarray_linalg::{Inverse, Solve};

        /// Solve the dense row-major system `a x = b`
        fn solve_linear(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
            let system = Array2::from_shape_vec((n, n), a.to_vec()).ok()?;
            let rhs = Array1::from_vec(b.to_vec());
            system.solve_into(rhs).ok().map(|x| x.to_vec())
        }

        /// The diagonal of the inverse of the dense row-major matrix `a`
        fn inverse_diagonal(a: &[f64], n: usize) -> Option<Vec<f64>> {
            let system = Array2::from_shape_vec((n, n), a.to_vec()).ok()?;
            system.inv().ok().map(|inv| inv.diag().to_vec())
        }
    } else {
        compile_error!("Either the `nalgebra` feature or one of the LAPACK backend features must be enabled");
    }
}

impl LevenbergMarquardt {
    pub fn new(max_iter: usize, tolerance: f64, initial_lambda: f64) -> Self {
        Self {
            max_iter,
            tolerance,
            initial_lambda,
            ..Default::default()
        }
    }

    /// The maximum number of iterations to attempt
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// The relative decrease in chi-square below which the fit is considered converged
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn initial_lambda(mut self, initial_lambda: f64) -> Self {
        self.initial_lambda = initial_lambda;
        self
    }

    pub fn max_lambda(mut self, max_lambda: f64) -> Self {
        self.max_lambda = max_lambda;
        self
    }

    fn damped_step(&self, system: &NormalEquations, lambda: f64) -> Option<Vec<f64>> {
        let n = system.nparams;
        let mut damped = system.jtj.clone();
        for i in 0..n {
            let d = system.jtj[i * n + i].max(MIN_DIAGONAL);
            damped[i * n + i] += lambda * d;
        }
        solve_linear(&damped, &system.jtr, n).filter(|step| step.iter().all(|x| x.is_finite()))
    }

    fn is_small_step(&self, step: &[f64], params: &[f64]) -> bool {
        step.iter()
            .zip(params.iter())
            .all(|(d, x)| d.abs() <= self.tolerance * (x.abs() + self.tolerance))
    }
}

impl NonlinearLeastSquares for LevenbergMarquardt {
    fn minimize<M: ModelFunction + ?Sized>(
        &self,
        model: &M,
        observed: &[f64],
        params: &mut [f64],
    ) -> Result<SolverOutcome, SolverError> {
        let nparams = params.len();
        let nsamples = model.sample_count();
        if nsamples == 0 || nparams == 0 {
            return Err(SolverError::EmptyProblem {
                samples: nsamples,
                parameters: nparams,
            });
        }
        if observed.len() != nsamples {
            return Err(SolverError::ObservationMismatch {
                expected: nsamples,
                actual: observed.len(),
            });
        }

        let mut system = NormalEquations::new(nparams)?;
        let mut trial = try_zeros(nparams)?;

        let mut chi2 = system.accumulate(model, observed, params);
        if !chi2.is_finite() {
            return Err(SolverError::NonFinite);
        }

        let mut lambda = self.initial_lambda;
        let mut iterations = 0;
        let mut converged = false;

        for it in 0..self.max_iter {
            iterations = it + 1;
            if chi2 <= f64::MIN_POSITIVE {
                trace!("{it}: Exact fit");
                converged = true;
                break;
            }
            let step = match self.damped_step(&system, lambda) {
                Some(step) => step,
                None => {
                    lambda *= 10.0;
                    trace!("{it}: Singular system, lambda = {lambda:0.3e}");
                    if lambda > self.max_lambda {
                        converged = true;
                        break;
                    }
                    continue;
                }
            };

            for ((t, p), d) in trial.iter_mut().zip(params.iter()).zip(step.iter()) {
                *t = p + d;
            }
            let trial_chi2 = chi_square(model, observed, &trial);
            trace!("{it}: chi2 = {chi2:0.6e}, trial chi2 = {trial_chi2:0.6e}, lambda = {lambda:0.3e}");

            if trial_chi2.is_finite() && trial_chi2 < chi2 {
                let small_step = self.is_small_step(&step, params);
                let decrease = chi2 - trial_chi2;
                let previous = chi2;
                params.copy_from_slice(&trial);
                chi2 = system.accumulate(model, observed, params);
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                if decrease <= self.tolerance * previous || small_step {
                    trace!("{it}: Converged, decrease = {decrease:0.3e}");
                    converged = true;
                    break;
                }
            } else {
                lambda *= 10.0;
                if lambda > self.max_lambda {
                    trace!("{it}: No further improvement possible");
                    converged = true;
                    break;
                }
            }
        }

        if !chi2.is_finite() || params.iter().any(|p| !p.is_finite()) {
            return Err(SolverError::NonFinite);
        }

        let dof = nsamples.saturating_sub(nparams).max(1) as f64;
        let scale = chi2 / dof;
        let deviations = match inverse_diagonal(&system.jtj, nparams) {
            Some(diag) => diag.iter().map(|v| (v.abs() * scale).sqrt()).collect(),
            None => vec![f64::INFINITY; nparams],
        };

        Ok(SolverOutcome {
            chi_square: chi2,
            deviations,
            iterations,
            converged,
        })
    }
}
