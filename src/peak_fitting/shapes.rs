use std::f64::consts::LN_2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{cumulative_into, index_to_point, MAX_NDIM};
use crate::grid::FitRegion;

use super::solver::ModelFunction;

/// The value a [`MultiPeakModel`] reports at every sample once a peak has wandered out of
/// its fitting region.
pub const OUT_OF_REGION_PENALTY: f64 = 1e20;

const FOUR_LN2: f64 = 4.0 * LN_2;
const EIGHT_LN2: f64 = 8.0 * LN_2;

/// The shape of a single separable N-dimensional peak.
///
/// Each peak is parameterized by a height `h`, a position `p` and a full width at
/// half maximum `lw` per axis, packed as `[h, p.., lw..]`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PeakModel {
    /// ```math
    /// y = h\prod_i \exp\left(\frac{-4\ln 2\,(x_i - p_i)^2}{lw_i^2}\right)
    /// ```
    #[default]
    Gaussian,
    /// ```math
    /// y = h\prod_i \frac{lw_i^2}{lw_i^2 + 4(x_i - p_i)^2}
    /// ```
    Lorentzian,
}

impl PeakModel {
    /// Evaluate one peak's parameter block at `sample`
    pub fn density(&self, sample: &[f64], params: &[f64]) -> f64 {
        self.evaluate(sample, params, None)
    }

    /// Evaluate one peak's parameter block at `sample`, writing the partial derivatives
    /// with respect to each parameter into `gradient` when it is given.
    pub fn evaluate(&self, sample: &[f64], params: &[f64], gradient: Option<&mut [f64]>) -> f64 {
        let ndim = sample.len();
        let height = params[0];
        let position = &params[1..1 + ndim];
        let linewidth = &params[1 + ndim..1 + 2 * ndim];

        let mut d_position = [0.0f64; MAX_NDIM];
        let mut d_linewidth = [0.0f64; MAX_NDIM];
        let mut shape = 1.0;

        for i in 0..ndim {
            let dx = sample[i] - position[i];
            let lw = linewidth[i];
            match self {
                Self::Gaussian => {
                    let lw2 = lw * lw;
                    shape *= (-FOUR_LN2 * dx * dx / lw2).exp();
                    d_position[i] = EIGHT_LN2 * dx / lw2;
                    d_linewidth[i] = EIGHT_LN2 * dx * dx / (lw2 * lw);
                }
                Self::Lorentzian => {
                    let d = lw * lw + 4.0 * dx * dx;
                    shape *= lw * lw / d;
                    d_position[i] = 8.0 * dx / d;
                    d_linewidth[i] = 8.0 * dx * dx / (lw * d);
                }
            }
        }

        let y = height * shape;
        if let Some(gradient) = gradient {
            gradient[0] = shape;
            for i in 0..ndim {
                gradient[1 + i] = y * d_position[i];
                gradient[1 + ndim + i] = y * d_linewidth[i];
            }
        }
        y
    }
}

/// The sum of several [`PeakModel`] peaks sampled over a [`FitRegion`].
///
/// Samples are numbered in the mixed-radix order of the region, axis `0` fastest, and
/// are evaluated at their coordinates in the parent grid.
#[derive(Debug, Clone)]
pub struct MultiPeakModel {
    pub model: PeakModel,
    ndim: usize,
    npeaks: usize,
    offset: [usize; MAX_NDIM],
    end: [usize; MAX_NDIM],
    cumulative: [usize; MAX_NDIM],
    total: usize,
}

impl MultiPeakModel {
    pub fn new(model: PeakModel, region: &FitRegion, npeaks: usize) -> Self {
        let ndim = region.ndim().min(MAX_NDIM);
        let mut offset = [0usize; MAX_NDIM];
        let mut end = [0usize; MAX_NDIM];
        offset[..ndim].copy_from_slice(&region.offset[..ndim]);
        end[..ndim].copy_from_slice(&region.end[..ndim]);
        let sizes = region.sizes();
        let mut cumulative = [0usize; MAX_NDIM];
        let total = cumulative_into(&sizes[..ndim], &mut cumulative[..ndim]);
        Self {
            model,
            ndim,
            npeaks,
            offset,
            end,
            cumulative,
            total,
        }
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn npeaks(&self) -> usize {
        self.npeaks
    }

    /// The number of parameters in one peak's block
    pub fn parameters_per_peak(&self) -> usize {
        1 + 2 * self.ndim
    }

    /// The parent grid coordinates of the `index`-th sample of the region
    pub fn sample_point(&self, index: usize) -> [f64; MAX_NDIM] {
        let mut point = [0usize; MAX_NDIM];
        index_to_point(index, &self.cumulative[..self.ndim], &mut point[..self.ndim]);
        let mut sample = [0.0f64; MAX_NDIM];
        for i in 0..self.ndim {
            sample[i] = (point[i] + self.offset[i]) as f64;
        }
        sample
    }

    /// Whether every peak position in `params` lies within `[offset, end)`
    pub fn positions_in_region(&self, params: &[f64]) -> bool {
        let ndim = self.ndim;
        params
            .chunks_exact(self.parameters_per_peak())
            .all(|block| {
                block[1..1 + ndim]
                    .iter()
                    .enumerate()
                    .all(|(i, p)| *p >= self.offset[i] as f64 && *p < self.end[i] as f64)
            })
    }

    /// Evaluate the sum of all peaks at an arbitrary coordinate
    pub fn evaluate_at(&self, sample: &[f64], params: &[f64]) -> f64 {
        params
            .chunks_exact(self.parameters_per_peak())
            .map(|block| self.model.density(sample, block))
            .sum()
    }
}

impl ModelFunction for MultiPeakModel {
    fn parameter_count(&self) -> usize {
        self.npeaks * self.parameters_per_peak()
    }

    fn sample_count(&self) -> usize {
        self.total
    }

    fn evaluate(&self, sample: usize, params: &[f64], gradient: Option<&mut [f64]>) -> f64 {
        let point = self.sample_point(sample);
        let x = &point[..self.ndim];

        if !self.positions_in_region(params) {
            if let Some(gradient) = gradient {
                gradient.fill(0.0);
            }
            return OUT_OF_REGION_PENALTY;
        }

        let width = self.parameters_per_peak();
        match gradient {
            Some(gradient) => params
                .chunks_exact(width)
                .zip(gradient.chunks_exact_mut(width))
                .map(|(block, grad)| self.model.evaluate(x, block, Some(grad)))
                .sum(),
            None => params
                .chunks_exact(width)
                .map(|block| self.model.density(x, block))
                .sum(),
        }
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

    #[rstest]
    #[case(PeakModel::Gaussian)]
    #[case(PeakModel::Lorentzian)]
    fn test_half_height_at_half_width(#[case] model: PeakModel) {
        let params = [8.0, 3.0, 2.0];
        assert_is_close!(model.density(&[3.0], &params), 8.0, 1e-12, "apex");
        assert_is_close!(model.density(&[4.0], &params), 4.0, 1e-12, "half width");
        assert_is_close!(model.density(&[2.0], &params), 4.0, 1e-12, "half width");
    }

    #[rstest]
    #[case(PeakModel::Gaussian)]
    #[case(PeakModel::Lorentzian)]
    fn test_gradient_matches_finite_difference(#[case] model: PeakModel) {
        let params = [5.0, 2.2, 4.7, 1.8, 2.5];
        let sample = [3.0, 4.0];
        let mut gradient = [0.0; 5];
        model.evaluate(&sample, &params, Some(&mut gradient[..]));
        let h = 1e-6;
        for k in 0..params.len() {
            let mut up = params;
            let mut down = params;
            up[k] += h;
            down[k] -= h;
            let numeric = (model.density(&sample, &up) - model.density(&sample, &down)) / (2.0 * h);
            assert_is_close!(gradient[k], numeric, 1e-6, "partial");
        }
    }

    #[test]
    fn test_zero_height_gradient() {
        let mut gradient = [0.0; 3];
        let y = PeakModel::Gaussian.evaluate(&[1.0], &[0.0, 1.0, 2.0], Some(&mut gradient[..]));
        assert_eq!(y, 0.0);
        assert_eq!(gradient[0], 1.0);
    }

    #[test]
    fn test_multi_peak_sum_and_samples() {
        let region = FitRegion::new(vec![2, 1], vec![5, 3]);
        let model = MultiPeakModel::new(PeakModel::Gaussian, &region, 2);
        assert_eq!(model.sample_count(), 6);
        assert_eq!(model.parameter_count(), 10);
        // sample 4 is (1, 1) within the region, (3, 2) in the grid
        let point = model.sample_point(4);
        assert_eq!(&point[..2], &[3.0, 2.0]);

        let params = [1.0, 3.0, 2.0, 2.0, 2.0, 2.0, 4.0, 1.0, 1.0, 1.0];
        let expected = PeakModel::Gaussian.density(&[3.0, 2.0], &params[..5])
            + PeakModel::Gaussian.density(&[3.0, 2.0], &params[5..]);
        let mut gradient = vec![0.0; 10];
        let y = model.evaluate(4, &params, Some(&mut gradient[..]));
        assert_is_close!(y, expected, 1e-12, "sum");
        assert_eq!(model.evaluate(4, &params, None), y);
    }

    #[test]
    fn test_out_of_region_penalty() {
        let region = FitRegion::new(vec![0], vec![6]);
        let model = MultiPeakModel::new(PeakModel::Lorentzian, &region, 2);
        // the second peak sits at the exclusive end of the region
        let params = [1.0, 2.0, 1.0, 1.0, 6.0, 1.0];
        let mut gradient = vec![1.0; 6];
        assert_eq!(
            model.evaluate(0, &params, Some(&mut gradient[..])),
            OUT_OF_REGION_PENALTY
        );
        assert!(gradient.iter().all(|g| *g == 0.0));
        assert!(!model.positions_in_region(&params));
        assert!(model.positions_in_region(&[1.0, 0.0, 1.0, 1.0, 5.9, 1.0]));
    }
}
