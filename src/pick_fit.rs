//! Find new peaks in a region of a grid and refine their shapes in one pass.
//!
//! [`PickAndFit::run`] searches a region extended by the picker's buffer so that
//! peaks near its edges see their full neighborhood, keeps the peaks that fall
//! inside the requested region and are not already known, then estimates each
//! peak's shape with [`fit_parabolic_peaks`] and, if requested, refines it with a
//! Gaussian or Lorentzian fit.
use std::fmt;

use log::{debug, warn};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::grid::{FitRegion, Grid, GridError};
use crate::peak::{FittedPeak, Peak};
use crate::peak_fitting::{
    fit_parabolic_peaks, LevenbergMarquardt, ParabolicFit, PeakFitError, PeakFitter, PeakModel,
};
use crate::peak_picker::{PeakPicker, PeakPickerError};

/// How to estimate the shape of a newly picked peak
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitMethod {
    #[default]
    Parabolic,
    Gaussian,
    Lorentzian,
}

impl FitMethod {
    /// The peak shape model to refine with, if any
    pub fn peak_model(&self) -> Option<PeakModel> {
        match self {
            Self::Parabolic => None,
            Self::Gaussian => Some(PeakModel::Gaussian),
            Self::Lorentzian => Some(PeakModel::Lorentzian),
        }
    }
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parabolic => "parabolic",
            Self::Gaussian => "gaussian",
            Self::Lorentzian => "lorentzian",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PickAndFitError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Picker(#[from] PeakPickerError),
    #[error(transparent)]
    Fit(#[from] PeakFitError),
    #[error("Known peak {index} has {actual} coordinates, the grid has {expected} dimensions")]
    KnownPeakDimension {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// A newly found peak and its fitted shape, in the coordinates of the full grid
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PickedPeak {
    /// The grid point the peak was found at and the value there
    pub peak: Peak,
    pub fit: FittedPeak,
    /// Parameter deviations, only available from a Gaussian or Lorentzian fit
    pub deviations: Option<FittedPeak>,
    /// The method that produced `fit`, which is [`FitMethod::Parabolic`] when a
    /// model fit was requested but failed
    pub method: FitMethod,
}

impl fmt::Display for PickedPeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PickedPeak({}, {}, {})", self.peak, self.fit, self.method)
    }
}

/// Extent of the joint fitting region around each peak, `[p - 3, p + 4)`
const BOUNDING_BEFORE: usize = 3;
const BOUNDING_AFTER: usize = 4;
/// Extent of the fitting region when each peak is fit alone, `[p - 2, p + 3)`
const LOCAL_BEFORE: usize = 2;
const LOCAL_AFTER: usize = 3;

/// Peak picking followed by peak shape fitting
#[derive(Debug, Clone)]
pub struct PickAndFit {
    pub picker: PeakPicker,
    pub fit_method: FitMethod,
    /// Fit each peak alone over its own small region rather than all of them jointly
    pub singular: bool,
    pub solver: LevenbergMarquardt,
}

impl Default for PickAndFit {
    fn default() -> Self {
        Self::new(PeakPicker::default(), FitMethod::default())
    }
}

impl PickAndFit {
    pub fn new(picker: PeakPicker, fit_method: FitMethod) -> Self {
        Self {
            picker,
            fit_method,
            singular: true,
            solver: LevenbergMarquardt::default(),
        }
    }

    pub fn fit_method(mut self, fit_method: FitMethod) -> Self {
        self.fit_method = fit_method;
        self
    }

    pub fn singular(mut self, singular: bool) -> Self {
        self.singular = singular;
        self
    }

    pub fn solver(mut self, solver: LevenbergMarquardt) -> Self {
        self.solver = solver;
        self
    }

    fn buffer(&self, ndim: usize) -> Vec<usize> {
        if self.picker.buffer.is_empty() {
            vec![0; ndim]
        } else {
            self.picker.buffer.clone()
        }
    }

    /// Grow `region` by `buffer` on both sides of every axis, clamped to the grid
    fn extend_region(region: &FitRegion, buffer: &[usize], points: &[usize]) -> FitRegion {
        let offset = region
            .offset
            .iter()
            .zip(buffer.iter())
            .map(|(o, b)| o.saturating_sub(*b))
            .collect();
        let end = region
            .end
            .iter()
            .zip(buffer.iter())
            .zip(points.iter())
            .map(|((e, b), n)| (e + b).min(*n))
            .collect();
        FitRegion::new(offset, end)
    }

    fn is_known(point: &[usize], known: &[Vec<f64>], buffer: &[usize]) -> bool {
        known.iter().any(|position| {
            position
                .iter()
                .zip(point.iter())
                .zip(buffer.iter())
                .all(|((k, p), b)| (k - *p as f64).abs() <= *b as f64)
        })
    }

    #[cfg(feature = "parallelism")]
    fn find_peaks(picker: &PeakPicker, grid: &Grid) -> Result<Vec<Peak>, PeakPickerError> {
        picker.find_peaks_parallel(grid)
    }

    #[cfg(not(feature = "parallelism"))]
    fn find_peaks(picker: &PeakPicker, grid: &Grid) -> Result<Vec<Peak>, PeakPickerError> {
        picker.find_peaks(grid)
    }

    /// Refine the parabolic estimates with a model fit, falling back to the parabolic
    /// estimate for any peak whose fit fails.
    fn refine(
        &self,
        subgrid: &Grid,
        model: PeakModel,
        bounding: &FitRegion,
        peaks: &[Peak],
        parabolic: &[ParabolicFit],
    ) -> Vec<(FittedPeak, Option<FittedPeak>, FitMethod)> {
        let fitter = PeakFitter::new(self.solver);
        let fallback = |fit: &ParabolicFit| (fit.peak.clone(), None::<FittedPeak>, FitMethod::Parabolic);

        if self.singular {
            peaks
                .iter()
                .zip(parabolic.iter())
                .map(|(peak, estimate)| {
                    let local =
                        FitRegion::around(&peak.point, LOCAL_BEFORE, LOCAL_AFTER, subgrid.points());
                    let approx = [estimate.peak.position.clone()];
                    match fitter.fit_peaks(subgrid, &local, &approx, model) {
                        Ok(mut fit) => {
                            let deviations = fit.deviations.pop();
                            match fit.peaks.pop() {
                                Some(found) => (found, deviations, self.fit_method),
                                None => fallback(estimate),
                            }
                        }
                        Err(err) => {
                            warn!("Failed to fit {model:?} peak at {:?}, keeping the parabolic estimate: {err}", peak.point);
                            fallback(estimate)
                        }
                    }
                })
                .collect()
        } else {
            let approx: Vec<Vec<f64>> = parabolic.iter().map(|p| p.peak.position.clone()).collect();
            match fitter.fit_peaks(subgrid, bounding, &approx, model) {
                Ok(fit) => fit
                    .peaks
                    .into_iter()
                    .zip(fit.deviations)
                    .map(|(found, deviations)| (found, Some(deviations), self.fit_method))
                    .collect(),
                Err(err) => {
                    warn!("Failed to fit {} {model:?} peaks jointly, keeping the parabolic estimates: {err}", peaks.len());
                    parabolic.iter().map(fallback).collect()
                }
            }
        }
    }

    /// Find peaks within `region` of `grid` that are not within the picker's buffer of any
    /// `known` peak position, and fit their shapes.
    ///
    /// Exclusion regions and positions are all given in full-grid coordinates.
    pub fn run(
        &self,
        grid: &Grid,
        region: &FitRegion,
        known: &[Vec<f64>],
    ) -> Result<Vec<PickedPeak>, PickAndFitError> {
        let ndim = grid.ndim();
        region.validate(grid.points())?;
        self.picker.validate(ndim)?;
        for (index, position) in known.iter().enumerate() {
            if position.len() != ndim {
                return Err(PickAndFitError::KnownPeakDimension {
                    index,
                    expected: ndim,
                    actual: position.len(),
                });
            }
        }
        if !self.picker.is_active() {
            return Ok(Vec::new());
        }

        let buffer = self.buffer(ndim);
        let extended = Self::extend_region(region, &buffer, grid.points());
        let origin = extended.offset.clone();
        let subgrid = grid.subgrid(&extended)?;

        let mut picker = self.picker.clone();
        picker.exclusions = self.picker.exclusions.translated(&origin);
        let found = Self::find_peaks(&picker, &subgrid)?;
        let n_found = found.len();

        let peaks: Vec<Peak> = found
            .into_iter()
            .filter(|peak| {
                let full: Vec<usize> = peak
                    .point
                    .iter()
                    .zip(origin.iter())
                    .map(|(p, o)| p + o)
                    .collect();
                region.contains_point(&full) && !Self::is_known(&full, known, &buffer)
            })
            .collect();
        debug!(
            "Found {} peaks in the extended region, {} new peaks in the region",
            n_found,
            peaks.len()
        );
        if peaks.is_empty() {
            return Ok(Vec::new());
        }

        let mut bounding: Option<FitRegion> = None;
        for peak in peaks.iter() {
            let around = FitRegion::around(&peak.point, BOUNDING_BEFORE, BOUNDING_AFTER, subgrid.points());
            bounding = Some(match bounding {
                Some(acc) => acc.union(&around),
                None => around,
            });
        }
        let bounding = bounding.unwrap_or_else(|| FitRegion::whole(&subgrid));

        let approx: Vec<Vec<f64>> = peaks.iter().map(|p| p.position()).collect();
        let parabolic = fit_parabolic_peaks(&subgrid, &bounding, &approx)?;

        let fits = match self.fit_method.peak_model() {
            Some(model) => self.refine(&subgrid, model, &bounding, &peaks, &parabolic),
            None => parabolic
                .iter()
                .map(|p| (p.peak.clone(), None, FitMethod::Parabolic))
                .collect(),
        };

        let picked = peaks
            .into_iter()
            .zip(fits)
            .map(|(mut peak, (mut fit, deviations, method))| {
                for (p, o) in peak.point.iter_mut().zip(origin.iter()) {
                    *p += *o;
                }
                fit.offset_by(&origin);
                PickedPeak {
                    peak,
                    fit,
                    deviations,
                    method,
                }
            })
            .collect();
        Ok(picked)
    }
}
