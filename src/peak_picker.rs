//! Algorithm for finding local extrema in an N-dimensional grid.
//!
//! Every grid point is visited once in storage order. A point is reported as a
//! peak if it survives, in order:
//!
//! 1. the exclusion regions,
//! 2. threshold classification as a maximum or minimum candidate,
//! 3. the local extremum test against its [`NeighborMode`] neighborhood,
//! 4. the drop factor test,
//! 5. the minimum linewidth test,
//! 6. the buffer test against the peaks accepted so far.
//!
use log::debug;

use thiserror::Error;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

use crate::arrayops::{index_to_point, MAX_NDIM};
use crate::exclusion::{DiagonalExclusion, ExclusionBox, Exclusions};
use crate::grid::{Grid, GridError};
use crate::neighbors::{NeighborMode, NeighborTable};
use crate::peak::{ExtremumKind, Peak};
use crate::peak_statistics::{half_max_linewidth, walk_axis, Direction};

/// All the ways a peak search can be misconfigured
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeakPickerError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("The buffer has {actual} entries, the grid has {expected} dimensions")]
    BufferLength { expected: usize, actual: usize },
    #[error("The minimum linewidth has {actual} entries, the grid has {expected} dimensions")]
    MinLinewidthLength { expected: usize, actual: usize },
    #[error("Excluded region {index} has bounds for {actual} dimensions, the grid has {expected}")]
    ExclusionBoxShape {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Diagonal exclusion {index} refers to dimension {dim}, the grid has {ndim}")]
    DiagonalDimension { index: usize, dim: usize, ndim: usize },
}

/// A peak picker for N-dimensional spectra.
///
/// `buffer` and `min_linewidth` hold one entry per grid dimension, in point order.
/// When both are left empty they are treated as all zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakPicker {
    /// Values at or below this are minimum candidates
    pub low_threshold: Option<f32>,
    /// Values at or above this are maximum candidates, checked before `low_threshold`
    pub high_threshold: Option<f32>,
    /// How close, per axis, a peak may be to an already accepted peak
    pub buffer: Vec<usize>,
    pub neighbor_mode: NeighborMode,
    /// The fraction of a peak's magnitude the signal must fall by on every side
    pub drop_factor: f32,
    /// The smallest half-height linewidth allowed along each axis, zero to disable
    pub min_linewidth: Vec<f32>,
    pub exclusions: Exclusions,
}

/// A builder for configuring [`PeakPicker`]
#[derive(Debug, Clone, Default)]
pub struct PeakPickerBuilder {
    low_threshold: Option<f32>,
    high_threshold: Option<f32>,
    buffer: Vec<usize>,
    neighbor_mode: NeighborMode,
    drop_factor: f32,
    min_linewidth: Vec<f32>,
    exclusions: Exclusions,
}

impl PeakPickerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn low_threshold(&mut self, low_threshold: f32) -> &mut Self {
        self.low_threshold = Some(low_threshold);
        self
    }

    pub fn high_threshold(&mut self, high_threshold: f32) -> &mut Self {
        self.high_threshold = Some(high_threshold);
        self
    }

    pub fn buffer(&mut self, buffer: Vec<usize>) -> &mut Self {
        self.buffer = buffer;
        self
    }

    pub fn neighbor_mode(&mut self, neighbor_mode: NeighborMode) -> &mut Self {
        self.neighbor_mode = neighbor_mode;
        self
    }

    pub fn drop_factor(&mut self, drop_factor: f32) -> &mut Self {
        self.drop_factor = drop_factor;
        self
    }

    pub fn min_linewidth(&mut self, min_linewidth: Vec<f32>) -> &mut Self {
        self.min_linewidth = min_linewidth;
        self
    }

    pub fn exclude_box(&mut self, region: ExclusionBox) -> &mut Self {
        self.exclusions.boxes.push(region);
        self
    }

    pub fn exclude_diagonal(&mut self, diagonal: DiagonalExclusion) -> &mut Self {
        self.exclusions.diagonals.push(diagonal);
        self
    }

    pub fn build(&self) -> PeakPicker {
        PeakPicker {
            low_threshold: self.low_threshold,
            high_threshold: self.high_threshold,
            buffer: self.buffer.clone(),
            neighbor_mode: self.neighbor_mode,
            drop_factor: self.drop_factor,
            min_linewidth: self.min_linewidth.clone(),
            exclusions: self.exclusions.clone(),
        }
    }
}

impl From<PeakPickerBuilder> for PeakPicker {
    fn from(value: PeakPickerBuilder) -> Self {
        value.build()
    }
}

/// A point that passed every filter except the buffer test
#[derive(Debug, Clone, Copy)]
struct Candidate {
    point: [usize; MAX_NDIM],
    value: f32,
}

/// The per-search state shared by every point's filters
struct PeakSearch<'g, 'a> {
    picker: &'g PeakPicker,
    grid: &'g Grid<'a>,
    table: NeighborTable,
    buffer: Vec<usize>,
    min_linewidth: Vec<f32>,
}

impl<'g, 'a> PeakSearch<'g, 'a> {
    fn new(picker: &'g PeakPicker, grid: &'g Grid<'a>) -> Self {
        let ndim = grid.ndim();
        let buffer = if picker.buffer.is_empty() {
            vec![0; ndim]
        } else {
            picker.buffer.clone()
        };
        let min_linewidth = if picker.min_linewidth.is_empty() {
            vec![0.0; ndim]
        } else {
            picker.min_linewidth.clone()
        };
        Self {
            picker,
            grid,
            table: NeighborTable::new(ndim, picker.neighbor_mode),
            buffer,
            min_linewidth,
        }
    }

    fn classify(&self, value: f32) -> Option<ExtremumKind> {
        match (self.picker.high_threshold, self.picker.low_threshold) {
            (Some(high), _) if value >= high => Some(ExtremumKind::Maximum),
            (_, Some(low)) if value <= low => Some(ExtremumKind::Minimum),
            _ => None,
        }
    }

    fn is_extremum(&self, kind: ExtremumKind, value: f32, point: &[usize]) -> bool {
        let ndim = self.grid.ndim();
        match self.table.neighbors(point, self.grid.points()) {
            Some(mut neighbors) => {
                neighbors.all(|q| !kind.exceeds(self.grid.value_at(&q[..ndim]), value))
            }
            None => false,
        }
    }

    fn drops_in_direction(
        &self,
        kind: ExtremumKind,
        drop: f32,
        value: f32,
        point: &[usize],
        axis: usize,
        direction: Direction,
    ) -> bool {
        let mut prev = value;
        walk_axis(self.grid, point, axis, direction, |_, v| {
            if kind.exceeds(v, prev) {
                Some(false)
            } else if (value - v).abs() >= drop {
                Some(true)
            } else {
                prev = v;
                None
            }
        })
        .unwrap_or(true)
    }

    fn drops_sufficiently(&self, kind: ExtremumKind, value: f32, point: &[usize]) -> bool {
        let drop_factor = self.picker.drop_factor;
        if drop_factor <= 0.0 {
            return true;
        }
        let drop = drop_factor * value.abs();
        (0..self.grid.ndim()).all(|axis| {
            Direction::BOTH
                .iter()
                .all(|d| self.drops_in_direction(kind, drop, value, point, axis, *d))
        })
    }

    fn wide_enough(&self, kind: ExtremumKind, value: f32, point: &[usize]) -> bool {
        self.min_linewidth
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0.0)
            .all(|(axis, w)| half_max_linewidth(self.grid, kind, value, point, axis) >= *w)
    }

    /// Run every filter that does not depend on previously accepted peaks
    fn evaluate(&self, index: usize) -> Option<Candidate> {
        let ndim = self.grid.ndim();
        let mut point = [0usize; MAX_NDIM];
        index_to_point(index, self.grid.cumulative(), &mut point[..ndim]);
        let p = &point[..ndim];

        if self.picker.exclusions.excludes(p) {
            return None;
        }
        let value = self.grid.value_at(p);
        let kind = self.classify(value)?;
        if !self.is_extremum(kind, value, p) {
            return None;
        }
        if !self.drops_sufficiently(kind, value, p) {
            return None;
        }
        if !self.wide_enough(kind, value, p) {
            return None;
        }
        Some(Candidate { point, value })
    }

    fn outside_buffer(&self, accepted: &[Peak], point: &[usize]) -> bool {
        !accepted
            .iter()
            .any(|peak| peak.within_buffer(point, &self.buffer))
    }

    /// Append `candidate` to `accepted` unless it is too close to a peak already there
    fn accept(&self, accepted: &mut Vec<Peak>, candidate: Candidate) -> bool {
        let p = &candidate.point[..self.grid.ndim()];
        if self.outside_buffer(accepted, p) {
            accepted.push(Peak::new(p.to_vec(), candidate.value));
            true
        } else {
            false
        }
    }
}

impl PeakPicker {
    pub fn new(
        low_threshold: Option<f32>,
        high_threshold: Option<f32>,
        buffer: Vec<usize>,
        neighbor_mode: NeighborMode,
        drop_factor: f32,
        min_linewidth: Vec<f32>,
        exclusions: Exclusions,
    ) -> Self {
        Self {
            low_threshold,
            high_threshold,
            buffer,
            neighbor_mode,
            drop_factor,
            min_linewidth,
            exclusions,
        }
    }

    pub fn builder() -> PeakPickerBuilder {
        PeakPickerBuilder::new()
    }

    /// Check this configuration against a grid with `ndim` dimensions
    pub fn validate(&self, ndim: usize) -> Result<(), PeakPickerError> {
        if ndim > MAX_NDIM {
            return Err(GridError::TooManyDimensions(ndim).into());
        }
        if !self.buffer.is_empty() && self.buffer.len() != ndim {
            return Err(PeakPickerError::BufferLength {
                expected: ndim,
                actual: self.buffer.len(),
            });
        }
        if !self.min_linewidth.is_empty() && self.min_linewidth.len() != ndim {
            return Err(PeakPickerError::MinLinewidthLength {
                expected: ndim,
                actual: self.min_linewidth.len(),
            });
        }
        for (index, region) in self.exclusions.boxes.iter().enumerate() {
            if region.min.len() != ndim || region.max.len() != ndim {
                return Err(PeakPickerError::ExclusionBoxShape {
                    index,
                    expected: ndim,
                    actual: region.min.len().min(region.max.len()),
                });
            }
        }
        for (index, diagonal) in self.exclusions.diagonals.iter().enumerate() {
            for dim in [diagonal.dim1, diagonal.dim2] {
                if dim >= ndim {
                    return Err(PeakPickerError::DiagonalDimension { index, dim, ndim });
                }
            }
        }
        Ok(())
    }

    /// Whether any threshold is set. Without one no point can be a candidate.
    pub fn is_active(&self) -> bool {
        self.low_threshold.is_some() || self.high_threshold.is_some()
    }

    /// Find the peaks in `grid`, pushing them into `peak_accumulator` in scan order.
    ///
    /// Returns the number of peaks found if successful.
    pub fn discover_peaks(
        &self,
        grid: &Grid,
        peak_accumulator: &mut Vec<Peak>,
    ) -> Result<usize, PeakPickerError> {
        self.validate(grid.ndim())?;
        if !self.is_active() {
            return Ok(0);
        }
        let search = PeakSearch::new(self, grid);
        let mut accepted = Vec::new();
        let mut n_candidates = 0usize;
        for index in 0..grid.len() {
            if let Some(candidate) = search.evaluate(index) {
                n_candidates += 1;
                search.accept(&mut accepted, candidate);
            }
        }
        debug!(
            "Scanned {} points, {} candidates, accepted {} peaks",
            grid.len(),
            n_candidates,
            accepted.len()
        );
        let n = accepted.len();
        peak_accumulator.extend(accepted);
        Ok(n)
    }

    /// Find the peaks in `grid`
    pub fn find_peaks(&self, grid: &Grid) -> Result<Vec<Peak>, PeakPickerError> {
        let mut acc = Vec::new();
        self.discover_peaks(grid, &mut acc)?;
        Ok(acc)
    }

    /// Find the peaks in `grid`, evaluating the grid points in parallel.
    ///
    /// The buffer test depends on which peaks were accepted earlier in the scan, so it runs
    /// as a separate serial pass over the candidates, in scan order. The result is identical
    /// to [`PeakPicker::find_peaks`].
    #[cfg(feature = "parallelism")]
    pub fn find_peaks_parallel(&self, grid: &Grid) -> Result<Vec<Peak>, PeakPickerError> {
        self.validate(grid.ndim())?;
        if !self.is_active() {
            return Ok(Vec::new());
        }
        let search = PeakSearch::new(self, grid);
        let candidates: Vec<Candidate> = (0..grid.len())
            .into_par_iter()
            .filter_map(|index| search.evaluate(index))
            .collect();

        let mut accepted = Vec::new();
        for candidate in candidates.iter() {
            search.accept(&mut accepted, *candidate);
        }
        debug!(
            "Scanned {} points in parallel, {} candidates, accepted {} peaks",
            grid.len(),
            candidates.len(),
            accepted.len()
        );
        Ok(accepted)
    }
}

/// A convenience function that finds maxima at or above `high_threshold` with a default
/// peak picking configuration.
pub fn pick_peaks(grid: &Grid, high_threshold: f32) -> Result<Vec<Peak>, PeakPickerError> {
    let picker = PeakPicker {
        high_threshold: Some(high_threshold),
        ..PeakPicker::default()
    };
    picker.find_peaks(grid)
}
