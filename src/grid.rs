//! A dense N-dimensional intensity grid.
//!
//! Data are stored row-major in *storage* order, like a C array, but every
//! coordinate vector ("point") used by this crate lists the axes in reverse:
//! point axis `i` addresses storage axis `ndim - 1 - i`. Point axis `0` is
//! therefore the fastest varying (contiguous) axis. [`Grid::points`] gives the
//! extents in point order and all other components only ever see those.
use std::borrow::Cow;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{cumulative_into, point_to_index, RegionPoints, MAX_NDIM};

/// All the ways a grid or a region of a grid can be malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("The grid must have at least one dimension")]
    NoDimensions,
    #[error("The maximum number of dimensions is {max}, received {0}", max = MAX_NDIM)]
    TooManyDimensions(usize),
    #[error("Axis {0} has zero extent")]
    EmptyAxis(usize),
    #[error("The grid shape {0:?} describes more points than can be addressed")]
    TooManyPoints(Vec<usize>),
    #[error("The grid shape describes {expected} points but {actual} values were provided")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("Expected {expected} coordinates for a point, received {actual}")]
    PointDimensionMismatch { expected: usize, actual: usize },
    #[error("Region bounds on axis {axis} must satisfy {offset} < {end} <= {extent}")]
    InvalidRegion {
        axis: usize,
        offset: usize,
        end: usize,
        extent: usize,
    },
    #[error("The array is not in contiguous standard layout")]
    NotContiguous,
}

/// A rectangular `[offset, end)` region of a grid in point order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitRegion {
    pub offset: Vec<usize>,
    pub end: Vec<usize>,
}

impl FitRegion {
    pub fn new(offset: Vec<usize>, end: Vec<usize>) -> Self {
        Self { offset, end }
    }

    /// The region spanning all of `grid`
    pub fn whole(grid: &Grid) -> Self {
        Self::new(vec![0; grid.ndim()], grid.points().to_vec())
    }

    /// Build the region `[point - before, point + after)` clamped to `points`
    pub fn around(point: &[usize], before: usize, after: usize, points: &[usize]) -> Self {
        let offset = point.iter().map(|p| p.saturating_sub(before)).collect();
        let end = point
            .iter()
            .zip(points.iter())
            .map(|(p, n)| (p + after).min(*n))
            .collect();
        Self::new(offset, end)
    }

    /// Grow this region to also cover `other`
    pub fn union(&self, other: &FitRegion) -> Self {
        let offset = self
            .offset
            .iter()
            .zip(other.offset.iter())
            .map(|(a, b)| *a.min(b))
            .collect();
        let end = self
            .end
            .iter()
            .zip(other.end.iter())
            .map(|(a, b)| *a.max(b))
            .collect();
        Self::new(offset, end)
    }

    pub fn ndim(&self) -> usize {
        self.offset.len()
    }

    /// The number of samples along each axis
    pub fn sizes(&self) -> Vec<usize> {
        self.offset
            .iter()
            .zip(self.end.iter())
            .map(|(o, e)| e.saturating_sub(*o))
            .collect()
    }

    /// The total number of samples in the region
    pub fn len(&self) -> usize {
        self.sizes().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fractional `position` lies within `[offset, end)` on every axis
    pub fn contains(&self, position: &[f64]) -> bool {
        position
            .iter()
            .zip(self.offset.iter().zip(self.end.iter()))
            .all(|(p, (o, e))| *p >= *o as f64 && *p < *e as f64)
    }

    /// Whether an integer `point` lies within `[offset, end)` on every axis
    pub fn contains_point(&self, point: &[usize]) -> bool {
        point
            .iter()
            .zip(self.offset.iter().zip(self.end.iter()))
            .all(|(p, (o, e))| p >= o && p < e)
    }

    /// Iterate over the points in this region in mixed-radix order
    pub fn iter_points(&self) -> RegionPoints {
        RegionPoints::new(&self.offset, &self.end)
    }

    /// Check this region is well formed for a grid with extents `points`
    pub fn validate(&self, points: &[usize]) -> Result<(), GridError> {
        if self.offset.len() != points.len() {
            return Err(GridError::PointDimensionMismatch {
                expected: points.len(),
                actual: self.offset.len(),
            });
        }
        if self.end.len() != points.len() {
            return Err(GridError::PointDimensionMismatch {
                expected: points.len(),
                actual: self.end.len(),
            });
        }
        for (axis, ((o, e), n)) in self
            .offset
            .iter()
            .zip(self.end.iter())
            .zip(points.iter())
            .enumerate()
        {
            if !(o < e && e <= n) {
                return Err(GridError::InvalidRegion {
                    axis,
                    offset: *o,
                    end: *e,
                    extent: *n,
                });
            }
        }
        Ok(())
    }
}

/// A dense grid of `f32` values with up to [`MAX_NDIM`] dimensions
#[derive(Debug, Clone)]
pub struct Grid<'a> {
    shape: Vec<usize>,
    points: Vec<usize>,
    cumulative: Vec<usize>,
    data: Cow<'a, [f32]>,
}

impl<'a> Grid<'a> {
    /// Create a grid from a storage order `shape` (slowest axis first) and its values
    pub fn new<D: Into<Cow<'a, [f32]>>>(shape: &[usize], data: D) -> Result<Self, GridError> {
        let data = data.into();
        let ndim = shape.len();
        if ndim == 0 {
            return Err(GridError::NoDimensions);
        }
        if ndim > MAX_NDIM {
            return Err(GridError::TooManyDimensions(ndim));
        }
        if let Some(axis) = shape.iter().position(|s| *s == 0) {
            return Err(GridError::EmptyAxis(ndim - 1 - axis));
        }
        if shape
            .iter()
            .try_fold(1usize, |total, s| total.checked_mul(*s))
            .is_none()
        {
            return Err(GridError::TooManyPoints(shape.to_vec()));
        }
        let points: Vec<usize> = shape.iter().rev().copied().collect();
        let mut cumul = vec![0; ndim];
        let total = cumulative_into(&points, &mut cumul);
        if total != data.len() {
            return Err(GridError::ShapeMismatch {
                expected: total,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            points,
            cumulative: cumul,
            data,
        })
    }

    /// Create a grid from extents in point order (fastest axis first) and its values
    pub fn from_points<D: Into<Cow<'a, [f32]>>>(
        points: &[usize],
        data: D,
    ) -> Result<Self, GridError> {
        let shape: Vec<usize> = points.iter().rev().copied().collect();
        Self::new(&shape, data)
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// The extents in storage order
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The extents in point order
    pub fn points(&self) -> &[usize] {
        &self.points
    }

    /// The mixed-radix strides of the point order axes
    pub fn cumulative(&self) -> &[usize] {
        &self.cumulative
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Read the value at `point`.
    ///
    /// No bounds checking is done beyond the slice index, callers must
    /// keep every coordinate within [`Grid::points`].
    #[inline]
    pub fn value_at(&self, point: &[usize]) -> f32 {
        self.data[point_to_index(point, &self.cumulative)]
    }

    /// Read the value at `point`, returning [`None`] if it lies outside the grid
    pub fn get(&self, point: &[usize]) -> Option<f32> {
        if point.len() != self.ndim() || point.iter().zip(self.points.iter()).any(|(p, n)| p >= n)
        {
            return None;
        }
        Some(self.value_at(point))
    }

    /// Whether `point` lies on the first or last sample of any axis
    pub fn on_boundary(&self, point: &[usize]) -> bool {
        point
            .iter()
            .zip(self.points.iter())
            .any(|(p, n)| *p == 0 || *p + 1 >= *n)
    }

    /// Copy the values of `region` into a new grid of the region's size
    pub fn subgrid(&self, region: &FitRegion) -> Result<Grid<'static>, GridError> {
        region.validate(&self.points)?;
        let ndim = self.ndim();
        let mut values = Vec::with_capacity(region.len());
        values.extend(
            region
                .iter_points()
                .map(|p| self.value_at(&p[..ndim])),
        );
        Grid::from_points(&region.sizes(), values)
    }

    /// Convert into a grid which owns its data
    pub fn into_owned(self) -> Grid<'static> {
        Grid {
            shape: self.shape,
            points: self.points,
            cumulative: self.cumulative,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

#[cfg(feature = "ndarray")]
impl<'a> TryFrom<ndarray::ArrayViewD<'a, f32>> for Grid<'a> {
    type Error = GridError;

    fn try_from(value: ndarray::ArrayViewD<'a, f32>) -> Result<Self, Self::Error> {
        let shape = value.shape().to_vec();
        match value.to_slice() {
            Some(data) => Grid::new(&shape, data),
            None => Err(GridError::NotContiguous),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_axis_order_reversed() {
        // storage shape (2, 3): two rows of three
        let data = [0.0f32, 1.0, 2.0, 10.0, 11.0, 12.0];
        let grid = Grid::new(&[2, 3], &data[..]).unwrap();
        assert_eq!(grid.points(), &[3, 2]);
        // point [x, y] addresses storage [y][x]
        assert_eq!(grid.value_at(&[2, 0]), 2.0);
        assert_eq!(grid.value_at(&[0, 1]), 10.0);
        assert_eq!(grid.value_at(&[1, 1]), 11.0);
        assert_eq!(grid.get(&[3, 0]), None);
        assert_eq!(grid.get(&[2, 1]), Some(12.0));
    }

    #[rstest]
    #[case(&[], GridError::NoDimensions)]
    #[case(&[1; 11], GridError::TooManyDimensions(11))]
    #[case(&[2, 0], GridError::EmptyAxis(0))]
    #[case(&[2, 2], GridError::ShapeMismatch { expected: 4, actual: 3 })]
    #[case(&[1 << 40, 1 << 40], GridError::TooManyPoints(vec![1 << 40, 1 << 40]))]
    #[case(&[usize::MAX, 2], GridError::TooManyPoints(vec![usize::MAX, 2]))]
    fn test_invalid_grid(#[case] shape: &[usize], #[case] expected: GridError) {
        let data = vec![0.0f32; 3];
        let err = Grid::new(shape, data).unwrap_err();
        assert_eq!(err, expected);
    }

    #[test]
    fn test_subgrid() {
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let grid = Grid::from_points(&[5, 4], data).unwrap();
        let region = FitRegion::new(vec![1, 2], vec![4, 4]);
        let sub = grid.subgrid(&region).unwrap();
        assert_eq!(sub.points(), &[3, 2]);
        assert_eq!(sub.value_at(&[0, 0]), grid.value_at(&[1, 2]));
        assert_eq!(sub.value_at(&[2, 1]), grid.value_at(&[3, 3]));
    }

    #[test]
    fn test_region_validation() {
        let region = FitRegion::new(vec![2, 0], vec![2, 3]);
        assert_eq!(
            region.validate(&[5, 5]),
            Err(GridError::InvalidRegion {
                axis: 0,
                offset: 2,
                end: 2,
                extent: 5
            })
        );
        let region = FitRegion::around(&[1, 4], 2, 3, &[5, 6]);
        assert_eq!(region.offset, vec![0, 2]);
        assert_eq!(region.end, vec![4, 6]);
        assert!(region.validate(&[5, 6]).is_ok());
        assert!(region.contains(&[3.5, 2.0]));
        assert!(!region.contains(&[4.0, 2.0]));
    }

    #[test]
    fn test_on_boundary() {
        let grid = Grid::from_points(&[3, 3], vec![0.0f32; 9]).unwrap();
        assert!(!grid.on_boundary(&[1, 1]));
        assert!(grid.on_boundary(&[1, 2]));
        assert!(grid.on_boundary(&[0, 1]));
    }
}
