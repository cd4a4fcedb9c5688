use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Whether a peak is a local maximum or a local minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExtremumKind {
    Maximum,
    Minimum,
}

impl ExtremumKind {
    /// Whether `other` lies strictly beyond `value` in the direction of this extremum,
    /// above it for a maximum or below it for a minimum.
    #[inline]
    pub fn exceeds(&self, other: f32, value: f32) -> bool {
        match self {
            Self::Maximum => other > value,
            Self::Minimum => other < value,
        }
    }

    /// The kind of extremum a value of this sign is assumed to be
    pub fn from_sign(value: f32) -> Self {
        if value > 0.0 {
            Self::Maximum
        } else {
            Self::Minimum
        }
    }
}

/// A grid point accepted as a peak by [`PeakPicker`](crate::PeakPicker)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peak {
    /// The grid coordinates of the peak in point order
    pub point: Vec<usize>,
    /// The grid value at `point`
    pub value: f32,
}

impl Peak {
    pub fn new(point: Vec<usize>, value: f32) -> Self {
        Self { point, value }
    }

    pub fn ndim(&self) -> usize {
        self.point.len()
    }

    /// Whether `point` falls within `buffer` of this peak along every axis
    pub fn within_buffer(&self, point: &[usize], buffer: &[usize]) -> bool {
        self.point
            .iter()
            .zip(point.iter())
            .zip(buffer.iter())
            .all(|((a, b), w)| a.abs_diff(*b) <= *w)
    }

    /// The peak position as fractional coordinates
    pub fn position(&self) -> Vec<f64> {
        self.point.iter().map(|p| *p as f64).collect()
    }
}

impl fmt::Display for Peak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Peak({:?}, {})", self.point, self.value)
    }
}

/// A peak shape estimate with a height, a fractional position and a full width at half
/// maximum for every axis.
///
/// The same shape is used for fit uncertainties, where each field holds the deviation
/// of the corresponding parameter.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FittedPeak {
    pub height: f64,
    /// The fractional grid coordinates in point order
    pub position: Vec<f64>,
    /// The full width at half maximum along each axis, in grid points
    pub linewidth: Vec<f64>,
}

impl FittedPeak {
    pub fn new(height: f64, position: Vec<f64>, linewidth: Vec<f64>) -> Self {
        Self {
            height,
            position,
            linewidth,
        }
    }

    pub fn ndim(&self) -> usize {
        self.position.len()
    }

    /// The number of model parameters describing this peak
    pub fn parameter_count(&self) -> usize {
        1 + 2 * self.ndim()
    }

    /// Unpack one peak's `[height, position.., linewidth..]` parameter block
    pub fn from_parameters(params: &[f64], ndim: usize) -> Self {
        Self::new(
            params[0],
            params[1..1 + ndim].to_vec(),
            params[1 + ndim..1 + 2 * ndim].to_vec(),
        )
    }

    /// Append this peak's `[height, position.., linewidth..]` parameter block to `params`
    pub fn write_parameters(&self, params: &mut Vec<f64>) {
        params.push(self.height);
        params.extend_from_slice(&self.position);
        params.extend_from_slice(&self.linewidth);
    }

    /// Shift the position by `origin`, moving it between a subgrid and its parent grid
    pub fn offset_by(&mut self, origin: &[usize]) {
        for (p, o) in self.position.iter_mut().zip(origin.iter()) {
            *p += *o as f64;
        }
    }
}

impl fmt::Display for FittedPeak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FittedPeak({}, {:?}, {:?})",
            self.height, self.position, self.linewidth
        )
    }
}
