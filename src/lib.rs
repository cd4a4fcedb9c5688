//! `ndpeak` is a library for finding and fitting peaks in dense N-dimensional
//! spectra, such as multidimensional NMR data, stored as a grid of `f32` values.
//!
//! The peak picking facility can be used directly with [`PeakPicker`], which scans
//! every grid point for local maxima and minima beyond a threshold, with optional
//! exclusion regions, a drop factor, a minimum linewidth and a buffer separating
//! neighboring peaks. See its documentation for more details.
//!
//! Found peaks can be refined into a height, a fractional position and a linewidth per
//! axis with the tools in [`peak_fitting`], either by fitting parabolas through neighboring
//! samples or by a joint Gaussian or Lorentzian least squares fit. [`PickAndFit`] does both
//! in one pass over a region of a larger grid.
//!
//! # Usage
//! ```
//! use ndpeak::{Grid, NeighborMode, PeakPicker};
//!
//! let data = [0.0f32, 1.0, 5.0, 1.0, 0.0, 0.0, 1.0, 3.0, 1.0, 0.0];
//! let grid = Grid::new(&[10], &data[..]).unwrap();
//! let picker = PeakPicker::builder()
//!     .high_threshold(4.0)
//!     .buffer(vec![1])
//!     .neighbor_mode(NeighborMode::Adjacent)
//!     .build();
//! let peaks = picker.find_peaks(&grid).unwrap();
//! assert_eq!(peaks.len(), 1);
//! assert_eq!(peaks[0].point, vec![2]);
//! for peak in peaks.iter() {
//!     println!("{}", peak);
//! }
//! ```
//!
//! ## Coordinates
//! A [`Grid`] is stored row-major with its slowest axis first, but every coordinate
//! vector passed to or returned from this crate lists the axes fastest first. See [`grid`].
//!
//! ## Building
//! Peak fitting solves small dense linear systems. By default this uses `nalgebra`; the
//! `openblas`, `netlib` or `intel-mkl` features switch to `ndarray-linalg` with the matching
//! LAPACK implementation and also allow building a [`Grid`] from an `ndarray` view, e.g.:
//!
//! ```bash
//! cargo build --no-default-features --features parallelism,openblas
//! ```
//!
//! The `parallelism` feature enables [`PeakPicker::find_peaks_parallel`] with `rayon`, and
//! `serde` derives serialization for the public data types.
pub mod arrayops;
pub mod exclusion;
pub mod grid;
pub mod neighbors;
pub mod peak;
pub mod peak_fitting;
pub mod peak_picker;
pub mod peak_statistics;
pub mod pick_fit;
pub mod prelude;

pub use crate::exclusion::{DiagonalExclusion, ExclusionBox, Exclusions};
pub use crate::grid::{FitRegion, Grid, GridError};
pub use crate::neighbors::{NeighborMode, NeighborTable};
pub use crate::peak::{ExtremumKind, FittedPeak, Peak};
pub use crate::peak_fitting::{
    fit_parabolic_peaks, fit_peaks, LevenbergMarquardt, MultiPeakFit, ParabolicFit, PeakFitError,
    PeakFitter, PeakModel,
};
pub use crate::peak_picker::{pick_peaks, PeakPicker, PeakPickerBuilder, PeakPickerError};
pub use crate::pick_fit::{FitMethod, PickAndFit, PickAndFitError, PickedPeak};
