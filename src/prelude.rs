pub use crate::peak_fitting::{ModelFunction, NonlinearLeastSquares};
pub use crate::{FitRegion, Grid, NeighborMode, PeakModel, PeakPicker};
