//! Mixed-radix conversion between linear indices and coordinate vectors.
//!
//! The same conversion drives scanning a [`Grid`](crate::Grid), enumerating the
//! neighbor cube around a point and flattening a fitting region, so it lives here
//! once. Axis `0` is the fastest varying digit.

use std::iter::FusedIterator;

/// The largest number of dimensions any grid may have
pub const MAX_NDIM: usize = 10;

/// Compute the cumulative products (strides) of `sizes` into `cumulative`, returning
/// the total number of elements.
///
/// `cumulative[i]` is the product of `sizes[..i]`.
pub fn cumulative_into(sizes: &[usize], cumulative: &mut [usize]) -> usize {
    let mut total = 1;
    for (c, s) in cumulative.iter_mut().zip(sizes.iter()) {
        *c = total;
        total *= *s;
    }
    total
}

/// Compute the cumulative products (strides) of `sizes`, returning them together
/// with the total number of elements.
pub fn cumulative(sizes: &[usize]) -> (Vec<usize>, usize) {
    let mut cumul = vec![0; sizes.len()];
    let total = cumulative_into(sizes, &mut cumul);
    (cumul, total)
}

/// Decompose `index` into its mixed-radix digits using the strides in `cumulative`.
pub fn index_to_point(mut index: usize, cumulative: &[usize], point: &mut [usize]) {
    for i in (0..cumulative.len()).rev() {
        point[i] = index / cumulative[i];
        index %= cumulative[i];
    }
}

/// Recompose a linear index from mixed-radix digits, the inverse of [`index_to_point`]
#[inline]
pub fn point_to_index(point: &[usize], cumulative: &[usize]) -> usize {
    point
        .iter()
        .zip(cumulative.iter())
        .map(|(p, c)| p * c)
        .sum()
}

/// Iterate over every coordinate in the half-open box `[offset, end)` in
/// mixed-radix order, axis `0` fastest.
#[derive(Debug, Clone)]
pub struct RegionPoints {
    offset: [usize; MAX_NDIM],
    cumulative: [usize; MAX_NDIM],
    ndim: usize,
    index: usize,
    total: usize,
}

impl RegionPoints {
    pub fn new(offset: &[usize], end: &[usize]) -> Self {
        let ndim = offset.len().min(end.len()).min(MAX_NDIM);
        let mut sizes = [0usize; MAX_NDIM];
        let mut start = [0usize; MAX_NDIM];
        for i in 0..ndim {
            sizes[i] = end[i].saturating_sub(offset[i]);
            start[i] = offset[i];
        }
        let mut cumul = [0usize; MAX_NDIM];
        let total = if ndim == 0 {
            0
        } else {
            cumulative_into(&sizes[..ndim], &mut cumul[..ndim])
        };
        Self {
            offset: start,
            cumulative: cumul,
            ndim,
            index: 0,
            total,
        }
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }
}

impl Iterator for RegionPoints {
    type Item = [usize; MAX_NDIM];

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.total {
            return None;
        }
        let mut point = [0usize; MAX_NDIM];
        index_to_point(
            self.index,
            &self.cumulative[..self.ndim],
            &mut point[..self.ndim],
        );
        for (p, o) in point[..self.ndim].iter_mut().zip(self.offset.iter()) {
            *p += *o;
        }
        self.index += 1;
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.total - self.index;
        (n, Some(n))
    }
}

impl ExactSizeIterator for RegionPoints {}

impl FusedIterator for RegionPoints {}
