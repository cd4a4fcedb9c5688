//! Enumerate the neighborhood of a grid point.
//!
//! Two neighborhoods are supported, see [`NeighborMode`]. The offsets are
//! computed once into a [`NeighborTable`] and reused for every point of a scan.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{cumulative_into, index_to_point, MAX_NDIM};

/// Which points count as the neighbors of a grid point
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NeighborMode {
    /// The `2 * ndim` points one step away along a single axis. A side that
    /// falls off the grid is skipped.
    #[default]
    Adjacent,
    /// Every point of the `3^ndim` cube around the point except the point itself.
    /// Points on any edge of the grid have no complete cube and are rejected.
    NonAdjacent,
}

type Offset = [i8; MAX_NDIM];

/// A precomputed set of neighbor offsets for one dimensionality and [`NeighborMode`]
#[derive(Debug, Clone)]
pub struct NeighborTable {
    ndim: usize,
    mode: NeighborMode,
    offsets: Vec<Offset>,
}

impl NeighborTable {
    pub fn new(ndim: usize, mode: NeighborMode) -> Self {
        let ndim = ndim.min(MAX_NDIM);
        let offsets = match mode {
            NeighborMode::Adjacent => Self::adjacent_offsets(ndim),
            NeighborMode::NonAdjacent => Self::cube_offsets(ndim),
        };
        Self {
            ndim,
            mode,
            offsets,
        }
    }

    fn adjacent_offsets(ndim: usize) -> Vec<Offset> {
        let mut offsets = Vec::with_capacity(2 * ndim);
        for i in 0..ndim {
            let mut lower = [0i8; MAX_NDIM];
            lower[i] = -1;
            offsets.push(lower);
            let mut upper = [0i8; MAX_NDIM];
            upper[i] = 1;
            offsets.push(upper);
        }
        offsets
    }

    fn cube_offsets(ndim: usize) -> Vec<Offset> {
        let sizes = [3usize; MAX_NDIM];
        let mut cumulative = [0usize; MAX_NDIM];
        let total = cumulative_into(&sizes[..ndim], &mut cumulative[..ndim]);
        // the all-zero digit vector sits exactly in the middle
        let center = (total - 1) / 2;

        let mut offsets = Vec::with_capacity(total.saturating_sub(1));
        let mut digits = [0usize; MAX_NDIM];
        for n in 0..total {
            if n == center {
                continue;
            }
            index_to_point(n, &cumulative[..ndim], &mut digits[..ndim]);
            let mut offset = [0i8; MAX_NDIM];
            for (o, d) in offset.iter_mut().zip(digits[..ndim].iter()) {
                *o = *d as i8 - 1;
            }
            offsets.push(offset);
        }
        offsets
    }

    pub fn mode(&self) -> NeighborMode {
        self.mode
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// The number of offsets in the table, `2 * ndim` or `3^ndim - 1`
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterate over the neighbors of `point` in a grid with extents `points`.
    ///
    /// Returns [`None`] when the neighborhood cannot be evaluated, which only
    /// happens in [`NeighborMode::NonAdjacent`] mode for a point on any edge.
    pub fn neighbors<'a>(
        &'a self,
        point: &'a [usize],
        points: &'a [usize],
    ) -> Option<Neighbors<'a>> {
        if self.mode == NeighborMode::NonAdjacent
            && point
                .iter()
                .zip(points.iter())
                .any(|(p, n)| *p == 0 || *p + 1 >= *n)
        {
            return None;
        }
        Some(Neighbors {
            offsets: self.offsets.iter(),
            point,
            points,
        })
    }
}

/// An iterator over the in-bounds neighbors of a point, produced by [`NeighborTable::neighbors`]
#[derive(Debug, Clone)]
pub struct Neighbors<'a> {
    offsets: std::slice::Iter<'a, Offset>,
    point: &'a [usize],
    points: &'a [usize],
}

impl Iterator for Neighbors<'_> {
    type Item = [usize; MAX_NDIM];

    fn next(&mut self) -> Option<Self::Item> {
        'offsets: for offset in self.offsets.by_ref() {
            let mut neighbor = [0usize; MAX_NDIM];
            for (i, (p, n)) in self.point.iter().zip(self.points.iter()).enumerate() {
                let q = *p as isize + offset[i] as isize;
                if q < 0 || q >= *n as isize {
                    continue 'offsets;
                }
                neighbor[i] = q as usize;
            }
            return Some(neighbor);
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 2, 2)]
    #[case(2, 4, 8)]
    #[case(3, 6, 26)]
    #[case(10, 20, 59048)]
    fn test_table_sizes(#[case] ndim: usize, #[case] adjacent: usize, #[case] cube: usize) {
        assert_eq!(NeighborTable::new(ndim, NeighborMode::Adjacent).len(), adjacent);
        assert_eq!(NeighborTable::new(ndim, NeighborMode::NonAdjacent).len(), cube);
    }

    #[test]
    fn test_cube_excludes_center() {
        let table = NeighborTable::new(3, NeighborMode::NonAdjacent);
        assert!(table
            .offsets
            .iter()
            .all(|o| o[..3].iter().any(|d| *d != 0)));
        assert!(table
            .offsets
            .iter()
            .all(|o| o[..3].iter().all(|d| (-1..=1).contains(d))));
    }

    #[test]
    fn test_adjacent_skips_edges() {
        let table = NeighborTable::new(2, NeighborMode::Adjacent);
        let points = [4, 3];
        let corner: Vec<_> = table
            .neighbors(&[0, 0], &points)
            .unwrap()
            .map(|p| (p[0], p[1]))
            .collect();
        assert_eq!(corner, vec![(1, 0), (0, 1)]);

        let inner: Vec<_> = table
            .neighbors(&[1, 1], &points)
            .unwrap()
            .map(|p| (p[0], p[1]))
            .collect();
        assert_eq!(inner.len(), 4);
    }

    #[test]
    fn test_nonadjacent_rejects_edges() {
        let table = NeighborTable::new(2, NeighborMode::NonAdjacent);
        let points = [4, 3];
        assert!(table.neighbors(&[0, 1], &points).is_none());
        assert!(table.neighbors(&[2, 2], &points).is_none());
        let inner: Vec<_> = table
            .neighbors(&[1, 1], &points)
            .unwrap()
            .map(|p| (p[0], p[1]))
            .collect();
        assert_eq!(inner.len(), 8);
        assert!(inner.contains(&(0, 0)));
        assert!(inner.contains(&(2, 2)));
        assert!(!inner.contains(&(1, 1)));
    }
}
