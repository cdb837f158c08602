// ============================================================
// tiled_tensor.rs
// ============================================================
//
// A TiledTensor is a logical tensor expressed as a regular grid of
// owned Tensor tiles. The grid shape counts tiles per axis, not
// elements. Each tile carries its core region in origin coordinates
// plus `halo[axis]` elements of overlap on both sides.
//
// ============================================================

use crate::error::{Result, TileError};
use crate::shape::TensorShape;
use crate::tensor::Tensor;

/* ============================================================
   Tile descriptor
   ============================================================ */

/// Core region of one tile in the origin tensor (halo excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    start: Vec<usize>,
    len: Vec<usize>,
}

impl Tile {
    pub fn new(start: Vec<usize>, len: Vec<usize>) -> Self {
        Self { start, len }
    }

    pub fn start(&self, dim: usize) -> usize {
        self.start[dim]
    }

    pub fn len(&self, dim: usize) -> usize {
        self.len[dim]
    }

    pub fn end(&self, dim: usize) -> usize {
        self.start[dim] + self.len[dim]
    }

    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    pub fn starts(&self) -> &[usize] {
        &self.start
    }

    pub fn lens(&self) -> &[usize] {
        &self.len
    }
}

/* ============================================================
   Grid coordinate iterator
   ============================================================ */

/// Row-major walk over every coordinate of a grid.
pub struct GridCoords {
    extents: Vec<usize>,
    current: Vec<usize>,
    done: bool,
}

impl GridCoords {
    pub fn new(extents: Vec<usize>) -> Self {
        let ndim = extents.len();
        let done = extents.iter().any(|&e| e == 0);
        Self {
            extents,
            current: vec![0; ndim],
            done,
        }
    }
}

impl Iterator for GridCoords {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current.clone();

        // advance multi-dimensional counter
        self.done = true;
        for d in (0..self.current.len()).rev() {
            self.current[d] += 1;
            if self.current[d] < self.extents[d] {
                self.done = false;
                break;
            }
            self.current[d] = 0;
        }

        Some(result)
    }
}

/* ============================================================
   Coordinate → slot translation
   ============================================================ */

/// Indexing function closed over a tile-grid shape.
#[derive(Debug, Clone)]
pub struct TileIndex {
    extents: Vec<usize>,
}

impl TileIndex {
    /// Linear slot of a grid coordinate, row-major.
    pub fn at(&self, coord: &[usize]) -> Result<usize> {
        if coord.len() != self.extents.len() {
            return Err(TileError::ShapeMismatch {
                what: "tile coordinate rank",
                expected: vec![self.extents.len()],
                actual: vec![coord.len()],
            });
        }
        let mut idx = 0;
        for (axis, (&c, &e)) in coord.iter().zip(&self.extents).enumerate() {
            if c >= e {
                return Err(TileError::IndexOutOfRange {
                    axis,
                    coord: c,
                    extent: e,
                });
            }
            idx = idx * e + c;
        }
        Ok(idx)
    }
}

/* ============================================================
   TiledTensor
   ============================================================ */

#[derive(Debug)]
pub struct TiledTensor<T> {
    grid: TensorShape,
    origin: TensorShape,
    halos: Vec<usize>,
    tiles: Vec<Option<Tensor<T>>>,
    regions: Vec<Tile>,
}

impl<T> TiledTensor<T> {
    /// Empty tiled tensor; every slot must be filled with [`Self::set`].
    pub fn new(grid: TensorShape, origin: TensorShape, halos: Vec<usize>) -> Result<Self> {
        if grid.rank() != origin.rank() || halos.len() != origin.rank() {
            return Err(TileError::ShapeMismatch {
                what: "tiled tensor rank",
                expected: vec![origin.rank()],
                actual: vec![grid.rank(), halos.len()],
            });
        }
        let n = grid.size();
        let regions = vec![Tile::new(vec![0; grid.rank()], vec![0; grid.rank()]); n];
        Ok(Self {
            grid,
            origin,
            halos,
            tiles: (0..n).map(|_| None).collect(),
            regions,
        })
    }

    /// The tile-grid shape: tiles per axis.
    pub fn shape(&self) -> &TensorShape {
        &self.grid
    }

    pub fn origin_shape(&self) -> &TensorShape {
        &self.origin
    }

    pub fn halos(&self) -> &[usize] {
        &self.halos
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn start_index(&self) -> TileIndex {
        TileIndex {
            extents: self.grid.dims().to_vec(),
        }
    }

    pub fn set(&mut self, index: usize, tile: Tensor<T>, region: Tile) -> Result<()> {
        let len = self.tiles.len();
        let slot = self
            .tiles
            .get_mut(index)
            .ok_or(TileError::SlotOutOfRange { index, len })?;
        *slot = Some(tile);
        self.regions[index] = region;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&Tensor<T>> {
        let len = self.tiles.len();
        self.tiles
            .get(index)
            .ok_or(TileError::SlotOutOfRange { index, len })?
            .as_ref()
            .ok_or(TileError::TileNotPopulated(index))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Tensor<T>> {
        let len = self.tiles.len();
        self.tiles
            .get_mut(index)
            .ok_or(TileError::SlotOutOfRange { index, len })?
            .as_mut()
            .ok_or(TileError::TileNotPopulated(index))
    }

    /// Origin region covered by the core of slot `index`.
    pub fn region(&self, index: usize) -> Result<&Tile> {
        self.get(index)?;
        Ok(&self.regions[index])
    }

    pub fn is_complete(&self) -> bool {
        self.tiles.iter().all(Option::is_some)
    }

    /// Populated tiles in slot order.
    pub fn tiles(&self) -> impl Iterator<Item = (&Tile, &Tensor<T>)> + '_ {
        self.regions
            .iter()
            .zip(&self.tiles)
            .filter_map(|(r, t)| t.as_ref().map(|t| (r, t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DataLayout;

    fn grid(dims: Vec<usize>) -> TensorShape {
        TensorShape::new(dims, DataLayout::NHWC).unwrap()
    }

    #[test]
    fn grid_coords_row_major() {
        let coords: Vec<_> = GridCoords::new(vec![2, 1, 3]).collect();
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0], vec![0, 0, 0]);
        assert_eq!(coords[1], vec![0, 0, 1]);
        assert_eq!(coords[3], vec![1, 0, 0]);
        assert_eq!(coords[5], vec![1, 0, 2]);
    }

    #[test]
    fn start_index_translates_and_rejects() {
        let g = grid(vec![1, 3, 1, 2]);
        let t: TiledTensor<f32> =
            TiledTensor::new(g.clone(), grid(vec![1, 9, 4, 4]), vec![0; 4]).unwrap();
        let idx = t.start_index();

        assert_eq!(idx.at(&[0, 0, 0, 0]).unwrap(), 0);
        assert_eq!(idx.at(&[0, 1, 0, 1]).unwrap(), 3);
        assert_eq!(idx.at(&[0, 2, 0, 1]).unwrap(), 5);
        assert!(matches!(
            idx.at(&[0, 3, 0, 0]),
            Err(TileError::IndexOutOfRange { axis: 1, coord: 3, extent: 3 })
        ));
        assert!(idx.at(&[0, 0, 0]).is_err());
    }

    #[test]
    fn unpopulated_slot_fails_then_succeeds() {
        let mut t: TiledTensor<f32> =
            TiledTensor::new(grid(vec![1, 2, 1, 1]), grid(vec![1, 4, 2, 2]), vec![0; 4]).unwrap();

        assert!(matches!(t.get(1), Err(TileError::TileNotPopulated(1))));
        assert!(matches!(t.get(2), Err(TileError::SlotOutOfRange { index: 2, len: 2 })));
        assert!(!t.is_complete());

        for i in 0..2 {
            let tile = Tensor::new(grid(vec![1, 2, 2, 2]));
            let region = Tile::new(vec![0, 2 * i, 0, 0], vec![1, 2, 2, 2]);
            t.set(i, tile, region).unwrap();
        }

        assert!(t.is_complete());
        assert_eq!(t.region(1).unwrap().start(1), 2);
        assert_eq!(t.tiles().count(), 2);
        assert_eq!(t.get_mut(0).unwrap().shape().dims(), &[1, 2, 2, 2]);
    }
}
